//! # Holo Core
//!
//! The numerical backbone of the Holo workspace. This crate synthesises the
//! 8-bit phase patterns displayed on a spatial light modulator (SLM) and runs
//! the zone-based phase-stepping optimiser used for wavefront correction.
//!
//! ## Architecture
//!
//! All per-pixel kernels go through a [`holo_compute::ComputeBackend`]. The
//! [`pattern::PatternGenerator`] owns a cached [`coords::CoordinateMesh`] and
//! produces lens, grating and Zernike maps. Optical elements implement
//! [`hologram::PatternSource`] and are summed and normalised by the
//! [`hologram::HologramComposer`]. The [`optimizer::WavefrontOptimizer`]
//! combines two gratings over a [`types::ZonePartition`] and steps the probe
//! zone's phase under external control, exposed to remote clients through
//! [`remote::RemoteControl`].
//!
//! ## Modules
//!
//! - [`types`]: SLM settings, pattern parameters, zone partitions.
//! - [`coords`]: Centred pixel-coordinate grids.
//! - [`pattern`]: Lens, grating and Zernike synthesis.
//! - [`zernike`]: ANSI indexing and Zernike polynomial evaluation.
//! - [`memo`]: Last-parameters caches gating regeneration.
//! - [`elements`]: Lens, grating, Zernike and flatness-correction sources.
//! - [`hologram`]: Composition, phase-correction normalisation, PNG export.
//! - [`optimizer`]: Step-driven wavefront optimiser.
//! - [`remote`]: Remote-control command surface.

pub mod coords;
pub mod elements;
pub mod hologram;
pub mod memo;
pub mod optimizer;
pub mod pattern;
pub mod remote;
pub mod types;
pub mod zernike;
