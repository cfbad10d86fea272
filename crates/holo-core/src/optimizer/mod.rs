//! Step-driven wavefront optimiser.
//!
//! The SLM surface is split into zones by a [`ZonePartition`]. Every frame
//! shows the *offset grating* everywhere except in two zones: the reference
//! zone carries the *interference grating* and the probe zone carries the
//! interference grating shifted by the current phase. Between frames the
//! worker thread blocks until an operator (or an automated feedback loop)
//! has measured the interference intensity and asks for the next step.
//!
//! ```text
//! Idle ──start──▶ Stepping ──phase > max──▶ Done
//!                    │  ▲
//!          frame ────┘  └──── next_step / start
//!                    │
//!                    └──stop──▶ Stopped
//! ```
//!
//! Wake-ups are coalesced: a `next_step` that arrives while a frame is being
//! produced is remembered and consumed by the next wait, never lost.

pub mod kernels;

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use holo_compute::{ComputeBackend, ComputeError};
use log::{debug, info, warn};
use ndarray::Array2;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memo::Memo;
use crate::pattern::{PatternError, PatternGenerator};
use crate::types::{GratingParameters, SlmSettings, ZoneId, ZonePartition};

/// Upper bound of the phase offset (grey levels).
pub const MAX_PHASE: f64 = 255.0;

/// Errors raised by the optimiser. Every variant is raised before any state
/// is touched.
#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("No zone partition loaded")]
    NoPartition,

    #[error("Reference and probe zones must both be selected")]
    ZonesNotSelected,

    #[error("Zone {0} is not part of the current partition")]
    UnknownZone(ZoneId),

    #[error("Reference and probe zone must differ (both are {0})")]
    SameZones(ZoneId),

    #[error("Both gratings need a non-zero line density")]
    ZeroGratingDensity,

    #[error("Phase {0} outside [0, 255]")]
    PhaseOutOfRange(f64),

    #[error("Phase step {0} outside (0, 255)")]
    PhaseStepOutOfRange(f64),

    #[error("Partition is {found_x}x{found_y}, SLM is {res_x}x{res_y}")]
    PartitionShape {
        found_x: usize,
        found_y: usize,
        res_x: usize,
        res_y: usize,
    },

    #[error("Optimiser is running")]
    Busy,

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("Compute backend error: {0}")]
    Compute(#[from] ComputeError),

    #[error("Failed to spawn optimiser thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl OptimizerError {
    /// `true` when the request was malformed, as opposed to the optimiser not
    /// being ready for it.
    pub fn is_validation(&self) -> bool {
        !matches!(
            self,
            Self::NoPartition | Self::Pattern(_) | Self::Compute(_) | Self::Spawn(_)
        )
    }
}

/// One of the two optimiser gratings. The angle is in units of π radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GratingSpec {
    pub lines_per_mm: f64,
    #[serde(default)]
    pub angle_pi: f64,
}

impl GratingSpec {
    pub fn new(lines_per_mm: f64, angle_pi: f64) -> Self {
        Self {
            lines_per_mm,
            angle_pi,
        }
    }

    fn parameters(&self, settings: &SlmSettings) -> GratingParameters {
        GratingParameters {
            wavelength_nm: settings.wavelength_nm,
            pixel_pitch_um: settings.pixel_pitch_um,
            lines_per_mm: self.lines_per_mm,
            angle_rad: self.angle_pi * std::f64::consts::PI,
        }
    }
}

/// The `(reference, probe, phase)` triple echoed by every control request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneReport {
    #[serde(rename = "RefZone")]
    pub reference_zone: Option<ZoneId>,
    #[serde(rename = "ProbZone")]
    pub probe_zone: Option<ZoneId>,
    #[serde(rename = "Phase")]
    pub phase: Option<f64>,
}

/// Zone report plus whether a run is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerStatus {
    #[serde(flatten)]
    pub zones: ZoneReport,
    #[serde(rename = "Optimizer")]
    pub running: bool,
}

/// Receives every frame the optimiser produces, outside the state lock.
pub trait FrameSink: Send + Sync {
    fn present(&self, frame: &Array2<f64>, phase: f64);
}

impl<F> FrameSink for F
where
    F: Fn(&Array2<f64>, f64) + Send + Sync,
{
    fn present(&self, frame: &Array2<f64>, phase: f64) {
        self(frame, phase)
    }
}

/// Sink that discards frames; the current one stays available through
/// [`WavefrontOptimizer::phase_pattern`].
pub struct NullSink;

impl FrameSink for NullSink {
    fn present(&self, _frame: &Array2<f64>, _phase: f64) {}
}

type GratingKey = (GratingParameters, usize, usize);

/// What the current frame buffer was built from.
#[derive(Debug, Clone, PartialEq)]
struct BuildKey {
    reference: ZoneId,
    probe: ZoneId,
    offset: GratingKey,
    interference: GratingKey,
}

struct State {
    settings: SlmSettings,
    generator: PatternGenerator,
    partition: Option<Arc<ZonePartition>>,
    grating: GratingSpec,
    interference: GratingSpec,
    reference_zone: Option<ZoneId>,
    probe_zone: Option<ZoneId>,
    phase: Option<f64>,
    phase_step: Option<f64>,
    active: bool,
    run_id: u64,
    wake_pending: bool,
    frame: Option<Array2<f64>>,
    built_for: Option<BuildKey>,
    frames: usize,
    offset_cache: Memo<GratingKey, Array2<f64>>,
    interference_cache: Memo<GratingKey, Array2<f64>>,
}

impl State {
    fn report(&self) -> ZoneReport {
        ZoneReport {
            reference_zone: self.reference_zone,
            probe_zone: self.probe_zone,
            phase: self.phase,
        }
    }

    fn is_current(&self, run_id: u64) -> bool {
        self.active && self.run_id == run_id
    }

    fn partition(&self) -> Result<&Arc<ZonePartition>, OptimizerError> {
        self.partition.as_ref().ok_or(OptimizerError::NoPartition)
    }

    fn check_zone(&self, id: ZoneId, other: Option<ZoneId>) -> Result<(), OptimizerError> {
        if !self.partition()?.contains(id) {
            return Err(OptimizerError::UnknownZone(id));
        }
        if other == Some(id) {
            return Err(OptimizerError::SameZones(id));
        }
        Ok(())
    }

    /// Preconditions of a fresh run.
    fn check_ready(&self) -> Result<(ZoneId, ZoneId), OptimizerError> {
        let partition = self.partition()?;
        let (Some(reference), Some(probe)) = (self.reference_zone, self.probe_zone) else {
            return Err(OptimizerError::ZonesNotSelected);
        };
        for id in [reference, probe] {
            if !partition.contains(id) {
                return Err(OptimizerError::UnknownZone(id));
            }
        }
        if reference == probe {
            return Err(OptimizerError::SameZones(reference));
        }
        if self.grating.lines_per_mm == 0.0 || self.interference.lines_per_mm == 0.0 {
            return Err(OptimizerError::ZeroGratingDensity);
        }
        check_partition_shape(partition, &self.settings)?;
        Ok((reference, probe))
    }

    /// Produce one frame and advance the phase. Returns the frame and the
    /// phase it was produced at.
    fn step(&mut self) -> Result<(Array2<f64>, f64), OptimizerError> {
        let partition = Arc::clone(self.partition()?);
        let (reference, probe) = match (self.reference_zone, self.probe_zone) {
            (Some(r), Some(p)) => (r, p),
            _ => return Err(OptimizerError::ZonesNotSelected),
        };
        let phase = *self.phase.get_or_insert(0.0);
        let step = self
            .phase_step
            .unwrap_or(self.settings.phase_correction / 10.0);

        let (res_x, res_y) = (self.settings.res_x, self.settings.res_y);
        let offset_key = (self.grating.parameters(&self.settings), res_x, res_y);
        let interference_key = (self.interference.parameters(&self.settings), res_x, res_y);

        let generator = &mut self.generator;
        let offset = self
            .offset_cache
            .get_or_try_insert(offset_key, |(p, rx, ry)| generator.generate_grating(p, *rx, *ry))?;
        let interference = self
            .interference_cache
            .get_or_try_insert(interference_key, |(p, rx, ry)| {
                generator.generate_grating(p, *rx, *ry)
            })?;

        let backend: Arc<dyn ComputeBackend> = Arc::clone(self.generator.backend());
        let key = BuildKey {
            reference,
            probe,
            offset: offset_key,
            interference: interference_key,
        };

        let frame = match self.frame.take() {
            Some(mut frame) if self.built_for.as_ref() == Some(&key) => {
                kernels::next_step_fast(
                    backend.as_ref(),
                    partition.zones(),
                    interference,
                    probe,
                    phase,
                    &mut frame,
                )?;
                frame
            }
            _ => {
                debug!("Rebuilding pattern for zones ({}, {})", reference, probe);
                let frame = kernels::load_pattern(
                    backend.as_ref(),
                    partition.zones(),
                    offset,
                    interference,
                    reference,
                    probe,
                    phase,
                )?;
                self.built_for = Some(key);
                frame
            }
        };
        self.frame = Some(frame.clone());

        self.phase = Some(phase + step);
        self.frames += 1;
        debug!("Optimiser frame {} at phase {}", self.frames, phase);
        Ok((frame, phase))
    }

    fn finish(&mut self) {
        self.active = false;
        self.phase = None;
        self.wake_pending = false;
    }
}

fn check_partition_shape(
    partition: &ZonePartition,
    settings: &SlmSettings,
) -> Result<(), OptimizerError> {
    if partition.res_x() != settings.res_x || partition.res_y() != settings.res_y {
        return Err(OptimizerError::PartitionShape {
            found_x: partition.res_x(),
            found_y: partition.res_y(),
            res_x: settings.res_x,
            res_y: settings.res_y,
        });
    }
    Ok(())
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
    sink: Arc<dyn FrameSink>,
}

/// The zone-based phase-stepping optimiser.
///
/// All methods take `&self` and may be called from any thread; the stepping
/// loop runs on a dedicated worker thread.
pub struct WavefrontOptimizer {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WavefrontOptimizer {
    pub fn new(settings: SlmSettings, generator: PatternGenerator, sink: Arc<dyn FrameSink>) -> Self {
        let state = State {
            settings,
            generator,
            partition: None,
            grating: GratingSpec::default(),
            interference: GratingSpec::default(),
            reference_zone: None,
            probe_zone: None,
            phase: None,
            phase_step: None,
            active: false,
            run_id: 0,
            wake_pending: false,
            frame: None,
            built_for: None,
            frames: 0,
            offset_cache: Memo::new(),
            interference_cache: Memo::new(),
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                wake: Condvar::new(),
                sink,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> SlmSettings {
        self.shared.state.lock().settings
    }

    /// Replace the device settings. A partition whose resolution no longer
    /// matches is dropped.
    pub fn set_settings(&self, settings: SlmSettings) -> Result<(), OptimizerError> {
        let mut state = self.shared.state.lock();
        if state.active {
            return Err(OptimizerError::Busy);
        }
        if let Some(partition) = &state.partition {
            if check_partition_shape(partition, &settings).is_err() {
                warn!("Resolution changed, dropping zone partition");
                state.partition = None;
                state.reference_zone = None;
                state.probe_zone = None;
            }
        }
        state.settings = settings;
        state.built_for = None;
        Ok(())
    }

    /// Hand a parsed partition to the optimiser. Selected zones that are not
    /// part of the new partition are cleared.
    pub fn set_partition(&self, partition: Arc<ZonePartition>) -> Result<(), OptimizerError> {
        let mut state = self.shared.state.lock();
        if state.active {
            return Err(OptimizerError::Busy);
        }
        check_partition_shape(&partition, &state.settings)?;
        if state.reference_zone.is_some_and(|id| !partition.contains(id)) {
            state.reference_zone = None;
        }
        if state.probe_zone.is_some_and(|id| !partition.contains(id)) {
            state.probe_zone = None;
        }
        info!("Zone partition loaded: {} zones", partition.ids().len());
        state.partition = Some(partition);
        state.built_for = None;
        Ok(())
    }

    pub fn partition(&self) -> Option<Arc<ZonePartition>> {
        self.shared.state.lock().partition.clone()
    }

    /// Store both grating descriptions. Patterns are regenerated lazily on
    /// the next frame.
    pub fn activate(&self, grating: GratingSpec, interference: GratingSpec) {
        let mut state = self.shared.state.lock();
        state.grating = grating;
        state.interference = interference;
    }

    /// Start a run, or wake the running one for its next step.
    pub fn start(&self) -> Result<ZoneReport, OptimizerError> {
        let mut state = self.shared.state.lock();
        if state.active {
            state.wake_pending = true;
            self.shared.wake.notify_all();
            return Ok(state.report());
        }

        state.check_ready()?;
        let step = state
            .phase_step
            .unwrap_or(state.settings.phase_correction / 10.0);
        if !(step > 0.0 && step < MAX_PHASE) {
            return Err(OptimizerError::PhaseStepOutOfRange(step));
        }

        state.active = true;
        state.run_id += 1;
        state.wake_pending = false;
        state.built_for = None;
        state.frames = 0;
        if state.phase.is_none() {
            state.phase = Some(0.0);
        }
        state.phase_step = Some(step);
        let run_id = state.run_id;
        let report = state.report();
        info!(
            "Optimiser started: reference {:?}, probe {:?}, step {:?}",
            state.reference_zone, state.probe_zone, state.phase_step
        );
        drop(state);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("wavefront-optimizer".into())
            .spawn(move || run_loop(shared, run_id));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.state.lock().finish();
                return Err(e.into());
            }
        };

        let previous = self.worker.lock().replace(handle);
        if let Some(previous) = previous {
            if previous.join().is_err() {
                warn!("Previous optimiser thread panicked");
            }
        }
        Ok(report)
    }

    /// Wake the running loop for one more frame. A no-op when idle.
    pub fn next_step(&self) -> ZoneReport {
        let mut state = self.shared.state.lock();
        if state.active {
            state.wake_pending = true;
            self.shared.wake.notify_all();
        }
        state.report()
    }

    /// Stop the current run. Safe to call repeatedly and from any thread.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        if state.active {
            info!("Optimiser stopped after {} frames", state.frames);
        }
        state.finish();
        self.shared.wake.notify_all();
    }

    /// Wait for the worker thread of the last run to exit.
    pub fn join(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Optimiser thread panicked");
            }
        }
    }

    pub fn report(&self) -> ZoneReport {
        self.shared.state.lock().report()
    }

    pub fn status(&self) -> OptimizerStatus {
        let state = self.shared.state.lock();
        OptimizerStatus {
            zones: state.report(),
            running: state.active,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().active
    }

    pub fn set_reference_zone(&self, id: ZoneId) -> Result<ZoneReport, OptimizerError> {
        let mut state = self.shared.state.lock();
        state.check_zone(id, state.probe_zone)?;
        state.reference_zone = Some(id);
        Ok(state.report())
    }

    pub fn set_probe_zone(&self, id: ZoneId) -> Result<ZoneReport, OptimizerError> {
        let mut state = self.shared.state.lock();
        state.check_zone(id, state.reference_zone)?;
        state.probe_zone = Some(id);
        Ok(state.report())
    }

    /// Set the phase offset applied at the next frame, in `[0, 255]`.
    pub fn set_phase(&self, phase: f64) -> Result<ZoneReport, OptimizerError> {
        if !(0.0..=MAX_PHASE).contains(&phase) {
            return Err(OptimizerError::PhaseOutOfRange(phase));
        }
        let mut state = self.shared.state.lock();
        state.phase = Some(phase);
        Ok(state.report())
    }

    /// Set the per-frame phase increment, in `(0, 255)`.
    pub fn set_phase_step(&self, step: f64) -> Result<ZoneReport, OptimizerError> {
        if !(step > 0.0 && step < MAX_PHASE) {
            return Err(OptimizerError::PhaseStepOutOfRange(step));
        }
        let mut state = self.shared.state.lock();
        state.phase_step = Some(step);
        Ok(state.report())
    }

    pub fn phase_step(&self) -> Option<f64> {
        self.shared.state.lock().phase_step
    }

    /// Distinct zone identifiers of the loaded partition, ascending.
    pub fn ids_list(&self) -> Result<Vec<ZoneId>, OptimizerError> {
        Ok(self.shared.state.lock().partition()?.ids_list())
    }

    /// The most recent frame, unwrapped outside the probe zone.
    pub fn phase_pattern(&self) -> Option<Array2<f64>> {
        self.shared.state.lock().frame.clone()
    }

    /// Frames produced by the current (or last) run.
    pub fn frames_produced(&self) -> usize {
        self.shared.state.lock().frames
    }

    /// How many times each grating has been generated: `(offset, interference)`.
    pub fn grating_generations(&self) -> (usize, usize) {
        let state = self.shared.state.lock();
        (state.offset_cache.misses(), state.interference_cache.misses())
    }
}

impl Drop for WavefrontOptimizer {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

fn run_loop(shared: Arc<Shared>, run_id: u64) {
    loop {
        let (frame, phase, finished) = {
            let mut state = shared.state.lock();
            if !state.is_current(run_id) {
                return;
            }
            match state.step() {
                Ok((frame, phase)) => {
                    let max = state.settings.phase_correction;
                    let finished = state.phase.map_or(true, |next| next > max);
                    if finished {
                        info!("Optimiser done after {} frames", state.frames);
                        state.finish();
                    }
                    (frame, phase, finished)
                }
                Err(e) => {
                    warn!("Optimiser step failed: {}", e);
                    state.finish();
                    return;
                }
            }
        };

        shared.sink.present(&frame, phase);
        if finished {
            return;
        }

        let mut state = shared.state.lock();
        while state.is_current(run_id) && !state.wake_pending {
            shared.wake.wait(&mut state);
        }
        if !state.is_current(run_id) {
            return;
        }
        state.wake_pending = false;
    }
}
