//! # Holo Compute
//!
//! Compute backend abstraction for the Holo workspace. Every phase-pattern
//! kernel (lens, grating, Zernike, zone composition) is expressed as a
//! per-pixel function and handed to a [`ComputeBackend`](backend::ComputeBackend),
//! which keeps the numerical code in `holo-core` independent of how the
//! pixels are scheduled.
//!
//! ## Available backends
//!
//! | Backend | Feature flag | Status |
//! |---------|-------------|--------|
//! | CPU (Rayon) | `cpu` (default) | Implemented |
//! | Serial | always | Implemented |

pub mod backend;
pub mod serial;

#[cfg(feature = "cpu")]
pub mod cpu;

pub use backend::{BackendType, ComputeBackend, ComputeError, DeviceInfo};
pub use serial::SerialBackend;

#[cfg(feature = "cpu")]
pub use cpu::CpuBackend;

use std::sync::Arc;

/// The preferred backend for this build: Rayon when the `cpu` feature is on,
/// the serial backend otherwise.
pub fn default_backend() -> Arc<dyn ComputeBackend> {
    #[cfg(feature = "cpu")]
    {
        Arc::new(CpuBackend::new())
    }
    #[cfg(not(feature = "cpu"))]
    {
        Arc::new(SerialBackend)
    }
}
