//! The meshing engine seen by the worker.

use std::path::Path;

use holo_core::types::ZoneId;
use thiserror::Error;

use crate::expr::ExprError;
use crate::protocol::MeshSpec;

/// Errors raised inside a meshing engine. They never cross the worker
/// boundary as errors: the worker turns them into negative responses.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid size field: {0}")]
    SizeField(#[from] ExprError),

    #[error("Unknown meshing algorithm index {0}")]
    UnknownAlgorithm(usize),

    #[error("Invalid domain {res_x}x{res_y}")]
    InvalidDomain { res_x: usize, res_y: usize },

    #[error("No mesh has been generated")]
    NotMeshed,

    #[error("No element contains point ({x}, {y})")]
    NoElement { x: f64, y: f64 },

    #[error("Visualisation window unavailable: {0}")]
    WindowUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed mesh file: {0}")]
    Format(#[from] serde_json::Error),
}

/// A 2-D meshing engine over the rectangle `[0, resX] × [0, resY]`.
pub trait MeshEngine {
    /// Build a new mesh, discarding the current model.
    fn generate(&mut self, spec: &MeshSpec) -> Result<(), EngineError>;

    /// Tag of the element containing `(x, y)`, in engine coordinates
    /// (Y pointing up).
    fn element_at(&self, x: f64, y: f64) -> Result<ZoneId, EngineError>;

    fn is_meshed(&self) -> bool;

    /// Persist the current model. Fails with [`EngineError::NotMeshed`]
    /// before any mesh exists.
    fn save(&self, path: &Path) -> Result<(), EngineError>;

    /// Replace the current model with the one stored at `path`.
    fn load(&mut self, path: &Path) -> Result<(), EngineError>;

    /// Open the interactive visualisation window.
    fn open_window(&mut self) -> Result<(), EngineError> {
        Err(EngineError::WindowUnavailable("engine has no window".into()))
    }

    /// Process window events; `false` once the window is gone.
    fn poll_window(&mut self) -> bool {
        false
    }

    fn close_window(&mut self) {}

    /// Release engine resources before the worker exits.
    fn finalize(&mut self) {}
}
