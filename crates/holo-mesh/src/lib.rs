//! # Holo Mesh
//!
//! Splits the SLM surface into zones with a meshing engine that lives in its
//! own worker (a thread, or a separate process when the engine's window must
//! own the main thread).
//!
//! ## Architecture
//!
//! The [`coordinator::MeshCoordinator`] sends typed [`protocol::MeshRequest`]
//! messages to a [`worker::MeshWorker`], which collects pending requests as
//! flags and dispatches them in a fixed priority order against a
//! [`engine::MeshEngine`]. Blocking requests (parse, save, load) always get
//! exactly one [`protocol::MeshResponse`], including negative ones, so the
//! caller can never hang on a failed operation.
//!
//! Across a process boundary the same messages travel as JSON lines (see
//! [`transport`]).
//!
//! ## Modules
//!
//! - [`protocol`]: Request/response messages and the algorithm table.
//! - [`expr`]: Size-field expression language.
//! - [`engine`]: The `MeshEngine` trait.
//! - [`quadtree`]: Built-in adaptive quad/triangle engine.
//! - [`worker`]: Priority dispatcher loop.
//! - [`coordinator`]: Client side of the protocol.
//! - [`transport`]: JSON-lines pumps for the process worker.

pub mod coordinator;
pub mod engine;
pub mod expr;
pub mod protocol;
pub mod quadtree;
pub mod transport;
pub mod worker;

use thiserror::Error;

/// Errors seen by the client side of the mesh protocol.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("Meshing worker is not running")]
    WorkerGone,

    #[error("Failed to start meshing worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Unknown meshing algorithm index {0}")]
    UnknownAlgorithm(usize),

    #[error("Meshing engine error: {0}")]
    Engine(String),

    #[error("Unexpected response from worker: {0}")]
    UnexpectedResponse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed protocol message: {0}")]
    Json(#[from] serde_json::Error),
}
