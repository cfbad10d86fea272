//! Messages exchanged between the coordinator and the meshing worker.
//!
//! Each request is a single self-contained message, so the parameters of one
//! request can never be read as those of another.

use std::path::PathBuf;

use holo_core::types::ZonePartition;
use serde::{Deserialize, Serialize};

/// Meshing algorithms in selection order: `(engine code, name)`.
pub const ALGORITHMS: [(u32, &str); 9] = [
    (1, "MeshAdapt"),
    (2, "Automatic"),
    (3, "Initial mesh only"),
    (5, "Delaunay"),
    (6, "Frontal-Delaunay"),
    (7, "BAMG"),
    (8, "Frontal-Delaunay quads"),
    (9, "Packing parallelograms"),
    (11, "Quasi-structured Quad"),
];

/// Index of "Initial mesh only" in [`ALGORITHMS`].
pub const INITIAL_MESH_ONLY: usize = 2;

/// Engine code for an algorithm index.
pub fn algorithm_code(index: usize) -> Option<u32> {
    ALGORITHMS.get(index).map(|&(code, _)| code)
}

pub fn algorithm_name(index: usize) -> Option<&'static str> {
    ALGORITHMS.get(index).map(|&(_, name)| name)
}

/// Whether the algorithm produces quadrilateral elements.
pub fn is_quad_algorithm(index: usize) -> bool {
    matches!(algorithm_code(index), Some(8) | Some(11))
}

/// Everything needed to mesh the SLM surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshSpec {
    pub res_x: usize,
    pub res_y: usize,
    /// Index into [`ALGORITHMS`].
    pub algorithm: usize,
    /// Target element size as a function of `x` and `y`.
    pub size_field: String,
}

/// Requests sent to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum MeshRequest {
    /// Fire-and-forget.
    Generate { spec: MeshSpec },
    /// Answered by [`MeshResponse::Parsed`].
    Parse,
    ShowWindow,
    CloseWindow,
    /// Answered by [`MeshResponse::Saved`].
    Save { path: PathBuf },
    /// Replaces the current model. Answered by [`MeshResponse::Loaded`].
    Load { path: PathBuf, spec: MeshSpec },
    Terminate,
}

/// Messages sent back by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum MeshResponse {
    Parsed { result: Result<ZonePartition, String> },
    Saved { ok: bool },
    Loaded { ok: bool },
    /// Unsolicited: the visualisation window went away.
    WindowClosed,
}
