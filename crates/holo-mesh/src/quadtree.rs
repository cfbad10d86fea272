//! Built-in adaptive meshing engine.
//!
//! The domain `[0, resX] × [0, resY]` is split recursively into four
//! congruent cells. A cell is split while its longest side exceeds the target
//! size `min(lc, F(cx, cy))`, where `lc = max(resX, resY)/2` is the initial
//! characteristic length and `F` the size field evaluated at the cell centre.
//! Cells are never made smaller than one pixel. "Initial mesh only" stops
//! at `lc`.
//!
//! Quad algorithms keep every leaf as one quadrilateral element; the others
//! split each leaf into two triangles along its rising diagonal. Tags are
//! numbered from 1 in depth-first order (children: lower-left, lower-right,
//! upper-left, upper-right), so equal inputs always give equal tags.

use std::fs;
use std::path::Path;

use holo_core::types::ZoneId;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::engine::{EngineError, MeshEngine};
use crate::expr::SizeField;
use crate::protocol::{algorithm_code, is_quad_algorithm, MeshSpec, INITIAL_MESH_ONLY};

const FORMAT: &str = "holo-quadtree";
const VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Cell {
    /// First tag of the leaf (the lower-right triangle, or the quad itself).
    Leaf(ZoneId),
    Split(Box<[Cell; 4]>),
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
}

impl Rect {
    fn longest_side(&self) -> f64 {
        (self.x1 - self.x0).max(self.y1 - self.y0)
    }

    fn shortest_side(&self) -> f64 {
        (self.x1 - self.x0).min(self.y1 - self.y0)
    }

    fn centre(&self) -> (f64, f64) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    /// Lower-left, lower-right, upper-left, upper-right.
    fn quarters(&self) -> [Rect; 4] {
        let (cx, cy) = self.centre();
        [
            Rect { x0: self.x0, y0: self.y0, x1: cx, y1: cy },
            Rect { x0: cx, y0: self.y0, x1: self.x1, y1: cy },
            Rect { x0: self.x0, y0: cy, x1: cx, y1: self.y1 },
            Rect { x0: cx, y0: cy, x1: self.x1, y1: self.y1 },
        ]
    }
}

/// Persisted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct QuadMesh {
    format: String,
    version: u32,
    spec: MeshSpec,
    quads: bool,
    elements: usize,
    root: Cell,
}

impl QuadMesh {
    fn domain(&self) -> Rect {
        Rect {
            x0: 0.0,
            y0: 0.0,
            x1: self.spec.res_x as f64,
            y1: self.spec.res_y as f64,
        }
    }
}

/// Deterministic quadtree engine.
#[derive(Debug, Default)]
pub struct QuadtreeEngine {
    mesh: Option<QuadMesh>,
}

impl QuadtreeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of elements in the current mesh.
    pub fn element_count(&self) -> usize {
        self.mesh.as_ref().map_or(0, |m| m.elements)
    }
}

struct Builder<'a> {
    field: &'a SizeField,
    lc: f64,
    refine: bool,
    per_leaf: ZoneId,
    next_tag: ZoneId,
}

impl Builder<'_> {
    fn build(&mut self, rect: Rect) -> Cell {
        if self.should_split(&rect) {
            let [a, b, c, d] = rect.quarters();
            Cell::Split(Box::new([self.build(a), self.build(b), self.build(c), self.build(d)]))
        } else {
            let tag = self.next_tag;
            self.next_tag += self.per_leaf;
            Cell::Leaf(tag)
        }
    }

    fn should_split(&self, rect: &Rect) -> bool {
        // Children may not drop below one pixel on either axis
        if rect.shortest_side() / 2.0 < 1.0 {
            return false;
        }
        let side = rect.longest_side();
        let target = if self.refine {
            let (cx, cy) = rect.centre();
            let f = self.field.eval(cx, cy);
            if f.is_finite() { self.lc.min(f) } else { self.lc }
        } else {
            self.lc
        };
        side > target
    }
}

fn lookup(cell: &Cell, rect: Rect, quads: bool, x: f64, y: f64) -> ZoneId {
    match cell {
        Cell::Leaf(tag) => {
            if quads {
                return *tag;
            }
            let u = (x - rect.x0) / (rect.x1 - rect.x0);
            let v = (y - rect.y0) / (rect.y1 - rect.y0);
            if v <= u {
                *tag
            } else {
                *tag + 1
            }
        }
        Cell::Split(children) => {
            let (cx, cy) = rect.centre();
            let quarters = rect.quarters();
            let idx = match (x > cx, y > cy) {
                (false, false) => 0,
                (true, false) => 1,
                (false, true) => 2,
                (true, true) => 3,
            };
            lookup(&children[idx], quarters[idx], quads, x, y)
        }
    }
}

impl MeshEngine for QuadtreeEngine {
    fn generate(&mut self, spec: &MeshSpec) -> Result<(), EngineError> {
        if algorithm_code(spec.algorithm).is_none() {
            return Err(EngineError::UnknownAlgorithm(spec.algorithm));
        }
        if spec.res_x == 0 || spec.res_y == 0 {
            return Err(EngineError::InvalidDomain {
                res_x: spec.res_x,
                res_y: spec.res_y,
            });
        }
        let field = SizeField::parse(&spec.size_field)?;
        let quads = is_quad_algorithm(spec.algorithm);

        let mut builder = Builder {
            field: &field,
            lc: 0.5 * spec.res_x.max(spec.res_y) as f64,
            refine: spec.algorithm != INITIAL_MESH_ONLY,
            per_leaf: if quads { 1 } else { 2 },
            next_tag: 1,
        };
        let domain = Rect {
            x0: 0.0,
            y0: 0.0,
            x1: spec.res_x as f64,
            y1: spec.res_y as f64,
        };
        let root = builder.build(domain);
        let elements = (builder.next_tag - 1) as usize;

        info!(
            "Meshed {}x{} with {} ({} elements)",
            spec.res_x,
            spec.res_y,
            crate::protocol::algorithm_name(spec.algorithm).unwrap_or("?"),
            elements
        );
        self.mesh = Some(QuadMesh {
            format: FORMAT.into(),
            version: VERSION,
            spec: spec.clone(),
            quads,
            elements,
            root,
        });
        Ok(())
    }

    fn element_at(&self, x: f64, y: f64) -> Result<ZoneId, EngineError> {
        let mesh = self.mesh.as_ref().ok_or(EngineError::NotMeshed)?;
        let domain = mesh.domain();
        if !(domain.x0..=domain.x1).contains(&x) || !(domain.y0..=domain.y1).contains(&y) {
            return Err(EngineError::NoElement { x, y });
        }
        Ok(lookup(&mesh.root, domain, mesh.quads, x, y))
    }

    fn is_meshed(&self) -> bool {
        self.mesh.is_some()
    }

    fn save(&self, path: &Path) -> Result<(), EngineError> {
        let mesh = self.mesh.as_ref().ok_or(EngineError::NotMeshed)?;
        fs::write(path, serde_json::to_vec(mesh)?)?;
        debug!("Saved mesh to {}", path.display());
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<(), EngineError> {
        self.mesh = None;
        let bytes = fs::read(path)?;
        let mesh: QuadMesh = serde_json::from_slice(&bytes)?;
        if mesh.format != FORMAT || mesh.version != VERSION {
            return Err(EngineError::Format(serde::de::Error::custom(format!(
                "unsupported format {} v{}",
                mesh.format, mesh.version
            ))));
        }
        info!("Loaded mesh from {} ({} elements)", path.display(), mesh.elements);
        self.mesh = Some(mesh);
        Ok(())
    }
}
