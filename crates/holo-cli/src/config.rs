//! TOML configuration deserialisation for hologram jobs.

use std::path::{Path, PathBuf};

use anyhow::Context;
use holo_core::elements::ElementSpec;
use holo_core::optimizer::GratingSpec;
use holo_core::types::{SlmSettings, ZoneId};
use holo_mesh::protocol::{algorithm_code, MeshSpec};
use serde::Deserialize;

/// Top-level job configuration.
#[derive(Debug, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub slm: SlmSettings,
    /// Compute backend: "auto", "cpu", or "serial". Default: "auto".
    #[serde(default = "default_backend")]
    pub backend: String,
    pub mesh: Option<MeshConfig>,
    #[serde(rename = "optimiser")]
    pub optimizer: Option<OptimizerConfig>,
    #[serde(default, rename = "element")]
    pub elements: Vec<ElementSpec>,
    #[serde(default)]
    pub output: OutputConfig,
}

fn default_backend() -> String {
    "auto".into()
}

/// Where the meshing engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    /// A child `holo-cli mesh-worker` process.
    #[default]
    Process,
    /// A thread of this process.
    Thread,
}

/// Meshing parameters from TOML.
#[derive(Debug, Deserialize)]
pub struct MeshConfig {
    /// Index into the meshing algorithm table (default: 0, MeshAdapt).
    #[serde(default)]
    pub algorithm: usize,
    #[serde(default = "default_size_field")]
    pub size_field: String,
    #[serde(default)]
    pub worker: WorkerMode,
    /// Load this engine file instead of generating a mesh.
    pub load: Option<PathBuf>,
}

fn default_size_field() -> String {
    "2.5*((x-0.5)*(x-0.5)+(y-0.5)*(y-0.5)) + 10".into()
}

impl MeshConfig {
    pub fn spec(&self, slm: &SlmSettings) -> MeshSpec {
        MeshSpec {
            res_x: slm.res_x,
            res_y: slm.res_y,
            algorithm: self.algorithm,
            size_field: self.size_field.clone(),
        }
    }
}

/// Optimiser parameters from TOML.
#[derive(Debug, Deserialize)]
pub struct OptimizerConfig {
    /// Offset grating, applied outside both zones.
    pub grating: GratingSpec,
    /// Interference grating, applied in the reference and probe zones.
    pub interference: GratingSpec,
    pub reference_zone: Option<ZoneId>,
    pub probe_zone: Option<ZoneId>,
    pub phase_step: Option<f64>,
    /// Compose frames together with the active `[[element]]` entries.
    #[serde(default = "default_true")]
    pub include_elements: bool,
}

/// Output configuration.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Output directory (default: "./output").
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,
    /// Write every optimiser frame as PNG (default: false).
    #[serde(default)]
    pub save_frames: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            save_frames: false,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}
fn default_true() -> bool {
    true
}

impl JobConfig {
    /// Checks that need more than one field.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.slm.res_x == 0 || self.slm.res_y == 0 {
            anyhow::bail!("[slm] resolution must be positive, got {}x{}", self.slm.res_x, self.slm.res_y);
        }
        if !(self.slm.phase_correction > 0.0 && self.slm.phase_correction <= 255.0) {
            anyhow::bail!("[slm] phase_correction must be in (0, 255], got {}", self.slm.phase_correction);
        }
        if !matches!(self.backend.as_str(), "auto" | "cpu" | "serial") {
            anyhow::bail!("Unknown backend '{}'. Valid values: auto, cpu, serial", self.backend);
        }
        if let Some(mesh) = &self.mesh {
            if algorithm_code(mesh.algorithm).is_none() {
                anyhow::bail!("[mesh] unknown algorithm index {}", mesh.algorithm);
            }
        }
        if let Some(opt) = &self.optimizer {
            if opt.grating.lines_per_mm == 0.0 || opt.interference.lines_per_mm == 0.0 {
                anyhow::bail!("[optimiser] both gratings need a non-zero lines_per_mm");
            }
            if let Some(step) = opt.phase_step {
                if !(step > 0.0 && step < 255.0) {
                    anyhow::bail!("[optimiser] phase_step must be in (0, 255), got {}", step);
                }
            }
        }
        Ok(())
    }
}

/// Load and parse a TOML job configuration file.
pub fn load_config(path: &Path) -> anyhow::Result<JobConfig> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let config: JobConfig = toml::from_str(&content).with_context(|| format!("Parsing {}", path.display()))?;
    config.validate()?;
    Ok(config)
}
