//! Job runner: ties together the pattern generator, the meshing worker and
//! the optimiser.

use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use ndarray::Array2;
use parking_lot::Mutex;

use holo_compute::{ComputeBackend, CpuBackend, SerialBackend};
use holo_core::hologram::{encode_png, HologramComposer};
use holo_core::optimizer::{FrameSink, NullSink, WavefrontOptimizer};
use holo_core::pattern::PatternGenerator;
use holo_core::remote::{Body, RemoteControl};
use holo_core::types::ZonePartition;
use holo_mesh::coordinator::MeshCoordinator;
use holo_mesh::quadtree::QuadtreeEngine;

use crate::config::{JobConfig, MeshConfig, WorkerMode};

/// Select the compute backend named in the job file.
pub fn create_backend(preference: &str) -> Arc<dyn ComputeBackend> {
    let backend: Arc<dyn ComputeBackend> = match preference {
        "serial" => Arc::new(SerialBackend),
        // "cpu", "auto" or any unrecognised value
        _ => Arc::new(CpuBackend::new()),
    };
    println!("Backend: {}", backend.device_info().name);
    backend
}

fn composer_for(job: &JobConfig, backend: Arc<dyn ComputeBackend>) -> HologramComposer {
    let mut composer = HologramComposer::new(job.slm, PatternGenerator::new(backend));
    for element in &job.elements {
        composer.add_source(element.build());
    }
    composer
}

fn write_png(frame: &Array2<u8>, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let png = encode_png(frame).context("PNG encoding failed")?;
    fs::write(path, png).with_context(|| format!("Writing {}", path.display()))?;
    Ok(())
}

/// Compose every active element and write the 8-bit hologram.
pub fn run_compose(job: &JobConfig, path: &Path) -> Result<()> {
    let mut composer = composer_for(job, create_backend(&job.backend));
    let active = composer.sources().filter(|s| s.is_active()).count();
    println!("Composing {} active element(s) of {}", active, job.elements.len());
    let frame = composer.compose()?;
    write_png(&frame, path)?;
    println!("Hologram written to: {}", path.display());
    Ok(())
}

/// Start the meshing worker the job asks for.
pub fn open_mesh(mesh: &MeshConfig) -> Result<MeshCoordinator> {
    let coordinator = match mesh.worker {
        WorkerMode::Thread => MeshCoordinator::spawn_thread(QuadtreeEngine::new())?,
        WorkerMode::Process => {
            let exe = std::env::current_exe().context("Locating holo-cli executable")?;
            MeshCoordinator::spawn_process(exe, &["mesh-worker"])?
        }
    };
    Ok(coordinator)
}

/// Generate (or load) the mesh and parse it into a zone partition.
pub fn mesh_partition(coordinator: &mut MeshCoordinator, job: &JobConfig, mesh: &MeshConfig) -> Result<ZonePartition> {
    let spec = mesh.spec(&job.slm);
    match &mesh.load {
        Some(path) => {
            if !coordinator.load_mesh(path, spec)? {
                anyhow::bail!("There was an error loading the mesh file {}", path.display());
            }
            println!("Mesh loaded from: {}", path.display());
        }
        None => {
            println!(
                "Meshing {}x{} with algorithm {} (F = {})",
                spec.res_x,
                spec.res_y,
                holo_mesh::protocol::algorithm_name(spec.algorithm).unwrap_or("?"),
                spec.size_field
            );
            coordinator.generate_mesh(spec)?;
        }
    }
    let partition = coordinator.parse_mesh().context("Mesh is not ready")?;
    Ok(partition)
}

/// Mesh the SLM surface, report zone statistics and export the zone map.
pub fn run_mesh(job: &JobConfig, save: Option<&Path>) -> Result<()> {
    let mesh = job.mesh.as_ref().context("Job has no [mesh] section")?;
    let mut coordinator = open_mesh(mesh)?;
    let partition = mesh_partition(&mut coordinator, job, mesh)?;

    let areas: Vec<usize> = partition.ids().iter().map(|&id| partition.zone_area(id)).collect();
    println!(
        "Zones: {} (smallest {} px, largest {} px)",
        areas.len(),
        areas.iter().min().copied().unwrap_or(0),
        areas.iter().max().copied().unwrap_or(0)
    );

    write_zones_csv(&partition, &job.output.directory.join("zones.csv"))?;

    if let Some(path) = save {
        if !coordinator.save_mesh(path)? {
            anyhow::bail!("There was an error saving the mesh file {}", path.display());
        }
        println!("Mesh saved to: {}", path.display());
    }
    coordinator.terminate()?;
    Ok(())
}

/// Write the zone identifier grid as CSV, one pixel row per line.
pub fn write_zones_csv(partition: &ZonePartition, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = std::io::BufWriter::new(fs::File::create(path)?);
    writeln!(file, "# Holo zone map: {}x{}, {} zones", partition.res_x(), partition.res_y(), partition.ids().len())?;
    for row in partition.zones().rows() {
        let line: Vec<String> = row.iter().map(|id| id.to_string()).collect();
        writeln!(file, "{}", line.join(","))?;
    }
    file.flush()?;
    println!("Zone map written to: {}", path.display());
    Ok(())
}

/// Writes each optimiser frame, composed with the job's elements, as PNG.
struct PngFrameSink {
    composer: Mutex<HologramComposer>,
    include_elements: bool,
    directory: PathBuf,
    count: AtomicUsize,
}

impl FrameSink for PngFrameSink {
    fn present(&self, frame: &Array2<f64>, phase: f64) {
        let index = self.count.fetch_add(1, Ordering::SeqCst);
        let rendered = self.composer.lock().render_algorithm_pattern(frame, self.include_elements);
        let path = self.directory.join(format!("frame_{:04}.png", index));
        match rendered.map_err(anyhow::Error::from).and_then(|f| write_png(&f, &path)) {
            Ok(()) => info!("Frame {} (phase {}) written to {}", index, phase, path.display()),
            Err(e) => warn!("Could not write frame {}: {:#}", index, e),
        }
    }
}

/// Mesh, configure the optimiser and serve control routes read from `input`,
/// one per line, until end of input or `quit`.
pub fn run_optimiser<R: BufRead, W: Write>(job: &JobConfig, input: R, mut output: W) -> Result<()> {
    let mesh = job.mesh.as_ref().context("Job has no [mesh] section")?;
    let settings = job.optimizer.as_ref().context("Job has no [optimiser] section")?;
    let backend = create_backend(&job.backend);

    let mut coordinator = open_mesh(mesh)?;
    let partition = Arc::new(mesh_partition(&mut coordinator, job, mesh)?);
    coordinator.terminate()?;
    println!("Zones available: {:?}", partition.ids_list());

    let sink: Arc<dyn FrameSink> = if job.output.save_frames {
        Arc::new(PngFrameSink {
            composer: Mutex::new(composer_for(job, Arc::clone(&backend))),
            include_elements: settings.include_elements,
            directory: job.output.directory.clone(),
            count: AtomicUsize::new(0),
        })
    } else {
        Arc::new(NullSink)
    };

    let optimizer = Arc::new(WavefrontOptimizer::new(job.slm, PatternGenerator::new(backend), sink));
    optimizer.set_partition(partition)?;
    optimizer.activate(settings.grating, settings.interference);
    if let Some(id) = settings.reference_zone {
        optimizer.set_reference_zone(id)?;
    }
    if let Some(id) = settings.probe_zone {
        optimizer.set_probe_zone(id)?;
    }
    if let Some(step) = settings.phase_step {
        optimizer.set_phase_step(step)?;
    }

    let remote = RemoteControl::new(Arc::clone(&optimizer));
    for line in input.lines() {
        let line = line?;
        let route = line.trim();
        if route.is_empty() {
            continue;
        }
        if route == "quit" || route == "exit" {
            break;
        }
        let response = remote.handle(route);
        match &response.body {
            Body::Json(value) => writeln!(output, "{} {}", response.status, value)?,
            Body::Png(png) => {
                let path = job.output.directory.join("phase_pattern.png");
                fs::create_dir_all(&job.output.directory)?;
                fs::write(&path, png)?;
                writeln!(output, "{} {}", response.status, path.display())?;
            }
        }
        output.flush()?;
    }

    optimizer.stop();
    optimizer.join();
    println!("Optimiser produced {} frame(s)", optimizer.frames_produced());
    Ok(())
}

/// Host the built-in meshing engine on stdin/stdout.
pub fn serve_mesh_worker() -> Result<()> {
    holo_mesh::worker::serve_stdio(QuadtreeEngine::new())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobConfig;

    fn job(dir: &Path, save_frames: bool) -> JobConfig {
        let text = format!(
            r#"
            backend = "serial"

            [slm]
            res_x = 32
            res_y = 16

            [mesh]
            algorithm = 6
            size_field = "8"
            worker = "thread"

            [optimiser]
            grating = {{ lines_per_mm = 20 }}
            interference = {{ lines_per_mm = 35 }}
            reference_zone = 1
            probe_zone = 2
            phase_step = 100

            [[element]]
            kind = "grating"
            lines_per_mm = 10

            [output]
            directory = "{}"
            save_frames = {}
            "#,
            dir.display(),
            save_frames
        );
        toml::from_str(&text).unwrap()
    }

    #[test]
    fn test_compose_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path(), false);
        let path = dir.path().join("holo.png");
        run_compose(&job, &path).unwrap();
        assert!(fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn test_mesh_writes_zone_map() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path(), false);
        let saved = dir.path().join("surface.json");
        run_mesh(&job, Some(saved.as_path())).unwrap();

        let csv = fs::read_to_string(dir.path().join("zones.csv")).unwrap();
        let rows: Vec<&str> = csv.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(rows.len(), 16);
        assert!(rows.iter().all(|r| r.split(',').count() == 32));
        assert!(saved.exists());
    }

    #[test]
    fn test_optimiser_session_from_routes() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path(), true);
        let routes = "/optimiser/IDsList\n/optimiser/probzone/1\n/optimiser/nosuch\nquit\n/optimiser/start\n";
        let mut out = Vec::new();
        run_optimiser(&job, routes.as_bytes(), &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("200 {\"IDsList\":[1,"));
        assert!(lines[1].starts_with("400 "));
        assert!(lines[2].starts_with("404 "));
    }
}
