//! Worker side of the mesh protocol.
//!
//! The worker sleeps until a request arrives, drains everything that is
//! pending into a set of flags and then serves them in a fixed priority
//! order: generate, parse, close window, save, load, terminate. While the
//! visualisation window is open the wait is sliced so the window keeps being
//! polled; if the window disappears on its own a
//! [`MeshResponse::WindowClosed`] notification is sent.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use holo_core::types::ZonePartition;
use log::{debug, info, warn};
use ndarray::Array2;

use crate::engine::{EngineError, MeshEngine};
use crate::protocol::{MeshRequest, MeshResponse, MeshSpec};
use crate::transport;
use crate::MeshError;

/// Wait slice while the visualisation window is open.
pub const WINDOW_POLL: Duration = Duration::from_millis(10);

/// Request flags collected between two dispatch rounds.
#[derive(Debug, Default)]
struct Pending {
    generate: Option<MeshSpec>,
    parse: bool,
    show: bool,
    close: bool,
    save: Option<PathBuf>,
    load: Option<(PathBuf, MeshSpec)>,
    terminate: bool,
}

impl Pending {
    fn set(&mut self, request: MeshRequest) {
        match request {
            MeshRequest::Generate { spec } => self.generate = Some(spec),
            MeshRequest::Parse => self.parse = true,
            MeshRequest::ShowWindow => self.show = true,
            MeshRequest::CloseWindow => self.close = true,
            MeshRequest::Save { path } => self.save = Some(path),
            MeshRequest::Load { path, spec } => self.load = Some((path, spec)),
            MeshRequest::Terminate => self.terminate = true,
        }
    }
}

/// Walk every pixel in row-major order and ask the engine which element
/// contains it. The engine's Y axis points up, so row `i` is queried at
/// `resY - i`.
pub fn parse_partition<E: MeshEngine + ?Sized>(
    engine: &E,
    res_x: usize,
    res_y: usize,
) -> Result<ZonePartition, EngineError> {
    let mut zones = Array2::zeros((res_y, res_x));
    for ((i, j), zone) in zones.indexed_iter_mut() {
        *zone = engine.element_at(j as f64, (res_y - i) as f64)?;
    }
    ZonePartition::from_grid(zones).map_err(|_| EngineError::InvalidDomain { res_x, res_y })
}

/// Hosts a [`MeshEngine`] and serves requests until told to terminate.
pub struct MeshWorker<E: MeshEngine> {
    engine: E,
    spec: Option<MeshSpec>,
    last_error: Option<String>,
    window_open: bool,
}

impl<E: MeshEngine> MeshWorker<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            spec: None,
            last_error: None,
            window_open: false,
        }
    }

    /// Serve requests until [`MeshRequest::Terminate`] arrives or the request
    /// channel closes. Returns the engine after finalising it.
    pub fn run(
        mut self,
        requests: Receiver<MeshRequest>,
        responses: Sender<MeshResponse>,
    ) -> Result<E, MeshError> {
        info!("Meshing worker ready");
        loop {
            let first = if self.window_open {
                match requests.recv_timeout(WINDOW_POLL) {
                    Ok(request) => Some(request),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => Some(MeshRequest::Terminate),
                }
            } else {
                Some(requests.recv().unwrap_or(MeshRequest::Terminate))
            };

            let mut pending = Pending::default();
            if let Some(request) = first {
                pending.set(request);
            }
            while let Ok(request) = requests.try_recv() {
                pending.set(request);
            }

            if !self.dispatch(pending, &responses)? {
                break;
            }

            if self.window_open && !self.engine.poll_window() {
                info!("Visualisation window closed");
                self.window_open = false;
                send(&responses, MeshResponse::WindowClosed)?;
            }
        }

        if self.window_open {
            self.engine.close_window();
        }
        self.engine.finalize();
        info!("Meshing worker stopped");
        Ok(self.engine)
    }

    /// Serve one batch of flags. Returns `false` once terminate was handled.
    fn dispatch(&mut self, pending: Pending, responses: &Sender<MeshResponse>) -> Result<bool, MeshError> {
        if let Some(spec) = pending.generate {
            self.generate(spec);
        }
        if pending.parse {
            let result = self.parse().map_err(|e| e.to_string());
            send(responses, MeshResponse::Parsed { result })?;
        }
        if pending.close {
            if self.window_open {
                self.engine.close_window();
                self.window_open = false;
            }
        } else if pending.show && !self.window_open {
            match self.engine.open_window() {
                Ok(()) => self.window_open = true,
                Err(e) => {
                    warn!("Cannot open visualisation window: {}", e);
                    send(responses, MeshResponse::WindowClosed)?;
                }
            }
        }
        if let Some(path) = pending.save {
            let ok = match self.engine.save(&path) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Saving mesh to {} failed: {}", path.display(), e);
                    false
                }
            };
            send(responses, MeshResponse::Saved { ok })?;
        }
        if let Some((path, spec)) = pending.load {
            let ok = match self.engine.load(&path) {
                Ok(()) => {
                    self.spec = Some(spec);
                    self.last_error = None;
                    true
                }
                Err(e) => {
                    warn!("Loading mesh from {} failed: {}", path.display(), e);
                    self.spec = None;
                    false
                }
            };
            send(responses, MeshResponse::Loaded { ok })?;
        }
        Ok(!pending.terminate)
    }

    fn generate(&mut self, spec: MeshSpec) {
        debug!("Generating mesh {:?}", spec);
        match self.engine.generate(&spec) {
            Ok(()) => {
                self.spec = Some(spec);
                self.last_error = None;
            }
            Err(e) => {
                warn!("Mesh generation failed: {}", e);
                self.spec = None;
                self.last_error = Some(e.to_string());
            }
        }
    }

    fn parse(&self) -> Result<ZonePartition, String> {
        let spec = match (&self.spec, &self.last_error) {
            (Some(spec), _) if self.engine.is_meshed() => spec,
            (_, Some(err)) => return Err(format!("mesh generation failed: {}", err)),
            _ => return Err(EngineError::NotMeshed.to_string()),
        };
        let partition = parse_partition(&self.engine, spec.res_x, spec.res_y).map_err(|e| e.to_string())?;
        info!("Parsed mesh into {} zones", partition.ids().len());
        Ok(partition)
    }
}

fn send(responses: &Sender<MeshResponse>, response: MeshResponse) -> Result<(), MeshError> {
    responses.send(response).map_err(|_| MeshError::WorkerGone)
}

/// Run a worker on the current thread, speaking JSON lines over
/// stdin/stdout. Returns when terminated or when stdin closes.
pub fn serve_stdio<E: MeshEngine>(engine: E) -> Result<(), MeshError> {
    let (request_tx, request_rx) = unbounded();
    let (response_tx, response_rx) = unbounded::<MeshResponse>();

    thread::Builder::new()
        .name("mesh-stdin".into())
        .spawn(move || {
            let stdin = io::stdin();
            transport::pump_reader(stdin.lock(), request_tx);
        })
        .map_err(MeshError::Spawn)?;

    let writer = thread::Builder::new()
        .name("mesh-stdout".into())
        .spawn(move || transport::pump_writer(io::stdout(), response_rx))
        .map_err(MeshError::Spawn)?;

    let result = MeshWorker::new(engine).run(request_rx, response_tx).map(|_| ());
    // The response sender was moved into the worker and is dropped now,
    // which lets the writer flush and exit.
    match writer.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Response writer failed: {}", e),
        Err(_) => warn!("Response writer panicked"),
    }
    result
}

/// Read requests line by line from any reader; used by tests and tools that
/// replay a recorded session.
pub fn replay<R: BufRead, W: Write, E: MeshEngine>(engine: E, input: R, output: W) -> Result<E, MeshError> {
    let (request_tx, request_rx) = unbounded();
    let (response_tx, response_rx) = unbounded();
    transport::pump_reader(input, request_tx);
    let engine = MeshWorker::new(engine).run(request_rx, response_tx)?;
    transport::pump_writer(output, response_rx)?;
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quadtree::QuadtreeEngine;

    fn spec() -> MeshSpec {
        MeshSpec {
            res_x: 12,
            res_y: 8,
            algorithm: 6,
            size_field: "4".into(),
        }
    }

    #[test]
    fn test_parse_inverts_vertical_axis() {
        let mut engine = QuadtreeEngine::new();
        engine.generate(&spec()).unwrap();
        let partition = parse_partition(&engine, 12, 8).unwrap();
        // Row 0 is the top of the engine domain
        assert_eq!(partition.zones()[[0, 0]], engine.element_at(0.0, 8.0).unwrap());
        assert_eq!(partition.zones()[[7, 11]], engine.element_at(11.0, 1.0).unwrap());
    }

    #[test]
    fn test_batch_served_in_priority_order() {
        let (tx, rx) = unbounded();
        let (resp_tx, resp_rx) = unbounded();
        // Parse queued before generate still sees the new mesh
        tx.send(MeshRequest::Parse).unwrap();
        tx.send(MeshRequest::Generate { spec: spec() }).unwrap();
        tx.send(MeshRequest::Terminate).unwrap();

        MeshWorker::new(QuadtreeEngine::new()).run(rx, resp_tx).unwrap();
        match resp_rx.recv().unwrap() {
            MeshResponse::Parsed { result: Ok(p) } => assert_eq!(p.res_x(), 12),
            other => panic!("unexpected {:?}", other),
        }
        assert!(resp_rx.try_recv().is_err());
    }

    #[test]
    fn test_generation_error_reported_on_parse() {
        let (tx, rx) = unbounded();
        let (resp_tx, resp_rx) = unbounded();
        let mut bad = spec();
        bad.size_field = "x +".into();
        tx.send(MeshRequest::Generate { spec: bad }).unwrap();
        tx.send(MeshRequest::Parse).unwrap();
        drop(tx);

        MeshWorker::new(QuadtreeEngine::new()).run(rx, resp_tx).unwrap();
        match resp_rx.recv().unwrap() {
            MeshResponse::Parsed { result: Err(msg) } => assert!(msg.contains("size field")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_replay_session() {
        let input = concat!(
            r#"{"request":"generate","spec":{"res_x":4,"res_y":4,"algorithm":2,"size_field":"1"}}"#,
            "\n",
            r#"{"request":"parse"}"#,
            "\n",
            r#"{"request":"terminate"}"#,
            "\n",
        );
        let mut output = Vec::new();
        replay(QuadtreeEngine::new(), input.as_bytes(), &mut output).unwrap();
        let text = String::from_utf8(output).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with(r#"{"response":"parsed","result":{"Ok":"#));
    }
}
