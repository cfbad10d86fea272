//! Client side of the mesh protocol.
//!
//! A [`MeshCoordinator`] owns one meshing worker, either on a thread of this
//! process or as a child process speaking JSON lines. Fire-and-forget
//! requests return as soon as they are queued; parse, save and load block
//! until the worker answers. Round trips take `&mut self`, so only one can be
//! outstanding at a time.

use std::ffi::OsStr;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use holo_core::types::ZonePartition;
use log::{debug, info, warn};

use crate::engine::MeshEngine;
use crate::protocol::{algorithm_code, MeshRequest, MeshResponse, MeshSpec};
use crate::transport;
use crate::worker::MeshWorker;
use crate::MeshError;

enum Worker {
    Thread(JoinHandle<()>),
    Process(Child),
}

/// Can terminate the worker from another thread while the coordinator is
/// busy elsewhere.
#[derive(Clone)]
pub struct TerminateHandle {
    requests: Sender<MeshRequest>,
    terminated: Arc<AtomicBool>,
}

impl TerminateHandle {
    /// Ask the worker to shut down. Safe to call any number of times.
    pub fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            // A send error means the worker is already gone.
            let _ = self.requests.send(MeshRequest::Terminate);
        }
    }
}

pub struct MeshCoordinator {
    requests: Sender<MeshRequest>,
    responses: Receiver<MeshResponse>,
    terminated: Arc<AtomicBool>,
    window_closed: bool,
    worker: Option<Worker>,
}

impl MeshCoordinator {
    fn with_channels(requests: Sender<MeshRequest>, responses: Receiver<MeshResponse>, worker: Worker) -> Self {
        Self {
            requests,
            responses,
            terminated: Arc::new(AtomicBool::new(false)),
            window_closed: false,
            worker: Some(worker),
        }
    }

    /// Run `engine` on a dedicated worker thread.
    pub fn spawn_thread<E>(engine: E) -> Result<Self, MeshError>
    where
        E: MeshEngine + Send + 'static,
    {
        let (request_tx, request_rx) = unbounded();
        let (response_tx, response_rx) = unbounded();
        let handle = thread::Builder::new()
            .name("mesh-worker".into())
            .spawn(move || {
                if let Err(e) = MeshWorker::new(engine).run(request_rx, response_tx) {
                    warn!("Meshing worker stopped: {}", e);
                }
            })
            .map_err(MeshError::Spawn)?;
        info!("Started meshing worker thread");
        Ok(Self::with_channels(request_tx, response_rx, Worker::Thread(handle)))
    }

    /// Start `program args...` as the worker process. The child must serve
    /// the JSON-lines protocol on stdin/stdout.
    pub fn spawn_process<S: AsRef<OsStr>>(program: impl AsRef<OsStr>, args: &[S]) -> Result<Self, MeshError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(MeshError::Spawn)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MeshError::Spawn(io::Error::other("worker stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MeshError::Spawn(io::Error::other("worker stdout not captured")))?;

        let (request_tx, request_rx) = unbounded::<MeshRequest>();
        let (response_tx, response_rx) = unbounded::<MeshResponse>();
        thread::Builder::new()
            .name("mesh-requests".into())
            .spawn(move || {
                if let Err(e) = transport::pump_writer(stdin, request_rx) {
                    debug!("Request pump ended: {}", e);
                }
            })
            .map_err(MeshError::Spawn)?;
        thread::Builder::new()
            .name("mesh-responses".into())
            .spawn(move || transport::pump_reader(BufReader::new(stdout), response_tx))
            .map_err(MeshError::Spawn)?;

        info!("Started meshing worker process (pid {})", child.id());
        Ok(Self::with_channels(request_tx, response_rx, Worker::Process(child)))
    }

    pub fn terminate_handle(&self) -> TerminateHandle {
        TerminateHandle {
            requests: self.requests.clone(),
            terminated: Arc::clone(&self.terminated),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    fn send(&self, request: MeshRequest) -> Result<(), MeshError> {
        if self.is_terminated() {
            return Err(MeshError::WorkerGone);
        }
        self.requests.send(request).map_err(|_| MeshError::WorkerGone)
    }

    /// Wait for the next solicited response, recording window notifications
    /// on the way.
    fn receive(&mut self) -> Result<MeshResponse, MeshError> {
        loop {
            match self.responses.recv().map_err(|_| MeshError::WorkerGone)? {
                MeshResponse::WindowClosed => self.window_closed = true,
                response => return Ok(response),
            }
        }
    }

    /// Queue a mesh generation. Does not wait for the mesh to be built.
    pub fn generate_mesh(&mut self, spec: MeshSpec) -> Result<(), MeshError> {
        if algorithm_code(spec.algorithm).is_none() {
            return Err(MeshError::UnknownAlgorithm(spec.algorithm));
        }
        debug!("Requesting mesh {}x{} ({:?})", spec.res_x, spec.res_y, spec.size_field);
        self.send(MeshRequest::Generate { spec })
    }

    /// Turn the current mesh into a zone partition. Blocks until the worker
    /// answers.
    pub fn parse_mesh(&mut self) -> Result<ZonePartition, MeshError> {
        self.send(MeshRequest::Parse)?;
        match self.receive()? {
            MeshResponse::Parsed { result } => result.map_err(MeshError::Engine),
            other => Err(MeshError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Save the engine model. `Ok(false)` when the engine could not write it.
    pub fn save_mesh(&mut self, path: impl Into<PathBuf>) -> Result<bool, MeshError> {
        self.send(MeshRequest::Save { path: path.into() })?;
        match self.receive()? {
            MeshResponse::Saved { ok } => Ok(ok),
            other => Err(MeshError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Replace the engine model with the one in `path`. `spec` describes the
    /// SLM surface the stored mesh covers.
    pub fn load_mesh(&mut self, path: impl Into<PathBuf>, spec: MeshSpec) -> Result<bool, MeshError> {
        self.send(MeshRequest::Load { path: path.into(), spec })?;
        match self.receive()? {
            MeshResponse::Loaded { ok } => Ok(ok),
            other => Err(MeshError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    pub fn show_window(&mut self) -> Result<(), MeshError> {
        self.window_closed = false;
        self.send(MeshRequest::ShowWindow)
    }

    pub fn close_window(&mut self) -> Result<(), MeshError> {
        self.send(MeshRequest::CloseWindow)
    }

    /// Whether the worker reported the visualisation window gone since the
    /// last [`show_window`](Self::show_window). Never blocks.
    pub fn window_closed(&mut self) -> bool {
        while let Ok(response) = self.responses.try_recv() {
            match response {
                MeshResponse::WindowClosed => self.window_closed = true,
                other => warn!("Dropping unsolicited response {:?}", other),
            }
        }
        self.window_closed
    }

    /// Shut the worker down and wait for it to exit. Idempotent.
    pub fn terminate(&mut self) -> Result<(), MeshError> {
        self.terminate_handle().terminate();
        match self.worker.take() {
            Some(Worker::Thread(handle)) => {
                if handle.join().is_err() {
                    warn!("Meshing worker thread panicked");
                }
            }
            Some(Worker::Process(mut child)) => {
                let status = child.wait()?;
                debug!("Meshing worker process exited with {}", status);
            }
            None => return Ok(()),
        }
        info!("Meshing worker terminated");
        Ok(())
    }
}

impl Drop for MeshCoordinator {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            warn!("Failed to terminate meshing worker: {}", e);
        }
    }
}
