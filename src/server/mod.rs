//! HTTP front end.
//!
//! A background thread accepts connections on a non-blocking listener and hands each one to
//! its own worker thread, up to `max_open_sockets` at a time. Routes:
//!
//! - `GET /` control page
//! - `GET /jpg` single JPEG snapshot
//! - `GET /stream` multipart MJPEG stream
//! - `GET /flash?onoff=on|off|toggle`
//! - `GET /restart` acknowledges, then emits [`ControlEvent::Restart`] on the handle
//!
//! `/jpg` and `/stream` share one admission gate: while either holds the camera, the other
//! is answered with `503 Busy`.

mod http;

use anyhow::{anyhow, Context, Result};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::{CamstreamConfig, HttpSettings};
use crate::flash::{Flash, FlashCommand};
use crate::frame::FrameLease;
use crate::ingest::{FrameSource, SharedCamera, SourceStats};
use crate::sink::HttpChunkedSink;
use crate::stream::{StreamError, StreamGate, StreamPolicy, StreamSession, Termination};
use crate::telemetry::{MemoryProbe, SystemMemoryProbe};
use http::{read_request, write_busy, write_response, write_text_response, HttpRequest};

const INDEX_HTML: &str = include_str!("index.html");
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Requests the server cannot satisfy itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlEvent {
    /// `/restart` was called; the process should re-execute.
    Restart,
    /// Stop serving and exit.
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: String,
    pub http: HttpSettings,
    pub stream: StreamPolicy,
    pub restart_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:80".to_string(),
            http: HttpSettings::default(),
            stream: StreamPolicy::default(),
            restart_delay: Duration::from_millis(200),
        }
    }
}

impl From<&CamstreamConfig> for ServerConfig {
    fn from(cfg: &CamstreamConfig) -> Self {
        Self {
            addr: cfg.addr.clone(),
            http: cfg.http.clone(),
            stream: cfg.stream.clone(),
            restart_delay: cfg.restart_delay,
        }
    }
}

pub struct CameraServer {
    cfg: ServerConfig,
    camera: SharedCamera,
    flash: Arc<Flash>,
    probe: Arc<dyn MemoryProbe>,
}

struct ServerState {
    http: HttpSettings,
    policy: StreamPolicy,
    restart_delay: Duration,
    camera: SharedCamera,
    flash: Arc<Flash>,
    probe: Arc<dyn MemoryProbe>,
    gate: StreamGate,
    shutdown: AtomicBool,
    open_connections: AtomicUsize,
    control: Mutex<Sender<ControlEvent>>,
}

impl ServerState {
    fn send_control(&self, event: ControlEvent) {
        let sent = self
            .control
            .lock()
            .map_err(|_| anyhow!("control channel lock poisoned"))
            .and_then(|tx| tx.send(event).map_err(|_| anyhow!("control receiver dropped")));
        if let Err(err) = sent {
            log::warn!("control event {:?} not delivered: {}", event, err);
        }
    }
}

impl CameraServer {
    pub fn new(cfg: ServerConfig, camera: SharedCamera, flash: Arc<Flash>) -> Self {
        Self {
            cfg,
            camera,
            flash,
            probe: Arc::new(SystemMemoryProbe),
        }
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid listen address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("failed to bind {}", configured_addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let (control_tx, control_rx) = mpsc::channel();
        let state = Arc::new(ServerState {
            http: self.cfg.http,
            policy: self.cfg.stream,
            restart_delay: self.cfg.restart_delay,
            camera: self.camera,
            flash: self.flash,
            probe: self.probe,
            gate: StreamGate::new(),
            shutdown: AtomicBool::new(false),
            open_connections: AtomicUsize::new(0),
            control: Mutex::new(control_tx.clone()),
        });

        let state_thread = state.clone();
        let join = std::thread::Builder::new()
            .name("camstream-accept".to_string())
            .spawn(move || {
                if let Err(err) = run_server(listener, state_thread) {
                    log::error!("camera server stopped: {:#}", err);
                }
            })
            .context("failed to spawn accept thread")?;

        log::info!("camera server listening on {}", addr);
        Ok(ServerHandle {
            addr,
            state,
            control_tx,
            control_rx,
            join: Some(join),
        })
    }
}

pub struct ServerHandle {
    pub addr: SocketAddr,
    state: Arc<ServerState>,
    control_tx: Sender<ControlEvent>,
    control_rx: Receiver<ControlEvent>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Sender for out-of-band events such as a signal handler's shutdown request.
    pub fn control_sender(&self) -> Sender<ControlEvent> {
        self.control_tx.clone()
    }

    /// Block until the next control event.
    pub fn recv_control(&self) -> Result<ControlEvent> {
        self.control_rx
            .recv()
            .map_err(|_| anyhow!("control channel closed"))
    }

    pub fn recv_control_timeout(&self, timeout: Duration) -> Option<ControlEvent> {
        self.control_rx.recv_timeout(timeout).ok()
    }

    /// True while a stream or snapshot holds the camera.
    pub fn camera_busy(&self) -> bool {
        self.state.gate.is_active()
    }

    /// Counters of the camera behind the server, across every session and snapshot.
    pub fn camera_stats(&self) -> SourceStats {
        self.state.camera.stats()
    }

    pub fn open_connections(&self) -> usize {
        self.state.open_connections.load(Ordering::Acquire)
    }

    /// Stop accepting, end any active stream, and wait briefly for workers to finish.
    pub fn stop(mut self) -> Result<()> {
        self.state.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("camera server thread panicked"))?;
        }
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while self.open_connections() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if self.open_connections() > 0 {
            log::warn!(
                "camera server stopped with {} connection(s) still open",
                self.open_connections()
            );
        }
        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.state.shutdown.store(true, Ordering::SeqCst);
    }
}

/// One occupied connection slot; freed on drop.
struct ConnectionSlot {
    state: Arc<ServerState>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.open_connections.fetch_sub(1, Ordering::AcqRel);
    }
}

fn run_server(listener: TcpListener, state: Arc<ServerState>) -> Result<()> {
    loop {
        if state.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let open = state.open_connections.fetch_add(1, Ordering::AcqRel);
                let slot = ConnectionSlot {
                    state: state.clone(),
                };
                if open >= state.http.max_open_sockets {
                    log::info!("rejecting {}: {} connections open", peer, open);
                    if let Err(err) = reject_connection(stream) {
                        log::debug!("rejection to {} failed: {:#}", peer, err);
                    }
                    drop(slot);
                    continue;
                }
                let spawned = std::thread::Builder::new()
                    .name("camstream-conn".to_string())
                    .spawn(move || {
                        let state = slot.state.clone();
                        if let Err(err) = handle_connection(stream, peer, &state) {
                            log::debug!("request from {} failed: {:#}", peer, err);
                        }
                        drop(slot);
                    });
                if let Err(err) = spawned {
                    log::warn!("failed to spawn connection worker: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn reject_connection(stream: TcpStream) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_millis(100)))?;
    stream.set_write_timeout(Some(Duration::from_millis(100)))?;
    let mut stream = &stream;
    // Drain the request head so the close does not reset the connection.
    let _ = read_request(&mut stream);
    write_text_response(&mut stream, 503, "too many connections")
}

fn handle_connection(stream: TcpStream, peer: SocketAddr, state: &ServerState) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(state.http.recv_timeout))?;
    stream.set_write_timeout(Some(state.http.send_timeout))?;
    let mut writer = &stream;

    let request = read_request(&mut writer)?;
    log::debug!("{} {} from {}", request.method, request.path, peer);
    if request.method != "GET" {
        return write_text_response(&mut writer, 405, "method not allowed");
    }
    match request.path.as_str() {
        "/" => write_response(&mut writer, 200, "text/html", INDEX_HTML.as_bytes()),
        "/jpg" => handle_snapshot(&stream, peer, state),
        "/stream" => handle_stream(&stream, peer, state),
        "/flash" => handle_flash(&stream, &request, state),
        "/restart" => handle_restart(&stream, peer, state),
        _ => write_text_response(&mut writer, 404, "not found"),
    }
}

/// A snapshot is admitted through the same gate as a stream, so the camera is only ever
/// driven by one admitted user with one frame in flight.
fn handle_snapshot(mut stream: &TcpStream, peer: SocketAddr, state: &ServerState) -> Result<()> {
    let _admission = match state.gate.try_admit() {
        Ok(admission) => admission,
        Err(StreamError::Busy) => {
            log::info!("snapshot request from {} rejected: busy", peer);
            return write_busy(&mut stream);
        }
    };
    let mut camera = state.camera.clone();
    let lease = match FrameLease::acquire(&mut camera) {
        Ok(lease) => lease,
        Err(err) => {
            log::warn!("snapshot: {}", err);
            return write_text_response(&mut stream, 500, "capture failed");
        }
    };
    write_response(&mut stream, 200, "image/jpeg", lease.as_bytes())
}

fn handle_stream(mut stream: &TcpStream, peer: SocketAddr, state: &ServerState) -> Result<()> {
    let mut camera = state.camera.clone();
    let mut sink = HttpChunkedSink::new(stream);
    let session = match StreamSession::begin(&state.gate, &mut camera, &mut sink, &state.policy) {
        Ok(session) => session,
        Err(StreamError::Busy) => {
            log::info!("stream request from {} rejected: busy", peer);
            return write_busy(&mut stream);
        }
    };
    log::info!("streaming to {}", peer);
    let report = session
        .with_memory_probe(state.probe.as_ref())
        .with_stop_flag(&state.shutdown)
        .run();
    if report.termination == Termination::Shutdown {
        sink.finish()?;
    }
    let stats = state.camera.stats();
    log::info!(
        "stream to {} finished after {} frames ({} bytes); camera {}: {} captured, {} failed, {} reconfigured",
        peer,
        report.frames_sent,
        sink.bytes_sent(),
        stats.source,
        stats.frames_captured,
        stats.acquire_failures,
        stats.reconfigurations
    );
    Ok(())
}

fn handle_flash(mut stream: &TcpStream, request: &HttpRequest, state: &ServerState) -> Result<()> {
    let command = FlashCommand::from_query(request.query.as_deref());
    match state.flash.apply(command) {
        Ok(on) => write_text_response(&mut stream, 200, if on { "flash:on" } else { "flash:off" }),
        Err(err) => {
            log::warn!("flash {:?} failed: {:#}", command, err);
            write_text_response(&mut stream, 500, "flash unavailable")
        }
    }
}

fn handle_restart(mut stream: &TcpStream, peer: SocketAddr, state: &ServerState) -> Result<()> {
    write_text_response(&mut stream, 200, "restarting...")?;
    log::warn!("restart requested by {}", peer);
    std::thread::sleep(state.restart_delay);
    state.send_control(ControlEvent::Restart);
    Ok(())
}
