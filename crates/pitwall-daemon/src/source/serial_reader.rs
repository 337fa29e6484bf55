//! Serial modem reader task.
//!
//! The port is exclusively owned by one background task; everything the
//! rest of the server needs (state, counters, the latest decoded channels)
//! is published through shared atomics and short locks so status reads
//! never block the reader. Configuration changes and restarts arrive over
//! a control channel; the task closes and reopens the port itself.
//!
//! Port I/O is synchronous (`serialport`), driven through
//! `spawn_blocking` with a short read timeout so the task stays responsive
//! to control and shutdown signals.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use pitwall_core::serial::{
    detect_format, parse_csv_line, ModemState, MotecDecoder, SerialConfig, SerialFormat,
    AUTO_DETECT_PEEK,
};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::store::now_ms;

/// Cap on the blocking read so control messages are handled promptly.
const READ_SLICE_TIMEOUT: Duration = Duration::from_millis(250);

/// Commands accepted by the reader task.
#[derive(Debug)]
pub enum SerialCommand {
    /// Close and reopen the port (also applies a new config).
    Restart,
}

/// Snapshot of the reader for `/telemetry/source`.
#[derive(Debug, Clone, Serialize)]
pub struct SerialStatus {
    pub state: ModemState,
    pub port: String,
    pub baud_rate: u32,
    pub format: SerialFormat,
    /// UNIX seconds of the last decoded frame; 0.0 before the first.
    pub last_frame_time: f64,
    pub frames_received: u64,
    pub errors: u64,
    /// Whether the link reached `connected` at least once this uptime.
    pub ever_connected: bool,
    /// Whether a port is configured at all.
    pub available: bool,
}

#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    config: RwLock<SerialConfig>,
    latest: Mutex<BTreeMap<String, f64>>,
    last_frame_ms: AtomicI64,
    frames_received: AtomicU64,
    errors: AtomicU64,
    ever_connected: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: ModemState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn state(&self) -> ModemState {
        match self.state.load(Ordering::Acquire) {
            x if x == ModemState::Connecting as u8 => ModemState::Connecting,
            x if x == ModemState::Connected as u8 => ModemState::Connected,
            x if x == ModemState::Error as u8 => ModemState::Error,
            _ => ModemState::Disconnected,
        }
    }

    fn emit(&self, channels: BTreeMap<String, f64>) {
        if channels.is_empty() {
            return;
        }
        self.last_frame_ms.store(now_ms(), Ordering::Release);
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        let mut latest = self.latest.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        latest.extend(channels);
    }
}

/// Handle to the reader task.
#[derive(Debug, Clone)]
pub struct SerialTelemetry {
    shared: Arc<Shared>,
    ctrl: mpsc::Sender<SerialCommand>,
}

impl SerialTelemetry {
    /// Creates the handle and spawns the reader task.
    #[must_use]
    pub fn spawn(config: SerialConfig, shutdown: watch::Receiver<bool>) -> Self {
        let shared = Arc::new(Shared {
            state: AtomicU8::new(ModemState::Disconnected as u8),
            config: RwLock::new(config),
            latest: Mutex::new(BTreeMap::new()),
            last_frame_ms: AtomicI64::new(0),
            frames_received: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            ever_connected: AtomicBool::new(false),
        });
        let (ctrl_tx, ctrl_rx) = mpsc::channel(8);
        tokio::spawn(run_reader(Arc::clone(&shared), ctrl_rx, shutdown));
        Self {
            shared,
            ctrl: ctrl_tx,
        }
    }

    #[must_use]
    pub fn state(&self) -> ModemState {
        self.shared.state()
    }

    #[must_use]
    pub fn config(&self) -> SerialConfig {
        self.shared
            .config
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Replaces the configuration; takes effect on the next restart.
    pub fn set_config(&self, config: SerialConfig) {
        *self
            .shared
            .config
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = config;
    }

    /// Asks the task to close and reopen the port.
    pub async fn restart(&self) {
        let _ = self.ctrl.send(SerialCommand::Restart).await;
    }

    /// The most recent value of every channel decoded so far.
    #[must_use]
    pub fn latest_channels(&self) -> BTreeMap<String, f64> {
        self.shared
            .latest
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// UNIX milliseconds of the last decoded frame (0 before the first).
    #[must_use]
    pub fn last_frame_ms(&self) -> i64 {
        self.shared.last_frame_ms.load(Ordering::Acquire)
    }

    /// Whether the link is connected and produced a frame within
    /// `window_ms`.
    #[must_use]
    pub fn is_fresh(&self, now_ms: i64, window_ms: i64) -> bool {
        self.state() == ModemState::Connected
            && self.last_frame_ms() > 0
            && now_ms.saturating_sub(self.last_frame_ms()) <= window_ms
    }

    #[must_use]
    pub fn status(&self) -> SerialStatus {
        let config = self.config();
        SerialStatus {
            state: self.state(),
            available: !config.port.is_empty(),
            last_frame_time: self.last_frame_ms() as f64 / 1000.0,
            frames_received: self.shared.frames_received.load(Ordering::Relaxed),
            errors: self.shared.errors.load(Ordering::Relaxed),
            ever_connected: self.shared.ever_connected.load(Ordering::Acquire),
            format: config.data_format,
            baud_rate: config.baud_rate,
            port: config.port,
        }
    }
}

enum SessionEnd {
    Shutdown,
    Restart,
    Fault,
    NoPort,
}

async fn run_reader(
    shared: Arc<Shared>,
    mut ctrl: mpsc::Receiver<SerialCommand>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let config = shared
            .config
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();

        let end = if config.port.is_empty() {
            shared.set_state(ModemState::Disconnected);
            idle_wait(&mut ctrl, &mut shutdown, Duration::from_secs(1)).await
        } else {
            read_session(&shared, &config, &mut ctrl, &mut shutdown).await
        };

        match end {
            SessionEnd::Shutdown => break,
            SessionEnd::Restart => {
                info!("serial reader restarting");
            }
            SessionEnd::Fault => {
                let wait = Duration::from_secs_f64(config.reconnect_interval);
                if matches!(
                    idle_wait(&mut ctrl, &mut shutdown, wait).await,
                    SessionEnd::Shutdown
                ) {
                    break;
                }
            }
            SessionEnd::NoPort => {}
        }
    }
    shared.set_state(ModemState::Disconnected);
    info!("serial reader stopped");
}

/// Waits out a delay while still honoring restarts and shutdown.
async fn idle_wait(
    ctrl: &mut mpsc::Receiver<SerialCommand>,
    shutdown: &mut watch::Receiver<bool>,
    wait: Duration,
) -> SessionEnd {
    tokio::select! {
        _ = tokio::time::sleep(wait) => SessionEnd::NoPort,
        cmd = ctrl.recv() => match cmd {
            Some(SerialCommand::Restart) => SessionEnd::Restart,
            None => SessionEnd::Shutdown,
        },
        _ = shutdown.changed() => SessionEnd::Shutdown,
    }
}

/// Opens the port and pumps it until a fault, restart, or shutdown.
async fn read_session(
    shared: &Arc<Shared>,
    config: &SerialConfig,
    ctrl: &mut mpsc::Receiver<SerialCommand>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    shared.set_state(ModemState::Connecting);
    let port_name = config.port.clone();
    let baud = config.baud_rate;
    let opened = tokio::task::spawn_blocking(move || {
        serialport::new(port_name.as_str(), baud)
            .timeout(READ_SLICE_TIMEOUT)
            .open()
    })
    .await;

    let mut port = match opened {
        Ok(Ok(port)) => port,
        Ok(Err(e)) => {
            shared.set_state(ModemState::Error);
            shared.errors.fetch_add(1, Ordering::Relaxed);
            warn!(port = %config.port, error = %e, "failed to open serial port");
            return SessionEnd::Fault;
        }
        Err(e) => {
            shared.set_state(ModemState::Error);
            warn!(error = %e, "serial open task failed");
            return SessionEnd::Fault;
        }
    };
    info!(port = %config.port, baud = config.baud_rate, "serial port opened");

    let mut format = config.data_format;
    let mut peek: Vec<u8> = Vec::new();
    let mut line_buf: Vec<u8> = Vec::new();
    let mut motec = MotecDecoder::new();
    let timeout_ms = (config.timeout * 1000.0) as i64;
    let mut last_data_ms = now_ms();

    loop {
        // Control and shutdown take priority over the next read slice.
        tokio::select! {
            biased;
            cmd = ctrl.recv() => {
                shared.set_state(ModemState::Disconnected);
                return match cmd {
                    Some(SerialCommand::Restart) => SessionEnd::Restart,
                    None => SessionEnd::Shutdown,
                };
            }
            _ = shutdown.changed() => {
                shared.set_state(ModemState::Disconnected);
                return SessionEnd::Shutdown;
            }
            read = tokio::task::spawn_blocking(move || {
                let mut buf = [0u8; 512];
                let result = port.read(&mut buf);
                (port, result, buf)
            }) => {
                let (returned_port, result, buf) = match read {
                    Ok(tuple) => tuple,
                    Err(e) => {
                        shared.set_state(ModemState::Error);
                        warn!(error = %e, "serial read task failed");
                        return SessionEnd::Fault;
                    }
                };
                port = returned_port;
                match result {
                    Ok(0) => {
                        // EOF: the far end closed the line.
                        shared.set_state(ModemState::Error);
                        shared.errors.fetch_add(1, Ordering::Relaxed);
                        warn!(port = %config.port, "serial EOF");
                        return SessionEnd::Fault;
                    }
                    Ok(n) => {
                        if shared.state() != ModemState::Connected {
                            shared.set_state(ModemState::Connected);
                            shared.ever_connected.store(true, Ordering::Release);
                        }
                        last_data_ms = now_ms();
                        let data = &buf[..n];
                        if format == SerialFormat::Auto {
                            peek.extend_from_slice(data);
                            if peek.len() >= AUTO_DETECT_PEEK || peek.contains(&b'\n') {
                                format = detect_format(&peek);
                                info!(format = format.as_str(), "serial format detected");
                                consume(shared, config, format, &peek, &mut line_buf, &mut motec);
                                peek.clear();
                            }
                        } else {
                            consume(shared, config, format, data, &mut line_buf, &mut motec);
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                        if now_ms().saturating_sub(last_data_ms) > timeout_ms {
                            shared.set_state(ModemState::Error);
                            shared.errors.fetch_add(1, Ordering::Relaxed);
                            warn!(port = %config.port, "serial timeout");
                            return SessionEnd::Fault;
                        }
                    }
                    Err(e) => {
                        shared.set_state(ModemState::Error);
                        shared.errors.fetch_add(1, Ordering::Relaxed);
                        warn!(port = %config.port, error = %e, "serial read error");
                        return SessionEnd::Fault;
                    }
                }
            }
        }
    }
}

/// Feeds raw bytes to the decoder for the active format.
fn consume(
    shared: &Shared,
    config: &SerialConfig,
    format: SerialFormat,
    data: &[u8],
    line_buf: &mut Vec<u8>,
    motec: &mut MotecDecoder,
) {
    match format {
        SerialFormat::MotecBinary => {
            let (channels, errors) = motec.push(data);
            if errors > 0 {
                shared.errors.fetch_add(errors, Ordering::Relaxed);
            }
            shared.emit(channels);
        }
        SerialFormat::Csv | SerialFormat::Auto => {
            line_buf.extend_from_slice(data);
            while let Some(pos) = line_buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = line_buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let channels = parse_csv_line(
                    &line,
                    &config.csv_channel_order,
                    &config.csv_separator,
                );
                shared.emit(channels);
            }
        }
    }
}
