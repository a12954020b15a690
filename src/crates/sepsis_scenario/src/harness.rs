use std::io::{self, BufRead, BufReader};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::actions::Action;
use crate::config::EngineConfig;
use crate::engine::PhysiologyEngine;
use crate::error::{DriverError, DriverResult};
use crate::protocol::{
    read_message, write_message, EngineRequest, EngineResponse, RequestEnvelope,
    ResponseEnvelope,
};
use crate::telemetry::DataRequestSet;
use crate::units::{seconds, to_seconds};

/// Origin stream for captured log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Single captured log line with its source.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub stream: LogStream,
    pub line: String,
}

/// Handle to a running engine process with an open request connection.
pub struct EngineHarness {
    child: Child,
    stream: Option<TcpStream>,
    log_buffer: Arc<Mutex<Vec<LogLine>>>,
    log_collector: Option<thread::JoinHandle<()>>,
    next_id: u64,
    shutdown_timeout: Duration,
}

impl EngineHarness {
    /// Spawn the engine process and connect to the address it announces.
    pub fn spawn(config: EngineConfig) -> DriverResult<Self> {
        let mut cmd = Command::new(&config.binary_path);
        let mut args = config.extra_args.clone();
        if let Some(path) = &config.log_file {
            args.push("--log-file".to_string());
            args.push(path.display().to_string());
        }
        let has_bind_arg = args
            .iter()
            .any(|arg| arg == "--bind-addr" || arg.starts_with("--bind-addr="));
        if !has_bind_arg {
            args.push("--bind-addr".to_string());
            args.push("127.0.0.1:0".to_string());
        }
        cmd.args(args);

        if let Some(dir) = &config.working_directory {
            cmd.current_dir(dir);
        }
        cmd.envs(&config.env);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|err| DriverError::engine_start(err.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DriverError::engine_start("failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DriverError::engine_start("failed to capture stderr"))?;

        let (log_tx, log_rx) = mpsc::channel();
        spawn_log_reader(stdout, LogStream::Stdout, log_tx.clone());
        spawn_log_reader(stderr, LogStream::Stderr, log_tx);

        let log_buffer = Arc::new(Mutex::new(Vec::new()));
        let address =
            match wait_for_listen_address(&mut child, &log_rx, &log_buffer, config.startup_timeout)
            {
                Ok(address) => address,
                Err(err) => {
                    reap(&mut child);
                    return Err(err);
                }
            };
        let log_collector = spawn_log_collector(log_rx, log_buffer.clone());
        debug!(%address, binary = %config.binary_path.display(), "engine listening");

        let stream = match connect(address) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%address, %err, "could not connect to engine; killing it");
                reap(&mut child);
                return Err(err.into());
            }
        };

        Ok(Self {
            child,
            stream: Some(stream),
            log_buffer,
            log_collector: Some(log_collector),
            next_id: 1,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    /// Return all captured stdout/stderr lines of the engine process.
    pub fn all_logs(&self) -> Vec<LogLine> {
        self.log_buffer
            .lock()
            .map(|buffer| buffer.clone())
            .unwrap_or_default()
    }

    /// Request a graceful shutdown and wait for the engine process to exit.
    pub fn shutdown(mut self) -> DriverResult<()> {
        self.request_shutdown()
    }

    fn send(&mut self, request: EngineRequest) -> DriverResult<EngineResponse> {
        let id = self.next_id;
        self.next_id += 1;
        let name = request.name();

        let stream = self.stream.as_mut().ok_or(DriverError::ConnectionClosed)?;
        let envelope = RequestEnvelope {
            id,
            payload: request,
        };
        let exchange = write_message(stream, &envelope)
            .and_then(|()| read_message::<_, ResponseEnvelope>(stream));

        let response = match exchange {
            Ok(response) => response,
            Err(err) => return Err(self.connection_failure(err)),
        };
        if response.id != id {
            return Err(DriverError::unexpected(format!(
                "{name} response carried id {} but {id} was sent",
                response.id
            )));
        }
        Ok(response.payload)
    }

    fn expect_ok(&mut self, request: EngineRequest) -> DriverResult<()> {
        let name = request.name();
        match self.send(request)? {
            EngineResponse::Ok => Ok(()),
            EngineResponse::Error { message } => Err(DriverError::rejected(name, message)),
            other => Err(DriverError::unexpected(format!(
                "{name} returned unexpected response: {other:?}"
            ))),
        }
    }

    fn connection_failure(&mut self, err: io::Error) -> DriverError {
        self.stream.take();
        match self.child.try_wait() {
            Ok(Some(status)) => DriverError::EngineExited(status),
            _ if err.kind() == io::ErrorKind::UnexpectedEof => DriverError::ConnectionClosed,
            _ => DriverError::Io(err),
        }
    }

    fn request_shutdown(&mut self) -> DriverResult<()> {
        if self.stream.is_some() {
            let _ = self.send(EngineRequest::Shutdown);
        }
        self.stream.take();
        let start = Instant::now();
        while start.elapsed() < self.shutdown_timeout {
            if self.child.try_wait()?.is_some() {
                self.join_workers();
                return Ok(());
            }
            thread::sleep(Duration::from_millis(10));
        }

        // Force terminate if graceful shutdown did not complete.
        warn!("engine did not exit after shutdown request; killing it");
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.join_workers();
        Ok(())
    }

    fn join_workers(&mut self) {
        if let Some(handle) = self.log_collector.take() {
            let _ = handle.join();
        }
    }
}

impl PhysiologyEngine for EngineHarness {
    fn load_state(&mut self, path: &Path) -> DriverResult<()> {
        let request = EngineRequest::LoadState {
            path: path.to_path_buf(),
        };
        match self.send(request)? {
            EngineResponse::Ok => Ok(()),
            EngineResponse::Error { message } => Err(DriverError::StateLoad {
                path: path.to_path_buf(),
                message,
            }),
            other => Err(DriverError::unexpected(format!(
                "load_state returned unexpected response: {other:?}"
            ))),
        }
    }

    fn register_data_requests(&mut self, requests: &DataRequestSet) -> DriverResult<()> {
        self.expect_ok(EngineRequest::RegisterDataRequests {
            requests: requests.clone(),
        })
    }

    fn process_action(&mut self, action: &Action) -> DriverResult<()> {
        self.expect_ok(EngineRequest::ProcessAction {
            action: action.clone(),
        })
    }

    fn advance_time(&mut self, minutes: f64) -> DriverResult<()> {
        self.expect_ok(EngineRequest::AdvanceTime {
            seconds: to_seconds(minutes),
        })
    }

    fn simulation_time(&mut self) -> DriverResult<f64> {
        match self.send(EngineRequest::SimulationTime)? {
            EngineResponse::Time { seconds: value } => Ok(seconds(value)),
            EngineResponse::Error { message } => {
                Err(DriverError::rejected("simulation_time", message))
            }
            other => Err(DriverError::unexpected(format!(
                "simulation_time returned unexpected response: {other:?}"
            ))),
        }
    }
}

impl Drop for EngineHarness {
    fn drop(&mut self) {
        if self.log_collector.is_some() {
            let _ = self.request_shutdown();
        }
    }
}

fn connect(address: SocketAddr) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(address)?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Kill a child that never became usable and collect its exit status.
fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_log_reader<R: io::Read + Send + 'static>(
    reader: R,
    stream: LogStream,
    tx: mpsc::Sender<LogLine>,
) {
    thread::spawn(move || {
        let buf_reader = BufReader::new(reader);
        for line in buf_reader.lines().map_while(Result::ok) {
            let _ = tx.send(LogLine {
                stream,
                line: line.trim().to_string(),
            });
        }
    });
}

fn wait_for_listen_address(
    child: &mut Child,
    log_rx: &mpsc::Receiver<LogLine>,
    log_buffer: &Arc<Mutex<Vec<LogLine>>>,
    timeout: Duration,
) -> DriverResult<SocketAddr> {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if let Some(status) = child.try_wait()? {
            return Err(DriverError::EngineExited(status));
        }

        match log_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(line) => {
                if let Ok(mut buffer) = log_buffer.lock() {
                    buffer.push(line.clone());
                }
                if let Some(addr) = parse_listen_line(&line.line) {
                    return Ok(addr);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    Err(DriverError::StartupTimeout(timeout))
}

fn parse_listen_line(line: &str) -> Option<SocketAddr> {
    let needle = "listening on";
    let lower = line.to_ascii_lowercase();
    let idx = lower.find(needle)?;
    let after = line[idx + needle.len()..].trim();
    after.parse().ok()
}

fn spawn_log_collector(
    log_rx: mpsc::Receiver<LogLine>,
    buffer: Arc<Mutex<Vec<LogLine>>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Ok(line) = log_rx.recv() {
            if let Ok(mut guard) = buffer.lock() {
                guard.push(line);
            }
        }
    })
}
