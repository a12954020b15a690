use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Parser;
use sepsis_scenario::protocol::{
    read_message, write_message, EngineRequest, EngineResponse, RequestEnvelope,
    ResponseEnvelope,
};
use sepsis_scenario::telemetry::DataRequestSet;
use sepsis_scenario::Action;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "127.0.0.1:0")]
    bind_addr: SocketAddr,

    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Announce this address instead of listening, then idle until killed.
    #[arg(long)]
    announce: Option<SocketAddr>,

    /// Write the process id here before announcing.
    #[arg(long)]
    pid_file: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    if let Some(path) = &args.pid_file {
        std::fs::write(path, std::process::id().to_string())?;
    }
    if let Some(addr) = args.announce {
        println!("listening on {addr}");
        thread::sleep(Duration::from_secs(120));
        return Ok(());
    }

    let listener = TcpListener::bind(args.bind_addr)?;
    let addr = listener.local_addr()?;
    println!("listening on {addr}");

    let (mut stream, _) = listener.accept()?;
    let mut engine = FakeEngine::new(args.log_file.as_ref())?;

    loop {
        let envelope: RequestEnvelope = match read_message(&mut stream) {
            Ok(envelope) => envelope,
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err.into()),
        };
        let shutdown = envelope.payload == EngineRequest::Shutdown;
        let response = ResponseEnvelope {
            id: envelope.id,
            payload: engine.handle(envelope.payload),
        };
        write_message(&mut stream, &response)?;
        if shutdown {
            break;
        }
    }

    engine.finish()?;
    Ok(())
}

struct ResultsFile {
    writer: BufWriter<File>,
    columns: usize,
    period_s: f64,
    next_sample_s: f64,
}

/// Clock-only engine: accepts actions, advances time and writes a results
/// file with one row per sample period.
struct FakeEngine {
    loaded: bool,
    clock_s: f64,
    infusion_rate: f64,
    results: Option<ResultsFile>,
    log: Option<BufWriter<File>>,
}

impl FakeEngine {
    fn new(log_file: Option<&PathBuf>) -> std::io::Result<Self> {
        let log = match log_file {
            Some(path) => Some(BufWriter::new(
                OpenOptions::new().create(true).append(true).open(path)?,
            )),
            None => None,
        };
        Ok(Self {
            loaded: false,
            clock_s: 0.0,
            infusion_rate: 0.0,
            results: None,
            log,
        })
    }

    fn handle(&mut self, request: EngineRequest) -> EngineResponse {
        let outcome = match request {
            EngineRequest::LoadState { path } => {
                if path.is_file() {
                    self.loaded = true;
                    self.clock_s = 0.0;
                    self.log(&format!("loaded state {}", path.display()));
                    Ok(EngineResponse::Ok)
                } else {
                    Err(format!("state file {} not found", path.display()))
                }
            }
            EngineRequest::RegisterDataRequests { requests } => self
                .open_results(&requests)
                .map(|()| EngineResponse::Ok)
                .map_err(|err| format!("cannot open {}: {err}", requests.results_filename)),
            EngineRequest::ProcessAction { action } => self.process(action),
            EngineRequest::AdvanceTime { seconds } => self.advance(seconds),
            EngineRequest::SimulationTime => Ok(EngineResponse::Time {
                seconds: self.clock_s,
            }),
            EngineRequest::Shutdown => {
                self.log("shutdown requested");
                Ok(EngineResponse::Ok)
            }
        };

        outcome.unwrap_or_else(|message| {
            self.log(&format!("error: {message}"));
            EngineResponse::Error { message }
        })
    }

    fn open_results(&mut self, requests: &DataRequestSet) -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(&requests.results_filename)?);
        writeln!(writer, "{}", requests.csv_header())?;
        self.results = Some(ResultsFile {
            writer,
            columns: requests.requests.len(),
            period_s: 1.0 / requests.samples_per_second,
            next_sample_s: self.clock_s,
        });
        Ok(())
    }

    fn process(&mut self, action: Action) -> Result<EngineResponse, String> {
        if !self.loaded {
            return Err("no patient state loaded".to_string());
        }
        if let Action::SubstanceCompoundInfusion(infusion) = &action {
            self.infusion_rate = infusion.rate_ml_per_min;
        }
        self.log(&format!("{:.3}s action {}", self.clock_s, action.name()));
        Ok(EngineResponse::Ok)
    }

    fn advance(&mut self, seconds: f64) -> Result<EngineResponse, String> {
        if !self.loaded {
            return Err("no patient state loaded".to_string());
        }
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(format!("cannot advance by {seconds}s"));
        }
        self.clock_s += seconds;

        if let Some(results) = self.results.as_mut() {
            while results.next_sample_s <= self.clock_s {
                let mut row = format!("{:.1}", results.next_sample_s);
                for _ in 0..results.columns {
                    row.push_str(&format!(",{:.3}", self.infusion_rate));
                }
                writeln!(results.writer, "{row}").map_err(|err| err.to_string())?;
                results.next_sample_s += results.period_s;
            }
        }
        Ok(EngineResponse::Ok)
    }

    fn log(&mut self, line: &str) {
        if let Some(log) = self.log.as_mut() {
            let _ = writeln!(log, "[INFO] {line}");
        }
    }

    fn finish(&mut self) -> std::io::Result<()> {
        if let Some(results) = self.results.as_mut() {
            results.writer.flush()?;
        }
        if let Some(log) = self.log.as_mut() {
            log.flush()?;
        }
        Ok(())
    }
}
