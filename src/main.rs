use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use log::{debug, info};
use tokio_serial::{DataBits, FlowControl, Parity, SerialStream, StopBits};

use rconsole::config::{DEFAULT_BAUD_RATE, DEFAULT_DEVICE_FILE, ProvisionConfig};
use rconsole::error::ConsoleError;
use rconsole::session::{
    ConfigScript, ConsoleSession, Operator, ProvisionOutcome, ProvisionReport, ResponseLog,
    SessionRecordLevel, SessionRecorder, provision_session,
};

/// Send a local config to a device over a serial/console connection.
#[derive(Parser, Debug)]
#[command(name = "rconsole", version, about)]
struct Args {
    /// Path to the config file for the device (router/switch)
    input_file: PathBuf,

    /// Path to the console device file [default: ~/ttyCisco]
    #[arg(long)]
    device_file: Option<PathBuf>,

    /// Delay between sending config lines, in seconds
    #[arg(long)]
    delay: Option<f64>,

    /// Serial line speed
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Unclassified prompts tolerated before giving up
    #[arg(long)]
    max_retries: Option<usize>,

    /// Seconds to wait for a prompt before probing
    #[arg(long)]
    wait_interval: Option<f64>,

    /// JSON file with provisioning settings; flags override it
    #[arg(long, value_name = "FILE.json")]
    settings: Option<PathBuf>,

    /// Answer yes to every confirmation
    #[arg(short, long)]
    yes: bool,

    /// Save running-config to startup-config without asking
    #[arg(long)]
    save: bool,

    /// Write a JSONL recording of the session
    #[arg(long, value_name = "FILE.jsonl")]
    record: Option<PathBuf>,

    /// Save the device responses to this file without asking
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// Operator backed by the controlling terminal.
struct TerminalOperator {
    assume_yes: bool,
}

impl TerminalOperator {
    /// Blocks on stdin. The line reader keeps draining the console on the
    /// other runtime workers, so this needs the multi-thread runtime.
    fn ask(&self, prompt: &str) -> Result<String, ConsoleError> {
        print!("{prompt}");
        io::stdout()
            .flush()
            .map_err(|e| ConsoleError::OperatorError(e.to_string()))?;
        let mut answer = String::new();
        let read = tokio::task::block_in_place(|| io::stdin().lock().read_line(&mut answer))
            .map_err(|e| ConsoleError::OperatorError(e.to_string()))?;
        if read == 0 {
            return Err(ConsoleError::OperatorError("stdin closed".to_string()));
        }
        Ok(answer.trim().to_string())
    }
}

impl Operator for TerminalOperator {
    fn password(&mut self) -> Result<String, ConsoleError> {
        self.ask("Please enter the password: ")
    }

    fn confirm(&mut self, question: &str) -> Result<bool, ConsoleError> {
        if self.assume_yes {
            info!("{question} yes");
            return Ok(true);
        }
        let answer = self.ask(&format!("{question} (y/n): "))?.to_lowercase();
        Ok(matches!(answer.as_str(), "y" | "yes"))
    }
}

fn load_config(args: &Args) -> anyhow::Result<ProvisionConfig> {
    let mut config = match &args.settings {
        Some(path) => ProvisionConfig::from_file(path)?,
        None => ProvisionConfig::default(),
    };
    if let Some(max_retries) = args.max_retries {
        config = config.with_max_retries(max_retries);
    }
    if let Some(secs) = args.wait_interval {
        config = config.with_wait_interval(seconds(secs, "--wait-interval")?);
    }
    if let Some(secs) = args.delay {
        config = config.with_inter_line_delay(seconds(secs, "--delay")?);
    }
    if args.save {
        config = config.with_save_after_push(true);
    }
    config.validate()?;
    Ok(config)
}

fn seconds(value: f64, flag: &str) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("invalid {flag} value {value}"))
}

fn default_device_file() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(DEFAULT_DEVICE_FILE))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DEVICE_FILE))
}

fn default_log_path(input_file: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%d-%m-%Y-%H:%M");
    let name = input_file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config".to_string());
    let file = format!("{stamp}-{name}-log.txt");
    match dirs::home_dir() {
        Some(home) => home.join(file),
        None => PathBuf::from(file),
    }
}

fn open_console(path: &Path, baud: u32) -> Result<SerialStream, ConsoleError> {
    println!("Setting serial port baud, parity, and stop bits to '8N1' on {}", path.display());
    let builder = tokio_serial::new(path.to_string_lossy(), baud)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(Duration::from_secs(1));
    SerialStream::open(&builder)
        .map_err(|e| ConsoleError::ChannelOpenError(format!("{}: {}", path.display(), e)))
}

fn print_report(report: &ProvisionReport) {
    println!("------------");
    match report.outcome {
        ProvisionOutcome::Applied => {
            if let Some(push) = &report.push {
                println!(
                    "Configuration complete: {} lines sent, {} comments skipped (sha256 {}).",
                    push.sent, push.skipped, push.digest
                );
            }
            if report.saved {
                println!("Configuration saved.");
            } else {
                println!("Configuration not saved.");
            }
        }
        ProvisionOutcome::Declined => println!("Exiting without sending config."),
    }
}

fn handle_responses(
    log: &ResponseLog,
    args: &Args,
    operator: &mut TerminalOperator,
) -> anyhow::Result<()> {
    let lines = log.lines()?;
    if !args.yes && operator.confirm("Print device responses to console?")? {
        for line in &lines {
            println!("{line}");
        }
    }

    let path = match &args.log_file {
        Some(path) => path.clone(),
        None => {
            if !operator.confirm("Save responses to logfile?")? {
                return Ok(());
            }
            let default_path = default_log_path(&args.input_file);
            if operator.confirm(&format!("Save to default path: {}?", default_path.display()))? {
                default_path
            } else {
                PathBuf::from(operator.ask("Enter the custom path and filename: ")?)
            }
        }
    };
    log.save_to(&path)?;
    println!("Responses saved to {}", path.display());
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    if !args.input_file.is_file() {
        bail!("The input file '{}' does not exist.", args.input_file.display());
    }
    let script = ConfigScript::from_file(&args.input_file)?;
    let config = load_config(&args)?;
    debug!("Provision config: {:?}", config);

    let device_file = args.device_file.clone().unwrap_or_else(default_device_file);
    let stream = open_console(&device_file, args.baud)?;

    let recorder = args
        .record
        .as_ref()
        .map(|_| SessionRecorder::new(SessionRecordLevel::Full));
    let mut operator = TerminalOperator {
        assume_yes: args.yes,
    };

    let mut session = ConsoleSession::open(stream, config, recorder.clone())?;
    let log = session.response_log().clone();
    let result = provision_session(&mut session, &script, &mut operator).await;
    println!("Cleanup complete.");

    if let (Some(path), Some(recorder)) = (&args.record, &recorder) {
        let jsonl = recorder.to_jsonl()?;
        std::fs::write(path, jsonl)
            .with_context(|| format!("failed to write recording {}", path.display()))?;
        info!("Session recording written to {}", path.display());
    }

    let report = result?;
    print_report(&report);
    handle_responses(&log, &args, &mut operator)
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
