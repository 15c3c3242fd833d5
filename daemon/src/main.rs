//! resmond entry point
//!
//! Parses the command line, resolves the configuration, installs logging and
//! runs the monitor until SIGINT or SIGTERM.

use std::path::{Path, PathBuf};
use std::process;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use resmon::extract::parse_int;
use resmon::monitor::PhaseReport;
use resmon::error::ConfigError;
use resmon::{AlertKind, MonitorConfig, MonitorError, MonitorService, Result};

/// Resource monitor command line interface
#[derive(Parser)]
#[command(name = "resmond")]
#[command(about = "Watch memory and CPU usage, save diagnostics and alert on high consumption")]
#[command(version)]
struct Cli {
    /// Memory usage threshold in percent, in [0, 100)
    #[arg(short = 'm', overrides_with = "memory_threshold", value_name = "PCT", value_parser = parse_percent, global = true)]
    memory_threshold: Option<f64>,

    /// CPU usage threshold in percent, in [0, 100)
    #[arg(short = 'c', overrides_with = "cpu_threshold", value_name = "PCT", value_parser = parse_percent, global = true)]
    cpu_threshold: Option<f64>,

    /// Seconds between two checks
    #[arg(short = 't', overrides_with = "interval", value_name = "SECS", value_parser = parse_seconds, global = true)]
    interval: Option<u64>,

    /// Command called with the alert message as its only argument
    #[arg(short = 'r', overrides_with = "notify_command", value_name = "SCRIPT", global = true)]
    notify_command: Option<String>,

    /// Minimum seconds between two alerts of the same kind
    #[arg(short = 'n', overrides_with = "throttle", value_name = "SECS", value_parser = parse_seconds, global = true)]
    throttle: Option<u64>,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short = 'l', long, global = true)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, global = true)]
    json_logs: bool,

    /// Directory receiving snapshot reports
    #[arg(long, global = true)]
    report_dir: Option<PathBuf>,

    /// Upper bound in seconds on the runtime of any external command
    #[arg(long, value_name = "SECS", value_parser = parse_seconds, global = true)]
    timeout: Option<u64>,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Monitor until interrupted (default)
    Run,

    /// Run a single cycle and print both samples
    Check,

    /// Validate configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,
    },
}

fn parse_percent(value: &str) -> std::result::Result<f64, String> {
    let pct = parse_int(value).map_err(|e| e.to_string())?;
    if !(0..100).contains(&pct) {
        return Err(format!("{} is not in [0, 100)", pct));
    }
    Ok(f64::from(pct))
}

fn parse_seconds(value: &str) -> std::result::Result<u64, String> {
    let secs = parse_int(value).map_err(|e| e.to_string())?;
    u64::try_from(secs).map_err(|_| format!("{} is negative", secs))
}

/// Parse arguments, mapping clap failures onto our exit codes
fn parse_cli() -> Cli {
    match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                ErrorKind::UnknownArgument | ErrorKind::InvalidSubcommand => 1,
                _ => 2,
            };
            let _ = e.print();
            process::exit(code);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = parse_cli();

    // Load configuration
    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    // Initialize logging
    let _guard = match initialize_logging(&cli, &config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    let result = match &cli.command {
        Some(Commands::Run) | None => run_service(config).await,
        Some(Commands::Check) => check_once(config).await,
        Some(Commands::Config { show }) => handle_config(&config, *show),
    };

    if let Err(e) = result {
        error!(category = e.category(), "Command failed: {}", e);
        process::exit(1);
    }
}

/// Initialize logging based on configuration
fn initialize_logging(cli: &Cli, config: &MonitorConfig) -> Result<Option<WorkerGuard>> {
    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let log_level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let directive = |text: String| -> Result<Directive> {
        text.parse::<Directive>()
            .map_err(|e| MonitorError::Generic(format!("invalid log directive '{}': {}", text, e)))
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(directive(format!("resmon={}", log_level))?)
        .add_directive(directive(format!("resmond={}", log_level))?)
        .add_directive(directive("tokio=warn".to_string())?);

    let (file_layer, guard) = match &config.logging.file_path {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(daily_appender(path)?);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    if cli.json_logs || config.logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(fmt::layer().with_target(false))
            .init();
    }

    Ok(guard)
}

fn daily_appender(path: &Path) -> Result<tracing_appender::rolling::RollingFileAppender> {
    let file_name = path
        .file_name()
        .ok_or_else(|| format!("log file path has no file name: {}", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok(tracing_appender::rolling::daily(dir, file_name))
}

/// Resolve configuration: defaults, file, environment, then flags
fn load_configuration(cli: &Cli) -> Result<MonitorConfig> {
    let path = match &cli.config {
        Some(path) if !path.exists() => {
            return Err(ConfigError::FileNotFound { path: path.display().to_string() }.into());
        }
        Some(path) => Some(path.clone()),
        None => MonitorConfig::default_config_path().ok(),
    };

    let mut config = MonitorConfig::load_with_fallback(path.as_ref())?;

    if let Some(pct) = cli.memory_threshold {
        config.memory_threshold_pct = pct;
    }
    if let Some(pct) = cli.cpu_threshold {
        config.cpu_threshold_pct = pct;
    }
    if let Some(secs) = cli.interval {
        config.interval_secs = secs;
    }
    if let Some(command) = &cli.notify_command {
        config.notify_command = Some(command.clone());
    }
    if let Some(secs) = cli.throttle {
        config.throttle_secs = secs;
    }
    if let Some(dir) = &cli.report_dir {
        config.report_dir = dir.clone();
    }
    if let Some(secs) = cli.timeout {
        config.command_timeout_secs = secs;
    }

    config.validate()?;
    Ok(config)
}

fn prepare_report_dir(config: &MonitorConfig) -> Result<()> {
    std::fs::create_dir_all(&config.report_dir).map_err(|e| {
        MonitorError::Generic(format!("cannot create report directory {}: {}", config.report_dir.display(), e))
    })
}

/// Run the monitor until a shutdown signal arrives
async fn run_service(config: MonitorConfig) -> Result<()> {
    prepare_report_dir(&config)?;
    let mut service = MonitorService::from_config(config);

    let shutdown = tokio::select! {
        _ = service.run() => Ok(()),
        result = wait_for_shutdown() => result,
    };
    shutdown?;

    info!(cycles = service.stats().cycles, "Shutting down");
    Ok(())
}

/// Wait for shutdown signal
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C");
    Ok(())
}

/// Run one cycle and print what was measured
async fn check_once(config: MonitorConfig) -> Result<()> {
    prepare_report_dir(&config)?;
    let mut service = MonitorService::from_config(config);
    let report = service.run_cycle(chrono::Utc::now()).await;

    for kind in AlertKind::ALL {
        let threshold = match kind {
            AlertKind::Memory => service.config().memory_threshold_pct,
            AlertKind::Cpu => service.config().cpu_threshold_pct,
        };
        println!("{}", describe_phase(kind, report.phase(kind), threshold));
    }

    Ok(())
}

fn describe_phase(kind: AlertKind, phase: &PhaseReport, threshold: f64) -> String {
    let Some(sample) = phase.sample else {
        return format!("{}: timed out", kind);
    };

    let mut line = format!("{}: {:.2}% (threshold {:.2}%)", kind, sample.percent, threshold);
    if phase.breached {
        line.push_str(&format!(", {} report(s) saved", phase.snapshots.written.len()));
    }
    line
}

/// Handle configuration commands
fn handle_config(config: &MonitorConfig, show: bool) -> Result<()> {
    if show {
        let text = toml::to_string_pretty(config).map_err(|e| ConfigError::ParseError { reason: e.to_string() })?;
        println!("{}", text);
    } else {
        println!("Configuration is valid");
    }

    Ok(())
}
