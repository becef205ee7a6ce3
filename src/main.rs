//! MAITRI Monitor CLI
//!
//! Critical-issue detection for crew emotional well-being.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use maitri_monitor::{
    audit::create_shared_audit_with_persistence,
    core::{render_issue_report, TimeWindow},
    ingest::{forward_json_lines, parse_json_lines, ClassifierFeed, RawObservation},
    Config, LogSink, MonitorSession, ReportSink, MONITORING_NOTICE, VERSION,
};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "gateway")]
use maitri_monitor::{BlockingGroundControlClient, GroundControlConfig};

/// Watchdog interval during replay, long enough never to fire.
const REPLAY_POLL_INTERVAL_SECS: i64 = 365 * 24 * 3600;

#[derive(Parser)]
#[command(name = "maitri-monitor")]
#[command(version = VERSION)]
#[command(about = "Critical-issue detection for crew emotional well-being", long_about = None)]
struct Cli {
    /// Enable debug logging (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor a live classifier feed (JSON lines)
    Monitor {
        /// Feed file; reads stdin when omitted
        #[arg(long, short)]
        input: Option<PathBuf>,

        /// Send alerts to ground control (requires gateway feature)
        #[arg(long)]
        ground_control: bool,

        /// Ground-control relay port (auto-detected from runtime dir if not specified)
        #[arg(long)]
        gc_port: Option<u16>,

        /// Ground-control relay token (auto-detected from runtime dir if not specified)
        #[arg(long)]
        gc_token: Option<String>,

        /// Also serve the HTTP API on this port (requires server feature)
        #[arg(long)]
        serve: Option<u16>,

        /// Skip writing the final report to the export directory
        #[arg(long)]
        no_export: bool,
    },

    /// Replay a recorded feed and print a well-being report
    Report {
        /// Recorded feed (JSON lines with timestamps)
        input: PathBuf,

        /// Range start (RFC 3339); defaults to the first observation
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        /// Range end (RFC 3339); defaults to the last observation
        #[arg(long)]
        end: Option<DateTime<Utc>>,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Issue history look-back in hours, measured from the range end
        #[arg(long, default_value = "24", value_parser = clap::value_parser!(i64).range(0..=87_600))]
        history_hours: i64,
    },

    /// Show monitor status and cumulative statistics
    Status,

    /// Display the crew monitoring notice
    Notice,

    /// Show configuration
    Config,

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Monitor {
            input,
            ground_control,
            gc_port,
            gc_token,
            serve,
            no_export,
        } => {
            cmd_monitor(input, ground_control, gc_port, gc_token, serve, no_export);
        }
        Commands::Report {
            input,
            start,
            end,
            format,
            history_hours,
        } => {
            cmd_report(&input, start, end, format, history_hours);
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::Notice => {
            println!("{MONITORING_NOTICE}");
        }
        Commands::Config => {
            cmd_config();
        }
        Commands::InitConfig { force } => {
            cmd_init_config(force);
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "maitri_monitor=debug"
    } else {
        "maitri_monitor=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config_or_exit() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Fix {:?} or run 'maitri-monitor init-config --force'.", Config::config_path());
            std::process::exit(1);
        }
    }
}

#[allow(unused_variables)]
fn cmd_monitor(
    input: Option<PathBuf>,
    enable_ground_control: bool,
    gc_port: Option<u16>,
    gc_token: Option<String>,
    serve: Option<u16>,
    no_export: bool,
) {
    println!("MAITRI Monitor v{VERSION}");
    println!("{MONITORING_NOTICE}");

    let config = load_config_or_exit();
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    println!("Starting monitoring...");
    println!("  Retention horizon: {}s", config.retention_horizon_secs);
    println!(
        "  Sustained negative: {:.0}% over {}s (min {} samples)",
        config.detectors.sustained_fraction * 100.0,
        config.detectors.sustained_window_secs,
        config.detectors.min_samples
    );
    println!(
        "  Rapid swing: {} swings within {}s",
        config.detectors.min_swings, config.detectors.swing_window_secs
    );
    println!("  Extreme emotion: confidence >= {:.2}", config.detectors.extreme_confidence);
    println!("  Communication gap: {}s", config.detectors.gap_threshold_secs);

    #[cfg(feature = "gateway")]
    let sink: Arc<dyn ReportSink> = if enable_ground_control {
        match create_ground_control_client(gc_port, gc_token, config.tz()) {
            Ok(client) => {
                println!("  Ground control: enabled (station {})", client.station_id());
                match client.test_connection() {
                    Ok(true) => println!("  Ground control link: OK"),
                    Ok(false) => eprintln!("Warning: Ground control health check failed"),
                    Err(e) => eprintln!("Warning: Could not reach ground control: {e}"),
                }
                Arc::new(client)
            }
            Err(e) => {
                eprintln!("Warning: Ground control initialization failed: {e}");
                eprintln!("Continuing with local alert log only.");
                Arc::new(LogSink)
            }
        }
    } else {
        println!("  Ground control: disabled (alerts logged locally)");
        Arc::new(LogSink)
    };

    #[cfg(not(feature = "gateway"))]
    let sink: Arc<dyn ReportSink> = {
        if enable_ground_control {
            eprintln!("Warning: --ground-control ignored (gateway feature not enabled at compile time)");
        }
        Arc::new(LogSink)
    };

    let audit = create_shared_audit_with_persistence(config.data_path.join("audit.json"));
    let session = match MonitorSession::with_audit(config.clone(), sink, audit.clone()) {
        Ok(session) => Arc::new(session),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = session.start() {
        eprintln!("Error starting session: {e}");
        std::process::exit(1);
    }
    println!("Session ID: {}", session.id());

    #[cfg(feature = "server")]
    let server = serve.and_then(|port| start_server(port, session.clone()));
    #[cfg(not(feature = "server"))]
    if serve.is_some() {
        eprintln!("Warning: --serve ignored (server feature not enabled at compile time)");
    }

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    // Classifier pipelines write into the feed from their own thread
    let feed = ClassifierFeed::default();
    let sender = feed.sender();
    let source = input.clone();
    let reader = std::thread::spawn(move || {
        let result = match source {
            Some(path) => std::fs::File::open(&path)
                .map_err(Into::into)
                .and_then(|file| forward_json_lines(BufReader::new(file), &sender)),
            None => forward_json_lines(std::io::stdin().lock(), &sender),
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "classifier feed stopped");
        }
    });

    while running.load(Ordering::SeqCst) {
        match feed.recv_timeout(Duration::from_millis(100)) {
            Ok(Some(raw)) => match session.ingest_raw(&raw) {
                Ok(observation) => {
                    tracing::debug!(
                        modality = %observation.modality(),
                        label = %observation.label(),
                        "observation accepted"
                    );
                }
                Err(e) => eprintln!("[{}] Rejected observation: {e}", Utc::now().format("%H:%M:%S")),
            },
            Ok(None) => {
                // A recorded feed ends; a live one keeps the loop alive
                if input.is_some() && reader.is_finished() && feed.receiver().is_empty() {
                    break;
                }
            }
            Err(e) => {
                eprintln!("Classifier feed disconnected: {e}");
                break;
            }
        }
    }

    println!();
    println!("Stopping monitoring...");
    session.stop();

    let flushed = session.flush_alerts();
    if flushed > 0 {
        println!("Delivered {flushed} pending alert(s)");
    }
    let unreported = session.unreported_issues();
    if !unreported.is_empty() {
        println!("{} issue(s) not confirmed by ground control:", unreported.len());
        for issue in &unreported {
            println!("  - {} {} ({})", issue.id, issue.issue_type, issue.severity);
        }
    }

    #[cfg(feature = "server")]
    if let Some((runtime, shutdown_tx)) = server {
        let _ = shutdown_tx.send(());
        runtime.shutdown_timeout(Duration::from_secs(2));
    }

    let end = Utc::now();
    let start = session.started_at().unwrap_or(end);
    let tz = config.tz();

    println!();
    println!(
        "{}",
        render_issue_report(&session.issue_history(end - ChronoDuration::hours(24)), end, tz)
    );

    if !no_export {
        match session.generate_report(TimeWindow::new(start, end)) {
            Ok(report) => {
                let export_path = config.export_path.join(format!(
                    "report_{}.json",
                    Utc::now().format("%Y%m%d_%H%M%S")
                ));
                match write_json(&export_path, &report) {
                    Ok(()) => println!("Exported report to {export_path:?}"),
                    Err(e) => eprintln!("Error writing report: {e}"),
                }
            }
            Err(e) => eprintln!("Error generating report: {e}"),
        }
    }

    if let Err(e) = audit.save() {
        eprintln!("Warning: Could not save audit log: {e}");
    }

    println!();
    println!("{}", audit.summary());
}

fn cmd_report(
    input: &Path,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    format: OutputFormat,
    history_hours: i64,
) {
    let config = load_config_or_exit();

    let observations = match std::fs::File::open(input)
        .map_err(Into::into)
        .and_then(|file| parse_json_lines(BufReader::new(file)))
    {
        Ok(observations) => observations,
        Err(e) => {
            eprintln!("Error reading {input:?}: {e}");
            std::process::exit(1);
        }
    };

    // Recorded feeds need timestamps; replay cannot invent them
    let stamped: Vec<(DateTime<Utc>, RawObservation)> = observations
        .into_iter()
        .filter_map(|raw| raw.timestamp.map(|ts| (ts, raw)))
        .collect();
    let first = stamped.iter().map(|(ts, _)| *ts).min();
    let last = stamped.iter().map(|(ts, _)| *ts).max();

    let (Some(first), Some(last)) = (first, last) else {
        eprintln!("No timestamped observations in {input:?}");
        std::process::exit(1);
    };

    // Replay drives the gap check itself from recorded time; park the watchdog
    let mut replay_config = config.clone();
    replay_config.gap_poll_interval_secs = REPLAY_POLL_INTERVAL_SECS;
    let session = match MonitorSession::new(replay_config, Arc::new(LogSink)) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = session.start_at(first) {
        eprintln!("Error starting replay: {e}");
        std::process::exit(1);
    }

    let mut rejected = 0;
    for (ts, raw) in &stamped {
        if let Err(e) = session.poll_communication_gap(*ts) {
            tracing::debug!(error = %e, "replayed gap check failed");
        }
        if let Err(e) = session.ingest_raw(raw) {
            tracing::debug!(error = %e, "replayed observation rejected");
            rejected += 1;
        }
    }
    session.stop();
    session.flush_alerts();

    let end = end.unwrap_or(last);
    let start = start.unwrap_or(first);
    let report = match session.generate_report(TimeWindow::new(start, end)) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error generating report: {e}");
            std::process::exit(1);
        }
    };
    let history = session.issue_history(end - ChronoDuration::hours(history_hours));

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "report": report,
                "issue_history": history,
                "rejected_observations": rejected,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Text => {
            let tz = config.tz();
            println!("{}", report.render_text(tz));
            println!("{}", render_issue_report(&history, end, tz));
            if rejected > 0 {
                println!("Rejected observations: {rejected}");
            }
        }
    }
}

fn cmd_status() {
    let config = Config::load().unwrap_or_default();

    println!("MAITRI Monitor Status");
    println!("=====================");
    println!();

    println!("Configuration:");
    println!("  Config file: {:?}", Config::config_path());
    println!("  Retention horizon: {}s", config.retention_horizon_secs);
    println!("  Cool-down: {}s", config.cool_down_secs);
    println!("  Gap threshold: {}s", config.detectors.gap_threshold_secs);
    println!("  Timezone: {}", config.timezone);
    println!();

    let stats_path = config.data_path.join("audit.json");
    if stats_path.exists() {
        if let Ok(content) = std::fs::read_to_string(&stats_path) {
            if let Ok(stats) = serde_json::from_str::<serde_json::Value>(&content) {
                println!("Cumulative Statistics:");
                if let Some(accepted) = stats.get("accepted").and_then(|v| v.as_array()) {
                    let labels = ["Facial", "Audio", "Text"];
                    for (label, count) in labels.iter().zip(accepted) {
                        println!("  {label} observations: {count}");
                    }
                }
                for (key, label) in [
                    ("rejected", "Rejected observations"),
                    ("issues_raised", "Issues raised"),
                    ("issues_escalated", "Issues escalated"),
                    ("alerts_delivered", "Alerts delivered"),
                    ("alerts_failed", "Alerts failed"),
                    ("alerts_dropped", "Alerts dropped"),
                ] {
                    if let Some(value) = stats.get(key) {
                        println!("  {label}: {value}");
                    }
                }
                if let Some(updated) = stats.get("last_updated").and_then(|v| v.as_str()) {
                    println!("  Last updated: {updated}");
                }
            }
        }
    } else {
        println!("No previous session data found.");
    }
}

fn cmd_config() {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

fn cmd_init_config(force: bool) {
    let path = Config::config_path();
    if path.exists() && !force {
        eprintln!("Config already exists at {path:?} (use --force to overwrite)");
        std::process::exit(1);
    }
    match Config::default().save() {
        Ok(()) => println!("Wrote default configuration to {path:?}"),
        Err(e) => {
            eprintln!("Error saving config: {e}");
            std::process::exit(1);
        }
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, json)
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
}

/// Create the ground-control client from CLI args or the runtime directory.
#[cfg(feature = "gateway")]
fn create_ground_control_client(
    port: Option<u16>,
    token: Option<String>,
    tz: chrono_tz::Tz,
) -> Result<BlockingGroundControlClient, maitri_monitor::GatewayError> {
    if let (Some(p), Some(t)) = (port, token.clone()) {
        return BlockingGroundControlClient::new(GroundControlConfig::new("127.0.0.1", p, t), tz);
    }

    if port.is_some() || token.is_some() {
        eprintln!("Warning: Partial ground control config provided, trying runtime directory...");
    }
    BlockingGroundControlClient::from_runtime(tz)
}

/// Start the HTTP API on its own runtime.
#[cfg(feature = "server")]
fn start_server(
    port: u16,
    session: Arc<MonitorSession>,
) -> Option<(tokio::runtime::Runtime, tokio::sync::oneshot::Sender<()>)> {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Warning: Could not start HTTP runtime: {e}");
            return None;
        }
    };
    let config = maitri_monitor::server::ServerConfig::new(port, session);
    match runtime.block_on(maitri_monitor::server::run(config)) {
        Ok((addr, shutdown_tx)) => {
            println!("  HTTP API: http://{addr}");
            Some((runtime, shutdown_tx))
        }
        Err(e) => {
            eprintln!("Warning: Could not start HTTP server: {e}");
            None
        }
    }
}
