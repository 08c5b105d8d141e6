use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tabled::{Table, Tabled};
use tracing::{debug, info};

use wifi_analyzer::config::Config;
use wifi_analyzer::registry::{open_store, AccessPoint};
use wifi_analyzer::source::monitor_mac;
use wifi_analyzer::{
    AddressFilter, Analyzer, LiveFrameSource, MacAddr, Registry, ReplayFrameSource, RunSummary,
    StoreNotifier,
};

/// Messages read from the log per poll
const WATCH_BATCH: usize = 256;

#[derive(Parser)]
#[command(name = "wifi-analyzer")]
#[command(author, version, about = "Passive 802.11 discovery and handshake capture")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture from a monitor-mode interface
    Live {
        /// Monitor interface, e.g. wlan0mon
        #[arg(short, long)]
        iface: String,

        /// Channel the interface is tuned to (used for file names)
        #[arg(long)]
        channel: Option<u8>,
    },

    /// Analyze a recorded pcap file
    Replay {
        /// Capture file to read
        file: PathBuf,
    },

    /// Ask running analyzers to stop
    Stop,

    /// Clear the stop flag
    Resume,

    /// Flag an access point as a target
    Target {
        bssid: MacAddr,

        /// Remove the flag instead
        #[arg(long)]
        clear: bool,
    },

    /// Never hand an access point's clients to the attack hook
    Allow { bssid: MacAddr },

    /// Follow notifications published by running analyzers
    Watch {
        /// Only show these topics (repeatable)
        #[arg(short, long)]
        topic: Vec<String>,

        /// Replay the retained log before following
        #[arg(long)]
        from_start: bool,

        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 500)]
        interval: u64,
    },

    /// Show session counters and known access points
    Status {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Generate default configuration file
    GenConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Table row for the access point list
#[derive(Tabled)]
struct AccessPointRow {
    #[tabled(rename = "BSSID")]
    bssid: String,
    #[tabled(rename = "SSID")]
    ssid: String,
    #[tabled(rename = "Revealed")]
    revealed: String,
    #[tabled(rename = "Ch")]
    channel: String,
    #[tabled(rename = "Crypto")]
    crypto: String,
    #[tabled(rename = "Capability")]
    capability: String,
    #[tabled(rename = "Clients")]
    clients: usize,
    #[tabled(rename = "Flags")]
    flags: String,
    #[tabled(rename = "Last Seen")]
    last_seen: String,
}

impl AccessPointRow {
    fn new(ap: &AccessPoint, clients: usize) -> Self {
        let mut flags = Vec::new();
        if ap.hidden {
            flags.push("hidden");
        }
        if ap.target {
            flags.push("target");
        }

        Self {
            bssid: ap.bssid.to_string(),
            ssid: if ap.ssid.is_empty() {
                "<hidden>".to_string()
            } else {
                ap.ssid.clone()
            },
            revealed: ap.revealed_ssid.clone().unwrap_or_else(|| "-".to_string()),
            channel: ap.channel.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
            crypto: ap.crypto.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
            capability: ap.capability.clone(),
            clients,
            flags: flags.join(","),
            last_seen: ap
                .last_seen
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// Load the file given on the command line, or defaults plus environment
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => {
            let mut config = Config::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }
}

pub fn run_command(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Live { iface, channel } => cmd_live(config, &iface, channel),
        Commands::Replay { file } => cmd_replay(config, &file),
        Commands::Stop => cmd_stop(config, true),
        Commands::Resume => cmd_stop(config, false),
        Commands::Target { bssid, clear } => cmd_target(config, bssid, !clear),
        Commands::Allow { bssid } => cmd_allow(config, bssid),
        Commands::Watch {
            topic,
            from_start,
            interval,
        } => cmd_watch(config, &topic, from_start, Duration::from_millis(interval)),
        Commands::Status { json } => cmd_status(config, json),
        Commands::GenConfig { output } => cmd_gen_config(output),
    }
}

fn open_registry(config: &Config, filter: AddressFilter) -> Result<Registry> {
    let store = open_store(&config.store).context("Failed to open registry store")?;
    Registry::new(store, filter).context("Registry store is unreachable")
}

/// Ctrl-C ends this process only; other analyzers sharing the store keep running
fn install_cancel_handler() -> Result<Arc<AtomicBool>> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("Failed to install Ctrl-C handler")?;
    Ok(cancel)
}

fn warn_if_stopped(registry: &Registry) -> Result<()> {
    if registry.stop_requested()? {
        println!(
            "{}",
            "Stop flag is set; run `wifi-analyzer resume` to clear it".yellow()
        );
    }
    Ok(())
}

fn cmd_live(config: Config, iface: &str, channel: Option<u8>) -> Result<()> {
    let mut filter = AddressFilter::new().with_ignored(config.analyzer.ignore_macs()?);
    if let Some(mac) = monitor_mac(iface) {
        info!("Ignoring monitor interface address {}", mac);
        filter.ignore(mac);
    }

    let registry = open_registry(&config, filter)?;
    warn_if_stopped(&registry)?;
    let cancel = install_cancel_handler()?;

    let source = LiveFrameSource::open(iface, channel, &config.capture)
        .with_context(|| format!("Failed to open capture on {}", iface))?;

    let notifier = Arc::new(StoreNotifier::new(registry.store().clone()));
    let mut analyzer = Analyzer::builder(registry)
        .with_notifier(notifier)
        .with_cancel(cancel)
        .with_settings(config.analyzer.clone())
        .with_capture(config.capture.clone())
        .build(Box::new(source))?;

    let summary = analyzer.run();
    print_summary(&summary);
    Ok(())
}

fn cmd_replay(config: Config, file: &Path) -> Result<()> {
    let filter = AddressFilter::new().with_ignored(config.analyzer.ignore_macs()?);
    let registry = open_registry(&config, filter)?;
    warn_if_stopped(&registry)?;
    let cancel = install_cancel_handler()?;

    let source = ReplayFrameSource::open(file)
        .with_context(|| format!("Failed to open {}", file.display()))?;

    let notifier = Arc::new(StoreNotifier::new(registry.store().clone()));
    let mut analyzer = Analyzer::builder(registry)
        .with_notifier(notifier)
        .with_cancel(cancel)
        .with_settings(config.analyzer.clone())
        .with_capture(config.capture.clone())
        .build(Box::new(source))?;

    let summary = analyzer.run();
    print_summary(&summary);
    Ok(())
}

fn cmd_stop(config: Config, stop: bool) -> Result<()> {
    let registry = open_registry(&config, AddressFilter::new())?;
    registry.request_stop(stop)?;
    if stop {
        println!("{}", "Stop requested".yellow().bold());
    } else {
        println!("{}", "Stop flag cleared".green().bold());
    }
    Ok(())
}

fn cmd_target(config: Config, bssid: MacAddr, target: bool) -> Result<()> {
    let registry = open_registry(&config, AddressFilter::new())?;
    registry.set_target(bssid, target)?;
    if target {
        println!("{} is now a target", bssid.to_string().red().bold());
    } else {
        println!("{} is no longer a target", bssid);
    }
    Ok(())
}

fn cmd_allow(config: Config, bssid: MacAddr) -> Result<()> {
    let registry = open_registry(&config, AddressFilter::new())?;
    if registry.allow(bssid)? {
        println!("{} added to the allow list", bssid.to_string().green());
    } else {
        println!("{} is already allowed", bssid);
    }
    Ok(())
}

fn cmd_watch(config: Config, topics: &[String], from_start: bool, interval: Duration) -> Result<()> {
    let store = open_store(&config.store).context("Failed to open registry store")?;
    let cancel = install_cancel_handler()?;

    let mut cursor = if from_start { 0 } else { store.last_message_id()? };
    debug!("Watching messages after #{}", cursor);

    while !cancel.load(Ordering::SeqCst) {
        let batch = store.messages_after(cursor, WATCH_BATCH)?;
        let Some(last) = batch.last() else {
            std::thread::sleep(interval);
            continue;
        };
        cursor = last.id;

        for message in &batch {
            if topics.is_empty() || topics.contains(&message.topic) {
                println!("{}", serde_json::to_string(message)?);
            }
        }
    }
    Ok(())
}

fn cmd_status(config: Config, json: bool) -> Result<()> {
    let registry = open_registry(&config, AddressFilter::new())?;
    let aps = registry.access_points()?;

    if json {
        let status = serde_json::json!({
            "stop_requested": registry.stop_requested()?,
            "session_stats": registry.session_stats()?,
            "handshake_bssids": registry.handshake_bssids()?,
            "recent_networks": registry.recent_networks()?,
            "access_points": aps,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}", "=== wifi-analyzer Status ===".bold());
    if registry.stop_requested()? {
        println!("Stop flag: {}", "SET".red().bold());
    } else {
        println!("Stop flag: {}", "clear".green());
    }
    println!("Handshakes: {}", registry.handshake_count()?);
    for (name, value) in registry.session_stats()? {
        println!("  {}: {}", name, value);
    }
    println!("Probed networks: {}", registry.recent_networks()?.len());
    println!();

    if aps.is_empty() {
        println!("No access points recorded");
        return Ok(());
    }

    let mut rows = Vec::with_capacity(aps.len());
    for ap in &aps {
        rows.push(AccessPointRow::new(ap, registry.clients(ap.bssid)?.len()));
    }
    println!("{}", Table::new(rows));
    Ok(())
}

fn cmd_gen_config(output: Option<PathBuf>) -> Result<()> {
    let content = Config::default_with_comments();
    match output {
        Some(path) => {
            std::fs::write(&path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Configuration written to {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    let stats = &summary.stats;
    println!("{}", "=== Run Summary ===".bold());
    println!(
        "Frames: {} in {:.1}s ({:.0}/s)",
        stats.frames,
        summary.elapsed.as_secs_f64(),
        summary.frames_per_second()
    );
    println!("Parse failures: {}", stats.parse_failures);
    if stats.store_errors > 0 || stats.capture_errors > 0 {
        println!(
            "{}",
            format!(
                "Store errors: {}, capture errors: {}",
                stats.store_errors, stats.capture_errors
            )
            .yellow()
        );
    }
    println!("EAPOL frames: {}", stats.eapol_frames);
    println!("Target hits: {}", stats.target_hits);
    if !summary.handshake_bssids.is_empty() {
        println!("{}", "Handshakes:".green().bold());
        for bssid in &summary.handshake_bssids {
            println!("  {}", bssid);
        }
    }
    if let Some(path) = &summary.capture_path {
        println!("Capture: {} ({} frames)", path.display(), summary.captured_frames);
    }
    if let Some(path) = &summary.handshake_copy {
        println!("Handshake file: {}", path.display());
    }
    println!(
        "Ended by: {}",
        if summary.stopped { "stop request" } else { "end of input" }
    );
}
