//! bitraft Server Binary
//!
//! Starts a bitraft node: store, local log and the client TCP server.

use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use bitraft::consensus::{latest_snapshot, LogOptions};
use bitraft::machine::Consensus;
use bitraft::network::{Server, ShutdownHandle};
use bitraft::{Config, LocalLog, StateMachine, Store};
use clap::Parser;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing_subscriber::{fmt, EnvFilter};

/// bitraft Server
#[derive(Parser, Debug)]
#[command(name = "bitraft-server")]
#[command(about = "Replicated key-value store with snapshots and live command monitoring")]
#[command(disable_version_flag = true)]
struct Args {
    /// Display version information
    #[arg(short = 'v', long)]
    version: bool,

    /// Enable debug logging
    #[arg(short = 'd', long)]
    debug: bool,

    /// Maximum key size in bytes
    #[arg(short = 'K', long, default_value = "64")]
    max_key_size: usize,

    /// Maximum value size in bytes
    #[arg(short = 'V', long, default_value = "65535")]
    max_value_size: usize,

    /// Maximum datafile size in bytes
    #[arg(short = 'M', long, default_value = "1048576")]
    max_datafile_size: u64,

    /// Bind interface to listen to
    #[arg(short = 'b', long, default_value = ":4920")]
    bind: String,

    /// Path to data directory
    #[arg(short = 'p', long, default_value = "data")]
    path: PathBuf,

    /// Log directory (stderr if unset)
    #[arg(short = 'l', long)]
    logdir: Option<PathBuf>,

    /// Join a cluster by providing an address
    #[arg(short = 'j', long)]
    join: Option<String>,

    /// Advertise interface
    #[arg(short = 'a', long, default_value = ":5920")]
    advertise: String,

    /// Maximum concurrent connections
    #[arg(long, default_value = "1024")]
    max_connections: usize,
}

fn main() {
    let args = Args::parse();

    if args.version {
        println!("bitraft version {}", bitraft::VERSION);
        std::process::exit(0);
    }

    if let Err(e) = init_tracing(args.debug, args.logdir.as_ref()) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    tracing::info!("bitraft Server v{}", bitraft::VERSION);

    // Build config from args
    let config = Config::builder()
        .data_dir(&args.path)
        .max_key_size(args.max_key_size)
        .max_value_size(args.max_value_size)
        .max_datafile_size(args.max_datafile_size)
        .bind(&args.bind)
        .advertise(&args.advertise)
        .join(args.join.clone())
        .max_connections(args.max_connections)
        .logdir(args.logdir.clone())
        .build();

    // Addresses are validated up front so a typo fails fast
    let advertise = fatal(config.advertise_addr(), "Invalid advertise address");
    let join = fatal(config.join_addr(), "Invalid join address");
    fatal(config.bind_addr(), "Invalid bind address");

    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("Advertise address: {}", advertise);

    let db_dir = config.db_dir();
    let fresh = !db_dir.exists();

    let store = fatal(Store::open(&db_dir, config.store_options()), "Failed to open store");
    tracing::info!("Store opened with {} keys", store.len());

    let machine = Arc::new(StateMachine::new(&config, store));
    let log = fatal(
        LocalLog::start(Arc::clone(&machine), LogOptions::from_config(&config)),
        "Failed to start log",
    );
    let log = Arc::new(log);

    // A lost store is rebuilt from the newest snapshot
    if fresh {
        match latest_snapshot(&config.snapshot_dir()) {
            Ok(Some((index, path))) => {
                tracing::info!("Restoring snapshot {} from {}", index, path.display());
                fatal(log.install_snapshot(&path), "Failed to restore snapshot");
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to look for snapshots: {}", e),
        }
    }

    if let Some(join) = join {
        tracing::warn!("Join address {} recorded; this node runs as a single-member cluster", join);
    }

    let consensus: Arc<dyn Consensus> = Arc::clone(&log) as Arc<dyn Consensus>;
    let server = fatal(
        Server::bind(config, Arc::clone(&machine), consensus),
        "Failed to bind server",
    );

    fatal(
        watch_signals(server.shutdown_handle()),
        "Failed to install signal handlers",
    );

    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        log.shutdown();
        std::process::exit(1);
    }

    log.shutdown();
    tracing::info!("Server stopped");
}

/// Install the global subscriber
fn init_tracing(debug: bool, logdir: Option<&PathBuf>) -> std::io::Result<()> {
    let default = if debug { "debug,bitraft=debug" } else { "info,bitraft=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    match logdir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let file = File::options()
                .create(true)
                .append(true)
                .open(dir.join("bitraft.log"))?;
            fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
    }
    Ok(())
}

/// Stop the server on SIGINT or SIGTERM
fn watch_signals(shutdown: ShutdownHandle) -> std::io::Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                tracing::info!(signal, "shutdown signal received");
                shutdown.shutdown();
            }
        })?;
    Ok(())
}

/// Unwrap a startup result or exit
fn fatal<T, E: std::fmt::Display>(result: Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            tracing::error!("{}: {}", context, e);
            std::process::exit(1);
        }
    }
}
