//! `skerryd` — the Skerry log daemon.
//!
//! Binary entrypoint that ties the log components together into a
//! running node: entry database, coordination store, leader election,
//! sequencer, cluster controller, and the proof-serving lookup.
//!
//! # Usage
//!
//! ```text
//! skerryd start                      # start a node with defaults
//! skerryd start -c skerry.toml       # start with a config file
//! skerryd start -d ./node2           # second instance
//! skerryd start --memory             # fully in-memory (no persistence)
//! skerryd status                     # inspect the local entry database
//! ```

mod config;
mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ed25519_dalek::SigningKey;
use skerry_coord::{election, ConsistentStore, MemoryCoord, StrictStore};
use skerry_db::EntryDb;
use skerry_log::{
    ClusterController, LogLookup, LookupUpdater, Sequencer, SthSigner, Submitter,
};
use skerry_types::events::EventBus;
use skerry_types::NodeId;
use tracing::{info, warn};

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "skerryd",
    version,
    about = "Skerry certificate transparency log daemon"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the log node.
    Start {
        /// Override data directory (useful for running multiple instances).
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Override the log name (coordination-store root).
        #[arg(short, long)]
        log_name: Option<String>,

        /// Run fully in-memory (no disk persistence).
        #[arg(short, long)]
        memory: bool,
    },

    /// Show log state from the local entry database.
    Status,
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    telemetry::init(&telemetry::TelemetryConfig {
        level: config.log.level.clone(),
        otlp_endpoint: std::env::var("OTLP_ENDPOINT")
            .ok()
            .or_else(|| config.telemetry.otlp_endpoint.clone())
            .unwrap_or_default(),
        otlp_headers: std::env::var("OTLP_HEADERS")
            .ok()
            .or_else(|| config.telemetry.otlp_headers.clone())
            .unwrap_or_default(),
        service_name: std::env::var("OTLP_SERVICE_NAME")
            .ok()
            .or_else(|| config.telemetry.service_name.clone())
            .unwrap_or_default(),
        instance_id: String::new(),
    });

    match cli.command {
        Commands::Start {
            data_dir,
            log_name,
            memory,
        } => {
            if let Some(dir) = data_dir {
                config.node.data_dir = dir;
            }
            if let Some(name) = log_name {
                config.node.log_name = name;
            }
            if memory {
                config.storage.backend = "memory".to_string();
            }
            cmd_start(config).await
        }
        Commands::Status => cmd_status(&config),
    }
}

// -----------------------------------------------------------------------
// skerryd start
// -----------------------------------------------------------------------

async fn cmd_start(config: CliConfig) -> Result<()> {
    info!("starting skerryd");
    info!(
        data_dir = %config.node.data_dir.display(),
        log_name = %config.node.log_name,
        storage = %config.storage.backend,
        coord = %config.coord.backend,
        "node configuration"
    );

    let memory_mode = config.storage.backend == "memory";
    if !memory_mode {
        std::fs::create_dir_all(&config.node.data_dir)
            .context("failed to create data directory")?;
    }

    // --- Signing identity ---
    let signing_key = if memory_mode {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        info!("generated ephemeral signing key (memory mode)");
        SigningKey::from_bytes(&bytes)
    } else {
        load_or_create_signing_key(&config.node.data_dir)?
    };
    let signer = Arc::new(SthSigner::new(signing_key));
    let node_id = NodeId::from(*signer.verifying_key().as_bytes());
    info!(%node_id, log_id = %signer.log_id(), "node identity");

    // --- Entry database ---
    let db = if memory_mode {
        info!("using in-memory entry database");
        Arc::new(EntryDb::in_memory())
    } else {
        let db_path = config.node.data_dir.join("entries");
        info!(path = %db_path.display(), "opening entry database");
        Arc::new(EntryDb::open(&db_path).context("failed to open entry database")?)
    };

    // --- Coordination store ---
    // Only the in-process backend ships here; multi-node deployments
    // point the same trait at their replicated KV service.
    if config.coord.backend != "memory" {
        warn!(
            backend = %config.coord.backend,
            "unknown coordination backend, falling back to memory"
        );
    }
    let backend = MemoryCoord::new();
    let store = ConsistentStore::new(backend.clone(), config.coord_root())
        .with_op_timeout(config.coord_op_timeout());
    store
        .set_cluster_config(&config.cluster_config())
        .await
        .context("failed to install cluster config")?;

    // --- Event bus ---
    let bus = EventBus::new();

    // --- Leader election ---
    let election_handle = election::start(
        backend,
        store.clone(),
        node_id,
        config.election_config(),
        bus.clone(),
    );

    // --- Shutdown coordination ---
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // --- Sequencer (runs only while leading) ---
    let sequencer = Sequencer::new(
        db.clone(),
        StrictStore::new(store.clone(), election_handle.leadership()),
        signer.clone(),
        config.sequencer_config(),
        bus.clone(),
    );
    let sequencer_task = tokio::spawn(sequencer.run(election_handle.leadership(), shutdown_rx.clone()));

    // --- Cluster controller ---
    let controller = ClusterController::new(
        node_id,
        db.clone(),
        store.clone(),
        config.controller_config(),
        bus.clone(),
    );
    let controller_task = tokio::spawn(controller.run(shutdown_rx.clone()));

    // --- Lookup (proof serving) ---
    let lookup = Arc::new(LogLookup::new(db.clone()));
    let updater = LookupUpdater::new(lookup.clone(), store.clone(), bus.clone());
    let updater_task = tokio::spawn(updater.run(shutdown_rx.clone()));

    // --- Submission surface ---
    // The HTTP frontend mounts on this; the daemon keeps it alive so an
    // embedder can reach it through the running components.
    let _submitter = Submitter::new(db.clone(), store.clone(), signer.clone());

    info!("skerryd running; press Ctrl-C to stop");
    shutdown_signal().await;

    // --- Graceful shutdown sequence ---

    // 1. Resign leadership so a peer can take over immediately.
    info!("resigning leadership");
    election_handle.resign();

    // 2. Stop background loops.
    let _ = shutdown_tx.send(true);
    let _ = sequencer_task.await;
    let _ = controller_task.await;
    let _ = updater_task.await;

    // 3. Flush telemetry.
    telemetry::shutdown();

    info!("shutdown complete");
    Ok(())
}

// -----------------------------------------------------------------------
// Signal handling
// -----------------------------------------------------------------------

/// Wait for a SIGTERM or SIGINT (Ctrl-C) signal.
///
/// On the first signal, the returned future resolves and graceful
/// shutdown begins. A second signal during shutdown exits immediately.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT (Ctrl-C), initiating graceful shutdown"),
        () = terminate => info!("received SIGTERM, initiating graceful shutdown"),
    }

    tokio::spawn(async {
        let _ = tokio::signal::ctrl_c().await;
        warn!("received second signal during shutdown — forcing exit");
        std::process::exit(1);
    });
}

// -----------------------------------------------------------------------
// Key management
// -----------------------------------------------------------------------

/// Load or create the log's ed25519 signing key at `data_dir/signer.key`.
///
/// On first run, generates a random key and writes it out; afterwards
/// the same key is loaded so the log identity is stable across restarts.
fn load_or_create_signing_key(data_dir: &Path) -> Result<SigningKey> {
    let key_path = data_dir.join("signer.key");
    if key_path.exists() {
        let bytes = std::fs::read(&key_path).context("failed to read signer.key")?;
        anyhow::ensure!(bytes.len() == 32, "signer.key must be exactly 32 bytes");
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        let key = SigningKey::from_bytes(&arr);
        info!("loaded existing signing key");
        Ok(key)
    } else {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let key = SigningKey::from_bytes(&bytes);
        std::fs::write(&key_path, key.to_bytes()).context("failed to write signer.key")?;
        info!(path = %key_path.display(), "generated new signing key");
        Ok(key)
    }
}

// -----------------------------------------------------------------------
// skerryd status
// -----------------------------------------------------------------------

fn cmd_status(config: &CliConfig) -> Result<()> {
    let db_path = config.node.data_dir.join("entries");

    let db = EntryDb::open(&db_path).map_err(|e| {
        anyhow::anyhow!(
            "cannot open entry database at {}. Is the node initialized? ({e})",
            db_path.display(),
        )
    })?;

    println!("Contiguous entries: {}", db.latest_contiguous_sequence());
    match db.latest_tree_head()? {
        Some(sth) => {
            println!("Latest tree head:");
            println!("  tree_size: {}", sth.tree_size);
            println!("  timestamp: {} ms", sth.timestamp_ms);
            print!("  root:      ");
            for byte in sth.root_hash {
                print!("{byte:02x}");
            }
            println!();
        }
        None => println!("No tree head stored yet."),
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
