//! Challenge Mining Client
//!
//! Proof-of-work mining client binary: wires the orchestrator to the HTTP
//! API, the in-process hash engine and the JSON-lines receipt store.

use challenge_mining_client::{
    config::{Args, Config},
    core::{Address, WalletAddress},
    engine::{Blake2sEngine, HashEngine},
    error::{Error, Result},
    events::EventBus,
    miner::{ChallengePoller, DevFeePool, MiningCoordinator, StaticDevFeeSource},
    protocol::{client::ApiClientConfig, ApiClient, ChallengeApi},
    store::{JsonlStore, ReceiptStore},
    utils,
};
use clap::Parser;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Ready list of signing-capable addresses produced by the wallet store
#[derive(Debug, Deserialize)]
struct WalletManifest {
    /// User addresses, each with its registration signature
    addresses: Vec<WalletAddress>,
    /// Addresses used to settle the dev-fee obligation
    #[serde(default)]
    dev_fee_addresses: Vec<Address>,
}

impl WalletManifest {
    fn load(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read wallet manifest {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_args(&args)?;

    if args.print_config {
        println!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    utils::init_logging(&config.logging.level, &config.logging.format);

    info!("Starting challenge mining client v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Node {} ({} workers, batch {}, dev-fee 1:{})",
        config.node.url,
        config.mining.worker_threads,
        config.mining.batch_size,
        config.mining.dev_fee_ratio
    );

    let wallet_path = args
        .wallet_file
        .as_ref()
        .ok_or_else(|| Error::config("Wallet manifest is required (use --wallet-file)"))?;
    let manifest = WalletManifest::load(wallet_path)?;
    info!(
        "Loaded {} addresses ({} dev-fee) from {}",
        manifest.addresses.len(),
        manifest.dev_fee_addresses.len(),
        wallet_path.display()
    );

    let api: Arc<dyn ChallengeApi> = Arc::new(ApiClient::new(ApiClientConfig {
        node_url: config.node.url.clone(),
        timeout: Duration::from_secs(config.node.timeout_secs),
        use_tls: config.node.use_tls,
        insecure: config.node.insecure,
    })?);

    let engine: Arc<dyn HashEngine> = Arc::new(Blake2sEngine::new());

    let store: Arc<dyn ReceiptStore> = Arc::new(JsonlStore::new(
        config.store.receipt_log.clone(),
        config.store.error_log.clone(),
    ));
    let replay = store.replay()?;
    info!(
        "Replayed durable state: {} user solutions, {} dev-fee solutions, {} submitted hashes",
        replay.user_solutions,
        replay.dev_fee_solutions,
        replay.submitted_hashes.len()
    );

    let events = EventBus::new();

    let (poller, live_rx) = ChallengePoller::new(
        Arc::clone(&api),
        Duration::from_millis(config.mining.poll_interval_ms),
        events.clone(),
    );

    let dev_fee_pool = Arc::new(DevFeePool::new(Arc::new(StaticDevFeeSource::new(
        manifest.dev_fee_addresses,
    ))));

    let coordinator = Arc::new(MiningCoordinator::new(
        api,
        engine,
        store,
        dev_fee_pool,
        config.mining.clone(),
        events,
        live_rx,
    ));
    coordinator.state().load_replay(replay);

    let poller_handle = tokio::spawn(poller.run(coordinator.state()));

    let shutdown_coordinator = Arc::clone(&coordinator);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            shutdown_coordinator.stop();
        }
    });

    coordinator.run(manifest.addresses).await?;

    // The run may end on window closure rather than ctrl-c; release the
    // poller either way.
    coordinator.stop();
    let _ = poller_handle.await;

    info!("Mining client stopped");
    Ok(())
}
