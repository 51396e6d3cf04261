//! hivebolt-node — the HiveBolt full-node binary.
//!
//! Startup sequence:
//!   1. Load configuration and the node identity key
//!   2. Open (or initialise) the encrypted chain database
//!   3. Restore the chain: snapshot, tip, or fresh genesis
//!   4. Start the P2P listener and dial configured peers
//!   5. Run the chain writer loop: admit transactions, apply blocks,
//!      author blocks when this node is a validator

mod config;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};

use hivebolt_chain::{ChainManager, Mempool};
use hivebolt_consensus::ValidatorSet;
use hivebolt_core::types::Address;
use hivebolt_crypto::KeyPair;
use hivebolt_p2p::{NetMessage, P2pConfig, P2pHandle, P2pNetwork, PeerEvent};
use hivebolt_state::ChainDb;

use crate::config::NodeConfig;

#[derive(Parser, Debug)]
#[command(
    name = "hivebolt-node",
    version,
    about = "HiveBolt full node — consensus-backed execution for IoT fleets"
)]
struct Args {
    /// Path to the node configuration JSON.
    #[arg(long, default_value = "hivebolt.json")]
    config: PathBuf,

    /// Directory for the persistent chain database.
    #[arg(long, default_value = "hivebolt-data")]
    data_dir: PathBuf,

    /// Override the configured P2P listen address.
    #[arg(long)]
    listen: Option<String>,

    /// Extra peers to dial (comma-separated host:port).
    #[arg(long, value_delimiter = ',')]
    peers: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hivebolt=debug".parse().expect("static filter parses")),
        )
        .init();

    let args = Args::parse();
    info!("HiveBolt node starting");

    // ── Configuration and identity ────────────────────────────────────────────
    let mut node_config = NodeConfig::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;
    if let Some(listen) = args.listen {
        node_config.listen_addr = listen;
    }
    node_config.peers.extend(args.peers);

    let keypair = Arc::new(
        KeyPair::from_secret_hex(&node_config.node_secret_key)
            .map_err(|e| anyhow::anyhow!("node_secret_key: {e}"))?,
    );
    info!(address = %keypair.address(), "node identity");

    // ── Chain database ────────────────────────────────────────────────────────
    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("creating data dir {}", args.data_dir.display()))?;
    let storage_key = node_config.storage_key_bytes()?;
    // A wrong-size key is fatal: refuse to half-initialize.
    let db = Arc::new(ChainDb::open(&args.data_dir, &storage_key).context("opening chain db")?);

    // ── Consensus state ───────────────────────────────────────────────────────
    let validators =
        ValidatorSet::from_roster(&node_config.validators).context("validator roster")?;
    let mempool = Arc::new(Mutex::new(Mempool::new(
        node_config.chain.mempool_limit as usize,
    )));
    let mut manager = ChainManager::open(
        node_config.chain.clone(),
        db,
        validators.clone(),
        node_config.hardware(),
        Arc::clone(&mempool),
    )
    .context("initializing chain")?;
    info!(height = manager.height(), tip = %manager.tip().hash, "chain ready");

    for (address, capability) in node_config.capability_grants()? {
        manager.grant_capability(address, capability)?;
    }

    // ── Authoring role ────────────────────────────────────────────────────────
    let authoring = match &node_config.validator_id {
        Some(id) if validators.is_validator(id) => {
            let miner = match &node_config.miner_address {
                Some(s) => Address::from_str(s).context("miner_address")?,
                None => keypair.address(),
            };
            info!(validator = %id, miner = %miner, "authoring enabled");
            Some((id.clone(), miner))
        }
        Some(id) => {
            warn!(validator = %id, "validator id not in roster; authoring disabled");
            None
        }
        None => None,
    };

    // ── P2P ───────────────────────────────────────────────────────────────────
    let p2p_config = P2pConfig {
        listen_addr: node_config.listen_addr.clone(),
        peers: node_config.peers.clone(),
        network_id: node_config.chain.network_id,
        ..P2pConfig::default()
    };
    let (network, p2p) = P2pNetwork::bind(p2p_config, Arc::clone(&keypair))
        .await
        .map_err(|e| anyhow::anyhow!("binding p2p listener: {e}"))?;
    tokio::spawn(async move {
        if let Err(e) = network.run().await {
            warn!(error = %e, "p2p listener stopped");
        }
    });

    // ── Writer loop ───────────────────────────────────────────────────────────
    run_writer(
        &mut manager,
        &mempool,
        &p2p,
        keypair.as_ref(),
        authoring,
        node_config.block_interval_ms,
    )
    .await;
    Ok(())
}

/// The single chain writer: every state mutation funnels through here.
async fn run_writer(
    manager: &mut ChainManager,
    mempool: &Arc<Mutex<Mempool>>,
    p2p: &P2pHandle,
    keypair: &KeyPair,
    authoring: Option<(String, Address)>,
    block_interval_ms: u64,
) {
    let mut ticker = interval(Duration::from_millis(block_interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("node ready");
    loop {
        tokio::select! {
            event = p2p.inbound.pop() => match event {
                PeerEvent::Transaction(tx) => {
                    let txid = tx.txid();
                    if let Err(e) = manager.validate_transaction(&tx) {
                        warn!(txid = %txid, error = %e, "transaction rejected");
                        continue;
                    }
                    let now_ms = chrono::Utc::now().timestamp_millis() as u64;
                    let admitted = mempool
                        .lock()
                        .expect("mempool mutex poisoned")
                        .add(tx.clone(), now_ms);
                    match admitted {
                        Ok(()) => {
                            p2p.broadcast(NetMessage::Transaction(tx));
                        }
                        Err(e) => warn!(txid = %txid, error = %e, "mempool rejected"),
                    }
                }
                PeerEvent::Block(block) => {
                    match manager.apply_block(&block) {
                        Ok(()) => {
                            p2p.broadcast(NetMessage::Block(block));
                        }
                        Err(e) => warn!(height = block.index, error = %e, "block rejected"),
                    }
                }
                PeerEvent::PeerList(peers) => {
                    info!(count = peers.len(), "received peer list");
                }
            },

            _ = ticker.tick() => {
                // Author on a fixed cadence even with an empty mempool:
                // confirmation depth only advances as blocks land.
                let Some((validator_id, miner)) = &authoring else { continue };
                match manager.create_block(*miner, validator_id, keypair) {
                    Ok(block) => match manager.apply_block(&block) {
                        Ok(()) => {
                            info!(height = block.index, "authored block");
                            p2p.broadcast(NetMessage::Block(block));
                        }
                        Err(e) => warn!(error = %e, "authored block failed to apply"),
                    },
                    Err(e) => warn!(error = %e, "block creation failed"),
                }
            }
        }
    }
}
