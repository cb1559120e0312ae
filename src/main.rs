//! Interlink Node - Main Application
//!
//! Runs a full, light or IoT node of the interlinked proof-of-work ledger.

use anyhow::{Context, Result};
use clap::Parser;
use interlink_node::{
    config::{Args, Config, NodeMode},
    crypto::Keypair,
    storage::{KvBlockStore, MemoryStore},
    utils::{format_duration, format_hash_rate, init_logging},
    Node, APP_NAME, VERSION,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.generate_key {
        generate_and_print_keypair()?;
        return Ok(());
    }

    let config = Config::load(&args).context("Failed to load configuration")?;

    if args.print_config {
        print_configuration(&config)?;
        return Ok(());
    }

    let _log_guard = init_logging(
        &config.logging.level,
        config.logging.format,
        config.logging.file.as_deref(),
    );

    info!(version = VERSION, mode = %config.node.mode, "Starting {}", APP_NAME);
    let started = Instant::now();

    let result = match config.node.mode {
        NodeMode::Full => run_full(config).await,
        NodeMode::Light | NodeMode::Iot => run_follower(config).await,
    };

    match &result {
        Ok(()) => info!(uptime = %format_duration(started.elapsed().as_secs()), "Node stopped"),
        Err(e) => error!(error = %e, "Node stopped with an error"),
    }
    result
}

/// Premine, then mine and serve peers until Ctrl-C
async fn run_full(config: Config) -> Result<()> {
    let premine = config.mining.block_number;
    let mining = config.mining.enabled;
    let node = Arc::new(Node::new(config)?);
    watch_ctrl_c(Arc::clone(&node));

    node.restore().await.context("Failed to restore stored blocks")?;
    node.premine(premine).await.context("Premining failed")?;

    let listener = node.bind().await.context("Failed to bind listen address")?;
    let served = async {
        let result = node.serve(listener).await;
        node.shutdown();
        result
    };
    let mined = async {
        let result = if mining {
            node.run_miner().await
        } else {
            node.shutdown_token().cancelled().await;
            Ok(())
        };
        // A failed miner stops the server too.
        node.shutdown();
        result
    };

    let (served, mined) = tokio::join!(served, mined);
    served?;
    mined?;

    print_stats(&node);
    Ok(())
}

/// Sync from the configured peer and follow its broadcasts until Ctrl-C
async fn run_follower(config: Config) -> Result<()> {
    let store = Arc::new(KvBlockStore::new(MemoryStore::new()));
    let (node, stream) = Node::sync_from_peer(config, store)
        .await
        .context("Failed to sync from peer")?;
    let node = Arc::new(node);
    watch_ctrl_c(Arc::clone(&node));

    info!(
        head = node.chain().height(),
        hash = %node.chain().current_block().hash().short(),
        accounts = node.ledger().len(),
        "Following peer"
    );

    if let Err(e) = node.follow(stream).await {
        if node.shutdown_token().is_cancelled() {
            return Ok(());
        }
        return Err(e.into());
    }
    Ok(())
}

/// Cancel the node on the first Ctrl-C
fn watch_ctrl_c(node: Arc<Node>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
        }
        node.shutdown();
    });
}

fn print_stats(node: &Node) {
    let stats = node.miner().stats().snapshot();
    info!(
        head = node.chain().height(),
        accepted = stats.blocks_accepted,
        rejected = stats.blocks_rejected,
        hashes = stats.total_hashes,
        hash_rate = %format_hash_rate(stats.average_hash_rate),
        "Mining summary"
    );
}

/// Generate and print a new coinbase key
fn generate_and_print_keypair() -> Result<()> {
    let keypair = Keypair::generate()?;
    println!("address: {}", keypair.address());
    println!("public:  {}", keypair.public_key());
    println!("secret:  {}", keypair.secret_hex());
    println!();
    println!("Keep the secret key private.");
    println!("Set it as node.coinbase_secret to receive mined blocks under this address.");
    Ok(())
}

/// Print the resolved configuration
fn print_configuration(config: &Config) -> Result<()> {
    let config_yaml = serde_yaml::to_string(config)?;
    println!("{}", config_yaml);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_printing() {
        assert!(print_configuration(&Config::default()).is_ok());
    }

    #[test]
    fn test_generate_keypair() {
        assert!(generate_and_print_keypair().is_ok());
    }

    #[test]
    fn test_args_parse_mode() {
        let args = Args::try_parse_from(["interlink-node", "--mode", "iot", "--peer", "127.0.0.1:9000"]).unwrap();
        assert_eq!(args.mode, Some(NodeMode::Iot));
        assert_eq!(args.peer.as_deref(), Some("127.0.0.1:9000"));
    }
}
