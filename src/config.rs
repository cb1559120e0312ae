//! Configuration management for the node
//!
//! Values come from, in increasing precedence: built-in defaults, a config
//! file (YAML, JSON or TOML), `INTERLINK__SECTION__KEY` environment variables
//! and command line flags.

use crate::consensus::EngineKind;
use crate::core::LevelTargets;
use crate::network::SyncMode;
use crate::storage::RetryPolicy;
use crate::{Error, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for config overrides
pub const ENV_PREFIX: &str = "INTERLINK";

/// Role of this node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeMode {
    /// Mine, keep the whole chain and serve peers
    #[default]
    Full,
    /// Download and validate every block from a full node
    Light,
    /// Trust the head through its superblocks only
    Iot,
}

impl NodeMode {
    /// Sync mode requested from the peer, `None` for full nodes
    pub fn sync_mode(&self) -> Option<SyncMode> {
        match self {
            NodeMode::Full => None,
            NodeMode::Light => Some(SyncMode::Light),
            NodeMode::Iot => Some(SyncMode::Iot),
        }
    }
}

impl fmt::Display for NodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeMode::Full => write!(f, "full"),
            NodeMode::Light => write!(f, "light"),
            NodeMode::Iot => write!(f, "iot"),
        }
    }
}

/// Log output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Compact single-line output
    #[default]
    Plain,
    /// Multi-line human readable output
    Pretty,
    /// One JSON object per line
    Json,
}

/// Command line arguments
#[derive(Parser, Debug, Default)]
#[command(
    name = "interlink-node",
    version,
    about = "Proof-of-work ledger node with interlinked superblocks"
)]
pub struct Args {
    /// Configuration file path (YAML, JSON or TOML)
    #[arg(short, long, value_name = "FILE", env = "INTERLINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Node role
    #[arg(short, long, value_enum)]
    pub mode: Option<NodeMode>,

    /// Address to listen on
    #[arg(long)]
    pub hostname: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Full node to sync from (light and IoT modes)
    #[arg(long, value_name = "HOST:PORT", env = "INTERLINK_PEER")]
    pub peer: Option<String>,

    /// Blocks to mine at startup
    #[arg(short = 'n', long)]
    pub block_number: Option<u64>,

    /// Number of funded demo accounts
    #[arg(long)]
    pub participant_count: Option<usize>,

    /// Leading zero bits required of a block hash
    #[arg(short, long)]
    pub difficulty: Option<u32>,

    /// Extra zero bits per superblock level
    #[arg(long)]
    pub level_shift: Option<u32>,

    /// Seconds between mining rounds
    #[arg(long, value_name = "SECONDS")]
    pub mining_interval: Option<u64>,

    /// Seconds between block broadcasts to peers
    #[arg(long, value_name = "SECONDS")]
    pub broadcast_interval: Option<u64>,

    /// Log level or filter directive
    #[arg(short, long, env = "RUST_LOG")]
    pub log_level: Option<String>,

    /// Log format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Print the resolved configuration and exit
    #[arg(long)]
    pub print_config: bool,

    /// Generate a new key pair and exit
    #[arg(long)]
    pub generate_key: bool,
}

/// Complete node configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity and listening address
    pub node: NodeConfig,
    /// Consensus parameters
    pub chain: ChainConfig,
    /// Block production
    pub mining: MiningConfig,
    /// Peer sync
    pub network: NetworkConfig,
    /// Persistence
    pub storage: StorageConfig,
    /// Log output
    pub logging: LoggingConfig,
}

/// Identity and listening address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node role
    pub mode: NodeMode,
    /// Address to listen on
    pub hostname: String,
    /// Port to listen on
    pub port: u16,
    /// Hex secret key of the coinbase account, random when unset
    pub coinbase_secret: Option<String>,
}

/// Consensus parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Consensus engine
    pub engine: EngineKind,
    /// Leading zero bits of the level 0 target
    pub difficulty: u32,
    /// Extra zero bits for each level above 0
    pub level_shift: u32,
}

/// Block production
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    /// Whether a full node mines at all
    pub enabled: bool,
    /// Blocks to mine at startup
    pub block_number: u64,
    /// Funded demo accounts, also the largest transaction size generated
    pub participant_count: usize,
    /// Demo balance for each account
    pub initial_balance: u64,
    /// Demo transactions queued before each round
    pub demo_transactions: usize,
    /// Seconds between mining rounds
    pub interval_secs: u64,
    /// Nonces tried between cancellation checks
    pub check_interval: u64,
}

/// Peer sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Full node to sync from
    pub peer: Option<String>,
    /// Seconds between block broadcasts
    pub broadcast_interval_secs: u64,
}

/// Persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Attempts per storage operation before giving up
    pub retry_attempts: usize,
    /// First retry delay in milliseconds
    pub retry_base_delay_ms: u64,
    /// Largest retry delay in milliseconds
    pub retry_max_delay_ms: u64,
}

/// Log output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level or `EnvFilter` directive
    pub level: String,
    /// Output format
    pub format: LogFormat,
    /// Also write to this file
    pub file: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            mode: NodeMode::default(),
            hostname: default_hostname(),
            port: default_port(),
            coinbase_secret: None,
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            difficulty: default_difficulty(),
            level_shift: default_level_shift(),
        }
    }
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            block_number: 0,
            participant_count: default_participant_count(),
            initial_balance: default_initial_balance(),
            demo_transactions: default_demo_transactions(),
            interval_secs: default_mining_interval(),
            check_interval: default_check_interval(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            peer: None,
            broadcast_interval_secs: default_broadcast_interval(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

impl Config {
    /// Resolve the configuration for `args` and validate it
    pub fn load(args: &Args) -> Result<Self> {
        let mut config = Self::from_sources(args.config.as_deref())?;
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    /// Read the optional file and environment overrides
    pub fn from_sources(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Overlay flags given on the command line
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(mode) = args.mode {
            self.node.mode = mode;
        }
        if let Some(hostname) = &args.hostname {
            self.node.hostname = hostname.clone();
        }
        if let Some(port) = args.port {
            self.node.port = port;
        }
        if let Some(peer) = &args.peer {
            self.network.peer = Some(peer.clone());
        }
        if let Some(block_number) = args.block_number {
            self.mining.block_number = block_number;
        }
        if let Some(count) = args.participant_count {
            self.mining.participant_count = count;
        }
        if let Some(difficulty) = args.difficulty {
            self.chain.difficulty = difficulty;
        }
        if let Some(shift) = args.level_shift {
            self.chain.level_shift = shift;
        }
        if let Some(secs) = args.mining_interval {
            self.mining.interval_secs = secs;
        }
        if let Some(secs) = args.broadcast_interval {
            self.network.broadcast_interval_secs = secs;
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if let Some(format) = args.log_format {
            self.logging.format = format;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.mining.interval_secs == 0 {
            return Err(Error::config("Mining interval must be greater than 0"));
        }
        if self.network.broadcast_interval_secs == 0 {
            return Err(Error::config("Broadcast interval must be greater than 0"));
        }
        if self.mining.check_interval == 0 {
            return Err(Error::config("Mining check interval must be greater than 0"));
        }

        if self.chain.difficulty >= 256 {
            return Err(Error::config("Difficulty must be below 256 bits"));
        }
        self.levels()?;

        if self.mining.demo_transactions > 0 && self.mining.participant_count < 2 {
            return Err(Error::config("Demo transactions need at least 2 participants"));
        }
        if self.storage.retry_attempts == 0 {
            return Err(Error::config("Storage retry attempts must be greater than 0"));
        }

        if let Some(secret) = &self.node.coinbase_secret {
            crate::crypto::Keypair::from_secret_hex(secret)
                .map_err(|e| Error::config(format!("Invalid coinbase secret: {}", e)))?;
        }

        if self.node.mode != NodeMode::Full {
            if self.network.peer.is_none() {
                return Err(Error::config(format!("{} mode needs a peer to sync from", self.node.mode)));
            }
            self.peer_addr()?;
        }
        self.bind_addr()?;

        Ok(())
    }

    /// Superblock target table
    pub fn levels(&self) -> Result<LevelTargets> {
        LevelTargets::from_difficulty_bits(self.chain.difficulty, self.chain.level_shift)
            .map_err(|e| Error::config(format!("Invalid level targets: {}", e)))
    }

    /// Address to listen on
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        resolve(&self.node.hostname, self.node.port)
    }

    /// Address of the peer to sync from
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        let peer = self
            .network
            .peer
            .as_deref()
            .ok_or_else(|| Error::config("No peer configured"))?;
        peer.to_socket_addrs()
            .map_err(|e| Error::config(format!("Invalid peer address {}: {}", peer, e)))?
            .next()
            .ok_or_else(|| Error::config(format!("Peer address {} did not resolve", peer)))
    }

    /// Storage retry policy
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.storage.retry_attempts,
            Duration::from_millis(self.storage.retry_base_delay_ms),
            Duration::from_millis(self.storage.retry_max_delay_ms),
        )
    }

    /// Time between mining rounds
    pub fn mining_interval(&self) -> Duration {
        Duration::from_secs(self.mining.interval_secs)
    }

    /// Time between broadcasts
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.network.broadcast_interval_secs)
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::config(format!("Invalid address {}:{}: {}", host, port, e)))?
        .next()
        .ok_or_else(|| Error::config(format!("Address {}:{} did not resolve", host, port)))
}

// Default value functions for serde
fn default_hostname() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 9000 }
fn default_difficulty() -> u32 { 16 }
fn default_level_shift() -> u32 { 1 }
fn default_participant_count() -> usize { 10 }
fn default_initial_balance() -> u64 { 1_000_000 }
fn default_demo_transactions() -> usize { 4 }
fn default_mining_interval() -> u64 { 5 }
fn default_check_interval() -> u64 { crate::miner::DEFAULT_CHECK_INTERVAL }
fn default_broadcast_interval() -> u64 { 5 }
fn default_retry_attempts() -> usize { 5 }
fn default_retry_base_delay() -> u64 { 100 }
fn default_retry_max_delay() -> u64 { 5000 }
fn default_log_level() -> String { "info".to_string() }
