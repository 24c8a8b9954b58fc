//! CLI and config handling.

use alloy_primitives::{address, Address};
use clap::{ArgAction, Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
pub const DEFAULT_DB_PATH: &str = "circles-index.sqlite";
pub const DEFAULT_V1_HUB: Address = address!("29b9a7fBb8995b2423a71cC17cf9810798F6C543");
pub const DEFAULT_V2_HUB: Address = address!("c12C1E50ABB450d6205Ea2C3Fa861b3B834d13e8");
pub const DEFAULT_NAME_REGISTRY: Address = address!("A27566fD89162cC3D40Cb59c87AAaA49B85F3474");
pub const DEFAULT_STANDARD_TREASURY: Address =
    address!("08F90aB73A515308f03A718257ff9887ED330C6e");
pub const DEFAULT_FETCH_PARALLELISM: usize = 3;
pub const DEFAULT_SINK_QUEUE: usize = 50_000;
pub const DEFAULT_EVENT_BATCH_SIZE: usize = 100_000;
pub const DEFAULT_BLOCK_BATCH_SIZE: usize = 20_000;
pub const DEFAULT_HEAD_POLL_MS: u64 = 1_000;
pub const DEFAULT_NOTIFY_MAX_BLOCKS: u64 = 1_000;
pub const DEFAULT_METRICS_INTERVAL_SECS: u64 = 5;

/// Protocol whose contracts are decoded.
#[derive(ValueEnum, Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DecoderFamily {
    /// Circles v1 hub and personal tokens.
    CrcV1,
    /// Circles v2 hub and ERC20 wrappers.
    CrcV2,
    /// Circles v2 name registry.
    NameRegistry,
    /// Circles v2 standard treasury.
    StandardTreasury,
    /// Metri wallets (Safe proxies, Gnosis Pay).
    Metri,
}

impl DecoderFamily {
    pub const ALL: [DecoderFamily; 5] = [
        DecoderFamily::CrcV1,
        DecoderFamily::CrcV2,
        DecoderFamily::NameRegistry,
        DecoderFamily::StandardTreasury,
        DecoderFamily::Metri,
    ];
}

fn default_receipt_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Circles event indexer configuration.
#[derive(Parser, Debug, Clone, Serialize)]
#[command(name = "circles-indexer", about = "Circles event indexer v0.1")]
pub struct IndexerConfig {
    /// JSON-RPC endpoint of the execution node.
    #[arg(long, env = "CIRCLES_RPC_URL", default_value = DEFAULT_RPC_URL)]
    pub rpc_url: String,
    /// SQLite database file (`:memory:` for a throwaway index).
    #[arg(long, env = "CIRCLES_DB_PATH", default_value = DEFAULT_DB_PATH)]
    pub db_path: PathBuf,
    /// First block indexed when the store is empty.
    #[arg(long, default_value_t = 0)]
    pub start_block: u64,
    /// Decoder families to register.
    #[arg(long, value_enum, value_delimiter = ',', default_values_t = DecoderFamily::ALL)]
    pub decoders: Vec<DecoderFamily>,
    /// Circles v1 hub contract.
    #[arg(long, default_value_t = DEFAULT_V1_HUB)]
    pub v1_hub: Address,
    /// Circles v2 hub contract.
    #[arg(long, default_value_t = DEFAULT_V2_HUB)]
    pub v2_hub: Address,
    /// Circles v2 name registry contract.
    #[arg(long, default_value_t = DEFAULT_NAME_REGISTRY)]
    pub name_registry: Address,
    /// Circles v2 standard treasury contract.
    #[arg(long, default_value_t = DEFAULT_STANDARD_TREASURY)]
    pub standard_treasury: Address,
    /// Concurrent block fetches.
    #[arg(long, default_value_t = DEFAULT_FETCH_PARALLELISM)]
    pub fetch_parallelism: usize,
    /// Concurrent receipt fetches. Defaults to the number of cores.
    #[arg(long, default_value_t = default_receipt_parallelism())]
    pub receipt_parallelism: usize,
    /// Decoded blocks buffered ahead of the sink.
    #[arg(long, default_value_t = DEFAULT_SINK_QUEUE)]
    pub sink_queue: usize,
    /// Buffered events that trigger a sink flush.
    #[arg(long, default_value_t = DEFAULT_EVENT_BATCH_SIZE)]
    pub event_batch_size: usize,
    /// Buffered block records that trigger a block flush.
    #[arg(long, default_value_t = DEFAULT_BLOCK_BATCH_SIZE)]
    pub block_batch_size: usize,
    /// Head polling interval in milliseconds.
    #[arg(long, default_value_t = DEFAULT_HEAD_POLL_MS)]
    pub head_poll_ms: u64,
    /// Largest imported range that still notifies subscribers.
    #[arg(long, default_value_t = DEFAULT_NOTIFY_MAX_BLOCKS)]
    pub notify_max_blocks: u64,
    /// Interval between throughput reports, 0 disables them.
    #[arg(long, default_value_t = DEFAULT_METRICS_INTERVAL_SECS)]
    pub metrics_interval_secs: u64,
    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbosity: u8,
    /// Emit logs as JSON lines.
    #[arg(long, default_value_t = false)]
    pub log_json: bool,
}

impl IndexerConfig {
    /// Parse configuration from CLI args.
    pub fn from_args() -> Self {
        Self::parse()
    }

    pub fn is_enabled(&self, family: DecoderFamily) -> bool {
        self.decoders.contains(&family)
    }
}
