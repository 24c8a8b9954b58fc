use crate::chain::{Block, ChainProvider, RawLog, Receipt, Transaction};
use crate::cli::{
    DecoderFamily, IndexerConfig, DEFAULT_BLOCK_BATCH_SIZE, DEFAULT_EVENT_BATCH_SIZE,
    DEFAULT_FETCH_PARALLELISM, DEFAULT_NAME_REGISTRY, DEFAULT_NOTIFY_MAX_BLOCKS, DEFAULT_RPC_URL,
    DEFAULT_STANDARD_TREASURY, DEFAULT_V1_HUB, DEFAULT_V2_HUB,
};
use crate::decode::events::{CrcV1Transfer, DomainEvent, EventMeta};
use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use eyre::{eyre, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time moves forward")
        .as_nanos();
    let suffix = COUNTER.fetch_add(1, Ordering::SeqCst);
    let mut path = std::env::temp_dir();
    path.push(format!(
        "circles-indexer-{prefix}-test-{now}-{}-{suffix}",
        std::process::id()
    ));
    path
}

pub fn base_config(db_path: PathBuf) -> IndexerConfig {
    IndexerConfig {
        rpc_url: DEFAULT_RPC_URL.to_string(),
        db_path,
        start_block: 0,
        decoders: DecoderFamily::ALL.to_vec(),
        v1_hub: DEFAULT_V1_HUB,
        v2_hub: DEFAULT_V2_HUB,
        name_registry: DEFAULT_NAME_REGISTRY,
        standard_treasury: DEFAULT_STANDARD_TREASURY,
        fetch_parallelism: DEFAULT_FETCH_PARALLELISM,
        receipt_parallelism: 4,
        sink_queue: 64,
        event_batch_size: DEFAULT_EVENT_BATCH_SIZE,
        block_batch_size: DEFAULT_BLOCK_BATCH_SIZE,
        head_poll_ms: 5,
        notify_max_blocks: DEFAULT_NOTIFY_MAX_BLOCKS,
        metrics_interval_secs: 0,
        verbosity: 0,
        log_json: false,
    }
}

pub fn tx_hash(index: u32) -> B256 {
    let mut hash = B256::repeat_byte(0x7a);
    hash[28..].copy_from_slice(&index.to_be_bytes());
    hash
}

pub fn block_hash(number: u64, fork: u8) -> B256 {
    let mut hash = B256::ZERO;
    hash[0] = fork;
    hash[24..].copy_from_slice(&number.to_be_bytes());
    hash
}

pub fn block(number: u64, timestamp: u64) -> Block {
    Block {
        number,
        hash: block_hash(number, 0),
        parent_hash: block_hash(number.saturating_sub(1), 0),
        timestamp,
        transactions: Vec::new(),
    }
}

pub fn transaction(index: u32, from: Address, to: Option<Address>) -> Transaction {
    Transaction {
        hash: tx_hash(index),
        index,
        from,
        to,
        value: U256::ZERO,
        input: Bytes::new(),
    }
}

pub fn receipt(index: u32, logs: Vec<RawLog>) -> Receipt {
    Receipt {
        transaction_hash: tx_hash(index),
        transaction_index: index,
        logs,
    }
}

pub fn log(index: u32, address: Address, topics: Vec<B256>, data: Vec<u8>) -> RawLog {
    RawLog {
        address,
        topics,
        data: Bytes::from(data),
        log_index: index,
    }
}

pub fn address_topic(address: Address) -> B256 {
    address.into_word()
}

pub fn uint_topic(value: u64) -> B256 {
    B256::from(U256::from(value).to_be_bytes::<32>())
}

pub fn address_word(address: Address) -> Vec<u8> {
    address.into_word().to_vec()
}

pub fn uint_word(value: u64) -> Vec<u8> {
    U256::from(value).to_be_bytes::<32>().to_vec()
}

pub fn uint_words(values: &[u64]) -> Vec<u8> {
    values.iter().flat_map(|value| uint_word(*value)).collect()
}

/// ABI value used to build log payloads in tests.
#[derive(Debug, Clone)]
pub enum AbiToken {
    Uint(u64),
    Address(Address),
    Bytes(Vec<u8>),
    String(String),
    Uints(Vec<u64>),
    Addresses(Vec<Address>),
}

impl AbiToken {
    fn is_dynamic(&self) -> bool {
        !matches!(self, AbiToken::Uint(_) | AbiToken::Address(_))
    }

    fn tail(&self) -> Vec<u8> {
        match self {
            AbiToken::Bytes(bytes) => padded_bytes(bytes),
            AbiToken::String(value) => padded_bytes(value.as_bytes()),
            AbiToken::Uints(values) => {
                let mut out = uint_word(values.len() as u64);
                out.extend(uint_words(values));
                out
            }
            AbiToken::Addresses(addresses) => {
                let mut out = uint_word(addresses.len() as u64);
                for address in addresses {
                    out.extend(address_word(*address));
                }
                out
            }
            AbiToken::Uint(_) | AbiToken::Address(_) => Vec::new(),
        }
    }
}

fn padded_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = uint_word(bytes.len() as u64);
    out.extend_from_slice(bytes);
    let rem = bytes.len() % 32;
    if rem != 0 {
        out.extend(std::iter::repeat(0u8).take(32 - rem));
    }
    out
}

/// Standard head/tail encoding of a tuple.
pub fn abi_encode(tokens: &[AbiToken]) -> Vec<u8> {
    let head_len = tokens.len() * 32;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();
    for token in tokens {
        match token {
            AbiToken::Uint(value) => head.extend(uint_word(*value)),
            AbiToken::Address(address) => head.extend(address_word(*address)),
            dynamic => {
                debug_assert!(dynamic.is_dynamic());
                head.extend(uint_word((head_len + tail.len()) as u64));
                tail.extend(dynamic.tail());
            }
        }
    }
    head.extend(tail);
    head
}

pub fn encode_uint_arrays(first: &[u64], second: &[u64]) -> Vec<u8> {
    abi_encode(&[
        AbiToken::Uints(first.to_vec()),
        AbiToken::Uints(second.to_vec()),
    ])
}

pub fn encode_strings(values: &[&str]) -> Vec<u8> {
    let tokens: Vec<_> = values
        .iter()
        .map(|value| AbiToken::String((*value).to_string()))
        .collect();
    abi_encode(&tokens)
}

/// A decoded v1 token transfer at the given position.
pub fn transfer_event(block_number: u64, tx_index: u32, log_index: u32, amount: u64) -> DomainEvent {
    DomainEvent::new(
        EventMeta {
            block_number,
            timestamp: block_number * 5,
            transaction_index: tx_index,
            log_index,
            batch_index: None,
            transaction_hash: tx_hash(tx_index),
        },
        CrcV1Transfer {
            token_address: Address::repeat_byte(0x42),
            from: Address::repeat_byte(0xaa),
            to: Address::repeat_byte(0xbb),
            amount: U256::from(amount),
        },
    )
}

#[derive(Default)]
struct MemoryChainState {
    head: u64,
    blocks: BTreeMap<u64, (Block, Vec<Receipt>)>,
    failing_receipts: HashSet<u64>,
    block_requests: u64,
    block_delay: Duration,
}

/// In-process chain used by provider, pipeline and state machine tests.
#[derive(Default)]
pub struct MemoryChain {
    state: Mutex<MemoryChainState>,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().head = head;
    }

    pub fn insert(&self, block: Block, receipts: Vec<Receipt>) {
        self.state
            .lock()
            .blocks
            .insert(block.number, (block, receipts));
    }

    /// Inserts empty blocks for every number in `range` and moves the head to its end.
    pub fn extend_empty(&self, range: std::ops::RangeInclusive<u64>) {
        let end = *range.end();
        for number in range {
            self.insert(block(number, number * 5), Vec::new());
        }
        self.set_head(end);
    }

    pub fn fail_receipts(&self, number: u64) {
        self.state.lock().failing_receipts.insert(number);
    }

    pub fn heal_receipts(&self, number: u64) {
        self.state.lock().failing_receipts.remove(&number);
    }

    pub fn block_requests(&self) -> u64 {
        self.state.lock().block_requests
    }

    /// Makes every block lookup take at least `delay`.
    pub fn set_block_delay(&self, delay: Duration) {
        self.state.lock().block_delay = delay;
    }
}

#[async_trait]
impl ChainProvider for MemoryChain {
    async fn block_by_number(&self, number: u64) -> Result<Option<Block>> {
        let delay = {
            let mut state = self.state.lock();
            state.block_requests += 1;
            state.block_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .state
            .lock()
            .blocks
            .get(&number)
            .map(|(block, _)| block.clone()))
    }

    async fn receipts(&self, block: &Block) -> Result<Vec<Receipt>> {
        let state = self.state.lock();
        if state.failing_receipts.contains(&block.number) {
            return Err(eyre!("receipts unavailable for block {}", block.number));
        }
        state
            .blocks
            .get(&block.number)
            .map(|(_, receipts)| receipts.clone())
            .ok_or_else(|| eyre!("unknown block {}", block.number))
    }

    async fn head_number(&self) -> Result<u64> {
        Ok(self.state.lock().head)
    }
}
