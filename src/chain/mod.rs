//! Chain data types and the provider contract.

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Log entry as emitted by a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub log_index: u32,
}

impl RawLog {
    /// Event signature hash, if the log has one.
    pub fn topic0(&self) -> Option<B256> {
        self.topics.first().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub hash: B256,
    pub index: u32,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: B256,
    pub transaction_index: u32,
    pub logs: Vec<RawLog>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn transaction(&self, index: u32) -> Option<&Transaction> {
        match self.transactions.get(index as usize) {
            Some(tx) if tx.index == index => Some(tx),
            _ => self.transactions.iter().find(|tx| tx.index == index),
        }
    }
}

/// A block together with its receipts.
#[derive(Debug, Clone)]
pub struct BlockWithReceipts {
    pub block: Block,
    pub receipts: Vec<Receipt>,
}

impl BlockWithReceipts {
    pub fn log_count(&self) -> u64 {
        self.receipts
            .iter()
            .map(|receipt| receipt.logs.len() as u64)
            .sum()
    }
}

/// Supplier of blocks, receipts and chain heads.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// Returns `None` when the block is not (yet) available.
    async fn block_by_number(&self, number: u64) -> Result<Option<Block>>;

    /// Receipts for every transaction of `block`, in transaction order.
    async fn receipts(&self, block: &Block) -> Result<Vec<Receipt>>;

    /// Current chain head.
    async fn head_number(&self) -> Result<u64>;
}

/// Handles returned from spawning the head tracker.
pub struct HeadTrackerHandles {
    pub handle: JoinHandle<()>,
    pub head_rx: watch::Receiver<Option<u64>>,
}

/// Polls the provider and publishes every head change, including moves backwards.
pub fn spawn_head_tracker(
    provider: Arc<dyn ChainProvider>,
    poll: Duration,
    mut stop_rx: watch::Receiver<bool>,
) -> HeadTrackerHandles {
    let (head_tx, head_rx) = watch::channel(None);
    let handle = tokio::spawn(async move {
        let mut last_head: Option<u64> = None;
        loop {
            if *stop_rx.borrow() {
                break;
            }
            match provider.head_number().await {
                Ok(head) if last_head != Some(head) => {
                    tracing::debug!(head, previous = ?last_head, "new chain head");
                    last_head = Some(head);
                    if head_tx.send(Some(head)).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "head tracker: failed to fetch chain head");
                }
            }
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                () = tokio::time::sleep(poll) => {}
            }
        }
    });

    HeadTrackerHandles { handle, head_rx }
}
