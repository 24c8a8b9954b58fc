//! Indexing throughput counters and the periodic reporter.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Totals updated by the pipeline's sink stage.
#[derive(Debug, Default)]
pub struct ThroughputStats {
    blocks: AtomicU64,
    transactions: AtomicU64,
    logs: AtomicU64,
    events: AtomicU64,
    // block number + 1; zero until the first block
    last_block: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ThroughputSnapshot {
    pub blocks: u64,
    pub transactions: u64,
    pub logs: u64,
    pub events: u64,
    pub last_block: Option<u64>,
}

impl ThroughputStats {
    pub fn record_block(&self, number: u64, transactions: u64, logs: u64, events: u64) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
        self.transactions.fetch_add(transactions, Ordering::Relaxed);
        self.logs.fetch_add(logs, Ordering::Relaxed);
        self.events.fetch_add(events, Ordering::Relaxed);
        self.last_block
            .fetch_max(number.saturating_add(1), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ThroughputSnapshot {
        ThroughputSnapshot {
            blocks: self.blocks.load(Ordering::Relaxed),
            transactions: self.transactions.load(Ordering::Relaxed),
            logs: self.logs.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            last_block: self.last_block.load(Ordering::Relaxed).checked_sub(1),
        }
    }
}

impl ThroughputSnapshot {
    /// Blocks between `head` and the highest indexed block, once both are known.
    pub fn lag_to(&self, head: Option<u64>) -> Option<u64> {
        Some(head?.saturating_sub(self.last_block?))
    }

    /// Per-second growth since `earlier`. `None` for an empty interval.
    pub fn rates_since(
        &self,
        earlier: &ThroughputSnapshot,
        elapsed: Duration,
    ) -> Option<ThroughputRates> {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return None;
        }
        let per_sec = |now: u64, before: u64| now.saturating_sub(before) as f64 / secs;
        Some(ThroughputRates {
            blocks: per_sec(self.blocks, earlier.blocks),
            logs: per_sec(self.logs, earlier.logs),
            events: per_sec(self.events, earlier.events),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputRates {
    pub blocks: f64,
    pub logs: f64,
    pub events: f64,
}

/// Logs throughput and lag to head every `interval` until stopped.
pub fn spawn_metrics_reporter(
    stats: Arc<ThroughputStats>,
    interval: Duration,
    head_rx: watch::Receiver<Option<u64>>,
    mut stop_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut previous = stats.snapshot();
        let mut last_tick = Instant::now();
        loop {
            tokio::select! {
                Ok(()) = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
                () = tokio::time::sleep(interval) => {
                    let current = stats.snapshot();
                    let elapsed = last_tick.elapsed();
                    if current.blocks == previous.blocks {
                        continue;
                    }
                    let Some(rates) = current.rates_since(&previous, elapsed) else {
                        continue;
                    };
                    let head = *head_rx.borrow();
                    tracing::info!(
                        blocks_per_sec = rates.blocks,
                        logs_per_sec = rates.logs,
                        events_per_sec = rates.events,
                        blocks = current.blocks,
                        events = current.events,
                        last_block = ?current.last_block,
                        lag = ?current.lag_to(head),
                        "indexing throughput"
                    );
                    previous = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
