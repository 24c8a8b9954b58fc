//! Reorg-safe sync state machine.
//!
//! A single driver task pops inputs from a work queue and applies them to the current state.
//! Every start goes through `Initial`, which derives the resume point from storage and truncates
//! from there, so restarting after a crash or a clean shutdown is always safe.

use super::pipeline::{run_pipeline, PipelineConfig, PipelineDeps};
use super::sink::{BatchingSink, SinkConfig};
use crate::cli::IndexerConfig;
use crate::decode::events::{Value, COL_BLOCK_NUMBER};
use crate::decode::{AddressClass, EventType};
use crate::storage::{EventStore, FilterOp, Query};
use eyre::{eyre, Result};
use rand::Rng;
use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace, warn};

const NOTIFY_CAPACITY: usize = 64;

/// Persisted events whose addresses feed the discovered address set.
const DISCOVERY_SOURCES: [(EventType, &str, AddressClass); 4] = [
    (EventType::CrcV1Signup, "token", AddressClass::CrcV1Token),
    (
        EventType::CrcV2Erc20WrapperDeployed,
        "erc20Wrapper",
        AddressClass::Erc20Wrapper,
    ),
    (EventType::MetriProxyCreation, "proxy", AddressClass::SafeProxy),
    (
        EventType::MetriModuleProxyCreation,
        "proxy",
        AddressClass::PayDelayModule,
    ),
];

fn block_count(range: &RangeInclusive<u64>) -> u64 {
    range.end().saturating_sub(*range.start()).saturating_add(1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    New,
    Initial,
    Reorg { at: u64 },
    WaitForNewBlock,
    Syncing { head: u64 },
    NotifySubscribers { range: Option<RangeInclusive<u64>> },
    Error,
    End,
}

#[derive(Debug)]
enum Input {
    Enter(SyncState),
    NewHead(u64),
}

/// Retry delay: `unit × errors²`, plus random jitter. The oldest recorded error is dropped while
/// the base delay exceeds `ceiling`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub unit: Duration,
    pub ceiling: Duration,
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            unit: Duration::from_millis(1_000),
            ceiling: Duration::from_millis(60_000),
            jitter: Duration::from_millis(1_000),
        }
    }
}

impl BackoffPolicy {
    fn base_delay(&self, errors: &mut VecDeque<String>) -> Duration {
        loop {
            let count = errors.len() as u32;
            let delay = self.unit.saturating_mul(count.saturating_mul(count));
            if delay <= self.ceiling || errors.len() <= 1 {
                return delay;
            }
            errors.pop_front();
        }
    }

    fn jitter(&self) -> Duration {
        let max = self.jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MachineConfig {
    pub start_block: u64,
    pub notify_max_blocks: u64,
    pub pipeline: PipelineConfig,
    pub sink: SinkConfig,
    pub backoff: BackoffPolicy,
}

impl From<&IndexerConfig> for MachineConfig {
    fn from(config: &IndexerConfig) -> Self {
        Self {
            start_block: config.start_block,
            notify_max_blocks: config.notify_max_blocks,
            pipeline: PipelineConfig::from(config),
            sink: SinkConfig::new(config.event_batch_size, config.block_batch_size),
            backoff: BackoffPolicy::default(),
        }
    }
}

pub struct StateMachine {
    store: Arc<dyn EventStore>,
    deps: PipelineDeps,
    sink: BatchingSink,
    config: MachineConfig,
    errors: VecDeque<String>,
    queue: VecDeque<Input>,
    state_tx: watch::Sender<SyncState>,
    notify_tx: broadcast::Sender<RangeInclusive<u64>>,
    stop_rx: watch::Receiver<bool>,
}

impl StateMachine {
    pub fn new(
        store: Arc<dyn EventStore>,
        deps: PipelineDeps,
        config: MachineConfig,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        let sink = BatchingSink::new(Arc::clone(&store), config.sink);
        let (state_tx, _) = watch::channel(SyncState::New);
        let (notify_tx, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            store,
            deps,
            sink,
            config,
            errors: VecDeque::new(),
            queue: VecDeque::new(),
            state_tx,
            notify_tx,
            stop_rx,
        }
    }

    /// Inclusive ranges of newly imported blocks.
    pub fn subscribe(&self) -> broadcast::Receiver<RangeInclusive<u64>> {
        self.notify_tx.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> SyncState {
        self.state_tx.borrow().clone()
    }

    #[cfg(test)]
    pub fn recorded_errors(&self) -> usize {
        self.errors.len()
    }

    fn stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }

    fn enter(&self, state: SyncState) {
        trace!(state = ?state, "entering sync state");
        self.state_tx.send_replace(state);
    }

    /// Drives the machine until the stop signal or the end of the head stream, then flushes.
    pub async fn run(&mut self, mut head_rx: watch::Receiver<Option<u64>>) -> Result<()> {
        self.queue.push_back(Input::Enter(SyncState::Initial));
        loop {
            while let Some(input) = self.queue.pop_front() {
                if self.stopped() {
                    self.queue.clear();
                    break;
                }
                match self.step(input, &mut head_rx).await {
                    Ok(Some(next)) => self.queue.push_back(next),
                    Ok(None) => {}
                    Err(err) => {
                        let message = format!("{err:#}");
                        warn!(state = ?self.state(), error = %message, "sync transition failed");
                        self.errors.push_back(message);
                        self.sink.clear();
                        self.queue.push_back(Input::Enter(SyncState::Error));
                    }
                }
            }
            if self.stopped() {
                break;
            }

            tokio::select! {
                changed = head_rx.changed() => {
                    if changed.is_err() {
                        warn!("head stream closed");
                        break;
                    }
                    let head = *head_rx.borrow_and_update();
                    if let Some(head) = head {
                        self.queue.push_back(Input::NewHead(head));
                    }
                }
                Ok(()) = self.stop_rx.changed() => {}
            }
        }

        let summary = self.sink.flush_blocks().await;
        self.enter(SyncState::End);
        info!(rows = summary.rows, "sync state machine stopped");
        if !summary.is_clean() {
            return Err(eyre!(
                "final flush failed for {}",
                summary.failed.join(", ")
            ));
        }
        Ok(())
    }

    async fn step(
        &mut self,
        input: Input,
        head_rx: &mut watch::Receiver<Option<u64>>,
    ) -> Result<Option<Input>> {
        let state = match input {
            Input::NewHead(head) => return self.on_new_head(head).await,
            Input::Enter(state) => state,
        };
        self.enter(state.clone());

        let next = match state {
            SyncState::New | SyncState::End => None,
            SyncState::Initial => {
                let at = self.resume_point().await?;
                self.warm_up(at).await?;
                info!(block = at, "resuming sync");
                Some(SyncState::Reorg { at })
            }
            SyncState::Reorg { at } => {
                let deleted = self.store.delete_from_block(at).await?;
                info!(block = at, rows = deleted, "truncated history");
                Some(SyncState::WaitForNewBlock)
            }
            SyncState::WaitForNewBlock => {
                if matches!(head_rx.has_changed(), Ok(true)) {
                    let head = *head_rx.borrow_and_update();
                    if let Some(head) = head {
                        return Ok(Some(Input::NewHead(head)));
                    }
                }
                None
            }
            SyncState::Syncing { head } => {
                let range = self.sync_to(head).await?;
                self.errors.clear();
                Some(SyncState::NotifySubscribers { range })
            }
            SyncState::NotifySubscribers { range } => {
                if let Some(range) = range {
                    self.notify(range);
                }
                Some(SyncState::WaitForNewBlock)
            }
            SyncState::Error => {
                if self.back_off().await {
                    Some(SyncState::Initial)
                } else {
                    None
                }
            }
        };
        Ok(next.map(Input::Enter))
    }

    async fn on_new_head(&mut self, head: u64) -> Result<Option<Input>> {
        if self.state() != SyncState::WaitForNewBlock {
            debug!(head, "ignoring head outside of WaitForNewBlock");
            return Ok(None);
        }
        let latest = self.store.latest_block().await?;
        match latest {
            Some(latest) if head <= latest => {
                warn!(head, latest, "chain head at or below committed block; reorganizing");
                Ok(Some(Input::Enter(SyncState::Reorg { at: head })))
            }
            _ => Ok(Some(Input::Enter(SyncState::Syncing { head }))),
        }
    }

    /// Earliest of the first gap and the latest committed block; `start_block` on an empty store.
    async fn resume_point(&self) -> Result<u64> {
        let latest = self.store.latest_block().await?;
        let gap = self.store.first_gap().await?;
        Ok(match (gap, latest) {
            (Some(gap), Some(latest)) => gap.min(latest),
            (Some(gap), None) => gap,
            (None, Some(latest)) => latest,
            (None, None) => self.config.start_block,
        })
    }

    /// Restores discovered addresses from events persisted below `below`; later rows are about to
    /// be truncated and replayed.
    async fn warm_up(&self, below: u64) -> Result<()> {
        for (event_type, column, class) in DISCOVERY_SOURCES {
            let descriptor = event_type.descriptor();
            let index = descriptor.column_index(column).ok_or_else(|| {
                eyre!("missing column {column} in {}", descriptor.qualified_name())
            })?;
            let query = Query::new(descriptor).filter(
                COL_BLOCK_NUMBER,
                FilterOp::LessThan,
                Value::Int(below),
            );
            let rows = self.store.read(&query).await?;
            let added = self.deps.discovered.extend(
                class,
                rows.iter().filter_map(|row| match row.get(index) {
                    Some(Value::Address(address)) => Some(*address),
                    _ => None,
                }),
            );
            if added > 0 {
                debug!(table = %descriptor.qualified_name(), added, "restored discovered addresses");
            }
        }
        Ok(())
    }

    async fn sync_to(&mut self, head: u64) -> Result<Option<RangeInclusive<u64>>> {
        let from = self
            .store
            .latest_block()
            .await?
            .map_or(self.config.start_block, |latest| latest.saturating_add(1))
            .max(self.config.start_block);
        if from > head {
            return Ok(None);
        }
        info!(range_start = from, range_end = head, "syncing blocks");
        run_pipeline(
            from..=head,
            &self.deps,
            &mut self.sink,
            self.config.pipeline,
            self.stop_rx.clone(),
        )
        .await
    }

    fn notify(&self, range: RangeInclusive<u64>) {
        let blocks = block_count(&range);
        if blocks > self.config.notify_max_blocks {
            warn!(
                range_start = *range.start(),
                range_end = *range.end(),
                blocks,
                "imported range too large; skipping notification"
            );
            return;
        }
        match self.notify_tx.send(range) {
            Ok(subscribers) => debug!(subscribers, blocks, "notified subscribers"),
            Err(_) => trace!("no subscribers for imported range"),
        }
    }

    /// Sleeps for the backoff delay. Returns `false` if stopped meanwhile.
    async fn back_off(&mut self) -> bool {
        let base = self.config.backoff.base_delay(&mut self.errors);
        let delay = base + self.config.backoff.jitter();
        warn!(
            errors = self.errors.len(),
            delay_ms = delay.as_millis() as u64,
            last_error = self.errors.back().map(String::as_str),
            "backing off before retry"
        );
        let mut stop_rx = self.stop_rx.clone();
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            Ok(()) = stop_rx.changed() => {}
        }
        !self.stopped()
    }
}
