//! Event decoders.
//!
//! Each decoder family covers one monitored protocol and exposes a per-transaction hook (events
//! reconstructed from call-data or value transfers) and a per-log hook keyed by emitting address
//! and first topic. Every registered decoder sees every log; unknown combinations yield nothing.

pub mod abi;
pub mod discovered;
pub mod error;
pub mod events;

mod crc_v1;
mod crc_v2;
mod metri;
mod name_registry;
mod treasury;

pub use crc_v1::CrcV1Decoder;
pub use crc_v2::CrcV2Decoder;
pub use discovered::{AddressClass, DiscoveredAddresses};
pub use error::DecodeResult;
pub use events::{DomainEvent, EventMeta, EventType};
pub use metri::MetriDecoder;
pub use name_registry::NameRegistryDecoder;
pub use treasury::StandardTreasuryDecoder;

use crate::chain::{Block, Receipt, RawLog, Transaction};
use crate::cli::{DecoderFamily, IndexerConfig};
use alloy_primitives::{keccak256, B256};
use std::collections::HashSet;

pub(crate) fn event_topic(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

pub(crate) fn function_selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Everything a log decoder may look at.
#[derive(Debug, Clone, Copy)]
pub struct LogContext<'a> {
    pub block: &'a Block,
    pub receipt: &'a Receipt,
    pub log: &'a RawLog,
    pub discovered: &'a DiscoveredAddresses,
}

impl<'a> LogContext<'a> {
    pub fn meta(&self) -> EventMeta {
        self.meta_for(self.log)
    }

    /// Meta for a sibling log of the same receipt.
    pub fn meta_for(&self, log: &RawLog) -> EventMeta {
        EventMeta {
            block_number: self.block.number,
            timestamp: self.block.timestamp,
            transaction_index: self.receipt.transaction_index,
            log_index: log.log_index,
            batch_index: None,
            transaction_hash: self.receipt.transaction_hash,
        }
    }

    pub fn sibling(&self, log: &'a RawLog) -> LogContext<'a> {
        LogContext { log, ..*self }
    }
}

/// Event meta for events reconstructed from a transaction rather than a log.
///
/// These events take log index 0, so they share their position with the transaction's first log
/// and with each other. Identity is keyed per event type, which keeps them apart; within one
/// position they keep decode order (logs first, then the transaction hook).
pub fn transaction_meta(block: &Block, tx: &Transaction) -> EventMeta {
    EventMeta {
        block_number: block.number,
        timestamp: block.timestamp,
        transaction_index: tx.index,
        log_index: 0,
        batch_index: None,
        transaction_hash: tx.hash,
    }
}

pub trait EventDecoder {
    fn parse_transaction(
        &self,
        _block: &Block,
        _tx: &Transaction,
        _discovered: &DiscoveredAddresses,
    ) -> DecodeResult<Vec<DomainEvent>> {
        Ok(Vec::new())
    }

    fn parse_log(&self, ctx: &LogContext<'_>) -> DecodeResult<Vec<DomainEvent>>;
}

/// Closed set of decoder families.
#[derive(Debug, Clone)]
pub enum Decoder {
    CrcV1(CrcV1Decoder),
    CrcV2(CrcV2Decoder),
    NameRegistry(NameRegistryDecoder),
    StandardTreasury(StandardTreasuryDecoder),
    Metri(MetriDecoder),
}

impl Decoder {
    pub fn name(&self) -> &'static str {
        match self {
            Decoder::CrcV1(_) => "crc_v1",
            Decoder::CrcV2(_) => "crc_v2",
            Decoder::NameRegistry(_) => "name_registry",
            Decoder::StandardTreasury(_) => "standard_treasury",
            Decoder::Metri(_) => "metri",
        }
    }
}

impl EventDecoder for Decoder {
    fn parse_transaction(
        &self,
        block: &Block,
        tx: &Transaction,
        discovered: &DiscoveredAddresses,
    ) -> DecodeResult<Vec<DomainEvent>> {
        match self {
            Decoder::CrcV1(decoder) => decoder.parse_transaction(block, tx, discovered),
            Decoder::CrcV2(decoder) => decoder.parse_transaction(block, tx, discovered),
            Decoder::NameRegistry(decoder) => decoder.parse_transaction(block, tx, discovered),
            Decoder::StandardTreasury(decoder) => decoder.parse_transaction(block, tx, discovered),
            Decoder::Metri(decoder) => decoder.parse_transaction(block, tx, discovered),
        }
    }

    fn parse_log(&self, ctx: &LogContext<'_>) -> DecodeResult<Vec<DomainEvent>> {
        match self {
            Decoder::CrcV1(decoder) => decoder.parse_log(ctx),
            Decoder::CrcV2(decoder) => decoder.parse_log(ctx),
            Decoder::NameRegistry(decoder) => decoder.parse_log(ctx),
            Decoder::StandardTreasury(decoder) => decoder.parse_log(ctx),
            Decoder::Metri(decoder) => decoder.parse_log(ctx),
        }
    }
}

/// The registered decoders, applied to whole blocks.
#[derive(Debug, Clone, Default)]
pub struct DecoderSet {
    decoders: Vec<Decoder>,
}

impl DecoderSet {
    #[cfg(test)]
    pub fn new(decoders: Vec<Decoder>) -> Self {
        Self { decoders }
    }

    /// Registers every enabled family, bound to its configured contract address.
    pub fn from_config(config: &IndexerConfig) -> Self {
        let decoders = DecoderFamily::ALL
            .into_iter()
            .filter(|family| config.is_enabled(*family))
            .map(|family| match family {
                DecoderFamily::CrcV1 => Decoder::CrcV1(CrcV1Decoder::new(config.v1_hub)),
                DecoderFamily::CrcV2 => Decoder::CrcV2(CrcV2Decoder::new(config.v2_hub)),
                DecoderFamily::NameRegistry => {
                    Decoder::NameRegistry(NameRegistryDecoder::new(config.name_registry))
                }
                DecoderFamily::StandardTreasury => Decoder::StandardTreasury(
                    StandardTreasuryDecoder::new(config.standard_treasury),
                ),
                DecoderFamily::Metri => Decoder::Metri(MetriDecoder::gnosis()),
            })
            .collect();
        Self { decoders }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.decoders.iter().map(Decoder::name).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decodes all logs and transactions of one block.
    ///
    /// Receipts are visited in transaction order and logs in ascending log index, so an address
    /// discovered by an earlier log is visible to later logs of the same receipt. The result is
    /// de-duplicated by variant and identity and ordered by
    /// `(transactionIndex, logIndex, batchIndex)`.
    pub fn decode_block(
        &self,
        block: &Block,
        receipts: &[Receipt],
        discovered: &DiscoveredAddresses,
    ) -> DecodeResult<Vec<DomainEvent>> {
        let mut ordered: Vec<&Receipt> = receipts.iter().collect();
        ordered.sort_by_key(|receipt| receipt.transaction_index);

        let mut events = Vec::new();
        for receipt in ordered {
            let mut logs: Vec<&RawLog> = receipt.logs.iter().collect();
            logs.sort_by_key(|log| log.log_index);
            for log in logs {
                let ctx = LogContext {
                    block,
                    receipt,
                    log,
                    discovered,
                };
                for decoder in &self.decoders {
                    events.extend(decoder.parse_log(&ctx)?);
                }
            }
            if let Some(tx) = block.transaction(receipt.transaction_index) {
                for decoder in &self.decoders {
                    events.extend(decoder.parse_transaction(block, tx, discovered)?);
                }
            }
        }

        let mut seen = HashSet::with_capacity(events.len());
        events.retain(|event| seen.insert((event.event_type(), event.identity())));
        events.sort_by_key(DomainEvent::position);
        Ok(events)
    }
}
