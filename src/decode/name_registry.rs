//! Circles name registry decoder.

use super::abi::{topic_address, AbiReader};
use super::error::DecodeResult;
use super::events::{CrcV2CidV0, CrcV2RegisterShortName, CrcV2UpdateMetadataDigest, DomainEvent};
use super::{event_topic, EventDecoder, LogContext};
use alloy_primitives::{Address, B256};

#[derive(Debug, Clone)]
pub struct NameRegistryDecoder {
    registry: Address,
    register_short_name: B256,
    update_metadata_digest: B256,
    cid_v0: B256,
}

impl NameRegistryDecoder {
    pub fn new(registry: Address) -> Self {
        Self {
            registry,
            register_short_name: event_topic("RegisterShortName(address,uint72,uint256)"),
            update_metadata_digest: event_topic("UpdateMetadataDigest(address,bytes32)"),
            cid_v0: event_topic("CidV0(address,bytes32)"),
        }
    }
}

impl EventDecoder for NameRegistryDecoder {
    fn parse_log(&self, ctx: &LogContext<'_>) -> DecodeResult<Vec<DomainEvent>> {
        let log = ctx.log;
        if log.address != self.registry {
            return Ok(Vec::new());
        }
        let Some(topic0) = log.topic0() else {
            return Ok(Vec::new());
        };
        let data = AbiReader::new(&log.data);

        let event = if topic0 == self.register_short_name {
            DomainEvent::new(
                ctx.meta(),
                CrcV2RegisterShortName {
                    avatar: topic_address(&log.topics, 1)?,
                    short_name: data.uint(0)?,
                    nonce: data.uint(1)?,
                },
            )
        } else if topic0 == self.update_metadata_digest {
            DomainEvent::new(
                ctx.meta(),
                CrcV2UpdateMetadataDigest {
                    avatar: topic_address(&log.topics, 1)?,
                    metadata_digest: data.word(0)?,
                },
            )
        } else if topic0 == self.cid_v0 {
            DomainEvent::new(
                ctx.meta(),
                CrcV2CidV0 {
                    avatar: topic_address(&log.topics, 1)?,
                    cid_v0_digest: data.word(0)?,
                },
            )
        } else {
            return Ok(Vec::new());
        };
        Ok(vec![event])
    }
}
