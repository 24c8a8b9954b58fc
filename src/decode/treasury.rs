//! Standard treasury (group collateral) decoder.

use super::abi::{topic_address, topic_uint, zip_batch, AbiReader};
use super::error::DecodeResult;
use super::events::{
    CrcV2CollateralLockedBatch, CrcV2CollateralLockedSingle, CrcV2CreateVault, CrcV2GroupRedeem,
    CrcV2GroupRedeemCollateralBurn, CrcV2GroupRedeemCollateralReturn, DomainEvent, EventKind,
    EventMeta,
};
use super::{event_topic, EventDecoder, LogContext};
use alloy_primitives::{Address, B256, U256};

#[derive(Debug, Clone)]
pub struct StandardTreasuryDecoder {
    treasury: Address,
    create_vault: B256,
    collateral_locked_single: B256,
    collateral_locked_batch: B256,
    group_redeem: B256,
    group_redeem_collateral_return: B256,
    group_redeem_collateral_burn: B256,
}

/// One event per `(id, value)` pair, stamped with its position in the arrays.
fn expand_batch<K: Into<EventKind>>(
    meta: EventMeta,
    pairs: Vec<(U256, U256)>,
    build: impl Fn(U256, U256) -> K,
) -> Vec<DomainEvent> {
    pairs
        .into_iter()
        .enumerate()
        .map(|(index, (id, value))| {
            DomainEvent::new(meta.with_batch_index(index as u32), build(id, value))
        })
        .collect()
}

impl StandardTreasuryDecoder {
    pub fn new(treasury: Address) -> Self {
        Self {
            treasury,
            create_vault: event_topic("CreateVault(address,address)"),
            collateral_locked_single: event_topic(
                "CollateralLockedSingle(address,uint256,uint256,bytes)",
            ),
            collateral_locked_batch: event_topic(
                "CollateralLockedBatch(address,uint256[],uint256[],bytes)",
            ),
            group_redeem: event_topic("GroupRedeem(address,uint256,uint256,bytes)"),
            group_redeem_collateral_return: event_topic(
                "GroupRedeemCollateralReturn(address,address,uint256[],uint256[])",
            ),
            group_redeem_collateral_burn: event_topic(
                "GroupRedeemCollateralBurn(address,uint256[],uint256[])",
            ),
        }
    }
}

impl EventDecoder for StandardTreasuryDecoder {
    fn parse_log(&self, ctx: &LogContext<'_>) -> DecodeResult<Vec<DomainEvent>> {
        let log = ctx.log;
        if log.address != self.treasury {
            return Ok(Vec::new());
        }
        let Some(topic0) = log.topic0() else {
            return Ok(Vec::new());
        };
        let topics = &log.topics;
        let data = AbiReader::new(&log.data);
        let meta = ctx.meta();

        if topic0 == self.create_vault {
            return Ok(vec![DomainEvent::new(
                meta,
                CrcV2CreateVault {
                    group: topic_address(topics, 1)?,
                    vault: topic_address(topics, 2)?,
                },
            )]);
        }
        if topic0 == self.collateral_locked_single {
            return Ok(vec![DomainEvent::new(
                meta,
                CrcV2CollateralLockedSingle {
                    group: topic_address(topics, 1)?,
                    id: topic_uint(topics, 2)?,
                    value: data.uint(0)?,
                    user_data: data.bytes(1)?,
                },
            )]);
        }
        if topic0 == self.group_redeem {
            return Ok(vec![DomainEvent::new(
                meta,
                CrcV2GroupRedeem {
                    group: topic_address(topics, 1)?,
                    id: topic_uint(topics, 2)?,
                    value: data.uint(0)?,
                    data: data.bytes(1)?,
                },
            )]);
        }
        if topic0 == self.collateral_locked_batch {
            let group = topic_address(topics, 1)?;
            let pairs = zip_batch(data.uint_array(0)?, data.uint_array(1)?)?;
            let user_data = data.bytes(2)?;
            return Ok(expand_batch(meta, pairs, |id, value| {
                CrcV2CollateralLockedBatch {
                    group,
                    id,
                    value,
                    user_data: user_data.clone(),
                }
            }));
        }
        if topic0 == self.group_redeem_collateral_return {
            let group = topic_address(topics, 1)?;
            let to = topic_address(topics, 2)?;
            let pairs = zip_batch(data.uint_array(0)?, data.uint_array(1)?)?;
            return Ok(expand_batch(meta, pairs, |id, value| {
                CrcV2GroupRedeemCollateralReturn {
                    group,
                    to,
                    id,
                    value,
                }
            }));
        }
        if topic0 == self.group_redeem_collateral_burn {
            let group = topic_address(topics, 1)?;
            let pairs = zip_batch(data.uint_array(0)?, data.uint_array(1)?)?;
            return Ok(expand_batch(meta, pairs, |id, value| {
                CrcV2GroupRedeemCollateralBurn { group, id, value }
            }));
        }
        Ok(Vec::new())
    }
}
