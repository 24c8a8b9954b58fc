//! Circles v2 hub and ERC20 wrapper decoder.

use super::abi::{topic_address, topic_uint, zip_batch, AbiReader};
use super::discovered::AddressClass;
use super::error::DecodeResult;
use super::events::{
    CrcV2ApprovalForAll, CrcV2DepositDemurraged, CrcV2DepositInflationary, CrcV2DiscountCost,
    CrcV2Erc20WrapperDeployed, CrcV2Erc20WrapperTransfer, CrcV2InviteHuman, CrcV2PersonalMint,
    CrcV2RegisterGroup, CrcV2RegisterHuman, CrcV2RegisterOrganization, CrcV2Stopped,
    CrcV2TransferBatch, CrcV2TransferSingle, CrcV2Trust, CrcV2Uri, CrcV2WithdrawDemurraged,
    CrcV2WithdrawInflationary, DomainEvent,
};
use super::{event_topic, EventDecoder, LogContext};
use alloy_primitives::{Address, B256};

#[derive(Debug, Clone)]
struct HubTopics {
    stopped: B256,
    trust: B256,
    invite_human: B256,
    personal_mint: B256,
    register_human: B256,
    register_group: B256,
    register_organization: B256,
    transfer_single: B256,
    transfer_batch: B256,
    approval_for_all: B256,
    uri: B256,
    discount_cost: B256,
    erc20_wrapper_deployed: B256,
}

#[derive(Debug, Clone)]
struct WrapperTopics {
    transfer: B256,
    deposit_inflationary: B256,
    withdraw_inflationary: B256,
    deposit_demurraged: B256,
    withdraw_demurraged: B256,
}

#[derive(Debug, Clone)]
pub struct CrcV2Decoder {
    hub: Address,
    hub_topics: HubTopics,
    wrapper_topics: WrapperTopics,
}

impl CrcV2Decoder {
    pub fn new(hub: Address) -> Self {
        Self {
            hub,
            hub_topics: HubTopics {
                stopped: event_topic("Stopped(address)"),
                trust: event_topic("Trust(address,address,uint256)"),
                invite_human: event_topic("InviteHuman(address,address)"),
                personal_mint: event_topic("PersonalMint(address,uint256,uint256,uint256)"),
                register_human: event_topic("RegisterHuman(address)"),
                register_group: event_topic(
                    "RegisterGroup(address,address,address,string,string)",
                ),
                register_organization: event_topic("RegisterOrganization(address,string)"),
                transfer_single: event_topic(
                    "TransferSingle(address,address,address,uint256,uint256)",
                ),
                transfer_batch: event_topic(
                    "TransferBatch(address,address,address,uint256[],uint256[])",
                ),
                approval_for_all: event_topic("ApprovalForAll(address,address,bool)"),
                uri: event_topic("URI(string,uint256)"),
                discount_cost: event_topic("DiscountCost(address,uint256,uint256)"),
                erc20_wrapper_deployed: event_topic("ERC20WrapperDeployed(address,address,uint8)"),
            },
            wrapper_topics: WrapperTopics {
                transfer: event_topic("Transfer(address,address,uint256)"),
                deposit_inflationary: event_topic("DepositInflationary(address,uint256,uint256)"),
                withdraw_inflationary: event_topic("WithdrawInflationary(address,uint256,uint256)"),
                deposit_demurraged: event_topic("DepositDemurraged(address,uint256,uint256)"),
                withdraw_demurraged: event_topic("WithdrawDemurraged(address,uint256,uint256)"),
            },
        }
    }

    fn parse_hub_log(&self, ctx: &LogContext<'_>, topic0: B256) -> DecodeResult<Vec<DomainEvent>> {
        let topics = &ctx.log.topics;
        let data = AbiReader::new(&ctx.log.data);
        let meta = ctx.meta();
        let t = &self.hub_topics;

        let event = if topic0 == t.stopped {
            DomainEvent::new(
                meta,
                CrcV2Stopped {
                    avatar: topic_address(topics, 1)?,
                },
            )
        } else if topic0 == t.trust {
            DomainEvent::new(
                meta,
                CrcV2Trust {
                    truster: topic_address(topics, 1)?,
                    trustee: topic_address(topics, 2)?,
                    expiry_time: data.uint(0)?,
                },
            )
        } else if topic0 == t.invite_human {
            DomainEvent::new(
                meta,
                CrcV2InviteHuman {
                    inviter: topic_address(topics, 1)?,
                    invited: topic_address(topics, 2)?,
                },
            )
        } else if topic0 == t.personal_mint {
            DomainEvent::new(
                meta,
                CrcV2PersonalMint {
                    human: topic_address(topics, 1)?,
                    amount: data.uint(0)?,
                    start_period: data.uint(1)?,
                    end_period: data.uint(2)?,
                },
            )
        } else if topic0 == t.register_human {
            DomainEvent::new(
                meta,
                CrcV2RegisterHuman {
                    avatar: topic_address(topics, 1)?,
                },
            )
        } else if topic0 == t.register_group {
            DomainEvent::new(
                meta,
                CrcV2RegisterGroup {
                    group: topic_address(topics, 1)?,
                    mint: topic_address(topics, 2)?,
                    treasury: topic_address(topics, 3)?,
                    name: data.string(0)?,
                    symbol: data.string(1)?,
                },
            )
        } else if topic0 == t.register_organization {
            DomainEvent::new(
                meta,
                CrcV2RegisterOrganization {
                    organization: topic_address(topics, 1)?,
                    name: data.string(0)?,
                },
            )
        } else if topic0 == t.transfer_single {
            DomainEvent::new(
                meta,
                CrcV2TransferSingle {
                    operator: topic_address(topics, 1)?,
                    from: topic_address(topics, 2)?,
                    to: topic_address(topics, 3)?,
                    id: data.uint(0)?,
                    value: data.uint(1)?,
                },
            )
        } else if topic0 == t.transfer_batch {
            let operator = topic_address(topics, 1)?;
            let from = topic_address(topics, 2)?;
            let to = topic_address(topics, 3)?;
            let pairs = zip_batch(data.uint_array(0)?, data.uint_array(1)?)?;
            return Ok(pairs
                .into_iter()
                .enumerate()
                .map(|(index, (id, value))| {
                    DomainEvent::new(
                        meta.with_batch_index(index as u32),
                        CrcV2TransferBatch {
                            operator,
                            from,
                            to,
                            id,
                            value,
                        },
                    )
                })
                .collect());
        } else if topic0 == t.approval_for_all {
            DomainEvent::new(
                meta,
                CrcV2ApprovalForAll {
                    account: topic_address(topics, 1)?,
                    operator: topic_address(topics, 2)?,
                    approved: data.bool(0)?,
                },
            )
        } else if topic0 == t.uri {
            DomainEvent::new(
                meta,
                CrcV2Uri {
                    id: topic_uint(topics, 1)?,
                    value: data.string(0)?,
                },
            )
        } else if topic0 == t.discount_cost {
            DomainEvent::new(
                meta,
                CrcV2DiscountCost {
                    account: topic_address(topics, 1)?,
                    id: topic_uint(topics, 2)?,
                    discount_cost: data.uint(0)?,
                },
            )
        } else if topic0 == t.erc20_wrapper_deployed {
            let erc20_wrapper = topic_address(topics, 2)?;
            let event = DomainEvent::new(
                meta,
                CrcV2Erc20WrapperDeployed {
                    avatar: topic_address(topics, 1)?,
                    erc20_wrapper,
                    circles_type: data.uint8(0)?,
                },
            );
            if ctx.discovered.insert(AddressClass::Erc20Wrapper, erc20_wrapper) {
                tracing::debug!(wrapper = %erc20_wrapper, block = meta.block_number, "discovered erc20 wrapper");
            }
            event
        } else {
            return Ok(Vec::new());
        };
        Ok(vec![event])
    }

    fn parse_wrapper_log(
        &self,
        ctx: &LogContext<'_>,
        topic0: B256,
    ) -> DecodeResult<Vec<DomainEvent>> {
        let topics = &ctx.log.topics;
        let data = AbiReader::new(&ctx.log.data);
        let meta = ctx.meta();
        let t = &self.wrapper_topics;

        let event = if topic0 == t.transfer {
            DomainEvent::new(
                meta,
                CrcV2Erc20WrapperTransfer {
                    token_address: ctx.log.address,
                    from: topic_address(topics, 1)?,
                    to: topic_address(topics, 2)?,
                    amount: data.uint(0)?,
                },
            )
        } else if topic0 == t.deposit_inflationary {
            DomainEvent::new(
                meta,
                CrcV2DepositInflationary {
                    account: topic_address(topics, 1)?,
                    amount: data.uint(0)?,
                    demurraged_amount: data.uint(1)?,
                },
            )
        } else if topic0 == t.withdraw_inflationary {
            DomainEvent::new(
                meta,
                CrcV2WithdrawInflationary {
                    account: topic_address(topics, 1)?,
                    amount: data.uint(0)?,
                    demurraged_amount: data.uint(1)?,
                },
            )
        } else if topic0 == t.deposit_demurraged {
            DomainEvent::new(
                meta,
                CrcV2DepositDemurraged {
                    account: topic_address(topics, 1)?,
                    amount: data.uint(0)?,
                    inflationary_amount: data.uint(1)?,
                },
            )
        } else if topic0 == t.withdraw_demurraged {
            DomainEvent::new(
                meta,
                CrcV2WithdrawDemurraged {
                    account: topic_address(topics, 1)?,
                    amount: data.uint(0)?,
                    inflationary_amount: data.uint(1)?,
                },
            )
        } else {
            return Ok(Vec::new());
        };
        Ok(vec![event])
    }
}

impl EventDecoder for CrcV2Decoder {
    fn parse_log(&self, ctx: &LogContext<'_>) -> DecodeResult<Vec<DomainEvent>> {
        let Some(topic0) = ctx.log.topic0() else {
            return Ok(Vec::new());
        };
        if ctx.log.address == self.hub {
            return self.parse_hub_log(ctx, topic0);
        }
        if ctx
            .discovered
            .contains(AddressClass::Erc20Wrapper, ctx.log.address)
        {
            return self.parse_wrapper_log(ctx, topic0);
        }
        Ok(Vec::new())
    }
}
