//! Metri wallet decoder: Safe proxies, Gnosis Pay delay modules and the tokens a Metri wallet
//! holds on Gnosis Chain.

use super::abi::{find_selector_argument, topic_address, topic_uint, AbiReader};
use super::discovered::AddressClass;
use super::error::DecodeResult;
use super::events::{
    DomainEvent, MetriEnableModuleCall, MetriErc20Transfer, MetriExecutionFailure,
    MetriExecutionSuccess, MetriGnosisPayOgNftTransfer, MetriModuleProxyCreation,
    MetriOwnershipTransferred, MetriProxyCreation, MetriRemovedOwner, MetriSafeMultiSigTransaction,
    MetriSafeReceived, MetriSafeSetup, MetriTrade, MetriXdaiTransfer,
};
use super::{
    event_topic, function_selector, transaction_meta, DiscoveredAddresses, EventDecoder,
    LogContext,
};
use crate::chain::{Block, RawLog, Transaction};
use alloy_primitives::{address, Address, B256};

pub const MODULE_PROXY_FACTORY: Address = address!("000000000000aDdB49795b0f9bA5BC298cDda236");
pub const PAY_DELAY_MODULE_IMPLEMENTATION: Address =
    address!("9646fDAD06d3e24444381f44362a3B0eB343D337");
pub const GNOSIS_PAY_NFT: Address = address!("88997988a6A5aAF29BA973d298D276FE75fb69ab");
pub const SAFE_PROXY_FACTORY: Address = address!("a6B71E26C5e0845f74c812102Ca7114b6a896AB2");
pub const GPV2_SETTLEMENT: Address = address!("9008D19f58AAbD9eD0D60971565AA8510560ab41");

/// ERC20 tokens whose transfers are recorded: EURe, GBPe, GNO, WXDAI, EURe v2, GBPe v2.
pub const TRACKED_ERC20: [Address; 6] = [
    address!("cB444e90D8198415266c6a2724b7900fb12FC56E"),
    address!("5Cb9073902F2035222B9749F8fB0c9BFe5527108"),
    address!("9C58BAcC331c9aa871AFD802DB6379a98e80CEdb"),
    address!("e91D153E0b41518A2Ce8Dd3D7944Fa863463a97d"),
    address!("420CA0f9B9b604cE0fd9C18EF134C705e5Fa3430"),
    address!("8E34bfEC4f6Eb781f9743D9b4af99CD23F9b7053"),
];

#[derive(Debug, Clone)]
struct MetriTopics {
    proxy_creation: B256,
    module_proxy_creation: B256,
    ownership_transferred: B256,
    transfer: B256,
    execution_success: B256,
    execution_failure: B256,
    safe_multisig_transaction: B256,
    safe_received: B256,
    safe_setup: B256,
    removed_owner: B256,
    trade: B256,
}

#[derive(Debug, Clone)]
pub struct MetriDecoder {
    safe_proxy_factory: Address,
    module_proxy_factory: Address,
    pay_delay_implementation: Address,
    gnosis_pay_nft: Address,
    settlement: Address,
    erc20_tokens: Vec<Address>,
    enable_module: [u8; 4],
    topics: MetriTopics,
}

impl MetriDecoder {
    /// Decoder bound to the Gnosis Chain deployments.
    pub fn gnosis() -> Self {
        Self {
            safe_proxy_factory: SAFE_PROXY_FACTORY,
            module_proxy_factory: MODULE_PROXY_FACTORY,
            pay_delay_implementation: PAY_DELAY_MODULE_IMPLEMENTATION,
            gnosis_pay_nft: GNOSIS_PAY_NFT,
            settlement: GPV2_SETTLEMENT,
            erc20_tokens: TRACKED_ERC20.to_vec(),
            enable_module: function_selector("enableModule(address)"),
            topics: MetriTopics {
                proxy_creation: event_topic("ProxyCreation(address,address)"),
                module_proxy_creation: event_topic("ModuleProxyCreation(address,address)"),
                ownership_transferred: event_topic("OwnershipTransferred(address,address)"),
                transfer: event_topic("Transfer(address,address,uint256)"),
                execution_success: event_topic("ExecutionSuccess(bytes32,uint256)"),
                execution_failure: event_topic("ExecutionFailure(bytes32,uint256)"),
                safe_multisig_transaction: event_topic(
                    "SafeMultiSigTransaction(address,uint256,bytes,uint8,uint256,uint256,uint256,address,address,bytes,bytes)",
                ),
                safe_received: event_topic("SafeReceived(address,uint256)"),
                safe_setup: event_topic("SafeSetup(address,address[],uint256,address,address)"),
                removed_owner: event_topic("RemovedOwner(address)"),
                trade: event_topic(
                    "Trade(address,address,address,uint256,uint256,uint256,bytes)",
                ),
            },
        }
    }

    /// Safe creation. `SafeSetup` is emitted by the new proxy during initialisation, before the
    /// factory logs `ProxyCreation`, so the receipt is scanned for it once the proxy is known.
    fn proxy_creation(&self, ctx: &LogContext<'_>) -> DecodeResult<Vec<DomainEvent>> {
        let data = AbiReader::new(&ctx.log.data);
        let proxy = data.address(0)?;
        let mut events = vec![DomainEvent::new(
            ctx.meta(),
            MetriProxyCreation {
                proxy,
                singleton: data.address(1)?,
            },
        )];
        if ctx.discovered.insert(AddressClass::SafeProxy, proxy) {
            tracing::debug!(safe = %proxy, block = ctx.block.number, "discovered safe proxy");
        }

        for sibling in &ctx.receipt.logs {
            if sibling.address == proxy && sibling.topic0() == Some(self.topics.safe_setup) {
                events.push(self.safe_setup(&ctx.sibling(sibling))?);
            }
        }
        Ok(events)
    }

    fn module_proxy_creation(&self, ctx: &LogContext<'_>) -> DecodeResult<Vec<DomainEvent>> {
        let topics = &ctx.log.topics;
        let proxy = topic_address(topics, 1)?;
        let master_copy = topic_address(topics, 2)?;
        if master_copy != self.pay_delay_implementation {
            return Ok(Vec::new());
        }
        ctx.discovered.insert(AddressClass::PayDelayModule, proxy);
        Ok(vec![DomainEvent::new(
            ctx.meta(),
            MetriModuleProxyCreation { proxy, master_copy },
        )])
    }

    fn safe_setup(&self, ctx: &LogContext<'_>) -> DecodeResult<DomainEvent> {
        let data = AbiReader::new(&ctx.log.data);
        Ok(DomainEvent::new(
            ctx.meta(),
            MetriSafeSetup {
                safe: ctx.log.address,
                initiator: topic_address(&ctx.log.topics, 1)?,
                owners: data.address_array(0)?,
                threshold: data.uint(1)?,
                initializer: data.address(2)?,
                fallback_handler: data.address(3)?,
            },
        ))
    }

    fn safe_log(&self, ctx: &LogContext<'_>, topic0: B256) -> DecodeResult<Option<DomainEvent>> {
        let log: &RawLog = ctx.log;
        let safe = log.address;
        let data = AbiReader::new(&log.data);
        let t = &self.topics;

        let event = if topic0 == t.execution_success {
            DomainEvent::new(
                ctx.meta(),
                MetriExecutionSuccess {
                    safe,
                    tx_hash: data.word(0)?,
                    payment: data.uint(1)?,
                },
            )
        } else if topic0 == t.execution_failure {
            DomainEvent::new(
                ctx.meta(),
                MetriExecutionFailure {
                    safe,
                    tx_hash: data.word(0)?,
                    payment: data.uint(1)?,
                },
            )
        } else if topic0 == t.safe_multisig_transaction {
            DomainEvent::new(
                ctx.meta(),
                MetriSafeMultiSigTransaction {
                    safe,
                    to: data.address(0)?,
                    value: data.uint(1)?,
                    data: data.bytes(2)?,
                    operation: data.uint8(3)?,
                    safe_tx_gas: data.uint(4)?,
                    base_gas: data.uint(5)?,
                    gas_price: data.uint(6)?,
                    gas_token: data.address(7)?,
                    refund_receiver: data.address(8)?,
                    signatures: data.bytes(9)?,
                    additional_info: data.bytes(10)?,
                },
            )
        } else if topic0 == t.safe_received {
            DomainEvent::new(
                ctx.meta(),
                MetriSafeReceived {
                    safe,
                    sender: topic_address(&log.topics, 1)?,
                    value: data.uint(0)?,
                },
            )
        } else if topic0 == t.safe_setup {
            self.safe_setup(ctx)?
        } else if topic0 == t.removed_owner {
            DomainEvent::new(
                ctx.meta(),
                MetriRemovedOwner {
                    safe,
                    owner: data.address(0)?,
                },
            )
        } else {
            return Ok(None);
        };
        Ok(Some(event))
    }
}

impl EventDecoder for MetriDecoder {
    fn parse_transaction(
        &self,
        block: &Block,
        tx: &Transaction,
        discovered: &DiscoveredAddresses,
    ) -> DecodeResult<Vec<DomainEvent>> {
        let Some(to) = tx.to else {
            return Ok(Vec::new());
        };
        let to_safe = discovered.contains(AddressClass::SafeProxy, to);
        let from_safe = discovered.contains(AddressClass::SafeProxy, tx.from);

        let mut events = Vec::new();
        if !tx.value.is_zero() && (to_safe || from_safe) {
            events.push(DomainEvent::new(
                transaction_meta(block, tx),
                MetriXdaiTransfer {
                    from: tx.from,
                    to,
                    value: tx.value,
                },
            ));
        }
        if to_safe {
            if let Some(module) = find_selector_argument(&tx.input, self.enable_module) {
                events.push(DomainEvent::new(
                    transaction_meta(block, tx),
                    MetriEnableModuleCall { safe: to, module },
                ));
            }
        }
        Ok(events)
    }

    fn parse_log(&self, ctx: &LogContext<'_>) -> DecodeResult<Vec<DomainEvent>> {
        let log = ctx.log;
        let Some(topic0) = log.topic0() else {
            return Ok(Vec::new());
        };
        let topics = &log.topics;
        let t = &self.topics;

        if log.address == self.safe_proxy_factory && topic0 == t.proxy_creation {
            return self.proxy_creation(ctx);
        }
        if log.address == self.module_proxy_factory && topic0 == t.module_proxy_creation {
            return self.module_proxy_creation(ctx);
        }
        if topic0 == t.ownership_transferred
            && ctx
                .discovered
                .contains(AddressClass::PayDelayModule, log.address)
        {
            return Ok(vec![DomainEvent::new(
                ctx.meta(),
                MetriOwnershipTransferred {
                    module: log.address,
                    from: topic_address(topics, 1)?,
                    to: topic_address(topics, 2)?,
                },
            )]);
        }
        if log.address == self.gnosis_pay_nft && topic0 == t.transfer {
            return Ok(vec![DomainEvent::new(
                ctx.meta(),
                MetriGnosisPayOgNftTransfer {
                    from: topic_address(topics, 1)?,
                    to: topic_address(topics, 2)?,
                    token_id: topic_uint(topics, 3)?,
                },
            )]);
        }
        if topic0 == t.transfer && self.erc20_tokens.contains(&log.address) {
            return Ok(vec![DomainEvent::new(
                ctx.meta(),
                MetriErc20Transfer {
                    token_address: log.address,
                    from: topic_address(topics, 1)?,
                    to: topic_address(topics, 2)?,
                    value: AbiReader::new(&log.data).uint(0)?,
                },
            )]);
        }
        if ctx.discovered.contains(AddressClass::SafeProxy, log.address) {
            return Ok(self.safe_log(ctx, topic0)?.into_iter().collect());
        }
        if log.address == self.settlement && topic0 == t.trade {
            let data = AbiReader::new(&log.data);
            return Ok(vec![DomainEvent::new(
                ctx.meta(),
                MetriTrade {
                    owner: topic_address(topics, 1)?,
                    sell_token: data.address(0)?,
                    buy_token: data.address(1)?,
                    sell_amount: data.uint(2)?,
                    buy_amount: data.uint(3)?,
                    fee_amount: data.uint(4)?,
                    order_uid: data.bytes(5)?,
                },
            )]);
        }
        Ok(Vec::new())
    }
}
