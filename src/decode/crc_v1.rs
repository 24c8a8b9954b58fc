//! Circles v1 hub and personal token decoder.

use super::abi::{topic_address, AbiReader};
use super::discovered::AddressClass;
use super::error::DecodeResult;
use super::events::{
    CrcV1HubTransfer, CrcV1OrganizationSignup, CrcV1Signup, CrcV1Transfer, CrcV1Trust, DomainEvent,
};
use super::{event_topic, EventDecoder, LogContext};
use crate::chain::RawLog;
use alloy_primitives::{Address, B256};

#[derive(Debug, Clone)]
pub struct CrcV1Decoder {
    hub: Address,
    signup: B256,
    organization_signup: B256,
    hub_transfer: B256,
    trust: B256,
    transfer: B256,
}

impl CrcV1Decoder {
    pub fn new(hub: Address) -> Self {
        Self {
            hub,
            signup: event_topic("Signup(address,address)"),
            organization_signup: event_topic("OrganizationSignup(address)"),
            hub_transfer: event_topic("HubTransfer(address,address,uint256)"),
            trust: event_topic("Trust(address,address,uint256)"),
            transfer: event_topic("Transfer(address,address,uint256)"),
        }
    }

    fn token_transfer(&self, ctx: &LogContext<'_>, log: &RawLog) -> DecodeResult<DomainEvent> {
        Ok(DomainEvent::new(
            ctx.meta_for(log),
            CrcV1Transfer {
                token_address: log.address,
                from: topic_address(&log.topics, 1)?,
                to: topic_address(&log.topics, 2)?,
                amount: AbiReader::new(&log.data).uint(0)?,
            },
        ))
    }

    /// Signup registers the personal token. The signup bonus transfer precedes the signup log in
    /// the same receipt, so the receipt is scanned again once the token is known.
    fn signup(&self, ctx: &LogContext<'_>) -> DecodeResult<Vec<DomainEvent>> {
        let log = ctx.log;
        let token = AbiReader::new(&log.data).address(0)?;
        let mut events = vec![DomainEvent::new(
            ctx.meta(),
            CrcV1Signup {
                user: topic_address(&log.topics, 1)?,
                token,
            },
        )];
        ctx.discovered.insert(AddressClass::CrcV1Token, token);

        let bonus = ctx
            .receipt
            .logs
            .iter()
            .find(|sibling| sibling.address == token && sibling.topic0() == Some(self.transfer));
        if let Some(sibling) = bonus {
            events.push(self.token_transfer(ctx, sibling)?);
        }
        Ok(events)
    }
}

impl EventDecoder for CrcV1Decoder {
    fn parse_log(&self, ctx: &LogContext<'_>) -> DecodeResult<Vec<DomainEvent>> {
        let log = ctx.log;
        let Some(topic0) = log.topic0() else {
            return Ok(Vec::new());
        };

        if topic0 == self.transfer && ctx.discovered.contains(AddressClass::CrcV1Token, log.address)
        {
            return Ok(vec![self.token_transfer(ctx, log)?]);
        }
        if log.address != self.hub {
            return Ok(Vec::new());
        }

        if topic0 == self.signup {
            return self.signup(ctx);
        }

        let data = AbiReader::new(&log.data);
        let event = if topic0 == self.organization_signup {
            DomainEvent::new(
                ctx.meta(),
                CrcV1OrganizationSignup {
                    organization: topic_address(&log.topics, 1)?,
                },
            )
        } else if topic0 == self.hub_transfer {
            DomainEvent::new(
                ctx.meta(),
                CrcV1HubTransfer {
                    from: topic_address(&log.topics, 1)?,
                    to: topic_address(&log.topics, 2)?,
                    amount: data.uint(0)?,
                },
            )
        } else if topic0 == self.trust {
            DomainEvent::new(
                ctx.meta(),
                CrcV1Trust {
                    user: topic_address(&log.topics, 1)?,
                    can_send_to: topic_address(&log.topics, 2)?,
                    limit: data.uint(0)?,
                },
            )
        } else {
            return Ok(Vec::new());
        };
        Ok(vec![event])
    }
}
