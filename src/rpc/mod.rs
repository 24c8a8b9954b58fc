//! JSON-RPC chain data provider.

use crate::chain::{Block, ChainProvider, RawLog, Receipt, Transaction};
use alloy_primitives::{Address, Bytes, B256, U256, U64};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    number: U64,
    hash: B256,
    parent_hash: B256,
    timestamp: U64,
    #[serde(default)]
    transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    hash: B256,
    transaction_index: U64,
    from: Address,
    to: Option<Address>,
    value: U256,
    input: Bytes,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    transaction_index: U64,
    logs: Vec<RpcLog>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
    log_index: U64,
}

fn index(value: U64) -> Result<u32> {
    u32::try_from(value.to::<u64>()).map_err(|_| eyre!("index {value} out of range"))
}

fn quantity(number: u64) -> String {
    format!("{number:#x}")
}

fn into_block(block: RpcBlock) -> Result<Block> {
    let transactions = block
        .transactions
        .into_iter()
        .map(|tx| {
            Ok(Transaction {
                hash: tx.hash,
                index: index(tx.transaction_index)?,
                from: tx.from,
                to: tx.to,
                value: tx.value,
                input: tx.input,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Block {
        number: block.number.to(),
        hash: block.hash,
        parent_hash: block.parent_hash,
        timestamp: block.timestamp.to(),
        transactions,
    })
}

fn into_receipt(receipt: RpcReceipt) -> Result<Receipt> {
    let logs = receipt
        .logs
        .into_iter()
        .map(|log| {
            Ok(RawLog {
                address: log.address,
                topics: log.topics,
                data: log.data,
                log_index: index(log.log_index)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Receipt {
        transaction_hash: receipt.transaction_hash,
        transaction_index: index(receipt.transaction_index)?,
        logs,
    })
}

/// [`ChainProvider`] backed by an execution node's HTTP JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct RpcChainProvider {
    client: HttpClient,
}

impl RpcChainProvider {
    pub fn new(url: &str) -> Result<Self> {
        let client = HttpClientBuilder::default()
            .build(url)
            .wrap_err_with(|| format!("failed to build rpc client for {url}"))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ChainProvider for RpcChainProvider {
    async fn block_by_number(&self, number: u64) -> Result<Option<Block>> {
        let block: Option<RpcBlock> = self
            .client
            .request("eth_getBlockByNumber", rpc_params![quantity(number), true])
            .await
            .wrap_err_with(|| format!("eth_getBlockByNumber({number}) failed"))?;
        block.map(into_block).transpose()
    }

    async fn receipts(&self, block: &Block) -> Result<Vec<Receipt>> {
        let number = block.number;
        let receipts: Option<Vec<RpcReceipt>> = self
            .client
            .request("eth_getBlockReceipts", rpc_params![quantity(number)])
            .await
            .wrap_err_with(|| format!("eth_getBlockReceipts({number}) failed"))?;
        let receipts = receipts.ok_or_else(|| eyre!("no receipts for block {number}"))?;
        if receipts.len() != block.transactions.len() {
            return Err(eyre!(
                "receipt count {} does not match transaction count {} for block {number}",
                receipts.len(),
                block.transactions.len()
            ));
        }
        receipts.into_iter().map(into_receipt).collect()
    }

    async fn head_number(&self) -> Result<u64> {
        let head: U64 = self
            .client
            .request("eth_blockNumber", rpc_params![])
            .await
            .wrap_err("eth_blockNumber failed")?;
        Ok(head.to())
    }
}
