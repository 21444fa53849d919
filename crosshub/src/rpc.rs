use std::time::Duration;

use alloy::{
    primitives::{Address, U64},
    rpc::types::{Filter, Log},
};
use async_trait::async_trait;
use jsonrpsee::{
    core::client::ClientT,
    http_client::{HttpClient, HttpClientBuilder},
    rpc_params,
};

use crate::{codec::RawLog, error::RpcError, view::ChainRpc};

/// [ChainRpc] over an Ethereum JSON-RPC endpoint.
pub struct JsonRpcClient {
    client: HttpClient,
}

impl JsonRpcClient {
    pub fn new(url: &str, request_timeout: Duration) -> Result<JsonRpcClient, RpcError> {
        let client = HttpClientBuilder::default()
            .request_timeout(request_timeout)
            .build(url)
            .map_err(|e| RpcError::InvalidEndpoint(e.to_string()))?;
        Ok(JsonRpcClient { client })
    }
}

#[async_trait]
impl ChainRpc for JsonRpcClient {
    async fn block_number(&self) -> Result<u64, RpcError> {
        let number: U64 = self.client.request("eth_blockNumber", rpc_params![]).await?;
        Ok(number.to::<u64>())
    }

    async fn filter_logs(
        &self,
        from: u64,
        to: u64,
        address: Address,
    ) -> Result<Vec<RawLog>, RpcError> {
        let filter = Filter::new().address(address).from_block(from).to_block(to);
        let logs: Vec<Log> = self
            .client
            .request("eth_getLogs", rpc_params![filter])
            .await?;
        logs.into_iter().map(raw_log).collect()
    }
}

fn raw_log(log: Log) -> Result<RawLog, RpcError> {
    let (Some(tx_hash), Some(block_hash), Some(block_number)) =
        (log.transaction_hash, log.block_hash, log.block_number)
    else {
        return Err(RpcError::InvalidResponse(
            "log is missing its block or transaction".to_owned(),
        ));
    };

    Ok(RawLog {
        address: log.inner.address,
        topics: log.inner.data.topics().to_vec(),
        data: log.inner.data.data.clone(),
        tx_hash,
        block_hash,
        block_number,
    })
}
