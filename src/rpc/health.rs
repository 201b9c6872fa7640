//! Endpoint liveness probes

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::chain::{Chain, ChainFamily};
use crate::error::{AppError, AppResult};

/// Checks whether one endpoint answers. `Ok(())` means live.
#[async_trait]
pub trait EndpointProbe: Send + Sync {
    async fn probe(&self, chain: Chain, url: &str) -> AppResult<()>;
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    method: &'static str,
    params: [(); 0],
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Cheapest read-only call per chain family
pub fn liveness_method(chain: Chain) -> &'static str {
    match chain.family() {
        ChainFamily::Evm => "eth_blockNumber",
        ChainFamily::Solana => "getHealth",
        ChainFamily::Bitcoin => "getblockcount",
    }
}

/// Probes an endpoint with a single JSON-RPC call
pub struct JsonRpcProbe {
    client: reqwest::Client,
}

impl JsonRpcProbe {
    pub fn new(timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EndpointProbe for JsonRpcProbe {
    async fn probe(&self, chain: Chain, url: &str) -> AppResult<()> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: liveness_method(chain),
            params: [],
            id: 1,
        };

        let response = self.client.post(url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::ExternalService {
                service: url.to_string(),
                message: format!("probe returned HTTP {status}"),
                status: Some(status.as_u16()),
            });
        }

        let body: JsonRpcResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(AppError::external(
                url,
                format!("RPC error {}: {}", error.code, error.message),
            ));
        }
        if body.result.is_none() {
            return Err(AppError::external(url, "no result in RPC response"));
        }

        debug!(chain = %chain, url, "Endpoint probe succeeded");
        Ok(())
    }
}
