//! Minimal JSON-RPC access to chain state: runtime code at an address and
//! deployment transactions. A registry maps chain id → client, loaded once
//! at startup from the chains file.

use crate::config::ChainSpec;
use crate::error::VerifyError;
use crate::explorer::ExplorerClient;
use async_trait::async_trait;
use serde_json::{json, Value};
use sourceproof_core::bytecode::parse_hex;
use sourceproof_core::Address;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct TransactionInfo {
    pub input: Vec<u8>,
    /// `None` for contract-creation transactions.
    pub to: Option<String>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_code(&self, address: &Address) -> Result<Vec<u8>, VerifyError>;

    async fn get_transaction(&self, tx_hash: &str)
        -> Result<Option<TransactionInfo>, VerifyError>;

    /// Best-effort discovery of the transaction that deployed `address`.
    /// Failures are tolerated; verification proceeds runtime-only.
    async fn find_creator_tx(&self, _address: &Address) -> Option<String> {
        None
    }
}

pub struct JsonRpcClient {
    url: String,
    client: reqwest::Client,
    explorer: Option<Arc<ExplorerClient>>,
}

impl JsonRpcClient {
    pub fn new(url: String, explorer: Option<Arc<ExplorerClient>>) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
            explorer,
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, VerifyError> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|err| VerifyError::Internal(format!("rpc {method}: {err}")))?;
        let payload: Value = response
            .json()
            .await
            .map_err(|err| VerifyError::Internal(format!("rpc {method}: {err}")))?;
        if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
            return Err(VerifyError::Internal(format!("rpc {method}: {error}")));
        }
        Ok(payload.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    async fn get_code(&self, address: &Address) -> Result<Vec<u8>, VerifyError> {
        let hex_address = format!("0x{}", hex::encode(address.as_bytes()));
        let result = self.rpc("eth_getCode", json!([hex_address, "latest"])).await?;
        let code = result.as_str().unwrap_or("0x");
        parse_hex(code).map_err(|_| VerifyError::Internal("malformed eth_getCode reply".to_string()))
    }

    async fn get_transaction(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TransactionInfo>, VerifyError> {
        let result = self
            .rpc("eth_getTransactionByHash", json!([tx_hash]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let input = result
            .get("input")
            .and_then(Value::as_str)
            .map(parse_hex)
            .transpose()
            .map_err(|_| VerifyError::Internal("malformed transaction input".to_string()))?
            .unwrap_or_default();
        let to = result
            .get("to")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Some(TransactionInfo { input, to }))
    }

    async fn find_creator_tx(&self, address: &Address) -> Option<String> {
        let explorer = self.explorer.as_ref()?;
        match explorer.contract_creation(address).await {
            Some(tx_hash) => Some(tx_hash),
            None => {
                tracing::debug!(%address, "creator transaction not discoverable");
                None
            }
        }
    }
}

pub struct ChainEntry {
    pub chain_id: u64,
    pub name: String,
    pub client: Arc<dyn ChainClient>,
    pub explorer: Option<Arc<ExplorerClient>>,
}

impl std::fmt::Debug for ChainEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainEntry")
            .field("chain_id", &self.chain_id)
            .field("name", &self.name)
            .field("explorer", &self.explorer.is_some())
            .finish()
    }
}

#[derive(Default)]
pub struct ChainRegistry {
    chains: HashMap<u64, ChainEntry>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: ChainEntry) {
        self.chains.insert(entry.chain_id, entry);
    }

    pub fn from_specs(specs: &[ChainSpec]) -> Self {
        let mut registry = Self::new();
        for spec in specs {
            let Some(rpc_url) = spec.rpc.first() else {
                tracing::warn!(chain_id = spec.chain_id, "chain has no rpc endpoint, skipping");
                continue;
            };
            let explorer = spec.explorer_api.as_ref().map(|url| {
                Arc::new(ExplorerClient::new(url.clone(), spec.explorer_api_key.clone()))
            });
            registry.insert(ChainEntry {
                chain_id: spec.chain_id,
                name: spec.name.clone(),
                client: Arc::new(JsonRpcClient::new(rpc_url.clone(), explorer.clone())),
                explorer,
            });
        }
        registry
    }

    pub fn get(&self, chain_id: u64) -> Result<&ChainEntry, VerifyError> {
        self.chains
            .get(&chain_id)
            .ok_or(VerifyError::UnsupportedChain(chain_id))
    }

    /// `(chain id, name)` pairs, sorted by id; the `/chains` listing.
    pub fn list(&self) -> Vec<(u64, String)> {
        let mut out: Vec<(u64, String)> = self
            .chains
            .values()
            .map(|entry| (entry.chain_id, entry.name.clone()))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }
}
