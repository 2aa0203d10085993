use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub repository_path: PathBuf,
    /// Base URL stored contracts are served from; used when building file
    /// trees for clients. Falls back to relative repository paths.
    pub repository_server_url: Option<String>,
    pub ipfs_gateways: Vec<String>,
    pub swarm_gateways: Vec<String>,
    pub fetch_timeout: Duration,
    pub fetch_concurrency: usize,
    pub solc_dir: PathBuf,
    /// Presence selects the remote compiler over the local binary.
    pub lambda_compiler_url: Option<String>,
    pub session_max_bytes: usize,
    pub session_idle: Duration,
    pub max_request_bytes: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            repository_path: PathBuf::from("./repository"),
            repository_server_url: None,
            ipfs_gateways: vec!["https://ipfs.io/ipfs".to_string()],
            swarm_gateways: vec!["https://swarm-gateways.net/bzz-raw:".to_string()],
            fetch_timeout: Duration::from_secs(30),
            fetch_concurrency: 8,
            solc_dir: PathBuf::from("./solc-bin"),
            lambda_compiler_url: None,
            session_max_bytes: 50 * 1024 * 1024,
            session_idle: Duration::from_secs(30 * 60),
            max_request_bytes: 60 * 1024 * 1024,
        }
    }
}

/// One entry of the chains file: id, display name, RPC endpoints in
/// preference order, optional explorer API for creator-tx discovery and
/// source imports.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainSpec {
    #[serde(rename = "chainId")]
    pub chain_id: u64,
    pub name: String,
    #[serde(default)]
    pub rpc: Vec<String>,
    #[serde(rename = "explorerApi", default)]
    pub explorer_api: Option<String>,
    #[serde(rename = "explorerApiKey", default)]
    pub explorer_api_key: Option<String>,
}

pub fn load_chain_specs(path: &Path) -> Result<Vec<ChainSpec>, Box<dyn std::error::Error>> {
    let payload = fs::read(path)?;
    let specs: Vec<ChainSpec> = serde_json::from_slice(&payload)?;
    Ok(specs)
}
