//! Third-party source-explorer integration: creator-transaction discovery
//! and source imports for `POST /verify/etherscan`. The explorer only
//! supplies sources and compiler settings; recompilation produces the
//! metadata the rest of the pipeline works from.

use crate::compiler::CompilerDriver;
use crate::error::VerifyError;
use serde_json::{json, Map, Value};
use sourceproof_core::standard_json::{SourceContent, StandardJsonInput};
use sourceproof_core::Address;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct ExplorerClient {
    api_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

/// What the explorer knows about a verified contract: enough to rebuild a
/// compilation, not a metadata document.
#[derive(Debug, Clone)]
pub struct ExplorerSource {
    pub contract_name: String,
    pub compiler_version: String,
    pub sources: BTreeMap<String, String>,
    pub settings: Value,
}

impl ExplorerClient {
    pub fn new(api_url: String, api_key: Option<String>) -> Self {
        Self {
            api_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    async fn query(&self, action: &str, param: (&str, String)) -> Result<Value, VerifyError> {
        let mut request = self
            .client
            .get(&self.api_url)
            .query(&[("module", "contract"), ("action", action)])
            .query(&[param]);
        if let Some(key) = &self.api_key {
            request = request.query(&[("apikey", key.as_str())]);
        }
        let payload: Value = request
            .send()
            .await
            .map_err(|err| VerifyError::FetchUnavailable(format!("explorer: {err}")))?
            .json()
            .await
            .map_err(|err| VerifyError::FetchUnavailable(format!("explorer: {err}")))?;
        Ok(payload)
    }

    /// The hash of the transaction that deployed `address`, when the
    /// explorer indexes it.
    pub async fn contract_creation(&self, address: &Address) -> Option<String> {
        let payload = self
            .query(
                "getcontractcreation",
                ("contractaddresses", address.checksummed()),
            )
            .await
            .ok()?;
        payload["result"][0]["txHash"].as_str().map(str::to_string)
    }

    pub async fn fetch_source(&self, address: &Address) -> Result<ExplorerSource, VerifyError> {
        let payload = self
            .query("getsourcecode", ("address", address.checksummed()))
            .await?;
        let entry = &payload["result"][0];
        let raw_source = entry["SourceCode"].as_str().unwrap_or_default();
        if raw_source.is_empty() {
            return Err(VerifyError::BadInput(
                "contract is not verified on the explorer".to_string(),
            ));
        }
        let contract_name = entry["ContractName"].as_str().unwrap_or("Contract").to_string();
        let compiler_version = entry["CompilerVersion"]
            .as_str()
            .unwrap_or_default()
            .trim_start_matches('v')
            .to_string();
        if compiler_version.is_empty() {
            return Err(VerifyError::BadInput(
                "explorer reply lacks a compiler version".to_string(),
            ));
        }

        let (sources, settings) = parse_source_payload(raw_source, &contract_name, entry)?;
        Ok(ExplorerSource {
            contract_name,
            compiler_version,
            sources,
            settings,
        })
    }
}

/// Explorers wrap standard-JSON uploads in an extra brace pair; single-file
/// uploads arrive as bare source text with the settings spread over
/// scalar fields.
fn parse_source_payload(
    raw: &str,
    contract_name: &str,
    entry: &Value,
) -> Result<(BTreeMap<String, String>, Value), VerifyError> {
    let trimmed = raw.trim();
    let standard_json: Option<Value> = if trimmed.starts_with("{{") && trimmed.ends_with("}}") {
        serde_json::from_str(&trimmed[1..trimmed.len() - 1]).ok()
    } else if trimmed.starts_with('{') {
        serde_json::from_str(trimmed).ok()
    } else {
        None
    };

    if let Some(input) = standard_json {
        let mut sources = BTreeMap::new();
        let source_map = input["sources"].as_object().ok_or_else(|| {
            VerifyError::BadInput("explorer standard-json lacks sources".to_string())
        })?;
        for (path, body) in source_map {
            let Some(content) = body["content"].as_str() else {
                continue;
            };
            sources.insert(path.clone(), content.to_string());
        }
        let mut settings = input["settings"].as_object().cloned().unwrap_or_default();
        settings.remove("outputSelection");
        return Ok((sources, Value::Object(settings)));
    }

    let mut sources = BTreeMap::new();
    sources.insert(format!("{contract_name}.sol"), trimmed.to_string());
    let mut settings = Map::new();
    settings.insert(
        "optimizer".to_string(),
        json!({
            "enabled": entry["OptimizationUsed"].as_str() == Some("1"),
            "runs": entry["Runs"].as_str().and_then(|r| r.parse::<u64>().ok()).unwrap_or(200),
        }),
    );
    if let Some(evm_version) = entry["EVMVersion"].as_str() {
        if !evm_version.eq_ignore_ascii_case("default") {
            settings.insert("evmVersion".to_string(), json!(evm_version));
        }
    }
    Ok((sources, Value::Object(settings)))
}

/// Compile the explorer's sources once and return the upload-shaped file
/// set — the compiler-emitted metadata plus every source — that the
/// normal checker pipeline consumes.
pub async fn import_files(
    explorer: &ExplorerClient,
    compiler: &Arc<dyn CompilerDriver>,
    address: &Address,
) -> Result<Vec<(String, Vec<u8>)>, VerifyError> {
    let source = explorer.fetch_source(address).await?;
    let input = StandardJsonInput {
        language: "Solidity".to_string(),
        sources: source
            .sources
            .iter()
            .map(|(path, content)| (path.clone(), SourceContent { content: content.clone() }))
            .collect(),
        settings: forced_selection(source.settings),
    };
    let output = compiler.compile(&source.compiler_version, &input).await?;
    let artifact = output
        .contracts
        .iter()
        .find_map(|(_, contracts)| contracts.get(&source.contract_name))
        .ok_or_else(|| {
            VerifyError::CompilerFailure(format!(
                "explorer sources do not produce contract `{}`",
                source.contract_name
            ))
        })?;
    let metadata = artifact.metadata.clone().ok_or_else(|| {
        VerifyError::CompilerFailure("compiler emitted no metadata".to_string())
    })?;

    let mut files = vec![("metadata.json".to_string(), metadata.into_bytes())];
    for (path, content) in source.sources {
        files.push((path, content.into_bytes()));
    }
    Ok(files)
}

fn forced_selection(mut settings: Value) -> Value {
    if let Some(map) = settings.as_object_mut() {
        map.insert(
            "outputSelection".to_string(),
            json!({ "*": { "*": ["abi", "metadata", "evm.bytecode.object", "evm.deployedBytecode.object"] } }),
        );
        return settings;
    }
    json!({ "outputSelection": { "*": { "*": ["abi", "metadata", "evm.bytecode.object", "evm.deployedBytecode.object"] } } })
}
