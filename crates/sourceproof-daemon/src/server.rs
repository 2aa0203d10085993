// Copyright [2026] [Joseph Verdicchio]
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// Copyright (c) 2026 Joseph Verdicchio and SourceProof Contributors
// SPDX-License-Identifier: Apache-2.0

//! The HTTP surface: stateless verification, the staged session flow,
//! explorer imports, and read access to the match repository.

use crate::assembler::PendingAssembler;
use crate::chain::ChainRegistry;
use crate::error::VerifyError;
use crate::explorer;
use crate::repository::MatchStore;
use crate::session::{SessionStore, VerificationTarget};
use crate::verification::VerificationCoordinator;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use sourceproof_core::checker::{self, CheckedContract};
use sourceproof_core::metadata::Metadata;
use sourceproof_core::{Address, ContentHash, Match, MatchQuality};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub const SESSION_HEADER: &str = "x-session-id";

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub coordinator: Arc<VerificationCoordinator>,
    pub repository: Arc<MatchStore>,
    pub assembler: Arc<PendingAssembler>,
    pub chains: Arc<ChainRegistry>,
    pub repository_server_url: Option<String>,
    session_counter: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(
        sessions: Arc<SessionStore>,
        coordinator: Arc<VerificationCoordinator>,
        repository: Arc<MatchStore>,
        assembler: Arc<PendingAssembler>,
        chains: Arc<ChainRegistry>,
        repository_server_url: Option<String>,
    ) -> Self {
        Self {
            sessions,
            coordinator,
            repository,
            assembler,
            chains,
            repository_server_url,
            session_counter: Arc::new(AtomicU64::new(0)),
        }
    }
}

pub fn router(state: AppState, max_request_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chains", get(chains))
        .route("/verify", post(verify))
        .route("/verify/etherscan", post(verify_etherscan))
        .route("/session/input-files", post(session_input_files))
        .route("/session/verify-contracts", post(session_verify_contracts))
        .route("/session/data", get(session_data))
        .route("/files/tree/:partition/:chain_id/:address", get(files_tree))
        .layer(RequestBodyLimitLayer::new(max_request_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    max_request_bytes: usize,
) -> Result<(), std::io::Error> {
    axum::serve(listener, router(state, max_request_bytes)).await
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn chains(State(state): State<AppState>) -> Json<Value> {
    let list: Vec<Value> = state
        .chains
        .list()
        .into_iter()
        .map(|(chain_id, name)| json!({ "chainId": chain_id, "name": name }))
        .collect();
    Json(json!(list))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest {
    address: String,
    chain: Value,
    #[serde(default)]
    files: BTreeMap<String, String>,
    /// A `dweb:/ipfs/…` / `bzzr1://…` URI; used instead of uploads, the
    /// whole contract is assembled from decentralized storage.
    #[serde(default)]
    metadata_hash: Option<String>,
    #[serde(default)]
    chosen_contract: Option<usize>,
    #[serde(default)]
    creator_tx_hash: Option<String>,
}

#[derive(Debug, Serialize)]
struct VerifyResponse {
    result: Vec<ResultEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultEntry {
    address: Address,
    chain_id: u64,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage_timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    library_map: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl ResultEntry {
    fn from_match(m: &Match) -> Self {
        Self {
            address: m.address,
            chain_id: m.chain_id,
            status: m.status().to_string(),
            storage_timestamp: m.storage_timestamp,
            library_map: m.library_map.clone(),
            message: m.message.clone(),
        }
    }
}

fn parse_chain(value: &Value) -> Result<u64, VerifyError> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| VerifyError::BadInput("unparseable chain id".to_string()))
}

/// Stateless verification: check the uploaded files, fetch whatever is
/// still missing from decentralized storage, verify, archive on success.
async fn verify(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, VerifyError> {
    let address: Address = request
        .address
        .parse()
        .map_err(|_| VerifyError::BadInput(format!("invalid address `{}`", request.address)))?;
    let chain_id = parse_chain(&request.chain)?;
    state.chains.get(chain_id)?;

    let files: Vec<(String, Vec<u8>)> = request
        .files
        .into_iter()
        .map(|(name, content)| (name, content.into_bytes()))
        .collect();
    let contract = if !files.is_empty() {
        pick_contract(checker::check_files(&files).contracts, request.chosen_contract)?
    } else if let Some(uri) = &request.metadata_hash {
        let hash = ContentHash::parse(uri)
            .ok_or_else(|| VerifyError::BadInput(format!("unparseable metadata hash `{uri}`")))?;
        state.assembler.assemble(address, chain_id, &hash).await?
    } else {
        return Err(VerifyError::MissingFiles);
    };

    let entry = run_verification(
        &state,
        contract,
        chain_id,
        address,
        request.creator_tx_hash,
        &files,
    )
    .await?;
    Ok(Json(VerifyResponse { result: vec![entry] }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EtherscanRequest {
    address: String,
    chain: Value,
}

/// Pull sources from the chain's configured explorer, rebuild metadata by
/// recompiling, then run the normal pipeline.
async fn verify_etherscan(
    State(state): State<AppState>,
    Json(request): Json<EtherscanRequest>,
) -> Result<Json<VerifyResponse>, VerifyError> {
    let address: Address = request
        .address
        .parse()
        .map_err(|_| VerifyError::BadInput(format!("invalid address `{}`", request.address)))?;
    let chain_id = parse_chain(&request.chain)?;
    let chain = state.chains.get(chain_id)?;
    let Some(explorer_client) = &chain.explorer else {
        return Err(VerifyError::BadInput(format!(
            "chain {chain_id} has no explorer configured"
        )));
    };

    let files = explorer::import_files(explorer_client, state.coordinator.compiler(), &address).await?;
    let contract = pick_contract(checker::check_files(&files).contracts, None)?;
    let entry = run_verification(&state, contract, chain_id, address, None, &files).await?;
    Ok(Json(VerifyResponse { result: vec![entry] }))
}

fn pick_contract(
    mut contracts: Vec<CheckedContract>,
    chosen: Option<usize>,
) -> Result<CheckedContract, VerifyError> {
    match (contracts.len(), chosen) {
        (0, _) => Err(VerifyError::BadInput(
            "no compiler metadata found among the files".to_string(),
        )),
        (1, _) => Ok(contracts.remove(0)),
        (n, Some(index)) if index < n => Ok(contracts.swap_remove(index)),
        (n, Some(index)) => Err(VerifyError::BadInput(format!(
            "chosenContract {index} out of range ({n} contracts found)"
        ))),
        (n, None) => Err(VerifyError::BadInput(format!(
            "{n} contracts found, specify chosenContract"
        ))),
    }
}

async fn run_verification(
    state: &AppState,
    mut contract: CheckedContract,
    chain_id: u64,
    address: Address,
    creator_tx_hash: Option<String>,
    files: &[(String, Vec<u8>)],
) -> Result<ResultEntry, VerifyError> {
    if !contract.missing.is_empty() {
        contract = state.assembler.fill_missing(contract).await?;
    }
    if !contract.is_valid() {
        return Err(VerifyError::BadInput(format!(
            "contract {} is incomplete: missing {:?}, invalid {:?}",
            contract.name(),
            contract.missing.keys().collect::<Vec<_>>(),
            contract.invalid,
        )));
    }

    // Candidate pool for the sentinel recovery pass: every uploaded text
    // file that is not itself a metadata document.
    let text_files: Vec<(String, String)> = files
        .iter()
        .filter_map(|(path, bytes)| {
            std::str::from_utf8(bytes)
                .ok()
                .map(|text| (path.clone(), text.to_string()))
        })
        .filter(|(_, text)| Metadata::parse(text.as_bytes()).is_err())
        .collect();
    let (mut m, used_contract) = state
        .coordinator
        .verify_with_recovery(&contract, chain_id, address, creator_tx_hash, &text_files)
        .await?;
    if m.is_verified() {
        m.storage_timestamp = Some(state.repository.store(&used_contract, &m)?);
    }
    Ok(ResultEntry::from_match(&m))
}

#[derive(Debug, Deserialize)]
struct SessionFilesRequest {
    #[serde(default)]
    files: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SessionVerifyRequest {
    #[serde(default)]
    contracts: Vec<VerificationTarget>,
}

fn session_id(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(id) = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|id| !id.is_empty())
    {
        return id.to_string();
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|age| age.as_nanos())
        .unwrap_or_default();
    let counter = state.session_counter.fetch_add(1, Ordering::Relaxed);
    let mut hasher = Sha1::new();
    hasher.update(nanos.to_be_bytes());
    hasher.update(counter.to_be_bytes());
    hex::encode(hasher.finalize())
}

fn with_session<T: Serialize>(id: String, body: T) -> Response {
    ([(SESSION_HEADER, id)], Json(body)).into_response()
}

async fn session_input_files(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SessionFilesRequest>,
) -> Result<Response, VerifyError> {
    let id = session_id(&state, &headers);
    let files: Vec<(String, Vec<u8>)> = request
        .files
        .into_iter()
        .map(|(name, content)| (name, content.into_bytes()))
        .collect();
    let snapshot = state.sessions.add_files(&id, files).await?;
    Ok(with_session(id, snapshot))
}

async fn session_verify_contracts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SessionVerifyRequest>,
) -> Result<Response, VerifyError> {
    let id = session_id(&state, &headers);
    if !request.contracts.is_empty() {
        state.sessions.set_targets(&id, request.contracts).await?;
    }
    let snapshot = state
        .sessions
        .verify_ready(&id, &state.coordinator, &state.repository)
        .await?;
    Ok(with_session(id, snapshot))
}

async fn session_data(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, VerifyError> {
    let id = session_id(&state, &headers);
    let snapshot = state.sessions.snapshot(&id).await;
    Ok(with_session(id, snapshot))
}

async fn files_tree(
    State(state): State<AppState>,
    Path((partition, chain_id, address)): Path<(String, u64, String)>,
) -> Result<Response, VerifyError> {
    let quality = match partition.as_str() {
        "any" => None,
        "full" => Some(MatchQuality::Full),
        "partial" => Some(MatchQuality::Partial),
        other => {
            return Err(VerifyError::BadInput(format!(
                "unknown partition `{other}`"
            )))
        }
    };
    let address: Address = address
        .parse()
        .map_err(|_| VerifyError::BadInput(format!("invalid address `{address}`")))?;

    let tree = state.repository.file_tree(quality, chain_id, &address);
    if tree.is_empty() {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "not-found", "message": "no stored contract for this address" })),
        )
            .into_response());
    }
    let files: Vec<String> = match &state.repository_server_url {
        Some(base) => tree
            .into_iter()
            .map(|path| format!("{}/{}", base.trim_end_matches('/'), path))
            .collect(),
        None => tree,
    };
    Ok(Json(json!({ "status": "ok", "files": files })).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_ids_parse_from_both_shapes() {
        assert_eq!(parse_chain(&json!(1)).expect("number"), 1);
        assert_eq!(parse_chain(&json!("11155111")).expect("string"), 11155111);
        assert!(parse_chain(&json!(null)).is_err());
        assert!(parse_chain(&json!("mainnet")).is_err());
    }

    #[test]
    fn contract_selection_rules() {
        assert!(pick_contract(Vec::new(), None).is_err());
        let err = pick_contract(Vec::new(), Some(3)).expect_err("empty");
        assert_eq!(err.kind(), "bad-input");
    }
}
