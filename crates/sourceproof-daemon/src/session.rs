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

//! Staged verification across requests: a session accumulates uploaded
//! files, contracts resolve incrementally as their sources arrive, and
//! verification runs once a contract is complete and targeted at a
//! deployment. Mutations within one session are serialized; sessions
//! expire on idle.

use crate::error::VerifyError;
use crate::repository::MatchStore;
use crate::verification::VerificationCoordinator;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use sourceproof_core::checker::{self, CheckedContract, HashMismatch, MissingSource};
use sourceproof_core::metadata::Metadata;
use sourceproof_core::Address;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_bytes: usize,
    pub idle: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_bytes: 50 * 1024 * 1024,
            idle: Duration::from_secs(30 * 60),
        }
    }
}

struct StagedFile {
    path: String,
    content: Vec<u8>,
}

struct StagedContract {
    contract: CheckedContract,
    address: Option<Address>,
    chain_id: Option<u64>,
    creator_tx_hash: Option<String>,
    status: Option<String>,
    storage_timestamp: Option<u64>,
    message: Option<String>,
}

#[derive(Default)]
struct SessionState {
    /// content sha1 → file
    files: BTreeMap<String, StagedFile>,
    /// sha1 of raw metadata → contract
    contracts: BTreeMap<String, StagedContract>,
    unused: Vec<String>,
}

struct Session {
    last_seen: Mutex<Instant>,
    state: tokio::sync::Mutex<SessionState>,
}

pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    config: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationTarget {
    pub verification_id: String,
    pub address: Address,
    pub chain_id: u64,
    #[serde(default)]
    pub creator_tx_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub contracts: Vec<ContractSnapshot>,
    pub unused: Vec<String>,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSnapshot {
    pub verification_id: String,
    pub name: String,
    pub compiler_version: String,
    pub verifiable: bool,
    pub files_found: Vec<String>,
    pub missing: BTreeMap<String, MissingSource>,
    pub invalid: BTreeMap<String, HashMismatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn handle(&self, id: &str) -> Arc<Session> {
        let mut sessions = self.sessions.lock();
        sessions.retain(|_, session| session.last_seen.lock().elapsed() < self.config.idle);
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                Arc::new(Session {
                    last_seen: Mutex::new(Instant::now()),
                    state: tokio::sync::Mutex::new(SessionState::default()),
                })
            })
            .clone();
        *session.last_seen.lock() = Instant::now();
        session
    }

    /// Stage files, dedupe by content, and re-resolve contracts over the
    /// whole staged set. Rejects the batch outright when it would push the
    /// session past its size cap.
    pub async fn add_files(
        &self,
        id: &str,
        files: Vec<(String, Vec<u8>)>,
    ) -> Result<SessionSnapshot, VerifyError> {
        let session = self.handle(id);
        let mut state = session.state.lock().await;

        let staged: usize = state.files.values().map(|f| f.content.len()).sum();
        let mut incoming = 0usize;
        let mut fresh: Vec<(String, StagedFile)> = Vec::new();
        for (path, content) in files {
            let content_id = sha1_hex(&content);
            if state.files.contains_key(&content_id)
                || fresh.iter().any(|(id, _)| *id == content_id)
            {
                continue;
            }
            incoming += content.len();
            fresh.push((content_id, StagedFile { path, content }));
        }
        if staged + incoming > self.config.max_bytes {
            return Err(VerifyError::PayloadTooLarge);
        }
        for (content_id, file) in fresh {
            state.files.insert(content_id, file);
        }

        self.recheck(&mut state);
        Ok(snapshot_of(&state))
    }

    /// Point staged contracts at deployments.
    pub async fn set_targets(
        &self,
        id: &str,
        targets: Vec<VerificationTarget>,
    ) -> Result<SessionSnapshot, VerifyError> {
        let session = self.handle(id);
        let mut state = session.state.lock().await;
        for target in targets {
            let Some(entry) = state.contracts.get_mut(&target.verification_id) else {
                return Err(VerifyError::BadInput(format!(
                    "unknown verification id {}",
                    target.verification_id
                )));
            };
            entry.address = Some(target.address);
            entry.chain_id = Some(target.chain_id);
            entry.creator_tx_hash = target.creator_tx_hash;
        }
        Ok(snapshot_of(&state))
    }

    /// Verify every staged contract that is complete and targeted. A
    /// deployment the repository already holds short-circuits with the
    /// stored result.
    pub async fn verify_ready(
        &self,
        id: &str,
        coordinator: &VerificationCoordinator,
        repository: &MatchStore,
    ) -> Result<SessionSnapshot, VerifyError> {
        let session = self.handle(id);
        let mut state = session.state.lock().await;

        let all_files: Vec<(String, String)> = state
            .files
            .values()
            .filter_map(|file| {
                std::str::from_utf8(&file.content)
                    .ok()
                    .map(|text| (file.path.clone(), text.to_string()))
            })
            .filter(|(_, text)| Metadata::parse(text.as_bytes()).is_err())
            .collect();

        let keys: Vec<String> = state.contracts.keys().cloned().collect();
        for key in keys {
            let (contract, chain_id, address, creator_tx_hash) = {
                let Some(entry) = state.contracts.get(&key) else {
                    continue;
                };
                if entry.storage_timestamp.is_some() {
                    continue;
                }
                let (Some(address), Some(chain_id)) = (entry.address, entry.chain_id) else {
                    continue;
                };
                if !entry.contract.is_valid() {
                    continue;
                }
                (
                    entry.contract.clone(),
                    chain_id,
                    address,
                    entry.creator_tx_hash.clone(),
                )
            };

            let already = repository.lookup(chain_id, &address);
            if let Some(found) = already.first() {
                if let Some(entry) = state.contracts.get_mut(&key) {
                    entry.status = Some(found.status().to_string());
                    entry.storage_timestamp = found.storage_timestamp;
                }
                continue;
            }

            match coordinator
                .verify_with_recovery(&contract, chain_id, address, creator_tx_hash, &all_files)
                .await
            {
                Ok((m, used_contract)) => {
                    let timestamp = if m.is_verified() {
                        Some(repository.store(&used_contract, &m)?)
                    } else {
                        None
                    };
                    if let Some(entry) = state.contracts.get_mut(&key) {
                        entry.status = Some(m.status().to_string());
                        entry.storage_timestamp = timestamp;
                        entry.message = m.message.clone();
                    }
                }
                Err(err) => {
                    if let Some(entry) = state.contracts.get_mut(&key) {
                        entry.status = Some("error".to_string());
                        entry.message = Some(err.to_string());
                    }
                }
            }
        }
        Ok(snapshot_of(&state))
    }

    pub async fn snapshot(&self, id: &str) -> SessionSnapshot {
        let session = self.handle(id);
        let state = session.state.lock().await;
        snapshot_of(&state)
    }

    /// Re-run the checker over the full staged set and merge results into
    /// existing contracts: newly found sources fill gaps, validated ones
    /// are never overwritten.
    fn recheck(&self, state: &mut SessionState) {
        let all_files: Vec<(String, Vec<u8>)> = state
            .files
            .values()
            .map(|file| (file.path.clone(), file.content.clone()))
            .collect();
        let outcome = checker::check_files(&all_files);
        for contract in outcome.contracts {
            let key = sha1_hex(&contract.raw_metadata);
            match state.contracts.get_mut(&key) {
                Some(entry) => {
                    for (path, content) in contract.sources {
                        entry.contract.add_source(&path, content);
                    }
                    for (path, mismatch) in contract.invalid {
                        if !entry.contract.sources.contains_key(&path) {
                            entry.contract.missing.remove(&path);
                            entry.contract.invalid.insert(path, mismatch);
                        }
                    }
                }
                None => {
                    state.contracts.insert(
                        key,
                        StagedContract {
                            contract,
                            address: None,
                            chain_id: None,
                            creator_tx_hash: None,
                            status: None,
                            storage_timestamp: None,
                            message: None,
                        },
                    );
                }
            }
        }
        state.unused = outcome.unused;
    }
}

fn snapshot_of(state: &SessionState) -> SessionSnapshot {
    let contracts = state
        .contracts
        .iter()
        .map(|(key, entry)| ContractSnapshot {
            verification_id: key.clone(),
            name: entry.contract.name().to_string(),
            compiler_version: entry.contract.metadata.compiler_version().to_string(),
            verifiable: entry.contract.is_valid(),
            files_found: entry.contract.sources.keys().cloned().collect(),
            missing: entry.contract.missing.clone(),
            invalid: entry.contract.invalid.clone(),
            address: entry.address,
            chain_id: entry.chain_id,
            status: entry.status.clone(),
            storage_timestamp: entry.storage_timestamp,
            message: entry.message.clone(),
        })
        .collect();
    SessionSnapshot {
        contracts,
        unused: state.unused.clone(),
        files: state.files.values().map(|file| file.path.clone()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sourceproof_core::metadata::keccak256_hex;

    fn store_with_cap(max_bytes: usize) -> SessionStore {
        SessionStore::new(SessionConfig {
            max_bytes,
            idle: Duration::from_secs(600),
        })
    }

    fn metadata_bytes(sources: &[(&str, &str)]) -> Vec<u8> {
        let mut source_map = serde_json::Map::new();
        for (path, content) in sources {
            source_map.insert(
                path.to_string(),
                serde_json::json!({ "keccak256": format!("0x{}", keccak256_hex(content.as_bytes())) }),
            );
        }
        serde_json::to_vec(&serde_json::json!({
            "compiler": { "version": "0.8.18+commit.87f61d96" },
            "language": "Solidity",
            "output": { "abi": [] },
            "settings": {
                "compilationTarget": { sources[0].0: "Main" },
                "optimizer": { "enabled": false, "runs": 200 }
            },
            "sources": source_map,
            "version": 1
        }))
        .expect("serialize")
    }

    #[tokio::test]
    async fn contracts_resolve_incrementally() {
        let store = store_with_cap(1024 * 1024);
        let main = "contract Main {}";
        let lib = "library Help {}";
        let metadata = metadata_bytes(&[("Main.sol", main), ("Help.sol", lib)]);

        let snapshot = store
            .add_files(
                "s1",
                vec![
                    ("metadata.json".to_string(), metadata),
                    ("Main.sol".to_string(), main.as_bytes().to_vec()),
                ],
            )
            .await
            .expect("add");
        assert_eq!(snapshot.contracts.len(), 1);
        assert!(!snapshot.contracts[0].verifiable);
        assert!(snapshot.contracts[0].missing.contains_key("Help.sol"));

        let snapshot = store
            .add_files("s1", vec![("Help.sol".to_string(), lib.as_bytes().to_vec())])
            .await
            .expect("add second");
        assert_eq!(snapshot.contracts.len(), 1);
        assert!(snapshot.contracts[0].verifiable);
    }

    #[tokio::test]
    async fn size_cap_is_exact() {
        let store = store_with_cap(10);
        store
            .add_files("s1", vec![("a.bin".to_string(), vec![0u8; 10])])
            .await
            .expect("exactly at the cap");

        let err = store
            .add_files("s1", vec![("b.bin".to_string(), vec![1u8; 1])])
            .await
            .expect_err("one byte over");
        assert_eq!(err.kind(), "payload-too-large");
    }

    #[tokio::test]
    async fn duplicate_content_does_not_count_twice() {
        let store = store_with_cap(10);
        store
            .add_files("s1", vec![("a.bin".to_string(), vec![0u8; 10])])
            .await
            .expect("at cap");
        // Same bytes under a different name: deduped, so still at cap.
        store
            .add_files("s1", vec![("copy.bin".to_string(), vec![0u8; 10])])
            .await
            .expect("dedupe");
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = store_with_cap(1024);
        store
            .add_files("alice", vec![("a.sol".to_string(), b"contract A {}".to_vec())])
            .await
            .expect("add");
        let bob = store.snapshot("bob").await;
        assert!(bob.files.is_empty());
        let alice = store.snapshot("alice").await;
        assert_eq!(alice.files, vec!["a.sol".to_string()]);
    }

    #[tokio::test]
    async fn targets_attach_to_contracts() {
        let store = store_with_cap(1024 * 1024);
        let main = "contract Main {}";
        let metadata = metadata_bytes(&[("Main.sol", main)]);
        let metadata_id = sha1_hex(&metadata);
        store
            .add_files("s1", vec![("metadata.json".to_string(), metadata)])
            .await
            .expect("add");

        let snapshot = store
            .set_targets(
                "s1",
                vec![VerificationTarget {
                    verification_id: metadata_id,
                    address: "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".parse().expect("addr"),
                    chain_id: 1,
                    creator_tx_hash: None,
                }],
            )
            .await
            .expect("targets");
        assert_eq!(snapshot.contracts[0].chain_id, Some(1));

        let err = store
            .set_targets(
                "s1",
                vec![VerificationTarget {
                    verification_id: "deadbeef".to_string(),
                    address: "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".parse().expect("addr"),
                    chain_id: 1,
                    creator_tx_hash: None,
                }],
            )
            .await
            .expect_err("unknown id");
        assert_eq!(err.kind(), "bad-input");
    }
}
