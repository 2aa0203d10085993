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

//! The verification pipeline: recompile a checked contract, normalize both
//! bytecodes, classify the outcome. At most one verification is in flight
//! per `(chain, address)` across the whole process; concurrent callers are
//! turned away immediately rather than queued.

use crate::chain::ChainRegistry;
use crate::compiler::CompilerDriver;
use crate::error::VerifyError;
use parking_lot::Mutex;
use sourceproof_core::bytecode::{
    classify_creation, classify_runtime, check_constructor_args, extract_immutable_values,
    link_libraries, mask_immutables, parse_hex, recover_library_map,
};
use sourceproof_core::checker::CheckedContract;
use sourceproof_core::standard_json::StandardJsonInput;
use sourceproof_core::{Address, Match, MatchKind};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Process-wide in-flight set. The guard removes its key on drop, so a
/// cancelled request cannot leak an entry.
#[derive(Default, Debug)]
pub struct SingleFlight {
    inflight: Mutex<HashSet<(u64, Address)>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(
        self: &Arc<Self>,
        chain_id: u64,
        address: Address,
    ) -> Result<FlightGuard, VerifyError> {
        let mut inflight = self.inflight.lock();
        if !inflight.insert((chain_id, address)) {
            return Err(VerifyError::AlreadyVerifying { chain_id, address });
        }
        Ok(FlightGuard {
            owner: Arc::clone(self),
            key: (chain_id, address),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }
}

#[derive(Debug)]
pub struct FlightGuard {
    owner: Arc<SingleFlight>,
    key: (u64, Address),
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.owner.inflight.lock().remove(&self.key);
    }
}

pub struct VerificationCoordinator {
    chains: Arc<ChainRegistry>,
    compiler: Arc<dyn CompilerDriver>,
    single_flight: Arc<SingleFlight>,
}

impl VerificationCoordinator {
    pub fn new(chains: Arc<ChainRegistry>, compiler: Arc<dyn CompilerDriver>) -> Self {
        Self {
            chains,
            compiler,
            single_flight: Arc::new(SingleFlight::new()),
        }
    }

    pub fn single_flight(&self) -> &Arc<SingleFlight> {
        &self.single_flight
    }

    pub fn compiler(&self) -> &Arc<dyn CompilerDriver> {
        &self.compiler
    }

    /// Verify one contract against one deployment.
    pub async fn verify_deployed(
        &self,
        contract: &CheckedContract,
        chain_id: u64,
        address: Address,
        creator_tx_hash: Option<String>,
    ) -> Result<Match, VerifyError> {
        let _guard = self.single_flight.try_acquire(chain_id, address)?;
        let chain = self.chains.get(chain_id)?;

        let onchain = chain.client.get_code(&address).await?;
        if onchain.is_empty() {
            return Err(VerifyError::NotDeployed { chain_id, address });
        }

        let creator_tx = match creator_tx_hash {
            Some(tx_hash) => Some(tx_hash),
            None => chain.client.find_creator_tx(&address).await,
        };
        let creation_input = match &creator_tx {
            Some(tx_hash) => chain
                .client
                .get_transaction(tx_hash)
                .await
                .ok()
                .flatten()
                .filter(|tx| tx.to.is_none() && !tx.input.is_empty())
                .map(|tx| tx.input),
            None => None,
        };

        let m = self
            .match_contract(contract, chain_id, address, &onchain, creator_tx, creation_input)
            .await?;
        tracing::info!(
            %address,
            chain_id,
            status = m.status(),
            contract = contract.name(),
            "verification finished"
        );
        Ok(m)
    }

    /// `verify_deployed`, with the sentinel recovery pass: when the first
    /// attempt reports the compiled code strictly extending the deployed
    /// code, recompile with every uploaded file included. A second
    /// sentinel means the upload itself is inconsistent. Returns the match
    /// together with the contract that produced it, which is the expanded
    /// one when recovery kicked in.
    pub async fn verify_with_recovery(
        &self,
        contract: &CheckedContract,
        chain_id: u64,
        address: Address,
        creator_tx_hash: Option<String>,
        all_files: &[(String, String)],
    ) -> Result<(Match, CheckedContract), VerifyError> {
        let first = self
            .verify_deployed(contract, chain_id, address, creator_tx_hash.clone())
            .await?;
        if first.best() != Some(MatchKind::ExtraFileInputBug) {
            return Ok((first, contract.clone()));
        }

        tracing::info!(%address, chain_id, "retrying verification with the full file set");
        let mut expanded = contract.clone();
        for (path, content) in all_files {
            expanded
                .sources
                .entry(path.clone())
                .or_insert_with(|| content.clone());
        }
        let second = self
            .verify_deployed(&expanded, chain_id, address, creator_tx_hash)
            .await?;
        if second.best() == Some(MatchKind::ExtraFileInputBug) {
            return Err(VerifyError::InconsistentUpload);
        }
        Ok((second, expanded))
    }

    async fn match_contract(
        &self,
        contract: &CheckedContract,
        chain_id: u64,
        address: Address,
        onchain: &[u8],
        creator_tx: Option<String>,
        creation_input: Option<Vec<u8>>,
    ) -> Result<Match, VerifyError> {
        let (target_file, target_name) = {
            let (file, name) = contract.metadata.compilation_target()?;
            (file.to_string(), name.to_string())
        };

        let input = StandardJsonInput::from_metadata(&contract.metadata, &contract.sources)?;
        let output = self
            .compiler
            .compile(contract.metadata.compiler_version(), &input)
            .await?;
        let Some(artifact) = output.find_contract(&target_file, &target_name) else {
            let detail = output
                .fatal_errors()
                .first()
                .map(|err| {
                    err.formatted_message
                        .clone()
                        .unwrap_or_else(|| err.message.clone())
                })
                .unwrap_or_else(|| {
                    format!("no artifact for {target_file}:{target_name}")
                });
            return Err(VerifyError::CompilerFailure(detail));
        };

        let libraries = declared_libraries(&contract.metadata.settings.libraries);
        let mut library_map = BTreeMap::new();

        // Runtime side: link declared libraries, recover the rest from the
        // chain, mask immutables on both sides, classify.
        let onchain_hex = hex::encode(onchain);
        let runtime_hex = link_libraries(&artifact.evm.deployed_bytecode.object, &libraries);
        let (runtime_hex, recovered) = recover_library_map(&runtime_hex, &onchain_hex);
        library_map.extend(recovered);
        let compiled_runtime = parse_hex(&runtime_hex)?;

        let references = &artifact.evm.deployed_bytecode.immutable_references;
        let immutable_values = extract_immutable_values(onchain, references);
        let mut compiled_masked = compiled_runtime;
        let mut onchain_masked = onchain.to_vec();
        mask_immutables(&mut compiled_masked, references);
        mask_immutables(&mut onchain_masked, references);

        let mut m = Match::new(address, chain_id);
        m.runtime_match = classify_runtime(&compiled_masked, &onchain_masked);

        // Creation side, when the deployment transaction is known.
        if let Some(tx_input) = creation_input {
            let creation_hex = link_libraries(&artifact.evm.bytecode.object, &libraries);
            let (creation_hex, recovered) =
                recover_library_map(&creation_hex, &hex::encode(&tx_input));
            library_map.extend(recovered);
            let compiled_creation = parse_hex(&creation_hex)?;

            if let Some((kind, args)) = classify_creation(&compiled_creation, &tx_input) {
                let constructor = contract.metadata.constructor()?;
                match check_constructor_args(constructor.as_ref(), &args) {
                    Ok(()) => {
                        m.creation_match = Some(kind);
                        if !args.is_empty() {
                            m.abi_encoded_constructor_arguments =
                                Some(format!("0x{}", hex::encode(&args)));
                        }
                    }
                    Err(_) => {
                        tracing::debug!(
                            %address,
                            chain_id,
                            "creation alignment found, constructor arguments do not decode"
                        );
                    }
                }
            }
        }
        m.creator_tx_hash = creator_tx;

        if !library_map.is_empty() {
            m.library_map = Some(library_map);
        }
        if !immutable_values.is_empty() && m.runtime_match.is_some() {
            m.immutable_references = Some(immutable_values);
        }
        if m.best().is_none() {
            m.message = Some("deployed and recompiled bytecode do not match".to_string());
        }
        Ok(m)
    }
}

/// Flatten the metadata's library declarations into
/// `fully-qualified-name → address` regardless of which of the two shapes
/// the metadata used.
fn declared_libraries(
    libraries: &BTreeMap<String, serde_json::Value>,
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (key, value) in libraries {
        match value {
            serde_json::Value::String(address) => {
                out.insert(key.clone(), address.clone());
            }
            serde_json::Value::Object(entries) => {
                for (name, address) in entries {
                    if let Some(address) = address.as_str() {
                        out.insert(format!("{key}:{name}"), address.to_string());
                    }
                }
            }
            _ => {}
        }
    }
    out
}
