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

//! Assembling a contract from nothing but a metadata content-hash: fetch
//! the metadata, then fan out and fetch every source it references by its
//! own hash, verifying keccak256 integrity on arrival.

use crate::error::VerifyError;
use crate::fetcher::FetcherRegistry;
use sourceproof_core::checker::CheckedContract;
use sourceproof_core::metadata::{keccak256_hex, Metadata};
use sourceproof_core::{Address, ContentHash};
use std::sync::Arc;
use tokio::task::JoinSet;

pub struct PendingAssembler {
    registry: Arc<FetcherRegistry>,
}

enum SourceOutcome {
    /// Body arrived and its digest validates.
    Fetched(String),
    /// A body arrived from some URL but hashed wrong; kept so the mismatch
    /// is reported rather than a bare "missing".
    Mismatch(String),
    NotFound,
}

impl PendingAssembler {
    pub fn new(registry: Arc<FetcherRegistry>) -> Self {
        Self { registry }
    }

    /// The full two-phase assembly. Succeeds even when sources are
    /// missing; the returned contract is then simply not valid, and the
    /// caller decides what to do with it.
    pub async fn assemble(
        &self,
        address: Address,
        chain_id: u64,
        metadata_hash: &ContentHash,
    ) -> Result<CheckedContract, VerifyError> {
        let fetcher = self.registry.get(metadata_hash.origin)?;
        let raw = fetcher.fetch(metadata_hash).await?;
        let metadata = Metadata::parse(&raw)
            .map_err(|err| VerifyError::BadMetadata(err.to_string()))?;
        tracing::info!(
            %address,
            chain_id,
            target = %metadata.compilation_target().map(|(_, name)| name).unwrap_or("?"),
            sources = metadata.sources.len(),
            "assembling contract from metadata hash"
        );
        self.fill_missing(CheckedContract::from_metadata(metadata, raw))
            .await
    }

    /// Fetch whatever the contract is still missing, one concurrent task
    /// per source path. Per-origin fetcher semaphores bound the fan-out.
    pub async fn fill_missing(
        &self,
        mut contract: CheckedContract,
    ) -> Result<CheckedContract, VerifyError> {
        let mut tasks: JoinSet<(String, SourceOutcome)> = JoinSet::new();
        for (path, missing) in contract.missing.clone() {
            let registry = Arc::clone(&self.registry);
            let expected = missing.keccak256.clone();
            let urls = missing.urls.clone();
            tasks.spawn(async move {
                let mut mismatch = None;
                for url in urls {
                    let Some(hash) = ContentHash::parse(&url) else {
                        continue;
                    };
                    let Ok(fetcher) = registry.get(hash.origin) else {
                        continue;
                    };
                    let Ok(bytes) = fetcher.fetch(&hash).await else {
                        continue;
                    };
                    let Ok(text) = String::from_utf8(bytes) else {
                        continue;
                    };
                    if keccak256_hex(text.as_bytes()) == expected {
                        return (path, SourceOutcome::Fetched(text));
                    }
                    tracing::warn!(path = %path, url = %url, "fetched source fails its declared keccak256");
                    mismatch = Some(text);
                }
                match mismatch {
                    Some(text) => (path, SourceOutcome::Mismatch(text)),
                    None => (path, SourceOutcome::NotFound),
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (path, outcome) = joined
                .map_err(|err| VerifyError::Internal(format!("assembly task failed: {err}")))?;
            match outcome {
                // add_source files the body under sources or invalid
                // depending on the digest, which it re-checks itself.
                SourceOutcome::Fetched(text) | SourceOutcome::Mismatch(text) => {
                    contract.add_source(&path, text);
                }
                SourceOutcome::NotFound => {}
            }
        }
        Ok(contract)
    }
}
