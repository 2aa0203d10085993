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

//! Fetching bytes by content hash from decentralized-storage gateways.
//!
//! One fetcher per origin, each with an ordered gateway list: a 4xx from
//! any gateway is permanent (the content cannot be there under a different
//! gateway), everything else falls through to the next one. A per-origin
//! semaphore bounds in-flight requests.

use crate::config::DaemonConfig;
use crate::error::VerifyError;
use async_trait::async_trait;
use sourceproof_core::{ContentHash, HashOrigin};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

#[async_trait]
pub trait StorageFetcher: Send + Sync {
    fn origin(&self) -> HashOrigin;
    async fn fetch(&self, hash: &ContentHash) -> Result<Vec<u8>, VerifyError>;
}

impl std::fmt::Debug for dyn StorageFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageFetcher")
            .field("origin", &self.origin())
            .finish()
    }
}

pub struct GatewayFetcher {
    origin: HashOrigin,
    gateways: Vec<String>,
    timeout: Duration,
    permits: Semaphore,
    client: reqwest::Client,
}

impl GatewayFetcher {
    pub fn new(
        origin: HashOrigin,
        gateways: Vec<String>,
        timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            origin,
            gateways,
            timeout,
            permits: Semaphore::new(concurrency.max(1)),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl StorageFetcher for GatewayFetcher {
    fn origin(&self) -> HashOrigin {
        self.origin
    }

    async fn fetch(&self, hash: &ContentHash) -> Result<Vec<u8>, VerifyError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| VerifyError::Internal("fetcher semaphore closed".to_string()))?;

        for gateway in &self.gateways {
            let url = format!("{}/{}", gateway.trim_end_matches('/'), hash.hash);
            let response = match self
                .client
                .get(&url)
                .timeout(self.timeout)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    tracing::debug!(%url, error = %err, "gateway unreachable, trying next");
                    continue;
                }
            };
            let status = response.status();
            if status.is_success() {
                return match response.bytes().await {
                    Ok(bytes) => Ok(bytes.to_vec()),
                    Err(err) => {
                        tracing::debug!(%url, error = %err, "gateway body read failed");
                        Err(VerifyError::FetchUnavailable(hash.to_string()))
                    }
                };
            }
            if status.is_client_error() {
                return Err(VerifyError::FetchPermanent(hash.to_string()));
            }
            tracing::debug!(%url, %status, "gateway error, trying next");
        }
        Err(VerifyError::FetchUnavailable(hash.to_string()))
    }
}

#[derive(Default)]
pub struct FetcherRegistry {
    fetchers: HashMap<HashOrigin, Arc<dyn StorageFetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, fetcher: Arc<dyn StorageFetcher>) {
        self.fetchers.insert(fetcher.origin(), fetcher);
    }

    pub fn get(&self, origin: HashOrigin) -> Result<Arc<dyn StorageFetcher>, VerifyError> {
        self.fetchers
            .get(&origin)
            .cloned()
            .ok_or_else(|| VerifyError::NoFetcher(origin.as_str().to_string()))
    }

    /// The standard setup: one ipfs fetcher, and both swarm origins served
    /// by the same gateway list.
    pub fn from_config(config: &DaemonConfig) -> Self {
        let mut registry = Self::new();
        registry.insert(Arc::new(GatewayFetcher::new(
            HashOrigin::Ipfs,
            config.ipfs_gateways.clone(),
            config.fetch_timeout,
            config.fetch_concurrency,
        )));
        for origin in [HashOrigin::SwarmBzzr0, HashOrigin::SwarmBzzr1] {
            registry.insert(Arc::new(GatewayFetcher::new(
                origin,
                config.swarm_gateways.clone(),
                config.fetch_timeout,
                config.fetch_concurrency,
            )));
        }
        registry
    }
}
