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

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use sourceproof_daemon::assembler::PendingAssembler;
use sourceproof_daemon::chain::ChainRegistry;
use sourceproof_daemon::compiler::{CompilerDriver, LambdaCompiler, LocalSolc};
use sourceproof_daemon::config::{self, DaemonConfig};
use sourceproof_daemon::fetcher::FetcherRegistry;
use sourceproof_daemon::repository::MatchStore;
use sourceproof_daemon::server::{self, AppState};
use sourceproof_daemon::session::{SessionConfig, SessionStore};
use sourceproof_daemon::verification::VerificationCoordinator;

#[derive(Debug, Parser)]
#[command(name = "sourceproof-daemon")]
#[command(about = "SourceProof contract-verification daemon")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:5555")]
    listen: String,

    #[arg(long, default_value = "info")]
    log: String,

    #[arg(long, default_value = "./repository")]
    repository_path: PathBuf,

    /// Public base URL the repository is served under, used in file-tree
    /// replies.
    #[arg(long)]
    repository_server_url: Option<String>,

    #[arg(long, default_value = "./chains.json")]
    chains_file: PathBuf,

    /// IPFS gateway base URL; repeat for fallbacks.
    #[arg(long = "ipfs-gateway")]
    ipfs_gateways: Vec<String>,

    /// Swarm gateway base URL; repeat for fallbacks.
    #[arg(long = "swarm-gateway")]
    swarm_gateways: Vec<String>,

    #[arg(long, default_value_t = 30)]
    fetch_timeout_secs: u64,

    #[arg(long, default_value_t = 8)]
    fetch_concurrency: usize,

    /// Directory holding `solc-<version>` binaries.
    #[arg(long, default_value = "./solc-bin")]
    solc_dir: PathBuf,

    /// Remote compile endpoint; presence selects it over local solc.
    #[arg(long)]
    lambda_compiler_url: Option<String>,

    #[arg(long, default_value_t = 50 * 1024 * 1024)]
    session_max_bytes: usize,

    #[arg(long, default_value_t = 30 * 60)]
    session_idle_secs: u64,

    #[arg(long, default_value_t = 60 * 1024 * 1024)]
    max_request_bytes: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(args.log.clone()))
        .init();

    let mut config = DaemonConfig {
        repository_path: args.repository_path.clone(),
        repository_server_url: args.repository_server_url.clone(),
        fetch_timeout: Duration::from_secs(args.fetch_timeout_secs),
        fetch_concurrency: args.fetch_concurrency,
        solc_dir: args.solc_dir.clone(),
        lambda_compiler_url: args.lambda_compiler_url.clone(),
        session_max_bytes: args.session_max_bytes,
        session_idle: Duration::from_secs(args.session_idle_secs),
        max_request_bytes: args.max_request_bytes,
        ..DaemonConfig::default()
    };
    if !args.ipfs_gateways.is_empty() {
        config.ipfs_gateways = args.ipfs_gateways.clone();
    }
    if !args.swarm_gateways.is_empty() {
        config.swarm_gateways = args.swarm_gateways.clone();
    }

    let specs = config::load_chain_specs(&args.chains_file)
        .map_err(|err| anyhow!("{err}"))
        .with_context(|| format!("loading chains file {}", args.chains_file.display()))?;
    let chains = Arc::new(ChainRegistry::from_specs(&specs));
    tracing::info!(count = specs.len(), file = %args.chains_file.display(), "loaded chain registry");

    let compiler: Arc<dyn CompilerDriver> = match &config.lambda_compiler_url {
        Some(url) => {
            tracing::info!(%url, "using remote compiler");
            Arc::new(LambdaCompiler::new(url.clone()))
        }
        None => {
            tracing::info!(solc_dir = %config.solc_dir.display(), "using local solc binaries");
            Arc::new(LocalSolc::new(config.solc_dir.clone()))
        }
    };

    let fetchers = Arc::new(FetcherRegistry::from_config(&config));
    let repository = Arc::new(
        MatchStore::open(&config.repository_path).with_context(|| {
            format!("opening repository at {}", config.repository_path.display())
        })?,
    );
    let coordinator = Arc::new(VerificationCoordinator::new(Arc::clone(&chains), compiler));
    let sessions = Arc::new(SessionStore::new(SessionConfig {
        max_bytes: config.session_max_bytes,
        idle: config.session_idle,
    }));
    let state = AppState::new(
        sessions,
        coordinator,
        repository,
        Arc::new(PendingAssembler::new(fetchers)),
        chains,
        config.repository_server_url.clone(),
    );

    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    tracing::info!(
        listen = %args.listen,
        repository = %config.repository_path.display(),
        "starting SourceProof daemon"
    );
    server::serve(listener, state, config.max_request_bytes)
        .await
        .context("server terminated")?;
    Ok(())
}
