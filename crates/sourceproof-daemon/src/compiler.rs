//! The compiler seam: an opaque `compile(version, input) → output`
//! capability with two interchangeable implementations, a local solc
//! binary and a remote compile function, selected by configuration.

use crate::error::VerifyError;
use async_trait::async_trait;
use sourceproof_core::standard_json::{StandardJsonInput, StandardJsonOutput};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait CompilerDriver: Send + Sync {
    /// `version` is the exact string from metadata, e.g.
    /// `0.8.18+commit.87f61d96`.
    async fn compile(
        &self,
        version: &str,
        input: &StandardJsonInput,
    ) -> Result<StandardJsonOutput, VerifyError>;
}

/// Runs a versioned solc binary from a local directory, standard JSON on
/// stdin/stdout.
pub struct LocalSolc {
    solc_dir: PathBuf,
}

impl LocalSolc {
    pub fn new(solc_dir: PathBuf) -> Self {
        Self { solc_dir }
    }

    fn binary_path(&self, version: &str) -> PathBuf {
        self.solc_dir.join(format!("solc-{version}"))
    }
}

#[async_trait]
impl CompilerDriver for LocalSolc {
    async fn compile(
        &self,
        version: &str,
        input: &StandardJsonInput,
    ) -> Result<StandardJsonOutput, VerifyError> {
        let binary = self.binary_path(version);
        if !binary.is_file() {
            return Err(VerifyError::CompilerUnavailable(version.to_string()));
        }
        let payload = serde_json::to_vec(input)
            .map_err(|err| VerifyError::Internal(format!("serialize compiler input: {err}")))?;

        let mut child = tokio::process::Command::new(&binary)
            .arg("--standard-json")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| VerifyError::CompilerUnavailable(format!("{version}: {err}")))?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|err| VerifyError::CompilerFailure(format!("write stdin: {err}")))?;
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|err| VerifyError::CompilerFailure(format!("wait: {err}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VerifyError::CompilerFailure(format!(
                "solc exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|err| VerifyError::CompilerFailure(format!("unparseable solc output: {err}")))
    }
}

/// Hands the compilation to a remote function; nothing is installed
/// locally.
pub struct LambdaCompiler {
    url: String,
    client: reqwest::Client,
}

impl LambdaCompiler {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CompilerDriver for LambdaCompiler {
    async fn compile(
        &self,
        version: &str,
        input: &StandardJsonInput,
    ) -> Result<StandardJsonOutput, VerifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "version": version, "input": input }))
            .send()
            .await
            .map_err(|err| VerifyError::CompilerFailure(format!("remote compiler: {err}")))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(VerifyError::CompilerUnavailable(version.to_string()));
        }
        if !response.status().is_success() {
            return Err(VerifyError::CompilerFailure(format!(
                "remote compiler returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|err| VerifyError::CompilerFailure(format!("unparseable remote output: {err}")))
    }
}
