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

//! The compiler-emitted metadata document: language, exact compiler
//! version, settings (including the single compilation target), the source
//! map with per-source keccak256 digests and storage URLs, and the output
//! ABI.

use crate::error::{SourceProofError, SourceProofResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha3::{Digest, Keccak256};
use std::collections::BTreeMap;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Lowercase hex without a `0x` prefix; the canonical form digests are
/// compared in.
pub fn keccak256_hex(data: &[u8]) -> String {
    hex::encode(keccak256(data))
}

pub fn normalize_hash_hex(s: &str) -> String {
    s.strip_prefix("0x").unwrap_or(s).to_ascii_lowercase()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub language: String,
    pub compiler: CompilerInfo,
    pub settings: MetadataSettings,
    pub sources: BTreeMap<String, SourceEntry>,
    #[serde(default)]
    pub output: MetadataOutput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerInfo {
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataSettings {
    #[serde(rename = "compilationTarget", default)]
    pub compilation_target: BTreeMap<String, String>,
    /// Either the metadata's flat `file.sol:Lib → address` form or the
    /// standard-JSON nested form; normalized when rebuilding input.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub libraries: BTreeMap<String, Value>,
    /// Optimizer, evmVersion, remappings, viaIR, … — passed through to the
    /// compiler untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataOutput {
    #[serde(default)]
    pub abi: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    pub keccak256: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

impl SourceEntry {
    pub fn expected_hash(&self) -> String {
        normalize_hash_hex(&self.keccak256)
    }

    /// Does `content` hash to this entry's declared keccak256?
    pub fn matches_content(&self, content: &str) -> bool {
        keccak256_hex(content.as_bytes()) == self.expected_hash()
    }
}

impl Metadata {
    pub fn parse(raw: &[u8]) -> SourceProofResult<Self> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|err| SourceProofError::BadMetadata(err.to_string()))?;
        if !looks_like_metadata(&value) {
            return Err(SourceProofError::BadMetadata(
                "missing language/compiler/settings/sources".to_string(),
            ));
        }
        serde_json::from_value(value).map_err(|err| SourceProofError::BadMetadata(err.to_string()))
    }

    /// The one `(source path, contract name)` pair this metadata compiles.
    pub fn compilation_target(&self) -> SourceProofResult<(&str, &str)> {
        let mut entries = self.settings.compilation_target.iter();
        match (entries.next(), entries.next()) {
            (Some((path, name)), None) => Ok((path, name)),
            _ => Err(SourceProofError::BadCompilationTarget),
        }
    }

    pub fn compiler_version(&self) -> &str {
        &self.compiler.version
    }

    /// The constructor of the target contract, if the ABI declares one.
    pub fn constructor(&self) -> SourceProofResult<Option<ethabi::Constructor>> {
        if self.output.abi.is_null() {
            return Ok(None);
        }
        let contract: ethabi::Contract = serde_json::from_value(self.output.abi.clone())
            .map_err(|_| SourceProofError::BadAbi)?;
        Ok(contract.constructor)
    }
}

/// The shape heuristic for telling metadata files apart from sources in a
/// mixed upload.
pub fn looks_like_metadata(value: &Value) -> bool {
    let Some(map) = value.as_object() else {
        return false;
    };
    ["language", "compiler", "settings", "sources"]
        .iter()
        .all(|key| map.contains_key(*key))
}
