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

//! The on-disk archive of verified contracts:
//! `contracts/{full_match|partial_match}/{chain}/{address}/` holding the
//! metadata, the sources (paths sanitized), and the verification
//! artifacts. Each contract directory carries its own manifest tag,
//! written as the last file of a store; a directory without it is simply
//! absent to readers, so a crash mid-store needs no cleanup. Every
//! successful store also bumps the repository-root `manifest.json` with a
//! monotonically non-decreasing timestamp.

use crate::error::VerifyError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sourceproof_core::checker::CheckedContract;
use sourceproof_core::{Address, Match, MatchKind, MatchQuality};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const DIR_MANIFEST: &str = "manifest.json";

/// The per-directory manifest tag. Presence means every other file in the
/// directory was written; the match columns come from here rather than
/// being guessed from the partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirManifest {
    timestamp: u64,
    runtime_match: Option<MatchKind>,
    creation_match: Option<MatchKind>,
}

fn read_dir_manifest(dir: &Path) -> Option<DirManifest> {
    let bytes = fs::read(dir.join(DIR_MANIFEST)).ok()?;
    serde_json::from_slice(&bytes).ok()
}

pub struct MatchStore {
    root: PathBuf,
    manifest_lock: Mutex<()>,
}

impl MatchStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, VerifyError> {
        let root = root.into();
        fs::create_dir_all(root.join("contracts")).map_err(io_err)?;
        Ok(Self {
            root,
            manifest_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn contract_dir(&self, quality: MatchQuality, chain_id: u64, address: &Address) -> PathBuf {
        self.root
            .join("contracts")
            .join(quality.dir_name())
            .join(chain_id.to_string())
            .join(address.checksummed())
    }

    /// Previously stored matches, full partition first. Either match
    /// column having verified the contract is enough to short-circuit. A
    /// directory without its manifest tag is treated as absent.
    pub fn lookup(&self, chain_id: u64, address: &Address) -> Vec<Match> {
        let mut out = Vec::new();
        for quality in [MatchQuality::Full, MatchQuality::Partial] {
            let dir = self.contract_dir(quality, chain_id, address);
            let Some(manifest) = read_dir_manifest(&dir) else {
                continue;
            };
            let mut m = Match::new(*address, chain_id);
            m.runtime_match = manifest.runtime_match;
            m.creation_match = manifest.creation_match;
            m.creator_tx_hash = fs::read_to_string(dir.join("creator-tx-hash.txt"))
                .ok()
                .map(|s| s.trim().to_string());
            m.storage_timestamp = Some(manifest.timestamp);
            out.push(m);
        }
        out
    }

    /// Persist a verified contract. Idempotent per `(contract, match)`;
    /// a full match replaces any partial directory for the same
    /// deployment. The directory's manifest tag is the last file written,
    /// so readers never see a half-stored contract. Returns the manifest
    /// timestamp.
    pub fn store(&self, contract: &CheckedContract, m: &Match) -> Result<u64, VerifyError> {
        let quality = m
            .quality()
            .ok_or_else(|| VerifyError::BadInput("match did not verify".to_string()))?;
        let dir = self.contract_dir(quality, m.chain_id, &m.address);

        if quality == MatchQuality::Full {
            self.remove_partition(MatchQuality::Partial, m.chain_id, &m.address)?;
        }

        fs::create_dir_all(dir.join("sources")).map_err(io_err)?;
        // Re-stores go through the same invisible state as fresh stores.
        let _ = fs::remove_file(dir.join(DIR_MANIFEST));
        fs::write(dir.join("metadata.json"), &contract.raw_metadata).map_err(io_err)?;

        let mut translations: BTreeMap<String, String> = BTreeMap::new();
        for (path, content) in &contract.sources {
            let sanitized = sanitize_path(path);
            if sanitized != *path {
                translations.insert(path.clone(), sanitized.clone());
            }
            let target = dir.join("sources").join(&sanitized);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
            fs::write(target, content).map_err(io_err)?;
        }
        if translations.is_empty() {
            let _ = fs::remove_file(dir.join("path-translation.json"));
        } else {
            fs::write(
                dir.join("path-translation.json"),
                serde_json::to_vec_pretty(&translations).map_err(json_err)?,
            )
            .map_err(io_err)?;
        }

        if let Some(args) = &m.abi_encoded_constructor_arguments {
            fs::write(dir.join("constructor-args.txt"), args).map_err(io_err)?;
        }
        if let Some(tx_hash) = &m.creator_tx_hash {
            fs::write(dir.join("creator-tx-hash.txt"), tx_hash).map_err(io_err)?;
        }
        if let Some(library_map) = &m.library_map {
            fs::write(
                dir.join("library-map.json"),
                serde_json::to_vec_pretty(library_map).map_err(json_err)?,
            )
            .map_err(io_err)?;
        }
        if let Some(immutables) = &m.immutable_references {
            fs::write(
                dir.join("immutable-references.json"),
                serde_json::to_vec_pretty(immutables).map_err(json_err)?,
            )
            .map_err(io_err)?;
        }

        let timestamp = self.bump_manifest()?;
        let manifest = DirManifest {
            timestamp,
            runtime_match: m.runtime_match,
            creation_match: m.creation_match,
        };
        fs::write(
            dir.join(DIR_MANIFEST),
            serde_json::to_vec(&manifest).map_err(json_err)?,
        )
        .map_err(io_err)?;
        tracing::info!(
            address = %m.address,
            chain_id = m.chain_id,
            partition = quality.dir_name(),
            timestamp,
            "stored verified contract"
        );
        Ok(timestamp)
    }

    /// Relative paths (under the repository root) of every stored file for
    /// the deployment, full partition first. Directories missing their
    /// manifest tag are skipped, and the tag itself is bookkeeping, not
    /// contract content.
    pub fn file_tree(
        &self,
        quality: Option<MatchQuality>,
        chain_id: u64,
        address: &Address,
    ) -> Vec<String> {
        let qualities: &[MatchQuality] = match quality {
            Some(MatchQuality::Full) => &[MatchQuality::Full],
            Some(MatchQuality::Partial) => &[MatchQuality::Partial],
            None => &[MatchQuality::Full, MatchQuality::Partial],
        };
        let mut out = Vec::new();
        for quality in qualities {
            let dir = self.contract_dir(*quality, chain_id, address);
            if read_dir_manifest(&dir).is_none() {
                continue;
            }
            collect_files(&dir, &self.root, &dir.join(DIR_MANIFEST), &mut out);
        }
        out.sort();
        out
    }

    /// Rename aside then delete, so a crashed delete never leaves a
    /// half-removed directory under the live partition.
    fn remove_partition(
        &self,
        quality: MatchQuality,
        chain_id: u64,
        address: &Address,
    ) -> Result<(), VerifyError> {
        let dir = self.contract_dir(quality, chain_id, address);
        if !dir.exists() {
            return Ok(());
        }
        let doomed = dir.with_extension("removing");
        let _ = fs::remove_dir_all(&doomed);
        fs::rename(&dir, &doomed).map_err(io_err)?;
        fs::remove_dir_all(&doomed).map_err(io_err)?;
        Ok(())
    }

    fn bump_manifest(&self) -> Result<u64, VerifyError> {
        let _lock = self.manifest_lock.lock();
        let path = self.root.join("manifest.json");
        let previous = fs::read(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok())
            .and_then(|value| value["timestamp"].as_u64())
            .unwrap_or(0);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| VerifyError::Internal("clock before epoch".to_string()))?
            .as_millis() as u64;
        let timestamp = now.max(previous);
        fs::write(
            &path,
            serde_json::to_vec(&json!({ "timestamp": timestamp })).map_err(json_err)?,
        )
        .map_err(io_err)?;
        Ok(timestamp)
    }
}

fn collect_files(dir: &Path, root: &Path, exclude: &Path, out: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, root, exclude, out);
        } else if path != exclude {
            if let Ok(relative) = path.strip_prefix(root) {
                out.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
    }
}

/// Make a metadata source path safe to write under `sources/`: normalize
/// separators, drop `.`/empty segments and windows drive prefixes, let
/// `..` pop at most what earlier segments pushed, strip newlines.
pub fn sanitize_path(original: &str) -> String {
    let cleaned: String = original
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .collect();
    let cleaned = cleaned.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for segment in cleaned.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s if s.len() == 2 && s.ends_with(':') && s.starts_with(|c: char| c.is_ascii_alphabetic()) => {}
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        "file".to_string()
    } else {
        parts.join("/")
    }
}

fn io_err(err: std::io::Error) -> VerifyError {
    VerifyError::Internal(format!("repository io: {err}"))
}

fn json_err(err: serde_json::Error) -> VerifyError {
    VerifyError::Internal(format!("repository encode: {err}"))
}
