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

//! Turning a heterogeneous upload into checked contracts: metadata files
//! are recognized by shape, and every source a metadata declares is hunted
//! down in the upload by its keccak256 digest.

use crate::metadata::{self, Metadata, SourceEntry};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashMismatch {
    pub expected: String,
    pub got: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingSource {
    pub keccak256: String,
    pub urls: Vec<String>,
}

/// A contract assembled from one metadata file plus whatever sources could
/// be located. Valid (compilable) iff `missing` and `invalid` are empty;
/// every path the metadata declares is in exactly one of
/// `sources` / `missing` / `invalid`.
#[derive(Debug, Clone)]
pub struct CheckedContract {
    pub metadata: Metadata,
    pub raw_metadata: Vec<u8>,
    pub sources: BTreeMap<String, String>,
    pub missing: BTreeMap<String, MissingSource>,
    pub invalid: BTreeMap<String, HashMismatch>,
}

impl CheckedContract {
    /// Start from metadata alone: embedded `content` is adopted (and
    /// verified), everything else is missing.
    pub fn from_metadata(metadata: Metadata, raw_metadata: Vec<u8>) -> Self {
        let mut contract = Self {
            sources: BTreeMap::new(),
            missing: BTreeMap::new(),
            invalid: BTreeMap::new(),
            metadata,
            raw_metadata,
        };
        let entries: Vec<(String, SourceEntry)> = contract
            .metadata
            .sources
            .iter()
            .map(|(path, entry)| (path.clone(), entry.clone()))
            .collect();
        for (path, entry) in entries {
            match entry.content.as_deref() {
                Some(content) if entry.matches_content(content) => {
                    contract.sources.insert(path, content.to_string());
                }
                Some(content) => {
                    contract.invalid.insert(
                        path,
                        HashMismatch {
                            expected: entry.expected_hash(),
                            got: metadata::keccak256_hex(content.as_bytes()),
                        },
                    );
                }
                None => {
                    contract.missing.insert(
                        path,
                        MissingSource {
                            keccak256: entry.expected_hash(),
                            urls: entry.urls.clone(),
                        },
                    );
                }
            }
        }
        contract
    }

    pub fn is_valid(&self) -> bool {
        self.missing.is_empty() && self.invalid.is_empty()
    }

    /// Name of the compilation target, for display.
    pub fn name(&self) -> &str {
        self.metadata
            .compilation_target()
            .map(|(_, name)| name)
            .unwrap_or("unknown")
    }

    /// Offer a source body for `path`. Moves the path from `missing` to
    /// `sources` when the digest checks out, to `invalid` otherwise.
    /// Already-validated sources are never overwritten.
    pub fn add_source(&mut self, path: &str, content: String) -> bool {
        if self.sources.contains_key(path) {
            return true;
        }
        let Some(entry) = self.metadata.sources.get(path) else {
            return false;
        };
        if entry.matches_content(&content) {
            self.missing.remove(path);
            self.invalid.remove(path);
            self.sources.insert(path.to_string(), content);
            true
        } else {
            let mismatch = HashMismatch {
                expected: entry.expected_hash(),
                got: metadata::keccak256_hex(content.as_bytes()),
            };
            self.missing.remove(path);
            self.invalid.insert(path.to_string(), mismatch);
            false
        }
    }
}

#[derive(Debug)]
pub struct CheckOutcome {
    pub contracts: Vec<CheckedContract>,
    /// Paths of uploaded files no contract claimed.
    pub unused: Vec<String>,
}

/// Partition an upload into checked contracts (one per metadata file found)
/// plus the files nothing referenced. Uploads routinely arrive with mangled
/// line endings, so a CRLF-normalized digest is tried before giving a
/// source up as missing.
pub fn check_files(files: &[(String, Vec<u8>)]) -> CheckOutcome {
    let mut metadatas: Vec<(usize, Metadata, Vec<u8>)> = Vec::new();
    let mut candidates: Vec<(usize, String)> = Vec::new();

    for (index, (_, bytes)) in files.iter().enumerate() {
        if let Ok(metadata) = Metadata::parse(bytes) {
            metadatas.push((index, metadata, bytes.clone()));
            continue;
        }
        if let Ok(text) = std::str::from_utf8(bytes) {
            candidates.push((index, text.to_string()));
        }
    }

    let mut by_hash: BTreeMap<String, (usize, String)> = BTreeMap::new();
    for (index, text) in &candidates {
        by_hash
            .entry(metadata::keccak256_hex(text.as_bytes()))
            .or_insert((*index, text.clone()));
        if text.contains("\r\n") {
            let normalized = text.replace("\r\n", "\n");
            by_hash
                .entry(metadata::keccak256_hex(normalized.as_bytes()))
                .or_insert((*index, normalized));
        }
    }

    let mut used = vec![false; files.len()];
    let mut contracts = Vec::with_capacity(metadatas.len());
    for (index, metadata, raw) in metadatas {
        used[index] = true;
        let mut contract = CheckedContract::from_metadata(metadata, raw);
        let wanted: Vec<(String, String)> = contract
            .missing
            .iter()
            .map(|(path, missing)| (path.clone(), missing.keccak256.clone()))
            .collect();
        for (path, expected) in wanted {
            if let Some((source_index, text)) = by_hash.get(&expected) {
                used[*source_index] = true;
                contract.add_source(&path, text.clone());
                continue;
            }
            // No digest match anywhere: a file uploaded under the same
            // name is still claimed, so the mismatch surfaces as
            // `invalid {expected, got}` instead of a bare missing path.
            let wanted_name = basename(&path);
            let claimed = candidates.iter().find(|(source_index, _)| {
                !used[*source_index] && basename(&files[*source_index].0) == wanted_name
            });
            if let Some((source_index, text)) = claimed {
                used[*source_index] = true;
                contract.add_source(&path, text.clone());
            }
        }
        contracts.push(contract);
    }

    let unused = files
        .iter()
        .enumerate()
        .filter(|(index, _)| !used[*index])
        .map(|(_, (path, _))| path.clone())
        .collect();

    CheckOutcome { contracts, unused }
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
