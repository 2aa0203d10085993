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

//! sourceproof-core
//!
//! Verification primitives for EVM smart contracts:
//! - decentralized-storage content hashes (ipfs / swarm) and the CBOR
//!   auxdata trailer solc appends to bytecode
//! - the compiler-emitted metadata model and standard-JSON reconstruction
//! - contract checking: partitioning uploads into metadata + sources by
//!   keccak256 identity
//! - bytecode normalization (library linking, auxdata stripping, immutable
//!   masking) and match classification
//!
//! Everything here is pure: no network, no filesystem, no clocks. The
//! daemon crate supplies fetchers, compilers and chain access.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod address;
pub mod auxdata;
pub mod bytecode;
pub mod checker;
pub mod content_hash;
pub mod error;
pub mod metadata;
pub mod outcome;
pub mod standard_json;

pub use crate::address::Address;
pub use crate::checker::CheckedContract;
pub use crate::content_hash::{ContentHash, HashOrigin};
pub use crate::error::{SourceProofError, SourceProofResult};
pub use crate::outcome::{Match, MatchKind, MatchQuality};
