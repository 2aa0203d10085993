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

//! sourceproof-daemon
//!
//! The long-running verification service. Takes uploads (or metadata
//! content-hashes, or explorer references), recompiles, compares against
//! chain state and archives verified contracts in a content-addressed
//! repository partitioned into `full_match` / `partial_match`.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod assembler;
pub mod chain;
pub mod compiler;
pub mod config;
pub mod error;
pub mod explorer;
pub mod fetcher;
pub mod repository;
pub mod server;
pub mod session;
pub mod verification;

pub use crate::error::VerifyError;
