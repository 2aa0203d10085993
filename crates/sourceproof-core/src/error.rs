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

use thiserror::Error;

pub type SourceProofResult<T> = Result<T, SourceProofError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceProofError {
    #[error("malformed compiler metadata: {0}")]
    BadMetadata(String),

    #[error("metadata names no single compilation target")]
    BadCompilationTarget,

    #[error("invalid address")]
    BadAddress,

    #[error("bytecode is not valid hex")]
    BadBytecodeHex,

    #[error("contract ABI does not deserialize")]
    BadAbi,

    #[error("constructor arguments do not decode against the ABI")]
    ConstructorArgsMismatch,
}
