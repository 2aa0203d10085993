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

//! Content hashes on decentralized storage: an `(origin, hash)` pair
//! parsed from the URI forms compiler metadata embeds
//! (`dweb:/ipfs/<cid>`, `ipfs://<cid>`, `bzz-raw://<hex>`, `bzzr0://<hex>`,
//! `bzzr1://<hex>`) or recovered from the bytecode auxdata trailer.

use crate::auxdata::{self, AuxdataValue};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashOrigin {
    Ipfs,
    SwarmBzzr0,
    SwarmBzzr1,
}

impl HashOrigin {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ipfs => "ipfs",
            Self::SwarmBzzr0 => "swarm-bzzr0",
            Self::SwarmBzzr1 => "swarm-bzzr1",
        }
    }
}

impl fmt::Display for HashOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `hash` is the gateway-path form: a base58 CID for ipfs, 64 hex chars
/// for swarm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash {
    pub origin: HashOrigin,
    pub hash: String,
}

impl ContentHash {
    /// Parse a storage URI from a metadata `urls` entry. Unknown schemes
    /// (including plain `https://`) yield `None`: there is no fetcher for
    /// them.
    pub fn parse(uri: &str) -> Option<Self> {
        let (origin, rest) = if let Some(rest) = uri.strip_prefix("dweb:/ipfs/") {
            (HashOrigin::Ipfs, rest)
        } else if let Some(rest) = uri.strip_prefix("ipfs://") {
            (HashOrigin::Ipfs, rest)
        } else if let Some(rest) = uri.strip_prefix("bzz-raw://") {
            (HashOrigin::SwarmBzzr1, rest)
        } else if let Some(rest) = uri.strip_prefix("bzzr0://") {
            (HashOrigin::SwarmBzzr0, rest)
        } else if let Some(rest) = uri.strip_prefix("bzzr1://") {
            (HashOrigin::SwarmBzzr1, rest)
        } else {
            return None;
        };
        let rest = rest.trim_end_matches('/');
        match origin {
            HashOrigin::Ipfs => {
                if rest.is_empty() || !rest.bytes().all(is_base58) {
                    return None;
                }
            }
            HashOrigin::SwarmBzzr0 | HashOrigin::SwarmBzzr1 => {
                if rest.len() != 64 || !rest.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return None;
                }
            }
        }
        Some(Self {
            origin,
            hash: rest.to_string(),
        })
    }

    /// Recover the content hashes a contract advertises in its auxdata
    /// trailer. The `ipfs` value is the raw multihash; swarm values are
    /// 32-byte digests.
    pub fn from_auxdata(auxdata_bytes: &[u8]) -> Vec<Self> {
        let Some(map) = auxdata::decode_map(auxdata_bytes) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        if let Some(AuxdataValue::Bytes(multihash)) = map.get("ipfs") {
            out.push(Self {
                origin: HashOrigin::Ipfs,
                hash: base58_encode(multihash),
            });
        }
        if let Some(AuxdataValue::Bytes(digest)) = map.get("bzzr0") {
            out.push(Self {
                origin: HashOrigin::SwarmBzzr0,
                hash: hex::encode(digest),
            });
        }
        if let Some(AuxdataValue::Bytes(digest)) = map.get("bzzr1") {
            out.push(Self {
                origin: HashOrigin::SwarmBzzr1,
                hash: hex::encode(digest),
            });
        }
        out
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            HashOrigin::Ipfs => write!(f, "ipfs://{}", self.hash),
            HashOrigin::SwarmBzzr0 => write!(f, "bzzr0://{}", self.hash),
            HashOrigin::SwarmBzzr1 => write!(f, "bzzr1://{}", self.hash),
        }
    }
}

const BASE58_ALPHABET: &[u8; 58] =
    b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

fn is_base58(b: u8) -> bool {
    BASE58_ALPHABET.contains(&b)
}

/// base58btc, as used by CIDv0. Input sizes here are 34 bytes, so the
/// quadratic repeated division is irrelevant.
fn base58_encode(input: &[u8]) -> String {
    let mut digits: Vec<u8> = Vec::with_capacity(input.len() * 2);
    for &byte in input {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            carry += (*digit as u32) << 8;
            *digit = (carry % 58) as u8;
            carry /= 58;
        }
        while carry > 0 {
            digits.push((carry % 58) as u8);
            carry /= 58;
        }
    }
    let leading_zeros = input.iter().take_while(|&&b| b == 0).count();
    let mut out = String::with_capacity(leading_zeros + digits.len());
    for _ in 0..leading_zeros {
        out.push('1');
    }
    for &digit in digits.iter().rev() {
        out.push(BASE58_ALPHABET[digit as usize] as char);
    }
    out
}
