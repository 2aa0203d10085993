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

//! Bytecode normalization and comparison.
//!
//! Compiled bytecode leaves solc as a hex string that may still contain
//! library placeholders (`__$<34 hex>$__`, or the pre-0.5 name form
//! `__File.sol:Lib____…`). Linking and placeholder recovery therefore
//! operate on the hex text; everything downstream (auxdata stripping,
//! immutable masking, classification) operates on decoded bytes.

use crate::auxdata::split_auxdata;
use crate::error::{SourceProofError, SourceProofResult};
use crate::metadata::keccak256_hex;
use crate::outcome::MatchKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One placeholder occupies 40 hex chars, i.e. the 20 bytes of the library
/// address it stands for.
const PLACEHOLDER_LEN: usize = 40;

pub fn parse_hex(code: &str) -> SourceProofResult<Vec<u8>> {
    let stripped = code.strip_prefix("0x").unwrap_or(code);
    hex::decode(stripped).map_err(|_| SourceProofError::BadBytecodeHex)
}

/// The `__$…$__` placeholder solc emits for a fully qualified library name.
pub fn modern_placeholder(fully_qualified_name: &str) -> String {
    let digest = keccak256_hex(fully_qualified_name.as_bytes());
    format!("__${}$__", &digest[..34])
}

/// The pre-0.5.0 form: the name itself, truncated and padded with
/// underscores to the placeholder width.
pub fn legacy_placeholder(fully_qualified_name: &str) -> String {
    let mut name: String = fully_qualified_name.chars().take(36).collect();
    name.insert_str(0, "__");
    while name.len() < PLACEHOLDER_LEN {
        name.push('_');
    }
    name
}

/// Replace the placeholders for each `fully qualified name → address` pair.
/// Addresses are embedded lowercase without the `0x` prefix.
pub fn link_libraries(code: &str, libraries: &BTreeMap<String, String>) -> String {
    let mut linked = code.to_string();
    for (name, address) in libraries {
        let addr = address
            .strip_prefix("0x")
            .unwrap_or(address)
            .to_ascii_lowercase();
        if addr.len() != PLACEHOLDER_LEN {
            continue;
        }
        linked = linked.replace(&modern_placeholder(name), &addr);
        linked = linked.replace(&legacy_placeholder(name), &addr);
    }
    linked
}

/// For every placeholder still present in `compiled`, adopt the 20 bytes
/// the on-chain code has at the same offset. Returns the linked hex plus
/// the `placeholder → 0x-address` map recovered this way.
pub fn recover_library_map(
    compiled: &str,
    onchain: &str,
) -> (String, BTreeMap<String, String>) {
    let onchain = onchain.strip_prefix("0x").unwrap_or(onchain);
    let mut linked = String::with_capacity(compiled.len());
    let mut map = BTreeMap::new();
    let bytes = compiled.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'_' && i + PLACEHOLDER_LEN <= bytes.len() && i + PLACEHOLDER_LEN <= onchain.len() {
            let token = &compiled[i..i + PLACEHOLDER_LEN];
            if is_placeholder(token) {
                let address = onchain[i..i + PLACEHOLDER_LEN].to_ascii_lowercase();
                map.insert(token.to_string(), format!("0x{address}"));
                linked.push_str(&address);
                i += PLACEHOLDER_LEN;
                continue;
            }
        }
        linked.push(bytes[i] as char);
        i += 1;
    }
    (linked, map)
}

fn is_placeholder(token: &str) -> bool {
    if token.len() != PLACEHOLDER_LEN || !token.starts_with("__") {
        return false;
    }
    if let Some(inner) = token.strip_prefix("__$") {
        return inner.ends_with("$__")
            && inner[..inner.len() - 3].bytes().all(|b| b.is_ascii_hexdigit());
    }
    // Legacy form: anything solc allows in a path/name, underscore-padded.
    token.ends_with("__")
}

/// Immutable reference spans as solc reports them in
/// `evm.deployedBytecode.immutableReferences`: byte offsets into the
/// runtime code, keyed by AST id.
pub type ImmutableReferences = BTreeMap<String, Vec<ImmutableSpan>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImmutableSpan {
    pub start: usize,
    pub length: usize,
}

/// Zero every immutable span. Applied to both sides before comparison so
/// deployment-time values cannot fail the match.
pub fn mask_immutables(code: &mut [u8], references: &ImmutableReferences) {
    for spans in references.values() {
        for span in spans {
            let end = span.start.saturating_add(span.length).min(code.len());
            if span.start < end {
                code[span.start..end].fill(0);
            }
        }
    }
}

/// The deployment-time values the chain holds in each immutable slot,
/// keyed by AST id, hex-encoded.
pub fn extract_immutable_values(
    onchain: &[u8],
    references: &ImmutableReferences,
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (id, spans) in references {
        if let Some(span) = spans.first() {
            let end = span.start.saturating_add(span.length).min(onchain.len());
            if span.start < end {
                out.insert(id.clone(), format!("0x{}", hex::encode(&onchain[span.start..end])));
            }
        }
    }
    out
}

fn eq_with_zero_tail(compiled: &[u8], onchain: &[u8]) -> bool {
    if compiled.len() > onchain.len() {
        return false;
    }
    onchain[..compiled.len()] == *compiled && onchain[compiled.len()..].iter().all(|b| *b == 0)
}

/// Classify recompiled runtime code against the chain, after linking and
/// immutable masking.
///
/// - byte equality (tolerating an all-zero on-chain tail, which the EVM
///   pads) → `Perfect`
/// - same code body under a different auxdata trailer → `Partial`
/// - compiled strictly extends the deployed code → `ExtraFileInputBug`
/// - anything else → no match
pub fn classify_runtime(compiled: &[u8], onchain: &[u8]) -> Option<MatchKind> {
    if compiled.is_empty() || onchain.is_empty() {
        return None;
    }
    if eq_with_zero_tail(compiled, onchain) {
        return Some(MatchKind::Perfect);
    }
    if let (Some((compiled_body, _)), Some((onchain_body, _))) =
        (split_auxdata(compiled), split_auxdata(onchain))
    {
        if compiled_body == onchain_body {
            return Some(MatchKind::Partial);
        }
    }
    if compiled.len() > onchain.len() && compiled[..onchain.len()] == *onchain {
        return Some(MatchKind::ExtraFileInputBug);
    }
    None
}

/// Align recompiled creation code against the deployment transaction's
/// calldata. On success the tail is the ABI-encoded constructor arguments.
pub fn classify_creation(compiled: &[u8], tx_input: &[u8]) -> Option<(MatchKind, Vec<u8>)> {
    if compiled.is_empty() || tx_input.is_empty() {
        return None;
    }
    if tx_input.len() >= compiled.len() && tx_input[..compiled.len()] == *compiled {
        return Some((MatchKind::Perfect, tx_input[compiled.len()..].to_vec()));
    }
    if let Some((body, aux)) = split_auxdata(compiled) {
        // Same compiler, same code body: the trailer region has the same
        // width on both sides, so the constructor arguments still start at
        // the compiled length.
        let aux_end = body.len() + aux.len() + 2;
        if tx_input.len() >= aux_end && tx_input[..body.len()] == *body {
            return Some((MatchKind::Partial, tx_input[aux_end..].to_vec()));
        }
    }
    if compiled.len() > tx_input.len() && compiled[..tx_input.len()] == *tx_input {
        return Some((MatchKind::ExtraFileInputBug, Vec::new()));
    }
    None
}

/// Validate the constructor-argument tail against the ABI's declared
/// constructor. Decode then re-encode: a tail that decodes but does not
/// round-trip was not produced by this constructor.
pub fn check_constructor_args(
    constructor: Option<&ethabi::Constructor>,
    args: &[u8],
) -> SourceProofResult<()> {
    let Some(constructor) = constructor else {
        return if args.is_empty() {
            Ok(())
        } else {
            Err(SourceProofError::ConstructorArgsMismatch)
        };
    };
    let types: Vec<ethabi::ParamType> = constructor
        .inputs
        .iter()
        .map(|param| param.kind.clone())
        .collect();
    let tokens =
        ethabi::decode(&types, args).map_err(|_| SourceProofError::ConstructorArgsMismatch)?;
    if ethabi::encode(&tokens) == args {
        Ok(())
    } else {
        Err(SourceProofError::ConstructorArgsMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TRAILER_A: &str = "a26469706673582212204ac0ce5f82b26331fa3e9ae959291a55624ffaf90fcd509deafcc21a5f1da21e64736f6c63430008120033";
    const TRAILER_B: &str = "a2646970667358221220dd712ec4cb31d63cd32d3152e52e890b087769e9e4d6746844608039b5015d6a64736f6c63430008120033";

    fn code_with_trailer(body: &[u8], trailer_hex: &str) -> Vec<u8> {
        let mut code = body.to_vec();
        code.extend_from_slice(&hex::decode(trailer_hex).expect("hex"));
        code
    }

    #[test]
    fn identical_bytecode_is_perfect() {
        let code = code_with_trailer(&[0x60, 0x80, 0x60, 0x40], TRAILER_A);
        assert_eq!(classify_runtime(&code, &code), Some(MatchKind::Perfect));
    }

    #[test]
    fn differing_trailer_is_partial() {
        let compiled = code_with_trailer(&[0x60, 0x80, 0x60, 0x40], TRAILER_A);
        let onchain = code_with_trailer(&[0x60, 0x80, 0x60, 0x40], TRAILER_B);
        assert_eq!(classify_runtime(&compiled, &onchain), Some(MatchKind::Partial));
    }

    #[test]
    fn differing_body_is_no_match() {
        let compiled = code_with_trailer(&[0x60, 0x80], TRAILER_A);
        let onchain = code_with_trailer(&[0x60, 0x81], TRAILER_A);
        assert_eq!(classify_runtime(&compiled, &onchain), None);
    }

    #[test]
    fn longer_compiled_with_matching_prefix_is_the_sentinel() {
        let onchain = vec![0x60, 0x80, 0x60, 0x40, 0x52];
        let mut compiled = onchain.clone();
        compiled.extend_from_slice(&[0xfe, 0xfe, 0xfe]);
        assert_eq!(
            classify_runtime(&compiled, &onchain),
            Some(MatchKind::ExtraFileInputBug)
        );
    }

    #[test]
    fn zero_padded_onchain_tail_still_perfect() {
        let compiled = vec![0x60, 0x80, 0x60, 0x40];
        let mut onchain = compiled.clone();
        onchain.extend_from_slice(&[0x00; 7]);
        assert_eq!(classify_runtime(&compiled, &onchain), Some(MatchKind::Perfect));
        onchain.push(0x01);
        assert_eq!(classify_runtime(&compiled, &onchain), None);
    }

    #[test]
    fn empty_onchain_code_never_matches() {
        assert_eq!(classify_runtime(&[0x60], &[]), None);
        assert_eq!(classify_creation(&[0x60], &[]), None);
    }

    #[test]
    fn immutable_masking_makes_deployments_comparable() {
        let mut references = ImmutableReferences::new();
        references.insert("7".to_string(), vec![ImmutableSpan { start: 2, length: 4 }]);

        let compiled = vec![0x60, 0x80, 0x00, 0x00, 0x00, 0x00, 0x52];
        let onchain = vec![0x60, 0x80, 0xde, 0xad, 0xbe, 0xef, 0x52];

        let mut compiled_masked = compiled.clone();
        let mut onchain_masked = onchain.clone();
        mask_immutables(&mut compiled_masked, &references);
        mask_immutables(&mut onchain_masked, &references);
        assert_eq!(
            classify_runtime(&compiled_masked, &onchain_masked),
            Some(MatchKind::Perfect)
        );

        let values = extract_immutable_values(&onchain, &references);
        assert_eq!(values["7"], "0xdeadbeef");
    }

    #[test]
    fn mask_tolerates_out_of_range_spans() {
        let mut references = ImmutableReferences::new();
        references.insert("1".to_string(), vec![ImmutableSpan { start: 100, length: 4 }]);
        let mut code = vec![0xaa, 0xbb];
        mask_immutables(&mut code, &references);
        assert_eq!(code, vec![0xaa, 0xbb]);
    }

    #[test]
    fn links_modern_placeholder() {
        let fqn = "contracts/Math.sol:SafeOps";
        let placeholder = modern_placeholder(fqn);
        assert_eq!(placeholder.len(), PLACEHOLDER_LEN);
        let code = format!("6080{placeholder}6040");
        let mut libraries = BTreeMap::new();
        libraries.insert(
            fqn.to_string(),
            "0x5AAEB6053F3E94C9B9A09F33669435E7EF1BEAED".to_string(),
        );
        assert_eq!(
            link_libraries(&code, &libraries),
            "60805aaeb6053f3e94c9b9a09f33669435e7ef1beaed6040"
        );
    }

    #[test]
    fn links_legacy_placeholder() {
        let fqn = "Math.sol:SafeOps";
        let placeholder = legacy_placeholder(fqn);
        assert_eq!(placeholder.len(), PLACEHOLDER_LEN);
        assert!(placeholder.starts_with("__Math.sol:SafeOps"));
        let code = format!("6080{placeholder}6040");
        let mut libraries = BTreeMap::new();
        libraries.insert(
            fqn.to_string(),
            "5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".to_string(),
        );
        assert!(!link_libraries(&code, &libraries).contains("__"));
    }

    #[test]
    fn recovers_addresses_from_chain() {
        let fqn = "contracts/Math.sol:SafeOps";
        let placeholder = modern_placeholder(fqn);
        let compiled = format!("6080{placeholder}6040");
        let onchain = "60805aaeb6053f3e94c9b9a09f33669435e7ef1beaed6040";
        let (linked, map) = recover_library_map(&compiled, onchain);
        assert_eq!(linked, onchain);
        assert_eq!(
            map[&placeholder],
            "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"
        );
    }

    #[test]
    fn creation_alignment_yields_constructor_args() {
        let compiled = code_with_trailer(&[0x60, 0x80, 0x60, 0x40], TRAILER_A);
        let args = hex::decode("0000000000000000000000000000000000000000000000000000000000003039")
            .expect("hex");
        let mut tx_input = compiled.clone();
        tx_input.extend_from_slice(&args);
        let (kind, tail) = classify_creation(&compiled, &tx_input).expect("match");
        assert_eq!(kind, MatchKind::Perfect);
        assert_eq!(tail, args);
    }

    #[test]
    fn creation_partial_still_finds_args_past_the_trailer() {
        let compiled = code_with_trailer(&[0x60, 0x80, 0x60, 0x40], TRAILER_A);
        let deployed = code_with_trailer(&[0x60, 0x80, 0x60, 0x40], TRAILER_B);
        let args = vec![0x00, 0x2a];
        let mut tx_input = deployed;
        tx_input.extend_from_slice(&args);
        let (kind, tail) = classify_creation(&compiled, &tx_input).expect("match");
        assert_eq!(kind, MatchKind::Partial);
        assert_eq!(tail, args);
    }

    #[test]
    fn constructor_args_decode_and_round_trip() {
        let constructor = ethabi::Constructor {
            inputs: vec![ethabi::Param {
                name: "num".to_string(),
                kind: ethabi::ParamType::Uint(256),
                internal_type: None,
            }],
        };
        let good = ethabi::encode(&[ethabi::Token::Uint(12345u64.into())]);
        assert!(check_constructor_args(Some(&constructor), &good).is_ok());
        assert!(check_constructor_args(Some(&constructor), &good[1..]).is_err());
        assert!(check_constructor_args(None, &[]).is_ok());
        assert!(check_constructor_args(None, &good).is_err());
    }

    proptest! {
        #[test]
        fn classification_is_reflexive_for_nonempty_code(code in proptest::collection::vec(any::<u8>(), 1..128)) {
            prop_assert_eq!(classify_runtime(&code, &code), Some(MatchKind::Perfect));
        }

        #[test]
        fn masking_is_idempotent(
            code in proptest::collection::vec(any::<u8>(), 1..64),
            start in 0usize..64,
            length in 0usize..16,
        ) {
            let mut references = ImmutableReferences::new();
            references.insert("0".to_string(), vec![ImmutableSpan { start, length }]);
            let mut once = code.clone();
            mask_immutables(&mut once, &references);
            let mut twice = once.clone();
            mask_immutables(&mut twice, &references);
            prop_assert_eq!(once, twice);
        }
    }
}
