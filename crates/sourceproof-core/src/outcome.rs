use crate::address::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How close a recompilation came to the deployed artifact.
///
/// `ExtraFileInputBug` is a sentinel, not a success: the compiled code is a
/// strict prefix extension of the deployed code, which happens when the
/// upload omitted a source file that participated in the original
/// compilation. Callers retry with the complete file set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchKind {
    ExtraFileInputBug,
    Partial,
    Perfect,
}

impl MatchKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Perfect => "perfect",
            Self::Partial => "partial",
            Self::ExtraFileInputBug => "extra-file-input-bug",
        }
    }
}

/// Repository partition a verified contract is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchQuality {
    Full,
    Partial,
}

impl MatchQuality {
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Full => "full_match",
            Self::Partial => "partial_match",
        }
    }
}

/// The outcome of verifying one contract at one address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub address: Address,
    pub chain_id: u64,
    pub runtime_match: Option<MatchKind>,
    pub creation_match: Option<MatchKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_map: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub immutable_references: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abi_encoded_constructor_arguments: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Match {
    pub fn new(address: Address, chain_id: u64) -> Self {
        Self {
            address,
            chain_id,
            runtime_match: None,
            creation_match: None,
            library_map: None,
            immutable_references: None,
            abi_encoded_constructor_arguments: None,
            creator_tx_hash: None,
            storage_timestamp: None,
            message: None,
        }
    }

    /// The better of the two match columns. A perfect creation match
    /// upgrades reporting even when the runtime match is only partial;
    /// both columns stay as classified.
    pub fn best(&self) -> Option<MatchKind> {
        self.runtime_match.max(self.creation_match)
    }

    /// Wire status string; `"null"` when nothing matched.
    pub fn status(&self) -> &'static str {
        self.best().map(MatchKind::as_str).unwrap_or("null")
    }

    /// Either match column qualifies a contract for the repository; the
    /// sentinel does not.
    pub fn quality(&self) -> Option<MatchQuality> {
        match self.best()? {
            MatchKind::Perfect => Some(MatchQuality::Full),
            MatchKind::Partial => Some(MatchQuality::Partial),
            MatchKind::ExtraFileInputBug => None,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.quality().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Match {
        Match::new(
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359".parse().expect("address"),
            1,
        )
    }

    #[test]
    fn status_prefers_the_stronger_column() {
        let mut m = sample();
        assert_eq!(m.status(), "null");
        m.runtime_match = Some(MatchKind::Partial);
        assert_eq!(m.status(), "partial");
        m.creation_match = Some(MatchKind::Perfect);
        assert_eq!(m.status(), "perfect");
        assert_eq!(m.runtime_match, Some(MatchKind::Partial));
        assert_eq!(m.quality(), Some(MatchQuality::Full));
    }

    #[test]
    fn creation_only_match_is_storable() {
        let mut m = sample();
        m.creation_match = Some(MatchKind::Partial);
        assert_eq!(m.quality(), Some(MatchQuality::Partial));
        assert!(m.is_verified());
    }

    #[test]
    fn sentinel_is_not_storable() {
        let mut m = sample();
        m.runtime_match = Some(MatchKind::ExtraFileInputBug);
        assert_eq!(m.status(), "extra-file-input-bug");
        assert_eq!(m.quality(), None);
        assert!(!m.is_verified());
    }

    #[test]
    fn wire_enum_strings_are_stable() {
        assert_eq!(
            serde_json::to_string(&MatchKind::ExtraFileInputBug).expect("json"),
            "\"extra-file-input-bug\""
        );
        assert_eq!(
            serde_json::to_string(&MatchKind::Perfect).expect("json"),
            "\"perfect\""
        );
    }
}
