//! Reconstructing compiler standard-JSON input from metadata, and the
//! slice of the output the matcher consumes.

use crate::bytecode::ImmutableReferences;
use crate::error::{SourceProofError, SourceProofResult};
use crate::metadata::Metadata;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Output selectors verification needs regardless of what the metadata's
/// own selection asked for.
const OUTPUT_SELECTION: [&str; 7] = [
    "abi",
    "metadata",
    "evm.bytecode.object",
    "evm.bytecode.linkReferences",
    "evm.deployedBytecode.object",
    "evm.deployedBytecode.linkReferences",
    "evm.deployedBytecode.immutableReferences",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardJsonInput {
    pub language: String,
    pub sources: BTreeMap<String, SourceContent>,
    pub settings: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceContent {
    pub content: String,
}

impl StandardJsonInput {
    /// Rebuild the input that produced `metadata`. Settings pass through
    /// except for `compilationTarget` (metadata-only), library linkage
    /// (normalized to the nested standard-JSON form) and the forced
    /// output selection.
    pub fn from_metadata(
        metadata: &Metadata,
        sources: &BTreeMap<String, String>,
    ) -> SourceProofResult<Self> {
        let mut settings = Map::new();
        for (key, value) in &metadata.settings.extra {
            settings.insert(key.clone(), value.clone());
        }
        if !metadata.settings.libraries.is_empty() {
            settings.insert(
                "libraries".to_string(),
                nest_libraries(&metadata.settings.libraries)?,
            );
        }
        settings.insert(
            "outputSelection".to_string(),
            json!({ "*": { "*": OUTPUT_SELECTION } }),
        );

        Ok(Self {
            language: metadata.language.clone(),
            sources: sources
                .iter()
                .map(|(path, content)| {
                    (path.clone(), SourceContent { content: content.clone() })
                })
                .collect(),
            settings: Value::Object(settings),
        })
    }
}

/// Metadata records libraries flat (`"file.sol:Lib": "0x…"`); standard
/// JSON wants them nested per file. Already-nested objects pass through.
fn nest_libraries(libraries: &BTreeMap<String, Value>) -> SourceProofResult<Value> {
    let mut nested: Map<String, Value> = Map::new();
    for (key, value) in libraries {
        match value {
            Value::Object(_) => {
                nested.insert(key.clone(), value.clone());
            }
            Value::String(address) => {
                let (file, name) = key.split_once(':').ok_or_else(|| {
                    SourceProofError::BadMetadata(format!(
                        "library key `{key}` is not fully qualified"
                    ))
                })?;
                nested
                    .entry(file.to_string())
                    .or_insert_with(|| Value::Object(Map::new()))
                    .as_object_mut()
                    .ok_or_else(|| {
                        SourceProofError::BadMetadata("libraries shape".to_string())
                    })?
                    .insert(name.to_string(), Value::String(address.clone()));
            }
            _ => {
                return Err(SourceProofError::BadMetadata(format!(
                    "library `{key}` has neither an address nor a file map"
                )))
            }
        }
    }
    Ok(Value::Object(nested))
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StandardJsonOutput {
    #[serde(default)]
    pub errors: Vec<OutputError>,
    #[serde(default)]
    pub contracts: BTreeMap<String, BTreeMap<String, ContractOutput>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputError {
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "formattedMessage", default)]
    pub formatted_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContractOutput {
    #[serde(default)]
    pub abi: Value,
    pub evm: EvmOutput,
    #[serde(default)]
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvmOutput {
    pub bytecode: BytecodeOutput,
    #[serde(rename = "deployedBytecode")]
    pub deployed_bytecode: DeployedBytecodeOutput,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BytecodeOutput {
    #[serde(default)]
    pub object: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeployedBytecodeOutput {
    #[serde(default)]
    pub object: String,
    #[serde(rename = "immutableReferences", default)]
    pub immutable_references: ImmutableReferences,
}

impl StandardJsonOutput {
    pub fn fatal_errors(&self) -> Vec<&OutputError> {
        self.errors
            .iter()
            .filter(|err| err.severity == "error")
            .collect()
    }

    pub fn find_contract(&self, file: &str, name: &str) -> Option<&ContractOutput> {
        self.contracts.get(file)?.get(name)
    }
}
