use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use sourceproof_core::{Address, SourceProofError};
use thiserror::Error;

/// Every failure a verification request can surface, with its stable wire
/// kind and HTTP status. Per-source failures (a gateway miss, a digest
/// mismatch) are accumulated inside the contract instead and never reach
/// this type unless they doom the whole request.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("invalid input: {0}")]
    BadInput(String),

    #[error("no files found in the request")]
    MissingFiles,

    #[error("staged files exceed the session size limit")]
    PayloadTooLarge,

    #[error("no fetcher configured for origin `{0}`")]
    NoFetcher(String),

    #[error("all storage gateways failed fetching {0}")]
    FetchUnavailable(String),

    #[error("storage gateway rejected {0}")]
    FetchPermanent(String),

    #[error("fetched source `{0}` fails its declared keccak256")]
    SourceHashMismatch(String),

    #[error("malformed metadata: {0}")]
    BadMetadata(String),

    #[error("compiler version `{0}` is not available")]
    CompilerUnavailable(String),

    #[error("compilation failed: {0}")]
    CompilerFailure(String),

    #[error("no bytecode at {address} on chain {chain_id}")]
    NotDeployed { chain_id: u64, address: Address },

    #[error("verification already in progress for {address} on chain {chain_id}")]
    AlreadyVerifying { chain_id: u64, address: Address },

    #[error("chain {0} is not supported")]
    UnsupportedChain(u64),

    #[error("recompilation still exceeds on-chain code with every uploaded file included")]
    InconsistentUpload,

    #[error("internal error: {0}")]
    Internal(String),
}

impl VerifyError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadInput(_) | Self::MissingFiles => "bad-input",
            Self::PayloadTooLarge => "payload-too-large",
            Self::NoFetcher(_) => "no-fetcher",
            Self::FetchUnavailable(_) => "fetch-unavailable",
            Self::FetchPermanent(_) => "fetch-permanent",
            Self::SourceHashMismatch(_) => "source-hash-mismatch",
            Self::BadMetadata(_) => "bad-metadata",
            Self::CompilerUnavailable(_) => "compiler-unavailable",
            Self::CompilerFailure(_) => "compiler-error",
            Self::NotDeployed { .. } => "not-deployed",
            Self::AlreadyVerifying { .. } => "already-verifying",
            Self::UnsupportedChain(_) => "unsupported-chain",
            Self::InconsistentUpload => "bad-input",
            Self::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadInput(_)
            | Self::NoFetcher(_)
            | Self::FetchPermanent(_)
            | Self::SourceHashMismatch(_)
            | Self::BadMetadata(_)
            | Self::UnsupportedChain(_)
            | Self::InconsistentUpload => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::FetchUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::NotDeployed { .. } | Self::MissingFiles => StatusCode::NOT_FOUND,
            Self::AlreadyVerifying { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::CompilerUnavailable(_) | Self::CompilerFailure(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<SourceProofError> for VerifyError {
    fn from(err: SourceProofError) -> Self {
        match err {
            SourceProofError::BadMetadata(detail) => Self::BadMetadata(detail),
            SourceProofError::BadCompilationTarget => {
                Self::BadMetadata("no single compilation target".to_string())
            }
            other => Self::BadInput(other.to_string()),
        }
    }
}

impl IntoResponse for VerifyError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.kind(), "message": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}
