use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::codec::Address;

pub type RelayResult<T> = std::result::Result<T, RelayError>;

/// Every per-request failure the relay can report.
///
/// Variants are grouped by how the caller is expected to react: validation
/// problems and nonce mismatches are the client's to fix, RPC read failures
/// are retryable, and broadcast outcomes describe a transaction that was (or
/// was not) handed to the network.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Missing {field}")]
    MissingField { field: &'static str },
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("authorization was signed by {recovered}, not by account {account}")]
    AuthorityMismatch { account: Address, recovered: Address },
    #[error("authorization chain id {actual} does not match relay chain id {expected}")]
    ChainIdMismatch { expected: u64, actual: u64 },
    #[error("revocation authorization must delegate to the zero address, got {target}")]
    RevocationTargetNotZero { target: Address },
    #[error(
        "Nonce mismatch. Expected nonce {expected}, but authorization has nonce {actual}. \
         Please re-sign the authorization with the current nonce."
    )]
    NonceMismatch { expected: u64, actual: u64 },

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("rpc transport error: {message}")]
    RpcTransport { message: String },
    #[error("unexpected rpc result type, expected {expected}")]
    RpcResultTypeMismatch { expected: &'static str },
    #[error("failed to decode hex: {value}")]
    HexDecodeFailed { value: String },
    #[error("number out of range: {field}")]
    NumberOutOfRange { field: String },
    #[error("signing failed: {message}")]
    Signing { message: String },

    #[error("{message}")]
    Broadcast { message: String },
    #[error("transaction {hash} reverted in block {block_number}")]
    Reverted { hash: String, block_number: u64 },
    #[error("transaction {hash} was broadcast but not confirmed within {waited:?}; it may still be mined")]
    ConfirmationTimeout { hash: String, waited: Duration },
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::MissingField { .. }
            | RelayError::InvalidField { .. }
            | RelayError::AuthorityMismatch { .. }
            | RelayError::ChainIdMismatch { .. }
            | RelayError::RevocationTargetNotZero { .. }
            | RelayError::NonceMismatch { .. } => StatusCode::BAD_REQUEST,
            RelayError::Rpc { .. }
            | RelayError::RpcTransport { .. }
            | RelayError::RpcResultTypeMismatch { .. }
            | RelayError::HexDecodeFailed { .. }
            | RelayError::NumberOutOfRange { .. } => StatusCode::BAD_GATEWAY,
            RelayError::Signing { .. }
            | RelayError::Broadcast { .. }
            | RelayError::Reverted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::ConfirmationTimeout { .. } => StatusCode::ACCEPTED,
        }
    }

    /// Failures caused by the request itself rather than by the relay or the
    /// chain. These are logged below `warn`.
    pub fn is_client_error(&self) -> bool {
        self.status_code() == StatusCode::BAD_REQUEST
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();
        let body = match &self {
            RelayError::NonceMismatch { expected, actual } => json!({
                "error": message,
                "expected": expected,
                "actual": actual,
            }),
            RelayError::ConfirmationTimeout { hash, .. } => json!({
                "success": false,
                "pending": true,
                "hash": hash,
                "error": message,
            }),
            RelayError::Reverted { hash, block_number } => json!({
                "success": false,
                "hash": hash,
                "blockNumber": block_number,
                "error": message,
            }),
            _ => json!({ "error": message }),
        };
        (status, Json(body)).into_response()
    }
}

/// Startup configuration problems. Any of these aborts the process before
/// the listener is bound.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration missing: {0}")]
    Missing(&'static str),
    #[error("private key \"{name}\" contains non-hexadecimal characters")]
    KeyNotHex { name: &'static str },
    #[error("private key \"{name}\" has an invalid length (got {actual} hex characters, expected 64)")]
    KeyLength { name: &'static str, actual: usize },
    #[error("private key \"{name}\" is not a valid secp256k1 scalar")]
    KeyInvalid { name: &'static str },
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}
