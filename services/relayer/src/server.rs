//! HTTP surface of the relay.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;

use crate::authorization::Authorization;
use crate::codec::{function_selector, parse_hex_bytes, Address};
use crate::coordinator::{Coordinator, SubmissionResult};
use crate::delegation::{delegation_status, DelegationStatus};
use crate::error::{RelayError, RelayResult};

pub const LIVENESS_TEXT: &str = "Relayer Service is running";

/// Shorthand accepted in the `data` field of an upgrade request.
const INITIALIZE_SHORTHAND: &str = "initialize";

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub default_delegation_contract: Address,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayInfo {
    pub relayer_address: Address,
    pub chain_id: u64,
    pub default_delegation_contract: Address,
    /// Decimal string; wei balances overflow JSON numbers.
    pub balance_wei: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/info", get(info))
        .route("/status/{account}", get(status))
        .route("/upgrade", post(upgrade))
        .route("/revoke", post(revoke))
        .with_state(state)
}

async fn liveness() -> &'static str {
    LIVENESS_TEXT
}

async fn info(State(state): State<AppState>) -> Response {
    let coordinator = &state.coordinator;
    let relayer_address = coordinator.relay_address();
    let result = coordinator
        .rpc()
        .balance(relayer_address)
        .await
        .map(|balance| RelayInfo {
            relayer_address,
            chain_id: coordinator.chain_id(),
            default_delegation_contract: state.default_delegation_contract,
            balance_wei: balance.to_string(),
        });
    respond("info", result)
}

async fn status(State(state): State<AppState>, Path(account): Path<String>) -> Response {
    let result: RelayResult<DelegationStatus> = async {
        let account = Address::parse("account", &account)?;
        delegation_status(state.coordinator.rpc(), account).await
    }
    .await;
    respond("status", result)
}

async fn upgrade(State(state): State<AppState>, body: Bytes) -> Response {
    let result: RelayResult<SubmissionResult> = async {
        let request = RelayRequest::parse(&body)?;
        tracing::info!(
            account = %request.account,
            delegate = %request.authorization.address,
            "received upgrade request"
        );
        state
            .coordinator
            .submit(request.authorization, request.account, request.data)
            .await
    }
    .await;
    respond("upgrade", result)
}

async fn revoke(State(state): State<AppState>, body: Bytes) -> Response {
    let result: RelayResult<SubmissionResult> = async {
        let request = RelayRequest::parse(&body)?;
        tracing::info!(account = %request.account, "received revoke request");
        state
            .coordinator
            .revoke(request.authorization, request.account)
            .await
    }
    .await;
    respond("revoke", result)
}

fn respond<T: Serialize>(route: &'static str, result: RelayResult<T>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(err) => {
            if err.is_client_error() {
                tracing::info!(route, %err, "request rejected");
            } else {
                tracing::error!(route, %err, "request failed");
            }
            err.into_response()
        }
    }
}

/// A validated `/upgrade` or `/revoke` body.
#[derive(Debug)]
struct RelayRequest {
    authorization: Authorization,
    account: Address,
    data: Option<Vec<u8>>,
}

impl RelayRequest {
    fn parse(body: &[u8]) -> RelayResult<Self> {
        let value: Value = serde_json::from_slice(body).map_err(|err| RelayError::InvalidField {
            field: "body",
            reason: err.to_string(),
        })?;

        let authorization = match value.get("authorization") {
            None | Some(Value::Null) => {
                return Err(RelayError::MissingField {
                    field: "authorization",
                })
            }
            Some(raw) => Authorization::from_json(raw)?,
        };
        let account = match value.get("account") {
            None | Some(Value::Null) => return Err(RelayError::MissingField { field: "account" }),
            Some(Value::String(raw)) => Address::parse("account", raw)?,
            Some(_) => {
                return Err(RelayError::InvalidField {
                    field: "account",
                    reason: "expected a hex string".into(),
                })
            }
        };
        let data = match value.get("data") {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) if raw == INITIALIZE_SHORTHAND => {
                Some(function_selector("initialize()").to_vec())
            }
            Some(Value::String(raw)) => Some(parse_hex_bytes(raw).map_err(|_| {
                RelayError::InvalidField {
                    field: "data",
                    reason: format!("expected 0x-prefixed hex or \"{INITIALIZE_SHORTHAND}\""),
                }
            })?),
            Some(_) => {
                return Err(RelayError::InvalidField {
                    field: "data",
                    reason: "expected a string".into(),
                })
            }
        };

        Ok(Self {
            authorization,
            account,
            data,
        })
    }
}
