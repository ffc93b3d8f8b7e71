pub mod configure;
pub mod disconnect;
pub mod status;

use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use whitebox_common::protocol::*;
use whitebox_netconf::NetconfError;

use crate::state::DaemonState;

/// Result of one handler: the `result` payload or the `error` object.
pub type HandlerResult = Result<Value, RpcError>;

/// Dispatch a request to the appropriate handler
pub async fn dispatch(request: &Request, state: &DaemonState) -> String {
    let start = Instant::now();
    let method = request.method.as_str();
    let id = request.id;

    debug!("[dispatch] → id={} method={}", id, method);

    let result = match method {
        METHOD_CONFIGURE => configure::handle(request, state).await,
        METHOD_DISCONNECT => disconnect::handle(request, state).await,
        METHOD_STATUS => status::handle(request, state).await,
        _ => {
            warn!("[dispatch] Unknown method: {}", method);
            Err(rpc_error(
                VALIDATION_ERROR,
                format!("Unknown method: {}", request.method),
            ))
        }
    };

    let elapsed = start.elapsed();
    match result {
        Ok(value) => {
            debug!("[dispatch] ← id={} method={} ok elapsed={:?}", id, method, elapsed);
            encode(&SuccessResponse { id, result: value })
        }
        Err(error) => {
            info!(
                "[dispatch] ← id={} method={} error={} elapsed={:?}",
                id, method, error.code, elapsed
            );
            encode(&ErrorResponse { id, error })
        }
    }
}

pub fn rpc_error(code: &str, message: impl Into<String>) -> RpcError {
    RpcError {
        code: code.to_string(),
        message: message.into(),
    }
}

/// Maps a controller failure to its wire error.
pub fn netconf_error(err: NetconfError) -> RpcError {
    rpc_error(err.code(), err.to_string())
}

pub fn parse_params<T: DeserializeOwned>(request: &Request) -> Result<T, RpcError> {
    serde_json::from_value(request.params.clone())
        .map_err(|e| rpc_error(VALIDATION_ERROR, format!("Invalid params: {e}")))
}

pub fn to_result<T: Serialize>(value: T) -> HandlerResult {
    serde_json::to_value(value)
        .map_err(|e| rpc_error(PROTOCOL_ERROR, format!("Failed to encode result: {e}")))
}

/// Serializes a response line; falls back to a fixed protocol error.
pub fn encode<T: Serialize>(response: &T) -> String {
    serde_json::to_string(response).unwrap_or_else(|_| {
        r#"{"id":0,"error":{"code":"protocol_error","message":"Failed to encode response"}}"#
            .to_string()
    })
}
