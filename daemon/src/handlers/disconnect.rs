use tracing::info;
use whitebox_common::protocol::{DisconnectResult, Request, DISCONNECT_DONE};
use whitebox_common::DisconnectRequest;

use super::{netconf_error, parse_params, to_result, HandlerResult};
use crate::state::DaemonState;

pub async fn handle(request: &Request, state: &DaemonState) -> HandlerResult {
    let params: DisconnectRequest = parse_params(request)?;

    info!(
        server = %params.server_address,
        port = params.server_port,
        "disconnect requested"
    );

    state
        .controller
        .disconnect(&params)
        .await
        .map_err(netconf_error)?;

    to_result(DisconnectResult {
        status: DISCONNECT_DONE.to_string(),
    })
}
