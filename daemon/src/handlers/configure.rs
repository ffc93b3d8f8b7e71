use tracing::info;
use whitebox_common::protocol::{ConfigureResult, Request};
use whitebox_common::SessionConfig;

use super::{netconf_error, parse_params, to_result, HandlerResult};
use crate::state::DaemonState;

pub async fn handle(request: &Request, state: &DaemonState) -> HandlerResult {
    let params: SessionConfig = parse_params(request)?;

    info!(
        endpoint = %params.endpoint(),
        client_address = %params.client_address,
        "configure requested"
    );

    let server_public_key = state
        .controller
        .configure(&params)
        .await
        .map_err(netconf_error)?;

    to_result(ConfigureResult { server_public_key })
}
