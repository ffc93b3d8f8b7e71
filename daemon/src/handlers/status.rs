use whitebox_common::protocol::Request;

use super::{to_result, HandlerResult};
use crate::state::DaemonState;

pub async fn handle(_request: &Request, state: &DaemonState) -> HandlerResult {
    to_result(state.controller.status().await)
}
