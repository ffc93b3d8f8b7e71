// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Line-delimited JSON protocol spoken between the client and the daemon.
//!
//! Every request and response is a single JSON object on its own line.

use std::net::SocketAddrV4;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::keys::WgPublicKey;
use crate::session::TableId;

/// Longest request line the daemon accepts.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Request from client
#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
	pub id: u64,
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

/// Success response
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
	pub id: u64,
	pub result: Value,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
	pub id: u64,
	pub error: RpcError,
}

/// Error details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
	pub code: String,
	pub message: String,
}

/// Either kind of response, as read back by the client.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Response {
	// Must stay first: a missing `result` would otherwise deserialize as null.
	Error(ErrorResponse),
	Success(SuccessResponse),
}

impl Response {
	pub fn id(&self) -> u64 {
		match self {
			Response::Error(e) => e.id,
			Response::Success(s) => s.id,
		}
	}
}

// Error codes
pub const VALIDATION_ERROR: &str = "validation_error";
pub const NOT_FOUND: &str = "not_found";
pub const RESOURCE_EXHAUSTED: &str = "resource_exhausted";
pub const REMOTE_EXECUTION_ERROR: &str = "remote_execution_error";
pub const KERNEL_CONFIGURATION_ERROR: &str = "kernel_configuration_error";
pub const ALREADY_IN_STATE: &str = "already_in_state";
pub const PROTOCOL_ERROR: &str = "protocol_error";

// Method names
pub const METHOD_CONFIGURE: &str = "configure";
pub const METHOD_DISCONNECT: &str = "disconnect";
pub const METHOD_STATUS: &str = "status";

/// Status string returned by a successful disconnect.
pub const DISCONNECT_DONE: &str = "done";

// --- Results ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigureResult {
	pub server_public_key: WgPublicKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectResult {
	pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
	Absent,
	Configured,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResult {
	pub state: TunnelState,
	pub device: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub table_id: Option<TableId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_address: Option<Ipv4Net>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub server_endpoint: Option<SocketAddrV4>,
}

impl Request {
	pub fn new<T: Serialize>(id: u64, method: &str, params: T) -> serde_json::Result<Self> {
		Ok(Self {
			id,
			method: method.to_string(),
			params: serde_json::to_value(params)?,
		})
	}
}

impl ErrorResponse {
	pub fn new(id: u64, code: &str, message: impl Into<String>) -> Self {
		Self {
			id,
			error: RpcError {
				code: code.to_string(),
				message: message.into(),
			},
		}
	}
}
