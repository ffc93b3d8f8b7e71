// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use thiserror::Error;
use whitebox_common::protocol::{NOT_FOUND, REMOTE_EXECUTION_ERROR, RESOURCE_EXHAUSTED};

#[derive(Debug, Error)]
pub enum RemoteError {
	#[error("ssh not found in PATH")]
	SshNotInstalled,

	#[error("could not reach {host}: {stderr}")]
	Connection { host: String, stderr: String },

	#[error("remote command `{command}` failed ({status}): {stderr}")]
	CommandFailed {
		command: String,
		status: String,
		stderr: String,
	},

	#[error("remote command `{command}` timed out after {timeout:?}")]
	Timeout { command: String, timeout: Duration },

	#[error("unparsable output from `{command}`: {line:?}")]
	Parse { command: String, line: String },

	#[error("invalid interface name {0:?}")]
	InvalidInterface(String),

	#[error("no WireGuard interfaces on the remote host")]
	NoInterfaces,

	#[error("no free tunnel address on any of {interfaces} interface(s)")]
	Exhausted { interfaces: usize },

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

impl RemoteError {
	pub fn code(&self) -> &'static str {
		match self {
			RemoteError::NoInterfaces => NOT_FOUND,
			RemoteError::Exhausted { .. } => RESOURCE_EXHAUSTED,
			_ => REMOTE_EXECUTION_ERROR,
		}
	}
}

pub type Result<T> = std::result::Result<T, RemoteError>;
