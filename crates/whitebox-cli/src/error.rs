// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use thiserror::Error;
use whitebox_common::protocol::{
	ALREADY_IN_STATE, NOT_FOUND, PROTOCOL_ERROR, REMOTE_EXECUTION_ERROR, VALIDATION_ERROR,
};
use whitebox_common::{KeyError, SessionError, WgPublicKey};
use whitebox_remote::RemoteError;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum CliError {
	#[error("HTTP request failed: {0}")]
	Http(#[from] reqwest::Error),

	#[error("API error: {status} - {message}")]
	Api { status: u16, message: String },

	#[error("not logged in, run `wb login` first")]
	NotLoggedIn,

	#[error("login failed: {0}")]
	Login(String),

	#[error("server not found: {0}")]
	ServerNotFound(String),

	#[error("no servers available for this account")]
	NoServers,

	#[error("server {0} has no IPv4 address")]
	ServerWithoutAddress(String),

	#[error("invalid key from directory: {0}")]
	InvalidKey(#[from] KeyError),

	#[error("invalid session: {0}")]
	Session(#[from] SessionError),

	#[error("remote host: {0}")]
	Remote(#[from] RemoteError),

	#[error("daemon unreachable at {addr}: {source}")]
	DaemonUnavailable {
		addr: String,
		#[source]
		source: std::io::Error,
	},

	#[error("daemon did not answer within {0}s")]
	DaemonTimeout(u64),

	#[error("daemon rejected request ({code}): {message}")]
	Daemon { code: String, message: String },

	#[error("protocol error: {0}")]
	Protocol(String),

	#[error("already connected to {0}, run `wb disconnect` first")]
	AlreadyConnected(String),

	#[error("not connected")]
	NotConnected,

	#[error(
		"peer {public_key} registered on {server} ({interface}) with {address}, but the local tunnel was not configured: {source}"
	)]
	PeerOrphaned {
		interface: String,
		address: Ipv4Net,
		server: Ipv4Addr,
		public_key: WgPublicKey,
		#[source]
		source: Box<CliError>,
	},

	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("URL parse error: {0}")]
	UrlParse(#[from] url::ParseError),
}

impl CliError {
	/// Error code in the tunnel error taxonomy.
	pub fn code(&self) -> &str {
		match self {
			CliError::NotLoggedIn
			| CliError::ServerNotFound(_)
			| CliError::NoServers
			| CliError::ServerWithoutAddress(_) => NOT_FOUND,
			CliError::AlreadyConnected(_) | CliError::NotConnected => ALREADY_IN_STATE,
			CliError::InvalidKey(_)
			| CliError::Session(_)
			| CliError::Config(_)
			| CliError::UrlParse(_) => VALIDATION_ERROR,
			CliError::Remote(err) => err.code(),
			CliError::Daemon { code, .. } => code.as_str(),
			CliError::PeerOrphaned { source, .. } => source.code(),
			CliError::Http(_) | CliError::Api { .. } | CliError::Login(_) => REMOTE_EXECUTION_ERROR,
			CliError::DaemonUnavailable { .. }
			| CliError::DaemonTimeout(_)
			| CliError::Protocol(_)
			| CliError::Json(_)
			| CliError::Io(_) => PROTOCOL_ERROR,
		}
	}

	pub fn is_already_in_state(&self) -> bool {
		self.code() == ALREADY_IN_STATE
	}
}

pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
	use super::*;
	use whitebox_common::protocol::KERNEL_CONFIGURATION_ERROR;
	use whitebox_common::WgKeyPair;

	#[test]
	fn daemon_codes_pass_through() {
		let err = CliError::Daemon {
			code: KERNEL_CONFIGURATION_ERROR.to_string(),
			message: "install route failed".into(),
		};
		assert_eq!(err.code(), KERNEL_CONFIGURATION_ERROR);
	}

	#[test]
	fn orphaned_peer_message_names_everything() {
		let key = *WgKeyPair::generate().public_key();
		let err = CliError::PeerOrphaned {
			interface: "wg0".into(),
			address: "10.0.0.3/32".parse().unwrap(),
			server: Ipv4Addr::new(203, 0, 113, 10),
			public_key: key,
			source: Box::new(CliError::DaemonTimeout(30)),
		};
		let message = err.to_string();
		assert!(message.contains("wg0"));
		assert!(message.contains("10.0.0.3/32"));
		assert!(message.contains(&key.to_base64()));
		assert!(message.contains("local tunnel was not configured"));
		assert!(!message.contains('\n'));
		assert_eq!(err.code(), PROTOCOL_ERROR);
	}

	#[test]
	fn state_errors_are_already_in_state() {
		assert!(CliError::NotConnected.is_already_in_state());
		assert!(CliError::AlreadyConnected("fra-1".into()).is_already_in_state());
		assert!(!CliError::NoServers.is_already_in_state());
	}
}
