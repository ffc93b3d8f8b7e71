// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tunnel session parameters exchanged between the client and the daemon.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keys::{WgPrivateKey, WgPublicKey};

/// Kernel routing tables with fixed meaning: unspec, default, main, local.
const RESERVED_TABLES: [u32; 4] = [0, 253, 254, 255];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
	#[error("server port {0} cannot be used as a routing table id")]
	ReservedTable(u16),

	#[error("invalid client address {0}")]
	InvalidClientAddress(Ipv4Net),

	#[error("invalid server address {0}")]
	InvalidServerAddress(Ipv4Addr),
}

/// Routing table id of a tunnel. Equal to the server port, and also used as
/// the firewall mark of the tunnel device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(u32);

impl TableId {
	pub fn from_port(port: u16) -> Result<Self, SessionError> {
		let id = u32::from(port);
		if RESERVED_TABLES.contains(&id) {
			return Err(SessionError::ReservedTable(port));
		}
		Ok(Self(id))
	}

	pub fn get(self) -> u32 {
		self.0
	}
}

impl fmt::Display for TableId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

fn check_server_address(addr: Ipv4Addr) -> Result<(), SessionError> {
	if addr.is_unspecified() || addr.is_broadcast() || addr.is_multicast() {
		return Err(SessionError::InvalidServerAddress(addr));
	}
	Ok(())
}

/// Everything the daemon needs to bring a tunnel up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
	pub server_public_key: WgPublicKey,
	/// Client tunnel address with prefix, usually a `/32`.
	pub client_address: Ipv4Net,
	pub server_address: Ipv4Addr,
	pub server_port: u16,
	pub client_private_key: WgPrivateKey,
}

impl SessionConfig {
	/// Checks the addresses and derives the routing table id.
	pub fn validate(&self) -> Result<TableId, SessionError> {
		let client = self.client_address.addr();
		if client.is_unspecified() || client.is_broadcast() || client.is_multicast() {
			return Err(SessionError::InvalidClientAddress(self.client_address));
		}
		check_server_address(self.server_address)?;
		TableId::from_port(self.server_port)
	}

	pub fn endpoint(&self) -> SocketAddrV4 {
		SocketAddrV4::new(self.server_address, self.server_port)
	}
}

/// Identifies the tunnel to tear down. `server_port` must be the port the
/// tunnel was configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectRequest {
	pub server_address: Ipv4Addr,
	pub server_port: u16,
}

impl DisconnectRequest {
	pub fn validate(&self) -> Result<TableId, SessionError> {
		check_server_address(self.server_address)?;
		TableId::from_port(self.server_port)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::keys::WgKeyPair;
	use proptest::prelude::*;

	fn config(port: u16) -> SessionConfig {
		SessionConfig {
			server_public_key: *WgKeyPair::generate().public_key(),
			client_address: "10.0.0.3/32".parse().unwrap(),
			server_address: Ipv4Addr::new(203, 0, 113, 10),
			server_port: port,
			client_private_key: WgPrivateKey::generate(),
		}
	}

	#[test]
	fn table_id_follows_port() {
		assert_eq!(config(51820).validate().unwrap().get(), 51820);
	}

	#[test]
	fn reserved_tables_are_rejected() {
		for port in [0, 253, 254, 255] {
			assert_eq!(
				config(port).validate(),
				Err(SessionError::ReservedTable(port))
			);
		}
	}

	#[test]
	fn unspecified_server_is_rejected() {
		let mut cfg = config(51820);
		cfg.server_address = Ipv4Addr::UNSPECIFIED;
		assert!(matches!(
			cfg.validate(),
			Err(SessionError::InvalidServerAddress(_))
		));
	}

	#[test]
	fn broadcast_client_is_rejected() {
		let mut cfg = config(51820);
		cfg.client_address = "255.255.255.255/32".parse().unwrap();
		assert!(matches!(
			cfg.validate(),
			Err(SessionError::InvalidClientAddress(_))
		));
	}

	#[test]
	fn debug_hides_private_key() {
		let cfg = config(51820);
		let rendered = format!("{cfg:?}");
		assert!(!rendered.contains(cfg.client_private_key.to_base64().as_str()));
	}

	#[test]
	fn wire_form_uses_plain_strings() {
		let cfg = config(51820);
		let value = serde_json::to_value(&cfg).unwrap();
		assert_eq!(value["client_address"], "10.0.0.3/32");
		assert_eq!(value["server_address"], "203.0.113.10");
		assert_eq!(value["server_port"], 51820);
		assert_eq!(value["server_public_key"], cfg.server_public_key.to_base64());

		let back: SessionConfig = serde_json::from_value(value).unwrap();
		assert_eq!(back.client_private_key.public_key(), cfg.client_private_key.public_key());
	}

	#[test]
	fn malformed_cidr_fails_to_parse() {
		let mut value = serde_json::to_value(config(51820)).unwrap();
		value["client_address"] = "10.0.0.3".into();
		assert!(serde_json::from_value::<SessionConfig>(value).is_err());
	}

	#[test]
	fn disconnect_request_validates_port() {
		let req = DisconnectRequest {
			server_address: Ipv4Addr::new(203, 0, 113, 10),
			server_port: 254,
		};
		assert_eq!(req.validate(), Err(SessionError::ReservedTable(254)));
	}

	proptest! {
		#[test]
		fn ordinary_ports_are_valid_tables(port in 256u16..=u16::MAX) {
			prop_assert_eq!(TableId::from_port(port).unwrap().get(), u32::from(port));
		}
	}
}
