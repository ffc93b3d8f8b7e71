// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::net::SocketAddrV4;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use whitebox_common::{TableId, WgPrivateKey, WgPublicKey};

use crate::error::BackendError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
	pub name: String,
	pub index: u32,
	pub mtu: u32,
	pub up: bool,
}

/// The two IPv4 policy rules that steer traffic into a tunnel table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingRule {
	/// `not from all fwmark <table> lookup <table>`: everything not already
	/// marked by the tunnel device goes through the tunnel table.
	UnmarkedToTable(TableId),
	/// `from all lookup main suppress_prefixlength 0`: the main table is still
	/// consulted for everything but its default route.
	MainWithoutDefault,
}

impl fmt::Display for RoutingRule {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RoutingRule::UnmarkedToTable(table) => {
				write!(f, "not from 0.0.0.0/0 fwmark {table} lookup {table}")
			}
			RoutingRule::MainWithoutDefault => {
				f.write_str("from 0.0.0.0/0 lookup main suppress_prefixlength 0")
			}
		}
	}
}

/// A link-scoped route in a tunnel table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteSpec {
	pub destination: Ipv4Net,
	pub device: String,
	pub table: TableId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSpec {
	pub public_key: WgPublicKey,
	pub allowed_ips: Vec<Ipv4Net>,
	pub endpoint: SocketAddrV4,
}

/// Kernel operations needed to manage the tunnel device and its routing.
///
/// Every method is a single idempotent or clearly failing kernel change; the
/// ordering and locking live in [`crate::TunnelController`].
#[async_trait]
pub trait TunnelBackend: Send + Sync {
	async fn find_link(&self, name: &str) -> Result<Option<LinkInfo>, BackendError>;

	async fn add_wireguard_link(&self, name: &str, mtu: u32) -> Result<LinkInfo, BackendError>;

	/// Makes `address` the only IPv4 address on the link.
	async fn replace_address(&self, link: &str, address: Ipv4Net) -> Result<(), BackendError>;

	async fn set_link_up(&self, link: &str) -> Result<(), BackendError>;

	async fn add_rule(&self, rule: RoutingRule) -> Result<(), BackendError>;

	/// Removes one copy of `rule`. Returns `false` when no such rule exists.
	async fn delete_rule(&self, rule: RoutingRule) -> Result<bool, BackendError>;

	async fn replace_route(&self, route: &RouteSpec) -> Result<(), BackendError>;

	async fn list_routes(&self, link: &str, table: TableId) -> Result<Vec<RouteSpec>, BackendError>;

	async fn delete_route(&self, route: &RouteSpec) -> Result<(), BackendError>;

	/// Sets the device private key and adds or updates `peer`. Other peers
	/// already on the device are left alone.
	async fn configure_wireguard(
		&self,
		link: &str,
		private_key: &WgPrivateKey,
		peer: &PeerSpec,
	) -> Result<(), BackendError>;

	async fn set_firewall_mark(&self, link: &str, mark: u32) -> Result<(), BackendError>;

	/// The link's WireGuard firewall mark, `None` when unset.
	async fn firewall_mark(&self, link: &str) -> Result<Option<u32>, BackendError>;

	async fn delete_link(&self, link: &str) -> Result<(), BackendError>;
}
