// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tunnel device state machine: `Absent -> Configured -> Absent`.
//!
//! A single async mutex is held for the whole of every configure and
//! disconnect sequence, so kernel changes for the device never interleave.
//! Configure is idempotent step by step: after a failure part way through,
//! the next configure call converges on the same end state.

use std::fmt;
use std::net::SocketAddrV4;
use std::sync::Arc;

use ipnet::Ipv4Net;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use whitebox_common::protocol::{StatusResult, TunnelState};
use whitebox_common::{
	route_all, DisconnectRequest, SessionConfig, TableId, WgPublicKey, DEFAULT_DEVICE_NAME,
	DEFAULT_MTU,
};

use crate::backend::{LinkInfo, PeerSpec, RouteSpec, RoutingRule, TunnelBackend};
use crate::error::{BackendError, NetconfError, Result};

/// Upper bound on stale copies of a rule removed before installing it.
const MAX_STALE_RULES: usize = 8;

#[derive(Debug, Clone)]
pub struct NetconfConfig {
	pub device: String,
	pub mtu: u32,
}

impl Default for NetconfConfig {
	fn default() -> Self {
		Self {
			device: DEFAULT_DEVICE_NAME.to_string(),
			mtu: DEFAULT_MTU,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelStep {
	EnsureLink,
	AssignAddress,
	LinkUp,
	PolicyRules,
	Route,
	Peer,
	FirewallMark,
	InspectLink,
	RemoveRoutes,
	RemoveRules,
	DeleteLink,
}

impl fmt::Display for KernelStep {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			KernelStep::EnsureLink => "create link",
			KernelStep::AssignAddress => "assign address",
			KernelStep::LinkUp => "bring link up",
			KernelStep::PolicyRules => "install policy rules",
			KernelStep::Route => "install route",
			KernelStep::Peer => "configure peer",
			KernelStep::FirewallMark => "set firewall mark",
			KernelStep::InspectLink => "inspect link",
			KernelStep::RemoveRoutes => "remove routes",
			KernelStep::RemoveRules => "remove policy rules",
			KernelStep::DeleteLink => "delete link",
		};
		f.write_str(name)
	}
}

trait StepExt<T> {
	fn during(self, step: KernelStep) -> Result<T>;
}

impl<T> StepExt<T> for std::result::Result<T, BackendError> {
	fn during(self, step: KernelStep) -> Result<T> {
		self.map_err(|source| NetconfError::Kernel { step, source })
	}
}

/// The tunnel the daemon brought up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTunnel {
	pub table_id: TableId,
	pub client_address: Ipv4Net,
	pub endpoint: SocketAddrV4,
	pub server_public_key: WgPublicKey,
}

pub struct TunnelController {
	backend: Arc<dyn TunnelBackend>,
	config: NetconfConfig,
	active: Mutex<Option<ActiveTunnel>>,
}

impl TunnelController {
	pub fn new(backend: Arc<dyn TunnelBackend>, config: NetconfConfig) -> Self {
		Self {
			backend,
			config,
			active: Mutex::new(None),
		}
	}

	pub async fn active(&self) -> Option<ActiveTunnel> {
		self.active.lock().await.clone()
	}

	/// Brings the tunnel up and returns the server public key it was
	/// configured with.
	#[instrument(skip(self, session), fields(device = %self.config.device, port = session.server_port))]
	pub async fn configure(&self, session: &SessionConfig) -> Result<WgPublicKey> {
		let table_id = session.validate()?;

		let mut active = self.active.lock().await;
		if let Some(current) = active.as_ref() {
			return Err(NetconfError::AlreadyConfigured {
				device: self.config.device.clone(),
				table_id: current.table_id,
			});
		}

		let mut completed = Vec::new();
		if let Err(err) = self.apply_configure(session, table_id, &mut completed).await {
			warn!(
				completed = ?completed,
				error = %err,
				"configure aborted, a later configure repairs the partial state"
			);
			return Err(err);
		}

		*active = Some(ActiveTunnel {
			table_id,
			client_address: session.client_address,
			endpoint: session.endpoint(),
			server_public_key: session.server_public_key,
		});

		info!(
			%table_id,
			client_address = %session.client_address,
			endpoint = %session.endpoint(),
			"tunnel configured"
		);
		Ok(session.server_public_key)
	}

	async fn apply_configure(
		&self,
		session: &SessionConfig,
		table_id: TableId,
		completed: &mut Vec<KernelStep>,
	) -> Result<()> {
		let device = self.config.device.as_str();

		let link = self.ensure_link().await?;
		record(completed, KernelStep::EnsureLink);
		debug!(index = link.index, mtu = link.mtu, "link ready");

		self
			.backend
			.replace_address(device, session.client_address)
			.await
			.during(KernelStep::AssignAddress)?;
		record(completed, KernelStep::AssignAddress);

		self
			.backend
			.set_link_up(device)
			.await
			.during(KernelStep::LinkUp)?;
		record(completed, KernelStep::LinkUp);

		for rule in rules_for(table_id) {
			let stale = self.purge_rule(rule, KernelStep::PolicyRules).await?;
			if stale > 0 {
				debug!(%rule, stale, "removed stale rule copies");
			}
			self
				.backend
				.add_rule(rule)
				.await
				.during(KernelStep::PolicyRules)?;
		}
		record(completed, KernelStep::PolicyRules);

		let route = RouteSpec {
			destination: route_all(),
			device: device.to_string(),
			table: table_id,
		};
		self
			.backend
			.replace_route(&route)
			.await
			.during(KernelStep::Route)?;
		record(completed, KernelStep::Route);

		let peer = PeerSpec {
			public_key: session.server_public_key,
			allowed_ips: vec![route_all()],
			endpoint: session.endpoint(),
		};
		self
			.backend
			.configure_wireguard(device, &session.client_private_key, &peer)
			.await
			.during(KernelStep::Peer)?;
		record(completed, KernelStep::Peer);

		self
			.backend
			.set_firewall_mark(device, table_id.get())
			.await
			.during(KernelStep::FirewallMark)?;
		record(completed, KernelStep::FirewallMark);

		Ok(())
	}

	async fn ensure_link(&self) -> Result<LinkInfo> {
		let device = self.config.device.as_str();
		let existing = self
			.backend
			.find_link(device)
			.await
			.during(KernelStep::EnsureLink)?;

		match existing {
			Some(link) => {
				if link.mtu != self.config.mtu {
					warn!(
						found = link.mtu,
						expected = self.config.mtu,
						"reusing link with unexpected MTU"
					);
				}
				info!(index = link.index, "reusing existing link");
				Ok(link)
			}
			None => self
				.backend
				.add_wireguard_link(device, self.config.mtu)
				.await
				.during(KernelStep::EnsureLink),
		}
	}

	/// Deletes every copy of `rule`, returning how many were removed.
	async fn purge_rule(&self, rule: RoutingRule, step: KernelStep) -> Result<usize> {
		let mut removed = 0;
		while removed < MAX_STALE_RULES && self.backend.delete_rule(rule).await.during(step)? {
			removed += 1;
		}
		Ok(removed)
	}

	/// Tears the tunnel down. The port in `request` must match the one the
	/// tunnel was configured with.
	#[instrument(skip(self, request), fields(device = %self.config.device, port = request.server_port))]
	pub async fn disconnect(&self, request: &DisconnectRequest) -> Result<()> {
		let table_id = request.validate()?;

		let mut active = self.active.lock().await;
		let link = match active.as_ref() {
			Some(current) if current.table_id != table_id => {
				return Err(NetconfError::TableMismatch {
					requested: table_id,
					active: current.table_id,
				});
			}
			Some(_) => self
				.backend
				.find_link(&self.config.device)
				.await
				.during(KernelStep::InspectLink)?,
			None => {
				let link = self
					.backend
					.find_link(&self.config.device)
					.await
					.during(KernelStep::InspectLink)?;
				if link.is_none() {
					return Err(NetconfError::NotConfigured {
						device: self.config.device.clone(),
					});
				}
				// The firewall mark set at configure time is the table id.
				let mark = self
					.backend
					.firewall_mark(&self.config.device)
					.await
					.during(KernelStep::InspectLink)?;
				if let Some(mark) = mark.filter(|mark| *mark != table_id.get()) {
					let recorded = u16::try_from(mark)
						.ok()
						.and_then(|port| TableId::from_port(port).ok());
					return Err(match recorded {
						Some(recorded) => NetconfError::TableMismatch {
							requested: table_id,
							active: recorded,
						},
						None => NetconfError::UnknownTable {
							requested: table_id,
							mark,
						},
					});
				}
				warn!(%table_id, "device exists without a tracked tunnel, tearing it down");
				link
			}
		};

		self.teardown(table_id, link.is_some()).await?;
		*active = None;

		info!(%table_id, "tunnel removed");
		Ok(())
	}

	async fn teardown(&self, table_id: TableId, link_present: bool) -> Result<()> {
		let device = self.config.device.as_str();

		if link_present {
			let routes = self
				.backend
				.list_routes(device, table_id)
				.await
				.during(KernelStep::RemoveRoutes)?;
			for route in &routes {
				self
					.backend
					.delete_route(route)
					.await
					.during(KernelStep::RemoveRoutes)?;
			}
			debug!(count = routes.len(), "routes removed");
		} else {
			warn!("link already gone, removing rules only");
		}

		for rule in rules_for(table_id) {
			self.purge_rule(rule, KernelStep::RemoveRules).await?;
		}

		if link_present {
			self
				.backend
				.delete_link(device)
				.await
				.during(KernelStep::DeleteLink)?;
		}
		Ok(())
	}

	pub async fn status(&self) -> StatusResult {
		let active = self.active.lock().await;
		match active.as_ref() {
			Some(tunnel) => StatusResult {
				state: TunnelState::Configured,
				device: self.config.device.clone(),
				table_id: Some(tunnel.table_id),
				client_address: Some(tunnel.client_address),
				server_endpoint: Some(tunnel.endpoint),
			},
			None => StatusResult {
				state: TunnelState::Absent,
				device: self.config.device.clone(),
				table_id: None,
				client_address: None,
				server_endpoint: None,
			},
		}
	}
}

fn record(completed: &mut Vec<KernelStep>, step: KernelStep) {
	debug!(%step, "configure step done");
	completed.push(step);
}

fn rules_for(table_id: TableId) -> [RoutingRule; 2] {
	[
		RoutingRule::UnmarkedToTable(table_id),
		RoutingRule::MainWithoutDefault,
	]
}
