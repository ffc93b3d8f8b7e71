// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process model of the kernel state touched by the daemon.
//!
//! Used by the tests and by the daemon's `--dry-run` mode. Every call is
//! appended to a journal so callers can check exactly which kernel changes
//! were made and in what order.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use ipnet::Ipv4Net;
use tracing::debug;
use whitebox_common::{TableId, WgPrivateKey, WgPublicKey};

use crate::backend::{LinkInfo, PeerSpec, RouteSpec, RoutingRule, TunnelBackend};
use crate::error::BackendError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendOp {
	FindLink(String),
	AddLink { name: String, mtu: u32 },
	ReplaceAddress { link: String, address: Ipv4Net },
	SetLinkUp(String),
	AddRule(RoutingRule),
	DeleteRule(RoutingRule),
	ReplaceRoute(RouteSpec),
	ListRoutes { link: String, table: TableId },
	DeleteRoute(RouteSpec),
	ConfigureWireguard { link: String, peer: WgPublicKey },
	SetFirewallMark { link: String, mark: u32 },
	ReadFirewallMark(String),
	DeleteLink(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLink {
	pub index: u32,
	pub mtu: u32,
	pub up: bool,
	pub addresses: Vec<Ipv4Net>,
	/// Public half of the configured private key.
	pub identity: Option<WgPublicKey>,
	pub peers: Vec<PeerSpec>,
	pub fwmark: Option<u32>,
}

/// Kernel objects currently present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelSnapshot {
	pub links: BTreeMap<String, MemoryLink>,
	pub rules: Vec<RoutingRule>,
	pub routes: Vec<RouteSpec>,
}

type FailurePredicate = Box<dyn Fn(&BackendOp) -> bool + Send + Sync>;

struct Inner {
	kernel: KernelSnapshot,
	journal: Vec<BackendOp>,
	next_index: u32,
	fail: Option<FailurePredicate>,
}

pub struct MemoryBackend {
	inner: Mutex<Inner>,
}

impl Default for MemoryBackend {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryBackend {
	pub fn new() -> Self {
		Self {
			inner: Mutex::new(Inner {
				kernel: KernelSnapshot::default(),
				journal: Vec::new(),
				next_index: 1,
				fail: None,
			}),
		}
	}

	fn lock(&self) -> MutexGuard<'_, Inner> {
		self.inner.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn snapshot(&self) -> KernelSnapshot {
		self.lock().kernel.clone()
	}

	pub fn journal(&self) -> Vec<BackendOp> {
		self.lock().journal.clone()
	}

	pub fn clear_journal(&self) {
		self.lock().journal.clear();
	}

	/// Makes the next operation matching `predicate` fail once.
	pub fn fail_once(&self, predicate: impl Fn(&BackendOp) -> bool + Send + Sync + 'static) {
		self.lock().fail = Some(Box::new(predicate));
	}

	/// Creates a link outside the controller, as an earlier run would have.
	pub fn seed_link(&self, name: &str, mtu: u32) {
		let mut inner = self.lock();
		let index = inner.next_index;
		inner.next_index += 1;
		inner.kernel.links.insert(name.to_string(), new_link(index, mtu));
	}

	pub fn seed_rule(&self, rule: RoutingRule) {
		self.lock().kernel.rules.push(rule);
	}

	/// Journals `op` and applies `apply` to the kernel model unless a failure
	/// was injected for it.
	async fn apply<T>(
		&self,
		op: BackendOp,
		apply: impl FnOnce(&mut Inner) -> Result<T, BackendError>,
	) -> Result<T, BackendError> {
		// Give concurrent callers a chance to interleave.
		tokio::task::yield_now().await;

		let mut inner = self.lock();
		debug!(?op, "memory backend op");
		inner.journal.push(op.clone());

		let injected = inner.fail.as_ref().is_some_and(|fail| fail(&op));
		if injected {
			inner.fail = None;
			return Err(BackendError::CommandFailed {
				program: "memory",
				args: format!("{op:?}"),
				stderr: "injected failure".to_string(),
			});
		}

		apply(&mut *inner)
	}
}

fn new_link(index: u32, mtu: u32) -> MemoryLink {
	MemoryLink {
		index,
		mtu,
		up: false,
		addresses: Vec::new(),
		identity: None,
		peers: Vec::new(),
		fwmark: None,
	}
}

fn link_mut<'a>(inner: &'a mut Inner, name: &str) -> Result<&'a mut MemoryLink, BackendError> {
	inner
		.kernel
		.links
		.get_mut(name)
		.ok_or_else(|| BackendError::LinkNotFound(name.to_string()))
}

fn info(name: &str, link: &MemoryLink) -> LinkInfo {
	LinkInfo {
		name: name.to_string(),
		index: link.index,
		mtu: link.mtu,
		up: link.up,
	}
}

#[async_trait]
impl TunnelBackend for MemoryBackend {
	async fn find_link(&self, name: &str) -> Result<Option<LinkInfo>, BackendError> {
		self
			.apply(BackendOp::FindLink(name.to_string()), |inner| {
				Ok(inner.kernel.links.get(name).map(|link| info(name, link)))
			})
			.await
	}

	async fn add_wireguard_link(&self, name: &str, mtu: u32) -> Result<LinkInfo, BackendError> {
		let op = BackendOp::AddLink {
			name: name.to_string(),
			mtu,
		};
		self
			.apply(op, |inner| {
				if inner.kernel.links.contains_key(name) {
					return Err(BackendError::CommandFailed {
						program: "memory",
						args: format!("link add dev {name}"),
						stderr: "RTNETLINK answers: File exists".to_string(),
					});
				}
				let link = new_link(inner.next_index, mtu);
				inner.next_index += 1;
				let created = info(name, &link);
				inner.kernel.links.insert(name.to_string(), link);
				Ok(created)
			})
			.await
	}

	async fn replace_address(&self, link: &str, address: Ipv4Net) -> Result<(), BackendError> {
		let op = BackendOp::ReplaceAddress {
			link: link.to_string(),
			address,
		};
		self
			.apply(op, |inner| {
				let entry = link_mut(inner, link)?;
				entry.addresses.clear();
				entry.addresses.push(address);
				Ok(())
			})
			.await
	}

	async fn set_link_up(&self, link: &str) -> Result<(), BackendError> {
		self
			.apply(BackendOp::SetLinkUp(link.to_string()), |inner| {
				link_mut(inner, link)?.up = true;
				Ok(())
			})
			.await
	}

	async fn add_rule(&self, rule: RoutingRule) -> Result<(), BackendError> {
		self
			.apply(BackendOp::AddRule(rule), |inner| {
				inner.kernel.rules.push(rule);
				Ok(())
			})
			.await
	}

	async fn delete_rule(&self, rule: RoutingRule) -> Result<bool, BackendError> {
		self
			.apply(BackendOp::DeleteRule(rule), |inner| {
				match inner.kernel.rules.iter().position(|r| *r == rule) {
					Some(pos) => {
						inner.kernel.rules.remove(pos);
						Ok(true)
					}
					None => Ok(false),
				}
			})
			.await
	}

	async fn replace_route(&self, route: &RouteSpec) -> Result<(), BackendError> {
		self
			.apply(BackendOp::ReplaceRoute(route.clone()), |inner| {
				link_mut(inner, &route.device)?;
				let routes = &mut inner.kernel.routes;
				routes.retain(|r| !(r.destination == route.destination && r.table == route.table));
				routes.push(route.clone());
				Ok(())
			})
			.await
	}

	async fn list_routes(&self, link: &str, table: TableId) -> Result<Vec<RouteSpec>, BackendError> {
		let op = BackendOp::ListRoutes {
			link: link.to_string(),
			table,
		};
		self
			.apply(op, |inner| {
				link_mut(inner, link)?;
				Ok(inner
					.kernel
					.routes
					.iter()
					.filter(|r| r.device == link && r.table == table)
					.cloned()
					.collect())
			})
			.await
	}

	async fn delete_route(&self, route: &RouteSpec) -> Result<(), BackendError> {
		self
			.apply(BackendOp::DeleteRoute(route.clone()), |inner| {
				match inner.kernel.routes.iter().position(|r| r == route) {
					Some(pos) => {
						inner.kernel.routes.remove(pos);
						Ok(())
					}
					None => Err(BackendError::CommandFailed {
						program: "memory",
						args: format!("route del {}", route.destination),
						stderr: "RTNETLINK answers: No such process".to_string(),
					}),
				}
			})
			.await
	}

	async fn configure_wireguard(
		&self,
		link: &str,
		private_key: &WgPrivateKey,
		peer: &PeerSpec,
	) -> Result<(), BackendError> {
		let identity = private_key.public_key();
		let op = BackendOp::ConfigureWireguard {
			link: link.to_string(),
			peer: peer.public_key,
		};
		self
			.apply(op, |inner| {
				let entry = link_mut(inner, link)?;
				entry.identity = Some(identity);
				entry.peers.retain(|p| p.public_key != peer.public_key);
				entry.peers.push(peer.clone());
				Ok(())
			})
			.await
	}

	async fn set_firewall_mark(&self, link: &str, mark: u32) -> Result<(), BackendError> {
		let op = BackendOp::SetFirewallMark {
			link: link.to_string(),
			mark,
		};
		self
			.apply(op, |inner| {
				link_mut(inner, link)?.fwmark = Some(mark);
				Ok(())
			})
			.await
	}

	async fn firewall_mark(&self, link: &str) -> Result<Option<u32>, BackendError> {
		self
			.apply(BackendOp::ReadFirewallMark(link.to_string()), |inner| {
				Ok(link_mut(inner, link)?.fwmark)
			})
			.await
	}

	async fn delete_link(&self, link: &str) -> Result<(), BackendError> {
		self
			.apply(BackendOp::DeleteLink(link.to_string()), |inner| {
				if inner.kernel.links.remove(link).is_none() {
					return Err(BackendError::LinkNotFound(link.to_string()));
				}
				// Routes through the link go away with it.
				inner.kernel.routes.retain(|r| r.device != link);
				Ok(())
			})
			.await
	}
}
