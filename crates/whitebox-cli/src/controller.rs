// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Drives a connect or disconnect across the directory, the VPN server and
//! the local daemon.
//!
//! Connect order: check that neither the session file nor the daemon
//! already holds a tunnel, resolve the server, open an authenticated shell
//! pinned to the directory's host key, discover a free address, fetch the
//! server's tunnel key, generate a client key pair, register the peer
//! remotely, then ask the daemon to configure the local tunnel. The session file is written
//! only once the daemon has echoed the expected server key.
//!
//! Remote peers are never removed. If the local tunnel cannot be configured
//! after registration the error names the orphaned peer.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument, warn};
use whitebox_common::protocol::{StatusResult, TunnelState};
use whitebox_common::{DisconnectRequest, SessionConfig, WgKeyPair, WgPublicKey};
use whitebox_remote::{RemoteDiscovery, RemoteShell, SshShell, SshTarget};

use crate::config::SshConfig;
use crate::daemon_client::TunnelDaemon;
use crate::directory::{DirectoryClient, VpnServer};
use crate::error::{CliError, Result};
use crate::session_store::{ActiveSession, SessionStore};

#[async_trait]
pub trait Directory: Send + Sync {
	async fn resolve_server(&self, name: Option<&str>) -> Result<VpnServer>;
	async fn fetch_host_public_key(&self, server_id: &str) -> Result<String>;
	async fn fetch_tunnel_public_key(&self, server_id: &str) -> Result<WgPublicKey>;
}

#[async_trait]
impl Directory for DirectoryClient {
	async fn resolve_server(&self, name: Option<&str>) -> Result<VpnServer> {
		DirectoryClient::resolve_server(self, name).await
	}

	async fn fetch_host_public_key(&self, server_id: &str) -> Result<String> {
		DirectoryClient::fetch_host_public_key(self, server_id).await
	}

	async fn fetch_tunnel_public_key(&self, server_id: &str) -> Result<WgPublicKey> {
		DirectoryClient::fetch_tunnel_public_key(self, server_id).await
	}
}

/// Opens an authenticated command channel to a VPN server.
#[async_trait]
pub trait ShellConnector: Send + Sync {
	async fn connect(&self, host: Ipv4Addr, host_key: &str) -> Result<Arc<dyn RemoteShell>>;
}

pub struct SshConnector {
	ssh: SshConfig,
	state_dir: PathBuf,
}

impl SshConnector {
	pub fn new(ssh: SshConfig, state_dir: PathBuf) -> Self {
		Self { ssh, state_dir }
	}
}

#[async_trait]
impl ShellConnector for SshConnector {
	async fn connect(&self, host: Ipv4Addr, host_key: &str) -> Result<Arc<dyn RemoteShell>> {
		let target = SshTarget {
			host: host.to_string(),
			port: self.ssh.port,
			user: self.ssh.user.clone(),
			identity_file: self.ssh.identity_file.clone(),
		};
		let timeout: Duration = self.ssh.command_timeout();
		let shell: Arc<dyn RemoteShell> =
			Arc::new(SshShell::open(target, host_key, &self.state_dir, timeout).await?);
		Ok(shell)
	}
}

/// Outcome of a disconnect.
#[derive(Debug)]
pub enum Disconnected {
	/// The tunnel recorded in the session file was torn down.
	Session(ActiveSession),
	/// The daemon had no tunnel; the leftover session file was removed.
	Stale(ActiveSession),
	/// No session file, but the daemon held a tunnel, which was torn down.
	Untracked(SocketAddrV4),
}

#[derive(Debug)]
pub struct StatusReport {
	pub session: Option<ActiveSession>,
	pub daemon: Result<StatusResult>,
}

/// Owns the local side of a session: the daemon and the session file. The
/// directory and the remote shell are only needed to connect and are passed
/// in per call.
pub struct SessionController {
	daemon: Arc<dyn TunnelDaemon>,
	store: SessionStore,
}

struct Registered {
	config: SessionConfig,
	interface: String,
	client_public_key: WgPublicKey,
}

/// Discovers an address and registers a fresh client key on the server.
async fn register(
	directory: &dyn Directory,
	server: &VpnServer,
	address: Ipv4Addr,
	shell: &dyn RemoteShell,
) -> Result<Registered> {
	let discovery = RemoteDiscovery::new(shell);
	let allocation = discovery.discover().await?;
	let server_public_key = directory.fetch_tunnel_public_key(&server.id).await?;
	let keypair = WgKeyPair::generate();

	let config = SessionConfig {
		server_public_key,
		client_address: allocation.client_address(),
		server_address: address,
		server_port: allocation.listen_port,
		client_private_key: keypair.private_key().clone(),
	};
	config.validate()?;

	discovery
		.register_peer(&allocation, keypair.public_key())
		.await?;

	Ok(Registered {
		config,
		interface: allocation.interface,
		client_public_key: *keypair.public_key(),
	})
}

impl SessionController {
	pub fn new(daemon: Arc<dyn TunnelDaemon>, store: SessionStore) -> Self {
		Self { daemon, store }
	}

	#[instrument(skip(self, directory, connector))]
	pub async fn connect(
		&self,
		directory: &dyn Directory,
		connector: &dyn ShellConnector,
		server_name: Option<&str>,
	) -> Result<ActiveSession> {
		if let Some(existing) = self.store.load().await? {
			return Err(CliError::AlreadyConnected(existing.server_name));
		}
		// A tunnel without a session file must be caught before a peer is
		// registered remotely.
		let status = self.daemon.status().await?;
		if status.state == TunnelState::Configured {
			let held = status
				.server_endpoint
				.map_or_else(|| status.device.clone(), |endpoint| endpoint.to_string());
			warn!(%held, "daemon already holds a tunnel without a session file");
			return Err(CliError::AlreadyConnected(held));
		}

		let server = directory.resolve_server(server_name).await?;
		let address = server
			.address()
			.ok_or_else(|| CliError::ServerWithoutAddress(server.name.clone()))?;
		info!(server = %server.name, %address, "resolved server");

		let host_key = directory.fetch_host_public_key(&server.id).await?;
		let shell = connector.connect(address, &host_key).await?;
		let registered = register(directory, &server, address, shell.as_ref()).await;
		shell.close().await;
		let registered = registered?;

		if let Err(source) = self.configure(&registered.config).await {
			warn!(
				interface = %registered.interface,
				peer = %registered.client_public_key,
				error = %source,
				"local tunnel configuration failed after remote registration"
			);
			return Err(CliError::PeerOrphaned {
				interface: registered.interface,
				address: registered.config.client_address,
				server: address,
				public_key: registered.client_public_key,
				source: Box::new(source),
			});
		}

		let session = ActiveSession {
			server_id: server.id,
			server_name: server.name,
			server_address: address,
			server_port: registered.config.server_port,
			client_address: registered.config.client_address,
			interface: registered.interface,
			client_public_key: registered.client_public_key,
			connected_at: Utc::now(),
		};
		self.store.save(&session).await?;
		info!(server = %session.server_name, client_address = %session.client_address, "connected");
		Ok(session)
	}

	async fn configure(&self, config: &SessionConfig) -> Result<()> {
		let echoed = self.daemon.configure(config).await?;
		if echoed == config.server_public_key {
			return Ok(());
		}

		warn!(expected = %config.server_public_key, got = %echoed, "daemon echoed a different server key");
		let request = DisconnectRequest {
			server_address: config.server_address,
			server_port: config.server_port,
		};
		if let Err(e) = self.daemon.disconnect(&request).await {
			warn!(error = %e, "failed to tear down mismatched tunnel");
		}
		Err(CliError::Protocol(format!(
			"daemon installed server key {echoed}, expected {}",
			config.server_public_key
		)))
	}

	#[instrument(skip(self))]
	pub async fn disconnect(&self) -> Result<Disconnected> {
		let Some(session) = self.store.load().await? else {
			return self.disconnect_untracked().await;
		};

		match self.daemon.disconnect(&session.disconnect_request()).await {
			Ok(()) => {
				self.store.clear().await?;
				info!(server = %session.server_name, "disconnected");
				Ok(Disconnected::Session(session))
			}
			Err(e) if e.is_already_in_state() => {
				warn!(error = %e, "daemon has no tunnel, clearing stale session");
				self.store.clear().await?;
				Ok(Disconnected::Stale(session))
			}
			Err(e) => Err(e),
		}
	}

	async fn disconnect_untracked(&self) -> Result<Disconnected> {
		let status = self.daemon.status().await?;
		let endpoint = match (status.state, status.server_endpoint) {
			(TunnelState::Configured, Some(endpoint)) => endpoint,
			_ => return Err(CliError::NotConnected),
		};
		warn!(%endpoint, "no session file, tearing down the daemon's tunnel");
		self
			.daemon
			.disconnect(&DisconnectRequest {
				server_address: *endpoint.ip(),
				server_port: endpoint.port(),
			})
			.await?;
		Ok(Disconnected::Untracked(endpoint))
	}

	pub async fn status(&self) -> Result<StatusReport> {
		let session = self.store.load().await?;
		let daemon = self.daemon.status().await;
		Ok(StatusReport { session, daemon })
	}
}
