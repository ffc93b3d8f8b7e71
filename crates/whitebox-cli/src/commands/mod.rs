// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

pub mod connect;
pub mod disconnect;
pub mod login;
pub mod servers;
pub mod status;

use std::sync::Arc;

use crate::config::{CliConfig, CliPaths};
use crate::controller::{SessionController, SshConnector};
use crate::credentials::TokenStore;
use crate::daemon_client::DaemonClient;
use crate::directory::{http_client, DirectoryClient};
use crate::error::{CliError, Result};
use crate::session_store::SessionStore;

pub use connect::{handle_connect, ConnectArgs};
pub use disconnect::handle_disconnect;
pub use login::handle_login;
pub use servers::{handle_servers_list, ServersCommands};
pub use status::handle_status;

/// Resolved configuration shared by every command.
pub struct CliContext {
	pub config: CliConfig,
	pub paths: CliPaths,
}

impl CliContext {
	pub fn new(config: CliConfig, paths: CliPaths) -> Self {
		Self { config, paths }
	}

	pub fn token_store(&self) -> TokenStore {
		TokenStore::new(self.paths.token_file())
	}

	pub fn session_store(&self) -> SessionStore {
		SessionStore::new(self.paths.session_file())
	}

	pub fn daemon(&self) -> Result<DaemonClient> {
		Ok(DaemonClient::new(
			self.config.daemon_addr()?,
			self.config.daemon_timeout(),
		))
	}

	pub async fn directory(&self) -> Result<DirectoryClient> {
		let token = self
			.token_store()
			.load()
			.await?
			.ok_or(CliError::NotLoggedIn)?;
		Ok(DirectoryClient::new(
			http_client()?,
			self.config.site_url()?,
			token,
		))
	}

	pub fn controller(&self) -> Result<SessionController> {
		Ok(SessionController::new(
			Arc::new(self.daemon()?),
			self.session_store(),
		))
	}

	pub fn ssh_connector(&self) -> SshConnector {
		SshConnector::new(self.config.ssh.clone(), self.paths.ssh_dir())
	}
}
