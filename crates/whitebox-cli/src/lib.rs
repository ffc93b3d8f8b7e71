// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! White Box VPN client: logs in against the console, lists servers and
//! brings a tunnel up or down through the local daemon.

pub mod commands;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod daemon_client;
pub mod directory;
pub mod error;
pub mod login;
pub mod session_store;

pub use commands::{
	handle_connect, handle_disconnect, handle_login, handle_servers_list, handle_status,
	CliContext, ConnectArgs, ServersCommands,
};
pub use config::{resolve_paths, CliConfig, CliPaths, ConfigError};
pub use controller::{Directory, Disconnected, SessionController, ShellConnector, SshConnector};
pub use credentials::{AccessToken, TokenStore};
pub use daemon_client::{DaemonClient, TunnelDaemon};
pub use directory::{DirectoryClient, VpnServer};
pub use error::{CliError, Result};
pub use session_store::{ActiveSession, SessionStore};
