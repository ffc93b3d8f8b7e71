// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client configuration.
//!
//! Values come from built-in defaults, then the optional TOML file at
//! `$XDG_CONFIG_HOME/whitebox-vpn-cli/config.toml`, then `WHITEBOX_*`
//! environment variables, then command line flags.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;
use whitebox_common::DEFAULT_DAEMON_ADDR;
use whitebox_remote::{DEFAULT_SSH_PORT, DEFAULT_SSH_USER};

pub const APP_DIR: &str = "whitebox-vpn-cli";
pub const DEFAULT_SITE_URL: &str = "https://console.whiteboxvpn.com";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("TOML parse error in {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("Invalid value for {field}: {message}")]
	InvalidValue { field: String, message: String },

	#[error("Could not determine home directory")]
	HomeDirNotFound,
}

impl ConfigError {
	pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
		Self::InvalidValue {
			field: field.into(),
			message: message.into(),
		}
	}
}

/// OAuth device-authorization settings for `wb login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
	pub device_code_url: String,
	pub token_url: String,
	pub client_id: String,
	pub audience: String,
}

impl Default for AuthConfig {
	fn default() -> Self {
		Self {
			device_code_url: "https://whiteboxvpn.us.auth0.com/oauth/device/code".to_string(),
			token_url: "https://whiteboxvpn.us.auth0.com/oauth/token".to_string(),
			client_id: "tXcyY7reNAvr1zEBt6a7TW2aa4vnOS8N".to_string(),
			audience: "https://console.whiteboxvpn.com/api/".to_string(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
	pub user: String,
	pub port: u16,
	/// Passed to ssh as `-i`. When unset ssh picks its usual keys and agent.
	pub identity_file: Option<PathBuf>,
	pub command_timeout_secs: u64,
}

impl Default for SshConfig {
	fn default() -> Self {
		Self {
			user: DEFAULT_SSH_USER.to_string(),
			port: DEFAULT_SSH_PORT,
			identity_file: None,
			command_timeout_secs: 30,
		}
	}
}

impl SshConfig {
	pub fn command_timeout(&self) -> Duration {
		Duration::from_secs(self.command_timeout_secs)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
	pub site_url: String,
	pub daemon_addr: String,
	pub daemon_timeout_secs: u64,
	pub ssh: SshConfig,
	pub auth: AuthConfig,
}

impl Default for CliConfig {
	fn default() -> Self {
		Self {
			site_url: DEFAULT_SITE_URL.to_string(),
			daemon_addr: DEFAULT_DAEMON_ADDR.to_string(),
			daemon_timeout_secs: 30,
			ssh: SshConfig::default(),
			auth: AuthConfig::default(),
		}
	}
}

impl CliConfig {
	/// Reads `path`, falling back to defaults when the file does not exist.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		if !path.exists() {
			tracing::debug!(path = %path.display(), "no config file, using defaults");
			return Ok(Self::default());
		}
		let content = std::fs::read_to_string(path)?;
		toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
			path: path.to_path_buf(),
			source,
		})
	}

	pub fn apply_env(&mut self) {
		self.apply_env_from(|name| std::env::var(name).ok());
	}

	pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
		if let Some(v) = lookup("WHITEBOX_SITE_URL") {
			self.site_url = v;
		}
		if let Some(v) = lookup("WHITEBOX_DAEMON_ADDR") {
			self.daemon_addr = v;
		}
		if let Some(v) = lookup("WHITEBOX_SSH_USER") {
			self.ssh.user = v;
		}
		if let Some(v) = lookup("WHITEBOX_SSH_IDENTITY") {
			self.ssh.identity_file = Some(PathBuf::from(v));
		}
	}

	pub fn site_url(&self) -> Result<Url, ConfigError> {
		let url = Url::parse(&self.site_url)
			.map_err(|e| ConfigError::invalid_value("site_url", e.to_string()))?;
		let loopback = matches!(
			url.host_str(),
			Some("localhost") | Some("127.0.0.1") | Some("[::1]")
		);
		if url.scheme() != "https" && !loopback {
			return Err(ConfigError::invalid_value(
				"site_url",
				"server URL must use https://",
			));
		}
		Ok(url)
	}

	pub fn daemon_addr(&self) -> Result<SocketAddr, ConfigError> {
		self
			.daemon_addr
			.parse()
			.map_err(|e: std::net::AddrParseError| ConfigError::invalid_value("daemon_addr", e.to_string()))
	}

	pub fn daemon_timeout(&self) -> Duration {
		Duration::from_secs(self.daemon_timeout_secs)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		self.site_url()?;
		self.daemon_addr()?;
		if self.ssh.port == 0 {
			return Err(ConfigError::invalid_value("ssh.port", "must not be 0"));
		}
		if self.ssh.user.is_empty() {
			return Err(ConfigError::invalid_value("ssh.user", "must not be empty"));
		}
		if self.ssh.command_timeout_secs == 0 || self.daemon_timeout_secs == 0 {
			return Err(ConfigError::invalid_value("timeout", "must be at least one second"));
		}
		Ok(())
	}
}

/// Resolved XDG locations for the client.
#[derive(Debug, Clone)]
pub struct CliPaths {
	/// ~/.config/whitebox-vpn-cli/config.toml
	pub config_file: PathBuf,
	/// ~/.cache/whitebox-vpn-cli/
	pub cache_dir: PathBuf,
	/// ~/.local/state/whitebox-vpn-cli/
	pub state_dir: PathBuf,
}

impl CliPaths {
	pub fn token_file(&self) -> PathBuf {
		self.cache_dir.join("token")
	}

	pub fn session_file(&self) -> PathBuf {
		self.state_dir.join("session.json")
	}

	pub fn ssh_dir(&self) -> PathBuf {
		self.state_dir.join("ssh")
	}
}

pub fn resolve_paths() -> Result<CliPaths, ConfigError> {
	let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;

	let config_home = std::env::var_os("XDG_CONFIG_HOME")
		.map(PathBuf::from)
		.unwrap_or_else(|| home.join(".config"));

	let cache_home = std::env::var_os("XDG_CACHE_HOME")
		.map(PathBuf::from)
		.unwrap_or_else(|| home.join(".cache"));

	let state_home = std::env::var_os("XDG_STATE_HOME")
		.map(PathBuf::from)
		.unwrap_or_else(|| home.join(".local/state"));

	tracing::debug!(
		config_home = %config_home.display(),
		cache_home = %cache_home.display(),
		state_home = %state_home.display(),
		"resolved XDG paths"
	);

	Ok(CliPaths {
		config_file: config_home.join(APP_DIR).join("config.toml"),
		cache_dir: cache_home.join(APP_DIR),
		state_dir: state_home.join(APP_DIR),
	})
}
