// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client for the server directory at `<site_url>/api/servers`.

use std::net::Ipv4Addr;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;
use whitebox_common::WgPublicKey;

use crate::credentials::AccessToken;
use crate::error::{CliError, Result};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// Key type assumed when the directory returns a bare base64 host key.
const DEFAULT_HOST_KEY_TYPE: &str = "ssh-rsa";

pub fn http_client() -> Result<Client> {
	Ok(
		Client::builder()
			.user_agent(concat!("wb/", env!("CARGO_PKG_VERSION")))
			.timeout(HTTP_TIMEOUT)
			.build()?,
	)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpnServer {
	pub id: String,
	pub name: String,
	#[serde(default)]
	pub status: String,
	#[serde(default)]
	pub ipv4: Vec<String>,
	#[serde(default)]
	pub region_label: String,
	#[serde(default)]
	pub is_admin: bool,
}

impl VpnServer {
	/// First parseable IPv4 address the directory lists.
	pub fn address(&self) -> Option<Ipv4Addr> {
		self.ipv4.iter().find_map(|ip| ip.trim().parse().ok())
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicKeyResponse {
	public_key: String,
}

/// Picks `name` from `servers`, or the first server when no name is given.
pub fn select_server(servers: Vec<VpnServer>, name: Option<&str>) -> Result<VpnServer> {
	match name {
		Some(name) => servers
			.into_iter()
			.find(|s| s.name == name)
			.ok_or_else(|| CliError::ServerNotFound(name.to_string())),
		None => servers.into_iter().next().ok_or(CliError::NoServers),
	}
}

/// Produces a known_hosts key entry (`<type> <base64>`).
pub fn normalize_host_key(key: &str) -> String {
	let key = key.trim();
	if key.contains(char::is_whitespace) {
		key.to_string()
	} else {
		format!("{DEFAULT_HOST_KEY_TYPE} {key}")
	}
}

pub struct DirectoryClient {
	http: Client,
	base_url: Url,
	auth_token: AccessToken,
}

impl DirectoryClient {
	pub fn new(http: Client, base_url: Url, auth_token: AccessToken) -> Self {
		Self {
			http,
			base_url,
			auth_token,
		}
	}

	fn api_url(&self, path: &str, server_id: Option<&str>) -> Result<Url> {
		let mut url = self.base_url.join(path)?;
		if let Some(id) = server_id {
			url.query_pairs_mut().append_pair("serverId", id);
		}
		Ok(url)
	}

	async fn get<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
		let response = self
			.http
			.get(url)
			.bearer_auth(self.auth_token.expose())
			.send()
			.await?;

		match response.status() {
			status if status.is_success() => Ok(response.json().await?),
			StatusCode::UNAUTHORIZED => Err(CliError::NotLoggedIn),
			status => {
				let message = response.text().await.unwrap_or_default();
				Err(CliError::Api {
					status: status.as_u16(),
					message,
				})
			}
		}
	}

	#[instrument(skip(self))]
	pub async fn list_servers(&self) -> Result<Vec<VpnServer>> {
		let url = self.api_url("/api/servers", None)?;
		let servers: Vec<VpnServer> = self.get(url).await?;
		debug!(count = servers.len(), "listed servers");
		Ok(servers)
	}

	#[instrument(skip(self))]
	pub async fn resolve_server(&self, name: Option<&str>) -> Result<VpnServer> {
		select_server(self.list_servers().await?, name)
	}

	#[instrument(skip(self))]
	pub async fn fetch_host_public_key(&self, server_id: &str) -> Result<String> {
		let url = self.api_url("/api/servers/sshPublicKeys", Some(server_id))?;
		let response: PublicKeyResponse = self.get(url).await?;
		Ok(normalize_host_key(&response.public_key))
	}

	#[instrument(skip(self))]
	pub async fn fetch_tunnel_public_key(&self, server_id: &str) -> Result<WgPublicKey> {
		let url = self.api_url("/api/servers/wgPublicKeys", Some(server_id))?;
		let response: PublicKeyResponse = self.get(url).await?;
		Ok(WgPublicKey::from_base64(response.public_key.trim())?)
	}
}
