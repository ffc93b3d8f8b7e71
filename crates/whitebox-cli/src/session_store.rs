// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, instrument};
use whitebox_common::{DisconnectRequest, WgPublicKey};

use crate::credentials::write_private;
use crate::error::Result;

/// What the client remembers about the tunnel it brought up, so that
/// `wb disconnect` can address the same table later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSession {
	pub server_id: String,
	pub server_name: String,
	pub server_address: Ipv4Addr,
	pub server_port: u16,
	pub client_address: Ipv4Net,
	/// Interface on the VPN server the peer was registered on.
	pub interface: String,
	pub client_public_key: WgPublicKey,
	pub connected_at: DateTime<Utc>,
}

impl ActiveSession {
	pub fn endpoint(&self) -> SocketAddrV4 {
		SocketAddrV4::new(self.server_address, self.server_port)
	}

	pub fn disconnect_request(&self) -> DisconnectRequest {
		DisconnectRequest {
			server_address: self.server_address,
			server_port: self.server_port,
		}
	}
}

#[derive(Debug, Clone)]
pub struct SessionStore {
	path: PathBuf,
}

impl SessionStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub async fn load(&self) -> Result<Option<ActiveSession>> {
		match fs::read(&self.path).await {
			Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	#[instrument(skip(self, session), fields(path = %self.path.display(), server = %session.server_name))]
	pub async fn save(&self, session: &ActiveSession) -> Result<()> {
		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent).await?;
		}
		let json = serde_json::to_vec_pretty(session)?;
		write_private(&self.path, &json).await?;
		debug!("session saved");
		Ok(())
	}

	pub async fn clear(&self) -> Result<()> {
		match fs::remove_file(&self.path).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;
	use whitebox_common::WgKeyPair;

	fn sample() -> ActiveSession {
		ActiveSession {
			server_id: "srv-1".into(),
			server_name: "fra-1".into(),
			server_address: Ipv4Addr::new(203, 0, 113, 10),
			server_port: 51820,
			client_address: "10.8.0.3/32".parse().unwrap(),
			interface: "wg0".into(),
			client_public_key: *WgKeyPair::generate().public_key(),
			connected_at: Utc::now(),
		}
	}

	#[tokio::test]
	async fn save_load_clear() {
		let dir = TempDir::new().unwrap();
		let store = SessionStore::new(dir.path().join("state/session.json"));
		assert!(store.load().await.unwrap().is_none());

		let session = sample();
		store.save(&session).await.unwrap();
		assert_eq!(store.load().await.unwrap(), Some(session));

		store.clear().await.unwrap();
		assert!(store.load().await.unwrap().is_none());
		store.clear().await.unwrap();
	}

	#[test]
	fn disconnect_request_uses_listen_port() {
		let request = sample().disconnect_request();
		assert_eq!(request.server_port, 51820);
		assert_eq!(request.validate().unwrap().get(), 51820);
	}

	#[tokio::test]
	async fn corrupt_file_is_an_error() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("session.json");
		std::fs::write(&path, "{not json").unwrap();
		assert!(SessionStore::new(&path).load().await.is_err());
	}
}
