// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use crate::error::Result;

/// Bearer token for the directory service.
#[derive(Clone)]
pub struct AccessToken(Zeroizing<String>);

impl AccessToken {
	pub fn new(token: impl Into<String>) -> Self {
		Self(Zeroizing::new(token.into()))
	}

	pub fn expose(&self) -> &str {
		self.0.as_str()
	}
}

impl fmt::Debug for AccessToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("AccessToken([REDACTED])")
	}
}

/// Single-token file store, readable only by the owner.
#[derive(Debug, Clone)]
pub struct TokenStore {
	path: PathBuf,
}

impl TokenStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	#[instrument(skip(self), fields(path = %self.path.display()))]
	pub async fn load(&self) -> Result<Option<AccessToken>> {
		match fs::read_to_string(&self.path).await {
			Ok(content) => {
				let content = Zeroizing::new(content);
				let token = content.trim();
				if token.is_empty() {
					debug!("token file is empty");
					return Ok(None);
				}
				Ok(Some(AccessToken::new(token)))
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	#[instrument(skip(self, token), fields(path = %self.path.display()))]
	pub async fn save(&self, token: &AccessToken) -> Result<()> {
		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent).await?;
		}
		write_private(&self.path, token.expose().as_bytes()).await?;
		debug!("token saved");
		Ok(())
	}

	pub async fn delete(&self) -> Result<()> {
		match fs::remove_file(&self.path).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}
}

/// Writes `contents` to a sibling temp file with mode 0600 and renames it
/// over `path`.
pub(crate) async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
	let tmp = path.with_extension("tmp");
	let mut options = fs::OpenOptions::new();
	options.write(true).create(true).truncate(true);
	#[cfg(unix)]
	options.mode(0o600);
	let mut file = options.open(&tmp).await?;
	tokio::io::AsyncWriteExt::write_all(&mut file, contents).await?;
	file.sync_all().await?;
	drop(file);
	fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[tokio::test]
	async fn missing_file_means_logged_out() {
		let dir = TempDir::new().unwrap();
		let store = TokenStore::new(dir.path().join("token"));
		assert!(store.load().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn save_load_delete() {
		let dir = TempDir::new().unwrap();
		let store = TokenStore::new(dir.path().join("nested/token"));

		store.save(&AccessToken::new("eyJhbGciOi")).await.unwrap();
		let loaded = store.load().await.unwrap().unwrap();
		assert_eq!(loaded.expose(), "eyJhbGciOi");

		store.delete().await.unwrap();
		assert!(store.load().await.unwrap().is_none());
		store.delete().await.unwrap();
	}

	#[tokio::test]
	async fn surrounding_whitespace_is_ignored() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("token");
		std::fs::write(&path, "abc\n").unwrap();
		let loaded = TokenStore::new(&path).load().await.unwrap().unwrap();
		assert_eq!(loaded.expose(), "abc");
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn token_file_is_owner_only() {
		use std::os::unix::fs::PermissionsExt;

		let dir = TempDir::new().unwrap();
		let store = TokenStore::new(dir.path().join("token"));
		store.save(&AccessToken::new("secret")).await.unwrap();
		let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
		assert_eq!(mode & 0o777, 0o600);
	}

	#[test]
	fn debug_is_redacted() {
		let token = AccessToken::new("secret");
		assert!(!format!("{token:?}").contains("secret"));
	}
}
