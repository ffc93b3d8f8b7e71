// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! [`RemoteShell`] backed by the OpenSSH client.
//!
//! The server host key comes from the directory service and is pinned in a
//! private known_hosts file, so `StrictHostKeyChecking=yes` never falls back
//! to trust-on-first-use. A control master keeps one authenticated
//! connection open across the discovery commands; any key passphrase is
//! asked for once, by ssh itself, on the controlling terminal.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::{Child, Command};
use tracing::{debug, instrument, trace, warn};

use crate::error::{RemoteError, Result};
use crate::shell::{output_lines, RemoteShell};

/// Exit status ssh uses for its own failures.
const SSH_ERROR_STATUS: i32 = 255;

pub const DEFAULT_SSH_USER: &str = "root";
pub const DEFAULT_SSH_PORT: u16 = 22;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
	pub host: String,
	pub port: u16,
	pub user: String,
	pub identity_file: Option<PathBuf>,
}

impl SshTarget {
	pub fn new(host: impl Into<String>) -> Self {
		Self {
			host: host.into(),
			port: DEFAULT_SSH_PORT,
			user: DEFAULT_SSH_USER.to_string(),
			identity_file: None,
		}
	}

	fn destination(&self) -> String {
		format!("{}@{}", self.user, self.host)
	}

	/// Host pattern as written in a known_hosts file.
	fn known_hosts_pattern(&self) -> String {
		if self.port == DEFAULT_SSH_PORT {
			self.host.clone()
		} else {
			format!("[{}]:{}", self.host, self.port)
		}
	}
}

pub struct SshShell {
	target: SshTarget,
	known_hosts: PathBuf,
	control_path: PathBuf,
	timeout: Duration,
}

impl SshShell {
	/// Pins `host_key` (`<type> <base64>`) for the target and prepares a
	/// shell. No connection is made until the first command runs.
	#[instrument(skip(host_key, state_dir), fields(host = %target.host, port = target.port))]
	pub async fn open(
		target: SshTarget,
		host_key: &str,
		state_dir: &Path,
		timeout: Duration,
	) -> Result<Self> {
		fs::create_dir_all(state_dir).await?;

		let known_hosts = state_dir.join("known_hosts");
		let entry = format!("{} {}\n", target.known_hosts_pattern(), host_key.trim());
		fs::write(&known_hosts, entry).await?;
		debug!(path = %known_hosts.display(), "pinned server host key");

		Ok(Self {
			target,
			known_hosts,
			control_path: state_dir.join("ssh-%C"),
			timeout,
		})
	}

	pub fn target(&self) -> &SshTarget {
		&self.target
	}

	fn command(&self) -> Command {
		let mut cmd = Command::new("ssh");
		cmd
			.arg("-o")
			.arg(format!("UserKnownHostsFile={}", self.known_hosts.display()))
			.arg("-o")
			.arg("StrictHostKeyChecking=yes")
			.arg("-o")
			.arg(format!("ConnectTimeout={}", self.timeout.as_secs().max(1)))
			.arg("-o")
			.arg("ControlMaster=auto")
			.arg("-o")
			.arg(format!("ControlPath={}", self.control_path.display()))
			.arg("-o")
			.arg("ControlPersist=60")
			.arg("-p")
			.arg(self.target.port.to_string());

		if let Some(identity) = &self.target.identity_file {
			cmd.arg("-i").arg(identity);
		}
		cmd
	}
}

/// Collects the output of `child`, killing it once `timeout` passes.
async fn wait_bounded(child: Child, command: &str, timeout: Duration) -> Result<Output> {
	tokio::time::timeout(timeout, child.wait_with_output())
		.await
		.map_err(|_| RemoteError::Timeout {
			command: command.to_string(),
			timeout,
		})?
		.map_err(RemoteError::from)
}

#[async_trait]
impl RemoteShell for SshShell {
	async fn run(&self, command: &str) -> Result<Vec<String>> {
		let mut cmd = self.command();
		cmd
			.arg(self.target.destination())
			.arg("--")
			.arg(command)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		trace!(host = %self.target.host, command, "running remote command");

		let child = cmd.spawn().map_err(|e| {
			if e.kind() == std::io::ErrorKind::NotFound {
				RemoteError::SshNotInstalled
			} else {
				RemoteError::Io(e)
			}
		})?;

		let output = wait_bounded(child, command, self.timeout).await?;

		let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
		match output.status.code() {
			Some(0) => Ok(output_lines(&String::from_utf8_lossy(&output.stdout))),
			Some(SSH_ERROR_STATUS) => Err(RemoteError::Connection {
				host: self.target.host.clone(),
				stderr,
			}),
			_ => Err(RemoteError::CommandFailed {
				command: command.to_string(),
				status: output.status.to_string(),
				stderr,
			}),
		}
	}

	async fn close(&self) {
		let mut cmd = self.command();
		cmd
			.arg("-O")
			.arg("exit")
			.arg(self.target.destination())
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::null())
			.kill_on_drop(true);

		match tokio::time::timeout(self.timeout, cmd.status()).await {
			Ok(Ok(_)) => debug!(host = %self.target.host, "closed ssh control connection"),
			Ok(Err(e)) => warn!(error = %e, "failed to close ssh control connection"),
			Err(_) => warn!("timed out closing ssh control connection"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	const HOST_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl";

	#[test]
	fn default_target_is_root_on_22() {
		let target = SshTarget::new("203.0.113.10");
		assert_eq!(target.destination(), "root@203.0.113.10");
		assert_eq!(target.known_hosts_pattern(), "203.0.113.10");
	}

	#[test]
	fn non_default_port_is_bracketed() {
		let target = SshTarget {
			port: 2222,
			..SshTarget::new("203.0.113.10")
		};
		assert_eq!(target.known_hosts_pattern(), "[203.0.113.10]:2222");
	}

	#[tokio::test]
	async fn open_pins_host_key() {
		let dir = TempDir::new().unwrap();
		let shell = SshShell::open(
			SshTarget::new("203.0.113.10"),
			HOST_KEY,
			dir.path(),
			Duration::from_secs(5),
		)
		.await
		.unwrap();

		let written = std::fs::read_to_string(dir.path().join("known_hosts")).unwrap();
		assert_eq!(written, format!("203.0.113.10 {HOST_KEY}\n"));
		assert_eq!(shell.target().user, "root");
	}

	#[tokio::test]
	async fn hung_command_times_out() {
		let child = Command::new("sleep")
			.arg("5")
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.spawn()
			.unwrap();

		let err = wait_bounded(child, "wg show interfaces", Duration::from_millis(100))
			.await
			.unwrap_err();
		match err {
			RemoteError::Timeout { command, timeout } => {
				assert_eq!(command, "wg show interfaces");
				assert_eq!(timeout, Duration::from_millis(100));
			}
			other => panic!("unexpected error: {other}"),
		}
	}

	#[tokio::test]
	async fn command_uses_strict_host_checking() {
		let dir = TempDir::new().unwrap();
		let target = SshTarget {
			identity_file: Some(PathBuf::from("/home/u/.ssh/id_rsa")),
			..SshTarget::new("203.0.113.10")
		};
		let shell = SshShell::open(target, HOST_KEY, dir.path(), Duration::from_secs(5))
			.await
			.unwrap();

		let cmd = shell.command();
		let args: Vec<String> = cmd
			.as_std()
			.get_args()
			.map(|a| a.to_string_lossy().to_string())
			.collect();
		assert!(args.contains(&"StrictHostKeyChecking=yes".to_string()));
		assert!(args.contains(&"ConnectTimeout=5".to_string()));
		assert!(args.windows(2).any(|w| w[0] == "-i" && w[1] == "/home/u/.ssh/id_rsa"));
		assert!(args.windows(2).any(|w| w[0] == "-p" && w[1] == "22"));
	}
}
