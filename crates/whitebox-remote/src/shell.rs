// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{RemoteError, Result};

/// A channel that runs shell commands on the VPN server.
///
/// Output is returned as the finite list of non-empty stdout lines of one
/// invocation.
#[async_trait]
pub trait RemoteShell: Send + Sync {
	async fn run(&self, command: &str) -> Result<Vec<String>>;

	/// Releases any connection held open between commands.
	async fn close(&self) {}
}

/// Splits command output into trimmed, non-empty lines.
pub fn output_lines(stdout: &str) -> Vec<String> {
	stdout
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty())
		.map(str::to_string)
		.collect()
}

/// Remote shell that answers from a fixed script. Used in tests.
#[derive(Default)]
pub struct ScriptedShell {
	responses: HashMap<String, std::result::Result<String, String>>,
	calls: Mutex<Vec<String>>,
}

impl ScriptedShell {
	pub fn new() -> Self {
		Self::default()
	}

	/// Answers `command` with `stdout`.
	pub fn respond(mut self, command: impl Into<String>, stdout: &str) -> Self {
		self
			.responses
			.insert(command.into(), Ok(stdout.to_string()));
		self
	}

	/// Makes `command` fail with `stderr`.
	pub fn fail(mut self, command: impl Into<String>, stderr: &str) -> Self {
		self
			.responses
			.insert(command.into(), Err(stderr.to_string()));
		self
	}

	pub fn calls(&self) -> Vec<String> {
		self
			.calls
			.lock()
			.map(|calls| calls.clone())
			.unwrap_or_default()
	}
}

#[async_trait]
impl RemoteShell for ScriptedShell {
	async fn run(&self, command: &str) -> Result<Vec<String>> {
		if let Ok(mut calls) = self.calls.lock() {
			calls.push(command.to_string());
		}
		match self.responses.get(command) {
			Some(Ok(stdout)) => Ok(output_lines(stdout)),
			Some(Err(stderr)) => Err(RemoteError::CommandFailed {
				command: command.to_string(),
				status: "exit status 1".to_string(),
				stderr: stderr.clone(),
			}),
			None => Err(RemoteError::CommandFailed {
				command: command.to_string(),
				status: "exit status 127".to_string(),
				stderr: "unscripted command".to_string(),
			}),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn output_lines_drops_blank_lines() {
		assert_eq!(output_lines("wg0\n\n  wg1 \n"), vec!["wg0", "wg1"]);
		assert!(output_lines("").is_empty());
	}

	#[tokio::test]
	async fn scripted_shell_records_calls() {
		let shell = ScriptedShell::new()
			.respond("echo hi", "hi\n")
			.fail("false", "nope");

		assert_eq!(shell.run("echo hi").await.unwrap(), vec!["hi"]);
		assert!(shell.run("false").await.is_err());
		assert!(shell.run("unknown").await.is_err());
		assert_eq!(shell.calls(), vec!["echo hi", "false", "unknown"]);
	}
}
