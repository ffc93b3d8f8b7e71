// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! [`TunnelBackend`] implemented with the `ip` and `wg` command line tools.

use std::net::Ipv4Addr;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace, warn};
use whitebox_common::{route_all, TableId, WgPrivateKey};

use crate::backend::{LinkInfo, PeerSpec, RouteSpec, RoutingRule, TunnelBackend};
use crate::error::BackendError;

const IP: &str = "ip";
const WG: &str = "wg";

/// Route types `ip route show` may print before the destination.
const ROUTE_TYPES: &[&str] = &[
	"unicast",
	"local",
	"broadcast",
	"multicast",
	"throw",
	"unreachable",
	"prohibit",
	"blackhole",
	"nat",
];

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Kernel backend driving iproute2 and wireguard-tools.
pub struct CommandBackend {
	timeout: Duration,
}

impl CommandBackend {
	pub fn new(timeout: Duration) -> Self {
		Self { timeout }
	}

	async fn run(&self, program: &'static str, args: &[String]) -> Result<String, BackendError> {
		self.run_with_input(program, args, None).await
	}

	/// Runs a command and returns its stdout on success. `input` is written
	/// to stdin so secrets never show up in the process list.
	async fn run_with_input(
		&self,
		program: &'static str,
		args: &[String],
		input: Option<&[u8]>,
	) -> Result<String, BackendError> {
		let rendered = args.join(" ");
		trace!(cmd = %format!("{program} {rendered}"), "running command");

		let mut cmd = Command::new(program);
		cmd
			.args(args)
			.stdin(if input.is_some() {
				Stdio::piped()
			} else {
				Stdio::null()
			})
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		let mut child = cmd.spawn().map_err(|e| {
			if e.kind() == std::io::ErrorKind::NotFound {
				warn!(program, "command not found in PATH");
				BackendError::NotInstalled { program }
			} else {
				BackendError::Io(e)
			}
		})?;

		let stdin = child.stdin.take();
		let run = async move {
			if let (Some(mut pipe), Some(bytes)) = (stdin, input) {
				pipe.write_all(bytes).await?;
				pipe.write_all(b"\n").await?;
			}
			child.wait_with_output().await
		};

		let output = match tokio::time::timeout(self.timeout, run).await {
			Ok(result) => result?,
			Err(_) => {
				return Err(BackendError::Timeout {
					program,
					args: rendered,
					timeout: self.timeout,
				})
			}
		};

		if output.status.success() {
			Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
		} else {
			let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
			Err(BackendError::CommandFailed {
				program,
				args: rendered,
				stderr,
			})
		}
	}
}

impl Default for CommandBackend {
	fn default() -> Self {
		Self::new(DEFAULT_COMMAND_TIMEOUT)
	}
}

fn strings(args: &[&str]) -> Vec<String> {
	args.iter().map(|s| s.to_string()).collect()
}

fn is_missing(err: &BackendError) -> bool {
	match err {
		BackendError::CommandFailed { stderr, .. } => {
			stderr.contains("No such file or directory")
				|| stderr.contains("does not exist")
				|| stderr.contains("Cannot find device")
		}
		_ => false,
	}
}

pub(crate) fn rule_args(op: &str, rule: RoutingRule) -> Vec<String> {
	let mut args = strings(&["-4", "rule", op]);
	match rule {
		RoutingRule::UnmarkedToTable(table) => {
			let table = table.to_string();
			args.extend(strings(&["not", "from", "0.0.0.0/0", "fwmark"]));
			args.push(table.clone());
			args.push("table".into());
			args.push(table);
		}
		RoutingRule::MainWithoutDefault => {
			args.extend(strings(&[
				"from",
				"0.0.0.0/0",
				"table",
				"main",
				"suppress_prefixlength",
				"0",
			]));
		}
	}
	args
}

pub(crate) fn route_args(op: &str, route: &RouteSpec) -> Vec<String> {
	let mut args = strings(&["-4", "route", op]);
	args.push(route.destination.to_string());
	args.push("dev".into());
	args.push(route.device.clone());
	args.push("table".into());
	args.push(route.table.to_string());
	if op == "replace" {
		args.extend(strings(&["scope", "link"]));
	}
	args
}

pub(crate) fn wireguard_args(link: &str, peer: &PeerSpec) -> Vec<String> {
	let allowed = peer
		.allowed_ips
		.iter()
		.map(|net| net.to_string())
		.collect::<Vec<_>>()
		.join(",");
	vec![
		"set".into(),
		link.into(),
		"private-key".into(),
		"/dev/stdin".into(),
		"peer".into(),
		peer.public_key.to_base64(),
		"allowed-ips".into(),
		allowed,
		"endpoint".into(),
		peer.endpoint.to_string(),
	]
}

/// Parses one line of `ip -o link show`.
pub(crate) fn parse_link_line(line: &str) -> Option<LinkInfo> {
	let mut parts = line.split_whitespace();
	let index = parts.next()?.strip_suffix(':')?.parse().ok()?;
	let name = parts.next()?.strip_suffix(':')?;
	let name = name.split('@').next()?.to_string();
	let flags = parts.next()?.strip_prefix('<')?.strip_suffix('>')?;
	let up = flags.split(',').any(|flag| flag == "UP");

	let mtu = parts
		.skip_while(|token| *token != "mtu")
		.nth(1)?
		.parse()
		.ok()?;

	Some(LinkInfo {
		name,
		index,
		mtu,
		up,
	})
}

/// Parses the destination of one line of `ip -o route show`.
pub(crate) fn parse_route_destination(line: &str) -> Option<Ipv4Net> {
	let mut tokens = line.split_whitespace();
	let mut first = tokens.next()?;
	if ROUTE_TYPES.contains(&first) {
		first = tokens.next()?;
	}
	if first == "default" {
		return Some(route_all());
	}
	first
		.parse::<Ipv4Net>()
		.ok()
		.or_else(|| first.parse::<Ipv4Addr>().ok().map(Ipv4Net::from))
}

/// Parses `wg show <dev> fwmark`: `off`, or the mark in hex or decimal.
pub(crate) fn parse_fwmark(output: &str) -> Option<Option<u32>> {
	let value = output.trim();
	if value == "off" || value.is_empty() {
		return Some(None);
	}
	let mark = match value.strip_prefix("0x") {
		Some(hex) => u32::from_str_radix(hex, 16).ok()?,
		None => value.parse().ok()?,
	};
	Some((mark != 0).then_some(mark))
}

#[async_trait]
impl TunnelBackend for CommandBackend {
	async fn find_link(&self, name: &str) -> Result<Option<LinkInfo>, BackendError> {
		let output = match self.run(IP, &strings(&["-o", "link", "show", "dev", name])).await {
			Ok(output) => output,
			Err(err) if is_missing(&err) => return Ok(None),
			Err(err) => return Err(err),
		};

		let line = output.lines().next().unwrap_or_default();
		parse_link_line(line)
			.map(Some)
			.ok_or_else(|| BackendError::UnexpectedOutput {
				program: IP,
				line: line.to_string(),
			})
	}

	async fn add_wireguard_link(&self, name: &str, mtu: u32) -> Result<LinkInfo, BackendError> {
		let mtu_arg = mtu.to_string();
		self
			.run(
				IP,
				&strings(&["link", "add", "dev", name, "mtu", &mtu_arg, "type", "wireguard"]),
			)
			.await?;
		debug!(link = name, mtu, "created wireguard link");
		self
			.find_link(name)
			.await?
			.ok_or_else(|| BackendError::LinkNotFound(name.to_string()))
	}

	async fn replace_address(&self, link: &str, address: Ipv4Net) -> Result<(), BackendError> {
		let address = address.to_string();
		self
			.run(IP, &strings(&["-4", "address", "flush", "dev", link]))
			.await?;
		self
			.run(
				IP,
				&strings(&["-4", "address", "replace", &address, "dev", link]),
			)
			.await?;
		Ok(())
	}

	async fn set_link_up(&self, link: &str) -> Result<(), BackendError> {
		self
			.run(IP, &strings(&["link", "set", "dev", link, "up"]))
			.await?;
		Ok(())
	}

	async fn add_rule(&self, rule: RoutingRule) -> Result<(), BackendError> {
		self.run(IP, &rule_args("add", rule)).await?;
		Ok(())
	}

	async fn delete_rule(&self, rule: RoutingRule) -> Result<bool, BackendError> {
		match self.run(IP, &rule_args("del", rule)).await {
			Ok(_) => Ok(true),
			Err(err) if is_missing(&err) => Ok(false),
			Err(err) => Err(err),
		}
	}

	async fn replace_route(&self, route: &RouteSpec) -> Result<(), BackendError> {
		self.run(IP, &route_args("replace", route)).await?;
		Ok(())
	}

	async fn list_routes(&self, link: &str, table: TableId) -> Result<Vec<RouteSpec>, BackendError> {
		let table_arg = table.to_string();
		let output = self
			.run(
				IP,
				&strings(&["-4", "-o", "route", "show", "table", &table_arg, "dev", link]),
			)
			.await?;

		output
			.lines()
			.filter(|line| !line.trim().is_empty())
			.map(|line| {
				parse_route_destination(line)
					.map(|destination| RouteSpec {
						destination,
						device: link.to_string(),
						table,
					})
					.ok_or_else(|| BackendError::UnexpectedOutput {
						program: IP,
						line: line.to_string(),
					})
			})
			.collect()
	}

	async fn delete_route(&self, route: &RouteSpec) -> Result<(), BackendError> {
		self.run(IP, &route_args("del", route)).await?;
		Ok(())
	}

	async fn configure_wireguard(
		&self,
		link: &str,
		private_key: &WgPrivateKey,
		peer: &PeerSpec,
	) -> Result<(), BackendError> {
		let key = private_key.to_base64();
		self
			.run_with_input(WG, &wireguard_args(link, peer), Some(key.as_bytes()))
			.await?;
		Ok(())
	}

	async fn set_firewall_mark(&self, link: &str, mark: u32) -> Result<(), BackendError> {
		let mark = mark.to_string();
		self
			.run(WG, &strings(&["set", link, "fwmark", &mark]))
			.await?;
		Ok(())
	}

	async fn firewall_mark(&self, link: &str) -> Result<Option<u32>, BackendError> {
		let output = self.run(WG, &strings(&["show", link, "fwmark"])).await?;
		parse_fwmark(&output).ok_or_else(|| BackendError::UnexpectedOutput {
			program: WG,
			line: output,
		})
	}

	async fn delete_link(&self, link: &str) -> Result<(), BackendError> {
		self
			.run(IP, &strings(&["link", "del", "dev", link]))
			.await?;
		Ok(())
	}
}
