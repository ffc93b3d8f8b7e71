// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Finds a free tunnel address on the VPN server and registers the client as
//! a peer there.
//!
//! The address pool of the host is every interface's own address plus every
//! address any peer on any interface is allowed to use. It is recomputed on
//! each attempt. Two clients discovering at the same time can pick the same
//! address; nothing on the server arbitrates that.

use std::collections::{BTreeSet, HashSet};
use std::net::Ipv4Addr;

use ipnet::{IpNet, Ipv4Net};
use tracing::{debug, info, instrument, warn};
use whitebox_common::{allocate, WgPublicKey};

use crate::error::{RemoteError, Result};
use crate::shell::RemoteShell;

/// Marker `wg show allowed-ips` prints for a peer with no addresses.
const NO_ALLOWED_IPS: &str = "(none)";

const LIST_INTERFACES: &str = "wg show interfaces | tr ' ' '\\n'";
const LIST_ALLOWED_IPS: &str = "wg show all allowed-ips | awk '{ for (i = 3; i <= NF; i++) print $i }'";

fn interface_ranges_command(interface: &str) -> String {
	format!("ip -4 -o address show dev {interface} scope global | awk '{{ print $4 }}'")
}

fn listen_port_command(interface: &str) -> String {
	format!("wg show {interface} listen-port")
}

fn register_command(allocation: &Allocation, public_key: &WgPublicKey) -> String {
	format!(
		"wg set {} listen-port {} peer {} allowed-ips {}",
		allocation.interface,
		allocation.listen_port,
		public_key,
		allocation.client_address()
	)
}

/// Linux interface names: at most 15 bytes, no whitespace or shell syntax.
fn validate_interface(name: &str) -> Result<()> {
	let valid = !name.is_empty()
		&& name.len() <= 15
		&& name
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '=' | '+'));
	if valid {
		Ok(())
	} else {
		Err(RemoteError::InvalidInterface(name.to_string()))
	}
}

fn parse_error(command: &str, line: &str) -> RemoteError {
	RemoteError::Parse {
		command: command.to_string(),
		line: line.to_string(),
	}
}

/// Result of a successful discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
	pub interface: String,
	pub network: Ipv4Net,
	pub used: BTreeSet<Ipv4Addr>,
	pub address: Ipv4Addr,
	pub listen_port: u16,
}

impl Allocation {
	/// The allocated address as a single-host network.
	pub fn client_address(&self) -> Ipv4Net {
		Ipv4Net::from(self.address)
	}
}

pub struct RemoteDiscovery<'a> {
	shell: &'a dyn RemoteShell,
}

impl<'a> RemoteDiscovery<'a> {
	pub fn new(shell: &'a dyn RemoteShell) -> Self {
		Self { shell }
	}

	/// Picks the first interface, in host order, that still has a free
	/// address.
	#[instrument(skip(self))]
	pub async fn discover(&self) -> Result<Allocation> {
		let interfaces = self.interfaces().await?;
		if interfaces.is_empty() {
			return Err(RemoteError::NoInterfaces);
		}
		let peer_addresses = self.peer_addresses().await?;
		debug!(
			interfaces = interfaces.len(),
			peers = peer_addresses.len(),
			"enumerated remote tunnels"
		);

		for interface in &interfaces {
			let ranges = self.interface_ranges(interface).await?;
			let Some(network) = ranges.first().map(Ipv4Net::trunc) else {
				warn!(%interface, "interface has no global IPv4 address, skipping");
				continue;
			};

			let mut used: HashSet<Ipv4Addr> = peer_addresses.clone();
			used.extend(ranges.iter().map(Ipv4Net::addr));

			match allocate(network, &used) {
				Ok(address) => {
					let listen_port = self.listen_port(interface).await?;
					info!(%interface, %network, %address, listen_port, "allocated tunnel address");
					return Ok(Allocation {
						interface: interface.clone(),
						network,
						used: used.into_iter().filter(|a| network.contains(a)).collect(),
						address,
						listen_port,
					});
				}
				Err(err) => debug!(%interface, error = %err, "interface full"),
			}
		}

		Err(RemoteError::Exhausted {
			interfaces: interfaces.len(),
		})
	}

	/// Adds `public_key` as a peer allowed to use the allocated address.
	#[instrument(skip(self, allocation), fields(interface = %allocation.interface, address = %allocation.address))]
	pub async fn register_peer(&self, allocation: &Allocation, public_key: &WgPublicKey) -> Result<()> {
		validate_interface(&allocation.interface)?;
		self
			.shell
			.run(&register_command(allocation, public_key))
			.await?;
		info!(peer = %public_key, "registered peer on remote host");
		Ok(())
	}

	async fn interfaces(&self) -> Result<Vec<String>> {
		let lines = self.shell.run(LIST_INTERFACES).await?;
		for line in &lines {
			validate_interface(line)?;
		}
		Ok(lines)
	}

	async fn interface_ranges(&self, interface: &str) -> Result<Vec<Ipv4Net>> {
		validate_interface(interface)?;
		let command = interface_ranges_command(interface);
		self
			.shell
			.run(&command)
			.await?
			.iter()
			.map(|line| line.parse::<Ipv4Net>().map_err(|_| parse_error(&command, line)))
			.collect()
	}

	async fn peer_addresses(&self) -> Result<HashSet<Ipv4Addr>> {
		let mut addresses = HashSet::new();
		for line in self.shell.run(LIST_ALLOWED_IPS).await? {
			if line == NO_ALLOWED_IPS {
				continue;
			}
			match line.parse::<IpNet>() {
				Ok(IpNet::V4(net)) => {
					addresses.insert(net.addr());
				}
				Ok(IpNet::V6(_)) => {}
				Err(_) => return Err(parse_error(LIST_ALLOWED_IPS, &line)),
			}
		}
		Ok(addresses)
	}

	async fn listen_port(&self, interface: &str) -> Result<u16> {
		let command = listen_port_command(interface);
		let lines = self.shell.run(&command).await?;
		let line = lines.first().map(String::as_str).unwrap_or_default();
		line.parse().map_err(|_| parse_error(&command, line))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::shell::ScriptedShell;
	use whitebox_common::WgKeyPair;

	fn base_shell() -> ScriptedShell {
		ScriptedShell::new()
			.respond(LIST_INTERFACES, "wg0\n")
			.respond(interface_ranges_command("wg0"), "10.0.0.1/29\n")
			.respond(LIST_ALLOWED_IPS, "10.0.0.2/32\n(none)\n")
			.respond(listen_port_command("wg0"), "51820\n")
	}

	#[tokio::test]
	async fn allocates_after_interface_and_peer_addresses() {
		let shell = base_shell();
		let allocation = RemoteDiscovery::new(&shell).discover().await.unwrap();

		assert_eq!(allocation.interface, "wg0");
		assert_eq!(allocation.network, "10.0.0.0/29".parse::<Ipv4Net>().unwrap());
		assert_eq!(allocation.address, Ipv4Addr::new(10, 0, 0, 3));
		assert_eq!(allocation.listen_port, 51820);
		assert_eq!(
			allocation.used.iter().copied().collect::<Vec<_>>(),
			vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]
		);
		assert_eq!(allocation.client_address().to_string(), "10.0.0.3/32");
	}

	#[tokio::test]
	async fn full_interface_falls_through_to_next() {
		let shell = ScriptedShell::new()
			.respond(LIST_INTERFACES, "wg0\nwg1\n")
			.respond(interface_ranges_command("wg0"), "10.0.0.1/30\n")
			.respond(interface_ranges_command("wg1"), "10.1.0.1/24\n")
			.respond(LIST_ALLOWED_IPS, "10.0.0.2/32\n10.1.0.2/32\n")
			.respond(listen_port_command("wg1"), "51821\n");

		let allocation = RemoteDiscovery::new(&shell).discover().await.unwrap();
		assert_eq!(allocation.interface, "wg1");
		assert_eq!(allocation.address, Ipv4Addr::new(10, 1, 0, 3));
		assert_eq!(allocation.listen_port, 51821);
		assert!(!shell.calls().contains(&listen_port_command("wg0")));
	}

	#[tokio::test]
	async fn peers_on_other_interfaces_count_as_used() {
		let shell = ScriptedShell::new()
			.respond(LIST_INTERFACES, "wg0\nwg1\n")
			.respond(interface_ranges_command("wg0"), "10.0.0.1/24\n")
			.respond(LIST_ALLOWED_IPS, "10.0.0.2/32 \n10.0.0.3/32\nfd00::5/128\n")
			.respond(listen_port_command("wg0"), "51820\n");

		let allocation = RemoteDiscovery::new(&shell).discover().await.unwrap();
		assert_eq!(allocation.address, Ipv4Addr::new(10, 0, 0, 4));
	}

	#[tokio::test]
	async fn interface_without_range_is_skipped() {
		let shell = ScriptedShell::new()
			.respond(LIST_INTERFACES, "wg0\nwg1\n")
			.respond(interface_ranges_command("wg0"), "")
			.respond(interface_ranges_command("wg1"), "10.9.0.1/24\n")
			.respond(LIST_ALLOWED_IPS, "")
			.respond(listen_port_command("wg1"), "443\n");

		let allocation = RemoteDiscovery::new(&shell).discover().await.unwrap();
		assert_eq!(allocation.interface, "wg1");
		assert_eq!(allocation.address, Ipv4Addr::new(10, 9, 0, 2));
	}

	#[tokio::test]
	async fn every_interface_full_is_exhausted() {
		let shell = ScriptedShell::new()
			.respond(LIST_INTERFACES, "wg0\n")
			.respond(interface_ranges_command("wg0"), "10.0.0.1/30\n")
			.respond(LIST_ALLOWED_IPS, "10.0.0.2/32\n");

		let err = RemoteDiscovery::new(&shell).discover().await.unwrap_err();
		assert!(matches!(err, RemoteError::Exhausted { interfaces: 1 }));
		assert_eq!(err.code(), "resource_exhausted");
	}

	#[tokio::test]
	async fn no_interfaces_is_not_found() {
		let shell = ScriptedShell::new().respond(LIST_INTERFACES, "");
		let err = RemoteDiscovery::new(&shell).discover().await.unwrap_err();
		assert!(matches!(err, RemoteError::NoInterfaces));
		assert_eq!(err.code(), "not_found");
	}

	#[tokio::test]
	async fn garbage_peer_line_fails_discovery() {
		let shell = base_shell().respond(LIST_ALLOWED_IPS, "10.0.0.2/32\nnot-an-address\n");
		let err = RemoteDiscovery::new(&shell).discover().await.unwrap_err();
		assert!(matches!(err, RemoteError::Parse { .. }));
		assert_eq!(err.code(), "remote_execution_error");
	}

	#[tokio::test]
	async fn garbage_range_fails_discovery() {
		let shell = base_shell().respond(interface_ranges_command("wg0"), "10.0.0.1\n");
		let err = RemoteDiscovery::new(&shell).discover().await.unwrap_err();
		assert!(matches!(err, RemoteError::Parse { .. }));
	}

	#[tokio::test]
	async fn hostile_interface_name_is_rejected() {
		let shell = base_shell().respond(LIST_INTERFACES, "wg0;reboot\n");
		let err = RemoteDiscovery::new(&shell).discover().await.unwrap_err();
		assert!(matches!(err, RemoteError::InvalidInterface(_)));
		assert_eq!(shell.calls(), vec![LIST_INTERFACES.to_string()]);
	}

	#[tokio::test]
	async fn remote_failure_surfaces_as_execution_error() {
		let shell = ScriptedShell::new().fail(LIST_INTERFACES, "wg: command not found");
		let err = RemoteDiscovery::new(&shell).discover().await.unwrap_err();
		assert_eq!(err.code(), "remote_execution_error");
	}

	#[tokio::test]
	async fn registers_peer_with_host_route() {
		let pair = WgKeyPair::generate();
		let allocation = Allocation {
			interface: "wg0".into(),
			network: "10.0.0.0/29".parse().unwrap(),
			used: BTreeSet::new(),
			address: Ipv4Addr::new(10, 0, 0, 3),
			listen_port: 51820,
		};
		let command = format!(
			"wg set wg0 listen-port 51820 peer {} allowed-ips 10.0.0.3/32",
			pair.public_key()
		);
		let shell = ScriptedShell::new().respond(command.clone(), "");

		RemoteDiscovery::new(&shell)
			.register_peer(&allocation, pair.public_key())
			.await
			.unwrap();
		assert_eq!(shell.calls(), vec![command]);
	}
}
