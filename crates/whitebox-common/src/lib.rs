// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Types shared by the White Box VPN client, the remote discovery client and
//! the privileged network configuration daemon.

pub mod allocator;
pub mod keys;
pub mod protocol;
pub mod session;

pub use allocator::{allocate, AllocationError};
pub use keys::{KeyError, WgKeyPair, WgPrivateKey, WgPublicKey};
pub use session::{DisconnectRequest, SessionConfig, SessionError, TableId};

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use ipnet::Ipv4Net;

/// Name of the tunnel device managed on each host.
pub const DEFAULT_DEVICE_NAME: &str = "wg0";

/// MTU given to a freshly created tunnel device.
pub const DEFAULT_MTU: u32 = 1420;

/// Port the daemon listens on.
pub const DEFAULT_DAEMON_PORT: u16 = 12345;

/// Loopback address the daemon binds to unless told otherwise.
pub const DEFAULT_DAEMON_ADDR: SocketAddr =
	SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_DAEMON_PORT));

/// Destination that captures all IPv4 traffic, `0.0.0.0/0`.
pub fn route_all() -> Ipv4Net {
	Ipv4Net::default()
}
