// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Kernel side of the tunnel: the WireGuard device, its address, the policy
//! rules and route that send traffic through it, and the server peer.

pub mod backend;
pub mod command;
pub mod controller;
pub mod error;
pub mod memory;

pub use backend::{LinkInfo, PeerSpec, RouteSpec, RoutingRule, TunnelBackend};
pub use command::{CommandBackend, DEFAULT_COMMAND_TIMEOUT};
pub use controller::{ActiveTunnel, KernelStep, NetconfConfig, TunnelController};
pub use error::{BackendError, NetconfError, Result};
pub use memory::{BackendOp, KernelSnapshot, MemoryBackend};
