// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Remote side of a White Box VPN session: address discovery and peer
//! registration on the VPN server, driven over a command channel.

pub mod discovery;
pub mod error;
pub mod shell;
pub mod ssh;

pub use discovery::{Allocation, RemoteDiscovery};
pub use error::{RemoteError, Result};
pub use shell::{RemoteShell, ScriptedShell};
pub use ssh::{SshShell, SshTarget, DEFAULT_SSH_PORT, DEFAULT_SSH_USER};
