use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use whitebox_common::{DEFAULT_DEVICE_NAME, DEFAULT_MTU};
use whitebox_netconf::NetconfConfig;

/// White Box VPN daemon - configures the local WireGuard tunnel
#[derive(Parser, Debug)]
#[command(name = "whitebox-daemon")]
pub struct Args {
    /// Bind address
    #[arg(long, env = "WHITEBOX_DAEMON_LISTEN", default_value = "127.0.0.1:12345")]
    pub listen: SocketAddr,

    /// WireGuard device to manage
    #[arg(long, env = "WHITEBOX_DEVICE", default_value = DEFAULT_DEVICE_NAME)]
    pub device: String,

    /// Device MTU
    #[arg(
        long,
        env = "WHITEBOX_MTU",
        default_value_t = DEFAULT_MTU,
        value_parser = clap::value_parser!(u32).range(576..=65535)
    )]
    pub mtu: u32,

    /// Timeout for each ip/wg invocation, in seconds
    #[arg(long, env = "WHITEBOX_COMMAND_TIMEOUT_SECS", default_value_t = 10)]
    pub command_timeout_secs: u64,

    /// Allow binding a non-loopback address (the protocol is unauthenticated)
    #[arg(long)]
    pub allow_remote: bool,

    /// Simulate kernel changes in memory instead of running ip/wg
    #[arg(long)]
    pub dry_run: bool,
}

impl Args {
    pub fn validate(&self) -> Result<(), String> {
        if !self.listen.ip().is_loopback() && !self.allow_remote {
            return Err(format!(
                "refusing to listen on non-loopback address {} without --allow-remote",
                self.listen
            ));
        }
        if !valid_device_name(&self.device) {
            return Err(format!("invalid device name: {:?}", self.device));
        }
        if self.command_timeout_secs == 0 {
            return Err("--command-timeout-secs must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn netconf_config(&self) -> NetconfConfig {
        NetconfConfig {
            device: self.device.clone(),
            mtu: self.mtu,
        }
    }
}

/// Linux interface names: 1 to 15 bytes, no whitespace or `/`.
fn valid_device_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 15
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_graphic() && c != '/' && c != ':')
}
