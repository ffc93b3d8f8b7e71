// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

use whitebox_cli::{
	handle_connect, handle_disconnect, handle_login, handle_servers_list, handle_status,
	resolve_paths, CliConfig, CliContext, ConnectArgs, Result, ServersCommands,
};

#[derive(Debug, Parser)]
#[command(name = "wb", version, about = "White Box VPN client")]
struct Cli {
	/// Config file (default: $XDG_CONFIG_HOME/whitebox-vpn-cli/config.toml)
	#[arg(long, global = true, env = "WHITEBOX_CONFIG")]
	config: Option<PathBuf>,

	/// Console URL
	#[arg(long, global = true)]
	site_url: Option<String>,

	/// Local daemon address
	#[arg(long, global = true)]
	daemon_addr: Option<String>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
	/// Sign in with the device authorization flow
	Login,
	/// Browse VPN servers
	#[command(subcommand)]
	Servers(ServersCommands),
	/// Bring up a tunnel to a VPN server
	Connect(ConnectArgs),
	/// Tear down the active tunnel
	Disconnect,
	/// Show the active session and the daemon's tunnel
	Status,
}

async fn run(cli: Cli) -> Result<()> {
	let paths = resolve_paths()?;
	let config_file = cli.config.unwrap_or_else(|| paths.config_file.clone());
	let mut config = CliConfig::load(&config_file)?;
	config.apply_env();
	if let Some(site_url) = cli.site_url {
		config.site_url = site_url;
	}
	if let Some(daemon_addr) = cli.daemon_addr {
		config.daemon_addr = daemon_addr;
	}
	config.validate()?;

	let ctx = CliContext::new(config, paths);
	match cli.command {
		Command::Login => handle_login(&ctx).await,
		Command::Servers(ServersCommands::List) => handle_servers_list(&ctx).await,
		Command::Connect(args) => handle_connect(args, &ctx).await,
		Command::Disconnect => handle_disconnect(&ctx).await,
		Command::Status => handle_status(&ctx).await,
	}
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
		.with_writer(std::io::stderr)
		.init();

	let cli = Cli::parse();
	if let Err(e) = run(cli).await {
		eprintln!("{} {e}", style("error:").red().bold());
		std::process::exit(1);
	}
}
