// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use clap::Args;
use console::style;
use tracing::instrument;

use super::CliContext;
use crate::error::Result;

#[derive(Debug, Clone, Args)]
pub struct ConnectArgs {
	/// Server to connect to; defaults to the first one listed
	#[arg(long)]
	pub server_name: Option<String>,
}

#[instrument(skip(ctx))]
pub async fn handle_connect(args: ConnectArgs, ctx: &CliContext) -> Result<()> {
	let directory = ctx.directory().await?;
	let controller = ctx.controller()?;
	let session = controller
		.connect(&directory, &ctx.ssh_connector(), args.server_name.as_deref())
		.await?;

	println!(
		"{} Connected to {}",
		style("✓").green().bold(),
		style(&session.server_name).cyan()
	);
	println!("  Interface:      {}", style(&session.interface).cyan());
	println!("  Client address: {}", style(session.client_address).cyan());
	println!(
		"  Endpoint:       {}",
		style(session.endpoint()).cyan()
	);
	Ok(())
}
