// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use console::style;
use tracing::instrument;
use whitebox_common::protocol::TunnelState;

use super::CliContext;
use crate::error::Result;

#[instrument(skip(ctx))]
pub async fn handle_status(ctx: &CliContext) -> Result<()> {
	let report = ctx.controller()?.status().await?;

	match &report.session {
		Some(session) => {
			println!(
				"{} Connected to {}",
				style("●").green().bold(),
				style(&session.server_name).cyan()
			);
			println!("  Interface:      {}", session.interface);
			println!("  Client address: {}", session.client_address);
			println!("  Endpoint:       {}", session.endpoint());
			println!(
				"  Since:          {}",
				style(session.connected_at.format("%Y-%m-%d %H:%M:%S UTC")).dim()
			);
		}
		None => println!("{} Not connected", style("●").dim()),
	}

	match report.daemon {
		Ok(status) => match status.state {
			TunnelState::Configured => {
				let endpoint = status
					.server_endpoint
					.map(|e| e.to_string())
					.unwrap_or_default();
				println!(
					"  Daemon:         {} up on {} {}",
					style("●").green(),
					status.device,
					style(endpoint).dim()
				);
				if report.session.is_none() {
					println!(
						"  {} the daemon holds a tunnel with no session, run `wb disconnect`",
						style("!").yellow().bold()
					);
				}
			}
			TunnelState::Absent => {
				println!("  Daemon:         {} no tunnel on {}", style("●").dim(), status.device);
				if report.session.is_some() {
					println!(
						"  {} the session is stale, run `wb disconnect` to clear it",
						style("!").yellow().bold()
					);
				}
			}
		},
		Err(e) => println!("  Daemon:         {} {e}", style("●").red()),
	}
	Ok(())
}
