// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use console::style;
use tracing::instrument;

use super::CliContext;
use crate::controller::Disconnected;
use crate::error::Result;

#[instrument(skip(ctx))]
pub async fn handle_disconnect(ctx: &CliContext) -> Result<()> {
	match ctx.controller()?.disconnect().await? {
		Disconnected::Session(session) => {
			println!(
				"{} Disconnected from {}",
				style("✓").green().bold(),
				style(&session.server_name).cyan()
			);
		}
		Disconnected::Stale(session) => {
			println!(
				"{} Tunnel to {} was already down, cleared the session",
				style("!").yellow().bold(),
				style(&session.server_name).cyan()
			);
		}
		Disconnected::Untracked(endpoint) => {
			println!(
				"{} Removed untracked tunnel to {}",
				style("✓").green().bold(),
				style(endpoint).cyan()
			);
		}
	}
	Ok(())
}
