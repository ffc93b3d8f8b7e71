// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use clap::Subcommand;
use console::style;
use tracing::instrument;

use super::CliContext;
use crate::directory::VpnServer;
use crate::error::Result;

#[derive(Debug, Subcommand)]
pub enum ServersCommands {
	/// List the VPN servers this account can use
	List,
}

const HEADERS: [&str; 5] = ["Name", "IP", "Status", "Region", "Is Admin"];

fn rows(servers: &[VpnServer]) -> Vec<[String; 5]> {
	servers
		.iter()
		.map(|s| {
			[
				s.name.clone(),
				s.address().map(|a| a.to_string()).unwrap_or_else(|| "-".into()),
				s.status.clone(),
				s.region_label.clone(),
				if s.is_admin { "yes" } else { "no" }.to_string(),
			]
		})
		.collect()
}

/// Left-aligned columns separated by two spaces.
pub fn render_table(servers: &[VpnServer]) -> String {
	let rows = rows(servers);
	let mut widths = HEADERS.map(str::len);
	for row in &rows {
		for (width, cell) in widths.iter_mut().zip(row) {
			*width = (*width).max(cell.chars().count());
		}
	}

	let format_row = |cells: &[String]| {
		cells
			.iter()
			.zip(widths)
			.map(|(cell, width)| format!("{cell:<width$}"))
			.collect::<Vec<_>>()
			.join("  ")
			.trim_end()
			.to_string()
	};

	let header: Vec<String> = HEADERS.iter().map(|h| h.to_string()).collect();
	let mut out = format_row(&header);
	for row in &rows {
		out.push('\n');
		out.push_str(&format_row(row));
	}
	out
}

#[instrument(skip(ctx))]
pub async fn handle_servers_list(ctx: &CliContext) -> Result<()> {
	let servers = ctx.directory().await?.list_servers().await?;
	if servers.is_empty() {
		println!("{} No servers available", style("!").yellow().bold());
		return Ok(());
	}
	println!("{}", render_table(&servers));
	Ok(())
}
