// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::io::{self, Write};

use console::style;
use tracing::{info, instrument};

use super::CliContext;
use crate::directory::http_client;
use crate::error::Result;
use crate::login::{open_browser, DeviceFlow};

#[instrument(skip(ctx))]
pub async fn handle_login(ctx: &CliContext) -> Result<()> {
	let flow = DeviceFlow::new(http_client()?, ctx.config.auth.clone());
	let authorization = flow.start().await?;

	eprintln!();
	eprintln!(
		"  Open {} and enter the code {}",
		style(&authorization.verification_uri).cyan(),
		style(&authorization.user_code).bold()
	);
	eprintln!();
	if !open_browser(authorization.browser_url()) {
		eprintln!("  Could not open a browser, visit the URL above manually.");
	}

	eprint!("Waiting for approval");
	io::stderr().flush().ok();
	let token = flow
		.wait_for_token(&authorization, || {
			eprint!(".");
			io::stderr().flush().ok();
		})
		.await;
	eprintln!();
	let token = token?;

	let store = ctx.token_store();
	store.save(&token).await?;
	info!(path = %store.path().display(), "access token stored");

	println!("{} Logged in", style("✓").green().bold());
	Ok(())
}
