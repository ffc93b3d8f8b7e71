// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! OAuth 2.0 device authorization grant (RFC 8628) against the identity
//! provider configured in [`AuthConfig`].

use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::config::AuthConfig;
use crate::credentials::AccessToken;
use crate::error::{CliError, Result};

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const SCOPE: &str = "profile email";
const DEFAULT_INTERVAL_SECS: u64 = 5;
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAuthorization {
	pub device_code: String,
	pub user_code: String,
	pub verification_uri: String,
	#[serde(default)]
	pub verification_uri_complete: Option<String>,
	pub expires_in: u64,
	#[serde(default)]
	pub interval: Option<u64>,
}

impl DeviceAuthorization {
	/// URL to show the user, with the code pre-filled when the provider
	/// supports it.
	pub fn browser_url(&self) -> &str {
		self
			.verification_uri_complete
			.as_deref()
			.unwrap_or(&self.verification_uri)
	}

	pub fn poll_interval(&self) -> Duration {
		Duration::from_secs(self.interval.unwrap_or(DEFAULT_INTERVAL_SECS))
	}
}

#[derive(Deserialize)]
struct TokenResponse {
	access_token: String,
}

#[derive(Deserialize)]
struct OAuthErrorBody {
	error: String,
	#[serde(default)]
	error_description: Option<String>,
}

#[derive(Debug)]
pub enum PollOutcome {
	Granted(AccessToken),
	Pending,
	SlowDown,
}

/// Maps one token endpoint response to the next step of the flow.
pub fn classify_poll(status: u16, body: &str) -> Result<PollOutcome> {
	if (200..300).contains(&status) {
		let token: TokenResponse = serde_json::from_str(body)?;
		return Ok(PollOutcome::Granted(AccessToken::new(token.access_token)));
	}

	let Ok(err) = serde_json::from_str::<OAuthErrorBody>(body) else {
		return Err(CliError::Api {
			status,
			message: body.to_string(),
		});
	};

	match err.error.as_str() {
		"authorization_pending" => Ok(PollOutcome::Pending),
		"slow_down" => Ok(PollOutcome::SlowDown),
		"expired_token" => Err(CliError::Login(
			"the device code expired, run `wb login` again".into(),
		)),
		"access_denied" => Err(CliError::Login("access denied".into())),
		other => Err(CliError::Api {
			status,
			message: err
				.error_description
				.unwrap_or_else(|| other.to_string()),
		}),
	}
}

pub struct DeviceFlow {
	client: reqwest::Client,
	auth: AuthConfig,
}

impl DeviceFlow {
	pub fn new(client: reqwest::Client, auth: AuthConfig) -> Self {
		Self { client, auth }
	}

	#[instrument(skip(self), fields(url = %self.auth.device_code_url))]
	pub async fn start(&self) -> Result<DeviceAuthorization> {
		debug!("requesting device code");
		let resp = self
			.client
			.post(&self.auth.device_code_url)
			.form(&[
				("client_id", self.auth.client_id.as_str()),
				("scope", SCOPE),
				("audience", self.auth.audience.as_str()),
			])
			.send()
			.await?;

		if !resp.status().is_success() {
			let status = resp.status().as_u16();
			let message = resp.text().await.unwrap_or_default();
			warn!(status, "device code request failed");
			return Err(CliError::Api { status, message });
		}

		let authorization: DeviceAuthorization = resp.json().await?;
		debug!(
			verification_uri = %authorization.verification_uri,
			expires_in = authorization.expires_in,
			"device code issued"
		);
		Ok(authorization)
	}

	pub async fn poll_once(&self, authorization: &DeviceAuthorization) -> Result<PollOutcome> {
		let resp = self
			.client
			.post(&self.auth.token_url)
			.form(&[
				("grant_type", DEVICE_CODE_GRANT),
				("device_code", authorization.device_code.as_str()),
				("client_id", self.auth.client_id.as_str()),
			])
			.send()
			.await?;
		let status = resp.status().as_u16();
		let body = resp.text().await?;
		classify_poll(status, &body)
	}

	/// Polls until the user approves, the code expires or the user presses
	/// Ctrl-C. `on_tick` runs after every pending poll.
	#[instrument(skip_all)]
	pub async fn wait_for_token(
		&self,
		authorization: &DeviceAuthorization,
		mut on_tick: impl FnMut(),
	) -> Result<AccessToken> {
		let deadline = Duration::from_secs(authorization.expires_in);
		let mut interval = authorization.poll_interval();
		let started = Instant::now();

		loop {
			if started.elapsed() > deadline {
				return Err(CliError::Login(
					"the device code expired, run `wb login` again".into(),
				));
			}

			tokio::select! {
				_ = tokio::signal::ctrl_c() => {
					return Err(CliError::Login("cancelled".into()));
				}
				_ = tokio::time::sleep(interval) => {}
			}

			match self.poll_once(authorization).await? {
				PollOutcome::Granted(token) => {
					info!("device authorization granted");
					return Ok(token);
				}
				PollOutcome::Pending => on_tick(),
				PollOutcome::SlowDown => {
					interval += SLOW_DOWN_STEP;
					debug!(interval_secs = interval.as_secs(), "provider asked to slow down");
					on_tick();
				}
			}
		}
	}
}

/// Best effort; the URL is printed regardless.
pub fn open_browser(url: &str) -> bool {
	match webbrowser::open(url) {
		Ok(()) => true,
		Err(e) => {
			debug!(error = %e, "failed to open browser");
			false
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use wiremock::matchers::{body_string_contains, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn auth_config(server: &MockServer) -> AuthConfig {
		AuthConfig {
			device_code_url: format!("{}/oauth/device/code", server.uri()),
			token_url: format!("{}/oauth/token", server.uri()),
			client_id: "client-123".into(),
			audience: "https://console.example.com/api/".into(),
		}
	}

	#[test]
	fn pending_and_slow_down_keep_polling() {
		assert!(matches!(
			classify_poll(403, r#"{"error":"authorization_pending"}"#).unwrap(),
			PollOutcome::Pending
		));
		assert!(matches!(
			classify_poll(429, r#"{"error":"slow_down"}"#).unwrap(),
			PollOutcome::SlowDown
		));
	}

	#[test]
	fn terminal_errors_stop_the_flow() {
		let err = classify_poll(403, r#"{"error":"expired_token"}"#).unwrap_err();
		assert!(err.to_string().contains("expired"));

		let err = classify_poll(403, r#"{"error":"access_denied"}"#).unwrap_err();
		assert!(err.to_string().contains("access denied"));

		let err = classify_poll(
			400,
			r#"{"error":"invalid_grant","error_description":"bad code"}"#,
		)
		.unwrap_err();
		assert!(matches!(err, CliError::Api { status: 400, ref message } if message == "bad code"));

		let err = classify_poll(502, "<html>bad gateway</html>").unwrap_err();
		assert!(matches!(err, CliError::Api { status: 502, .. }));
	}

	#[test]
	fn granted_token_is_returned() {
		match classify_poll(200, r#"{"access_token":"tok","token_type":"Bearer"}"#).unwrap() {
			PollOutcome::Granted(token) => assert_eq!(token.expose(), "tok"),
			other => panic!("unexpected outcome: {other:?}"),
		}
	}

	#[test]
	fn complete_uri_is_preferred() {
		let mut authorization = DeviceAuthorization {
			device_code: "dc".into(),
			user_code: "ABCD-EFGH".into(),
			verification_uri: "https://id.example.com/activate".into(),
			verification_uri_complete: None,
			expires_in: 900,
			interval: None,
		};
		assert_eq!(authorization.browser_url(), "https://id.example.com/activate");
		assert_eq!(authorization.poll_interval(), Duration::from_secs(5));

		authorization.verification_uri_complete =
			Some("https://id.example.com/activate?user_code=ABCD-EFGH".into());
		assert!(authorization.browser_url().ends_with("ABCD-EFGH"));
	}

	#[tokio::test]
	async fn start_posts_client_and_audience() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/oauth/device/code"))
			.and(body_string_contains("client_id=client-123"))
			.and(body_string_contains("scope=profile+email"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"device_code": "dc-1",
				"user_code": "WXYZ-1234",
				"verification_uri": "https://id.example.com/activate",
				"verification_uri_complete": "https://id.example.com/activate?user_code=WXYZ-1234",
				"expires_in": 900,
				"interval": 5
			})))
			.expect(1)
			.mount(&server)
			.await;

		let flow = DeviceFlow::new(reqwest::Client::new(), auth_config(&server));
		let authorization = flow.start().await.unwrap();
		assert_eq!(authorization.user_code, "WXYZ-1234");
		assert_eq!(authorization.interval, Some(5));
	}

	#[tokio::test]
	async fn wait_returns_token_after_pending() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/oauth/token"))
			.respond_with(
				ResponseTemplate::new(403)
					.set_body_json(serde_json::json!({ "error": "authorization_pending" })),
			)
			.up_to_n_times(1)
			.mount(&server)
			.await;
		Mock::given(method("POST"))
			.and(path("/oauth/token"))
			.and(body_string_contains("device_code=dc-1"))
			.respond_with(
				ResponseTemplate::new(200).set_body_json(serde_json::json!({ "access_token": "tok-1" })),
			)
			.mount(&server)
			.await;

		let flow = DeviceFlow::new(reqwest::Client::new(), auth_config(&server));
		let authorization = DeviceAuthorization {
			device_code: "dc-1".into(),
			user_code: "WXYZ-1234".into(),
			verification_uri: "https://id.example.com/activate".into(),
			verification_uri_complete: None,
			expires_in: 60,
			interval: Some(0),
		};
		let mut ticks = 0;
		let token = flow
			.wait_for_token(&authorization, || ticks += 1)
			.await
			.unwrap();
		assert_eq!(token.expose(), "tok-1");
		assert_eq!(ticks, 1);
	}

	#[tokio::test]
	async fn start_failure_is_an_api_error() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/oauth/device/code"))
			.respond_with(ResponseTemplate::new(401).set_body_string("unauthorized client"))
			.mount(&server)
			.await;

		let flow = DeviceFlow::new(reqwest::Client::new(), auth_config(&server));
		let err = flow.start().await.unwrap_err();
		assert!(matches!(err, CliError::Api { status: 401, .. }));
	}
}
