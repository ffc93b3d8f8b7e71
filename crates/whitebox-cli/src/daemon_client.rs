// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client for the privileged tunnel daemon: one newline-delimited JSON
//! request per TCP connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, instrument};
use whitebox_common::protocol::{
	ConfigureResult, DisconnectResult, Request, Response, StatusResult, DISCONNECT_DONE,
	MAX_LINE_BYTES, METHOD_CONFIGURE, METHOD_DISCONNECT, METHOD_STATUS,
};
use whitebox_common::{DisconnectRequest, SessionConfig, WgPublicKey};
use zeroize::Zeroizing;

use crate::error::{CliError, Result};

/// Operations the client needs from the daemon.
#[async_trait]
pub trait TunnelDaemon: Send + Sync {
	/// Returns the server public key the daemon installed.
	async fn configure(&self, config: &SessionConfig) -> Result<WgPublicKey>;
	async fn disconnect(&self, request: &DisconnectRequest) -> Result<()>;
	async fn status(&self) -> Result<StatusResult>;
}

pub struct DaemonClient {
	addr: SocketAddr,
	timeout: Duration,
	next_id: AtomicU64,
}

impl DaemonClient {
	pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
		Self {
			addr,
			timeout,
			next_id: AtomicU64::new(1),
		}
	}

	async fn call<P: Serialize, T: DeserializeOwned>(&self, method: &str, params: P) -> Result<T> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let request = Request::new(id, method, params)?;

		let exchange = async {
			let stream = TcpStream::connect(self.addr)
				.await
				.map_err(|source| CliError::DaemonUnavailable {
					addr: self.addr.to_string(),
					source,
				})?;
			exchange(stream, &request).await
		};

		let result = tokio::time::timeout(self.timeout, exchange)
			.await
			.map_err(|_| CliError::DaemonTimeout(self.timeout.as_secs()))??;
		Ok(serde_json::from_value(result)?)
	}
}

/// Writes `request` as one line and reads back the matching response.
pub async fn exchange<S>(stream: S, request: &Request) -> Result<Value>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	let mut line = Zeroizing::new(serde_json::to_string(request)?);
	line.push('\n');

	let mut reader = BufReader::new(stream);
	reader.get_mut().write_all(line.as_bytes()).await?;
	reader.get_mut().flush().await?;

	let mut reply = String::new();
	let read = (&mut reader)
		.take(MAX_LINE_BYTES as u64 + 1)
		.read_line(&mut reply)
		.await?;
	if read == 0 {
		return Err(CliError::Protocol(
			"daemon closed the connection without answering".into(),
		));
	}
	if !reply.ends_with('\n') && read > MAX_LINE_BYTES {
		return Err(CliError::Protocol("daemon response exceeds line limit".into()));
	}

	let response: Response = serde_json::from_str(reply.trim_end())
		.map_err(|e| CliError::Protocol(format!("malformed daemon response: {e}")))?;
	if response.id() != request.id {
		return Err(CliError::Protocol(format!(
			"response id {} does not match request id {}",
			response.id(),
			request.id
		)));
	}

	match response {
		Response::Success(success) => Ok(success.result),
		Response::Error(error) => Err(CliError::Daemon {
			code: error.error.code,
			message: error.error.message,
		}),
	}
}

#[async_trait]
impl TunnelDaemon for DaemonClient {
	#[instrument(skip(self, config), fields(daemon = %self.addr, endpoint = %config.endpoint()))]
	async fn configure(&self, config: &SessionConfig) -> Result<WgPublicKey> {
		let result: ConfigureResult = self.call(METHOD_CONFIGURE, config).await?;
		debug!("daemon configured tunnel");
		Ok(result.server_public_key)
	}

	#[instrument(skip(self), fields(daemon = %self.addr))]
	async fn disconnect(&self, request: &DisconnectRequest) -> Result<()> {
		let result: DisconnectResult = self.call(METHOD_DISCONNECT, request).await?;
		if result.status != DISCONNECT_DONE {
			return Err(CliError::Protocol(format!(
				"unexpected disconnect status {:?}",
				result.status
			)));
		}
		Ok(())
	}

	#[instrument(skip(self), fields(daemon = %self.addr))]
	async fn status(&self) -> Result<StatusResult> {
		self.call(METHOD_STATUS, serde_json::json!({})).await
	}
}
