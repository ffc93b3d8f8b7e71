use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};
use whitebox_common::protocol::{ErrorResponse, Request, MAX_LINE_BYTES, VALIDATION_ERROR};
use zeroize::Zeroizing;

use crate::handlers;
use crate::state::DaemonState;

enum Line {
    Eof,
    Request,
    TooLong,
}

/// Handle a single client connection
pub async fn handle_client<S>(stream: S, peer: String, state: Arc<DaemonState>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    info!("Client connected: {peer}");

    if let Err(e) = handle_client_inner(stream, &state).await {
        debug!("Client {peer} error: {e}");
    }

    info!("Client disconnected: {peer}");
}

async fn handle_client_inner<S>(stream: S, state: &DaemonState) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    // Configure requests carry a private key.
    let mut line = Zeroizing::new(Vec::new());

    loop {
        match read_line(&mut reader, &mut line).await? {
            Line::Eof => break,
            Line::TooLong => {
                warn!("Request exceeds {MAX_LINE_BYTES} bytes, closing connection");
                let resp = ErrorResponse::new(
                    0,
                    VALIDATION_ERROR,
                    format!("Request exceeds {MAX_LINE_BYTES} bytes"),
                );
                write_line(&mut writer, &handlers::encode(&resp)).await?;
                break;
            }
            Line::Request => {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                let response = process_request(&line, state).await;
                if let Err(e) = write_line(&mut writer, &response).await {
                    error!("Failed to write response: {e}");
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}

async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>) -> std::io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let read = (&mut *reader)
        .take(MAX_LINE_BYTES as u64 + 1)
        .read_until(b'\n', line)
        .await?;
    if read == 0 {
        return Ok(Line::Eof);
    }
    if read > MAX_LINE_BYTES && line.last() != Some(&b'\n') {
        return Ok(Line::TooLong);
    }
    Ok(Line::Request)
}

async fn write_line<W>(writer: &mut W, response: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut out = Vec::with_capacity(response.len() + 1);
    out.extend_from_slice(response.as_bytes());
    out.push(b'\n');
    writer.write_all(&out).await?;
    writer.flush().await
}

/// Process a single request and return JSON response
async fn process_request(line: &[u8], state: &DaemonState) -> String {
    let request: Request = match serde_json::from_slice(line) {
        Ok(r) => r,
        Err(e) => {
            let resp = ErrorResponse::new(0, VALIDATION_ERROR, format!("Invalid JSON: {e}"));
            return handlers::encode(&resp);
        }
    };

    handlers::dispatch(&request, state).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::io::{duplex, DuplexStream};
    use whitebox_netconf::{MemoryBackend, NetconfConfig, TunnelController};

    fn spawn_client() -> DuplexStream {
        let backend = Arc::new(MemoryBackend::new());
        let controller = TunnelController::new(backend, NetconfConfig::default());
        let state = Arc::new(DaemonState::new(controller));
        let (client, server) = duplex(256 * 1024);
        tokio::spawn(handle_client(server, "test".to_string(), state));
        client
    }

    async fn read_response(reader: &mut BufReader<DuplexStream>) -> Option<Value> {
        let mut line = String::new();
        let read = reader.read_line(&mut line).await.unwrap();
        if read == 0 {
            return None;
        }
        Some(serde_json::from_str(&line).unwrap())
    }

    #[tokio::test]
    async fn serves_several_requests_per_connection() {
        let mut client = BufReader::new(spawn_client());

        client
            .get_mut()
            .write_all(b"{\"id\":1,\"method\":\"status\",\"params\":{}}\n\n{\"id\":2,\"method\":\"status\"}\n")
            .await
            .unwrap();

        let first = read_response(&mut client).await.unwrap();
        assert_eq!(first["id"], 1);
        assert_eq!(first["result"]["state"], "absent");
        let second = read_response(&mut client).await.unwrap();
        assert_eq!(second["id"], 2);
    }

    #[tokio::test]
    async fn malformed_json_gets_id_zero() {
        let mut client = BufReader::new(spawn_client());
        client.get_mut().write_all(b"{not json\n").await.unwrap();

        let response = read_response(&mut client).await.unwrap();
        assert_eq!(response["id"], 0);
        assert_eq!(response["error"]["code"], VALIDATION_ERROR);

        client
            .get_mut()
            .write_all(b"{\"id\":3,\"method\":\"status\"}\n")
            .await
            .unwrap();
        assert_eq!(read_response(&mut client).await.unwrap()["id"], 3);
    }

    #[tokio::test]
    async fn invalid_utf8_is_malformed_json() {
        let mut client = BufReader::new(spawn_client());
        client.get_mut().write_all(b"\xff\xfe\n").await.unwrap();
        let response = read_response(&mut client).await.unwrap();
        assert_eq!(response["error"]["code"], VALIDATION_ERROR);
    }

    #[tokio::test]
    async fn oversized_line_closes_connection() {
        let mut client = BufReader::new(spawn_client());
        let mut payload = vec![b'a'; MAX_LINE_BYTES + 10];
        payload.push(b'\n');
        client.get_mut().write_all(&payload).await.unwrap();

        let response = read_response(&mut client).await.unwrap();
        assert_eq!(response["id"], 0);
        assert!(response["error"]["message"]
            .as_str()
            .unwrap()
            .contains("exceeds"));
        assert!(read_response(&mut client).await.is_none());
    }
}
