//! # Monitor Client
//!
//! A compact async facade over the monitor HTTP surface: health check,
//! log listing, and a live log-tail stream, used by `obs-server`'s
//! integration tests and by anything that wants to watch an observatory
//! process from the outside.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `MonitorClient` hides the HTTP/WebSocket
//!    details behind three narrow methods.
//! 2. **Fail Fast**: transport and protocol errors surface immediately
//!    as a flat `ClientError`, mirroring the facade's own error taxonomy.

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Result type for the monitor client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the monitor client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("server returned non-success status: {0}")]
    Server(reqwest::StatusCode),
    #[error("response body was not valid JSON: {0}")]
    Protocol(#[from] serde_json::Error),
}

/// Handle to a running observatory's monitor surface.
#[derive(Clone)]
pub struct MonitorClient {
    base_url: String,
    http: reqwest::Client,
}

impl MonitorClient {
    /// `base_url` is the server's HTTP origin, e.g. `http://127.0.0.1:9100`.
    pub fn new(base_url: impl Into<String>) -> Self {
        MonitorClient {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Calls `GET /heath` and returns whether the server answered `ok`.
    pub async fn health(&self) -> ClientResult<bool> {
        let response = self.http.get(format!("{}/heath", self.base_url)).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::Server(response.status()));
        }
        let body = response.text().await?;
        Ok(body == "ok")
    }

    /// Calls `GET /log/list` and returns the listed file names.
    pub async fn log_list(&self) -> ClientResult<Vec<String>> {
        let response = self.http.get(format!("{}/log/list", self.base_url)).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::Server(response.status()));
        }
        let names: Vec<String> = response.json().await?;
        Ok(names)
    }

    /// Opens `GET /log/data?file=<name>` and returns a handle yielding
    /// each appended line as it arrives.
    pub async fn tail(&self, file: &str) -> ClientResult<LogTailStream> {
        let ws_url = self
            .base_url
            .replacen("http://", "ws://", 1)
            .replacen("https://", "wss://", 1);
        let (socket, _response) =
            tokio_tungstenite::connect_async(format!("{ws_url}/log/data?file={file}")).await?;
        Ok(LogTailStream { socket })
    }
}

/// A live tail of one remote log file.
pub struct LogTailStream {
    socket: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

impl LogTailStream {
    /// Waits for the next text frame, answering pings transparently.
    /// Returns `None` once the server closes the stream.
    pub async fn next_line(&mut self) -> ClientResult<Option<String>> {
        loop {
            match self.socket.next().await {
                Some(Ok(WsMessage::Text(text))) => return Ok(Some(text)),
                Some(Ok(WsMessage::Ping(payload))) => {
                    self.socket.send(WsMessage::Pong(payload)).await?;
                }
                Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ClientError::WebSocket(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_messages_are_human_readable() {
        let err = ClientError::Server(reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().contains("500"));
    }
}
