//! Line-delimited JSON client for the cgminer-style miner API.
//!
//! Every [`ProtocolClient::query`] opens a fresh TCP connection, sends one
//! `{"command": "<name>"}` line and reads until the accumulated bytes form a
//! complete JSON value. Several firmwares close the socket after answering a
//! single command, so connections are never reused.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

use minersight_common::{Address, ErrorType};

use crate::parser::{self, CommandStatus};

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default read buffer size.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Responses larger than this are rejected as malformed.
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// API commands issued by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Summary,
    Stats,
    Pools,
    Devs,
}

impl Command {
    /// All supported commands.
    pub const ALL: [Command; 4] = [Command::Summary, Command::Stats, Command::Pools, Command::Devs];

    /// Command name on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Summary => "summary",
            Command::Stats => "stats",
            Command::Pools => "pools",
            Command::Devs => "devs",
        }
    }

    /// Top-level key the response payload is stored under.
    pub fn category(&self) -> &'static str {
        match self {
            Command::Summary => "SUMMARY",
            Command::Stats => "STATS",
            Command::Pools => "POOLS",
            Command::Devs => "DEVS",
        }
    }

    /// Encode the request line for this command.
    pub fn request_line(&self) -> Vec<u8> {
        format!("{{\"command\": \"{}\"}}\n", self.as_str()).into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unsupported command name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown command '{0}' (expected summary, stats, pools or devs)")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

/// Phase of an exchange that ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    Connect,
    Read,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutPhase::Connect => f.write_str("connect"),
            TimeoutPhase::Read => f.write_str("read"),
        }
    }
}

/// Error type for a single request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("connection refused")]
    ConnectionRefused,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("{0} timeout after {1:?}")]
    Timeout(TimeoutPhase, Duration),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl QueryError {
    /// Classification used in failure reports and health tracking.
    pub fn error_type(&self) -> ErrorType {
        match self {
            QueryError::ConnectionRefused => ErrorType::ConnectionRefused,
            QueryError::Connection(_) => ErrorType::ConnectionReset,
            QueryError::Timeout(..) => ErrorType::Timeout,
            QueryError::MalformedResponse(_) => ErrorType::ParseError,
        }
    }
}

/// A decoded response to one command.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    command: Command,
    payload: Value,
}

impl Response {
    pub fn new(command: Command, payload: Value) -> Self {
        Self { command, payload }
    }

    /// Command this response answers.
    pub fn command(&self) -> Command {
        self.command
    }

    /// Decoded JSON payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }

    /// The `STATUS` block, if the device sent one.
    pub fn status(&self) -> Option<CommandStatus> {
        parser::command_status(&self.payload)
    }

    /// Whether the device explicitly refused this command.
    pub fn is_refused(&self) -> bool {
        self.status().is_some_and(|s| s.is_refusal())
    }
}

/// Client issuing one command per TCP connection.
#[derive(Debug, Clone)]
pub struct ProtocolClient {
    connect_timeout: Duration,
    read_timeout: Duration,
    chunk_size: usize,
    max_response_bytes: usize,
}

impl Default for ProtocolClient {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

enum ParseAttempt {
    Complete(Value),
    Incomplete,
    Invalid(String),
}

impl ProtocolClient {
    /// Create a client. The read timeout defaults to twice the connect timeout.
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout: connect_timeout * 2,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }

    /// Override the read timeout.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Override the read chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Override the response size limit.
    pub fn with_max_response_bytes(mut self, max: usize) -> Self {
        self.max_response_bytes = max;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Check that the endpoint accepts TCP connections.
    pub async fn probe(&self, address: &Address) -> Result<(), QueryError> {
        let stream = self.connect(address).await?;
        drop(stream);
        Ok(())
    }

    /// Execute one command against a device.
    pub async fn query(&self, address: &Address, command: Command) -> Result<Response, QueryError> {
        let mut stream = self.connect(address).await?;

        // Writing counts against the read budget: a device that stops
        // draining its socket is as stuck as one that stops answering.
        let deadline = Instant::now() + self.read_timeout;

        match tokio::time::timeout_at(deadline, stream.write_all(&command.request_line())).await {
            Err(_) => return Err(QueryError::Timeout(TimeoutPhase::Read, self.read_timeout)),
            Ok(Err(e)) => return Err(QueryError::Connection(format!("write failed: {}", e))),
            Ok(Ok(())) => {}
        }

        let payload = self.read_response(&mut stream, deadline).await?;

        tracing::trace!(device = %address, command = %command, "Received response");

        // Best effort; the socket is closed on drop either way.
        let _ = stream.shutdown().await;

        Ok(Response::new(command, payload))
    }

    async fn connect(&self, address: &Address) -> Result<TcpStream, QueryError> {
        let connect = TcpStream::connect((address.host.as_str(), address.port));

        match tokio::time::timeout(self.connect_timeout, connect).await {
            Err(_) => Err(QueryError::Timeout(
                TimeoutPhase::Connect,
                self.connect_timeout,
            )),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                Err(QueryError::ConnectionRefused)
            }
            Ok(Err(e)) => Err(QueryError::Connection(e.to_string())),
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                Ok(stream)
            }
        }
    }

    async fn read_response(
        &self,
        stream: &mut TcpStream,
        deadline: Instant,
    ) -> Result<Value, QueryError> {
        let mut buffer = Vec::with_capacity(self.chunk_size);
        let mut chunk = vec![0u8; self.chunk_size];

        loop {
            let read = tokio::time::timeout_at(deadline, stream.read(&mut chunk)).await;

            match read {
                Err(_) => {
                    if buffer.is_empty() {
                        return Err(QueryError::Timeout(TimeoutPhase::Read, self.read_timeout));
                    }
                    // One last attempt with whatever arrived.
                    return match try_parse(&buffer) {
                        ParseAttempt::Complete(value) => Ok(value),
                        ParseAttempt::Incomplete => Err(QueryError::MalformedResponse(format!(
                            "incomplete JSON after {} bytes when the read timed out",
                            buffer.len()
                        ))),
                        ParseAttempt::Invalid(e) => Err(QueryError::MalformedResponse(e)),
                    };
                }
                Ok(Err(e)) => {
                    return Err(QueryError::Connection(format!("read failed: {}", e)));
                }
                Ok(Ok(0)) => {
                    if buffer.is_empty() {
                        return Err(QueryError::MalformedResponse(
                            "connection closed without a response".to_string(),
                        ));
                    }
                    return match try_parse(&buffer) {
                        ParseAttempt::Complete(value) => Ok(value),
                        ParseAttempt::Incomplete => Err(QueryError::MalformedResponse(format!(
                            "connection closed after {} bytes of incomplete JSON",
                            buffer.len()
                        ))),
                        ParseAttempt::Invalid(e) => Err(QueryError::MalformedResponse(e)),
                    };
                }
                Ok(Ok(n)) => {
                    buffer.extend_from_slice(&chunk[..n]);

                    match try_parse(&buffer) {
                        ParseAttempt::Complete(value) => return Ok(value),
                        ParseAttempt::Invalid(e) => return Err(QueryError::MalformedResponse(e)),
                        ParseAttempt::Incomplete => {}
                    }

                    if buffer.len() > self.max_response_bytes {
                        return Err(QueryError::MalformedResponse(format!(
                            "response exceeds {} bytes",
                            self.max_response_bytes
                        )));
                    }
                }
            }
        }
    }
}

/// Parse the first JSON value in `buffer`, ignoring anything after it.
///
/// Leading NUL bytes and whitespace are skipped; some firmwares pad or
/// terminate their replies with `\0`.
fn try_parse(buffer: &[u8]) -> ParseAttempt {
    let start = buffer
        .iter()
        .position(|b| *b != 0 && !b.is_ascii_whitespace())
        .unwrap_or(buffer.len());

    let mut values = serde_json::Deserializer::from_slice(&buffer[start..]).into_iter::<Value>();
    match values.next() {
        Some(Ok(value)) => ParseAttempt::Complete(value),
        Some(Err(e)) if e.is_eof() => ParseAttempt::Incomplete,
        Some(Err(e)) => ParseAttempt::Invalid(e.to_string()),
        None => ParseAttempt::Incomplete,
    }
}
