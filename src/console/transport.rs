//! Console Transport
//!
//! The registry talks to game servers through the [`ConsoleDialer`] seam.
//! A dialer opens an authenticated session and splits it into a reader,
//! owned by the connection's reader task, and a writer, used by command
//! callers one at a time.
//!
//! [`LineDialer`] is the bundled implementation: a newline-delimited text
//! console over TCP.
//!
//! ```text
//! client → AUTH <credential>      server → OK | <reason>
//! client → CMD <command>          server → RES <response>
//!                                 server → [channel] <text>   (channel output)
//!                                 server → <text>             (plain output)
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use super::error::{ConsoleError, ConsoleResult};

/// Where and how to reach a game-server console
#[derive(Clone, PartialEq, Eq)]
pub struct ConsoleTarget {
    pub address: String,
    pub port: u16,
    pub credential: String,
}

impl ConsoleTarget {
    pub fn new(address: impl Into<String>, port: u16, credential: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port,
            credential: credential.into(),
        }
    }

    /// `address:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Debug for ConsoleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleTarget")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("credential", &"<redacted>")
            .finish()
    }
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleFrame {
    /// Unsolicited console output
    Output {
        channel: Option<String>,
        message: String,
    },
    /// Response to the command in flight
    Response(String),
}

/// Read half of a console session
#[async_trait]
pub trait ConsoleReader: Send {
    /// Next frame, or `None` when the remote closed the session
    async fn next_frame(&mut self) -> ConsoleResult<Option<ConsoleFrame>>;
}

/// Write half of a console session
#[async_trait]
pub trait ConsoleWriter: Send {
    /// Send a command; the response arrives through the reader
    async fn send_command(&mut self, command: &str) -> ConsoleResult<()>;
}

/// An established, authenticated console session
pub struct ConsoleSession {
    pub reader: Box<dyn ConsoleReader>,
    pub writer: Box<dyn ConsoleWriter>,
}

/// Opens console sessions
#[async_trait]
pub trait ConsoleDialer: Send + Sync {
    async fn dial(&self, target: &ConsoleTarget) -> ConsoleResult<ConsoleSession>;
}

/// Newline-delimited text console over TCP
#[derive(Debug, Clone)]
pub struct LineDialer {
    max_line_length: usize,
}

impl LineDialer {
    pub fn new(max_line_length: usize) -> Self {
        Self { max_line_length }
    }
}

impl Default for LineDialer {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}

#[async_trait]
impl ConsoleDialer for LineDialer {
    async fn dial(&self, target: &ConsoleTarget) -> ConsoleResult<ConsoleSession> {
        let stream = TcpStream::connect((target.address.as_str(), target.port)).await?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();

        let mut reader = FramedRead::new(
            read,
            LinesCodec::new_with_max_length(self.max_line_length),
        );
        let mut writer = FramedWrite::new(write, LinesCodec::new());

        writer.send(format!("AUTH {}", target.credential)).await?;
        match reader.next().await {
            Some(Ok(line)) if line.trim() == "OK" => {}
            Some(Ok(line)) => return Err(ConsoleError::AuthFailed(line.trim().to_string())),
            Some(Err(e)) => return Err(e.into()),
            None => return Err(ConsoleError::Closed),
        }

        tracing::debug!(endpoint = %target.endpoint(), "Console session authenticated");

        Ok(ConsoleSession {
            reader: Box::new(LineReader { inner: reader }),
            writer: Box::new(LineWriter { inner: writer }),
        })
    }
}

struct LineReader {
    inner: FramedRead<OwnedReadHalf, LinesCodec>,
}

#[async_trait]
impl ConsoleReader for LineReader {
    async fn next_frame(&mut self) -> ConsoleResult<Option<ConsoleFrame>> {
        loop {
            match self.inner.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(line)) => {
                    if let Some(frame) = parse_line(&line) {
                        return Ok(Some(frame));
                    }
                }
            }
        }
    }
}

struct LineWriter {
    inner: FramedWrite<OwnedWriteHalf, LinesCodec>,
}

#[async_trait]
impl ConsoleWriter for LineWriter {
    async fn send_command(&mut self, command: &str) -> ConsoleResult<()> {
        // One command per line
        let command = command.replace(['\r', '\n'], " ");
        self.inner.send(format!("CMD {}", command)).await?;
        Ok(())
    }
}

/// Decode one console line; blank lines carry nothing
fn parse_line(line: &str) -> Option<ConsoleFrame> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return None;
    }

    if line == "RES" {
        return Some(ConsoleFrame::Response(String::new()));
    }
    if let Some(body) = line.strip_prefix("RES ") {
        return Some(ConsoleFrame::Response(body.to_string()));
    }

    if let Some(rest) = line.strip_prefix('[') {
        if let Some((channel, message)) = rest.split_once(']') {
            if !channel.is_empty() {
                return Some(ConsoleFrame::Output {
                    channel: Some(channel.to_string()),
                    message: message.trim_start().to_string(),
                });
            }
        }
    }

    Some(ConsoleFrame::Output {
        channel: None,
        message: line.to_string(),
    })
}
