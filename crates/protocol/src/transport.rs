//! Ordered duplex byte channels carrying one JSON frame per line.

use std::collections::HashMap;
use std::process::Stdio;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

use crate::error::{Error, Result};

/// Maximum frame size (1MB).
/// Sized for large tool outputs (file reads, search results).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

const DUPLEX_BUFFER: usize = 64 * 1024;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Configuration for a peer process spoken to over its stdio.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

/// Reading half: yields one decoded JSON frame per line.
pub struct FrameReader {
    inner: BufReader<BoxedReader>,
    max_frame: usize,
    line: String,
}

impl FrameReader {
    /// Next frame, or `None` once the remote closed its side.
    ///
    /// Blank lines are skipped. A line that is not valid JSON yields
    /// [`Error::Serialize`]; the reader stays usable afterwards.
    pub async fn next_frame(&mut self) -> Result<Option<Value>> {
        loop {
            self.line.clear();
            let bytes_read = self.inner.read_line(&mut self.line).await?;
            if bytes_read == 0 {
                return Ok(None);
            }

            if self.line.len() > self.max_frame {
                return Err(Error::FrameTooLarge {
                    size: self.line.len(),
                    max: self.max_frame,
                });
            }

            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }

            return Ok(Some(serde_json::from_str(trimmed)?));
        }
    }
}

/// Writing half.
pub struct FrameWriter {
    inner: BoxedWriter,
}

impl FrameWriter {
    pub async fn send<T: Serialize>(&mut self, frame: &T) -> Result<()> {
        let line = serde_json::to_string(frame)?;
        self.send_line(&line).await
    }

    /// Write an already-encoded frame. `line` must not contain newlines.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.write_all(b"\n").await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// A bidirectional channel to one remote party.
pub struct Transport {
    reader: FrameReader,
    writer: FrameWriter,
    child: Option<Child>,
}

impl Transport {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: FrameReader {
                inner: BufReader::new(Box::new(reader)),
                max_frame: MAX_FRAME_SIZE,
                line: String::new(),
            },
            writer: FrameWriter {
                inner: Box::new(writer),
            },
            child: None,
        }
    }

    /// This process's own stdin/stdout.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Two connected in-memory endpoints.
    pub fn pair() -> (Self, Self) {
        let (left, right) = tokio::io::duplex(DUPLEX_BUFFER);
        let (left_read, left_write) = tokio::io::split(left);
        let (right_read, right_write) = tokio::io::split(right);
        (
            Self::new(left_read, left_write),
            Self::new(right_read, right_write),
        )
    }

    /// Spawn a peer process and speak to it over its stdio.
    ///
    /// The child is killed when the transport (or the router owning it) is
    /// dropped.
    pub fn spawn(config: &ProcessConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut process = cmd.spawn()?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| Error::Transport(std::io::Error::other("failed to capture stdin")))?;

        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| Error::Transport(std::io::Error::other("failed to capture stdout")))?;

        let mut transport = Self::new(stdout, stdin);
        transport.child = Some(process);
        Ok(transport)
    }

    pub fn with_max_frame(mut self, max: usize) -> Self {
        self.reader.max_frame = max;
        self
    }

    pub fn into_parts(self) -> (FrameReader, FrameWriter, Option<Child>) {
        (self.reader, self.writer, self.child)
    }
}
