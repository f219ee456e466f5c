//! Programmatic peer for the file exchange protocol.
//!
//! The protocol is lockstep: every method sends one command and waits for its
//! reply before returning, so calls on one client must not be interleaved.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time;

use crate::error::ExchangeError;
use crate::server::codec::{self, FrameReader, NOT_FOUND_REPLY};

pub struct ExchangeClient {
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    chunk_size: usize,
    // how long an empty reply (e.g. `/dir` on an empty store) is waited for
    quiet_timeout: Duration,
}

impl ExchangeClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: FrameReader::new(reader, 4096),
            writer,
            chunk_size: 1024,
            quiet_timeout: Duration::from_millis(500),
        })
    }

    pub fn with_quiet_timeout(mut self, timeout: Duration) -> Self {
        self.quiet_timeout = timeout;
        self
    }

    /// Send `line` followed by a newline.
    pub async fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(format!("{}\n", line).as_bytes()).await?;
        self.writer.flush().await
    }

    /// Send raw bytes as a single write.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }

    /// One reply: whatever is buffered, or the next read.
    pub async fn read_reply(&mut self) -> Result<String, ExchangeError> {
        self.reader
            .read_text()
            .await?
            .ok_or(ExchangeError::ConnectionClosed)
    }

    /// Next newline-terminated chat line, without the newline.
    pub async fn read_line(&mut self) -> Result<String, ExchangeError> {
        self.reader
            .read_line()
            .await?
            .ok_or(ExchangeError::ConnectionClosed)
    }

    pub async fn register(&mut self, handle: &str) -> Result<String, ExchangeError> {
        self.send_line(&format!("/register {}", handle)).await?;
        self.read_reply().await
    }

    /// Upload `bytes` under `name`. The sentinel goes out as its own write.
    pub async fn store(&mut self, name: &str, bytes: &[u8]) -> Result<String, ExchangeError> {
        self.send_line(&format!("/store {}", name)).await?;
        codec::send_payload(&mut self.writer, bytes, self.chunk_size).await?;
        self.read_reply().await
    }

    /// Download `name`; `None` when the server answers `File not found`.
    ///
    /// A file whose entire content is the text `File not found` cannot be told
    /// apart from a missing one.
    pub async fn get(&mut self, name: &str) -> Result<Option<Bytes>, ExchangeError> {
        self.send_line(&format!("/get {}", name)).await?;
        if self.reader.buffered_equals(NOT_FOUND_REPLY).await? {
            self.reader.consume(NOT_FOUND_REPLY.len());
            return Ok(None);
        }
        self.reader.receive_payload().await.map(Some)
    }

    /// Stored file names. An empty store sends no bytes at all, so silence for
    /// the quiet timeout means an empty listing.
    pub async fn dir(&mut self) -> Result<Vec<String>, ExchangeError> {
        self.send_line("/dir").await?;
        let text = match time::timeout(self.quiet_timeout, self.read_reply()).await {
            Ok(reply) => reply?,
            Err(_) => String::new(),
        };
        Ok(text
            .split('\n')
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Private message; returns the server's echo line.
    pub async fn msg(&mut self, to: &str, text: &str) -> Result<String, ExchangeError> {
        self.send_line(&format!("/msg {} {}", to, text)).await?;
        self.read_line().await
    }

    /// Broadcast; returns the copy delivered back to this client.
    pub async fn all(&mut self, text: &str) -> Result<String, ExchangeError> {
        self.send_line(&format!("/all {}", text)).await?;
        self.read_line().await
    }

    /// Ask the server to stop; returns the shutdown notice.
    pub async fn shutdown(&mut self) -> Result<String, ExchangeError> {
        self.send_line("/shutdown").await?;
        self.read_reply().await
    }

    /// Tell the server we are leaving and close our side.
    pub async fn leave(mut self) -> io::Result<()> {
        self.send_line("/leave").await?;
        self.writer.shutdown().await
    }
}
