//! Wire framing.
//!
//! Two shapes share one byte stream: command lines, and raw file payloads
//! terminated by the literal sentinel `EOF`. The sentinel is not escaped, so a
//! payload that itself contains `EOF` is cut short at its first occurrence.

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ExchangeError;

/// End-of-payload marker.
pub const SENTINEL: &[u8] = b"EOF";

/// Reply sent instead of a payload when `/get` names a missing file.
pub const NOT_FOUND_REPLY: &[u8] = b"File not found";

/// === COMMANDS ===

/// One parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register(String),
    Store(String),
    Get(String),
    Dir,
    Msg { to: String, text: String },
    All(String),
    Shutdown,
    Leave,
}

impl Command {
    /// Parse a command line. Unknown keywords and missing arguments come back as
    /// errors whose text is the reply for the client.
    pub fn parse(line: &str) -> Result<Command, ExchangeError> {
        let line = line.trim();
        let (keyword, rest) = match line.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim()),
            None => (line, ""),
        };
        let first_arg = rest.split_whitespace().next();

        match keyword {
            "/register" => first_arg
                .map(|h| Command::Register(h.to_string()))
                .ok_or(ExchangeError::Usage("/register <handle>")),
            "/store" => first_arg
                .map(|f| Command::Store(f.to_string()))
                .ok_or(ExchangeError::Usage("/store <filename>")),
            "/get" => first_arg
                .map(|f| Command::Get(f.to_string()))
                .ok_or(ExchangeError::Usage("/get <filename>")),
            "/dir" => Ok(Command::Dir),
            "/msg" => match rest.split_once(char::is_whitespace) {
                Some((to, text)) if !text.trim().is_empty() => Ok(Command::Msg {
                    to: to.to_string(),
                    text: text.trim().to_string(),
                }),
                _ => Err(ExchangeError::Usage("/msg <handle> <message>")),
            },
            "/all" if !rest.is_empty() => Ok(Command::All(rest.to_string())),
            "/all" => Err(ExchangeError::Usage("/all <message>")),
            "/shutdown" => Ok(Command::Shutdown),
            "/leave" => Ok(Command::Leave),
            _ => Err(ExchangeError::UnknownCommand),
        }
    }

    /// Commands that only a registered session may run.
    pub fn requires_registration(&self) -> bool {
        !matches!(self, Command::Register(_) | Command::Leave)
    }

    /// File transfers from an unregistered session end the connection.
    pub fn closes_unregistered(&self) -> bool {
        matches!(self, Command::Store(_) | Command::Get(_))
    }
}

/// === READING ===

/// Owns the read half of a stream plus whatever has been read but not yet
/// consumed, so bytes that arrive together with a command (or after a
/// sentinel) are not lost.
pub struct FrameReader<R> {
    reader: R,
    buf: BytesMut,
    scratch: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// `read_size` bounds a single read, both for command lines and payload chunks.
    pub fn new(reader: R, read_size: usize) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(read_size),
            scratch: vec![0; read_size.max(1)],
        }
    }

    /// Bytes received but not yet handed out.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// One read from the stream appended to the buffer. Returns 0 at end of stream.
    async fn fill(&mut self) -> io::Result<usize> {
        let n = self.reader.read(&mut self.scratch).await?;
        self.buf.extend_from_slice(&self.scratch[..n]);
        Ok(n)
    }

    /// Next command line, or `None` once the peer has closed.
    ///
    /// At most one read is performed. If what is buffered holds a newline the
    /// command ends there and the remainder stays buffered; otherwise the whole
    /// read is the command.
    pub async fn read_command(&mut self) -> io::Result<Option<String>> {
        if self.buf.is_empty() && self.fill().await? == 0 {
            return Ok(None);
        }
        let line = match self.buf.iter().position(|&b| b == b'\n') {
            Some(i) => self.buf.split_to(i + 1),
            None => self.buf.split(),
        };
        Ok(Some(String::from_utf8_lossy(&line).trim().to_string()))
    }

    /// Everything buffered (or the next read, if nothing is) as text.
    pub async fn read_text(&mut self) -> io::Result<Option<String>> {
        if self.buf.is_empty() && self.fill().await? == 0 {
            return Ok(None);
        }
        let chunk = self.buf.split();
        Ok(Some(String::from_utf8_lossy(&chunk).into_owned()))
    }

    /// Next `\n`-terminated line without its terminator.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(i) = self.buf.iter().position(|&b| b == b'\n') {
                let line = self.buf.split_to(i + 1);
                let line = String::from_utf8_lossy(&line[..i]);
                return Ok(Some(line.trim_end_matches('\r').to_string()));
            }
            if self.fill().await? == 0 {
                return Ok(None);
            }
        }
    }

    /// Read until the buffer is no longer a strict prefix of `expected`.
    /// Returns true if the buffer then equals `expected` exactly.
    pub async fn buffered_equals(&mut self, expected: &[u8]) -> io::Result<bool> {
        while self.buf.len() < expected.len() && expected.starts_with(&self.buf) {
            if self.fill().await? == 0 {
                break;
            }
        }
        Ok(self.buf[..] == *expected)
    }

    /// Drop `n` buffered bytes.
    pub fn consume(&mut self, n: usize) {
        self.buf.advance(n.min(self.buf.len()));
    }

    /// Receive one file payload: everything up to the first sentinel.
    ///
    /// The sentinel may arrive on its own or glued to the last data chunk, and
    /// may be split across reads. Bytes after the sentinel stay buffered.
    pub async fn receive_payload(&mut self) -> Result<Bytes, ExchangeError> {
        let mut payload: Vec<u8> = Vec::new();
        self.receive_payload_into(&mut payload).await?;
        Ok(Bytes::from(payload))
    }

    /// Stream one payload into `sink` as it arrives. Returns the bytes written.
    ///
    /// Only the current read (plus a held-back sentinel prefix) is in memory.
    /// If `sink` fails the rest of the payload is still drained up to the
    /// sentinel before the failure is returned as `Storage`, so the next read
    /// starts at the next command.
    pub async fn receive_payload_into<W>(&mut self, sink: &mut W) -> Result<u64, ExchangeError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0u64;
        let mut sink_error: Option<io::Error> = None;
        loop {
            let (chunk, done) = match find_sentinel(&self.buf) {
                Some(i) => {
                    let chunk = self.buf.split_to(i);
                    self.buf.advance(SENTINEL.len());
                    (chunk, true)
                }
                None => {
                    // Hold back a tail that could be the start of a split sentinel.
                    let flush = self.buf.len() - sentinel_prefix_len(&self.buf);
                    (self.buf.split_to(flush), false)
                }
            };

            if !chunk.is_empty() && sink_error.is_none() {
                match sink.write_all(&chunk).await {
                    Ok(()) => written += chunk.len() as u64,
                    Err(e) => sink_error = Some(e),
                }
            }

            if done {
                if sink_error.is_none() {
                    sink_error = sink.flush().await.err();
                }
                return match sink_error {
                    Some(e) => Err(ExchangeError::Storage(e)),
                    None => Ok(written),
                };
            }

            if self.fill().await? == 0 {
                return Err(ExchangeError::ConnectionClosed);
            }
        }
    }
}

fn find_sentinel(buf: &[u8]) -> Option<usize> {
    buf.windows(SENTINEL.len()).position(|w| w == SENTINEL)
}

/// Length of the longest proper prefix of the sentinel that `buf` ends with.
fn sentinel_prefix_len(buf: &[u8]) -> usize {
    (1..SENTINEL.len())
        .rev()
        .find(|&k| buf.ends_with(&SENTINEL[..k]))
        .unwrap_or(0)
}

/// === WRITING ===

/// Stream `payload` in `chunk_size` writes, then the sentinel as its own write.
pub async fn send_payload<W>(writer: &mut W, payload: &[u8], chunk_size: usize) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for chunk in payload.chunks(chunk_size.max(1)) {
        writer.write_all(chunk).await?;
    }
    writer.write_all(SENTINEL).await?;
    writer.flush().await
}
