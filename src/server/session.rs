use std::net::SocketAddr;

use tokio::io;
use tokio::net::tcp::OwnedReadHalf;

use crate::error::ExchangeError;
use crate::server::ServerContext;
use crate::server::codec::{self, Command, FrameReader};
use crate::server::fanout::{self, Delivery};
use crate::server::registry::Client;

/// Registration state of one connection. `Closed` is the handler returning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unregistered,
    Registered { handle: String },
}

/// What the connection loop does after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Everything one connection handler needs. Owned by that handler alone.
pub struct Session {
    client: Client,
    reader: FrameReader<OwnedReadHalf>,
    state: SessionState,
    ctx: ServerContext,
}

impl Session {
    pub fn new(client: Client, reader_half: OwnedReadHalf, ctx: ServerContext) -> Self {
        let read_size = ctx.config.command_buffer_size.max(ctx.config.chunk_size);
        Self {
            client,
            reader: FrameReader::new(reader_half, read_size),
            state: SessionState::Unregistered,
            ctx,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.client.addr
    }

    fn handle(&self) -> Option<&str> {
        match &self.state {
            SessionState::Registered { handle } => Some(handle),
            SessionState::Unregistered => None,
        }
    }

    /// Read the next command and run it.
    ///
    /// A peer that has closed comes back as `ConnectionClosed`.
    pub async fn step(&mut self) -> Result<Flow, ExchangeError> {
        match self.reader.read_command().await? {
            Some(line) => self.handle_line(&line).await,
            None => Err(ExchangeError::ConnectionClosed),
        }
    }

    /// Write a reply to this connection.
    pub async fn reply(&self, text: &str) -> Result<(), ExchangeError> {
        self.client.send(text.as_bytes()).await?;
        Ok(())
    }

    /// Run one command line. Client-facing errors become replies; only
    /// transport failures come back as `Err`.
    async fn handle_line(&mut self, line: &str) -> Result<Flow, ExchangeError> {
        self.ctx.logger.debug(&format!("📨 From {}: {}", self.client.addr, line));

        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => {
                self.reply(&e.to_string()).await?;
                return Ok(Flow::Continue);
            }
        };

        if command.requires_registration() && self.handle().is_none() {
            self.ctx.logger.info(&format!(
                "🔒 {} tried {:?} before registering",
                self.client.addr, command
            ));
            self.reply(&ExchangeError::NotRegistered.to_string()).await?;
            return Ok(if command.closes_unregistered() {
                Flow::Close
            } else {
                Flow::Continue
            });
        }

        match self.execute(command).await {
            Ok(flow) => Ok(flow),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                self.reply(&e.to_string()).await?;
                Ok(Flow::Continue)
            }
        }
    }

    async fn execute(&mut self, command: Command) -> Result<Flow, ExchangeError> {
        match command {
            Command::Register(handle) => self.register(handle).await,
            Command::Store(name) => self.store_file(&name).await,
            Command::Get(name) => self.send_file(&name).await,
            Command::Dir => {
                let names = self.ctx.store.list().await?;
                self.reply(&names.join("\n")).await?;
                Ok(Flow::Continue)
            }
            Command::Msg { to, text } => self.message(to, &text).await,
            Command::All(text) => self.broadcast(&text).await,
            Command::Shutdown => {
                self.ctx.logger.warn(&format!(
                    "🛑 Shutdown requested by {} ({})",
                    self.handle().unwrap_or_default(),
                    self.client.addr
                ));
                self.ctx.shutdown.trigger();
                Ok(Flow::Continue)
            }
            Command::Leave => {
                self.ctx.logger.info(&format!("👋 {} left", self.client.addr));
                Ok(Flow::Close)
            }
        }
    }

    async fn register(&mut self, handle: String) -> Result<Flow, ExchangeError> {
        match self.ctx.registry.register(self.client.addr, &handle).await {
            Ok(confirmation) => {
                self.ctx.logger.info(&confirmation);
                self.state = SessionState::Registered { handle };
                self.reply(&confirmation).await?;
                Ok(Flow::Continue)
            }
            Err(e) => {
                self.ctx.logger.warn(&e.to_string());
                Err(e)
            }
        }
    }

    async fn store_file(&mut self, name: &str) -> Result<Flow, ExchangeError> {
        // The payload is drained to its sentinel even when the file cannot be
        // opened, so the stream stays in step.
        let received = match self.ctx.store.create(name).await {
            Ok(mut file) => self.reader.receive_payload_into(&mut file).await,
            Err(e) => {
                self.reader.receive_payload_into(&mut io::sink()).await?;
                Err(e)
            }
        };
        let size = received?;
        self.ctx.logger.info(&format!(
            "💾 Stored {} ({} bytes) from {}",
            name, size, self.client.addr
        ));
        self.reply("File stored successfully").await?;
        Ok(Flow::Continue)
    }

    async fn send_file(&mut self, name: &str) -> Result<Flow, ExchangeError> {
        match self.ctx.store.get(name).await? {
            Some(bytes) => {
                // Hold the writer for the whole payload so no chat line lands inside it.
                let mut w = self.client.writer.lock().await;
                codec::send_payload(&mut *w, &bytes, self.ctx.config.chunk_size).await?;
                self.ctx.logger.info(&format!(
                    "📤 Sent {} ({} bytes) to {}",
                    name,
                    bytes.len(),
                    self.client.addr
                ));
            }
            None => {
                self.ctx.logger.info(&format!("❔ {} asked for missing file {}", self.client.addr, name));
                return Err(ExchangeError::NotFound);
            }
        }
        Ok(Flow::Continue)
    }

    async fn message(&mut self, to: String, text: &str) -> Result<Flow, ExchangeError> {
        let sender = self.handle().unwrap_or_default().to_string();
        let delivered = fanout::deliver(
            &self.ctx.registry,
            &sender,
            text,
            &Delivery::Unicast(to.clone()),
            &self.ctx.logger,
        )
        .await;
        self.ctx.logger.debug(&format!("✉️ {} → {}: delivered {}", sender, to, delivered));
        self.reply(&format!("[To {}] {}: {}\n", to, sender, text)).await?;
        Ok(Flow::Continue)
    }

    async fn broadcast(&mut self, text: &str) -> Result<Flow, ExchangeError> {
        let sender = self.handle().unwrap_or_default().to_string();
        let delivered =
            fanout::deliver(&self.ctx.registry, &sender, text, &Delivery::Broadcast, &self.ctx.logger).await;
        self.ctx.logger.debug(&format!("📢 {} broadcast to {} clients", sender, delivered));
        Ok(Flow::Continue)
    }
}
