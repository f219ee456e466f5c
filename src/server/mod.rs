/// === IMPORTS ===

// Standard library type for holding an IP address and port together.
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

// Tokio's TCP listener/socket and stream for incoming connections.
use tokio::net::{TcpListener, TcpSocket, TcpStream, lookup_host};

// broadcast carries the one-shot shutdown signal to every task.
use tokio::sync::broadcast;

// Handler tasks are kept in a JoinSet so shutdown can wait for them.
use tokio::task::JoinSet;
use tokio::time::{self, Duration};

/// === MODULES ===

// Wire framing: command lines and sentinel-terminated payloads.
pub mod codec;

// Who is connected and under which handle.
pub mod registry;

// Per-connection state machine and command dispatch.
pub mod session;

// Unicast/broadcast delivery of chat lines.
pub mod fanout;

use crate::config::ServerConfig;
use crate::error::ExchangeError;
use crate::logger::Logger;
use crate::store::FileStore;

use registry::{Client, ConnectionGuard, Registry};
use session::{Flow, Session};

/// Text every open connection gets when the server stops.
pub const SHUTDOWN_NOTICE: &str = "Server is shutting down.";

/// === SHUTDOWN ===

/// Cloneable trigger for whole-server shutdown.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    fn new() -> Self {
        let (tx, _) = broadcast::channel::<()>(1);
        Self { tx }
    }

    /// Stop accepting and tell every connection to close. Repeated calls are harmless.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }
}

/// === SERVER ===

/// Everything connection handlers share with the server. Cloning is cheap.
#[derive(Clone)]
pub struct ServerContext {
    pub registry: Registry,
    pub store: FileStore,
    pub shutdown: ShutdownHandle,
    pub config: Arc<ServerConfig>,
    pub logger: Logger,
}

/// A bound, not yet running server.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown_rx: broadcast::Receiver<()>,
    ctx: ServerContext,
}

impl Server {
    /// Resolve and bind the listening socket with the configured backlog, and
    /// open the storage directory.
    pub async fn bind(config: ServerConfig, logger: Logger) -> io::Result<Self> {
        let addr = lookup_host(config.bind_addr())
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("could not resolve {}", config.bind_addr()),
                )
            })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(config.backlog)?;
        let local_addr = listener.local_addr()?;

        let store = FileStore::open(&config.storage_dir).await?;
        let shutdown = ShutdownHandle::new();
        let shutdown_rx = shutdown.subscribe();

        logger.info(&format!(
            "🚀 File exchange server listening on {} (storage: {})",
            local_addr,
            store.root().display()
        ));

        Ok(Self {
            listener,
            local_addr,
            shutdown_rx,
            ctx: ServerContext {
                registry: Registry::new(),
                store,
                shutdown,
                config: Arc::new(config),
                logger,
            },
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> Registry {
        self.ctx.registry.clone()
    }

    pub fn store(&self) -> &FileStore {
        &self.ctx.store
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.ctx.shutdown.clone()
    }

    /// Accept connections until shutdown, then give handlers the grace period
    /// to finish and abort whatever is left.
    pub async fn run(self) {
        let Server {
            listener,
            mut shutdown_rx,
            ctx,
            ..
        } = self;
        let logger = &ctx.logger;

        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                // 1) New client arrives
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            handle_new_connection(stream, addr, &mut handlers, &ctx).await;
                        }
                        // Non-fatal (e.g. too many open files): warn and pause briefly
                        Err(e) => {
                            logger.warn(&format!("⚠️ Failed to accept connection: {}", e));
                            time::sleep(Duration::from_millis(ctx.config.accept_error_backoff_ms)).await;
                        }
                    }
                }

                // 2) Reap finished handlers so the set does not grow without bound
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        logger.error(&format!("Connection task failed: {}", e));
                    }
                }

                // 3) Shutdown from /shutdown or Ctrl+C
                _ = shutdown_rx.recv() => {
                    logger.info("🧹 Server received shutdown signal.");
                    break;
                }
            }
        }

        // No new connections from here on.
        drop(listener);

        let remaining = handlers.len();
        let drained = time::timeout(ctx.config.shutdown_grace(), async {
            while handlers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            logger.warn(&format!(
                "⏱️ {} of {} connection(s) still open after grace period; aborting",
                handlers.len(),
                remaining
            ));
            handlers.shutdown().await;
        }

        logger.info(&format!(
            "✅ Shutdown complete; {} connection(s) tracked",
            ctx.registry.connection_count().await
        ));
    }
}

/// Bind, install a Ctrl+C listener, and serve until shutdown.
pub async fn run_server(
    config: ServerConfig,
    logger: Logger,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let server = Server::bind(config, logger.clone()).await?;
    let ctrl_c_handle = spawn_shutdown_listener(server.shutdown_handle(), logger);

    server.run().await;

    ctrl_c_handle.abort();
    Ok(())
}

/// === CONNECTIONS ===

/// Track a new connection and spawn its handler.
async fn handle_new_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handlers: &mut JoinSet<()>,
    ctx: &ServerContext,
) {
    let logger = &ctx.logger;
    let registry = &ctx.registry;

    // Small replies should go out immediately
    if let Err(e) = stream.set_nodelay(true) {
        logger.warn(&format!("⚠️ Failed to set TCP_NODELAY for {}: {}", addr, e));
    }

    let (reader_half, writer_half) = stream.into_split();
    let client = Client::new(addr, writer_half);
    registry.track(client.clone()).await;

    let active = registry.connection_count().await;
    logger.info(&format!("🔌 {} connected. Active connections: {}", addr, active));

    // Subscribe before spawning so a shutdown sent right after is not missed
    let shutdown_rx = ctx.shutdown.subscribe();
    let session = Session::new(client, reader_half, ctx.clone());
    let guard = ConnectionGuard::new(registry.clone(), addr);
    let logger = logger.clone();

    handlers.spawn(async move {
        handle_connection(session, shutdown_rx, &logger).await;

        match guard.release().await {
            Some(handle) => logger.info(&format!("🧼 {} ({}) removed from registry", addr, handle)),
            None => logger.info(&format!("🧼 {} connection closed", addr)),
        }
    });
}

/// The per-connection loop: one command at a time until the peer leaves, the
/// transport fails, or the server shuts down.
///
/// Shutdown also interrupts a command in progress, such as an upload that is
/// still waiting for its sentinel, so every open connection gets the notice.
async fn handle_connection(
    mut session: Session,
    mut shutdown_rx: broadcast::Receiver<()>,
    logger: &Logger,
) {
    let addr = session.addr();

    loop {
        tokio::select! {
            step = session.step() => {
                match step {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Close) => {
                        logger.info(&format!("🚪 Closing {}", addr));
                        break;
                    }
                    Err(ExchangeError::ConnectionClosed) => {
                        logger.info(&format!("⚠️ {} disconnected gracefully.", addr));
                        break;
                    }
                    Err(e) => {
                        logger.warn(&format!("❌ {} dropped: {}", addr, e));
                        break;
                    }
                }
            }

            _ = shutdown_rx.recv() => {
                logger.warn(&format!("🛑 {} disconnected due to shutdown.", addr));
                let _ = session.reply(SHUTDOWN_NOTICE).await;
                break;
            }
        }
    }
}

/// Waits for Ctrl+C and triggers the same shutdown path as `/shutdown`.
fn spawn_shutdown_listener(shutdown: ShutdownHandle, logger: Logger) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            logger.error(&format!("Failed to listen for ctrl_c: {}", e));
            return;
        }
        logger.warn("🛑 Ctrl+C received, shutting down.");
        shutdown.trigger();
    })
}
