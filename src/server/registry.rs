use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

use crate::error::ExchangeError;

/// Write half of a connection, shared between its handler and fan-out writers.
pub type Writer = Arc<Mutex<OwnedWriteHalf>>;

/// One live connection. Cloning is cheap (address + Arc).
#[derive(Clone, Debug)]
pub struct Client {
    pub addr: SocketAddr,
    pub writer: Writer,
}

impl Client {
    pub fn new(addr: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            addr,
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    /// Write `bytes` to this connection under its writer lock.
    pub async fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let mut w = self.writer.lock().await;
        w.write_all(bytes).await?;
        w.flush().await
    }
}

/// === HANDLES ===

/// Address → handle map with the uniqueness rule. Not synchronized on its own;
/// `Registry` keeps it behind its lock.
#[derive(Debug, Default)]
pub struct HandleTable {
    handles: HashMap<SocketAddr, String>,
}

impl HandleTable {
    /// Bind `handle` to `addr`, replacing any handle `addr` already had.
    ///
    /// Fails if another address holds `handle`; the error carries the first
    /// free `<handle>_N`.
    pub fn register(&mut self, addr: SocketAddr, handle: &str) -> Result<String, ExchangeError> {
        if let Some(holder) = self.find_by_handle(handle) {
            if holder != addr {
                return Err(ExchangeError::HandleTaken {
                    handle: handle.to_string(),
                    suggestion: self.suggest(handle),
                });
            }
        }
        self.handles.insert(addr, handle.to_string());
        Ok(format!("Client {} registered as {}", addr, handle))
    }

    /// Remove `addr`'s handle. Removing an absent entry is a no-op.
    pub fn unregister(&mut self, addr: &SocketAddr) -> Option<String> {
        self.handles.remove(addr)
    }

    pub fn lookup_handle(&self, addr: &SocketAddr) -> Option<&str> {
        self.handles.get(addr).map(String::as_str)
    }

    /// Linear scan for the address holding `handle`.
    pub fn find_by_handle(&self, handle: &str) -> Option<SocketAddr> {
        self.handles
            .iter()
            .find(|(_, h)| h.as_str() == handle)
            .map(|(addr, _)| *addr)
    }

    /// Smallest `<handle>_N` (N >= 1) nobody holds.
    pub fn suggest(&self, handle: &str) -> String {
        (1..)
            .map(|n| format!("{}_{}", handle, n))
            .find(|candidate| self.find_by_handle(candidate).is_none())
            .unwrap_or_else(|| handle.to_string())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SocketAddr, &String)> {
        self.handles.iter()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// === REGISTRY ===

#[derive(Debug, Default)]
struct RegistryState {
    // every live connection, registered or not
    clients: HashMap<SocketAddr, Client>,
    handles: HandleTable,
}

/// Process-wide view of who is connected and under which handle.
///
/// Connections and handles sit behind one lock, so a registration's
/// check-then-insert and a broadcast's target resolution each see one
/// consistent state.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    state: Arc<Mutex<RegistryState>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a freshly accepted connection.
    pub async fn track(&self, client: Client) {
        let mut state = self.state.lock().await;
        state.clients.insert(client.addr, client);
    }

    /// Forget a connection entirely. Returns the handle it was registered under.
    pub async fn remove(&self, addr: &SocketAddr) -> Option<String> {
        let mut state = self.state.lock().await;
        state.clients.remove(addr);
        state.handles.unregister(addr)
    }

    pub async fn register(&self, addr: SocketAddr, handle: &str) -> Result<String, ExchangeError> {
        self.state.lock().await.handles.register(addr, handle)
    }

    /// Handle registered for `addr`, if any.
    pub async fn lookup_handle(&self, addr: &SocketAddr) -> Option<String> {
        self.state
            .lock()
            .await
            .handles
            .lookup_handle(addr)
            .map(str::to_string)
    }

    /// Resolve a handle to its live connection, if both exist.
    pub async fn find_connection_by_handle(&self, handle: &str) -> Option<Client> {
        let state = self.state.lock().await;
        let addr = state.handles.find_by_handle(handle)?;
        state.clients.get(&addr).cloned()
    }

    /// Snapshot of every registered, still-connected client.
    pub async fn registered_clients(&self) -> Vec<Client> {
        let state = self.state.lock().await;
        state
            .handles
            .iter()
            .filter_map(|(addr, _)| state.clients.get(addr).cloned())
            .collect()
    }

    pub async fn registered_count(&self) -> usize {
        self.state.lock().await.handles.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.clients.len()
    }

    /// Sorted list of registered handles.
    pub async fn handles(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut handles: Vec<String> = state.handles.iter().map(|(_, h)| h.clone()).collect();
        handles.sort();
        handles
    }
}

/// Removes a connection from the registry when its handler ends.
///
/// The normal path calls `release`. If the handler task is aborted or panics
/// instead, `Drop` schedules the removal on the runtime.
pub struct ConnectionGuard {
    registry: Registry,
    addr: SocketAddr,
    armed: bool,
}

impl ConnectionGuard {
    pub fn new(registry: Registry, addr: SocketAddr) -> Self {
        Self {
            registry,
            addr,
            armed: true,
        }
    }

    pub async fn release(mut self) -> Option<String> {
        self.armed = false;
        self.registry.remove(&self.addr).await
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let registry = self.registry.clone();
            let addr = self.addr;
            handle.spawn(async move {
                registry.remove(&addr).await;
            });
        }
    }
}
