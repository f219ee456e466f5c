use bytes::Bytes;
use tokio::task::JoinSet;

use crate::logger::Logger;
use crate::server::registry::{Client, Registry};

/// Who a chat message goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The connection registered under this handle, if any.
    Unicast(String),
    /// Every registered connection, the sender included.
    Broadcast,
}

/// The line recipients see, newline-terminated.
pub fn format_message(sender: &str, body: &str, delivery: &Delivery) -> String {
    match delivery {
        Delivery::Unicast(_) => format!("{}: {}\n", sender, body),
        Delivery::Broadcast => format!("[All] {}: {}\n", sender, body),
    }
}

/// Write one chat line to the resolved recipients. Returns how many writes succeeded.
///
/// Targets are resolved from a registry snapshot; the writes run outside the
/// registry lock, one task per recipient, so a slow or dead peer cannot hold up
/// the others. A failed write is logged and does not affect the rest.
/// A client that disconnects after the snapshot may still be written to.
pub async fn deliver(
    registry: &Registry,
    sender: &str,
    body: &str,
    delivery: &Delivery,
    logger: &Logger,
) -> usize {
    let targets: Vec<Client> = match delivery {
        Delivery::Unicast(handle) => registry
            .find_connection_by_handle(handle)
            .await
            .into_iter()
            .collect(),
        Delivery::Broadcast => registry.registered_clients().await,
    };

    if targets.is_empty() {
        logger.debug(&format!("📭 No recipients for message from {}", sender));
        return 0;
    }

    let line = Bytes::from(format_message(sender, body, delivery));

    let mut writes = JoinSet::new();
    for client in targets {
        let buf = line.clone();
        let log = logger.clone();
        writes.spawn(async move {
            match client.send(&buf).await {
                Ok(()) => true,
                Err(e) => {
                    log.warn(&format!("❌ Failed to send to client {}: {}", client.addr, e));
                    false
                }
            }
        });
    }

    let mut delivered = 0;
    while let Some(result) = writes.join_next().await {
        match result {
            Ok(true) => delivered += 1,
            Ok(false) => {}
            Err(e) => logger.error(&format!("Fan-out task failed: {}", e)),
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::tcp::OwnedReadHalf;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    #[test]
    fn unicast_and_broadcast_formats() {
        assert_eq!(
            format_message("alice", "hello", &Delivery::Unicast("bob".into())),
            "alice: hello\n"
        );
        assert_eq!(format_message("alice", "hi", &Delivery::Broadcast), "[All] alice: hi\n");
    }

    /// Connected socket pairs: the server side wrapped as a `Client`, and the peer.
    async fn pair(listener: &TcpListener) -> (Client, OwnedReadHalf, TcpStream) {
        let peer = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server_side, addr) = listener.accept().await.unwrap();
        let (read_half, write_half) = server_side.into_split();
        (Client::new(addr, write_half), read_half, peer)
    }

    #[tokio::test]
    async fn broken_recipient_does_not_stop_the_broadcast() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let registry = Registry::new();
        let logger = Logger;

        let (alice, _alice_read, mut alice_peer) = pair(&listener).await;
        let (bob, _bob_read, _bob_peer) = pair(&listener).await;
        let (carol, _carol_read, mut carol_peer) = pair(&listener).await;
        for (client, handle) in [(&alice, "alice"), (&bob, "bob"), (&carol, "carol")] {
            registry.track(client.clone()).await;
            registry.register(client.addr, handle).await.unwrap();
        }

        // bob's write side is shut down, so every write to him fails
        bob.writer.lock().await.shutdown().await.unwrap();

        let delivered = deliver(&registry, "alice", "hi", &Delivery::Broadcast, &logger).await;
        assert_eq!(delivered, 2);

        let expected = b"[All] alice: hi\n";
        for peer in [&mut alice_peer, &mut carol_peer] {
            let mut buf = vec![0u8; expected.len()];
            timeout(Duration::from_secs(5), peer.read_exact(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(&buf[..], &expected[..]);
        }
    }

    #[tokio::test]
    async fn nothing_to_deliver_without_connections() {
        let registry = Registry::new();
        let logger = Logger;
        assert_eq!(
            deliver(&registry, "alice", "hi", &Delivery::Unicast("bob".into()), &logger).await,
            0
        );
        assert_eq!(deliver(&registry, "alice", "hi", &Delivery::Broadcast, &logger).await, 0);
    }
}
