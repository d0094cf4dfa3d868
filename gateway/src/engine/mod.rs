mod error;

pub use error::EngineError;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use spdlog::prelude::{debug, info, warn};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as TokioMutex;
use tokio::time::timeout;

use protocol::{decode, encode, Decoded, Packet};

const READ_DEADLINE: Duration = Duration::from_secs(60);
const WRITE_DEADLINE: Duration = Duration::from_secs(5);
const PING_PERIOD: Duration = Duration::from_secs(20);

type SharedWriteHalf = Arc<TokioMutex<OwnedWriteHalf>>;
type EngineRegistry = Arc<StdMutex<HashMap<u32, SharedWriteHalf>>>;

/// Server side of the upstream TCP link: tracks connected connection ids,
/// routes `SEND_MESSAGE` to a peer, and drives liveness pings.
///
/// Deliberately minimal — an id -> socket map plus a dispatch switch — so
/// richer routing (groups, presence) can be added later without touching
/// the gateway side.
pub struct Engine {
    listen_addr: SocketAddr,
}

impl Engine {
    pub fn new(listen_addr: SocketAddr) -> Engine {
        Engine { listen_addr }
    }

    pub async fn listen(self) -> Result<(), EngineError> {
        let listener =
            TcpListener::bind(self.listen_addr)
                .await
                .map_err(|source| EngineError::Bind {
                    addr: self.listen_addr,
                    source,
                })?;
        info!("tcp engine listening on {}", self.listen_addr);

        let registry: EngineRegistry = Arc::new(StdMutex::new(HashMap::new()));

        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!("failed to accept upstream connection: {}", err);
                    continue;
                }
            };
            debug!("accepted upstream connection from {}", peer_addr);
            let registry = registry.clone();
            tokio::spawn(async move {
                handle_connection(stream, registry).await;
            });
        }
    }
}

async fn handle_connection(stream: TcpStream, registry: EngineRegistry) {
    let (mut read_half, write_half) = stream.into_split();
    let write_half: SharedWriteHalf = Arc::new(TokioMutex::new(write_half));
    let mut owned_ids: Vec<u32> = Vec::new();

    let ping_write_half = write_half.clone();
    let ping_task = tokio::spawn(async move {
        ping_loop(ping_write_half).await;
    });

    loop {
        let decoded = match timeout(READ_DEADLINE, decode(&mut read_half)).await {
            Ok(Ok(decoded)) => decoded,
            Ok(Err(err)) => {
                warn!("upstream engine decode error: {}", err);
                break;
            }
            Err(_) => {
                warn!("upstream engine read deadline elapsed");
                break;
            }
        };

        match decoded {
            Decoded::PeerClosed => break,
            Decoded::Packet(Packet::Connect { connection_id }) => {
                registry.lock().unwrap().insert(connection_id, write_half.clone());
                owned_ids.push(connection_id);
                info!("engine registered connection_id={}", connection_id);
            }
            Decoded::Packet(Packet::Disconnect { connection_id }) => {
                remove_if_owned(&registry, connection_id, &write_half);
                owned_ids.retain(|id| *id != connection_id);
                info!("engine unregistered connection_id={}", connection_id);
            }
            Decoded::Packet(Packet::SendMessage { connection_id, content }) => {
                route_send_message(&registry, connection_id, content).await;
            }
            Decoded::Packet(Packet::Pong) => {}
            Decoded::Packet(other) => {
                debug!("engine ignoring unexpected packet from gateway: {:?}", other);
            }
        }
    }

    for id in owned_ids {
        remove_if_owned(&registry, id, &write_half);
    }
    ping_task.abort();
}

/// Removes `connection_id` only if it still maps to *this* connection's
/// write half — guards against a later, independent connection racing to
/// register the same id before this one's cleanup runs.
fn remove_if_owned(registry: &EngineRegistry, connection_id: u32, write_half: &SharedWriteHalf) {
    let mut registry = registry.lock().unwrap();
    if let Some(existing) = registry.get(&connection_id) {
        if Arc::ptr_eq(existing, write_half) {
            registry.remove(&connection_id);
        }
    }
}

/// Current routing policy: the "other" connection id in the registry.
/// Correct only for exactly two peers — see the design ledger for why a
/// production routing layer needs an explicit recipient field or directory.
async fn route_send_message(registry: &EngineRegistry, sender_id: u32, content: String) {
    let recipient = {
        let map = registry.lock().unwrap();
        map.iter()
            .find(|(id, _)| **id != sender_id)
            .map(|(id, write_half)| (*id, write_half.clone()))
    };

    let Some((recipient_id, write_half)) = recipient else {
        warn!("no recipient available for sender connection_id={}", sender_id);
        return;
    };

    let packet = Packet::ResponseMessage {
        connection_id: recipient_id,
        content,
    };

    let mut write_half = write_half.lock().await;
    match timeout(WRITE_DEADLINE, encode(&packet, &mut *write_half)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!("failed to route response to connection_id={}: {}", recipient_id, err),
        Err(_) => warn!("write deadline elapsed routing to connection_id={}", recipient_id),
    }
}

async fn ping_loop(write_half: SharedWriteHalf) {
    let mut ticker = tokio::time::interval(PING_PERIOD);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let mut write_half = write_half.lock().await;
        match timeout(WRITE_DEADLINE, encode(&Packet::Ping, &mut *write_half)).await {
            Ok(Ok(())) => {}
            _ => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    async fn connect_and_announce(addr: SocketAddr, connection_id: u32) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        encode(&Packet::Connect { connection_id }, &mut stream).await.unwrap();
        stream
    }

    #[tokio::test]
    async fn routes_send_message_between_two_peers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let engine = Engine::new(addr);
        tokio::spawn(async move {
            let _ = engine.listen().await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut peer_a = connect_and_announce(addr, 1).await;
        let mut peer_b = connect_and_announce(addr, 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        encode(
            &Packet::SendMessage {
                connection_id: 1,
                content: "hi".to_string(),
            },
            &mut peer_a,
        )
        .await
        .unwrap();

        let decoded = timeout(Duration::from_secs(2), decode(&mut peer_b)).await.unwrap().unwrap();
        match decoded {
            Decoded::Packet(Packet::ResponseMessage { connection_id, content }) => {
                assert_eq!(connection_id, 2);
                assert_eq!(content, "hi");
            }
            other => panic!("unexpected packet: {:?}", other),
        }
    }

    #[tokio::test]
    async fn disconnect_removes_only_that_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let engine = Engine::new(addr);
        tokio::spawn(async move {
            let _ = engine.listen().await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut peer_a = connect_and_announce(addr, 1).await;
        let _peer_b = connect_and_announce(addr, 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        encode(&Packet::Disconnect { connection_id: 1 }, &mut peer_a).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut peer_b = _peer_b;
        encode(
            &Packet::SendMessage {
                connection_id: 2,
                content: "anyone there?".to_string(),
            },
            &mut peer_b,
        )
        .await
        .unwrap();

        // connection 1 was removed by the DISCONNECT above, so there is no
        // surviving recipient left for peer_b's own message.
        let result = timeout(Duration::from_millis(200), decode(&mut peer_b)).await;
        assert!(result.is_err());
    }
}
