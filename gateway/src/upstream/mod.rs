mod error;

pub use error::UpstreamError;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use spdlog::prelude::{debug, error, info, warn};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex as TokioMutex;
use tokio::time::timeout;

use protocol::{decode, encode, Decoded, Packet};

const WRITE_DEADLINE: Duration = Duration::from_secs(5);
const READ_DEADLINE: Duration = Duration::from_secs(60);

/// Narrow interface the upstream reader uses to hand an inbound
/// `RESPONSE_MESSAGE` back to the session manager, without owning a pointer
/// into it.
pub trait Router: Send + Sync {
    fn route_response(&self, user_id: &str, connection_id: u32, content: String);
}

/// Narrow interface the upstream reader uses to request that a gateway
/// session be torn down once its upstream link has died.
pub trait Signaler: Send + Sync {
    fn signal(&self, user_id: &str, connection_id: u32);
}

#[derive(Debug, Deserialize)]
struct ClientEnvelope {
    #[serde(rename = "type")]
    kind: String,
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SendMessagePayload {
    content: String,
}

/// One TCP connection to the engine, owned by exactly one gateway session.
pub struct UpstreamClient {
    write_half: TokioMutex<OwnedWriteHalf>,
    user_id: String,
    connection_id: u32,
}

impl UpstreamClient {
    /// Translates a raw client envelope (`{"type":...,"payload":...}`) into
    /// a `SEND_MESSAGE` packet and writes it upstream.
    pub async fn write_to_engine(&self, data: &[u8]) -> Result<(), UpstreamError> {
        let envelope: ClientEnvelope = serde_json::from_slice(data)?;
        match envelope.kind.as_str() {
            "send_message" => {
                let payload: SendMessagePayload = serde_json::from_value(envelope.payload)?;
                let packet = Packet::SendMessage {
                    connection_id: self.connection_id,
                    content: payload.content,
                };
                self.write_packet(&packet).await
            }
            other => Err(UpstreamError::UnknownEnvelopeType(other.to_string())),
        }
    }

    pub async fn announce_connect(&self) -> Result<(), UpstreamError> {
        self.write_packet(&Packet::Connect {
            connection_id: self.connection_id,
        })
        .await
    }

    pub async fn announce_disconnect(&self) -> Result<(), UpstreamError> {
        self.write_packet(&Packet::Disconnect {
            connection_id: self.connection_id,
        })
        .await
    }

    async fn write_packet(&self, packet: &Packet) -> Result<(), UpstreamError> {
        let mut write_half = self.write_half.lock().await;
        timeout(WRITE_DEADLINE, encode(packet, &mut *write_half))
            .await
            .map_err(|_| UpstreamError::WriteTimeout)??;
        Ok(())
    }
}

/// Dials the engine and spawns the upstream reader; holds the narrow
/// `Router`/`Signaler` surfaces back into the session manager so the
/// created client never needs an owning pointer to it.
pub struct UpstreamClientFactory {
    engine_addr: SocketAddr,
    router: Arc<dyn Router>,
    signal: Arc<dyn Signaler>,
}

impl UpstreamClientFactory {
    pub fn new(engine_addr: SocketAddr, router: Arc<dyn Router>, signal: Arc<dyn Signaler>) -> Self {
        UpstreamClientFactory {
            engine_addr,
            router,
            signal,
        }
    }

    pub async fn new_client(
        &self,
        user_id: String,
        connection_id: u32,
    ) -> Result<Arc<UpstreamClient>, UpstreamError> {
        let stream = TcpStream::connect(self.engine_addr)
            .await
            .map_err(|source| UpstreamError::Dial {
                addr: self.engine_addr,
                source,
            })?;
        let (read_half, write_half) = stream.into_split();

        info!(
            "upstream client dialed the engine: user_id={} connection_id={}",
            user_id, connection_id
        );

        let client = Arc::new(UpstreamClient {
            write_half: TokioMutex::new(write_half),
            user_id: user_id.clone(),
            connection_id,
        });

        let reader_client = client.clone();
        let router = self.router.clone();
        let signal = self.signal.clone();
        tokio::spawn(async move {
            read_from_engine(reader_client, read_half, router, signal, user_id, connection_id).await;
        });

        Ok(client)
    }
}

/// Dedicated task per upstream connection: decodes frames under a 60-second
/// read deadline, answers `PING` with `PONG` itself, and forwards
/// `RESPONSE_MESSAGE` through the router. On any exit path it signals the
/// session manager so the owning gateway session is torn down.
async fn read_from_engine(
    client: Arc<UpstreamClient>,
    mut read_half: OwnedReadHalf,
    router: Arc<dyn Router>,
    signal: Arc<dyn Signaler>,
    user_id: String,
    connection_id: u32,
) {
    loop {
        let decoded = match timeout(READ_DEADLINE, decode(&mut read_half)).await {
            Ok(Ok(decoded)) => decoded,
            Ok(Err(err)) => {
                warn!(
                    "upstream read error: user_id={} connection_id={} error={}",
                    user_id, connection_id, err
                );
                break;
            }
            Err(_) => {
                warn!(
                    "upstream read deadline elapsed: user_id={} connection_id={}",
                    user_id, connection_id
                );
                break;
            }
        };

        match decoded {
            Decoded::PeerClosed => {
                info!(
                    "engine closed the upstream connection: user_id={} connection_id={}",
                    user_id, connection_id
                );
                break;
            }
            Decoded::Packet(Packet::Ping) => {
                if let Err(err) = client.write_packet(&Packet::Pong).await {
                    error!("failed to reply with pong: {}", err);
                    break;
                }
            }
            Decoded::Packet(Packet::ResponseMessage {
                connection_id: recipient_id,
                content,
            }) => {
                router.route_response(&user_id, recipient_id, content);
            }
            Decoded::Packet(other) => {
                debug!("ignoring unexpected packet from engine: {:?}", other);
            }
        }
    }

    signal.signal(&user_id, connection_id);
}
