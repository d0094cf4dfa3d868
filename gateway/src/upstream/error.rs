/// Errors from the per-session upstream TCP client.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("failed to dial upstream engine at {addr}: {source}")]
    Dial {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("write to upstream engine timed out")]
    WriteTimeout,

    #[error("unrecognized client envelope type: {0}")]
    UnknownEnvelopeType(String),

    #[error("malformed client envelope: {0}")]
    MalformedEnvelope(#[from] serde_json::Error),

    #[error(transparent)]
    Protocol(#[from] protocol::ProtocolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
