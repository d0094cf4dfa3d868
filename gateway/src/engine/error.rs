/// Fatal and per-connection errors from the TCP engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to bind tcp engine listener on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
}
