/// Reasons a session is torn down. Carried through the unregister/signal
/// channels and logged at the point of teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisterReason {
    ClientSideError,
    BufferFull,
    IdleTooLong,
}

impl UnregisterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnregisterReason::ClientSideError => "client side error",
            UnregisterReason::BufferFull => "buffer full",
            UnregisterReason::IdleTooLong => "idle for too long",
        }
    }
}

impl std::fmt::Display for UnregisterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors `SessionManager::send` can report synchronously to its caller.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no session found for user {user_id} connection {connection_id}")]
    NotFound { user_id: String, connection_id: u32 },
}
