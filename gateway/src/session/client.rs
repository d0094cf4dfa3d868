use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use axum::extract::ws::Message;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use super::idle_list::IdleHandle;
use crate::upstream::UpstreamClient;

/// One upgraded WebSocket session plus the state the pumps and the reaper
/// share: a bounded outbound queue, a pacing/done signal, and a handle back
/// into the idle list so the session can detach itself without a scan.
///
/// `terminate` runs at most once — both the read pump (on its own error)
/// and the arbiter (on unregister/signal) may race to call it.
pub struct ClientSession {
    pub user_id: String,
    pub connection_id: u32,
    pub outbound_tx: mpsc::Sender<Message>,
    upstream: Mutex<Option<std::sync::Arc<UpstreamClient>>>,
    idle_handle: Mutex<Option<IdleHandle>>,
    pub last_active_at: Mutex<Instant>,
    is_active: AtomicBool,
    done: Notify,
    terminated: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Outbound queue capacity. A 257th enqueue with the queue full is the
/// observable backpressure-overflow trigger.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

impl ClientSession {
    pub fn new(
        user_id: String,
        connection_id: u32,
        outbound_tx: mpsc::Sender<Message>,
        upstream: std::sync::Arc<UpstreamClient>,
    ) -> std::sync::Arc<ClientSession> {
        std::sync::Arc::new(ClientSession {
            user_id,
            connection_id,
            outbound_tx,
            upstream: Mutex::new(Some(upstream)),
            idle_handle: Mutex::new(None),
            last_active_at: Mutex::new(Instant::now()),
            is_active: AtomicBool::new(false),
            done: Notify::new(),
            terminated: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    #[cfg(test)]
    pub fn new_for_test(user_id: String, connection_id: u32) -> std::sync::Arc<ClientSession> {
        let (outbound_tx, _outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        std::sync::Arc::new(ClientSession {
            user_id,
            connection_id,
            outbound_tx,
            upstream: Mutex::new(None),
            idle_handle: Mutex::new(None),
            last_active_at: Mutex::new(Instant::now()),
            is_active: AtomicBool::new(false),
            done: Notify::new(),
            terminated: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn upstream(&self) -> Option<std::sync::Arc<UpstreamClient>> {
        self.upstream.lock().unwrap().clone()
    }

    pub fn idle_handle(&self) -> Option<IdleHandle> {
        *self.idle_handle.lock().unwrap()
    }

    pub fn set_idle_handle(&self, handle: Option<IdleHandle>) {
        *self.idle_handle.lock().unwrap() = handle;
    }

    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.is_active.store(active, Ordering::SeqCst);
    }

    pub fn touch(&self) {
        *self.last_active_at.lock().unwrap() = Instant::now();
    }

    pub fn last_active_at(&self) -> Instant {
        *self.last_active_at.lock().unwrap()
    }

    /// Registers a pump/faucet task so `terminate` can abort it directly —
    /// the tokio substitute for closing a socket owned by another task.
    pub fn track_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().unwrap().push(handle);
    }

    pub fn done_signal(&self) -> &Notify {
        &self.done
    }

    /// Idempotent teardown: drops the outbound sender (closing the write
    /// pump's queue), wakes `done` (unblocking the pacing faucet), and
    /// aborts every tracked pump task. Guarded so only the first caller
    /// among the read pump and the arbiter actually runs this.
    pub fn terminate(&self) {
        if self
            .terminated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.done.notify_waiters();
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminate_is_idempotent() {
        let session = ClientSession::new_for_test("u".to_string(), 1);
        session.terminate();
        assert!(session.is_terminated());
        session.terminate();
        assert!(session.is_terminated());
    }

    #[test]
    fn idle_handle_round_trips() {
        let session = ClientSession::new_for_test("u".to_string(), 1);
        assert!(session.idle_handle().is_none());
        let handle = super::super::idle_list::IdleList::new().push_back(session.clone(), Instant::now());
        session.set_idle_handle(Some(handle));
        assert_eq!(session.idle_handle(), Some(handle));
        session.set_idle_handle(None);
        assert!(session.idle_handle().is_none());
    }
}
