use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures_util::StreamExt;
use spdlog::prelude::{error, info, warn};
use tokio::sync::mpsc;

use super::client::{ClientSession, OUTBOUND_QUEUE_CAPACITY};
use super::error::{SessionError, UnregisterReason};
use super::idle_list::IdleList;
use super::pumps;
use crate::config::Config;
use crate::upstream::{Router, Signaler, UpstreamClientFactory};

/// Pacing channel capacity: a bursty-but-bounded token bucket.
const PACING_CAPACITY: usize = 3;
/// Arbiter wake-channel capacity for reaper interval changes.
const REAPER_WAKE_CAPACITY: usize = 1;

struct UnregisterRequest {
    session: Arc<ClientSession>,
    reason: UnregisterReason,
}

struct SignalRequest {
    user_id: String,
    connection_id: u32,
}

enum TeardownTrigger {
    Unregister(UnregisterReason),
    Signal,
}

/// Owns the user -> sessions registry and the idle list, and arbitrates
/// every lifecycle transition through two unbounded channels consumed by a
/// single task, so registry writes are never scattered across locks.
pub struct SessionManager {
    registry: Mutex<HashMap<String, Vec<Arc<ClientSession>>>>,
    idle_list: Mutex<IdleList>,
    unregister_tx: mpsc::UnboundedSender<UnregisterRequest>,
    signal_tx: mpsc::UnboundedSender<SignalRequest>,
    upstream_factory: UpstreamClientFactory,
    max_idle_time: Mutex<Duration>,
    reaper_min_interval: Duration,
    reaper_wake_tx: Mutex<Option<mpsc::Sender<()>>>,
    reaper_running: AtomicBool,
}

/// Delegates `Router`/`Signaler` calls back into the manager through a weak
/// reference, so the upstream factory doesn't hold a strong cycle back to
/// the manager that owns it.
#[derive(Clone)]
struct SessionManagerHandle(Weak<SessionManager>);

impl Router for SessionManagerHandle {
    fn route_response(&self, user_id: &str, connection_id: u32, content: String) {
        if let Some(manager) = self.0.upgrade() {
            if let Err(err) = manager.try_send(user_id, connection_id, content) {
                warn!("routed message dropped: {}", err);
            }
        }
    }
}

impl Signaler for SessionManagerHandle {
    fn signal(&self, user_id: &str, connection_id: u32) {
        if let Some(manager) = self.0.upgrade() {
            manager.signal(user_id, connection_id);
        }
    }
}

impl SessionManager {
    pub fn new(config: &Config) -> Arc<SessionManager> {
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let max_idle_time = config.max_idle_time;
        let reaper_min_interval = config.reaper_min_interval;
        let tcp_server_addr = config.tcp_server_addr;

        let manager = Arc::new_cyclic(|weak: &Weak<SessionManager>| {
            let handle = SessionManagerHandle(weak.clone());
            let upstream_factory = UpstreamClientFactory::new(
                tcp_server_addr,
                Arc::new(handle.clone()),
                Arc::new(handle),
            );
            SessionManager {
                registry: Mutex::new(HashMap::new()),
                idle_list: Mutex::new(IdleList::new()),
                unregister_tx,
                signal_tx,
                upstream_factory,
                max_idle_time: Mutex::new(max_idle_time),
                reaper_min_interval,
                reaper_wake_tx: Mutex::new(None),
                reaper_running: AtomicBool::new(false),
            }
        });

        let arbiter_manager = manager.clone();
        tokio::spawn(async move {
            arbiter_manager.run_arbiter(unregister_rx, signal_rx).await;
        });

        manager
    }

    /// Upgrades `socket` into a registered session for `user_id`: dials the
    /// engine, announces CONNECT, registers the session, and spawns its
    /// read pump, write pump, and pacing faucet.
    pub async fn accept(self: &Arc<Self>, user_id: String, socket: WebSocket) {
        let connection_id = loop {
            let candidate: u32 = rand::random();
            if candidate != 0 {
                break candidate;
            }
        };

        let upstream = match self.upstream_factory.new_client(user_id.clone(), connection_id).await {
            Ok(upstream) => upstream,
            Err(err) => {
                error!(
                    "rejecting upgrade: could not create upstream client: user_id={} error={}",
                    user_id, err
                );
                return;
            }
        };

        let (ws_tx, ws_rx) = socket.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let session = ClientSession::new(user_id.clone(), connection_id, outbound_tx, upstream.clone());

        self.append_to_registry(session.clone());

        if let Err(err) = upstream.announce_connect().await {
            warn!(
                "upstream connect announcement failed, removing just this session: user_id={} connection_id={} error={}",
                user_id, connection_id, err
            );
            self.remove_from_registry(&user_id, connection_id);
            session.terminate();
            return;
        }

        self.put_idle(&session);

        let (pacing_tx, pacing_rx) = mpsc::channel(PACING_CAPACITY);

        let read_handle = tokio::spawn(pumps::read_pump(self.clone(), session.clone(), ws_rx, pacing_rx));
        let write_handle = tokio::spawn(pumps::write_pump(self.clone(), session.clone(), outbound_rx, ws_tx));
        let faucet_handle = tokio::spawn(pumps::token_faucet(session.clone(), pacing_tx));

        session.track_task(read_handle);
        session.track_task(write_handle);
        session.track_task(faucet_handle);

        info!(
            "session registered: user_id={} connection_id={}",
            user_id, connection_id
        );
    }

    /// Enqueues `content` onto the session's outbound queue. Returns
    /// `NotFound` if no such session exists; a full queue schedules the
    /// session for backpressure teardown instead of blocking.
    pub fn try_send(self: &Arc<Self>, user_id: &str, connection_id: u32, content: String) -> Result<(), SessionError> {
        let session = self
            .find_session(user_id, connection_id)
            .ok_or_else(|| SessionError::NotFound {
                user_id: user_id.to_string(),
                connection_id,
            })?;

        match session.outbound_tx.try_send(Message::Text(content)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.request_unregister(session, UnregisterReason::BufferFull);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Ok(()),
        }
    }

    /// Asynchronous kill request from the upstream reader once its link to
    /// the engine has died. Skips the disconnect announcement since the
    /// upstream side is already gone.
    pub fn signal(self: &Arc<Self>, user_id: &str, connection_id: u32) {
        let _ = self.signal_tx.send(SignalRequest {
            user_id: user_id.to_string(),
            connection_id,
        });
    }

    /// Requests teardown for a local reason (read error, idle, backpressure).
    pub fn request_unregister(self: &Arc<Self>, session: Arc<ClientSession>, reason: UnregisterReason) {
        let _ = self.unregister_tx.send(UnregisterRequest { session, reason });
    }

    /// Moves `session` onto the tail of the idle list (mark it inactive,
    /// stamp `lastActiveAt`), starting the reaper if this is the first idle
    /// session and none is running yet.
    pub fn put_idle(self: &Arc<Self>, session: &Arc<ClientSession>) {
        session.set_active(false);
        session.touch();

        let mut idle_list = self.idle_list.lock().unwrap();
        if let Some(old) = session.idle_handle() {
            idle_list.remove(old);
        }
        let handle = idle_list.push_back(session.clone(), session.last_active_at());
        session.set_idle_handle(Some(handle));
        drop(idle_list);

        self.ensure_reaper_started();
    }

    /// Detaches `session` from the idle list and marks it active — a
    /// message is now being processed for it.
    pub fn reclaim(&self, session: &Arc<ClientSession>) {
        if let Some(handle) = session.idle_handle() {
            self.idle_list.lock().unwrap().remove(handle);
            session.set_idle_handle(None);
        }
        session.set_active(true);
    }

    /// Adjusts the idle threshold at runtime. A strict reduction wakes the
    /// reaper so the next wake is `min(remaining, newInterval)` rather than
    /// waiting out whatever sleep was already scheduled.
    pub fn set_max_idle_time(self: &Arc<Self>, new_duration: Duration) {
        let mut max_idle_time = self.max_idle_time.lock().unwrap();
        let old = *max_idle_time;
        *max_idle_time = new_duration;
        drop(max_idle_time);

        if new_duration > Duration::ZERO && new_duration < old {
            if let Some(wake_tx) = self.reaper_wake_tx.lock().unwrap().as_ref() {
                let _ = wake_tx.try_send(());
            }
        }

        self.ensure_reaper_started();
    }

    fn max_idle_time(&self) -> Duration {
        *self.max_idle_time.lock().unwrap()
    }

    fn append_to_registry(&self, session: Arc<ClientSession>) {
        self.registry
            .lock()
            .unwrap()
            .entry(session.user_id.clone())
            .or_default()
            .push(session);
    }

    fn find_session(&self, user_id: &str, connection_id: u32) -> Option<Arc<ClientSession>> {
        self.registry
            .lock()
            .unwrap()
            .get(user_id)
            .and_then(|sessions| sessions.iter().find(|s| s.connection_id == connection_id).cloned())
    }

    /// Removes the single session matching `(user_id, connection_id)`,
    /// deleting the user's key entirely only if its list becomes empty.
    /// Returns whether anything was actually removed.
    fn remove_from_registry(&self, user_id: &str, connection_id: u32) -> bool {
        let mut registry = self.registry.lock().unwrap();
        let Some(sessions) = registry.get_mut(user_id) else {
            return false;
        };
        let before = sessions.len();
        sessions.retain(|s| s.connection_id != connection_id);
        let removed = sessions.len() != before;
        if sessions.is_empty() {
            registry.remove(user_id);
        }
        removed
    }

    fn registry_is_empty(&self) -> bool {
        self.registry.lock().unwrap().is_empty()
    }

    fn ensure_reaper_started(self: &Arc<Self>) {
        if self
            .reaper_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let (wake_tx, wake_rx) = mpsc::channel(REAPER_WAKE_CAPACITY);
        *self.reaper_wake_tx.lock().unwrap() = Some(wake_tx);

        let reaper_manager = self.clone();
        tokio::spawn(async move {
            reaper_manager.run_reaper(wake_rx).await;
        });
    }

    async fn run_arbiter(
        self: Arc<Self>,
        mut unregister_rx: mpsc::UnboundedReceiver<UnregisterRequest>,
        mut signal_rx: mpsc::UnboundedReceiver<SignalRequest>,
    ) {
        loop {
            tokio::select! {
                maybe_req = unregister_rx.recv() => {
                    match maybe_req {
                        Some(req) => self.handle_teardown(req.session, TeardownTrigger::Unregister(req.reason)).await,
                        None => break,
                    }
                }
                maybe_req = signal_rx.recv() => {
                    match maybe_req {
                        Some(req) => {
                            if let Some(session) = self.find_session(&req.user_id, req.connection_id) {
                                self.handle_teardown(session, TeardownTrigger::Signal).await;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    }

    async fn handle_teardown(&self, session: Arc<ClientSession>, trigger: TeardownTrigger) {
        self.remove_from_registry(&session.user_id, session.connection_id);
        if let Some(handle) = session.idle_handle() {
            self.idle_list.lock().unwrap().remove(handle);
            session.set_idle_handle(None);
        }

        match &trigger {
            TeardownTrigger::Unregister(reason) => {
                info!(
                    "terminating session: user_id={} connection_id={} reason={}",
                    session.user_id, session.connection_id, reason
                );
                if let Some(upstream) = session.upstream() {
                    if let Err(err) = upstream.announce_disconnect().await {
                        warn!("disconnect announcement failed (teardown continues): {}", err);
                    }
                }
            }
            TeardownTrigger::Signal => {
                info!(
                    "signal received to kill session: user_id={} connection_id={}",
                    session.user_id, session.connection_id
                );
            }
        }

        session.terminate();
    }

    async fn run_reaper(self: Arc<Self>, mut wake_rx: mpsc::Receiver<()>) {
        let mut sleep_for = self.max_idle_time().max(self.reaper_min_interval);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = wake_rx.recv() => {}
            }

            let max_idle_time = self.max_idle_time();
            if max_idle_time <= Duration::ZERO || self.registry_is_empty() {
                self.reaper_running.store(false, Ordering::SeqCst);
                *self.reaper_wake_tx.lock().unwrap() = None;
                return;
            }

            let now = Instant::now();
            let cutoff = now.checked_sub(max_idle_time).unwrap_or(now);
            let expired = {
                let mut idle_list = self.idle_list.lock().unwrap();
                idle_list.drain_expired(cutoff)
            };
            for session in &expired {
                session.set_idle_handle(None);
            }
            for session in expired {
                self.request_unregister(session, UnregisterReason::IdleTooLong);
            }

            let earliest = self.idle_list.lock().unwrap().earliest();
            sleep_for = match earliest {
                Some(earliest) => {
                    let expiry = earliest + max_idle_time;
                    let remaining = expiry.saturating_duration_since(now);
                    remaining.max(self.reaper_min_interval)
                }
                None => {
                    self.reaper_running.store(false, Ordering::SeqCst);
                    *self.reaper_wake_tx.lock().unwrap() = None;
                    return;
                }
            };
        }
    }
}
