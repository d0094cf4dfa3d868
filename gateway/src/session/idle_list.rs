use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use super::client::ClientSession;

/// Ordered collection of inactive sessions, oldest first.
///
/// The source implements this as an intrusive doubly-linked list so a
/// session can detach itself in O(1) given a stored node handle. Rust has no
/// safe equivalent of an intrusive list without unsafe code or a crate
/// outside this workspace's stack, so this keeps the same externally
/// observable behavior — insertion-ordered, O(log n) detach, reap walks a
/// prefix — with a `BTreeMap` keyed by a monotonically increasing sequence
/// number standing in for the node handle.
pub struct IdleList {
    entries: BTreeMap<u64, (Arc<ClientSession>, Instant)>,
    next_seq: u64,
}

/// A session's position in the idle list, handed back on insertion so the
/// session can later detach itself without a linear scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct IdleHandle(u64);

impl IdleList {
    pub fn new() -> IdleList {
        IdleList {
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends `session` to the tail, recording `last_active_at`.
    pub fn push_back(&mut self, session: Arc<ClientSession>, last_active_at: Instant) -> IdleHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(seq, (session, last_active_at));
        IdleHandle(seq)
    }

    /// Detaches the session at `handle`, if still present. Idempotent.
    pub fn remove(&mut self, handle: IdleHandle) {
        self.entries.remove(&handle.0);
    }

    /// Drains every entry older than `older_than`, walking from the front
    /// and stopping at the first entry that is not expired (the list is
    /// insertion-ordered, so once one entry survives, all later ones do
    /// too).
    pub fn drain_expired(&mut self, older_than: Instant) -> Vec<Arc<ClientSession>> {
        let mut expired = Vec::new();
        let expired_seqs: Vec<u64> = self
            .entries
            .iter()
            .take_while(|(_, (_, last_active_at))| *last_active_at < older_than)
            .map(|(seq, _)| *seq)
            .collect();
        for seq in expired_seqs {
            if let Some((session, _)) = self.entries.remove(&seq) {
                expired.push(session);
            }
        }
        expired
    }

    /// The `last_active_at` of the oldest remaining entry, if any.
    pub fn earliest(&self) -> Option<Instant> {
        self.entries.values().next().map(|(_, last_active_at)| *last_active_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::client::ClientSession;
    use std::time::Duration;

    fn dummy_session(connection_id: u32) -> Arc<ClientSession> {
        ClientSession::new_for_test("user".to_string(), connection_id)
    }

    #[test]
    fn push_back_and_drain_preserves_insertion_order() {
        let mut list = IdleList::new();
        let base = Instant::now() - Duration::from_secs(100);

        let a = dummy_session(1);
        let b = dummy_session(2);
        let c = dummy_session(3);

        list.push_back(a.clone(), base);
        list.push_back(b.clone(), base + Duration::from_secs(1));
        list.push_back(c.clone(), base + Duration::from_secs(2));

        let cutoff = base + Duration::from_millis(1500);
        let expired = list.drain_expired(cutoff);

        assert_eq!(expired.len(), 2);
        assert_eq!(expired[0].connection_id, 1);
        assert_eq!(expired[1].connection_id, 2);
        assert!(!list.is_empty());
    }

    #[test]
    fn remove_detaches_without_affecting_others() {
        let mut list = IdleList::new();
        let now = Instant::now();

        let a = dummy_session(1);
        let b = dummy_session(2);

        let handle_a = list.push_back(a, now);
        list.push_back(b, now);

        list.remove(handle_a);

        let expired = list.drain_expired(now + Duration::from_secs(1));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].connection_id, 2);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut list = IdleList::new();
        let handle = list.push_back(dummy_session(1), Instant::now());
        list.remove(handle);
        list.remove(handle);
        assert!(list.is_empty());
    }

    #[test]
    fn stops_at_first_unexpired_entry() {
        let mut list = IdleList::new();
        let now = Instant::now();
        list.push_back(dummy_session(1), now - Duration::from_secs(40));
        list.push_back(dummy_session(2), now - Duration::from_secs(5));
        list.push_back(dummy_session(3), now - Duration::from_secs(50));

        let expired = list.drain_expired(now - Duration::from_secs(30));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].connection_id, 1);
        assert_eq!(list.entries.len(), 2);
    }
}
