//! Server session table
//!
//! A session binds a client's 32-bit id to its current UDP endpoint and a
//! liveness timestamp. Sessions are created by the first valid inbound
//! frame carrying a new id, refreshed by every valid frame after that, and
//! deleted by the reaper once idle longer than the table's TTL.
//!
//! The table is shared by the UDP reader (creator/refresher), the fan-out
//! worker (snapshot under the read lock), and the reaper (deleter under the
//! write lock). Per-session mutable state sits behind its own mutex so the
//! fan-out can read endpoints under the read side. No lock is ever held
//! across an await point.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// Idle time after which a session is reaped
pub const IDLE_TTL: Duration = Duration::from_secs(60);

/// Reaper wake-up period
pub const REAPER_INTERVAL: Duration = Duration::from_secs(30);

struct SessionState {
    remote: SocketAddr,
    last_seen: Instant,
}

/// One connected client
pub struct Session {
    id: u32,
    state: Mutex<SessionState>,
}

impl Session {
    fn new(id: u32, remote: SocketAddr) -> Self {
        Self {
            id,
            state: Mutex::new(SessionState {
                remote,
                last_seen: Instant::now(),
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Current UDP endpoint of the client
    pub fn remote(&self) -> SocketAddr {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).remote
    }

    /// Instant of the last valid frame from this client
    pub fn last_seen(&self) -> Instant {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).last_seen
    }

    /// Refreshes liveness and tracks NAT rebinding of the remote endpoint
    fn touch(&self, remote: SocketAddr) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.remote = remote;
        state.last_seen = Instant::now();
    }
}

/// Shared table of live sessions keyed by session id
pub struct SessionTable {
    idle_ttl: Duration,
    sessions: RwLock<HashMap<u32, Arc<Session>>>,
}

impl SessionTable {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            idle_ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Registers or refreshes a session; returns true when it is new
    pub fn upsert(&self, id: u32, remote: SocketAddr) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        match sessions.entry(id) {
            Entry::Occupied(entry) => {
                entry.get().touch(remote);
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Session::new(id, remote)));
                true
            }
        }
    }

    pub fn get(&self, id: u32) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Copies out the current (id, endpoint) pairs for fan-out
    pub fn snapshot(&self) -> Vec<(u32, SocketAddr)> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|s| (s.id(), s.remote()))
            .collect()
    }

    /// Deletes every session idle longer than the TTL; returns how many
    pub fn reap(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|id, session| {
            let expired = now.duration_since(session.last_seen()) > self.idle_ttl;
            if expired {
                tracing::info!("client disconnected: {} (session: {})", session.remote(), id);
            }
            !expired
        });
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[tokio::test]
    async fn upsert_inserts_then_refreshes() {
        let table = SessionTable::new(IDLE_TTL);

        assert!(table.upsert(1, addr(1000)));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(1).unwrap().remote(), addr(1000));

        // same id from a new endpoint: not a new session, remote follows
        assert!(!table.upsert(1, addr(2000)));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(1).unwrap().remote(), addr(2000));
    }

    #[tokio::test]
    async fn snapshot_lists_all_sessions() {
        let table = SessionTable::new(IDLE_TTL);
        table.upsert(1, addr(1000));
        table.upsert(2, addr(2000));

        let mut snapshot = table.snapshot();
        snapshot.sort_by_key(|(id, _)| *id);
        assert_eq!(snapshot, vec![(1, addr(1000)), (2, addr(2000))]);
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_deletes_idle_sessions() {
        let table = SessionTable::new(IDLE_TTL);
        table.upsert(1, addr(1000));
        table.upsert(2, addr(2000));

        tokio::time::advance(Duration::from_secs(45)).await;
        table.upsert(2, addr(2000));
        assert_eq!(table.reap(), 0);

        // session 1 is now 75s idle, session 2 only 30s
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(table.reap(), 1);
        assert!(table.get(1).is_none());
        assert!(table.get(2).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_defers_reaping() {
        let table = SessionTable::new(IDLE_TTL);
        table.upsert(7, addr(1000));

        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(30)).await;
            table.upsert(7, addr(1000));
            assert_eq!(table.reap(), 0);
        }
        assert_eq!(table.len(), 1);
    }
}
