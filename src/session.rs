use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use crate::proto::BLANK_PASSWORD;
use crate::watch::WatchedEvent;

/// Connection state of the session. `Closed` and `AuthFailed` are terminal;
/// once entered, the session never leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SessionState {
    NotConnected = 0,
    Connecting = 1,
    Associating = 2,
    Connected = 3,
    Closed = 4,
    AuthFailed = 5,
}

impl SessionState {
    fn from_i32(v: i32) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Associating,
            3 => Self::Connected,
            4 => Self::Closed,
            5 => Self::AuthFailed,
            _ => Self::NotConnected,
        }
    }

    #[inline(always)]
    pub fn is_alive(&self) -> bool {
        !matches!(self, Self::Closed | Self::AuthFailed)
    }

    #[inline(always)]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Edges of the connection state machine. Dispose reaches `Closed` from
    /// any live state; `AuthFailed` is only reachable out of the handshake.
    /// The terminal states have no outgoing edges.
    pub fn can_transition(&self, next: SessionState) -> bool {
        match (self, next) {
            (Self::NotConnected, Self::Connecting) => true,
            (Self::Connecting, Self::Associating) => true,
            (Self::Connecting, Self::NotConnected) => true,
            (Self::Associating, Self::Connected) => true,
            (Self::Associating, Self::NotConnected) => true,
            (Self::Associating, Self::AuthFailed) => true,
            (Self::Connected, Self::NotConnected) => true,
            (_, Self::Closed) => self.is_alive(),
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Events handed to the event dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZkEvent {
    SyncConnected,
    Disconnected,
    Expired,
    AuthFailed,
    Watched(WatchedEvent),
}

/// Session identity and liveness numbers shared between the two loops and
/// the API layer.
///
/// `session_id`/`password` are assigned by the first successful handshake and
/// reused verbatim on every reconnect; `last_zxid` is monotone non-decreasing
/// across the session. Writes happen only on the receive side (handshake
/// driver or receiver loop); reconnection establishes the happens-before
/// edge the other readers need.
pub(crate) struct SessionInfo {
    state: AtomicI32,
    session_id: AtomicI64,
    password: Mutex<Vec<u8>>,
    last_zxid: AtomicI64,
    negotiated_timeout_ms: AtomicU64,
    read_timeout_ms: AtomicU64,
}

impl SessionInfo {
    pub fn new(session_timeout: Duration) -> Self {
        let session_ms = session_timeout.as_millis() as u64;
        Self {
            state: AtomicI32::new(SessionState::NotConnected as i32),
            session_id: AtomicI64::new(0),
            password: Mutex::new(BLANK_PASSWORD.to_vec()),
            last_zxid: AtomicI64::new(0),
            negotiated_timeout_ms: AtomicU64::new(0),
            // until the first negotiation, derive from the requested timeout
            read_timeout_ms: AtomicU64::new(session_ms * 2 / 3),
        }
    }

    #[inline(always)]
    pub fn state(&self) -> SessionState {
        SessionState::from_i32(self.state.load(Ordering::SeqCst))
    }

    /// Move to `next` along a permitted edge. Requests with no such edge are
    /// refused, keeping the current state; refusals out of a live state are
    /// engine bugs and logged as such. Returns the state observed before the
    /// transition.
    pub fn set_state(&self, next: SessionState) -> SessionState {
        loop {
            let cur = self.state();
            if cur == next {
                return cur;
            }
            if !cur.can_transition(next) {
                if cur.is_alive() {
                    warn!("refused session state transition {} -> {}", cur, next);
                }
                return cur;
            }
            if self
                .state
                .compare_exchange(cur as i32, next as i32, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return cur;
            }
        }
    }

    #[inline(always)]
    pub fn session_id(&self) -> i64 {
        self.session_id.load(Ordering::SeqCst)
    }

    pub fn password(&self) -> Vec<u8> {
        self.password.lock().unwrap().clone()
    }

    #[inline(always)]
    pub fn last_zxid(&self) -> i64 {
        self.last_zxid.load(Ordering::SeqCst)
    }

    /// Record a zxid observed in a reply or notification; never moves
    /// backwards.
    pub fn observe_zxid(&self, zxid: i64) {
        if zxid > 0 && zxid > self.last_zxid.load(Ordering::SeqCst) {
            self.last_zxid.store(zxid, Ordering::SeqCst);
        }
    }

    /// Store the identity from a successful ConnectResponse and derive the
    /// socket read timeout from the negotiated value.
    pub fn store_credentials(&self, session_id: i64, password: Vec<u8>, negotiated_ms: i32) {
        self.session_id.store(session_id, Ordering::SeqCst);
        *self.password.lock().unwrap() = password;
        self.negotiated_timeout_ms.store(negotiated_ms as u64, Ordering::SeqCst);
        self.read_timeout_ms.store(negotiated_ms as u64 * 2 / 3, Ordering::SeqCst);
    }

    #[inline(always)]
    pub fn negotiated_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiated_timeout_ms.load(Ordering::SeqCst))
    }

    #[inline(always)]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_sticky() {
        let s = SessionInfo::new(Duration::from_secs(30));
        assert_eq!(s.state(), SessionState::NotConnected);
        s.set_state(SessionState::Connecting);
        s.set_state(SessionState::Associating);
        s.set_state(SessionState::Closed);
        assert_eq!(s.state(), SessionState::Closed);
        s.set_state(SessionState::Connecting);
        assert_eq!(s.state(), SessionState::Closed);
        assert!(!s.state().is_alive());
    }

    #[test]
    fn test_rejects_unlisted_edges() {
        let s = SessionInfo::new(Duration::from_secs(30));
        // Connected is only reachable through the handshake states
        s.set_state(SessionState::Connected);
        assert_eq!(s.state(), SessionState::NotConnected);
        s.set_state(SessionState::Connecting);
        s.set_state(SessionState::Connected);
        assert_eq!(s.state(), SessionState::Connecting);
        s.set_state(SessionState::Associating);
        s.set_state(SessionState::Connected);
        assert_eq!(s.state(), SessionState::Connected);
        // and cannot fall back to the handshake states directly
        s.set_state(SessionState::Associating);
        assert_eq!(s.state(), SessionState::Connected);

        // auth failure is a handshake outcome, not a connected-state one
        assert!(!SessionState::Connected.can_transition(SessionState::AuthFailed));
        assert!(SessionState::Associating.can_transition(SessionState::AuthFailed));
    }

    #[test]
    fn test_dispose_closes_from_any_live_state() {
        for setup in [
            Vec::new(),
            vec![SessionState::Connecting],
            vec![SessionState::Connecting, SessionState::Associating],
            vec![
                SessionState::Connecting,
                SessionState::Associating,
                SessionState::Connected,
            ],
        ] {
            let s = SessionInfo::new(Duration::from_secs(30));
            for st in setup {
                s.set_state(st);
            }
            s.set_state(SessionState::Closed);
            assert_eq!(s.state(), SessionState::Closed);
        }
    }

    #[test]
    fn test_zxid_monotone() {
        let s = SessionInfo::new(Duration::from_secs(30));
        s.observe_zxid(10);
        s.observe_zxid(5);
        assert_eq!(s.last_zxid(), 10);
        s.observe_zxid(11);
        assert_eq!(s.last_zxid(), 11);
        // zero and negative zxids are protocol traffic, not transactions
        s.observe_zxid(0);
        s.observe_zxid(-1);
        assert_eq!(s.last_zxid(), 11);
    }

    #[test]
    fn test_read_timeout_derivation() {
        let s = SessionInfo::new(Duration::from_millis(30_000));
        assert_eq!(s.read_timeout(), Duration::from_millis(20_000));
        s.store_credentials(0xABC, vec![1u8; 16], 20_000);
        assert_eq!(s.session_id(), 0xABC);
        assert_eq!(s.read_timeout(), Duration::from_millis(13_333));
        assert_eq!(s.negotiated_timeout(), Duration::from_millis(20_000));
    }
}
