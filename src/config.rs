use std::time::Duration;

pub const DEFAULT_MAX_PACKET_LENGTH: usize = 4 * 1024 * 1024;

/// Engine configuration, passed at construction.
///
/// The session timeout is the one mandatory knob; everything else carries a
/// default. The negotiated timeout returned by the server (and the derived
/// socket read timeout) live in the session state, not here.
#[derive(Clone)]
pub struct Config {
    /// Requested session timeout, sent in every ConnectRequest.
    pub session_timeout: Duration,
    /// Bound on a single TCP connect attempt, and on each synchronous
    /// handshake exchange (SASL rounds).
    pub connect_timeout: Duration,
    /// Frames declaring a length at or above this are rejected as malformed.
    pub max_packet_length: usize,
    /// Poll iterations while waiting for dispose to settle.
    pub max_spin: usize,
    /// When set, registered watches are not replayed after a reconnect.
    pub disable_auto_watch_reset: bool,
}

impl Config {
    pub fn new(session_timeout: Duration) -> Self {
        Self {
            session_timeout,
            connect_timeout: Duration::from_millis(500),
            max_packet_length: DEFAULT_MAX_PACKET_LENGTH,
            max_spin: 30,
            disable_auto_watch_reset: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}
