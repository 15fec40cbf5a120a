use std::fmt;

/// `WatcherEvent.event_type` values.
pub const EVENT_NONE: i32 = -1;
pub const EVENT_NODE_CREATED: i32 = 1;
pub const EVENT_NODE_DELETED: i32 = 2;
pub const EVENT_NODE_DATA_CHANGED: i32 = 3;
pub const EVENT_NODE_CHILDREN_CHANGED: i32 = 4;

/// `WatcherEvent.state` values.
pub const STATE_DISCONNECTED: i32 = 0;
pub const STATE_SYNC_CONNECTED: i32 = 3;
pub const STATE_AUTH_FAILED: i32 = 4;
pub const STATE_EXPIRED: i32 = -112;

/// A notification as delivered to the event dispatcher, with the chroot
/// prefix already stripped from the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub event_type: i32,
    pub state: i32,
    pub path: String,
}

impl fmt::Display for WatchedEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "event(type:{}, state:{}, path:{})", self.event_type, self.state, self.path)
    }
}

/// The set of watches the server should re-arm after a reconnect, keyed by
/// kind. Paths are server-side paths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatchSnapshot {
    pub data_watches: Vec<String>,
    pub exist_watches: Vec<String>,
    pub child_watches: Vec<String>,
}

impl WatchSnapshot {
    pub fn is_empty(&self) -> bool {
        self.data_watches.is_empty()
            && self.exist_watches.is_empty()
            && self.child_watches.is_empty()
    }
}

/// Watch bookkeeping lives outside the engine; this seam is how the handshake
/// driver asks for the pending watches to replay.
pub trait WatchManager: Send + Sync {
    fn snapshot(&self) -> WatchSnapshot;
}

/// Per-packet registration callback, invoked exactly once when the packet
/// finishes, with the reply's error code.
pub trait WatchRegistration: Send {
    fn register(&self, err: i32);
}
