use std::fmt;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use zerocopy::AsBytes;

use crate::error::ZkError;
use crate::proto::{REQUEST_HEADER_LEN, ReplyHeader, RequestHeader, XID_AUTH, XID_PING};
use crate::watch::WatchRegistration;

/// One unit of work travelling through the engine.
///
/// The wire image (length prefix + request header + body) is serialized once
/// at construction and never touched again. After the packet finishes, the
/// reply header is authoritative; the engine stamps locally-completed packets
/// through [`ZkError::code`].
pub struct Packet {
    pub xid: i32,
    pub op: i32,
    pub reply: ReplyHeader,
    pub response: Option<Bytes>,
    pub client_path: Option<String>,
    pub server_path: Option<String>,
    wire: Bytes,
    watch: Option<Box<dyn WatchRegistration>>,
    noti: Option<crossfire::Tx<Packet>>,
}

impl Packet {
    pub(crate) fn new(
        xid: i32, op: i32, body: &[u8], client_path: Option<String>, server_path: Option<String>,
        watch: Option<Box<dyn WatchRegistration>>, noti: Option<crossfire::Tx<Packet>>,
    ) -> Self {
        let payload_len = REQUEST_HEADER_LEN + body.len();
        let mut buf = BytesMut::with_capacity(4 + payload_len);
        buf.put_i32(payload_len as i32);
        buf.put_slice(RequestHeader::new(xid, op).as_bytes());
        buf.put_slice(body);
        Self {
            xid,
            op,
            reply: ReplyHeader::default(),
            response: None,
            client_path,
            server_path,
            wire: buf.freeze(),
            watch,
            noti,
        }
    }

    /// The full frame image, cheap to hand to the writer while the packet
    /// itself parks in the pending queue.
    #[inline(always)]
    pub(crate) fn wire(&self) -> Bytes {
        self.wire.clone()
    }

    /// Ping and Auth carry reserved xids and are demultiplexed by xid on
    /// receipt; they never wait in the pending queue.
    #[inline(always)]
    pub(crate) fn enters_pending(&self) -> bool {
        self.xid != XID_PING && self.xid != XID_AUTH
    }

    #[inline(always)]
    pub fn err(&self) -> i32 {
        self.reply.err.get()
    }

    #[inline(always)]
    pub fn zxid(&self) -> i64 {
        self.reply.zxid.get()
    }

    /// Finish the packet: fire the watch registration with the terminal error
    /// code, then signal completion. Consumes the packet, so it can only
    /// happen once.
    pub(crate) fn finish(mut self) {
        if let Some(w) = self.watch.take() {
            w.register(self.reply.err.get());
        }
        if let Some(tx) = self.noti.take() {
            let _ = tx.send(self);
        }
    }

    /// Complete locally with an engine error (connection loss, session
    /// expiry, auth failure).
    pub(crate) fn fail(mut self, e: &ZkError) {
        self.reply = ReplyHeader::new(self.xid, self.reply.zxid.get(), e.code());
        self.finish();
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "packet(xid:{}, op:{})", self.xid, self.op)
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// The caller's side of a packet's completion signal.
pub struct PacketHandle {
    rx: crossfire::AsyncRx<Packet>,
}

impl PacketHandle {
    pub(crate) fn pair() -> (crossfire::Tx<Packet>, Self) {
        let (tx, rx) = crossfire::spsc::bounded_tx_blocking_rx_async::<Packet>(1);
        (tx, Self { rx })
    }

    /// Wait for the packet to finish, bounded by `timeout`. On expiry the
    /// packet stays in flight; there is no retraction.
    pub async fn wait_timeout(self, timeout: Duration) -> Result<Packet, ZkError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_) => Err(ZkError::Timeout),
            Ok(Ok(p)) => Ok(p),
            Ok(Err(_)) => Err(ZkError::ConnectionLoss),
        }
    }

    pub async fn wait(self) -> Result<Packet, ZkError> {
        match self.rx.recv().await {
            Ok(p) => Ok(p),
            Err(_) => Err(ZkError::ConnectionLoss),
        }
    }
}
