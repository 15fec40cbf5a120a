use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use captains_log::LogFilter;
use crossfire::{AsyncRx, MAsyncRx, MTx, mpmc, mpsc};
use futures::{future::FutureExt, pin_mut};
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use zerocopy::AsBytes;

use crate::config::Config;
use crate::endpoint::{ConnectString, EndpointSet, prepend_chroot, strip_chroot};
use crate::error::ZkError;
use crate::net::{FrameReader, FrameWriter, ZkStream};
use crate::packet::{Packet, PacketHandle};
use crate::proto::*;
use crate::queue::{OutgoingQueue, PendingQueue};
use crate::sasl::SaslClient;
use crate::session::{SessionInfo, SessionState, ZkEvent};
use crate::watch::{WatchManager, WatchRegistration, WatchedEvent};

const SWEEP_BACKOFF: Duration = Duration::from_secs(1);
const RECONNECT_JITTER_MAX_MS: u64 = 50;
const SEND_IDLE_WAIT: Duration = Duration::from_millis(1);

/// Collaborator seams handed to the engine at construction.
#[derive(Default)]
pub struct Options {
    pub sasl: Option<Box<dyn SaslClient>>,
    pub watches: Option<Arc<dyn WatchManager>>,
    pub logger: Option<Arc<LogFilter>>,
}

/// The client connection engine: one session multiplexed onto one TCP
/// connection at a time, with transparent reconnection.
///
/// `start` spawns the run task (reconnect controller + handshake driver +
/// sender loop); each live connection additionally runs a receiver task.
/// Dropping the handle asks the session to wind down; [`ZkConn::close`] is
/// the graceful path.
pub struct ZkConn {
    inner: Arc<ZkConnInner>,
    run: Mutex<Option<JoinHandle<()>>>,
}

impl ZkConn {
    /// Parse the connection string, set up the engine and spawn the run
    /// task. Must be called from within a tokio runtime.
    pub fn start(
        config: Config, connect_string: &str, opts: Options,
    ) -> Result<(Self, AsyncRx<ZkEvent>), ZkError> {
        let cs = ConnectString::parse(connect_string)?;
        let endpoints = EndpointSet::new(cs.addrs);
        let (wake_tx, wake_rx) = mpmc::unbounded_async::<()>();
        let (event_tx, event_rx) = mpsc::unbounded_async::<ZkEvent>();
        let logger = match opts.logger {
            Some(l) => l,
            None => {
                let l = Arc::new(LogFilter::new());
                l.set_level(log::Level::Trace);
                l
            }
        };
        let inner = Arc::new(ZkConnInner {
            session: SessionInfo::new(config.session_timeout),
            config,
            chroot: cs.chroot,
            closing: AtomicBool::new(false),
            close_queued: AtomicBool::new(false),
            xid: AtomicI32::new(1),
            outgoing: OutgoingQueue::new(),
            pending: PendingQueue::new(),
            wake_tx: wake_tx.into(),
            wake_rx,
            events: event_tx.into(),
            auth_data: Mutex::new(Vec::new()),
            watches: opts.watches,
            last_send_ms: AtomicU64::new(0),
            last_ping_us: AtomicU64::new(0),
            started: Instant::now(),
            logger,
        });
        let ctx = RunCtx { endpoints, sasl: opts.sasl };
        let run_inner = inner.clone();
        let handle = tokio::spawn(async move {
            run_inner.run_loop(ctx).await;
        });
        Ok((Self { inner, run: Mutex::new(Some(handle)) }, event_rx))
    }

    /// Queue one request for transmission. The request body is opaque to the
    /// engine; `path` (when the operation has one) is kept for watch
    /// registration and diagnostics, with the server-side form derived from
    /// the chroot.
    #[inline]
    pub fn submit(
        &self, op: i32, request: Vec<u8>, path: Option<&str>,
        watch: Option<Box<dyn WatchRegistration>>,
    ) -> Result<PacketHandle, ZkError> {
        self.inner.submit(op, request, path, watch)
    }

    /// Submit and wait, bounded by the session timeout.
    pub async fn request(&self, op: i32, request: Vec<u8>) -> Result<Packet, ZkError> {
        let handle = self.submit(op, request, None, None)?;
        handle.wait_timeout(self.inner.config.session_timeout).await
    }

    /// Store a credential for replay on every handshake; when currently
    /// connected, also send it right away.
    pub fn add_auth(&self, scheme: &str, auth: &[u8]) {
        let data = AuthData { scheme: scheme.to_string(), auth: auth.to_vec() };
        let connected = self.inner.state().is_connected();
        self.inner.auth_data.lock().unwrap().push(data.clone());
        if connected {
            self.inner.outgoing.push_back(self.inner.auth_packet(&data));
            self.inner.wake();
        }
    }

    /// Graceful dispose: flush a CloseSession, wait for the peer to close
    /// the socket bounded by the session timeout, then force-close.
    pub async fn close(&self) -> Result<(), ZkError> {
        let inner = &self.inner;
        if !inner.closing.swap(true, Ordering::SeqCst) {
            if inner.state().is_connected() {
                inner.enqueue_close_session();
            }
            inner.wake();
        }
        let spin = inner.config.max_spin.max(1) as u32;
        let step = inner.config.session_timeout / spin;
        for _ in 0..spin {
            if !inner.state().is_alive() {
                self.join_run().await;
                logger_debug!(inner.logger, "{:?} closed", inner);
                return Ok(());
            }
            sleep(step).await;
        }
        logger_warn!(inner.logger, "{:?} dispose timed out, forcing close", inner);
        let h = self.run.lock().unwrap().take();
        if let Some(h) = h {
            h.abort();
            let _ = h.await;
        }
        inner.session.set_state(SessionState::Closed);
        inner.drain_all(&ZkError::SessionExpired);
        Err(ZkError::Timeout)
    }

    async fn join_run(&self) {
        let h = self.run.lock().unwrap().take();
        if let Some(h) = h {
            let _ = h.await;
        }
    }

    #[inline(always)]
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    #[inline(always)]
    pub fn is_alive(&self) -> bool {
        self.inner.state().is_alive()
    }

    #[inline(always)]
    pub fn session_id(&self) -> i64 {
        self.inner.session.session_id()
    }

    #[inline(always)]
    pub fn last_zxid(&self) -> i64 {
        self.inner.session.last_zxid()
    }

    /// The timeout granted by the server on the last handshake.
    #[inline(always)]
    pub fn negotiated_timeout(&self) -> Duration {
        self.inner.session.negotiated_timeout()
    }
}

impl Drop for ZkConn {
    fn drop(&mut self) {
        if !self.inner.closing.swap(true, Ordering::SeqCst) {
            if self.inner.state().is_connected() {
                self.inner.enqueue_close_session();
            }
        }
        self.inner.wake();
    }
}

impl fmt::Debug for ZkConn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.inner.fmt(f)
    }
}

#[derive(Clone)]
struct AuthData {
    scheme: String,
    auth: Vec<u8>,
}

/// State owned exclusively by the run task.
struct RunCtx {
    endpoints: EndpointSet,
    sasl: Option<Box<dyn SaslClient>>,
}

struct ZkConnInner {
    config: Config,
    chroot: Option<String>,
    session: SessionInfo,
    closing: AtomicBool,
    close_queued: AtomicBool,
    xid: AtomicI32,
    outgoing: OutgoingQueue,
    pending: PendingQueue,
    wake_tx: MTx<()>,
    wake_rx: MAsyncRx<()>,
    events: MTx<ZkEvent>,
    auth_data: Mutex<Vec<AuthData>>,
    watches: Option<Arc<dyn WatchManager>>,
    last_send_ms: AtomicU64,
    last_ping_us: AtomicU64,
    started: Instant,
    logger: Arc<LogFilter>,
}

impl fmt::Debug for ZkConnInner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "zk session 0x{:x}", self.session.session_id())
    }
}

impl Drop for ZkConnInner {
    fn drop(&mut self) {
        let e = match self.state() {
            SessionState::AuthFailed => ZkError::AuthFailed,
            SessionState::Closed => ZkError::SessionExpired,
            _ => ZkError::ConnectionLoss,
        };
        self.drain_all(&e);
    }
}

impl ZkConnInner {
    #[inline(always)]
    fn state(&self) -> SessionState {
        self.session.state()
    }

    #[inline(always)]
    fn wake(&self) {
        let _ = self.wake_tx.send(());
    }

    #[inline(always)]
    fn emit(&self, ev: ZkEvent) {
        let _ = self.events.send(ev);
    }

    #[inline(always)]
    fn next_xid(&self) -> i32 {
        self.xid.fetch_add(1, Ordering::SeqCst)
    }

    #[inline(always)]
    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    #[inline(always)]
    fn now_us(&self) -> u64 {
        self.started.elapsed().as_micros() as u64
    }

    /// Leave the connected/handshaking state. Folds the dispose case in: a
    /// closing session has nowhere to reconnect to, so it goes terminal.
    /// Every caller path wakes the sender.
    fn transition_not_connected(&self) {
        if self.closing.load(Ordering::SeqCst) {
            self.session.set_state(SessionState::Closed);
        } else {
            self.session.set_state(SessionState::NotConnected);
        }
        self.wake();
    }

    fn submit(
        &self, op: i32, request: Vec<u8>, path: Option<&str>,
        watch: Option<Box<dyn WatchRegistration>>,
    ) -> Result<PacketHandle, ZkError> {
        match self.state() {
            SessionState::Closed => return Err(ZkError::SessionExpired),
            SessionState::AuthFailed => return Err(ZkError::AuthFailed),
            _ => {}
        }
        if self.closing.load(Ordering::SeqCst) {
            return Err(ZkError::SessionExpired);
        }
        let (tx, handle) = PacketHandle::pair();
        let xid = self.next_xid();
        let client_path = path.map(|p| p.to_string());
        let server_path = path.map(|p| prepend_chroot(self.chroot.as_deref(), p));
        let pkt = Packet::new(xid, op, &request, client_path, server_path, watch, Some(tx));
        logger_trace!(self.logger, "{:?} submit {}", self, pkt);
        self.outgoing.push_back(pkt);
        self.wake();
        // A terminal transition may have raced the enqueue; drain once more
        // so the packet cannot strand unfinished.
        match self.state() {
            SessionState::Closed => self.drain_all(&ZkError::SessionExpired),
            SessionState::AuthFailed => self.drain_all(&ZkError::AuthFailed),
            _ => {}
        }
        Ok(handle)
    }

    fn enqueue_close_session(&self) {
        if self.close_queued.swap(true, Ordering::SeqCst) {
            return;
        }
        let pkt = Packet::new(self.next_xid(), OP_CLOSE_SESSION, &[], None, None, None, None);
        logger_debug!(self.logger, "{:?} queue close session {}", self, pkt);
        self.outgoing.push_back(pkt);
    }

    fn auth_packet(&self, data: &AuthData) -> Packet {
        let record = AuthPacket { auth_type: 0, scheme: data.scheme.clone(), auth: data.auth.clone() };
        let mut body = BytesMut::with_capacity(16 + data.scheme.len() + data.auth.len());
        record.serialize(&mut body);
        Packet::new(XID_AUTH, OP_AUTH, &body, None, None, None, None)
    }

    fn drain_all(&self, e: &ZkError) {
        let mut n = 0usize;
        for pkt in self.pending.drain() {
            pkt.fail(e);
            n += 1;
        }
        for pkt in self.outgoing.drain() {
            pkt.fail(e);
            n += 1;
        }
        if n > 0 {
            logger_debug!(self.logger, "{:?} drained {} packets with {}", self, n, e);
        }
    }

    async fn run_loop(self: Arc<Self>, mut ctx: RunCtx) {
        let mut first_attempt = true;
        loop {
            match self.state() {
                SessionState::Closed => {
                    self.drain_all(&ZkError::SessionExpired);
                    logger_debug!(self.logger, "{:?} run loop exit (closed)", self);
                    return;
                }
                SessionState::AuthFailed => {
                    self.drain_all(&ZkError::AuthFailed);
                    logger_debug!(self.logger, "{:?} run loop exit (auth failed)", self);
                    return;
                }
                _ => {}
            }
            if self.closing.load(Ordering::SeqCst) && !self.state().is_connected() {
                self.session.set_state(SessionState::Closed);
                continue;
            }

            // Reconnect controller: jitter between attempts, one visit per
            // endpoint per sweep, 1s backoff between sweeps.
            if first_attempt {
                first_attempt = false;
            } else {
                let jitter = rand::thread_rng().gen_range(0..=RECONNECT_JITTER_MAX_MS);
                sleep(Duration::from_millis(jitter)).await;
            }
            if !ctx.endpoints.is_next_available() {
                sleep(SWEEP_BACKOFF).await;
                ctx.endpoints.begin_sweep();
            }
            let addr = ctx.endpoints.next_candidate();
            self.session.set_state(SessionState::Connecting);
            logger_debug!(self.logger, "{:?} connecting to {}", self, addr);
            let mut stream = match ZkStream::connect(&addr, self.config.connect_timeout).await {
                Ok(s) => s,
                Err(e) => {
                    logger_warn!(self.logger, "{:?} connect {} failed: {}", self, addr, e);
                    ctx.endpoints.mark_failure(&addr);
                    self.transition_not_connected();
                    continue;
                }
            };
            match self.handshake(&mut stream, &mut ctx).await {
                Ok(()) => {
                    ctx.endpoints.mark_success(&addr);
                }
                Err(ZkError::SessionExpired) | Err(ZkError::AuthFailed) => {
                    // terminal state already set; drained at the loop top
                    continue;
                }
                Err(e) => {
                    logger_warn!(self.logger, "{:?} handshake with {} failed: {}", self, addr, e);
                    ctx.endpoints.mark_failure(&addr);
                    self.transition_not_connected();
                    continue;
                }
            }

            let (reader, mut writer) = stream.split();
            let (close_tx, close_rx) = mpmc::unbounded_async::<()>();
            let recv_inner = self.clone();
            let recv_handle = tokio::spawn(async move {
                recv_inner.receive_loop(reader, close_rx).await;
            });
            self.send_loop(&mut writer).await;
            writer.shutdown().await;
            drop(close_tx);
            let _ = recv_handle.await;

            match self.state() {
                SessionState::Closed | SessionState::AuthFailed => {}
                _ => {
                    self.drain_all(&ZkError::ConnectionLoss);
                    self.emit(ZkEvent::Disconnected);
                }
            }
        }
    }

    /// Handshake driver: ConnectRequest, optional inline SASL, the
    /// ConnectResponse, then the priority replay. Sole owner of the socket
    /// until it returns; no application packet moves before that.
    async fn handshake(&self, stream: &mut ZkStream, ctx: &mut RunCtx) -> Result<(), ZkError> {
        self.session.set_state(SessionState::Associating);
        let req = ConnectRequest {
            protocol_version: 0,
            last_zxid_seen: self.session.last_zxid(),
            timeout_ms: self.config.session_timeout.as_millis() as i32,
            session_id: self.session.session_id(),
            password: self.session.password(),
        };
        let mut buf = BytesMut::with_capacity(64);
        req.serialize(&mut buf);
        logger_debug!(
            self.logger,
            "{:?} send connect request (last zxid {}, timeout {}ms)",
            self,
            req.last_zxid_seen,
            req.timeout_ms
        );
        stream.write_frame(&buf).await?;

        if let Some(sasl) = ctx.sasl.as_mut() {
            self.sasl_loop(stream, sasl.as_mut()).await?;
        }

        let frame = stream
            .read_frame_timeout(self.config.max_packet_length, self.session.read_timeout())
            .await?;
        let resp = ConnectResponse::deserialize(&mut &frame[..])?;
        if resp.negotiated_timeout_ms <= 0 {
            logger_warn!(self.logger, "{:?} session expired by server", self);
            self.session.set_state(SessionState::Closed);
            self.emit(ZkEvent::Expired);
            return Err(ZkError::SessionExpired);
        }
        self.session.store_credentials(
            resp.session_id,
            resp.password,
            resp.negotiated_timeout_ms,
        );

        // Priority replay: SetWatches first, then each stored credential,
        // ahead of any application packet queued while disconnected.
        let mut replay: Vec<Packet> = Vec::new();
        if !self.config.disable_auto_watch_reset {
            if let Some(wm) = self.watches.as_ref() {
                let snap = wm.snapshot();
                if !snap.is_empty() {
                    let sw = SetWatches {
                        relative_zxid: self.session.last_zxid(),
                        data_watches: snap.data_watches,
                        exist_watches: snap.exist_watches,
                        child_watches: snap.child_watches,
                    };
                    let mut body = BytesMut::new();
                    sw.serialize(&mut body);
                    replay.push(Packet::new(
                        XID_SET_WATCHES,
                        OP_SET_WATCHES,
                        &body,
                        None,
                        None,
                        None,
                        None,
                    ));
                }
            }
        }
        for auth in self.auth_data.lock().unwrap().iter() {
            replay.push(self.auth_packet(auth));
        }
        for pkt in replay.into_iter().rev() {
            self.outgoing.push_front(pkt);
        }

        self.last_send_ms.store(self.now_ms(), Ordering::SeqCst);
        self.session.set_state(SessionState::Connected);
        logger_debug!(
            self.logger,
            "{:?} connected to {} (negotiated {}ms)",
            self,
            stream.peer_addr(),
            resp.negotiated_timeout_ms
        );
        self.emit(ZkEvent::SyncConnected);
        self.wake();
        Ok(())
    }

    /// Inline SASL challenge loop. Each packet, including the mechanism's
    /// final one, synchronously awaits its reply so the ConnectResponse read
    /// position stays deterministic.
    async fn sasl_loop(
        &self, stream: &mut ZkStream, mech: &mut dyn SaslClient,
    ) -> Result<(), ZkError> {
        let mut token = match mech.start(stream.local_addr(), stream.peer_addr()) {
            Ok(t) => t,
            Err(e) => return self.auth_failed(e),
        };
        loop {
            let (err, challenge) = self.sasl_round(stream, &token).await?;
            if err != 0 {
                logger_warn!(self.logger, "{:?} sasl rejected with err {}", self, err);
                return self.auth_failed(ZkError::AuthFailed);
            }
            if mech.is_complete() {
                break;
            }
            token = match mech.evaluate_challenge(&challenge) {
                Ok(t) => t,
                Err(e) => return self.auth_failed(e),
            };
            if mech.is_complete() && !mech.has_last_packet() {
                break;
            }
        }
        logger_debug!(self.logger, "{:?} sasl negotiation complete", self);
        Ok(())
    }

    fn auth_failed(&self, e: ZkError) -> Result<(), ZkError> {
        logger_warn!(self.logger, "{:?} authentication failed: {}", self, e);
        self.session.set_state(SessionState::AuthFailed);
        self.emit(ZkEvent::AuthFailed);
        Err(ZkError::AuthFailed)
    }

    /// One SASL exchange: send the token, synchronously await the matching
    /// reply bounded by the connect timeout.
    async fn sasl_round(
        &self, stream: &mut ZkStream, token: &[u8],
    ) -> Result<(i32, Vec<u8>), ZkError> {
        let xid = self.next_xid();
        let mut payload = BytesMut::with_capacity(REQUEST_HEADER_LEN + 8 + token.len());
        payload.put_slice(RequestHeader::new(xid, OP_SASL).as_bytes());
        SaslToken { token: token.to_vec() }.serialize(&mut payload);
        stream.write_frame(&payload).await?;
        let frame = stream
            .read_frame_timeout(self.config.max_packet_length, self.config.connect_timeout)
            .await?;
        let head = ReplyHeader::decode(&frame)?;
        self.session.observe_zxid(head.zxid.get());
        if head.xid.get() != xid {
            logger_warn!(
                self.logger,
                "{:?} sasl reply xid {} does not match {}",
                self,
                head.xid.get(),
                xid
            );
            return Err(ZkError::ProtocolViolation);
        }
        let err = head.err.get();
        let challenge = if err == 0 && frame.len() > REPLY_HEADER_LEN {
            SaslToken::deserialize(&mut &frame[REPLY_HEADER_LEN..])?.token
        } else {
            Vec::new()
        };
        Ok((err, challenge))
    }

    /// Sender loop: drain the outgoing queue, keep the ping cadence, park on
    /// the wakeup signal when idle. Exits as soon as the session leaves
    /// Connected; the run loop then reconciles queues and state.
    async fn send_loop(&self, writer: &mut FrameWriter) {
        loop {
            if !self.state().is_connected() {
                return;
            }
            if self.closing.load(Ordering::SeqCst) {
                // dispose may have raced the handshake; the CloseSession
                // still has to reach the wire from here
                self.enqueue_close_session();
            }
            let ping_due_ms = self.session.read_timeout().as_millis() as u64 / 2;
            if ping_due_ms > 0
                && self.now_ms().saturating_sub(self.last_send_ms.load(Ordering::SeqCst))
                    >= ping_due_ms
            {
                self.outgoing.push_back(Packet::new(XID_PING, OP_PING, &[], None, None, None, None));
            }
            match self.outgoing.pop_front() {
                Some(pkt) => {
                    logger_trace!(self.logger, "{:?} send {}", self, pkt);
                    let wire = pkt.wire();
                    let is_ping = pkt.xid == XID_PING;
                    if pkt.enters_pending() {
                        self.pending.push_back(pkt);
                    } else if is_ping {
                        self.last_ping_us.store(self.now_us(), Ordering::SeqCst);
                    }
                    if let Err(e) = writer.write_raw(&wire).await {
                        logger_warn!(self.logger, "{:?} write failed: {}", self, e);
                        self.transition_not_connected();
                        return;
                    }
                    self.last_send_ms.store(self.now_ms(), Ordering::SeqCst);
                }
                None => {
                    let _ = timeout(SEND_IDLE_WAIT, self.wake_rx.recv()).await;
                }
            }
        }
    }

    async fn receive_loop(self: Arc<Self>, mut reader: FrameReader, close_rx: MAsyncRx<()>) {
        loop {
            match self.recv_one(&mut reader, &close_rx).await {
                Ok(()) => {}
                Err(e) => {
                    logger_debug!(self.logger, "{:?} receiver exit: {}", self, e);
                    self.transition_not_connected();
                    return;
                }
            }
        }
    }

    async fn recv_one(
        &self, reader: &mut FrameReader, close_rx: &MAsyncRx<()>,
    ) -> Result<(), ZkError> {
        let frame = {
            let read_f = reader
                .read_frame_timeout(self.config.max_packet_length, self.session.read_timeout())
                .fuse();
            pin_mut!(read_f);
            let close_f = close_rx.recv().fuse();
            pin_mut!(close_f);
            futures::select! {
                r = read_f => r?,
                _ = close_f => return Err(ZkError::ConnectionLoss),
            }
        };
        self.dispatch_frame(frame)
    }

    /// Route one reply frame: reserved xids are protocol traffic, everything
    /// else must match the head of the pending queue.
    fn dispatch_frame(&self, frame: BytesMut) -> Result<(), ZkError> {
        let frame = frame.freeze();
        let head = ReplyHeader::decode(&frame)?;
        self.session.observe_zxid(head.zxid.get());
        match head.xid.get() {
            XID_PING => {
                let sent = self.last_ping_us.swap(0, Ordering::SeqCst);
                if sent > 0 {
                    logger_debug!(
                        self.logger,
                        "{:?} ping reply after {}us",
                        self,
                        self.now_us().saturating_sub(sent)
                    );
                }
                Ok(())
            }
            XID_AUTH => {
                let err = head.err.get();
                if err != 0 {
                    logger_warn!(self.logger, "{:?} auth reply err {}", self, err);
                } else {
                    logger_trace!(self.logger, "{:?} auth reply ok", self);
                }
                Ok(())
            }
            XID_NOTIFICATION => {
                let ev = WatcherEvent::deserialize(&mut &frame[REPLY_HEADER_LEN..])?;
                let path = strip_chroot(self.chroot.as_deref(), &ev.path);
                logger_debug!(
                    self.logger,
                    "{:?} notification type {} at {:?}",
                    self,
                    ev.event_type,
                    path
                );
                self.emit(ZkEvent::Watched(WatchedEvent {
                    event_type: ev.event_type,
                    state: ev.state,
                    path,
                }));
                Ok(())
            }
            xid => match self.pending.pop_front() {
                None => {
                    logger_warn!(
                        self.logger,
                        "{:?} reply xid {} with nothing pending",
                        self,
                        xid
                    );
                    Err(ZkError::MalformedFrame)
                }
                Some(mut pkt) => {
                    if pkt.xid != xid {
                        logger_warn!(
                            self.logger,
                            "{:?} reply xid {} does not match pending head {}",
                            self,
                            xid,
                            pkt
                        );
                        pkt.fail(&ZkError::ConnectionLoss);
                        return Err(ZkError::ProtocolViolation);
                    }
                    pkt.reply = head;
                    if head.err.get() == 0 && frame.len() > REPLY_HEADER_LEN {
                        pkt.response = Some(frame.slice(REPLY_HEADER_LEN..));
                    }
                    logger_trace!(self.logger, "{:?} recv {} ok", self, pkt);
                    pkt.finish();
                    Ok(())
                }
            },
        }
    }
}
