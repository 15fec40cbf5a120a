use std::fmt;
use std::mem::size_of;

use bytes::{Buf, BufMut, BytesMut};
use zerocopy::byteorder::{BigEndian, I32, I64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::error::ZkError;

/// Opcodes the engine handles by name. Every other opcode is an opaque `i32`
/// with an opaque body.
pub const OP_NOTIFICATION: i32 = 0;
pub const OP_CREATE: i32 = 1;
pub const OP_DELETE: i32 = 2;
pub const OP_EXISTS: i32 = 3;
pub const OP_GET_DATA: i32 = 4;
pub const OP_SET_DATA: i32 = 5;
pub const OP_GET_CHILDREN: i32 = 8;
pub const OP_SYNC: i32 = 9;
pub const OP_PING: i32 = 11;
pub const OP_AUTH: i32 = 100;
pub const OP_SET_WATCHES: i32 = 101;
pub const OP_SASL: i32 = 102;
pub const OP_CREATE_SESSION: i32 = -10;
pub const OP_CLOSE_SESSION: i32 = -11;
pub const OP_ERROR: i32 = -1;

/// Reserved xids. Application xids are positive and strictly increasing
/// within a session.
pub const XID_NOTIFICATION: i32 = -1;
pub const XID_PING: i32 = -2;
pub const XID_AUTH: i32 = -4;
pub const XID_SET_WATCHES: i32 = -8;

pub const PASSWORD_LEN: usize = 16;
pub const BLANK_PASSWORD: [u8; PASSWORD_LEN] = [0u8; PASSWORD_LEN];

/// Request header, leading every framed request except ConnectRequest:
///
/// | 4B  | 4B   |
/// | xid | type |
///
/// All integers on the wire are big-endian.
#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, PartialEq, Clone, Copy)]
#[repr(C)]
pub struct RequestHeader {
    pub xid: I32<BigEndian>,
    pub typ: I32<BigEndian>,
}

pub const REQUEST_HEADER_LEN: usize = size_of::<RequestHeader>();

impl RequestHeader {
    #[inline(always)]
    pub fn new(xid: i32, typ: i32) -> Self {
        Self { xid: I32::new(xid), typ: I32::new(typ) }
    }

    #[inline(always)]
    pub fn decode(buf: &[u8]) -> Result<Self, ZkError> {
        Self::read_from_prefix(buf).ok_or(ZkError::MalformedFrame)
    }
}

impl fmt::Display for RequestHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[xid:{}, type:{}]", self.xid.get(), self.typ.get())
    }
}

impl fmt::Debug for RequestHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Reply header, leading every framed reply after the ConnectResponse:
///
/// | 4B  | 8B   | 4B  |
/// | xid | zxid | err |
#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, PartialEq, Clone, Copy)]
#[repr(C)]
pub struct ReplyHeader {
    pub xid: I32<BigEndian>,
    pub zxid: I64<BigEndian>,
    pub err: I32<BigEndian>,
}

pub const REPLY_HEADER_LEN: usize = size_of::<ReplyHeader>();

impl ReplyHeader {
    #[inline(always)]
    pub fn new(xid: i32, zxid: i64, err: i32) -> Self {
        Self { xid: I32::new(xid), zxid: I64::new(zxid), err: I32::new(err) }
    }

    #[inline(always)]
    pub fn decode(buf: &[u8]) -> Result<Self, ZkError> {
        Self::read_from_prefix(buf).ok_or(ZkError::MalformedFrame)
    }
}

impl Default for ReplyHeader {
    fn default() -> Self {
        Self::new_zeroed()
    }
}

impl fmt::Display for ReplyHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[xid:{}, zxid:{}, err:{}]", self.xid.get(), self.zxid.get(), self.err.get())
    }
}

impl fmt::Debug for ReplyHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// Jute primitives. A buffer is `i32 len` + bytes with -1 for null; a string
// is `i32 len` + UTF-8 bytes; a vector is `i32 count` + elements.

#[inline]
pub fn read_i32(buf: &mut &[u8]) -> Result<i32, ZkError> {
    if buf.remaining() < 4 {
        return Err(ZkError::MalformedFrame);
    }
    Ok(buf.get_i32())
}

#[inline]
pub fn read_i64(buf: &mut &[u8]) -> Result<i64, ZkError> {
    if buf.remaining() < 8 {
        return Err(ZkError::MalformedFrame);
    }
    Ok(buf.get_i64())
}

pub fn read_buffer(buf: &mut &[u8]) -> Result<Vec<u8>, ZkError> {
    let len = read_i32(buf)?;
    if len < 0 {
        // null buffer
        return Ok(Vec::new());
    }
    let len = len as usize;
    if buf.remaining() < len {
        return Err(ZkError::MalformedFrame);
    }
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

pub fn read_string(buf: &mut &[u8]) -> Result<String, ZkError> {
    let raw = read_buffer(buf)?;
    String::from_utf8(raw).map_err(|_| ZkError::MalformedFrame)
}

pub fn read_string_vec(buf: &mut &[u8]) -> Result<Vec<String>, ZkError> {
    let count = read_i32(buf)?;
    if count < 0 {
        return Ok(Vec::new());
    }
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(read_string(buf)?);
    }
    Ok(out)
}

#[inline]
pub fn write_buffer(buf: &mut BytesMut, data: &[u8]) {
    buf.put_i32(data.len() as i32);
    buf.put_slice(data);
}

#[inline]
pub fn write_string(buf: &mut BytesMut, s: &str) {
    write_buffer(buf, s.as_bytes());
}

pub fn write_string_vec(buf: &mut BytesMut, v: &[String]) {
    buf.put_i32(v.len() as i32);
    for s in v.iter() {
        write_string(buf, s);
    }
}

/// First payload on every fresh connection; carries no RequestHeader.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub protocol_version: i32,
    pub last_zxid_seen: i64,
    pub timeout_ms: i32,
    pub session_id: i64,
    pub password: Vec<u8>,
}

impl ConnectRequest {
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_i32(self.protocol_version);
        buf.put_i64(self.last_zxid_seen);
        buf.put_i32(self.timeout_ms);
        buf.put_i64(self.session_id);
        write_buffer(buf, &self.password);
    }

    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, ZkError> {
        Ok(Self {
            protocol_version: read_i32(buf)?,
            last_zxid_seen: read_i64(buf)?,
            timeout_ms: read_i32(buf)?,
            session_id: read_i64(buf)?,
            password: read_buffer(buf)?,
        })
    }
}

/// Server's answer to a ConnectRequest. A non-positive negotiated timeout
/// means the session was not (re)established.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectResponse {
    pub protocol_version: i32,
    pub negotiated_timeout_ms: i32,
    pub session_id: i64,
    pub password: Vec<u8>,
}

impl ConnectResponse {
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_i32(self.protocol_version);
        buf.put_i32(self.negotiated_timeout_ms);
        buf.put_i64(self.session_id);
        write_buffer(buf, &self.password);
    }

    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, ZkError> {
        Ok(Self {
            protocol_version: read_i32(buf)?,
            negotiated_timeout_ms: read_i32(buf)?,
            session_id: read_i64(buf)?,
            password: read_buffer(buf)?,
        })
    }
}

/// Notification body (xid -1). The path is the server-side path; chroot
/// stripping happens before the event leaves the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct WatcherEvent {
    pub event_type: i32,
    pub state: i32,
    pub path: String,
}

impl WatcherEvent {
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_i32(self.event_type);
        buf.put_i32(self.state);
        write_string(buf, &self.path);
    }

    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, ZkError> {
        Ok(Self {
            event_type: read_i32(buf)?,
            state: read_i32(buf)?,
            path: read_string(buf)?,
        })
    }
}

/// Watch replay request sent right after a successful handshake (xid -8).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetWatches {
    pub relative_zxid: i64,
    pub data_watches: Vec<String>,
    pub exist_watches: Vec<String>,
    pub child_watches: Vec<String>,
}

impl SetWatches {
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_i64(self.relative_zxid);
        write_string_vec(buf, &self.data_watches);
        write_string_vec(buf, &self.exist_watches);
        write_string_vec(buf, &self.child_watches);
    }

    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, ZkError> {
        Ok(Self {
            relative_zxid: read_i64(buf)?,
            data_watches: read_string_vec(buf)?,
            exist_watches: read_string_vec(buf)?,
            child_watches: read_string_vec(buf)?,
        })
    }
}

/// Credential replayed on every handshake (xid -4).
#[derive(Debug, Clone, PartialEq)]
pub struct AuthPacket {
    pub auth_type: i32,
    pub scheme: String,
    pub auth: Vec<u8>,
}

impl AuthPacket {
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_i32(self.auth_type);
        write_string(buf, &self.scheme);
        write_buffer(buf, &self.auth);
    }

    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, ZkError> {
        Ok(Self {
            auth_type: read_i32(buf)?,
            scheme: read_string(buf)?,
            auth: read_buffer(buf)?,
        })
    }
}

/// SASL token, same shape in both directions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaslToken {
    pub token: Vec<u8>,
}

impl SaslToken {
    pub fn serialize(&self, buf: &mut BytesMut) {
        write_buffer(buf, &self.token);
    }

    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, ZkError> {
        Ok(Self { token: read_buffer(buf)? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_len() {
        assert_eq!(REQUEST_HEADER_LEN, 8);
        assert_eq!(REPLY_HEADER_LEN, 16);
    }

    #[test]
    fn test_header_wire_order() {
        let head = RequestHeader::new(7, OP_GET_DATA);
        assert_eq!(head.as_bytes(), &[0, 0, 0, 7, 0, 0, 0, 4]);
        let back = RequestHeader::decode(head.as_bytes()).expect("decode");
        assert_eq!(back, head);

        let reply = ReplyHeader::new(-2, 0x1122334455667788, -4);
        let bytes = reply.as_bytes().to_vec();
        assert_eq!(&bytes[4..12], &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);
        let back = ReplyHeader::decode(&bytes).expect("decode");
        assert_eq!(back.xid.get(), -2);
        assert_eq!(back.err.get(), -4);
    }

    #[test]
    fn test_connect_round_trip() {
        let req = ConnectRequest {
            protocol_version: 0,
            last_zxid_seen: 42,
            timeout_ms: 30_000,
            session_id: 0xABC,
            password: BLANK_PASSWORD.to_vec(),
        };
        let mut buf = BytesMut::new();
        req.serialize(&mut buf);
        let back = ConnectRequest::deserialize(&mut &buf[..]).expect("deserialize");
        assert_eq!(back, req);

        let resp = ConnectResponse {
            protocol_version: 0,
            negotiated_timeout_ms: 20_000,
            session_id: 0xABC,
            password: vec![9u8; PASSWORD_LEN],
        };
        let mut buf = BytesMut::new();
        resp.serialize(&mut buf);
        let back = ConnectResponse::deserialize(&mut &buf[..]).expect("deserialize");
        assert_eq!(back, resp);
    }

    #[test]
    fn test_set_watches_round_trip() {
        let sw = SetWatches {
            relative_zxid: 7,
            data_watches: vec!["/a".to_string(), "/b".to_string()],
            exist_watches: Vec::new(),
            child_watches: vec!["/c".to_string()],
        };
        let mut buf = BytesMut::new();
        sw.serialize(&mut buf);
        let back = SetWatches::deserialize(&mut &buf[..]).expect("deserialize");
        assert_eq!(back, sw);
    }

    #[test]
    fn test_watcher_event_round_trip() {
        let ev = WatcherEvent { event_type: 3, state: 3, path: "/app/node".to_string() };
        let mut buf = BytesMut::new();
        ev.serialize(&mut buf);
        let back = WatcherEvent::deserialize(&mut &buf[..]).expect("deserialize");
        assert_eq!(back, ev);
    }

    #[test]
    fn test_null_buffer() {
        let mut buf = BytesMut::new();
        buf.put_i32(-1);
        let out = read_buffer(&mut &buf[..]).expect("null buffer");
        assert!(out.is_empty());
    }

    #[test]
    fn test_truncated_payload() {
        let mut buf = BytesMut::new();
        buf.put_i32(100);
        buf.put_slice(b"short");
        assert_eq!(read_buffer(&mut &buf[..]), Err(ZkError::MalformedFrame));
        let empty: &[u8] = &[];
        assert_eq!(read_i64(&mut &empty[..]), Err(ZkError::MalformedFrame));
    }
}
