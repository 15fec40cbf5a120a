use std::fmt;
use std::io;

/// Server error codes carried verbatim in `ReplyHeader.err`. The engine only
/// interprets the session-fatal subset; everything else passes through to the
/// caller untouched.
pub const CODE_OK: i32 = 0;
pub const CODE_CONNECTION_LOSS: i32 = -4;
pub const CODE_MARSHALLING_ERROR: i32 = -5;
pub const CODE_OPERATION_TIMEOUT: i32 = -7;
pub const CODE_BAD_ARGUMENTS: i32 = -8;
pub const CODE_SESSION_EXPIRED: i32 = -112;
pub const CODE_AUTH_FAILED: i32 = -115;

/// Error kinds produced by the connection engine itself.
///
/// Per-operation server errors are not represented here: those arrive as an
/// `i32` in the packet's reply header and are the caller's business.
#[derive(strum::Display, strum::EnumString, strum::AsRefStr, PartialEq, Eq, Clone, Copy, thiserror::Error)]
pub enum ZkError {
    /// The connection dropped with the operation possibly in flight.
    #[strum(serialize = "zk_connection_loss")]
    ConnectionLoss,
    /// The server refused to resume the session; terminal.
    #[strum(serialize = "zk_session_expired")]
    SessionExpired,
    /// Authentication (SASL) was rejected; terminal.
    #[strum(serialize = "zk_auth_failed")]
    AuthFailed,
    /// A bounded wait elapsed before completion.
    #[strum(serialize = "zk_timeout")]
    Timeout,
    /// Frame length out of bounds or a payload that does not parse.
    #[strum(serialize = "zk_malformed_frame")]
    MalformedFrame,
    /// Reply xid does not match the head of the pending queue.
    #[strum(serialize = "zk_protocol_violation")]
    ProtocolViolation,
    /// Bad connection string or path.
    #[strum(serialize = "zk_invalid_argument")]
    InvalidArgument,
}

// The default Debug derive would ignore the strum serialization.
impl fmt::Debug for ZkError {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl ZkError {
    /// The `i32` stamped into a packet's `ReplyHeader.err` when the engine
    /// completes it locally. A protocol violation is indistinguishable from a
    /// broken connection on the wire, so it stamps as connection loss.
    pub fn code(&self) -> i32 {
        match self {
            Self::ConnectionLoss => CODE_CONNECTION_LOSS,
            Self::SessionExpired => CODE_SESSION_EXPIRED,
            Self::AuthFailed => CODE_AUTH_FAILED,
            Self::Timeout => CODE_OPERATION_TIMEOUT,
            Self::MalformedFrame => CODE_MARSHALLING_ERROR,
            Self::ProtocolViolation => CODE_CONNECTION_LOSS,
            Self::InvalidArgument => CODE_BAD_ARGUMENTS,
        }
    }
}

impl From<io::Error> for ZkError {
    #[inline(always)]
    fn from(_e: io::Error) -> Self {
        Self::ConnectionLoss
    }
}

impl From<tokio::time::error::Elapsed> for ZkError {
    #[inline(always)]
    fn from(_e: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_error_display() {
        let s = ZkError::ConnectionLoss.as_ref();
        assert_eq!(s, "zk_connection_loss");
        let e = ZkError::from_str(s).expect("parse");
        assert_eq!(e, ZkError::ConnectionLoss);
        assert!(ZkError::from_str("zk_no_such_error").is_err());
        println!("{} {:?}", ZkError::Timeout, ZkError::Timeout);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ZkError::ConnectionLoss.code(), CODE_CONNECTION_LOSS);
        assert_eq!(ZkError::SessionExpired.code(), CODE_SESSION_EXPIRED);
        assert_eq!(ZkError::AuthFailed.code(), CODE_AUTH_FAILED);
        assert_eq!(ZkError::Timeout.code(), CODE_OPERATION_TIMEOUT);
        assert_eq!(ZkError::ProtocolViolation.code(), CODE_CONNECTION_LOSS);
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let e: ZkError = io_err.into();
        assert_eq!(e, ZkError::ConnectionLoss);
    }
}
