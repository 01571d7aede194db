use std::net::SocketAddr;

use crate::socket::{RejectReason, SockOpt};

/// Socket lifecycle, connection and transmission errors.
///
/// Display strings carry the engine diagnostic name (EUNBOUNDSOCK, ENOSERVER,
/// ...) so a failure is recognizable from its message as well as its variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SocketError {
	#[error("EUNBOUNDSOCK: socket is not bound")]
	UnboundSock,

	#[error("ENOLISTEN: socket is not listening")]
	NoListen,

	#[error("ENOSERVER: no peer listening at {addr}")]
	NoServer { addr: SocketAddr },

	#[error("ECONNREJ: connection rejected by peer: {reason}")]
	Rejected { reason: RejectReason },

	#[error("ENOCONN: socket is not connected")]
	NoConn,

	#[error("ECONNLOST: connection was broken")]
	ConnLost,

	#[error("ESCLOSED: socket is closed")]
	Closed,

	#[error("ETIMEOUT: operation timed out")]
	Timeout,

	#[error("EASYNCRCV: operation would block")]
	WouldBlock,

	#[error("ELARGEMSG: a {need} byte message does not fit in {len} bytes")]
	LargeMsg { need: usize, len: usize },

	#[error("EDUPLISTEN: address {addr} already in use")]
	AddrInUse { addr: SocketAddr },

	#[error("ENOTINIT: engine has not been started")]
	NotStarted,

	#[error("EINVPARAM: {reason}")]
	Invalid { reason: &'static str },
}

/// Typed option access errors.
///
/// Raised by the option registry before the transport engine is consulted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionError {
	#[error("option {0:?} is write-only")]
	WriteOnly(SockOpt),

	#[error("option {0:?} is read-only")]
	ReadOnly(SockOpt),

	#[error("option {opt:?} expects a {expected} value")]
	TypeMismatch { opt: SockOpt, expected: &'static str },

	#[error("option {0:?} can only be set before bind")]
	AfterBind(SockOpt),

	#[error("option {0:?} can only be set before connect")]
	AfterConnect(SockOpt),
}

/// Maps a socket error to the closest std::io::ErrorKind.
fn socket_error_kind(err: &SocketError) -> std::io::ErrorKind {
	match err {
		SocketError::NoServer { .. } | SocketError::Rejected { .. } => {
			std::io::ErrorKind::ConnectionRefused
		}
		SocketError::NoConn | SocketError::Closed => std::io::ErrorKind::NotConnected,
		SocketError::ConnLost => std::io::ErrorKind::ConnectionReset,
		SocketError::Timeout => std::io::ErrorKind::TimedOut,
		SocketError::WouldBlock => std::io::ErrorKind::WouldBlock,
		SocketError::AddrInUse { .. } => std::io::ErrorKind::AddrInUse,
		SocketError::NotStarted => std::io::ErrorKind::Other,
		SocketError::UnboundSock
		| SocketError::NoListen
		| SocketError::LargeMsg { .. }
		| SocketError::Invalid { .. } => std::io::ErrorKind::InvalidInput,
	}
}

impl From<SocketError> for std::io::Error {
	fn from(err: SocketError) -> Self {
		std::io::Error::new(socket_error_kind(&err), err)
	}
}

impl From<OptionError> for std::io::Error {
	fn from(err: OptionError) -> Self {
		std::io::Error::new(std::io::ErrorKind::InvalidInput, err)
	}
}
