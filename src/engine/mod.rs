//! The transport engine capability surface.
//!
//! The core consumes the engine through [`TransportEngine`]; it never sees
//! how connections, retransmission or congestion are implemented. The crate
//! ships one implementation, the in-process [`MemoryEngine`], which is both
//! the default engine and the substitute used by the test suites.

mod memory;

pub use self::memory::MemoryEngine;

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use crate::error::SocketError;
use crate::socket::{MsgCtrl, OptionValue, RejectReason, SockOpt, SockStatus};

/// Opaque engine-assigned socket identifier.
///
/// Never exposed as a raw value; applications only hold [`crate::Socket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SockHandle(pub(crate) i32);

/// Opaque engine-assigned multiplexer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EpollHandle(pub(crate) i32);

/// Address family a socket is created for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Family {
	#[default]
	Inet,
	Inet6,
}

bitflags::bitflags! {
	/// Readiness conditions a watched socket can be subscribed for.
	///
	/// `ERR` is always reported when raised, whether subscribed or not.
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct EpollEvents: u32 {
		/// Readable: data or a pending connection is available.
		const IN = 0x1;
		/// Writable: a send would not block.
		const OUT = 0x4;
		/// Broken, closed or vanished.
		const ERR = 0x8;
	}
}

bitflags::bitflags! {
	/// Behavior switches of one multiplexer instance.
	#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
	pub struct EpollFlags: u32 {
		/// Report each readiness condition once per raising edge instead of
		/// as long as it holds.
		const EDGE_TRIGGERED = 0x1;
		/// Fail `wait` calls issued against an empty watch set instead of
		/// treating them as a plain timeout.
		const STRICT_EMPTY = 0x2;
	}
}

/// Point-in-time traffic counters for one socket.
///
/// Cumulative counters reset when a snapshot is taken with `clear`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
	pub msgs_sent: u64,
	pub msgs_received: u64,
	pub bytes_sent: u64,
	pub bytes_received: u64,
	/// Bytes currently queued for receive. Instantaneous gauge.
	pub bytes_rcv_queue: u64,
}

/// The connection-oriented, message-aware reliable transport engine.
///
/// Consumed, not reimplemented: the core calls these primitives and
/// translates their failures; everything behind them is the engine's
/// business. Implementations must be safe to call from many threads, and
/// `close` must promptly unblock callers waiting in `accept`, `recv`, `send`
/// or a rendezvous on the same handle.
pub trait TransportEngine: Send + Sync {
	/// Increments the process-wide initialization count.
	fn startup(&self) -> usize;
	/// Decrements the initialization count; the drop to zero releases all
	/// engine resources. Calls at zero are no-ops.
	fn cleanup(&self) -> usize;

	fn create_socket(&self, family: Family) -> Result<SockHandle, SocketError>;
	fn bind(&self, sock: SockHandle, addr: SocketAddr) -> Result<(), SocketError>;
	fn listen(&self, sock: SockHandle, backlog: usize) -> Result<(), SocketError>;
	fn connect(&self, sock: SockHandle, remote: SocketAddr) -> Result<(), SocketError>;
	fn rendezvous(
		&self,
		sock: SockHandle,
		local: SocketAddr,
		remote: SocketAddr,
	) -> Result<(), SocketError>;
	fn accept(&self, sock: SockHandle) -> Result<(SockHandle, SocketAddr), SocketError>;
	fn close(&self, sock: SockHandle) -> Result<(), SocketError>;

	fn sock_status(&self, sock: SockHandle) -> SockStatus;
	fn local_addr(&self, sock: SockHandle) -> Option<SocketAddr>;
	fn peer_addr(&self, sock: SockHandle) -> Option<SocketAddr>;

	fn get_option(&self, sock: SockHandle, opt: SockOpt) -> Result<OptionValue, SocketError>;
	fn set_option(
		&self,
		sock: SockHandle,
		opt: SockOpt,
		value: OptionValue,
	) -> Result<(), SocketError>;

	fn send(&self, sock: SockHandle, payload: &[u8], ctrl: &MsgCtrl) -> Result<usize, SocketError>;
	fn recv(
		&self,
		sock: SockHandle,
		max_len: usize,
		ctrl: &mut MsgCtrl,
	) -> Result<Vec<u8>, SocketError>;

	fn reject_reason(&self, sock: SockHandle) -> RejectReason;
	fn set_reject_reason(&self, sock: SockHandle, reason: RejectReason) -> Result<(), SocketError>;

	/// Milliseconds since the connection was established; 0 when not connected.
	fn connection_time(&self, sock: SockHandle) -> u64;
	fn stats(&self, sock: SockHandle, clear: bool) -> Result<Stats, SocketError>;

	fn epoll_create(&self) -> Result<EpollHandle, SocketError>;
	fn epoll_add(
		&self,
		eid: EpollHandle,
		sock: SockHandle,
		events: EpollEvents,
	) -> Result<(), SocketError>;
	fn epoll_update(
		&self,
		eid: EpollHandle,
		sock: SockHandle,
		events: EpollEvents,
	) -> Result<(), SocketError>;
	fn epoll_remove(&self, eid: EpollHandle, sock: SockHandle) -> Result<(), SocketError>;
	/// Blocks until a watched socket raises a subscribed condition.
	///
	/// `timeout_ms < 0` blocks indefinitely, `0` returns immediately, `> 0`
	/// waits at most that many milliseconds. An elapsed timeout yields an
	/// empty vec, not an error.
	fn epoll_wait(
		&self,
		eid: EpollHandle,
		timeout_ms: i64,
	) -> Result<Vec<(SockHandle, EpollEvents)>, SocketError>;
	fn epoll_set_flags(&self, eid: EpollHandle, flags: EpollFlags) -> Result<EpollFlags, SocketError>;
	fn epoll_flags(&self, eid: EpollHandle) -> Result<EpollFlags, SocketError>;
	fn epoll_release(&self, eid: EpollHandle) -> Result<(), SocketError>;
}

static GLOBAL: OnceLock<Arc<MemoryEngine>> = OnceLock::new();

/// The process-wide default engine.
pub(crate) fn global() -> Arc<dyn TransportEngine> {
	GLOBAL.get_or_init(|| Arc::new(MemoryEngine::new())).clone()
}

/// Initializes the process-wide engine, returning the new reference count.
///
/// Counted and idempotent: every consumer pairs a `startup` with a
/// [`cleanup`]; only the last teardown actually releases engine resources.
pub fn startup() -> usize {
	global().startup()
}

/// Releases one engine reference, returning the remaining count.
///
/// The drop to zero closes every socket and multiplexer the engine still
/// tracks. Calling at zero is a no-op.
pub fn cleanup() -> usize {
	global().cleanup()
}
