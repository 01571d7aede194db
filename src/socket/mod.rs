mod msgctrl;
mod options;
mod reject;
mod state;
mod stream;

pub use self::msgctrl::{Boundary, MsgCtrl, SEQNO_NONE};
pub use self::options::{
	BindConstraint, Direction, KmState, OptionDescriptor, OptionValue, SockOpt, Transtype,
	ValueType,
};
pub use self::reject::{REJC_PREDEFINED, REJC_USERDEFINED, RejectCode, RejectReason};
pub use self::state::SockStatus;
pub use self::stream::{InputStream, OutputStream};

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use self::state::{Op, admit};
use crate::engine::{self, Family, SockHandle, Stats, TransportEngine};
use crate::error::{OptionError, SocketError};

/// A connection-oriented, message-aware socket.
///
/// Owns one engine handle for its whole life; the handle is never exposed,
/// all access goes through methods. Every blocking call runs on the calling
/// thread; `close` from any thread promptly unblocks them.
pub struct Socket {
	engine: Arc<dyn TransportEngine>,
	sock: SockHandle,
}

impl Socket {
	/// Creates an IPv4 socket on the process-wide engine.
	///
	/// Fails until [`crate::startup`] has been called at least once.
	pub fn new() -> Result<Self, SocketError> {
		Self::with_family(Family::Inet)
	}

	/// Creates a socket for the given address family.
	pub fn with_family(family: Family) -> Result<Self, SocketError> {
		Self::with_engine(engine::global(), family)
	}

	/// Creates a socket on a caller-supplied engine.
	///
	/// The seam for substituting a fake or alternative transport.
	pub fn with_engine(
		engine: Arc<dyn TransportEngine>,
		family: Family,
	) -> Result<Self, SocketError> {
		let sock = engine.create_socket(family)?;
		Ok(Self { engine, sock })
	}

	fn from_parts(engine: Arc<dyn TransportEngine>, sock: SockHandle) -> Self {
		Self { engine, sock }
	}

	pub(crate) fn handle(&self) -> SockHandle {
		self.sock
	}

	/// Current lifecycle state as the engine reports it.
	pub fn status(&self) -> SockStatus {
		self.engine.sock_status(self.sock)
	}

	/// Whether a bind has succeeded on this socket.
	pub fn is_bound(&self) -> bool {
		self.engine.local_addr(self.sock).is_some()
	}

	/// Whether the socket has been closed (or its handle released).
	pub fn is_close(&self) -> bool {
		self.status().is_closed()
	}

	pub fn is_connected(&self) -> bool {
		self.status() == SockStatus::Connected
	}

	/// The bound local address, absent until `bind` has occurred.
	pub fn sock_name(&self) -> Option<SocketAddr> {
		self.engine.local_addr(self.sock)
	}

	/// The peer address, absent until connected.
	pub fn peer_name(&self) -> Option<SocketAddr> {
		self.engine.peer_addr(self.sock)
	}

	/// Binds to a local address; INIT → OPENED on success.
	pub fn bind(&self, address: IpAddr, port: u16) -> Result<(), SocketError> {
		admit(self.status(), Op::Bind)?;
		self.engine.bind(self.sock, SocketAddr::new(address, port))
	}

	/// Starts accepting connections; fails with `UnboundSock` before bind.
	pub fn listen(&self, backlog: usize) -> Result<(), SocketError> {
		admit(self.status(), Op::Listen)?;
		self.engine.listen(self.sock, backlog)
	}

	/// Connects to a listening peer.
	///
	/// An unanswered attempt records `Internal(Timeout)` as the reject
	/// reason and fails with `NoServer`.
	pub fn connect(&self, address: IpAddr, port: u16) -> Result<(), SocketError> {
		admit(self.status(), Op::Connect)?;
		self.engine.connect(self.sock, SocketAddr::new(address, port))
	}

	/// Connects simultaneously with a peer doing the same, no listener on
	/// either side. Both parties use the same port.
	pub fn rendezvous(
		&self,
		local_address: IpAddr,
		remote_address: IpAddr,
		port: u16,
	) -> Result<(), SocketError> {
		admit(self.status(), Op::Connect)?;
		self.engine.rendezvous(
			self.sock,
			SocketAddr::new(local_address, port),
			SocketAddr::new(remote_address, port),
		)
	}

	/// Takes the next pending connection, blocking until one arrives.
	///
	/// Returns a brand-new, independently owned socket and the resolved
	/// peer address. Fails with `NoListen` outside the LISTENING state.
	pub fn accept(&self) -> Result<(Socket, SocketAddr), SocketError> {
		admit(self.status(), Op::Accept)?;
		let (sock, peer) = self.engine.accept(self.sock)?;
		Ok((Socket::from_parts(self.engine.clone(), sock), peer))
	}

	/// Closes the socket. Idempotent; a second close is a no-op.
	///
	/// Any thread blocked in a read/write/connect/accept on this socket
	/// unblocks promptly and observes a connection-kind failure.
	pub fn close(&self) -> Result<(), SocketError> {
		self.engine.close(self.sock)
	}

	/// Reads an option, consulting the registry first.
	///
	/// Reading a write-only option fails before the engine is reached; the
	/// returned variant matches the option's declared value type.
	pub fn get_option(&self, opt: SockOpt) -> std::io::Result<OptionValue> {
		opt.check_get()?;
		Ok(self.engine.get_option(self.sock, opt)?)
	}

	/// Writes an option, consulting the registry first.
	///
	/// Direction, value type and lifecycle constraint are all checked
	/// before the engine sees the value.
	pub fn set_option(&self, opt: SockOpt, value: OptionValue) -> std::io::Result<()> {
		opt.check_set(&value, self.status())?;
		Ok(self.engine.set_option(self.sock, opt, value)?)
	}

	pub fn receive_buffer_size(&self) -> std::io::Result<i32> {
		expect_int(SockOpt::RcvBuf, self.get_option(SockOpt::RcvBuf)?)
	}

	pub fn set_receive_buffer_size(&self, bytes: i32) -> std::io::Result<()> {
		self.set_option(SockOpt::RcvBuf, OptionValue::Int(bytes))
	}

	pub fn send_buffer_size(&self) -> std::io::Result<i32> {
		expect_int(SockOpt::SndBuf, self.get_option(SockOpt::SndBuf)?)
	}

	pub fn set_send_buffer_size(&self, bytes: i32) -> std::io::Result<()> {
		self.set_option(SockOpt::SndBuf, OptionValue::Int(bytes))
	}

	pub fn reuse_address(&self) -> std::io::Result<bool> {
		expect_bool(SockOpt::ReuseAddr, self.get_option(SockOpt::ReuseAddr)?)
	}

	pub fn set_reuse_address(&self, reuse: bool) -> std::io::Result<()> {
		self.set_option(SockOpt::ReuseAddr, OptionValue::Bool(reuse))
	}

	/// The last reject reason recorded for this socket.
	///
	/// Defaults to `Internal(Unknown)` when nothing has been recorded.
	pub fn reject_reason(&self) -> RejectReason {
		self.engine.reject_reason(self.sock)
	}

	/// Assigns the reason the next refused connection attempt surfaces to
	/// its peer. Internal and out-of-range codes are not assignable.
	pub fn set_reject_reason(&self, reason: RejectReason) -> Result<(), SocketError> {
		reason.check_assignable()?;
		self.engine.set_reject_reason(self.sock, reason)
	}

	/// Sends one payload with default message control.
	///
	/// In LIVE mode the payload is one message and must fit PAYLOADSIZE;
	/// in FILE/STREAM mode it is appended to the byte sequence.
	pub fn send(&self, payload: &[u8]) -> Result<usize, SocketError> {
		self.send_with(payload, &MsgCtrl::default())
	}

	/// Sends one payload with explicit message control.
	pub fn send_with(&self, payload: &[u8], ctrl: &MsgCtrl) -> Result<usize, SocketError> {
		admit(self.status(), Op::Send)?;
		self.engine.send(self.sock, payload, ctrl)
	}

	/// Receives up to `max_len` bytes.
	///
	/// In LIVE mode this is exactly one message, which must fit in
	/// `max_len`; in FILE/STREAM mode it is the next bytes in order.
	/// Blocks until data, peer close, receive timeout, or local close.
	pub fn recv(&self, max_len: usize) -> Result<Vec<u8>, SocketError> {
		self.recv_with(max_len, &mut MsgCtrl::default())
	}

	/// Receives with message control; the engine fills `ctrl` with the
	/// observed sequence numbers, boundary and timestamps.
	pub fn recv_with(&self, max_len: usize, ctrl: &mut MsgCtrl) -> Result<Vec<u8>, SocketError> {
		admit(self.status(), Op::Recv)?;
		self.engine.recv(self.sock, max_len, ctrl)
	}

	/// Streams a file over the connection, returning the bytes sent.
	pub fn send_file(&self, path: &Path) -> std::io::Result<u64> {
		admit(self.status(), Op::Send)?;
		let chunk = self.payload_chunk()?;
		let mut file = File::open(path)?;
		let mut buf = vec![0u8; chunk];
		let mut total = 0u64;
		loop {
			let n = file.read(&mut buf)?;
			if n == 0 {
				break;
			}
			self.send(&buf[..n])?;
			total += n as u64;
		}
		debug!(total, "file sent");
		Ok(total)
	}

	/// Receives exactly `size` bytes into a file at `offset`, returning
	/// the bytes written.
	pub fn recv_file(&self, path: &Path, offset: u64, size: u64) -> std::io::Result<u64> {
		admit(self.status(), Op::Recv)?;
		let chunk = self.payload_chunk()?;
		let mut file = OpenOptions::new().create(true).write(true).open(path)?;
		file.seek(SeekFrom::Start(offset))?;
		let mut remaining = size;
		while remaining > 0 {
			let want = chunk.min(remaining as usize);
			let data = self.recv(want)?;
			file.write_all(&data)?;
			remaining -= data.len() as u64;
		}
		file.flush()?;
		Ok(size - remaining)
	}

	fn payload_chunk(&self) -> std::io::Result<usize> {
		let size = expect_int(SockOpt::PayloadSize, self.get_option(SockOpt::PayloadSize)?)?;
		Ok(size.max(1) as usize)
	}

	/// Cumulative traffic counters; `clear` resets them after snapshotting.
	pub fn bstats(&self, clear: bool) -> Result<Stats, SocketError> {
		self.engine.stats(self.sock, clear)
	}

	/// Like [`Self::bstats`]; with `instantaneous` only the point-in-time
	/// gauges are reported and the cumulative counters read zero.
	pub fn bistats(&self, clear: bool, instantaneous: bool) -> Result<Stats, SocketError> {
		let stats = self.engine.stats(self.sock, clear)?;
		if instantaneous {
			return Ok(Stats { bytes_rcv_queue: stats.bytes_rcv_queue, ..Stats::default() });
		}
		Ok(stats)
	}

	/// Milliseconds since the connection was established; 0 when not
	/// connected.
	pub fn connection_time(&self) -> u64 {
		self.engine.connection_time(self.sock)
	}

	/// A blocking byte reader over this socket.
	pub fn input_stream(&self) -> InputStream<'_> {
		InputStream::new(self)
	}

	/// A blocking byte writer over this socket.
	pub fn output_stream(&self) -> OutputStream<'_> {
		OutputStream::new(self)
	}
}

impl Drop for Socket {
	fn drop(&mut self) {
		let _ = self.engine.close(self.sock);
	}
}

impl std::fmt::Debug for Socket {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Socket")
			.field("status", &self.status())
			.field("local", &self.sock_name())
			.field("peer", &self.peer_name())
			.finish()
	}
}

fn expect_int(opt: SockOpt, value: OptionValue) -> std::io::Result<i32> {
	match value {
		OptionValue::Int(v) => Ok(v),
		_ => Err(OptionError::TypeMismatch { opt, expected: "i32" }.into()),
	}
}

fn expect_bool(opt: SockOpt, value: OptionValue) -> std::io::Result<bool> {
	match value {
		OptionValue::Bool(v) => Ok(v),
		_ => Err(OptionError::TypeMismatch { opt, expected: "bool" }.into()),
	}
}
