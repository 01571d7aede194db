//! In-process transport engine.
//!
//! Connections are loopback pairs over in-memory queues. All shared state
//! sits under one mutex; every blocking primitive waits on one condvar and
//! re-checks its entry after each wakeup, so a `close` (or the final
//! `cleanup`) from any thread promptly unblocks sleepers.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use super::{EpollEvents, EpollFlags, EpollHandle, Family, SockHandle, Stats, TransportEngine};
use crate::error::SocketError;
use crate::socket::{
	Boundary, KmState, MsgCtrl, OptionValue, RejectCode, RejectReason, SEQNO_NONE, SockOpt,
	SockStatus, Transtype,
};

const EPHEMERAL_BASE: u16 = 49152;
const DEFAULT_PAYLOAD_SIZE: i32 = 1316;
const DEFAULT_BUF_SIZE: i32 = 1024 * 1024;
const DEFAULT_CONN_TIMEO: i32 = 3000;

pub struct MemoryEngine {
	state: Mutex<EngineState>,
	wakeup: Condvar,
}

#[derive(Default)]
struct EngineState {
	started: usize,
	next_sock: i32,
	next_eid: i32,
	next_port: u16,
	socks: HashMap<i32, SockEntry>,
	/// Listening sockets indexed by bound address.
	listeners: HashMap<SocketAddr, i32>,
	/// Rendezvous callers indexed by their local address.
	pending_rdv: HashMap<SocketAddr, i32>,
	epolls: HashMap<i32, EpollEntry>,
}

struct SockEntry {
	family: Family,
	status: SockStatus,
	local: Option<SocketAddr>,
	peer: Option<SocketAddr>,
	peer_handle: Option<i32>,
	/// Connections accepted on a listener, not yet handed out.
	backlog: VecDeque<i32>,
	backlog_cap: usize,
	inbox: VecDeque<InboundMsg>,
	inbox_bytes: usize,
	opts: SockOpts,
	reject: Option<RejectReason>,
	/// Address a rendezvous caller expects its peer at.
	rdv_remote: Option<SocketAddr>,
	connected_at: Option<Instant>,
	next_seq: i64,
	next_msg_no: i64,
	stats: Stats,
}

impl SockEntry {
	fn new(family: Family) -> Self {
		Self {
			family,
			status: SockStatus::Init,
			local: None,
			peer: None,
			peer_handle: None,
			backlog: VecDeque::new(),
			backlog_cap: 0,
			inbox: VecDeque::new(),
			inbox_bytes: 0,
			opts: SockOpts::default(),
			reject: None,
			rdv_remote: None,
			connected_at: None,
			next_seq: 1,
			next_msg_no: 1,
			stats: Stats::default(),
		}
	}
}

struct InboundMsg {
	payload: Vec<u8>,
	/// Bytes already drained by byte-granular reads.
	offset: usize,
	pkt_seq: i64,
	msg_no: i64,
	boundary: Boundary,
	src_time: u64,
	expires: Option<Instant>,
}

/// Concrete option storage; the registry in the socket layer has already
/// checked direction, type and lifecycle constraints by the time a value
/// lands here.
#[derive(Clone)]
struct SockOpts {
	transtype: Transtype,
	rcv_syn: bool,
	snd_syn: bool,
	rcv_timeo: i32,
	snd_timeo: i32,
	conn_timeo: i32,
	max_bw: i64,
	stream_id: String,
	payload_size: i32,
	rcv_buf: i32,
	snd_buf: i32,
	reuse_addr: bool,
	km_state: KmState,
}

impl Default for SockOpts {
	fn default() -> Self {
		Self {
			transtype: Transtype::Live,
			rcv_syn: true,
			snd_syn: true,
			rcv_timeo: -1,
			snd_timeo: -1,
			conn_timeo: DEFAULT_CONN_TIMEO,
			max_bw: -1,
			stream_id: String::new(),
			payload_size: DEFAULT_PAYLOAD_SIZE,
			rcv_buf: DEFAULT_BUF_SIZE,
			snd_buf: DEFAULT_BUF_SIZE,
			reuse_addr: true,
			km_state: KmState::Unsecured,
		}
	}
}

struct EpollEntry {
	watch: HashMap<i32, EpollEvents>,
	flags: EpollFlags,
	/// Last conditions handed out, for edge-triggered delivery.
	reported: HashMap<i32, EpollEvents>,
}

fn now_micros() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_micros() as u64
}

/// Deadline for a millisecond timeout option; negative means "no deadline".
fn deadline_for(timeo_ms: i64) -> Option<Instant> {
	if timeo_ms < 0 { None } else { Some(Instant::now() + Duration::from_millis(timeo_ms as u64)) }
}

impl MemoryEngine {
	pub fn new() -> Self {
		Self { state: Mutex::new(EngineState::default()), wakeup: Condvar::new() }
	}

	fn alloc_port(st: &mut EngineState) -> u16 {
		if st.next_port < EPHEMERAL_BASE {
			st.next_port = EPHEMERAL_BASE;
		}
		let port = st.next_port;
		st.next_port = st.next_port.wrapping_add(1).max(EPHEMERAL_BASE);
		port
	}

	fn entry<'a>(st: &'a EngineState, sock: SockHandle) -> Result<&'a SockEntry, SocketError> {
		st.socks.get(&sock.0).ok_or(SocketError::Closed)
	}

	fn entry_mut<'a>(
		st: &'a mut EngineState,
		sock: SockHandle,
	) -> Result<&'a mut SockEntry, SocketError> {
		st.socks.get_mut(&sock.0).ok_or(SocketError::Closed)
	}

	/// Waits on the engine condvar, bounded by an optional deadline.
	/// Returns false when the deadline elapsed.
	fn sleep(&self, st: &mut parking_lot::MutexGuard<'_, EngineState>, deadline: Option<Instant>) -> bool {
		match deadline {
			None => {
				self.wakeup.wait(st);
				true
			}
			Some(d) => {
				if Instant::now() >= d {
					return false;
				}
				!self.wakeup.wait_until(st, d).timed_out()
			}
		}
	}

	/// Current readiness conditions of one watched handle.
	fn readiness(st: &EngineState, handle: i32) -> EpollEvents {
		let Some(entry) = st.socks.get(&handle) else {
			return EpollEvents::ERR;
		};
		let mut ev = EpollEvents::empty();
		// Expired messages never surface; recv drops them on its next pass.
		let now = Instant::now();
		let deliverable = entry.inbox.iter().any(|m| !m.expires.is_some_and(|e| e <= now));
		if deliverable || !entry.backlog.is_empty() {
			ev |= EpollEvents::IN;
		}
		if entry.status == SockStatus::Connected {
			ev |= EpollEvents::OUT;
		}
		if matches!(entry.status, SockStatus::Broken) || entry.status.is_closed() {
			ev |= EpollEvents::ERR;
		}
		ev
	}

	/// Drains up to `max` bytes across queued messages, FILE/STREAM style.
	fn drain_bytes(entry: &mut SockEntry, max: usize) -> Vec<u8> {
		let mut out = Vec::with_capacity(max.min(entry.inbox_bytes));
		while out.len() < max {
			let Some(front) = entry.inbox.front_mut() else { break };
			let avail = front.payload.len() - front.offset;
			let take = (max - out.len()).min(avail);
			out.extend_from_slice(&front.payload[front.offset..front.offset + take]);
			front.offset += take;
			if front.offset == front.payload.len() {
				entry.inbox.pop_front();
			}
		}
		entry.inbox_bytes -= out.len();
		out
	}
}

impl Default for MemoryEngine {
	fn default() -> Self {
		Self::new()
	}
}

impl TransportEngine for MemoryEngine {
	fn startup(&self) -> usize {
		let mut st = self.state.lock();
		st.started += 1;
		if st.started == 1 {
			info!("transport engine started");
		}
		st.started
	}

	fn cleanup(&self) -> usize {
		let mut st = self.state.lock();
		if st.started == 0 {
			return 0;
		}
		st.started -= 1;
		if st.started == 0 {
			let sockets = st.socks.len();
			*st = EngineState::default();
			info!(sockets, "transport engine released");
			// Sleepers re-check their entry and fail out.
			self.wakeup.notify_all();
		}
		st.started
	}

	fn create_socket(&self, family: Family) -> Result<SockHandle, SocketError> {
		let mut st = self.state.lock();
		if st.started == 0 {
			return Err(SocketError::NotStarted);
		}
		st.next_sock += 1;
		let handle = st.next_sock;
		st.socks.insert(handle, SockEntry::new(family));
		Ok(SockHandle(handle))
	}

	fn bind(&self, sock: SockHandle, mut addr: SocketAddr) -> Result<(), SocketError> {
		let mut st = self.state.lock();
		let entry = Self::entry(&st, sock)?;
		if entry.status != SockStatus::Init {
			return Err(SocketError::Invalid { reason: "socket is already bound" });
		}
		match (entry.family, addr) {
			(Family::Inet, SocketAddr::V4(_)) | (Family::Inet6, SocketAddr::V6(_)) => {}
			_ => return Err(SocketError::Invalid { reason: "address family mismatch" }),
		}
		let reuse = entry.opts.reuse_addr;
		if addr.port() == 0 {
			addr.set_port(Self::alloc_port(&mut st));
		} else {
			let taken = st.socks.iter().any(|(&h, e)| {
				h != sock.0
					&& e.local == Some(addr)
					&& !e.status.is_closed()
					&& !(reuse && e.opts.reuse_addr)
			});
			if taken {
				return Err(SocketError::AddrInUse { addr });
			}
		}
		let entry = Self::entry_mut(&mut st, sock)?;
		entry.local = Some(addr);
		entry.status = SockStatus::Opened;
		Ok(())
	}

	fn listen(&self, sock: SockHandle, backlog: usize) -> Result<(), SocketError> {
		let mut st = self.state.lock();
		let entry = Self::entry(&st, sock)?;
		match entry.status {
			SockStatus::Opened | SockStatus::Listening => {}
			SockStatus::Init => return Err(SocketError::UnboundSock),
			s if s.is_closed() => return Err(SocketError::Closed),
			_ => return Err(SocketError::Invalid { reason: "socket cannot listen in this state" }),
		}
		let addr = entry.local.ok_or(SocketError::UnboundSock)?;
		if let Some(&other) = st.listeners.get(&addr) {
			if other != sock.0 {
				return Err(SocketError::AddrInUse { addr });
			}
		}
		st.listeners.insert(addr, sock.0);
		let entry = Self::entry_mut(&mut st, sock)?;
		entry.status = SockStatus::Listening;
		entry.backlog_cap = backlog.max(1);
		debug!(%addr, backlog, "listening");
		Ok(())
	}

	fn connect(&self, sock: SockHandle, remote: SocketAddr) -> Result<(), SocketError> {
		let mut st = self.state.lock();
		let entry = Self::entry(&st, sock)?;
		match entry.status {
			SockStatus::Init | SockStatus::Opened => {}
			SockStatus::Connecting | SockStatus::Connected => {
				return Err(SocketError::Invalid { reason: "socket is already connected" });
			}
			SockStatus::Broken => return Err(SocketError::ConnLost),
			s if s.is_closed() => return Err(SocketError::Closed),
			_ => return Err(SocketError::Invalid { reason: "socket cannot connect in this state" }),
		}
		let own_local = entry.local;

		let Some(&listener_h) = st.listeners.get(&remote) else {
			// No handshake partner; the engine records the canonical
			// local diagnosis for an unanswered attempt.
			let entry = Self::entry_mut(&mut st, sock)?;
			entry.reject = Some(RejectReason::Internal(RejectCode::Timeout));
			return Err(SocketError::NoServer { addr: remote });
		};

		let listener = st.socks.get(&listener_h).ok_or(SocketError::NoServer { addr: remote })?;
		if listener.backlog.len() >= listener.backlog_cap {
			let reason =
				listener.reject.unwrap_or(RejectReason::Internal(RejectCode::Backlog));
			let entry = Self::entry_mut(&mut st, sock)?;
			entry.reject = Some(reason);
			return Err(SocketError::Rejected { reason });
		}
		let listener_opts = listener.opts.clone();
		let listener_family = listener.family;

		let local = match own_local {
			Some(addr) => addr,
			None => SocketAddr::new(remote.ip(), Self::alloc_port(&mut st)),
		};

		// Accepted-side entry, a brand-new independently owned socket.
		st.next_sock += 1;
		let accepted_h = st.next_sock;
		let mut accepted = SockEntry::new(listener_family);
		accepted.status = SockStatus::Connected;
		accepted.local = Some(remote);
		accepted.peer = Some(local);
		accepted.peer_handle = Some(sock.0);
		accepted.opts = listener_opts;
		accepted.connected_at = Some(Instant::now());
		st.socks.insert(accepted_h, accepted);

		let listener = Self::entry_mut(&mut st, SockHandle(listener_h))?;
		listener.backlog.push_back(accepted_h);

		let entry = Self::entry_mut(&mut st, sock)?;
		entry.status = SockStatus::Connected;
		entry.local = Some(local);
		entry.peer = Some(remote);
		entry.peer_handle = Some(accepted_h);
		entry.connected_at = Some(Instant::now());
		debug!(%local, %remote, "connected");
		self.wakeup.notify_all();
		Ok(())
	}

	fn rendezvous(
		&self,
		sock: SockHandle,
		local: SocketAddr,
		remote: SocketAddr,
	) -> Result<(), SocketError> {
		let mut st = self.state.lock();
		let entry = Self::entry(&st, sock)?;
		match entry.status {
			SockStatus::Init | SockStatus::Opened => {}
			SockStatus::Connecting | SockStatus::Connected => {
				return Err(SocketError::Invalid { reason: "socket is already connected" });
			}
			s if s.is_closed() => return Err(SocketError::Closed),
			_ => return Err(SocketError::Invalid { reason: "socket cannot connect in this state" }),
		}
		let conn_timeo = entry.opts.conn_timeo;
		let mut local = entry.local.unwrap_or(local);
		if local.port() == 0 {
			local.set_port(Self::alloc_port(&mut st));
		}

		// A matching caller may already be parked at our remote address.
		if let Some(&peer_h) = st.pending_rdv.get(&remote) {
			let matches = st
				.socks
				.get(&peer_h)
				.is_some_and(|p| p.rdv_remote == Some(local) && p.status == SockStatus::Connecting);
			if matches {
				st.pending_rdv.remove(&remote);
				let now = Instant::now();
				let peer = Self::entry_mut(&mut st, SockHandle(peer_h))?;
				peer.status = SockStatus::Connected;
				peer.peer = Some(local);
				peer.peer_handle = Some(sock.0);
				peer.rdv_remote = None;
				peer.connected_at = Some(now);
				let entry = Self::entry_mut(&mut st, sock)?;
				entry.status = SockStatus::Connected;
				entry.local = Some(local);
				entry.peer = Some(remote);
				entry.peer_handle = Some(peer_h);
				entry.connected_at = Some(now);
				debug!(%local, %remote, "rendezvous matched");
				self.wakeup.notify_all();
				return Ok(());
			}
		}

		let entry = Self::entry_mut(&mut st, sock)?;
		entry.status = SockStatus::Connecting;
		entry.local = Some(local);
		entry.rdv_remote = Some(remote);
		st.pending_rdv.insert(local, sock.0);

		let deadline = deadline_for(conn_timeo as i64);
		loop {
			let woke = self.sleep(&mut st, deadline);
			let Some(entry) = st.socks.get(&sock.0) else {
				st.pending_rdv.remove(&local);
				return Err(SocketError::Closed);
			};
			match entry.status {
				SockStatus::Connected => return Ok(()),
				s if s.is_closed() => {
					st.pending_rdv.remove(&local);
					return Err(SocketError::Closed);
				}
				_ => {}
			}
			if !woke {
				st.pending_rdv.remove(&local);
				let entry = Self::entry_mut(&mut st, sock)?;
				entry.status = SockStatus::Opened;
				entry.rdv_remote = None;
				entry.reject = Some(RejectReason::Internal(RejectCode::Timeout));
				return Err(SocketError::NoServer { addr: remote });
			}
		}
	}

	fn accept(&self, sock: SockHandle) -> Result<(SockHandle, SocketAddr), SocketError> {
		let mut st = self.state.lock();
		loop {
			let entry = Self::entry(&st, sock)?;
			match entry.status {
				SockStatus::Listening => {}
				s if s.is_closed() => return Err(SocketError::Closed),
				_ => return Err(SocketError::NoListen),
			}
			let rcv_syn = entry.opts.rcv_syn;
			let entry = Self::entry_mut(&mut st, sock)?;
			if let Some(accepted_h) = entry.backlog.pop_front() {
				let peer_addr = st
					.socks
					.get(&accepted_h)
					.and_then(|e| e.peer)
					.ok_or(SocketError::Invalid { reason: "accepted socket vanished" })?;
				debug!(%peer_addr, "accepted connection");
				return Ok((SockHandle(accepted_h), peer_addr));
			}
			if !rcv_syn {
				return Err(SocketError::WouldBlock);
			}
			self.sleep(&mut st, None);
		}
	}

	fn close(&self, sock: SockHandle) -> Result<(), SocketError> {
		let mut st = self.state.lock();
		let Some(entry) = st.socks.get_mut(&sock.0) else {
			return Ok(());
		};
		if entry.status.is_closed() {
			return Ok(());
		}
		entry.status = SockStatus::Closed;
		entry.inbox.clear();
		entry.inbox_bytes = 0;
		let local = entry.local;
		let peer_handle = entry.peer_handle;
		let pending: Vec<i32> = entry.backlog.drain(..).collect();
		if let Some(addr) = local {
			if st.listeners.get(&addr) == Some(&sock.0) {
				st.listeners.remove(&addr);
			}
			if st.pending_rdv.get(&addr) == Some(&sock.0) {
				st.pending_rdv.remove(&addr);
			}
		}
		// Never-accepted connections go down with the listener, and their
		// remote ends observe a break, not a close.
		let mut to_break: Vec<i32> = Vec::new();
		for h in pending {
			if let Some(e) = st.socks.get_mut(&h) {
				e.status = SockStatus::Closed;
				if let Some(ph) = e.peer_handle {
					to_break.push(ph);
				}
			}
		}
		if let Some(ph) = peer_handle {
			to_break.push(ph);
		}
		for h in to_break {
			if let Some(e) = st.socks.get_mut(&h) {
				if !e.status.is_closed() {
					e.status = SockStatus::Broken;
				}
			}
		}
		debug!(sock = sock.0, "closed");
		self.wakeup.notify_all();
		Ok(())
	}

	fn sock_status(&self, sock: SockHandle) -> SockStatus {
		let st = self.state.lock();
		st.socks.get(&sock.0).map_or(SockStatus::NonExist, |e| e.status)
	}

	fn local_addr(&self, sock: SockHandle) -> Option<SocketAddr> {
		let st = self.state.lock();
		st.socks.get(&sock.0).and_then(|e| e.local)
	}

	fn peer_addr(&self, sock: SockHandle) -> Option<SocketAddr> {
		let st = self.state.lock();
		st.socks.get(&sock.0).and_then(|e| e.peer)
	}

	fn get_option(&self, sock: SockHandle, opt: SockOpt) -> Result<OptionValue, SocketError> {
		let st = self.state.lock();
		let opts = &Self::entry(&st, sock)?.opts;
		Ok(match opt {
			SockOpt::Transtype => OptionValue::Transtype(opts.transtype),
			SockOpt::RcvSyn => OptionValue::Bool(opts.rcv_syn),
			SockOpt::SndSyn => OptionValue::Bool(opts.snd_syn),
			SockOpt::RcvTimeo => OptionValue::Int(opts.rcv_timeo),
			SockOpt::SndTimeo => OptionValue::Int(opts.snd_timeo),
			SockOpt::ConnTimeo => OptionValue::Int(opts.conn_timeo),
			SockOpt::MaxBw => OptionValue::Int64(opts.max_bw),
			SockOpt::StreamId => OptionValue::Str(opts.stream_id.clone()),
			SockOpt::PayloadSize => OptionValue::Int(opts.payload_size),
			SockOpt::RcvBuf => OptionValue::Int(opts.rcv_buf),
			SockOpt::SndBuf => OptionValue::Int(opts.snd_buf),
			SockOpt::ReuseAddr => OptionValue::Bool(opts.reuse_addr),
			SockOpt::RcvKmState => OptionValue::KmState(opts.km_state),
		})
	}

	fn set_option(
		&self,
		sock: SockHandle,
		opt: SockOpt,
		value: OptionValue,
	) -> Result<(), SocketError> {
		let mut st = self.state.lock();
		let opts = &mut Self::entry_mut(&mut st, sock)?.opts;
		match (opt, value) {
			(SockOpt::Transtype, OptionValue::Transtype(v)) => opts.transtype = v,
			(SockOpt::RcvSyn, OptionValue::Bool(v)) => opts.rcv_syn = v,
			(SockOpt::SndSyn, OptionValue::Bool(v)) => opts.snd_syn = v,
			(SockOpt::RcvTimeo, OptionValue::Int(v)) => opts.rcv_timeo = v,
			(SockOpt::SndTimeo, OptionValue::Int(v)) => opts.snd_timeo = v,
			(SockOpt::ConnTimeo, OptionValue::Int(v)) => opts.conn_timeo = v,
			(SockOpt::MaxBw, OptionValue::Int64(v)) => opts.max_bw = v,
			(SockOpt::StreamId, OptionValue::Str(v)) => opts.stream_id = v,
			(SockOpt::PayloadSize, OptionValue::Int(v)) if v > 0 => opts.payload_size = v,
			(SockOpt::RcvBuf, OptionValue::Int(v)) if v > 0 => opts.rcv_buf = v,
			(SockOpt::SndBuf, OptionValue::Int(v)) if v > 0 => opts.snd_buf = v,
			(SockOpt::ReuseAddr, OptionValue::Bool(v)) => opts.reuse_addr = v,
			_ => return Err(SocketError::Invalid { reason: "unsupported option value" }),
		}
		Ok(())
	}

	fn send(&self, sock: SockHandle, payload: &[u8], ctrl: &MsgCtrl) -> Result<usize, SocketError> {
		if payload.is_empty() {
			return Ok(0);
		}
		let mut st = self.state.lock();
		let entry = Self::entry(&st, sock)?;
		let (transtype, payload_size, snd_syn, snd_timeo) = (
			entry.opts.transtype,
			entry.opts.payload_size as usize,
			entry.opts.snd_syn,
			entry.opts.snd_timeo,
		);
		if transtype == Transtype::Live && payload.len() > payload_size {
			return Err(SocketError::LargeMsg { need: payload.len(), len: payload_size });
		}
		let deadline = deadline_for(snd_timeo as i64);
		loop {
			let entry = Self::entry(&st, sock)?;
			match entry.status {
				SockStatus::Connected => {}
				SockStatus::Broken => return Err(SocketError::ConnLost),
				s if s.is_closed() => return Err(SocketError::Closed),
				_ => return Err(SocketError::NoConn),
			}
			let peer_h = entry.peer_handle.ok_or(SocketError::NoConn)?;
			let Some(peer) = st.socks.get(&peer_h) else {
				Self::entry_mut(&mut st, sock)?.status = SockStatus::Broken;
				return Err(SocketError::ConnLost);
			};
			if peer.status.is_closed() {
				Self::entry_mut(&mut st, sock)?.status = SockStatus::Broken;
				return Err(SocketError::ConnLost);
			}
			let room = peer.inbox.is_empty()
				|| peer.inbox_bytes + payload.len() <= peer.opts.rcv_buf as usize;
			if room {
				break;
			}
			if !snd_syn {
				return Err(SocketError::WouldBlock);
			}
			if !self.sleep(&mut st, deadline) {
				return Err(SocketError::Timeout);
			}
		}

		let entry = Self::entry_mut(&mut st, sock)?;
		let pkt_seq = if ctrl.pkt_seq != SEQNO_NONE {
			ctrl.pkt_seq
		} else {
			let seq = entry.next_seq;
			entry.next_seq += 1;
			seq
		};
		let msg_no = if ctrl.msg_no != SEQNO_NONE {
			ctrl.msg_no
		} else {
			let no = entry.next_msg_no;
			entry.next_msg_no += 1;
			no
		};
		let boundary = if transtype == Transtype::Live && ctrl.boundary == Boundary::None {
			Boundary::Solo
		} else {
			ctrl.boundary
		};
		entry.stats.msgs_sent += 1;
		entry.stats.bytes_sent += payload.len() as u64;
		let peer_h = entry.peer_handle.ok_or(SocketError::NoConn)?;

		let msg = InboundMsg {
			payload: payload.to_vec(),
			offset: 0,
			pkt_seq,
			msg_no,
			boundary,
			src_time: ctrl.src_time.unwrap_or_else(now_micros),
			expires: ctrl
				.ttl_ms
				.filter(|ttl| *ttl >= 0)
				.map(|ttl| Instant::now() + Duration::from_millis(ttl as u64)),
		};
		let peer = Self::entry_mut(&mut st, SockHandle(peer_h))?;
		peer.inbox_bytes += payload.len();
		peer.inbox.push_back(msg);
		self.wakeup.notify_all();
		Ok(payload.len())
	}

	fn recv(
		&self,
		sock: SockHandle,
		max_len: usize,
		ctrl: &mut MsgCtrl,
	) -> Result<Vec<u8>, SocketError> {
		if max_len == 0 {
			return Ok(Vec::new());
		}
		let mut st = self.state.lock();
		let mut deadline = None;
		let mut deadline_armed = false;
		loop {
			let entry = Self::entry_mut(&mut st, sock)?;
			let transtype = entry.opts.transtype;
			if !deadline_armed {
				deadline = deadline_for(entry.opts.rcv_timeo as i64);
				deadline_armed = true;
			}

			// Expired LIVE messages are dropped, never delivered late.
			if transtype == Transtype::Live {
				let now = Instant::now();
				let mut dropped_any = false;
				while entry
					.inbox
					.front()
					.is_some_and(|m| m.expires.is_some_and(|e| e <= now))
				{
					if let Some(m) = entry.inbox.pop_front() {
						entry.inbox_bytes -= m.payload.len() - m.offset;
						dropped_any = true;
					}
				}
				if dropped_any {
					self.wakeup.notify_all();
				}
			}

			if !entry.inbox.is_empty() {
				return match transtype {
					Transtype::Live => {
						let need = entry.inbox.front().map_or(0, |m| m.payload.len());
						if need > max_len {
							return Err(SocketError::LargeMsg { need, len: max_len });
						}
						let msg = entry
							.inbox
							.pop_front()
							.ok_or(SocketError::Invalid { reason: "inbox emptied underfoot" })?;
						entry.inbox_bytes -= msg.payload.len();
						entry.stats.msgs_received += 1;
						entry.stats.bytes_received += msg.payload.len() as u64;
						ctrl.pkt_seq = msg.pkt_seq;
						ctrl.msg_no = msg.msg_no;
						ctrl.boundary = msg.boundary;
						ctrl.src_time = Some(msg.src_time);
						ctrl.dst_time = Some(now_micros());
						// Room appeared; senders parked on backpressure re-check.
						self.wakeup.notify_all();
						Ok(msg.payload)
					}
					Transtype::File | Transtype::Stream => {
						let front = entry.inbox.front();
						ctrl.pkt_seq = front.map_or(SEQNO_NONE, |m| m.pkt_seq);
						ctrl.msg_no = front.map_or(SEQNO_NONE, |m| m.msg_no);
						ctrl.boundary = Boundary::None;
						ctrl.src_time = front.map(|m| m.src_time);
						ctrl.dst_time = Some(now_micros());
						let out = Self::drain_bytes(entry, max_len);
						entry.stats.msgs_received += 1;
						entry.stats.bytes_received += out.len() as u64;
						self.wakeup.notify_all();
						Ok(out)
					}
				};
			}

			match entry.status {
				SockStatus::Connected => {}
				SockStatus::Broken => return Err(SocketError::ConnLost),
				s if s.is_closed() => return Err(SocketError::Closed),
				_ => return Err(SocketError::NoConn),
			}
			if !entry.opts.rcv_syn {
				return Err(SocketError::WouldBlock);
			}
			if !self.sleep(&mut st, deadline) {
				return Err(SocketError::Timeout);
			}
		}
	}

	fn reject_reason(&self, sock: SockHandle) -> RejectReason {
		let st = self.state.lock();
		st.socks
			.get(&sock.0)
			.and_then(|e| e.reject)
			.unwrap_or_default()
	}

	fn set_reject_reason(&self, sock: SockHandle, reason: RejectReason) -> Result<(), SocketError> {
		let mut st = self.state.lock();
		Self::entry_mut(&mut st, sock)?.reject = Some(reason);
		Ok(())
	}

	fn connection_time(&self, sock: SockHandle) -> u64 {
		let st = self.state.lock();
		st.socks
			.get(&sock.0)
			.and_then(|e| e.connected_at)
			.map_or(0, |t| t.elapsed().as_millis() as u64)
	}

	fn stats(&self, sock: SockHandle, clear: bool) -> Result<Stats, SocketError> {
		let mut st = self.state.lock();
		let entry = Self::entry_mut(&mut st, sock)?;
		let snapshot = Stats { bytes_rcv_queue: entry.inbox_bytes as u64, ..entry.stats };
		if clear {
			entry.stats = Stats::default();
		}
		Ok(snapshot)
	}

	fn epoll_create(&self) -> Result<EpollHandle, SocketError> {
		let mut st = self.state.lock();
		if st.started == 0 {
			return Err(SocketError::NotStarted);
		}
		st.next_eid += 1;
		let eid = st.next_eid;
		st.epolls.insert(
			eid,
			EpollEntry {
				watch: HashMap::new(),
				flags: EpollFlags::default(),
				reported: HashMap::new(),
			},
		);
		debug!(eid, "epoll created");
		Ok(EpollHandle(eid))
	}

	fn epoll_add(
		&self,
		eid: EpollHandle,
		sock: SockHandle,
		events: EpollEvents,
	) -> Result<(), SocketError> {
		let mut st = self.state.lock();
		if !st.socks.contains_key(&sock.0) {
			return Err(SocketError::Invalid { reason: "unknown socket" });
		}
		let ep = st.epolls.get_mut(&eid.0).ok_or(SocketError::Invalid { reason: "unknown epoll" })?;
		if ep.watch.contains_key(&sock.0) {
			return Err(SocketError::Invalid { reason: "socket already watched" });
		}
		ep.watch.insert(sock.0, events);
		self.wakeup.notify_all();
		Ok(())
	}

	fn epoll_update(
		&self,
		eid: EpollHandle,
		sock: SockHandle,
		events: EpollEvents,
	) -> Result<(), SocketError> {
		let mut st = self.state.lock();
		let ep = st.epolls.get_mut(&eid.0).ok_or(SocketError::Invalid { reason: "unknown epoll" })?;
		let slot = ep
			.watch
			.get_mut(&sock.0)
			.ok_or(SocketError::Invalid { reason: "socket not watched" })?;
		*slot = events;
		ep.reported.remove(&sock.0);
		self.wakeup.notify_all();
		Ok(())
	}

	fn epoll_remove(&self, eid: EpollHandle, sock: SockHandle) -> Result<(), SocketError> {
		let mut st = self.state.lock();
		let ep = st.epolls.get_mut(&eid.0).ok_or(SocketError::Invalid { reason: "unknown epoll" })?;
		ep.watch
			.remove(&sock.0)
			.ok_or(SocketError::Invalid { reason: "socket not watched" })?;
		ep.reported.remove(&sock.0);
		Ok(())
	}

	fn epoll_wait(
		&self,
		eid: EpollHandle,
		timeout_ms: i64,
	) -> Result<Vec<(SockHandle, EpollEvents)>, SocketError> {
		let mut st = self.state.lock();
		let deadline = deadline_for(timeout_ms);
		loop {
			let ep = st.epolls.get(&eid.0).ok_or(SocketError::Invalid { reason: "unknown epoll" })?;
			if ep.watch.is_empty() && ep.flags.contains(EpollFlags::STRICT_EMPTY) {
				return Err(SocketError::Invalid { reason: "epoll watch set is empty" });
			}
			let edge = ep.flags.contains(EpollFlags::EDGE_TRIGGERED);
			let watched: Vec<(i32, EpollEvents)> =
				ep.watch.iter().map(|(&h, &m)| (h, m)).collect();

			let mut ready = Vec::new();
			for (handle, mask) in watched {
				let current = Self::readiness(&st, handle) & (mask | EpollEvents::ERR);
				let ep = st
					.epolls
					.get_mut(&eid.0)
					.ok_or(SocketError::Invalid { reason: "unknown epoll" })?;
				let observed = if edge {
					let prev = ep.reported.get(&handle).copied().unwrap_or(EpollEvents::empty());
					ep.reported.insert(handle, current);
					current & !prev
				} else {
					current
				};
				if !observed.is_empty() {
					ready.push((SockHandle(handle), observed));
				}
			}
			if !ready.is_empty() {
				return Ok(ready);
			}
			if !self.sleep(&mut st, deadline) {
				return Ok(Vec::new());
			}
		}
	}

	fn epoll_set_flags(&self, eid: EpollHandle, flags: EpollFlags) -> Result<EpollFlags, SocketError> {
		let mut st = self.state.lock();
		let ep = st.epolls.get_mut(&eid.0).ok_or(SocketError::Invalid { reason: "unknown epoll" })?;
		let previous = ep.flags;
		ep.flags = flags;
		if !flags.contains(EpollFlags::EDGE_TRIGGERED) {
			ep.reported.clear();
		}
		Ok(previous)
	}

	fn epoll_flags(&self, eid: EpollHandle) -> Result<EpollFlags, SocketError> {
		let st = self.state.lock();
		st.epolls
			.get(&eid.0)
			.map(|ep| ep.flags)
			.ok_or(SocketError::Invalid { reason: "unknown epoll" })
	}

	fn epoll_release(&self, eid: EpollHandle) -> Result<(), SocketError> {
		let mut st = self.state.lock();
		if st.epolls.remove(&eid.0).is_some() {
			debug!(eid = eid.0, "epoll released");
			self.wakeup.notify_all();
		}
		Ok(())
	}
}
