//! Readiness multiplexing over many sockets.
//!
//! An [`Epoll`] holds a non-owning watch set: watched sockets stay owned by
//! the caller, and releasing the multiplexer never closes any of them.

use std::sync::Arc;

use crate::engine::{self, EpollEvents, EpollFlags, EpollHandle, TransportEngine};
use crate::error::SocketError;
use crate::socket::Socket;

/// A readiness multiplexer over registered sockets.
pub struct Epoll {
	engine: Arc<dyn TransportEngine>,
	eid: EpollHandle,
}

impl Epoll {
	/// Creates a multiplexer on the process-wide engine.
	pub fn new() -> Result<Self, SocketError> {
		Self::with_engine(engine::global())
	}

	/// Creates a multiplexer on a caller-supplied engine.
	///
	/// Sockets registered later must live on the same engine.
	pub fn with_engine(engine: Arc<dyn TransportEngine>) -> Result<Self, SocketError> {
		let eid = engine.epoll_create()?;
		Ok(Self { engine, eid })
	}

	/// Registers a socket for the given event mask.
	///
	/// Error conditions are always reported for registered sockets, whatever
	/// the mask says.
	pub fn add_usock(&self, socket: &Socket, events: EpollEvents) -> Result<(), SocketError> {
		self.engine.epoll_add(self.eid, socket.handle(), events)
	}

	/// Replaces the event mask of an already registered socket.
	pub fn update_usock(&self, socket: &Socket, events: EpollEvents) -> Result<(), SocketError> {
		self.engine.epoll_update(self.eid, socket.handle(), events)
	}

	/// Removes a socket from the watch set. The socket stays open.
	pub fn remove_usock(&self, socket: &Socket) -> Result<(), SocketError> {
		self.engine.epoll_remove(self.eid, socket.handle())
	}

	/// Waits for readiness and counts hits among the candidate lists.
	///
	/// A socket in `read_candidates` counts when readable or in error; one
	/// in `write_candidates` counts when writable or in error (a socket in
	/// both lists can count twice). `timeout_ms < 0` blocks indefinitely,
	/// `0` returns immediately, `> 0` waits at most that long; an elapsed
	/// timeout yields `Ok(0)`. Waiting on an empty watch set also yields
	/// `Ok(0)` unless [`EpollFlags::STRICT_EMPTY`] is set.
	pub fn wait(
		&self,
		read_candidates: &[&Socket],
		write_candidates: &[&Socket],
		timeout_ms: i64,
	) -> Result<usize, SocketError> {
		let ready = self.engine.epoll_wait(self.eid, timeout_ms)?;
		let mut hits = 0;
		for (handle, events) in ready {
			if events.intersects(EpollEvents::IN | EpollEvents::ERR)
				&& read_candidates.iter().any(|s| s.handle() == handle)
			{
				hits += 1;
			}
			if events.intersects(EpollEvents::OUT | EpollEvents::ERR)
				&& write_candidates.iter().any(|s| s.handle() == handle)
			{
				hits += 1;
			}
		}
		Ok(hits)
	}

	/// Waits for readiness and pairs each ready socket with the events it
	/// raised. Ready sockets absent from `sockets` are not reported.
	///
	/// Timeout semantics match [`Self::wait`]; a timeout yields an empty vec.
	pub fn u_wait<'a>(
		&self,
		sockets: &[&'a Socket],
		timeout_ms: i64,
	) -> Result<Vec<(&'a Socket, EpollEvents)>, SocketError> {
		let ready = self.engine.epoll_wait(self.eid, timeout_ms)?;
		let mut out = Vec::with_capacity(ready.len());
		for (handle, events) in ready {
			if let Some(socket) = sockets.iter().find(|s| s.handle() == handle) {
				out.push((*socket, events));
			}
		}
		Ok(out)
	}

	/// Current behavior flags.
	pub fn flags(&self) -> Result<EpollFlags, SocketError> {
		self.engine.epoll_flags(self.eid)
	}

	/// Replaces the behavior flags, returning the previous set.
	pub fn set_flags(&self, flags: EpollFlags) -> Result<EpollFlags, SocketError> {
		self.engine.epoll_set_flags(self.eid, flags)
	}

	/// Destroys the multiplexer handle. Idempotent, and watched sockets are
	/// left untouched.
	pub fn release(&self) -> Result<(), SocketError> {
		self.engine.epoll_release(self.eid)
	}
}

impl Drop for Epoll {
	fn drop(&mut self) {
		let _ = self.engine.epoll_release(self.eid);
	}
}

impl std::fmt::Debug for Epoll {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Epoll").field("eid", &self.eid).finish()
	}
}
