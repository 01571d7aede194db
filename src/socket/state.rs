use crate::error::SocketError;

/// Lifecycle state of a socket.
///
/// Transitions are driven exclusively by the socket's own methods, except
/// `Broken`, which the engine enters asynchronously on peer-initiated
/// teardown, and `NonExist`, reported for handles the engine no longer knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockStatus {
	Init,
	Opened,
	Listening,
	Connecting,
	Connected,
	Broken,
	Closing,
	Closed,
	NonExist,
}

impl SockStatus {
	/// Whether the socket has been closed (or never existed).
	pub fn is_closed(self) -> bool {
		matches!(self, Self::Closing | Self::Closed | Self::NonExist)
	}
}

/// Operations admitted against the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
	Bind,
	Listen,
	Connect,
	Accept,
	Send,
	Recv,
}

/// The (state, operation) admission table.
///
/// Returns the error a disallowed combination must surface. This is the
/// deterministic front line; the engine still re-checks under its own lock
/// for transitions that race with close.
pub(crate) fn admit(status: SockStatus, op: Op) -> Result<(), SocketError> {
	use SockStatus::*;
	match (status, op) {
		(Init, Op::Bind) => Ok(()),
		(_, Op::Bind) => Err(SocketError::Invalid { reason: "socket is already bound" }),

		(Opened | Listening, Op::Listen) => Ok(()),
		(Init, Op::Listen) => Err(SocketError::UnboundSock),
		(s, Op::Listen) if s.is_closed() => Err(SocketError::Closed),
		(_, Op::Listen) => Err(SocketError::Invalid { reason: "socket cannot listen in this state" }),

		(Init | Opened, Op::Connect) => Ok(()),
		(Connecting | Connected, Op::Connect) => {
			Err(SocketError::Invalid { reason: "socket is already connected" })
		}
		(Broken, Op::Connect) => Err(SocketError::ConnLost),
		(s, Op::Connect) if s.is_closed() => Err(SocketError::Closed),
		(_, Op::Connect) => Err(SocketError::Invalid { reason: "socket cannot connect in this state" }),

		(Listening, Op::Accept) => Ok(()),
		(_, Op::Accept) => Err(SocketError::NoListen),

		(Connected, Op::Send | Op::Recv) => Ok(()),
		// Queued data on a broken socket stays readable; the engine
		// reports the loss once the queue is drained.
		(Broken, Op::Recv) => Ok(()),
		(Broken, Op::Send) => Err(SocketError::ConnLost),
		(s, Op::Send | Op::Recv) if s.is_closed() => Err(SocketError::Closed),
		(_, Op::Send | Op::Recv) => Err(SocketError::NoConn),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn listen_before_bind_is_an_unbound_socket_error() {
		assert_eq!(admit(SockStatus::Init, Op::Listen), Err(SocketError::UnboundSock));
		assert!(admit(SockStatus::Opened, Op::Listen).is_ok());
	}

	#[test]
	fn accept_requires_the_listening_state() {
		for status in [SockStatus::Init, SockStatus::Opened, SockStatus::Connected, SockStatus::Closed] {
			assert_eq!(admit(status, Op::Accept), Err(SocketError::NoListen));
		}
		assert!(admit(SockStatus::Listening, Op::Accept).is_ok());
	}

	#[test]
	fn transmission_needs_a_connection() {
		assert_eq!(admit(SockStatus::Init, Op::Send), Err(SocketError::NoConn));
		assert_eq!(admit(SockStatus::Opened, Op::Recv), Err(SocketError::NoConn));
		assert_eq!(admit(SockStatus::Broken, Op::Send), Err(SocketError::ConnLost));
		assert!(admit(SockStatus::Broken, Op::Recv).is_ok());
		assert_eq!(admit(SockStatus::Closed, Op::Send), Err(SocketError::Closed));
		assert!(admit(SockStatus::Connected, Op::Send).is_ok());
	}

	#[test]
	fn broken_and_closed_stay_distinguishable() {
		assert_ne!(admit(SockStatus::Broken, Op::Send), admit(SockStatus::Closed, Op::Send));
	}

	#[test]
	fn rebinding_is_rejected() {
		assert!(admit(SockStatus::Init, Op::Bind).is_ok());
		assert!(admit(SockStatus::Opened, Op::Bind).is_err());
		assert!(admit(SockStatus::Connected, Op::Bind).is_err());
	}
}
