//! Blocking byte-stream adapters over a socket.
//!
//! Both adapters borrow the socket, so the socket outlives any stream taken
//! from it and several streams may exist at once. Transport failures surface
//! as [`std::io::Error`] with the kind mapping from [`crate::error`].

use std::io::{self, Read, Write};

use super::Socket;

/// Reads the socket's incoming bytes through [`std::io::Read`].
///
/// Zero-length reads succeed unconditionally, even on a closed socket.
/// A non-empty read blocks until data, peer close, receive timeout, or a
/// concurrent local close.
pub struct InputStream<'a> {
	socket: &'a Socket,
}

impl<'a> InputStream<'a> {
	pub(super) fn new(socket: &'a Socket) -> Self {
		Self { socket }
	}
}

impl Read for InputStream<'_> {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		if buf.is_empty() {
			return Ok(0);
		}
		let data = self.socket.recv(buf.len())?;
		buf[..data.len()].copy_from_slice(&data);
		Ok(data.len())
	}
}

/// Writes bytes to the socket through [`std::io::Write`].
///
/// Zero-length writes succeed unconditionally. Everything is handed to the
/// transport immediately, so `flush` is a no-op.
pub struct OutputStream<'a> {
	socket: &'a Socket,
}

impl<'a> OutputStream<'a> {
	pub(super) fn new(socket: &'a Socket) -> Self {
		Self { socket }
	}
}

impl Write for OutputStream<'_> {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		if buf.is_empty() {
			return Ok(0);
		}
		Ok(self.socket.send(buf)?)
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::io::{ErrorKind, Read, Write};
	use std::net::{IpAddr, Ipv4Addr};
	use std::sync::Arc;

	use crate::engine::{Family, MemoryEngine, TransportEngine};
	use crate::socket::{OptionValue, SockOpt, Socket, Transtype};

	const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

	fn file_mode_pair() -> (Socket, Socket) {
		let engine = Arc::new(MemoryEngine::new());
		engine.startup();
		let server = Socket::with_engine(engine.clone(), Family::Inet).unwrap();
		server
			.set_option(SockOpt::Transtype, OptionValue::Transtype(Transtype::File))
			.unwrap();
		server.bind(LOCALHOST, 0).unwrap();
		server.listen(4).unwrap();
		let port = server.sock_name().unwrap().port();
		let client = Socket::with_engine(engine, Family::Inet).unwrap();
		client
			.set_option(SockOpt::Transtype, OptionValue::Transtype(Transtype::File))
			.unwrap();
		client.connect(LOCALHOST, port).unwrap();
		let (accepted, _) = server.accept().unwrap();
		(client, accepted)
	}

	#[test]
	fn zero_length_io_succeeds_unconditionally() {
		let engine = Arc::new(MemoryEngine::new());
		engine.startup();
		let socket = Socket::with_engine(engine, Family::Inet).unwrap();

		// Never connected.
		assert_eq!(socket.input_stream().read(&mut []).unwrap(), 0);
		assert_eq!(socket.output_stream().write(&[]).unwrap(), 0);

		// Closed.
		socket.close().unwrap();
		assert_eq!(socket.input_stream().read(&mut []).unwrap(), 0);
		assert_eq!(socket.output_stream().write(&[]).unwrap(), 0);
	}

	#[test]
	fn bytes_round_trip_across_the_pair() {
		let (client, accepted) = file_mode_pair();

		let mut out = client.output_stream();
		out.write_all(b"streamed bytes").unwrap();
		out.flush().unwrap();

		let mut input = accepted.input_stream();
		let mut buf = [0u8; 8];
		input.read_exact(&mut buf).unwrap();
		assert_eq!(&buf, b"streamed");
		let mut rest = [0u8; 6];
		input.read_exact(&mut rest).unwrap();
		assert_eq!(&rest, b" bytes");
	}

	#[test]
	fn read_fails_after_peer_close_once_drained() {
		let (client, accepted) = file_mode_pair();

		client.output_stream().write_all(b"hi").unwrap();
		client.close().unwrap();

		let mut input = accepted.input_stream();
		let mut buf = [0u8; 2];
		input.read_exact(&mut buf).unwrap();
		assert_eq!(&buf, b"hi");

		let err = input.read(&mut buf).unwrap_err();
		assert_eq!(err.kind(), ErrorKind::ConnectionReset);
	}

	#[test]
	fn write_fails_after_local_close() {
		let (client, _accepted) = file_mode_pair();
		client.close().unwrap();
		let err = client.output_stream().write(b"late").unwrap_err();
		assert_eq!(err.kind(), ErrorKind::NotConnected);
	}
}
