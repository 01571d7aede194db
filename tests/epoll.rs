//! Multiplexer tests: watch-set mutation, readiness reporting, trigger modes
//! and release semantics.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use wiremux::{Epoll, EpollEvents, EpollFlags, MsgCtrl, OptionValue, SockOpt, Socket, Transtype};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

struct EngineGuard;

impl EngineGuard {
	fn init() -> Self {
		wiremux::startup();
		EngineGuard
	}
}

impl Drop for EngineGuard {
	fn drop(&mut self) {
		wiremux::cleanup();
	}
}

fn connected_pair() -> (Socket, Socket) {
	let server = Socket::new().unwrap();
	server
		.set_option(SockOpt::Transtype, OptionValue::Transtype(Transtype::Live))
		.unwrap();
	server.bind(LOCALHOST, 0).unwrap();
	server.listen(4).unwrap();
	let port = server.sock_name().unwrap().port();
	let client = Socket::new().unwrap();
	client.connect(LOCALHOST, port).unwrap();
	let (accepted, _) = server.accept().unwrap();
	(client, accepted)
}

#[test]
fn empty_watch_set_times_out_quietly() {
	let _engine = EngineGuard::init();
	let epoll = Epoll::new().unwrap();
	assert_eq!(epoll.wait(&[], &[], 0).unwrap(), 0);
	assert!(epoll.u_wait(&[], 0).unwrap().is_empty());
}

#[test]
fn strict_empty_flag_makes_an_empty_wait_an_error() {
	let _engine = EngineGuard::init();
	let epoll = Epoll::new().unwrap();
	let previous = epoll.set_flags(EpollFlags::STRICT_EMPTY).unwrap();
	assert_eq!(previous, EpollFlags::empty());
	assert_eq!(epoll.flags().unwrap(), EpollFlags::STRICT_EMPTY);
	assert!(epoll.wait(&[], &[], 0).is_err());
}

#[test]
fn listener_becomes_readable_on_a_pending_connection() {
	let _engine = EngineGuard::init();
	let listener = Socket::new().unwrap();
	listener.bind(LOCALHOST, 0).unwrap();
	listener.listen(4).unwrap();
	let port = listener.sock_name().unwrap().port();

	let epoll = Epoll::new().unwrap();
	epoll.add_usock(&listener, EpollEvents::IN).unwrap();
	assert_eq!(epoll.wait(&[&listener], &[], 0).unwrap(), 0);

	let client = Socket::new().unwrap();
	client.connect(LOCALHOST, port).unwrap();

	assert_eq!(epoll.wait(&[&listener], &[], 1000).unwrap(), 1);
	let ready = epoll.u_wait(&[&listener], 1000).unwrap();
	assert_eq!(ready.len(), 1);
	assert!(ready[0].1.contains(EpollEvents::IN));
}

#[test]
fn connected_sockets_report_writability() {
	let _engine = EngineGuard::init();
	let (client, _accepted) = connected_pair();

	let epoll = Epoll::new().unwrap();
	epoll.add_usock(&client, EpollEvents::OUT).unwrap();
	assert_eq!(epoll.wait(&[], &[&client], 1000).unwrap(), 1);
}

#[test]
fn queued_data_raises_in_on_the_receiver() {
	let _engine = EngineGuard::init();
	let (client, accepted) = connected_pair();

	let epoll = Epoll::new().unwrap();
	epoll.add_usock(&accepted, EpollEvents::IN).unwrap();
	assert_eq!(epoll.wait(&[&accepted], &[], 0).unwrap(), 0);

	client.send(b"wake").unwrap();
	let ready = epoll.u_wait(&[&accepted], 1000).unwrap();
	assert_eq!(ready.len(), 1);
	assert!(ready[0].1.contains(EpollEvents::IN));
}

#[test]
fn update_and_remove_mutate_the_watch_set() {
	let _engine = EngineGuard::init();
	let (client, accepted) = connected_pair();
	client.send(b"data").unwrap();

	let epoll = Epoll::new().unwrap();
	epoll.add_usock(&accepted, EpollEvents::IN).unwrap();
	assert_eq!(epoll.wait(&[&accepted], &[], 1000).unwrap(), 1);

	// Masked down to OUT, the queued data no longer counts as a read hit.
	epoll.update_usock(&accepted, EpollEvents::OUT).unwrap();
	assert_eq!(epoll.wait(&[&accepted], &[], 0).unwrap(), 0);
	assert_eq!(epoll.wait(&[], &[&accepted], 0).unwrap(), 1);

	epoll.remove_usock(&accepted).unwrap();
	assert_eq!(epoll.wait(&[], &[&accepted], 0).unwrap(), 0);
}

#[test]
fn edge_triggering_reports_each_condition_once() {
	let _engine = EngineGuard::init();
	let (client, accepted) = connected_pair();
	client.send(b"edge").unwrap();

	let epoll = Epoll::new().unwrap();
	epoll.set_flags(EpollFlags::EDGE_TRIGGERED).unwrap();
	epoll.add_usock(&accepted, EpollEvents::IN).unwrap();

	assert_eq!(epoll.u_wait(&[&accepted], 1000).unwrap().len(), 1);
	// The unchanged condition does not fire again.
	assert!(epoll.u_wait(&[&accepted], 0).unwrap().is_empty());

	// Draining and refilling produces a new edge.
	accepted.recv(16).unwrap();
	assert!(epoll.u_wait(&[&accepted], 0).unwrap().is_empty());
	client.send(b"again").unwrap();
	assert_eq!(epoll.u_wait(&[&accepted], 1000).unwrap().len(), 1);
}

#[test]
fn expired_messages_do_not_count_as_readable() {
	let _engine = EngineGuard::init();
	let (client, accepted) = connected_pair();

	let ctrl = MsgCtrl { ttl_ms: Some(20), ..MsgCtrl::default() };
	client.send_with(b"stale", &ctrl).unwrap();

	let epoll = Epoll::new().unwrap();
	epoll.add_usock(&accepted, EpollEvents::IN).unwrap();

	// Once the only queued message outlives its TTL, the socket must not
	// look readable; a waiter acting on it would block in the follow-up read.
	std::thread::sleep(Duration::from_millis(60));
	assert!(epoll.u_wait(&[&accepted], 0).unwrap().is_empty());
	assert_eq!(epoll.wait(&[&accepted], &[], 0).unwrap(), 0);
}

#[test]
fn error_conditions_are_always_reported() {
	let _engine = EngineGuard::init();
	let (client, accepted) = connected_pair();

	let epoll = Epoll::new().unwrap();
	// Mask only asks for IN; ERR must surface regardless.
	epoll.add_usock(&accepted, EpollEvents::IN).unwrap();

	client.close().unwrap();
	accepted.recv(16).unwrap_err();

	let ready = epoll.u_wait(&[&accepted], 1000).unwrap();
	assert_eq!(ready.len(), 1);
	assert!(ready[0].1.contains(EpollEvents::ERR));
}

#[test]
fn release_leaves_watched_sockets_open() {
	let _engine = EngineGuard::init();
	let (client, accepted) = connected_pair();

	let epoll = Epoll::new().unwrap();
	epoll.add_usock(&client, EpollEvents::IN | EpollEvents::OUT).unwrap();
	epoll.add_usock(&accepted, EpollEvents::IN | EpollEvents::OUT).unwrap();

	epoll.release().unwrap();
	epoll.release().unwrap();

	assert!(client.is_connected());
	assert!(accepted.is_connected());
	client.send(b"still here").unwrap();
	assert_eq!(accepted.recv(64).unwrap(), b"still here");
}
