/// Position of one send/receive payload within a logical multi-call message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(i32)]
pub enum Boundary {
	/// Middle fragment, or boundaries are meaningless (FILE/STREAM modes).
	#[default]
	None = 0,
	/// Final fragment of a message.
	Last = 1,
	/// Opening fragment of a message.
	First = 2,
	/// A whole message in one call.
	Solo = 3,
}

/// Sequence number sentinel for "assigned by the engine".
pub const SEQNO_NONE: i64 = -1;

/// Per-call message control metadata.
///
/// Every field is optional at construction; unset fields take engine
/// defaults. On receive the engine fills `pkt_seq`, `msg_no`, `boundary` and
/// the timestamps with what it observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgCtrl {
	pub flags: u32,
	pub boundary: Boundary,
	/// Packet sequence number; [`SEQNO_NONE`] lets the engine assign one.
	pub pkt_seq: i64,
	/// Message number; [`SEQNO_NONE`] lets the engine assign one.
	pub msg_no: i64,
	/// Time-to-live in milliseconds before an undelivered message is dropped.
	pub ttl_ms: Option<i32>,
	/// Whether the message must be delivered in order.
	pub in_order: Option<bool>,
	/// Source timestamp in microseconds; unset means "stamped at send".
	pub src_time: Option<u64>,
	/// Delivery timestamp in microseconds, filled on receive.
	pub dst_time: Option<u64>,
}

impl Default for MsgCtrl {
	fn default() -> Self {
		Self {
			flags: 0,
			boundary: Boundary::None,
			pkt_seq: SEQNO_NONE,
			msg_no: SEQNO_NONE,
			ttl_ms: None,
			in_order: None,
			src_time: None,
			dst_time: None,
		}
	}
}
