use crate::error::OptionError;
use crate::socket::state::SockStatus;

/// Transmission mode of a socket.
///
/// `Live` preserves message boundaries: one send is one receivable unit.
/// `File` and `Stream` carry a contiguous ordered byte sequence with no
/// boundary meaning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Transtype {
	#[default]
	Live,
	File,
	Stream,
}

/// Key material state of the receive direction, as reported by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KmState {
	#[default]
	Unsecured,
	Securing,
	Secured,
	NoSecret,
	BadSecret,
}

/// A dynamically-typed option value.
///
/// Closed set of variants; the registry's declared value type per option is
/// the single source of truth for which variant is legal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
	Bool(bool),
	Int(i32),
	Int64(i64),
	Str(String),
	Transtype(Transtype),
	KmState(KmState),
}

impl OptionValue {
	fn value_type(&self) -> ValueType {
		match self {
			Self::Bool(_) => ValueType::Bool,
			Self::Int(_) => ValueType::Int,
			Self::Int64(_) => ValueType::Int64,
			Self::Str(_) => ValueType::Str,
			Self::Transtype(_) => ValueType::Transtype,
			Self::KmState(_) => ValueType::KmState,
		}
	}
}

/// Recognized socket options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SockOpt {
	/// Transmission mode. Write-only, pre-bind.
	Transtype,
	/// Blocking receive mode (true = blocking).
	RcvSyn,
	/// Blocking send mode (true = blocking).
	SndSyn,
	/// Receive timeout in ms; -1 blocks indefinitely.
	RcvTimeo,
	/// Send timeout in ms; -1 blocks indefinitely.
	SndTimeo,
	/// Connect/rendezvous timeout in ms.
	ConnTimeo,
	/// Bandwidth ceiling in bytes/s; -1 = unlimited.
	MaxBw,
	/// Application stream identifier carried in the handshake.
	StreamId,
	/// Maximum LIVE-mode message payload in bytes.
	PayloadSize,
	/// Receive buffer capacity in bytes.
	RcvBuf,
	/// Send buffer capacity in bytes.
	SndBuf,
	/// Allow binding an address another socket already bound.
	ReuseAddr,
	/// Receive-direction key material state. Read-only.
	RcvKmState,
}

/// Declared value type of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
	Bool,
	Int,
	Int64,
	Str,
	Transtype,
	KmState,
}

impl ValueType {
	fn name(self) -> &'static str {
		match self {
			Self::Bool => "bool",
			Self::Int => "i32",
			Self::Int64 => "i64",
			Self::Str => "string",
			Self::Transtype => "transtype",
			Self::KmState => "km-state",
		}
	}
}

/// Access direction of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	Read,
	Write,
	ReadWrite,
}

/// Lifecycle point past which an option can no longer be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindConstraint {
	None,
	/// Must be set before bind.
	PreBind,
	/// Must be set before connect.
	PreConnect,
}

/// Static description of one option: its type, direction and constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionDescriptor {
	pub value_type: ValueType,
	pub direction: Direction,
	pub constraint: BindConstraint,
}

const fn descriptor(value_type: ValueType, direction: Direction, constraint: BindConstraint) -> OptionDescriptor {
	OptionDescriptor { value_type, direction, constraint }
}

impl SockOpt {
	/// The registry entry for this option.
	pub const fn descriptor(self) -> OptionDescriptor {
		use BindConstraint::{None, PreBind, PreConnect};
		use Direction::{Read, ReadWrite, Write};
		match self {
			Self::Transtype => descriptor(ValueType::Transtype, Write, PreBind),
			Self::RcvSyn => descriptor(ValueType::Bool, ReadWrite, None),
			Self::SndSyn => descriptor(ValueType::Bool, ReadWrite, None),
			Self::RcvTimeo => descriptor(ValueType::Int, ReadWrite, None),
			Self::SndTimeo => descriptor(ValueType::Int, ReadWrite, None),
			Self::ConnTimeo => descriptor(ValueType::Int, ReadWrite, PreConnect),
			Self::MaxBw => descriptor(ValueType::Int64, ReadWrite, None),
			Self::StreamId => descriptor(ValueType::Str, ReadWrite, PreConnect),
			Self::PayloadSize => descriptor(ValueType::Int, ReadWrite, PreBind),
			Self::RcvBuf => descriptor(ValueType::Int, ReadWrite, PreBind),
			Self::SndBuf => descriptor(ValueType::Int, ReadWrite, PreBind),
			Self::ReuseAddr => descriptor(ValueType::Bool, ReadWrite, PreBind),
			Self::RcvKmState => descriptor(ValueType::KmState, Read, None),
		}
	}

	/// Checks that this option may be read at all.
	pub(crate) fn check_get(self) -> Result<(), OptionError> {
		match self.descriptor().direction {
			Direction::Write => Err(OptionError::WriteOnly(self)),
			_ => Ok(()),
		}
	}

	/// Checks direction, value type and lifecycle constraint for a write.
	pub(crate) fn check_set(self, value: &OptionValue, status: SockStatus) -> Result<(), OptionError> {
		let desc = self.descriptor();
		if desc.direction == Direction::Read {
			return Err(OptionError::ReadOnly(self));
		}
		if value.value_type() != desc.value_type {
			return Err(OptionError::TypeMismatch { opt: self, expected: desc.value_type.name() });
		}
		match desc.constraint {
			BindConstraint::None => Ok(()),
			BindConstraint::PreBind if status == SockStatus::Init => Ok(()),
			BindConstraint::PreBind => Err(OptionError::AfterBind(self)),
			BindConstraint::PreConnect
				if matches!(status, SockStatus::Init | SockStatus::Opened | SockStatus::Listening) =>
			{
				Ok(())
			}
			BindConstraint::PreConnect => Err(OptionError::AfterConnect(self)),
		}
	}
}
