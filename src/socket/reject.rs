use crate::error::SocketError;

/// First raw code of the application-reserved range.
pub const REJC_PREDEFINED: i32 = 1000;
/// First raw code of the user-defined range.
pub const REJC_USERDEFINED: i32 = 2000;

/// Internal diagnostic codes produced by the transport engine itself.
///
/// Raw values sit below [`REJC_PREDEFINED`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum RejectCode {
	Unknown = 0,
	System = 1,
	Peer = 2,
	Resource = 3,
	Rogue = 4,
	Backlog = 5,
	Ipe = 6,
	Close = 7,
	Version = 8,
	RdvCookie = 9,
	BadSecret = 10,
	Unsecure = 11,
	MessageApi = 12,
	Congestion = 13,
	Filter = 14,
	Group = 15,
	Timeout = 16,
}

impl RejectCode {
	fn from_raw(raw: i32) -> Self {
		match raw {
			1 => Self::System,
			2 => Self::Peer,
			3 => Self::Resource,
			4 => Self::Rogue,
			5 => Self::Backlog,
			6 => Self::Ipe,
			7 => Self::Close,
			8 => Self::Version,
			9 => Self::RdvCookie,
			10 => Self::BadSecret,
			11 => Self::Unsecure,
			12 => Self::MessageApi,
			13 => Self::Congestion,
			14 => Self::Filter,
			15 => Self::Group,
			16 => Self::Timeout,
			_ => Self::Unknown,
		}
	}
}

/// Why a connection attempt was refused.
///
/// The raw code space is partitioned in three ranges; equality is structural
/// on (variant, code), so `Internal(x)` never equals `Predefined(x)`.
///
/// `Predefined` and `UserDefined` carry the offset within their range, the
/// way applications hand them out (`Predefined(1)` is raw code 1001).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RejectReason {
	Internal(RejectCode),
	Predefined(i32),
	UserDefined(i32),
}

impl RejectReason {
	/// Decodes a raw engine code into its range variant.
	pub fn from_raw(raw: i32) -> Self {
		if raw >= REJC_USERDEFINED {
			Self::UserDefined(raw - REJC_USERDEFINED)
		} else if raw >= REJC_PREDEFINED {
			Self::Predefined(raw - REJC_PREDEFINED)
		} else {
			Self::Internal(RejectCode::from_raw(raw))
		}
	}

	/// Encodes back to the raw engine code.
	pub fn raw(&self) -> i32 {
		match self {
			Self::Internal(code) => *code as i32,
			Self::Predefined(code) => REJC_PREDEFINED + code,
			Self::UserDefined(code) => REJC_USERDEFINED + code,
		}
	}

	/// Validates a reason an application wants to assign to a socket.
	///
	/// Internal codes belong to the engine and cannot be assigned; predefined
	/// codes must fit their range; user-defined codes must be non-negative.
	pub(crate) fn check_assignable(&self) -> Result<(), SocketError> {
		match self {
			Self::Internal(_) => Err(SocketError::Invalid {
				reason: "internal reject reasons cannot be assigned",
			}),
			Self::Predefined(code) if !(0..REJC_USERDEFINED - REJC_PREDEFINED).contains(code) => {
				Err(SocketError::Invalid { reason: "predefined reject code out of range" })
			}
			Self::UserDefined(code) if *code < 0 => {
				Err(SocketError::Invalid { reason: "user-defined reject code out of range" })
			}
			_ => Ok(()),
		}
	}
}

impl Default for RejectReason {
	fn default() -> Self {
		Self::Internal(RejectCode::Unknown)
	}
}

impl std::fmt::Display for RejectReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Internal(code) => write!(f, "internal {:?} ({})", code, *code as i32),
			Self::Predefined(code) => write!(f, "predefined {}", code),
			Self::UserDefined(code) => write!(f, "user-defined {}", code),
		}
	}
}
