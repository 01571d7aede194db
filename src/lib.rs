pub mod engine;
pub mod socket;
mod epoll;
mod error;

pub use self::engine::{cleanup, startup};
pub use self::engine::{EpollEvents, EpollFlags, Family, MemoryEngine, Stats, TransportEngine};
pub use self::epoll::Epoll;
pub use self::error::{OptionError, SocketError};
pub use self::socket::{Boundary, MsgCtrl, SEQNO_NONE, Socket, SockStatus};
pub use self::socket::{BindConstraint, Direction, KmState, OptionDescriptor, OptionValue,
						SockOpt, Transtype, ValueType};
pub use self::socket::{REJC_PREDEFINED, REJC_USERDEFINED, RejectCode, RejectReason};
pub use self::socket::{InputStream, OutputStream};
