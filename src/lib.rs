//! Bluetooth host core.
//!
//! * [`os`]: threads and handlers, the execution contexts everything runs on.
//! * [`module`]: module lifecycle and dependency wiring.
//! * [`hci`]: HCI command and event plumbing, the ACL scheduler and remote name requests.
//! * [`security`]: LE legacy pairing.
//! * [`gap`]: advertising data and LTV payload formats.

pub mod codec;
pub mod config;
pub mod cursor;
pub mod gap;
pub mod hci;
pub mod module;
pub mod os;
pub mod security;

pub use hci::Address;
pub use module::{Module, ModuleContext, ModuleFactory, ModuleInstance, ModuleList, ModuleRegistry};
pub use os::{Handler, Thread};

/// Errors surfaced by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("codec: {0}")]
    Codec(#[from] codec::Error),
    #[error("invalid value")]
    InvalidValue,
    /// A bounded queue had no room left.
    #[error("queue full")]
    QueueFull,
    /// The receiving side of a link is gone.
    #[error("disconnected")]
    Disconnected,
    #[error("security: {0}")]
    Security(security::Reason),
}

impl From<security::Reason> for Error {
    fn from(reason: security::Reason) -> Self {
        Error::Security(reason)
    }
}
