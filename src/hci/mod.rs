//! HCI plumbing and the modules built directly on it.
use core::fmt;

pub use bt_hci::param::{AddrKind, BdAddr};

pub mod acl_connection;
pub mod acl_scheduler;
pub mod command;
pub mod event;
pub mod hal;
pub mod hci_layer;
pub mod remote_name_request;

pub use acl_connection::AclConnectionModule;
pub use acl_scheduler::AclScheduler;
pub use hal::{HciHal, HciTransport};
pub use hci_layer::HciLayer;
pub use remote_name_request::RemoteNameRequestModule;

/// A device address with its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub kind: AddrKind,
    pub addr: BdAddr,
}

impl Address {
    /// Build an address from its little endian wire bytes.
    pub fn new(kind: AddrKind, addr: [u8; 6]) -> Self {
        Self {
            kind,
            addr: BdAddr::new(addr),
        }
    }

    pub fn public(addr: [u8; 6]) -> Self {
        Self::new(AddrKind::PUBLIC, addr)
    }

    pub fn random(addr: [u8; 6]) -> Self {
        Self::new(AddrKind::RANDOM, addr)
    }

    /// Little endian wire bytes.
    pub fn bytes(&self) -> [u8; 6] {
        let mut out = [0; 6];
        out.copy_from_slice(self.addr.raw());
        out
    }

    /// Address type octet used by the SMP confirm function: 0 public, 1 random.
    pub fn type_octet(&self) -> u8 {
        if self.kind == AddrKind::PUBLIC {
            0
        } else {
            1
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = self.bytes();
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a[5], a[4], a[3], a[2], a[1], a[0]
        )
    }
}

/// HCI status and reason codes
// ([Vol 1] Part F, Section 1.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success,
    UnknownHciCommand,
    UnknownConnection,
    HardwareFailure,
    PageTimeout,
    AuthenticationFailure,
    PinOrKeyMissing,
    MemoryCapacityExceeded,
    ConnectionTimeout,
    ConnectionLimitExceeded,
    ConnectionAlreadyExists,
    CommandDisallowed,
    InvalidHciCommandParameters,
    RemoteUserTerminatedConnection,
    ConnectionTerminatedByLocalHost,
    UnspecifiedError,
    Other(u8),
}

impl From<u8> for ErrorCode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::Success,
            0x01 => Self::UnknownHciCommand,
            0x02 => Self::UnknownConnection,
            0x03 => Self::HardwareFailure,
            0x04 => Self::PageTimeout,
            0x05 => Self::AuthenticationFailure,
            0x06 => Self::PinOrKeyMissing,
            0x07 => Self::MemoryCapacityExceeded,
            0x08 => Self::ConnectionTimeout,
            0x09 => Self::ConnectionLimitExceeded,
            0x0b => Self::ConnectionAlreadyExists,
            0x0c => Self::CommandDisallowed,
            0x12 => Self::InvalidHciCommandParameters,
            0x13 => Self::RemoteUserTerminatedConnection,
            0x16 => Self::ConnectionTerminatedByLocalHost,
            0x1f => Self::UnspecifiedError,
            other => Self::Other(other),
        }
    }
}

impl From<ErrorCode> for u8 {
    fn from(value: ErrorCode) -> u8 {
        match value {
            ErrorCode::Success => 0x00,
            ErrorCode::UnknownHciCommand => 0x01,
            ErrorCode::UnknownConnection => 0x02,
            ErrorCode::HardwareFailure => 0x03,
            ErrorCode::PageTimeout => 0x04,
            ErrorCode::AuthenticationFailure => 0x05,
            ErrorCode::PinOrKeyMissing => 0x06,
            ErrorCode::MemoryCapacityExceeded => 0x07,
            ErrorCode::ConnectionTimeout => 0x08,
            ErrorCode::ConnectionLimitExceeded => 0x09,
            ErrorCode::ConnectionAlreadyExists => 0x0b,
            ErrorCode::CommandDisallowed => 0x0c,
            ErrorCode::InvalidHciCommandParameters => 0x12,
            ErrorCode::RemoteUserTerminatedConnection => 0x13,
            ErrorCode::ConnectionTerminatedByLocalHost => 0x16,
            ErrorCode::UnspecifiedError => 0x1f,
            ErrorCode::Other(v) => v,
        }
    }
}

impl ErrorCode {
    pub fn is_success(&self) -> bool {
        *self == ErrorCode::Success
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Other(v) => write!(f, "Unknown error 0x{:02x}", v),
            known => write!(f, "{:?}", known),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_display_is_msb_first() {
        let addr = Address::public([0xA6, 0xA5, 0xA4, 0xA3, 0xA2, 0xA1]);
        assert_eq!(addr.to_string(), "A1:A2:A3:A4:A5:A6");
        assert_eq!(addr.type_octet(), 0);
        assert_eq!(Address::random([0; 6]).type_octet(), 1);
    }

    #[test]
    fn error_code_conversions() {
        for v in 0..=u8::MAX {
            assert_eq!(u8::from(ErrorCode::from(v)), v);
        }
        assert_eq!(ErrorCode::from(0x04), ErrorCode::PageTimeout);
        assert!(ErrorCode::from(0).is_success());
        assert_eq!(ErrorCode::Other(0x42).to_string(), "Unknown error 0x42");
    }
}
