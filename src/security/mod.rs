//! Security manager: LE legacy pairing.
pub mod crypto;
pub mod pairing;
pub mod types;
pub mod ui;

pub use crypto::Octet16;
pub use types::{IoCapabilities, PassKey, Reason};
pub use ui::{ConfirmationData, PairingEvent, UserInterface};
