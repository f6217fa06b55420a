//! User interaction during pairing.
use crate::hci::Address;
use crate::security::types::PassKey;

/// What the user is shown about the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationData {
    pub address: Address,
    pub name: String,
    /// Passkey to display, if any.
    pub passkey: Option<PassKey>,
}

impl ConfirmationData {
    pub fn new(address: Address, name: &str) -> Self {
        Self {
            address,
            name: name.to_string(),
            passkey: None,
        }
    }

    pub fn with_passkey(address: Address, name: &str, passkey: PassKey) -> Self {
        Self {
            passkey: Some(passkey),
            ..Self::new(address, name)
        }
    }
}

/// Sink for pairing prompts. Calls are posted to the handler given in
/// [`crate::security::pairing::InitialInformations::user_interface_handler`].
///
/// Answers go back through [`crate::security::pairing::PairingSender::on_ui_event`].
pub trait UserInterface: Send + Sync {
    /// Show the passkey the peer has to enter.
    fn display_confirm_value(&self, data: ConfirmationData);

    /// Ask the user for the passkey shown on the peer.
    fn display_enter_passkey_dialog(&self, data: ConfirmationData);
}

/// Answer of the user to a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingEvent {
    Passkey(u32),
    Cancel,
}
