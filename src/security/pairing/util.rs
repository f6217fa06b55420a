use heapless::Vec;
use rand_core::RngCore;

use super::Role;
use crate::codec::{self, Encode};
use crate::security::crypto::Octet16;
use crate::security::types::{Command, IoCapabilities, PairingFeatures, PassKey, Reason};

/// Largest SMP payload this host sends or accepts.
pub const MAX_PAYLOAD_SIZE: usize = 64;

/// An SMP command with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmpPacket {
    pub command: Command,
    pub payload: Vec<u8, MAX_PAYLOAD_SIZE>,
}

impl SmpPacket {
    pub fn new(command: Command, payload: &[u8]) -> Result<Self, codec::Error> {
        Ok(Self {
            command,
            payload: Vec::from_slice(payload).map_err(|_| codec::Error::InsufficientSpace)?,
        })
    }

    /// Parse an SMP PDU. Unknown opcodes and short payloads are rejected.
    pub fn parse(data: &[u8]) -> Result<Self, codec::Error> {
        let (&code, payload) = data.split_first().ok_or(codec::Error::InsufficientSpace)?;
        let command = Command::try_from(code).map_err(|_| codec::Error::InvalidValue)?;
        if payload.len() < command.payload_size() {
            return Err(codec::Error::InsufficientSpace);
        }
        Self::new(command, &payload[..command.payload_size()])
    }

    /// Opcode followed by payload.
    pub fn to_bytes(&self) -> Vec<u8, { MAX_PAYLOAD_SIZE + 1 }> {
        let mut out = Vec::new();
        // Capacity covers opcode plus the largest payload.
        let _ = out.push(self.command.into());
        let _ = out.extend_from_slice(&self.payload);
        out
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

pub fn make_pairing_features(command: Command, features: &PairingFeatures) -> Result<SmpPacket, codec::Error> {
    let mut payload = [0u8; PairingFeatures::PAYLOAD_SIZE];
    features.encode(&mut payload)?;
    SmpPacket::new(command, &payload)
}

pub fn make_pairing_confirm(confirm: &Octet16) -> Result<SmpPacket, codec::Error> {
    SmpPacket::new(Command::PairingConfirm, confirm)
}

pub fn make_pairing_random(random: &Octet16) -> Result<SmpPacket, codec::Error> {
    SmpPacket::new(Command::PairingRandom, random)
}

pub fn make_pairing_failed(reason: Reason) -> Result<SmpPacket, codec::Error> {
    SmpPacket::new(Command::PairingFailed, &[reason.into()])
}

/// Read a 16 octet confirm or random value.
pub fn read_octet16(packet: &SmpPacket) -> Result<Octet16, codec::Error> {
    let mut out = [0u8; 16];
    out.copy_from_slice(packet.payload.get(..16).ok_or(codec::Error::InsufficientSpace)?);
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKeyEntryAction {
    Display,
    Input,
}

/// How the temporary key is agreed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationModel {
    JustWorks,
    PassKeyEntry {
        central: PassKeyEntryAction,
        peripheral: PassKeyEntryAction,
    },
    OutOfBand,
}

impl AssociationModel {
    /// Passkey duty of the local device, if the model involves one.
    pub fn passkey_action(&self, role: Role) -> Option<PassKeyEntryAction> {
        match (self, role) {
            (AssociationModel::PassKeyEntry { central, .. }, Role::Central) => Some(*central),
            (AssociationModel::PassKeyEntry { peripheral, .. }, Role::Peripheral) => Some(*peripheral),
            _ => None,
        }
    }
}

fn is_display(io: IoCapabilities) -> bool {
    matches!(io, IoCapabilities::DisplayOnly | IoCapabilities::DisplayYesNo)
}

fn has_keyboard(io: IoCapabilities) -> bool {
    matches!(io, IoCapabilities::KeyboardOnly | IoCapabilities::KeyboardDisplay)
}

/// Whether the side with `mine` shows the passkey, given the other side has `theirs`.
fn displays_passkey(role: Role, mine: IoCapabilities, theirs: IoCapabilities) -> bool {
    match (mine, theirs) {
        (IoCapabilities::DisplayOnly | IoCapabilities::DisplayYesNo, _) => true,
        (IoCapabilities::KeyboardDisplay, IoCapabilities::KeyboardDisplay) => role == Role::Central,
        (IoCapabilities::KeyboardDisplay, IoCapabilities::KeyboardOnly) => true,
        _ => false,
    }
}

fn action(displays: bool) -> PassKeyEntryAction {
    if displays {
        PassKeyEntryAction::Display
    } else {
        PassKeyEntryAction::Input
    }
}

/// Pick the legacy association model from the exchanged features
// ([Vol 3] Part H, Section 2.3.5.1).
pub fn choose_association_model(request: &PairingFeatures, response: &PairingFeatures) -> AssociationModel {
    let (iom, ios) = (request.io_capabilities, response.io_capabilities);
    if !request.auth_req.mitm() && !response.auth_req.mitm() {
        AssociationModel::JustWorks
    } else if bool::from(request.use_oob) && bool::from(response.use_oob) {
        AssociationModel::OutOfBand
    } else if iom == IoCapabilities::NoInputNoOutput || ios == IoCapabilities::NoInputNoOutput {
        AssociationModel::JustWorks
    } else if is_display(iom) && is_display(ios) {
        AssociationModel::JustWorks
    } else {
        // At least one side has a keyboard past this point.
        debug_assert!(has_keyboard(iom) || has_keyboard(ios));
        AssociationModel::PassKeyEntry {
            central: action(displays_passkey(Role::Central, iom, ios)),
            peripheral: action(displays_passkey(Role::Peripheral, ios, iom)),
        }
    }
}

/// Draw a passkey in `0..=999999`.
pub fn generate_passkey<R: RngCore>(rng: &mut R) -> PassKey {
    let mut value = rng.next_u32() & 0x000f_ffff;
    if value > PassKey::MAX {
        value >>= 1;
    }
    PassKey(value)
}

/// Temporary key for a passkey: its value zero extended to 128 bits.
pub fn passkey_tk(passkey: PassKey) -> Octet16 {
    let mut tk = [0u8; 16];
    tk[..4].copy_from_slice(&passkey.value().to_le_bytes());
    tk
}

#[cfg(test)]
mod tests {
    use rand_chacha::ChaCha12Rng;
    use rand_core::SeedableRng;

    use super::*;
    use crate::security::types::{AuthReq, BondingFlag, UseOutOfBand};

    fn features(io: IoCapabilities, mitm: bool) -> PairingFeatures {
        PairingFeatures {
            io_capabilities: io,
            auth_req: AuthReq::new(BondingFlag::Bonding, mitm),
            ..Default::default()
        }
    }

    #[test]
    fn no_mitm_is_just_works() {
        for iom in IoCapabilities::ALL {
            for ios in IoCapabilities::ALL {
                assert_eq!(
                    choose_association_model(&features(iom, false), &features(ios, false)),
                    AssociationModel::JustWorks
                );
            }
        }
    }

    #[test]
    fn oob_needs_both_sides() {
        let mut request = features(IoCapabilities::KeyboardOnly, true);
        let mut response = features(IoCapabilities::DisplayOnly, false);
        request.use_oob = UseOutOfBand::Present;
        assert!(matches!(
            choose_association_model(&request, &response),
            AssociationModel::PassKeyEntry { .. }
        ));
        response.use_oob = UseOutOfBand::Present;
        assert_eq!(choose_association_model(&request, &response), AssociationModel::OutOfBand);
    }

    #[test]
    fn keyboard_display_pair() {
        let kd = features(IoCapabilities::KeyboardDisplay, true);
        let model = choose_association_model(&kd, &kd);
        assert_eq!(model.passkey_action(Role::Central), Some(PassKeyEntryAction::Display));
        assert_eq!(model.passkey_action(Role::Peripheral), Some(PassKeyEntryAction::Input));
        assert_eq!(AssociationModel::JustWorks.passkey_action(Role::Central), None);
    }

    #[test]
    fn passkey_in_range() {
        let mut rng = ChaCha12Rng::seed_from_u64(7);
        for _ in 0..10_000 {
            assert!(generate_passkey(&mut rng).value() <= PassKey::MAX);
        }
        assert_eq!(passkey_tk(PassKey(0x01e240))[..4], [0x40, 0xe2, 0x01, 0x00]);
    }

    #[test]
    fn packet_parsing() {
        let packet = SmpPacket::parse(&[0x05, 0x04, 0xff]).unwrap();
        assert_eq!(packet.command, Command::PairingFailed);
        assert_eq!(packet.payload(), &[0x04]);
        assert_eq!(packet.to_bytes().as_slice(), &[0x05, 0x04]);

        assert_eq!(SmpPacket::parse(&[]), Err(codec::Error::InsufficientSpace));
        assert_eq!(SmpPacket::parse(&[0x03, 0x00]), Err(codec::Error::InsufficientSpace));
        assert_eq!(SmpPacket::parse(&[0x20]), Err(codec::Error::InvalidValue));
    }
}
