use core::fmt;

use crate::codec::{self, Decode, Encode, Type};
use crate::Error;

/// Maximum encryption key size, in octets.
pub const ENCRYPTION_KEY_SIZE_128_BITS: u8 = 128 / 8;
/// Minimum encryption key size this host accepts, in octets.
pub const MIN_ENCRYPTION_KEY_SIZE: u8 = 7;

/// Declares a byte-valued protocol enum with its wire conversions and description.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal => $text:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl TryFrom<u8> for $name {
            type Error = Error;
            fn try_from(val: u8) -> Result<Self, Error> {
                match val {
                    $( $value => Ok(Self::$variant), )+
                    _ => Err(Error::InvalidValue),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(val: $name) -> u8 {
                match val {
                    $( $name::$variant => $value, )+
                }
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                match self {
                    $( Self::$variant => $text, )+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_ref())
            }
        }
    };
}

wire_enum! {
    /// Pairing Failed reason
    // ([Vol 3] Part H, Section 3.5.5).
    pub enum Reason {
        /// The user input of passkey failed, for example, the user cancelled the operation.
        PasskeyEntryFailed = 0x01 => "Passkey entry canceled or failed",
        /// The OOB data is not available.
        OobNotAvailable = 0x02 => "Out-of-band data not available",
        /// Authentication requirements cannot be met due to IO capabilities of one or both devices.
        AuthenticationRequirements = 0x03 => "Authentication requirements not met",
        /// The confirm value does not match the calculated compare value.
        ConfirmValueFailed = 0x04 => "Confirm value does not match",
        PairingNotSupported = 0x05 => "Device does not support pairing",
        /// The resultant encryption key size is not long enough.
        EncryptionKeySize = 0x06 => "Encryption key size is not long enough",
        CommandNotSupported = 0x07 => "Security manager protocol command not supported",
        UnspecifiedReason = 0x08 => "Pairing failed due to an unspecified reason",
        /// Too little time has elapsed since the last pairing or security request.
        RepeatedAttempts = 0x09 => "Pairing failed due to repeated attempts",
        /// The command length is invalid or a parameter is outside of the specified range.
        InvalidParameters = 0x0a => "Command and/or parameter invalid",
        DhKeyCheckFailed = 0x0b => "DH key check value does not match",
        NumericComparisonFailed = 0x0c => "Numeric comparison values do not match",
        BrEdrPairingInProgress = 0x0d => "Pairing in progress over BR/EDR",
        GenerationNotAllowed = 0x0e => "Link key generation failed",
        KeyRejected = 0x0f => "Device rejected distributed key",
        Busy = 0x10 => "Device is not ready to perform pairing",
    }
}

wire_enum! {
    /// Security Manager Protocol (SMP) command codes
    // ([Vol 3] Part H, Section 3.3).
    pub enum Command {
        PairingRequest = 0x01 => "Pairing Request",
        PairingResponse = 0x02 => "Pairing Response",
        PairingConfirm = 0x03 => "Pairing Confirm",
        PairingRandom = 0x04 => "Pairing Random",
        PairingFailed = 0x05 => "Pairing Failed",
        EncryptionInformation = 0x06 => "Encryption Information",
        CentralIdentification = 0x07 => "Central Identification",
        IdentityInformation = 0x08 => "Identity Information",
        IdentityAddressInformation = 0x09 => "Identity Address Information",
        SigningInformation = 0x0a => "Signing Information",
        SecurityRequest = 0x0b => "Security Request",
        PairingPublicKey = 0x0c => "Pairing Public Key",
        PairingDhKeyCheck = 0x0d => "Pairing DH Key Check",
        KeypressNotification = 0x0e => "Keypress Notification",
    }
}

impl Command {
    /// Payload size excluding the command octet.
    pub const fn payload_size(&self) -> usize {
        match self {
            Command::PairingRequest | Command::PairingResponse => 6,
            Command::PairingConfirm | Command::PairingRandom => 16,
            Command::PairingFailed | Command::SecurityRequest | Command::KeypressNotification => 1,
            Command::EncryptionInformation | Command::IdentityInformation | Command::SigningInformation => 16,
            Command::CentralIdentification => 10,
            Command::IdentityAddressInformation => 7,
            Command::PairingPublicKey => 64,
            Command::PairingDhKeyCheck => 16,
        }
    }
}

wire_enum! {
    /// IO capabilities
    // ([Vol 3] Part H, Section 2.3.2).
    pub enum IoCapabilities {
        DisplayOnly = 0x00 => "DisplayOnly",
        DisplayYesNo = 0x01 => "DisplayYesNo",
        KeyboardOnly = 0x02 => "KeyboardOnly",
        NoInputNoOutput = 0x03 => "NoInputNoOutput",
        KeyboardDisplay = 0x04 => "KeyboardDisplay",
    }
}

impl IoCapabilities {
    pub const ALL: [IoCapabilities; 5] = [
        IoCapabilities::DisplayOnly,
        IoCapabilities::DisplayYesNo,
        IoCapabilities::KeyboardOnly,
        IoCapabilities::NoInputNoOutput,
        IoCapabilities::KeyboardDisplay,
    ];
}

wire_enum! {
    /// OOB data flag
    // ([Vol 3] Part H, Section 3.5.1).
    pub enum UseOutOfBand {
        NotPresent = 0x00 => "OOB not present",
        Present = 0x01 => "OOB present",
    }
}

impl From<UseOutOfBand> for bool {
    fn from(val: UseOutOfBand) -> bool {
        val == UseOutOfBand::Present
    }
}

impl From<bool> for UseOutOfBand {
    fn from(present: bool) -> Self {
        if present {
            UseOutOfBand::Present
        } else {
            UseOutOfBand::NotPresent
        }
    }
}

wire_enum! {
    /// Bonding flags of the AuthReq octet
    pub enum BondingFlag {
        NoBonding = 0x00 => "No bonding",
        Bonding = 0x01 => "Bonding",
    }
}

/// AuthReq octet
// ([Vol 3] Part H, Section 3.5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthReq(u8);

impl AuthReq {
    const BONDING_MASK: u8 = 0b0000_0011;
    pub const MITM: u8 = 0b0000_0100;
    pub const SECURE_CONNECTIONS: u8 = 0b0000_1000;
    pub const KEYPRESS: u8 = 0b0001_0000;
    pub const CT2: u8 = 0b0010_0000;

    pub fn new(bonding: BondingFlag, mitm: bool) -> Self {
        let mut raw = u8::from(bonding);
        if mitm {
            raw |= Self::MITM;
        }
        AuthReq(raw)
    }

    pub fn bonding(&self) -> BondingFlag {
        BondingFlag::try_from(self.0 & Self::BONDING_MASK).unwrap_or(BondingFlag::NoBonding)
    }

    /// Man in the middle protection requested.
    pub fn mitm(&self) -> bool {
        self.0 & Self::MITM != 0
    }

    pub fn secure_connections(&self) -> bool {
        self.0 & Self::SECURE_CONNECTIONS != 0
    }
}

impl From<u8> for AuthReq {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<AuthReq> for u8 {
    fn from(value: AuthReq) -> u8 {
        value.0
    }
}

impl fmt::Display for AuthReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bonding())?;
        if self.mitm() {
            f.write_str(" MITM")?;
        }
        if self.secure_connections() {
            f.write_str(" SC")?;
        }
        Ok(())
    }
}

/// Key distribution flags
// ([Vol 3] Part H, Section 3.6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyDistributionFlags(u8);

impl KeyDistributionFlags {
    pub const ENCRYPTION_KEY: u8 = 0b0000_0001;
    pub const IDENTITY_KEY: u8 = 0b0000_0010;
    pub const SIGNING_KEY: u8 = 0b0000_0100;
    pub const LINK_KEY: u8 = 0b0000_1000;

    /// Keys both sides agreed on.
    pub fn intersect(self, other: KeyDistributionFlags) -> KeyDistributionFlags {
        KeyDistributionFlags(self.0 & other.0)
    }

    pub fn encryption_key(&self) -> bool {
        self.0 & Self::ENCRYPTION_KEY != 0
    }

    pub fn identity_key(&self) -> bool {
        self.0 & Self::IDENTITY_KEY != 0
    }
}

impl From<u8> for KeyDistributionFlags {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<KeyDistributionFlags> for u8 {
    fn from(value: KeyDistributionFlags) -> u8 {
        value.0
    }
}

/// Feature block of Pairing Request and Pairing Response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingFeatures {
    pub io_capabilities: IoCapabilities,
    pub use_oob: UseOutOfBand,
    pub auth_req: AuthReq,
    pub maximum_encryption_key_size: u8,
    pub initiator_key_distribution: KeyDistributionFlags,
    pub responder_key_distribution: KeyDistributionFlags,
}

impl PairingFeatures {
    pub const PAYLOAD_SIZE: usize = Command::PairingRequest.payload_size();

    /// Command octet followed by the feature block, as fed to the confirm function.
    pub fn to_pdu(&self, command: Command) -> [u8; 7] {
        let mut pdu = [0u8; 7];
        pdu[0] = command.into();
        pdu[1] = self.io_capabilities.into();
        pdu[2] = self.use_oob.into();
        pdu[3] = self.auth_req.into();
        pdu[4] = self.maximum_encryption_key_size;
        pdu[5] = self.initiator_key_distribution.into();
        pdu[6] = self.responder_key_distribution.into();
        pdu
    }
}

impl Default for PairingFeatures {
    fn default() -> Self {
        Self {
            io_capabilities: IoCapabilities::NoInputNoOutput,
            use_oob: UseOutOfBand::NotPresent,
            auth_req: AuthReq::new(BondingFlag::NoBonding, false),
            maximum_encryption_key_size: ENCRYPTION_KEY_SIZE_128_BITS,
            initiator_key_distribution: KeyDistributionFlags::default(),
            responder_key_distribution: KeyDistributionFlags::default(),
        }
    }
}

impl Type for PairingFeatures {
    fn size(&self) -> usize {
        Self::PAYLOAD_SIZE
    }
}

impl Encode for PairingFeatures {
    fn encode(&self, dest: &mut [u8]) -> Result<(), codec::Error> {
        let pdu = self.to_pdu(Command::PairingRequest);
        dest.get_mut(..Self::PAYLOAD_SIZE)
            .ok_or(codec::Error::InsufficientSpace)?
            .copy_from_slice(&pdu[1..]);
        Ok(())
    }
}

impl Decode<'_> for PairingFeatures {
    /// Key size bounds are left to the pairing procedure, which answers them with a
    /// specific failure reason.
    fn decode(src: &[u8]) -> Result<Self, codec::Error> {
        let src = src.get(..Self::PAYLOAD_SIZE).ok_or(codec::Error::InsufficientSpace)?;
        Ok(Self {
            io_capabilities: IoCapabilities::try_from(src[0]).map_err(|_| codec::Error::InvalidValue)?,
            use_oob: UseOutOfBand::try_from(src[1]).map_err(|_| codec::Error::InvalidValue)?,
            auth_req: AuthReq::from(src[2]),
            maximum_encryption_key_size: src[3],
            initiator_key_distribution: KeyDistributionFlags::from(src[4]),
            responder_key_distribution: KeyDistributionFlags::from(src[5]),
        })
    }
}

impl fmt::Display for PairingFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "I/O {} OOB {} AUTH {} KS {}",
            self.io_capabilities,
            bool::from(self.use_oob),
            self.auth_req,
            self.maximum_encryption_key_size * 8,
        )
    }
}

/// A six digit passkey.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PassKey(pub(crate) u32);

impl PassKey {
    pub const MAX: u32 = 999_999;

    pub fn new(value: u32) -> Option<Self> {
        (value <= Self::MAX).then_some(PassKey(value))
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for PassKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes() {
        assert_eq!(u8::from(Reason::PasskeyEntryFailed), 0x01);
        assert_eq!(u8::from(Reason::ConfirmValueFailed), 0x04);
        assert_eq!(u8::from(Reason::UnspecifiedReason), 0x08);
        assert_eq!(u8::from(Reason::Busy), 0x10);
        for n in 0x01..=0x10u8 {
            assert_eq!(u8::from(Reason::try_from(n).unwrap()), n);
        }
        assert_eq!(Reason::try_from(0), Err(Error::InvalidValue));
        assert_eq!(Reason::try_from(0x11), Err(Error::InvalidValue));
        assert_eq!(Reason::OobNotAvailable.to_string(), "Out-of-band data not available");
    }

    #[test]
    fn io_capabilities_codes() {
        for (n, io) in IoCapabilities::ALL.iter().enumerate() {
            assert_eq!(u8::from(*io), n as u8);
            assert_eq!(IoCapabilities::try_from(n as u8).unwrap(), *io);
        }
        assert_eq!(IoCapabilities::try_from(5), Err(Error::InvalidValue));
    }

    #[test]
    fn command_codes() {
        assert_eq!(Command::try_from(0x03).unwrap(), Command::PairingConfirm);
        assert_eq!(u8::from(Command::KeypressNotification), 0x0e);
        assert_eq!(Command::try_from(0x0f), Err(Error::InvalidValue));
        assert_eq!(Command::PairingRandom.payload_size(), 16);
        assert_eq!(Command::PairingFailed.payload_size(), 1);
    }

    #[test]
    fn features_pdu() {
        // Pairing request of the confirm value sample data ([Vol 3] Part H, Appendix D.1).
        let features = PairingFeatures {
            io_capabilities: IoCapabilities::NoInputNoOutput,
            use_oob: UseOutOfBand::NotPresent,
            auth_req: AuthReq::from(0x00),
            maximum_encryption_key_size: 0x10,
            initiator_key_distribution: KeyDistributionFlags::from(0x07),
            responder_key_distribution: KeyDistributionFlags::from(0x07),
        };
        let pdu = features.to_pdu(Command::PairingRequest);
        assert_eq!(pdu, [0x01, 0x03, 0x00, 0x00, 0x10, 0x07, 0x07]);
        assert_eq!(PairingFeatures::decode(&pdu[1..]).unwrap(), features);
        assert_eq!(
            PairingFeatures::decode(&[0x05, 0, 0, 16, 0, 0]),
            Err(codec::Error::InvalidValue)
        );
        assert_eq!(PairingFeatures::decode(&[0x00]), Err(codec::Error::InsufficientSpace));
    }

    #[test]
    fn auth_req_bits() {
        let auth = AuthReq::new(BondingFlag::Bonding, true);
        assert_eq!(u8::from(auth), 0b101);
        assert!(auth.mitm());
        assert_eq!(auth.bonding(), BondingFlag::Bonding);
        assert!(!AuthReq::from(0x01).mitm());
        assert_eq!(PassKey::new(1_000_000), None);
        assert_eq!(PassKey::new(42).unwrap().to_string(), "000042");
    }
}
