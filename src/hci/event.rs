//! HCI event packets.
use super::{Address, ErrorCode};
use crate::codec::{self, Error};
use crate::cursor::ReadCursor;

pub const CONNECTION_COMPLETE: u8 = 0x03;
pub const REMOTE_NAME_REQUEST_COMPLETE: u8 = 0x07;
pub const COMMAND_COMPLETE: u8 = 0x0e;
pub const COMMAND_STATUS: u8 = 0x0f;
pub const REMOTE_HOST_SUPPORTED_FEATURES_NOTIFICATION: u8 = 0x3d;

/// Longest remote name, in bytes.
pub const REMOTE_NAME_LEN: usize = 248;

/// An owned event, as received from the controller without the packet indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPacket {
    code: u8,
    parameters: Vec<u8>,
}

impl EventPacket {
    /// Parse event code, parameter length and parameters.
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        let mut r = ReadCursor::new(data);
        let code: u8 = r.read()?;
        let len: u8 = r.read()?;
        let parameters = r.slice(len as usize)?.to_vec();
        Ok(Self { code, parameters })
    }

    pub fn new(code: u8, parameters: &[u8]) -> Self {
        Self {
            code,
            parameters: parameters.to_vec(),
        }
    }

    pub fn code(&self) -> u8 {
        self.code
    }

    pub fn parameters(&self) -> &[u8] {
        &self.parameters
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.parameters.len());
        out.push(self.code);
        out.push(self.parameters.len() as u8);
        out.extend_from_slice(&self.parameters);
        out
    }

    pub fn decode(&self) -> Result<Event<'_>, Error> {
        Event::decode(self)
    }
}

/// Decoded view of the events the host core consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event<'d> {
    CommandComplete {
        num_packets: u8,
        opcode: u16,
        return_parameters: &'d [u8],
    },
    CommandStatus {
        status: ErrorCode,
        num_packets: u8,
        opcode: u16,
    },
    ConnectionComplete {
        status: ErrorCode,
        handle: u16,
        address: Address,
        link_type: u8,
        encryption_enabled: bool,
    },
    RemoteNameRequestComplete {
        status: ErrorCode,
        address: Address,
        /// Name bytes up to the first NUL.
        name: &'d [u8],
    },
    RemoteHostSupportedFeaturesNotification {
        address: Address,
        features: u64,
    },
    Unknown {
        code: u8,
    },
}

fn read_address(r: &mut ReadCursor<'_>) -> Result<Address, Error> {
    Ok(Address::public(r.read()?))
}

impl<'d> Event<'d> {
    pub fn decode(packet: &'d EventPacket) -> Result<Self, Error> {
        let mut r = ReadCursor::new(&packet.parameters);
        Ok(match packet.code {
            COMMAND_COMPLETE => {
                let num_packets = r.read()?;
                let opcode = r.read()?;
                Self::CommandComplete {
                    num_packets,
                    opcode,
                    return_parameters: r.remaining(),
                }
            }
            COMMAND_STATUS => {
                let status = ErrorCode::from(r.read::<u8>()?);
                let num_packets = r.read()?;
                let opcode = r.read()?;
                Self::CommandStatus {
                    status,
                    num_packets,
                    opcode,
                }
            }
            CONNECTION_COMPLETE => {
                let status = ErrorCode::from(r.read::<u8>()?);
                let handle = r.read::<u16>()? & 0x0fff;
                let address = read_address(&mut r)?;
                let link_type = r.read()?;
                let encryption_enabled = r.read::<u8>()? != 0;
                Self::ConnectionComplete {
                    status,
                    handle,
                    address,
                    link_type,
                    encryption_enabled,
                }
            }
            REMOTE_NAME_REQUEST_COMPLETE => {
                let status = ErrorCode::from(r.read::<u8>()?);
                let address = read_address(&mut r)?;
                let raw = r.remaining();
                if raw.len() > REMOTE_NAME_LEN {
                    return Err(codec::Error::InvalidValue);
                }
                let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
                Self::RemoteNameRequestComplete {
                    status,
                    address,
                    name: &raw[..end],
                }
            }
            REMOTE_HOST_SUPPORTED_FEATURES_NOTIFICATION => {
                let address = read_address(&mut r)?;
                let features: [u8; 8] = r.read()?;
                Self::RemoteHostSupportedFeaturesNotification {
                    address,
                    features: u64::from_le_bytes(features),
                }
            }
            code => Self::Unknown { code },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_checks_length() {
        assert_eq!(EventPacket::parse(&[0x0e]), Err(Error::InsufficientSpace));
        assert_eq!(EventPacket::parse(&[0x0e, 4, 1, 2]), Err(Error::InsufficientSpace));
        let packet = EventPacket::parse(&[0x0f, 4, 0x00, 1, 0x19, 0x04, 0xff]).unwrap();
        assert_eq!(packet.code(), COMMAND_STATUS);
        assert_eq!(packet.parameters().len(), 4);
        assert_eq!(
            packet.decode().unwrap(),
            Event::CommandStatus {
                status: ErrorCode::Success,
                num_packets: 1,
                opcode: 0x0419,
            }
        );
    }

    #[test]
    fn remote_name_is_trimmed() {
        let mut params = vec![0x00, 6, 5, 4, 3, 2, 1];
        params.extend_from_slice(b"phone");
        params.resize(7 + REMOTE_NAME_LEN, 0);
        let packet = EventPacket::new(REMOTE_NAME_REQUEST_COMPLETE, &params);
        match packet.decode().unwrap() {
            Event::RemoteNameRequestComplete { status, address, name } => {
                assert!(status.is_success());
                assert_eq!(address, Address::public([6, 5, 4, 3, 2, 1]));
                assert_eq!(name, b"phone");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn features_and_connection_complete() {
        let mut params = vec![1, 2, 3, 4, 5, 6];
        params.extend_from_slice(&0x0102u64.to_le_bytes());
        let packet = EventPacket::new(REMOTE_HOST_SUPPORTED_FEATURES_NOTIFICATION, &params);
        assert!(matches!(
            packet.decode(),
            Ok(Event::RemoteHostSupportedFeaturesNotification { features: 0x0102, .. })
        ));

        let packet = EventPacket::new(CONNECTION_COMPLETE, &[0x04, 0x01, 0x00, 1, 2, 3, 4, 5, 6, 1, 0]);
        assert!(matches!(
            packet.decode(),
            Ok(Event::ConnectionComplete {
                status: ErrorCode::PageTimeout,
                handle: 1,
                ..
            })
        ));

        assert_eq!(
            EventPacket::new(0x42, &[]).decode().unwrap(),
            Event::Unknown { code: 0x42 }
        );
    }
}
