//! HCI command packets.
use heapless::Vec;

use super::Address;
use crate::codec::{self, Encode};
use crate::cursor::WriteCursor;

pub const LINK_CONTROL_OGF: u8 = 0x01;
pub const CREATE_CONNECTION_OCF: u16 = 0x0005;
pub const REMOTE_NAME_REQUEST_OCF: u16 = 0x0019;
pub const REMOTE_NAME_REQUEST_CANCEL_OCF: u16 = 0x001a;

pub const fn opcode(ogf: u8, ocf: u16) -> u16 {
    ((ogf as u16) << 10) + ocf
}

pub const CREATE_CONNECTION: u16 = opcode(LINK_CONTROL_OGF, CREATE_CONNECTION_OCF);
pub const REMOTE_NAME_REQUEST: u16 = opcode(LINK_CONTROL_OGF, REMOTE_NAME_REQUEST_OCF);
pub const REMOTE_NAME_REQUEST_CANCEL: u16 = opcode(LINK_CONTROL_OGF, REMOTE_NAME_REQUEST_CANCEL_OCF);

/// Largest parameter block a command can carry.
pub const MAX_PARAMETERS: usize = 255;

/// Opcode and parameters of an HCI command, ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    opcode: u16,
    parameters: Vec<u8, MAX_PARAMETERS>,
}

impl CommandPacket {
    pub fn new(opcode: u16, parameters: &[u8]) -> Result<Self, codec::Error> {
        Ok(Self {
            opcode,
            parameters: Vec::from_slice(parameters).map_err(|_| codec::Error::InsufficientSpace)?,
        })
    }

    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    pub fn ogf(&self) -> u8 {
        ((self.opcode & 0b1111_1100_0000_0000) >> 10) as u8
    }

    pub fn ocf(&self) -> u16 {
        self.opcode & 0b11_1111_1111
    }

    pub fn parameters(&self) -> &[u8] {
        &self.parameters
    }

    /// Serialize as opcode, parameter length and parameters.
    pub fn to_bytes(&self) -> std::vec::Vec<u8> {
        let mut out = std::vec::Vec::with_capacity(3 + self.parameters.len());
        out.extend_from_slice(&self.opcode.to_le_bytes());
        out.push(self.parameters.len() as u8);
        out.extend_from_slice(&self.parameters);
        out
    }
}

/// Page scan repetition mode of the remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageScanRepetitionMode {
    #[default]
    R0,
    R1,
    R2,
}

impl From<PageScanRepetitionMode> for u8 {
    fn from(mode: PageScanRepetitionMode) -> u8 {
        match mode {
            PageScanRepetitionMode::R0 => 0x00,
            PageScanRepetitionMode::R1 => 0x01,
            PageScanRepetitionMode::R2 => 0x02,
        }
    }
}

/// Clock offset with its valid flag in bit 15.
fn clock_offset_field(clock_offset: Option<u16>) -> u16 {
    match clock_offset {
        Some(offset) => (offset & 0x7fff) | 0x8000,
        None => 0,
    }
}

/// HCI_Remote_Name_Request
// ([Vol 4] Part E, Section 7.1.19).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteNameRequest {
    pub address: Address,
    pub page_scan_repetition_mode: PageScanRepetitionMode,
    pub clock_offset: Option<u16>,
}

impl RemoteNameRequest {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            page_scan_repetition_mode: PageScanRepetitionMode::default(),
            clock_offset: None,
        }
    }

    pub fn build(&self) -> Result<CommandPacket, codec::Error> {
        let mut params = [0u8; 10];
        let mut w = WriteCursor::new(&mut params);
        w.write(self.address.bytes())?;
        w.write(u8::from(self.page_scan_repetition_mode))?;
        // Reserved
        w.write(0u8)?;
        w.write(clock_offset_field(self.clock_offset))?;
        CommandPacket::new(REMOTE_NAME_REQUEST, w.finish())
    }
}

/// HCI_Remote_Name_Request_Cancel
pub fn remote_name_request_cancel(address: Address) -> Result<CommandPacket, codec::Error> {
    let mut params = [0u8; 6];
    address.bytes().encode(&mut params)?;
    CommandPacket::new(REMOTE_NAME_REQUEST_CANCEL, &params)
}

/// HCI_Create_Connection
// ([Vol 4] Part E, Section 7.1.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateConnection {
    pub address: Address,
    pub packet_type: u16,
    pub page_scan_repetition_mode: PageScanRepetitionMode,
    pub clock_offset: Option<u16>,
    pub allow_role_switch: bool,
}

impl CreateConnection {
    /// DM1/DH1/DM3/DH3/DM5/DH5
    pub const DEFAULT_PACKET_TYPE: u16 = 0xcc18;

    pub fn new(address: Address) -> Self {
        Self {
            address,
            packet_type: Self::DEFAULT_PACKET_TYPE,
            page_scan_repetition_mode: PageScanRepetitionMode::R1,
            clock_offset: None,
            allow_role_switch: true,
        }
    }

    pub fn build(&self) -> Result<CommandPacket, codec::Error> {
        let mut params = [0u8; 13];
        let mut w = WriteCursor::new(&mut params);
        w.write(self.address.bytes())?;
        w.write(self.packet_type)?;
        w.write(u8::from(self.page_scan_repetition_mode))?;
        w.write(0u8)?;
        w.write(clock_offset_field(self.clock_offset))?;
        w.write(u8::from(self.allow_role_switch))?;
        CommandPacket::new(CREATE_CONNECTION, w.finish())
    }
}
