//! GAP advertising and EIR data ([CSS] Part A).
use crate::codec::Error;
use crate::cursor::{ReadCursor, WriteCursor};

pub const AD_FLAG_LE_LIMITED_DISCOVERABLE: u8 = 0b00000001;
pub const LE_GENERAL_DISCOVERABLE: u8 = 0b00000010;
pub const BR_EDR_NOT_SUPPORTED: u8 = 0b00000100;
pub const SIMUL_LE_BR_CONTROLLER: u8 = 0b00001000;
pub const SIMUL_LE_BR_HOST: u8 = 0b00010000;

const FLAGS: u8 = 0x01;
const INCOMPLETE_UUIDS_16: u8 = 0x02;
const COMPLETE_UUIDS_16: u8 = 0x03;
const INCOMPLETE_UUIDS_128: u8 = 0x06;
const COMPLETE_UUIDS_128: u8 = 0x07;
const SHORTENED_LOCAL_NAME: u8 = 0x08;
const COMPLETE_LOCAL_NAME: u8 = 0x09;
const SERVICE_DATA_16: u8 = 0x16;
const MANUFACTURER_SPECIFIC_DATA: u8 = 0xff;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AdStructure<'a> {
    /// Device flags and baseband capabilities.
    Flags(u8),

    /// Little endian 16-bit service UUIDs, two octets each.
    ServiceUuids16 { complete: bool, uuids: &'a [u8] },
    /// Little endian 128-bit service UUIDs, sixteen octets each.
    ServiceUuids128 { complete: bool, uuids: &'a [u8] },

    ServiceData16 {
        uuid: u16,
        data: &'a [u8],
    },

    /// Device name as raw UTF-8. Remote names are not guaranteed to be valid.
    CompleteLocalName(&'a [u8]),
    ShortenedLocalName(&'a [u8]),

    ManufacturerSpecificData {
        company_identifier: u16,
        payload: &'a [u8],
    },

    /// Any other AD type, kept as raw bytes.
    Unknown {
        ty: u8,
        data: &'a [u8],
    },
}

impl<'a> AdStructure<'a> {
    /// Iterate over every AD structure in `data`.
    ///
    /// A zero length octet ends the data; what follows is padding.
    pub fn decode(data: &'a [u8]) -> impl Iterator<Item = Result<AdStructure<'a>, Error>> + 'a {
        AdStructureIter {
            cursor: ReadCursor::new(data),
            done: false,
        }
    }

    fn parse(ty: u8, data: &'a [u8]) -> Result<Self, Error> {
        Ok(match ty {
            FLAGS => AdStructure::Flags(*data.first().ok_or(Error::InsufficientSpace)?),
            INCOMPLETE_UUIDS_16 | COMPLETE_UUIDS_16 => {
                if data.len() % 2 != 0 {
                    return Err(Error::InvalidValue);
                }
                AdStructure::ServiceUuids16 {
                    complete: ty == COMPLETE_UUIDS_16,
                    uuids: data,
                }
            }
            INCOMPLETE_UUIDS_128 | COMPLETE_UUIDS_128 => {
                if data.len() % 16 != 0 {
                    return Err(Error::InvalidValue);
                }
                AdStructure::ServiceUuids128 {
                    complete: ty == COMPLETE_UUIDS_128,
                    uuids: data,
                }
            }
            SHORTENED_LOCAL_NAME => AdStructure::ShortenedLocalName(data),
            COMPLETE_LOCAL_NAME => AdStructure::CompleteLocalName(data),
            SERVICE_DATA_16 => {
                let mut r = ReadCursor::new(data);
                let uuid: u16 = r.read()?;
                AdStructure::ServiceData16 {
                    uuid,
                    data: r.remaining(),
                }
            }
            MANUFACTURER_SPECIFIC_DATA => {
                let mut r = ReadCursor::new(data);
                let company_identifier: u16 = r.read()?;
                AdStructure::ManufacturerSpecificData {
                    company_identifier,
                    payload: r.remaining(),
                }
            }
            ty => AdStructure::Unknown { ty, data },
        })
    }

    /// 16-bit UUIDs of a [`AdStructure::ServiceUuids16`], empty otherwise.
    pub fn uuids16(&self) -> impl Iterator<Item = u16> + 'a {
        let uuids: &'a [u8] = match self {
            AdStructure::ServiceUuids16 { uuids, .. } => *uuids,
            _ => &[],
        };
        uuids.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]]))
    }

    /// Append this structure, length octet included.
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), Error> {
        let (ty, prefix, body): (u8, Option<u16>, &[u8]) = match self {
            AdStructure::Flags(flags) => (FLAGS, None, core::slice::from_ref(flags)),
            AdStructure::ServiceUuids16 { complete, uuids } => {
                (if *complete { COMPLETE_UUIDS_16 } else { INCOMPLETE_UUIDS_16 }, None, *uuids)
            }
            AdStructure::ServiceUuids128 { complete, uuids } => {
                (if *complete { COMPLETE_UUIDS_128 } else { INCOMPLETE_UUIDS_128 }, None, *uuids)
            }
            AdStructure::ShortenedLocalName(name) => (SHORTENED_LOCAL_NAME, None, *name),
            AdStructure::CompleteLocalName(name) => (COMPLETE_LOCAL_NAME, None, *name),
            AdStructure::ServiceData16 { uuid, data } => (SERVICE_DATA_16, Some(*uuid), *data),
            AdStructure::ManufacturerSpecificData {
                company_identifier,
                payload,
            } => (MANUFACTURER_SPECIFIC_DATA, Some(*company_identifier), *payload),
            AdStructure::Unknown { ty, data } => (*ty, None, *data),
        };
        let len = 1 + body.len() + if prefix.is_some() { 2 } else { 0 };
        let len = u8::try_from(len).map_err(|_| Error::InvalidValue)?;
        w.append(&[len, ty])?;
        if let Some(prefix) = prefix {
            w.write(prefix)?;
        }
        w.append(body)
    }
}

struct AdStructureIter<'d> {
    cursor: ReadCursor<'d>,
    done: bool,
}

impl<'d> AdStructureIter<'d> {
    fn read(&mut self) -> Result<Option<AdStructure<'d>>, Error> {
        if self.cursor.available() == 0 {
            return Ok(None);
        }
        let len: u8 = self.cursor.read()?;
        if len == 0 {
            return Ok(None);
        }
        let ty: u8 = self.cursor.read()?;
        let data = self.cursor.slice(usize::from(len) - 1)?;
        AdStructure::parse(ty, data).map(Some)
    }
}

impl<'d> Iterator for AdStructureIter<'d> {
    type Item = Result<AdStructure<'d>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read() {
            Ok(Some(ad)) => Some(Ok(ad)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Build advertising or EIR data out of `ad` into `dest`, returning the used length.
pub fn encode_ad_structures(ad: &[AdStructure<'_>], dest: &mut [u8]) -> Result<usize, Error> {
    let mut w = WriteCursor::new(dest);
    for item in ad {
        item.encode(&mut w)?;
    }
    Ok(w.len())
}
