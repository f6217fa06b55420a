//! Length-type-value sequences, as carried in LE Audio codec configuration and metadata.
use std::collections::BTreeMap;

use crate::codec::Error;
use crate::cursor::{ReadCursor, WriteCursor};

/// LTV entries keyed and ordered by type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LtvMap {
    values: BTreeMap<u8, Vec<u8>>,
}

impl LtvMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a whole LTV sequence.
    ///
    /// Zero length entries are skipped. A repeated type keeps its first value.
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        let mut map = Self::new();
        let mut r = ReadCursor::new(data);
        while r.available() > 0 {
            let len: u8 = r.read()?;
            if len == 0 {
                continue;
            }
            let entry = r.slice(usize::from(len))?;
            let (ty, value) = (entry[0], &entry[1..]);
            map.values.entry(ty).or_insert_with(|| value.to_vec());
        }
        Ok(map)
    }

    pub fn insert(&mut self, ty: u8, value: &[u8]) -> Result<(), Error> {
        if value.len() >= usize::from(u8::MAX) {
            return Err(Error::InvalidValue);
        }
        self.values.insert(ty, value.to_vec());
        Ok(())
    }

    pub fn get(&self, ty: u8) -> Option<&[u8]> {
        self.values.get(&ty).map(Vec::as_slice)
    }

    pub fn remove(&mut self, ty: u8) -> Option<Vec<u8>> {
        self.values.remove(&ty)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &[u8])> {
        self.values.iter().map(|(ty, value)| (*ty, value.as_slice()))
    }

    /// Serialized size in octets.
    pub fn raw_size(&self) -> usize {
        self.values.values().map(|v| v.len() + 2).sum()
    }

    /// Serialize in type order into `dest`, returning the written length.
    pub fn encode(&self, dest: &mut [u8]) -> Result<usize, Error> {
        let mut w = WriteCursor::new(dest);
        for (ty, value) in self.iter() {
            // Bounded by insert and parse.
            w.append(&[(value.len() + 1) as u8, ty])?;
            w.append(value)?;
        }
        Ok(w.len())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0; self.raw_size()];
        // Sized by raw_size, cannot run out of space.
        let _ = self.encode(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_codec_configuration() {
        // Sampling frequency 48 kHz, frame duration 10 ms, 120 octets per frame.
        let data = [0x02, 0x01, 0x08, 0x02, 0x02, 0x01, 0x03, 0x04, 0x78, 0x00];
        let map = LtvMap::parse(&data).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(0x01), Some(&[0x08][..]));
        assert_eq!(map.get(0x04), Some(&[0x78, 0x00][..]));
        assert_eq!(map.get(0x03), None);
        assert_eq!(map.to_vec(), data);
    }

    #[test]
    fn truncated_entry() {
        assert_eq!(LtvMap::parse(&[0x03, 0x01, 0x08]), Err(Error::InsufficientSpace));
    }

    #[test]
    fn empty_entries_and_duplicates() {
        let map = LtvMap::parse(&[0x00, 0x02, 0x05, 0x01, 0x02, 0x05, 0x02]).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(0x05), Some(&[0x01][..]));
    }

    #[test]
    fn ordered_output() {
        let mut map = LtvMap::new();
        map.insert(0x03, &[0x01, 0x00, 0x00, 0x00]).unwrap();
        map.insert(0x01, &[0x06]).unwrap();
        assert_eq!(map.raw_size(), 9);
        assert_eq!(map.to_vec(), [0x02, 0x01, 0x06, 0x05, 0x03, 0x01, 0x00, 0x00, 0x00]);
        assert_eq!(map.remove(0x01), Some(vec![0x06]));
        assert!(map.insert(0x02, &[0; 255]).is_err());

        let mut small = [0u8; 3];
        assert_eq!(map.encode(&mut small), Err(Error::InsufficientSpace));
    }
}
