//! Position tracking over byte slices, for building and walking packets.

use crate::codec::{Decode, Encode, Error};

/// Appends into a borrowed buffer, failing instead of growing.
pub struct WriteCursor<'d> {
    pos: usize,
    data: &'d mut [u8],
}

impl<'d> WriteCursor<'d> {
    pub fn new(data: &'d mut [u8]) -> Self {
        Self { pos: 0, data }
    }

    /// Claim the next `n` octets.
    fn reserve(&mut self, n: usize) -> Result<&mut [u8], Error> {
        if self.available() < n {
            return Err(Error::InsufficientSpace);
        }
        let start = self.pos;
        self.pos += n;
        Ok(&mut self.data[start..start + n])
    }

    pub fn append(&mut self, data: &[u8]) -> Result<(), Error> {
        self.reserve(data.len())?.copy_from_slice(data);
        Ok(())
    }

    pub fn write<E: Encode>(&mut self, data: E) -> Result<(), Error> {
        self.write_ref(&data)
    }

    pub fn write_ref<E: Encode>(&mut self, data: &E) -> Result<(), Error> {
        let start = self.pos;
        let result = self.reserve(data.size()).and_then(|dest| data.encode(dest));
        if result.is_err() {
            self.pos = start;
        }
        result
    }

    pub fn available(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Octets written so far.
    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    /// The written prefix of the buffer.
    pub fn finish(self) -> &'d mut [u8] {
        &mut self.data[..self.pos]
    }
}

#[derive(Clone, Debug)]
pub struct ReadCursor<'d> {
    pos: usize,
    data: &'d [u8],
}

impl<'d> ReadCursor<'d> {
    pub fn new(data: &'d [u8]) -> Self {
        Self { pos: 0, data }
    }

    pub fn read<T: Decode<'d>>(&mut self) -> Result<T, Error> {
        let val = T::decode(&self.data[self.pos..])?;
        self.pos += val.size();
        Ok(val)
    }

    /// Borrow the next `nbytes` octets.
    pub fn slice(&mut self, nbytes: usize) -> Result<&'d [u8], Error> {
        let rest = &self.data[self.pos..];
        let out = rest.get(..nbytes).ok_or(Error::InsufficientSpace)?;
        self.pos += nbytes;
        Ok(out)
    }

    pub fn available(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Octets consumed so far.
    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    pub fn remaining(self) -> &'d [u8] {
        &self.data[self.pos..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let mut buf = [0u8; 5];
        let mut w = WriteCursor::new(&mut buf);
        w.write(0x0419u16).unwrap();
        w.append(&[1, 2]).unwrap();
        assert_eq!(w.available(), 1);
        assert!(w.append(&[3, 4]).is_err());
        assert!(w.write(0u16).is_err());
        assert_eq!(w.len(), 4);
        assert_eq!(w.finish(), &[0x19, 0x04, 1, 2]);

        let mut r = ReadCursor::new(&buf);
        assert_eq!(r.read::<u16>().unwrap(), 0x0419);
        assert_eq!(r.slice(2).unwrap(), &[1, 2]);
        assert!(r.slice(2).is_err());
        assert_eq!(r.len(), 4);
        assert_eq!(r.remaining(), &[0]);
    }
}
