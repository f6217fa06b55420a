//! Opinionated Bluetooth codec
//!
//! Assumes little endian for all types

pub trait FixedSize: Sized {
    const SIZE: usize;
}

pub trait Type: Sized {
    fn size(&self) -> usize;
}

pub trait Encode: Type {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error>;
}

pub trait Decode<'d>: Type {
    fn decode(src: &'d [u8]) -> Result<Self, Error>;
}

impl<T: FixedSize> Type for T {
    fn size(&self) -> usize {
        Self::SIZE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("insufficient space")]
    InsufficientSpace,
    #[error("invalid value")]
    InvalidValue,
}

impl FixedSize for u8 {
    const SIZE: usize = 1;
}

impl Encode for u8 {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        *dest.first_mut().ok_or(Error::InsufficientSpace)? = *self;
        Ok(())
    }
}

impl Decode<'_> for u8 {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        src.first().copied().ok_or(Error::InsufficientSpace)
    }
}

impl FixedSize for u16 {
    const SIZE: usize = 2;
}

impl Encode for u16 {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        dest.get_mut(..2)
            .ok_or(Error::InsufficientSpace)?
            .copy_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl Decode<'_> for u16 {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        let bytes = src.get(..2).ok_or(Error::InsufficientSpace)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }
}

impl<const N: usize> FixedSize for [u8; N] {
    const SIZE: usize = N;
}

impl<const N: usize> Encode for [u8; N] {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        dest.get_mut(..N).ok_or(Error::InsufficientSpace)?.copy_from_slice(self);
        Ok(())
    }
}

impl<const N: usize> Decode<'_> for [u8; N] {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        src.get(..N)
            .ok_or(Error::InsufficientSpace)?
            .try_into()
            .map_err(|_| Error::InvalidValue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives() {
        let mut buf = [0u8; 4];
        0x1234u16.encode(&mut buf).unwrap();
        assert_eq!(buf[..2], [0x34, 0x12]);
        assert_eq!(u16::decode(&buf).unwrap(), 0x1234);
        assert_eq!(u16::decode(&buf[..1]), Err(Error::InsufficientSpace));
        assert_eq!(<[u8; 3]>::decode(&[1, 2, 3, 4]).unwrap(), [1, 2, 3]);
        assert_eq!(u8::decode(&[]), Err(Error::InsufficientSpace));
    }
}
