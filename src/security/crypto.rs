//! LE legacy pairing toolbox ([Vol 3] Part H, Section 2.2).
//!
//! All 128-bit values are little endian: index 0 holds the least significant octet,
//! the order in which they travel over the air.
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;

pub type Octet16 = [u8; 16];

/// Security function e: AES-128 with little endian key, input and output.
pub fn e(key: &Octet16, plaintext: &Octet16) -> Octet16 {
    let mut key_be = *key;
    key_be.reverse();
    let cipher = Aes128::new(GenericArray::from_slice(&key_be));

    let mut block = *plaintext;
    block.reverse();
    let mut block = GenericArray::from(block);
    cipher.encrypt_block(&mut block);

    let mut out = [0u8; 16];
    out.copy_from_slice(&block);
    out.reverse();
    out
}

fn xor(a: &Octet16, b: &Octet16) -> Octet16 {
    let mut out = [0u8; 16];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
        *o = x ^ y;
    }
    out
}

/// Confirm value generation function c1.
///
/// `preq`/`pres` are the pairing request and response commands including their opcode.
/// `ia`/`ra` are the initiator and responder addresses in wire order, `iat`/`rat` their
/// types (0 public, 1 random).
#[allow(clippy::too_many_arguments)]
pub fn c1(
    k: &Octet16,
    r: &Octet16,
    preq: &[u8; 7],
    pres: &[u8; 7],
    iat: u8,
    ia: &[u8; 6],
    rat: u8,
    ra: &[u8; 6],
) -> Octet16 {
    let mut p1 = [0u8; 16];
    p1[0] = iat;
    p1[1] = rat;
    p1[2..9].copy_from_slice(preq);
    p1[9..16].copy_from_slice(pres);

    let mut p2 = [0u8; 16];
    p2[0..6].copy_from_slice(ra);
    p2[6..12].copy_from_slice(ia);

    let stage = e(k, &xor(r, &p1));
    e(k, &xor(&stage, &p2))
}

/// Key generation function s1. Legacy pairing calls it as `s1(TK, Srand, Mrand)`.
pub fn s1(k: &Octet16, r1: &Octet16, r2: &Octet16) -> Octet16 {
    let mut r = [0u8; 16];
    r[0..8].copy_from_slice(&r2[0..8]);
    r[8..16].copy_from_slice(&r1[0..8]);
    e(k, &r)
}

/// Compare without an early exit on the first differing octet.
pub fn constant_time_eq(a: &Octet16, b: &Octet16) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Keep the `key_size` least significant octets of `key`.
pub fn mask_key(key: &Octet16, key_size: u8) -> Octet16 {
    let mut out = *key;
    let keep = usize::from(key_size).min(out.len());
    out[keep..].fill(0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le(v: u128) -> Octet16 {
        v.to_le_bytes()
    }

    #[test]
    fn c1_sample_data() {
        // [Vol 3] Part H, Section 2.2.3.
        let k = le(0);
        let r = le(0x5783D52156AD6F0E6388274EC6702EE0);
        let mut preq = [0u8; 7];
        preq.copy_from_slice(&0x07071000000101u64.to_le_bytes()[..7]);
        let mut pres = [0u8; 7];
        pres.copy_from_slice(&0x05000800000302u64.to_le_bytes()[..7]);
        let mut ia = [0u8; 6];
        ia.copy_from_slice(&0xA1A2A3A4A5A6u64.to_le_bytes()[..6]);
        let mut ra = [0u8; 6];
        ra.copy_from_slice(&0xB1B2B3B4B5B6u64.to_le_bytes()[..6]);

        let confirm = c1(&k, &r, &preq, &pres, 1, &ia, 0, &ra);
        assert_eq!(confirm, le(0x1e1e3fef878988ead2a74dc5bef13b86));
    }

    #[test]
    fn s1_sample_data() {
        // [Vol 3] Part H, Section 2.2.4.
        let k = le(0);
        let r1 = le(0x000F0E0D0C0B0A091122334455667788);
        let r2 = le(0x010203040506070899AABBCCDDEEFF00);
        assert_eq!(s1(&k, &r1, &r2), le(0x9a1fe1f0e8b0f49b5b4216ae796da062));
    }

    #[test]
    fn compare_and_mask() {
        let a = le(0x0102);
        let mut b = a;
        assert!(constant_time_eq(&a, &b));
        b[15] ^= 0x80;
        assert!(!constant_time_eq(&a, &b));

        let masked = mask_key(&[0xff; 16], 7);
        assert_eq!(masked[..7], [0xff; 7]);
        assert_eq!(masked[7..], [0; 9]);
        assert_eq!(mask_key(&[0xff; 16], 16), [0xff; 16]);
    }
}
