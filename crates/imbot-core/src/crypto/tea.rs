//! 16-round TEA in the protocol's chained padding mode
//!
//! Every envelope on the wire is sealed with this cipher. Plaintext is prefixed
//! with 3..=10 bytes of random padding (the low three bits of the first byte
//! record how much) and suffixed with seven zero bytes, which double as the
//! integrity check on decryption.

use crate::errors::{ImbotError, PacketError, Result};
use crate::utils::random_u32;

const DELTA: u32 = 0x9E37_79B9;
const ROUNDS: u32 = 16;
const BLOCK: usize = 8;
const ZERO_TAIL: usize = 7;

/// All-zero key used for frames sent before a session key exists
pub const EMPTY_KEY: [u8; 16] = [0u8; 16];

fn split_key(key: &[u8; 16]) -> [u32; 4] {
    [
        u32::from_be_bytes([key[0], key[1], key[2], key[3]]),
        u32::from_be_bytes([key[4], key[5], key[6], key[7]]),
        u32::from_be_bytes([key[8], key[9], key[10], key[11]]),
        u32::from_be_bytes([key[12], key[13], key[14], key[15]]),
    ]
}

fn encipher(block: u64, k: &[u32; 4]) -> u64 {
    let mut v0 = (block >> 32) as u32;
    let mut v1 = block as u32;
    let mut sum: u32 = 0;
    for _ in 0..ROUNDS {
        sum = sum.wrapping_add(DELTA);
        v0 = v0.wrapping_add(
            (v1 << 4).wrapping_add(k[0]) ^ v1.wrapping_add(sum) ^ (v1 >> 5).wrapping_add(k[1]),
        );
        v1 = v1.wrapping_add(
            (v0 << 4).wrapping_add(k[2]) ^ v0.wrapping_add(sum) ^ (v0 >> 5).wrapping_add(k[3]),
        );
    }
    ((v0 as u64) << 32) | v1 as u64
}

fn decipher(block: u64, k: &[u32; 4]) -> u64 {
    let mut v0 = (block >> 32) as u32;
    let mut v1 = block as u32;
    let mut sum: u32 = DELTA.wrapping_mul(ROUNDS);
    for _ in 0..ROUNDS {
        v1 = v1.wrapping_sub(
            (v0 << 4).wrapping_add(k[2]) ^ v0.wrapping_add(sum) ^ (v0 >> 5).wrapping_add(k[3]),
        );
        v0 = v0.wrapping_sub(
            (v1 << 4).wrapping_add(k[0]) ^ v1.wrapping_add(sum) ^ (v1 >> 5).wrapping_add(k[1]),
        );
        sum = sum.wrapping_sub(DELTA);
    }
    ((v0 as u64) << 32) | v1 as u64
}

fn read_block(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; BLOCK];
    buf.copy_from_slice(&bytes[..BLOCK]);
    u64::from_be_bytes(buf)
}

/// Encrypt `plain` under `key`
pub fn encrypt(plain: &[u8], key: &[u8; 16]) -> Vec<u8> {
    let k = split_key(key);
    let fill = 10 - (plain.len() + 1) % BLOCK;
    let total = fill + plain.len() + ZERO_TAIL;

    let mut buffer = Vec::with_capacity(total);
    buffer.push(((random_u32() as u8) & 0xF8) | (fill - 3) as u8);
    for _ in 1..fill {
        buffer.push(random_u32() as u8);
    }
    buffer.extend_from_slice(plain);
    buffer.resize(total, 0);

    let mut out = Vec::with_capacity(total);
    let mut prev_cipher: u64 = 0;
    let mut prev_mixed: u64 = 0;
    for chunk in buffer.chunks_exact(BLOCK) {
        let mixed = read_block(chunk) ^ prev_cipher;
        let cipher = encipher(mixed, &k) ^ prev_mixed;
        out.extend_from_slice(&cipher.to_be_bytes());
        prev_mixed = mixed;
        prev_cipher = cipher;
    }
    out
}

/// Decrypt `cipher` under `key`, verifying padding and the zero tail
pub fn decrypt(cipher: &[u8], key: &[u8; 16]) -> Result<Vec<u8>> {
    if cipher.len() < 2 * BLOCK || cipher.len() % BLOCK != 0 {
        return Err(ImbotError::InvalidPacket(PacketError::Generic {
            message: format!("TEA ciphertext has invalid length {}", cipher.len()),
        }));
    }

    let k = split_key(key);
    let mut plain = Vec::with_capacity(cipher.len());
    let mut prev_cipher: u64 = 0;
    let mut prev_mixed: u64 = 0;
    for chunk in cipher.chunks_exact(BLOCK) {
        let block = read_block(chunk);
        let mixed = decipher(block ^ prev_mixed, &k);
        plain.extend_from_slice(&(mixed ^ prev_cipher).to_be_bytes());
        prev_mixed = mixed;
        prev_cipher = block;
    }

    let start = (plain[0] & 0x07) as usize + 3;
    let end = plain.len() - ZERO_TAIL;
    if start > end || plain[end..].iter().any(|&b| b != 0) {
        return Err(ImbotError::InvalidPacket(PacketError::Generic {
            message: "TEA padding check failed".to_string(),
        }));
    }
    Ok(plain[start..end].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KEY: [u8; 16] = *b"0123456789abcdef";

    #[test]
    fn test_empty_plaintext() {
        let sealed = encrypt(&[], &KEY);
        assert_eq!(sealed.len(), 16);
        assert_eq!(decrypt(&sealed, &KEY).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let sealed = encrypt(b"session payload with some length", &KEY);
        assert!(decrypt(&sealed, &EMPTY_KEY).is_err());
    }

    #[test]
    fn test_invalid_lengths_are_rejected() {
        assert!(decrypt(&[0u8; 8], &KEY).is_err());
        assert!(decrypt(&[0u8; 17], &KEY).is_err());
    }

    #[test]
    fn test_ciphertext_is_randomised() {
        let a = encrypt(b"same", &KEY);
        let b = encrypt(b"same", &KEY);
        // Padding bytes are random, so two seals of the same text differ almost surely
        assert_eq!(a.len(), b.len());
        assert_eq!(decrypt(&a, &KEY).unwrap(), decrypt(&b, &KEY).unwrap());
    }

    proptest! {
        #[test]
        fn prop_decrypt_inverts_encrypt(data in proptest::collection::vec(any::<u8>(), 0..300)) {
            let sealed = encrypt(&data, &KEY);
            prop_assert_eq!(sealed.len() % 8, 0);
            prop_assert_eq!(decrypt(&sealed, &KEY).unwrap(), data);
        }
    }
}
