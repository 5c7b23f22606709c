//! Small shared helpers: IPv4 parsing and randomness

use rand_core::{OsRng, RngCore};

// ----------------------------------------------------------------------------
// IPv4 Parsing
// ----------------------------------------------------------------------------

/// Returned by [`ip_to_long`] for input that is not a dotted quad
pub const INVALID_IP: i64 = -2;

/// Pack a dotted-quad IPv4 address into an integer, first octet in the lowest byte.
///
/// Empty input yields `0`; anything malformed yields [`INVALID_IP`]. Never panics.
///
/// ```
/// use imbot_core::utils::ip_to_long;
/// assert_eq!(ip_to_long("192.168.1.1"), 16885952);
/// assert_eq!(ip_to_long(""), 0);
/// assert_eq!(ip_to_long("1.2.3"), -2);
/// ```
pub fn ip_to_long(ip: &str) -> i64 {
    if ip.is_empty() {
        return 0;
    }

    let mut value: i64 = 0;
    let mut count = 0;
    for part in ip.split('.') {
        if count == 4 || part.is_empty() || part.len() > 3 {
            return INVALID_IP;
        }
        if !part.bytes().all(|b| b.is_ascii_digit()) {
            return INVALID_IP;
        }
        let octet = match part.parse::<u16>() {
            Ok(octet) if octet <= 255 => octet as i64,
            _ => return INVALID_IP,
        };
        value |= octet << (8 * count);
        count += 1;
    }

    if count != 4 {
        return INVALID_IP;
    }
    value
}

/// Inverse of [`ip_to_long`] for valid values
pub fn long_to_ip(value: i64) -> Option<String> {
    if !(0..=u32::MAX as i64).contains(&value) {
        return None;
    }
    let bytes = (value as u32).to_le_bytes();
    Some(format!("{}.{}.{}.{}", bytes[0], bytes[1], bytes[2], bytes[3]))
}

// ----------------------------------------------------------------------------
// Randomness
// ----------------------------------------------------------------------------

pub fn random_u32() -> u32 {
    OsRng.next_u32()
}

/// Random value in `[low, high)`; returns `low` for an empty range
pub fn random_in_range(low: u32, high: u32) -> u32 {
    if high <= low {
        return low;
    }
    low + OsRng.next_u32() % (high - low)
}

pub fn random_key() -> [u8; 16] {
    let mut key = [0u8; 16];
    OsRng.fill_bytes(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_addresses() {
        assert_eq!(ip_to_long("192.168.1.1"), 16885952);
        assert_eq!(ip_to_long("255.255.255.255"), 4294967295);
        assert_eq!(ip_to_long("0.0.0.0"), 0);
        assert_eq!(ip_to_long("1.0.0.0"), 1);
        assert_eq!(ip_to_long(""), 0);
    }

    #[test]
    fn test_malformed_addresses() {
        for input in [
            "some^ting%bad",
            "1.2.3",
            "1.2.3.4.5",
            "256.1.1.1",
            "a.b.c.d",
            "1..2.3",
            " 1.2.3.4",
            "1.2.3.4 ",
            "-1.2.3.4",
            "1.2.3.",
            ".",
            "1234.1.1.1",
        ] {
            assert_eq!(ip_to_long(input), INVALID_IP, "input {:?}", input);
        }
    }

    #[test]
    fn test_random_range_bounds() {
        for _ in 0..100 {
            let value = random_in_range(60_000, 100_000);
            assert!((60_000..100_000).contains(&value));
        }
        assert_eq!(random_in_range(5, 5), 5);
    }

    proptest! {
        #[test]
        fn prop_ip_parse_inverts_format(a in any::<u8>(), b in any::<u8>(), c in any::<u8>(), d in any::<u8>()) {
            let text = format!("{}.{}.{}.{}", a, b, c, d);
            let value = ip_to_long(&text);
            prop_assert!(value >= 0);
            prop_assert_eq!(long_to_ip(value), Some(text));
        }

        #[test]
        fn prop_ip_parse_never_panics(input in ".*") {
            let value = ip_to_long(&input);
            prop_assert!(value == INVALID_IP || value >= 0);
        }
    }
}
