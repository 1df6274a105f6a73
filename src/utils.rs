use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{Num, Zero};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Parse an integer literal the way a form field would hold it.
///
/// Accepts an optional sign, decimal digits or a `0x` prefixed hex string, and
/// surrounding whitespace. Fractions, exponents and empty strings are rejected.
pub fn parse_integer_literal(raw: &str) -> Option<BigInt> {
    let trimmed = raw.trim();
    let (sign, unsigned) = match trimmed.as_bytes().first()? {
        b'-' => (Sign::Minus, &trimmed[1..]),
        b'+' => (Sign::Plus, &trimmed[1..]),
        _ => (Sign::Plus, trimmed),
    };

    let magnitude = if let Some(hex) = unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
    {
        parse_digits(hex, 16)?
    } else {
        parse_digits(unsigned, 10)?
    };

    Some(BigInt::from_biguint(sign, magnitude))
}

fn parse_digits(digits: &str, radix: u32) -> Option<BigUint> {
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    BigUint::from_str_radix(digits, radix).ok()
}

/// Reduce a signed integer into `[0, prime)`.
pub fn normalize(value: &BigInt, prime: &BigUint) -> BigUint {
    let prime = BigInt::from(prime.clone());
    let reduced = value % &prime;
    let reduced = if reduced.sign() == Sign::Minus {
        reduced + prime
    } else {
        reduced
    };
    // Non-negative after the adjustment above.
    reduced.to_biguint().unwrap_or_else(BigUint::zero)
}

/// Split a value into `n32` little-endian 32-bit limbs.
pub fn to_u32_limbs(value: &BigUint, n32: usize) -> Vec<u32> {
    let mut limbs = value.to_u32_digits();
    limbs.resize(n32, 0);
    limbs
}

pub fn from_u32_limbs(limbs: &[u32]) -> BigUint {
    BigUint::from_slice(limbs)
}

/// 64-bit FNV-1a, the hash circom uses to address input signals by name.
pub fn fnv1a_64(name: &str) -> u64 {
    name.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_hex_and_signed_literals() {
        assert_eq!(parse_integer_literal("12"), Some(BigInt::from(12)));
        assert_eq!(parse_integer_literal(" 42 "), Some(BigInt::from(42)));
        assert_eq!(parse_integer_literal("-7"), Some(BigInt::from(-7)));
        assert_eq!(parse_integer_literal("+7"), Some(BigInt::from(7)));
        assert_eq!(parse_integer_literal("0x1f"), Some(BigInt::from(31)));
        assert_eq!(
            parse_integer_literal("21888242871839275222246405745257275088548364400416034343698204186575808495617"),
            Some(
                BigInt::parse_bytes(
                    b"21888242871839275222246405745257275088548364400416034343698204186575808495617",
                    10
                )
                .unwrap()
            )
        );
    }

    #[test]
    fn rejects_non_integer_literals() {
        for raw in ["", "  ", "abc", "1.5", "1e3", "-", "0x", "12abc", "0xzz"] {
            assert_eq!(parse_integer_literal(raw), None, "{raw:?} should not parse");
        }
    }

    #[test]
    fn normalize_wraps_negative_values() {
        let prime = BigUint::from(65521u32);
        assert_eq!(normalize(&BigInt::from(-1), &prime), BigUint::from(65520u32));
        assert_eq!(normalize(&BigInt::from(65522), &prime), BigUint::from(1u32));
        assert_eq!(normalize(&BigInt::from(5), &prime), BigUint::from(5u32));
    }

    #[test]
    fn limbs_are_little_endian_and_padded() {
        let value = (BigUint::from(1u32) << 32) + BigUint::from(7u32);
        assert_eq!(to_u32_limbs(&value, 4), vec![7, 1, 0, 0]);
        assert_eq!(from_u32_limbs(&[7, 1, 0, 0]), value);
        assert_eq!(to_u32_limbs(&BigUint::zero(), 2), vec![0, 0]);
    }

    #[test]
    fn fnv_matches_reference_vectors() {
        assert_eq!(fnv1a_64(""), 0xcbf29ce484222325);
        assert_eq!(fnv1a_64("a"), 0xaf63dc4c8601ec8c);
        assert_eq!(fnv1a_64("b"), 0xaf63df4c8601f1a5);
    }

    #[test]
    fn formats_sizes() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }
}
