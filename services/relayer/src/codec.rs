//! Hex, address, keccak and RLP helpers shared by the transaction builder and
//! the JSON-RPC client.

use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use num_traits::ToPrimitive;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

use crate::error::{RelayError, RelayResult};

/// A 20-byte account or contract address.
///
/// Parsing accepts any letter case; rendering always uses the EIP-55 mixed
/// case checksum so that every address leaving the relay is normalized.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub const fn new(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> RelayResult<Self> {
        let array: [u8; 20] = bytes
            .try_into()
            .map_err(|_| RelayError::InvalidField {
                field: "address",
                reason: format!("expected 20 bytes, got {}", bytes.len()),
            })?;
        Ok(Address(array))
    }

    /// Parses a `0x`-prefixed address, attributing failures to `field`.
    pub fn parse(field: &'static str, value: &str) -> RelayResult<Self> {
        let trimmed = value.trim();
        if trimmed.len() != 42 || !trimmed.starts_with("0x") {
            return Err(RelayError::InvalidField {
                field,
                reason: format!("expected a 0x-prefixed 40 hex character address, got {trimmed:?}"),
            });
        }
        let bytes = hex::decode(&trimmed[2..]).map_err(|_| RelayError::InvalidField {
            field,
            reason: format!("{trimmed:?} is not valid hex"),
        })?;
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Address(out))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// EIP-55 checksum encoding.
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = keccak256(lower.as_bytes());
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = if i % 2 == 0 {
                hash[i / 2] >> 4
            } else {
                hash[i / 2] & 0x0f
            };
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl FromStr for Address {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse("address", s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Address::parse("address", &raw).map_err(serde::de::Error::custom)
    }
}

pub fn keccak256(input: &[u8]) -> [u8; 32] {
    Keccak256::digest(input).into()
}

pub fn function_selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn to_hex_prefixed(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn to_hex_quantity(value: u128) -> String {
    format!("{value:#x}")
}

pub fn parse_hex_bytes(value: &str) -> RelayResult<Vec<u8>> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .ok_or_else(|| RelayError::HexDecodeFailed {
            value: trimmed.to_string(),
        })?;
    hex::decode(digits).map_err(|_| RelayError::HexDecodeFailed {
        value: trimmed.to_string(),
    })
}

/// Parses a JSON-RPC quantity (`0x`-prefixed, no leading-zero requirement,
/// odd length allowed). `"0x"` decodes to zero.
pub fn biguint_from_quantity(value: &str) -> RelayResult<BigUint> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .ok_or_else(|| RelayError::HexDecodeFailed {
            value: trimmed.to_string(),
        })?;
    if digits.is_empty() {
        return Ok(BigUint::default());
    }
    BigUint::parse_bytes(digits.as_bytes(), 16).ok_or_else(|| RelayError::HexDecodeFailed {
        value: trimmed.to_string(),
    })
}

pub fn u64_from_quantity(field: &str, value: &str) -> RelayResult<u64> {
    biguint_from_quantity(value)?
        .to_u64()
        .ok_or_else(|| RelayError::NumberOutOfRange {
            field: field.to_string(),
        })
}

pub fn u128_from_quantity(field: &str, value: &str) -> RelayResult<u128> {
    biguint_from_quantity(value)?
        .to_u128()
        .ok_or_else(|| RelayError::NumberOutOfRange {
            field: field.to_string(),
        })
}

pub fn scale_u128(value: u128, multiplier: f64) -> RelayResult<u128> {
    let scaled = (value as f64 * multiplier).ceil();
    if scaled.is_nan() || scaled.is_infinite() || scaled < 0.0 || scaled >= u128::MAX as f64 {
        return Err(RelayError::NumberOutOfRange {
            field: "scaled quantity".into(),
        });
    }
    Ok(scaled as u128)
}

pub fn trim_leading_zeroes(data: &[u8]) -> &[u8] {
    let first = data.iter().position(|b| *b != 0).unwrap_or(data.len());
    &data[first..]
}

fn length_to_bytes(len: usize) -> Vec<u8> {
    let bytes = len.to_be_bytes();
    let trimmed = trim_leading_zeroes(&bytes);
    if trimmed.is_empty() {
        vec![0]
    } else {
        trimmed.to_vec()
    }
}

pub fn rlp_encode_bytes(data: &[u8]) -> Vec<u8> {
    match data.len() {
        1 if data[0] < 0x80 => vec![data[0]],
        len if len <= 55 => {
            let mut out = Vec::with_capacity(1 + len);
            out.push(0x80 + len as u8);
            out.extend_from_slice(data);
            out
        }
        len => {
            let len_bytes = length_to_bytes(len);
            let mut out = Vec::with_capacity(1 + len_bytes.len() + len);
            out.push(0xB7 + len_bytes.len() as u8);
            out.extend_from_slice(&len_bytes);
            out.extend_from_slice(data);
            out
        }
    }
}

pub fn rlp_encode_u64(value: u64) -> Vec<u8> {
    rlp_encode_bytes(trim_leading_zeroes(&value.to_be_bytes()))
}

pub fn rlp_encode_u128(value: u128) -> Vec<u8> {
    rlp_encode_bytes(trim_leading_zeroes(&value.to_be_bytes()))
}

/// Encodes a big-endian unsigned integer such as a signature scalar,
/// stripping leading zeroes first.
pub fn rlp_encode_uint_bytes(value: &[u8]) -> Vec<u8> {
    rlp_encode_bytes(trim_leading_zeroes(value))
}

pub fn rlp_encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let total_len: usize = items.iter().map(Vec::len).sum();
    let mut out;
    if total_len <= 55 {
        out = Vec::with_capacity(1 + total_len);
        out.push(0xC0 + total_len as u8);
    } else {
        let len_bytes = length_to_bytes(total_len);
        out = Vec::with_capacity(1 + len_bytes.len() + total_len);
        out.push(0xF7 + len_bytes.len() as u8);
        out.extend_from_slice(&len_bytes);
    }
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_of_empty_input() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn selectors() {
        assert_eq!(function_selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(function_selector("initialize()"), [0x81, 0x29, 0xfc, 0x1c]);
    }

    #[test]
    fn checksum_normalization() {
        let lower: Address = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".parse().unwrap();
        assert_eq!(lower.to_string(), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
        let upper: Address = "0x5AAEB6053F3E94C9B9A09F33669435E7EF1BEAED".parse().unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn malformed_addresses_name_the_field() {
        let err = Address::parse("account", "0x1234").unwrap_err();
        assert!(matches!(err, RelayError::InvalidField { field: "account", .. }));
        let err = Address::parse("account", "0xzz00000000000000000000000000000000000000").unwrap_err();
        assert!(matches!(err, RelayError::InvalidField { field: "account", .. }));
    }

    #[test]
    fn zero_address() {
        let zero: Address = "0x0000000000000000000000000000000000000000".parse().unwrap();
        assert!(zero.is_zero());
        assert_eq!(zero, Address::ZERO);
    }

    #[test]
    fn quantities() {
        assert_eq!(u64_from_quantity("nonce", "0x5").unwrap(), 5);
        assert_eq!(u64_from_quantity("nonce", "0x").unwrap(), 0);
        assert_eq!(u64_from_quantity("nonce", "0x1bc16d674ec80000").unwrap(), 2_000_000_000_000_000_000);
        assert!(matches!(
            u64_from_quantity("nonce", "0x10000000000000000"),
            Err(RelayError::NumberOutOfRange { .. })
        ));
        assert!(matches!(
            u64_from_quantity("nonce", "12"),
            Err(RelayError::HexDecodeFailed { .. })
        ));
        assert_eq!(to_hex_quantity(0), "0x0");
        assert_eq!(to_hex_quantity(255), "0xff");
    }

    #[test]
    fn scaling_rounds_up() {
        assert_eq!(scale_u128(10, 1.2).unwrap(), 12);
        assert_eq!(scale_u128(1, 1.5).unwrap(), 2);
        assert!(scale_u128(1, f64::NAN).is_err());
    }

    #[test]
    fn rlp_vectors() {
        assert_eq!(rlp_encode_bytes(b"dog"), vec![0x83, b'd', b'o', b'g']);
        assert_eq!(rlp_encode_bytes(&[]), vec![0x80]);
        assert_eq!(rlp_encode_u64(0), vec![0x80]);
        assert_eq!(rlp_encode_u64(15), vec![0x0f]);
        assert_eq!(rlp_encode_u64(1024), vec![0x82, 0x04, 0x00]);
        assert_eq!(rlp_encode_list(&[]), vec![0xc0]);
        assert_eq!(
            rlp_encode_list(&[rlp_encode_bytes(b"cat"), rlp_encode_bytes(b"dog")]),
            vec![0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g']
        );

        let long = vec![0xaau8; 56];
        let encoded = rlp_encode_bytes(&long);
        assert_eq!(&encoded[..2], &[0xb8, 56]);
        assert_eq!(encoded.len(), 58);
    }
}
