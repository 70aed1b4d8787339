//! EIP-7702 authorization tuples and their validation at the request
//! boundary.
//!
//! Clients post the object their wallet produced, which varies between
//! libraries: nonces and chain ids arrive as JSON numbers, hex quantities or
//! decimal strings, the delegate is called `address` or `contractAddress`,
//! and the recovery bit is `yParity` or a legacy `v`. Everything is
//! normalized here once so the rest of the pipeline only sees
//! [`Authorization`].

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use serde_json::{Map, Value};

use crate::codec::{
    biguint_from_quantity, keccak256, rlp_encode_bytes, rlp_encode_list, rlp_encode_u64,
    rlp_encode_uint_bytes, trim_leading_zeroes, u64_from_quantity, Address,
};
use crate::error::{RelayError, RelayResult};
use crate::signer::address_from_verifying_key;

/// EIP-7702 signing domain separator.
const AUTHORIZATION_MAGIC: u8 = 0x05;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Authorization {
    pub chain_id: u64,
    /// Delegate whose code the authority adopts. Zero revokes.
    pub address: Address,
    pub nonce: u64,
    pub y_parity: u8,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl Authorization {
    pub fn from_json(value: &Value) -> RelayResult<Self> {
        let object = value.as_object().ok_or_else(|| RelayError::InvalidField {
            field: "authorization",
            reason: "expected a JSON object".into(),
        })?;

        let address_value = object
            .get("address")
            .or_else(|| object.get("contractAddress"))
            .filter(|v| !v.is_null())
            .ok_or(RelayError::MissingField {
                field: "authorization.address",
            })?;
        let address_str = address_value
            .as_str()
            .ok_or_else(|| RelayError::InvalidField {
                field: "authorization.address",
                reason: "expected a hex string".into(),
            })?;
        let address = Address::parse("authorization.address", address_str)?;

        let chain_id = required_u64(object, "chainId", "authorization.chainId")?;
        let nonce = required_u64(object, "nonce", "authorization.nonce")?;
        let y_parity = parse_y_parity(object)?;
        let r = required_scalar(object, "r", "authorization.r")?;
        let s = required_scalar(object, "s", "authorization.s")?;

        Ok(Self {
            chain_id,
            address,
            nonce,
            y_parity,
            r,
            s,
        })
    }

    pub fn is_revocation(&self) -> bool {
        self.address.is_zero()
    }

    /// `keccak256(0x05 || rlp([chain_id, address, nonce]))`
    pub fn signature_hash(&self) -> [u8; 32] {
        let payload = rlp_encode_list(&[
            rlp_encode_u64(self.chain_id),
            rlp_encode_bytes(self.address.as_bytes()),
            rlp_encode_u64(self.nonce),
        ]);
        let mut preimage = Vec::with_capacity(1 + payload.len());
        preimage.push(AUTHORIZATION_MAGIC);
        preimage.extend_from_slice(&payload);
        keccak256(&preimage)
    }

    /// Recovers the account that signed this authorization.
    pub fn recover_authority(&self) -> RelayResult<Address> {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        let signature = Signature::from_slice(&bytes).map_err(|_| RelayError::InvalidField {
            field: "authorization.signature",
            reason: "r or s is not a valid secp256k1 scalar".into(),
        })?;
        let recovery_id =
            RecoveryId::from_byte(self.y_parity).ok_or_else(|| RelayError::InvalidField {
                field: "authorization.yParity",
                reason: format!("{} is not a recovery id", self.y_parity),
            })?;
        let key = VerifyingKey::recover_from_prehash(&self.signature_hash(), &signature, recovery_id)
            .map_err(|_| RelayError::InvalidField {
                field: "authorization.signature",
                reason: "signature does not recover to a public key".into(),
            })?;
        Ok(address_from_verifying_key(&key))
    }

    /// RLP item as it appears inside a transaction's authorization list.
    pub fn rlp_encode(&self) -> Vec<u8> {
        rlp_encode_list(&[
            rlp_encode_u64(self.chain_id),
            rlp_encode_bytes(self.address.as_bytes()),
            rlp_encode_u64(self.nonce),
            rlp_encode_u64(u64::from(self.y_parity)),
            rlp_encode_uint_bytes(&self.r),
            rlp_encode_uint_bytes(&self.s),
        ])
    }

    /// JSON shape accepted by `eth_estimateGas` for authorization lists.
    pub fn to_rpc_json(&self) -> Value {
        serde_json::json!({
            "chainId": format!("{:#x}", self.chain_id),
            "address": self.address.to_checksum(),
            "nonce": format!("{:#x}", self.nonce),
            "yParity": format!("{:#x}", self.y_parity),
            "r": format!("0x{}", hex::encode(trim_or_zero(&self.r))),
            "s": format!("0x{}", hex::encode(trim_or_zero(&self.s))),
        })
    }
}

fn trim_or_zero(value: &[u8; 32]) -> Vec<u8> {
    let trimmed = trim_leading_zeroes(value);
    if trimmed.is_empty() {
        vec![0]
    } else {
        trimmed.to_vec()
    }
}

fn required<'a>(
    object: &'a Map<String, Value>,
    key: &str,
    field: &'static str,
) -> RelayResult<&'a Value> {
    object
        .get(key)
        .filter(|v| !v.is_null())
        .ok_or(RelayError::MissingField { field })
}

fn required_u64(object: &Map<String, Value>, key: &str, field: &'static str) -> RelayResult<u64> {
    json_u64(required(object, key, field)?, field)
}

/// Integers may be JSON numbers, `0x` quantities or decimal strings. Nothing
/// is compared before it has been brought into `u64`.
fn json_u64(value: &Value, field: &'static str) -> RelayResult<u64> {
    match value {
        Value::Number(number) => number.as_u64().ok_or_else(|| RelayError::InvalidField {
            field,
            reason: format!("{number} is not an unsigned 64-bit integer"),
        }),
        Value::String(text) if text.trim().starts_with("0x") => {
            u64_from_quantity(field, text).map_err(|_| RelayError::InvalidField {
                field,
                reason: format!("{text:?} is not an unsigned 64-bit hex quantity"),
            })
        }
        Value::String(text) => text.trim().parse::<u64>().map_err(|_| RelayError::InvalidField {
            field,
            reason: format!("{text:?} is not an unsigned 64-bit integer"),
        }),
        _ => Err(RelayError::InvalidField {
            field,
            reason: "expected an integer".into(),
        }),
    }
}

fn required_scalar(
    object: &Map<String, Value>,
    key: &str,
    field: &'static str,
) -> RelayResult<[u8; 32]> {
    let value = required(object, key, field)?;
    let text = value.as_str().ok_or_else(|| RelayError::InvalidField {
        field,
        reason: "expected a 0x-prefixed hex string".into(),
    })?;
    let parsed = biguint_from_quantity(text).map_err(|_| RelayError::InvalidField {
        field,
        reason: format!("{text:?} is not valid hex"),
    })?;
    let bytes = parsed.to_bytes_be();
    let bytes = trim_leading_zeroes(&bytes);
    if bytes.len() > 32 {
        return Err(RelayError::InvalidField {
            field,
            reason: format!("expected at most 32 bytes, got {}", bytes.len()),
        });
    }
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(bytes);
    Ok(out)
}

fn parse_y_parity(object: &Map<String, Value>) -> RelayResult<u8> {
    if let Some(value) = object.get("yParity").filter(|v| !v.is_null()) {
        return match json_u64(value, "authorization.yParity")? {
            parity @ (0 | 1) => Ok(parity as u8),
            other => Err(RelayError::InvalidField {
                field: "authorization.yParity",
                reason: format!("expected 0 or 1, got {other}"),
            }),
        };
    }
    let v = json_u64(
        required(object, "v", "authorization.yParity")?,
        "authorization.v",
    )?;
    match v {
        0 | 1 => Ok(v as u8),
        27 | 28 => Ok((v - 27) as u8),
        other => Err(RelayError::InvalidField {
            field: "authorization.v",
            reason: format!("expected 0, 1, 27 or 28, got {other}"),
        }),
    }
}
