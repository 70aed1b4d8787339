//! The relay's own signing identity.

use std::fmt;

use k256::ecdsa::{SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;

use crate::codec::{keccak256, Address};
use crate::error::{ConfigError, RelayError, RelayResult};

/// Recoverable secp256k1 signature in the form transactions carry it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignatureParts {
    pub y_parity: u8,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

/// Process-wide gas sponsor. Constructed once at startup and shared by
/// reference; the key is never rotated while the process runs.
pub struct RelayAccount {
    key: SigningKey,
    address: Address,
}

impl RelayAccount {
    /// Builds the account from a raw environment value. Surrounding
    /// whitespace, quotes and a `0x` prefix are tolerated.
    pub fn from_env_value(name: &'static str, raw: &str) -> Result<Self, ConfigError> {
        let cleaned = sanitize_private_key(name, raw)?;
        let bytes = hex::decode(&cleaned).map_err(|_| ConfigError::KeyNotHex { name })?;
        let key = SigningKey::from_slice(&bytes).map_err(|_| ConfigError::KeyInvalid { name })?;
        let address = address_from_verifying_key(key.verifying_key());
        Ok(Self { key, address })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn sign_prehash(&self, hash: &[u8; 32]) -> RelayResult<SignatureParts> {
        let (signature, recovery_id) =
            self.key
                .sign_prehash_recoverable(hash)
                .map_err(|err| RelayError::Signing {
                    message: err.to_string(),
                })?;
        let bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Ok(SignatureParts {
            y_parity: recovery_id.to_byte(),
            r,
            s,
        })
    }
}

impl fmt::Debug for RelayAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayAccount")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

pub fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let encoded = key.as_affine().to_encoded_point(false);
    let hash = keccak256(&encoded.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    Address::new(out)
}

fn sanitize_private_key(name: &'static str, raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_matches('"');
    let cleaned = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if cleaned.is_empty() {
        return Err(ConfigError::Missing(name));
    }
    if !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ConfigError::KeyNotHex { name });
    }
    if cleaned.len() != 64 {
        return Err(ConfigError::KeyLength {
            name,
            actual: cleaned.len(),
        });
    }
    Ok(cleaned.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use k256::ecdsa::RecoveryId;

    use super::*;

    pub(crate) const HARDHAT_KEY_0: &str =
        "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    pub(crate) const HARDHAT_KEY_1: &str =
        "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
    pub(crate) const HARDHAT_KEY_2: &str =
        "0x5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a";

    #[test]
    fn derives_known_addresses() {
        let account = RelayAccount::from_env_value("RELAY_PRIVATE_KEY", HARDHAT_KEY_0).unwrap();
        assert_eq!(
            account.address().to_string(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );
        let account = RelayAccount::from_env_value("RELAY_PRIVATE_KEY", HARDHAT_KEY_1).unwrap();
        assert_eq!(
            account.address().to_string(),
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"
        );
    }

    #[test]
    fn tolerates_quotes_and_whitespace() {
        let raw = format!("  \"{}\"\n", HARDHAT_KEY_0.trim_start_matches("0x"));
        let account = RelayAccount::from_env_value("RELAY_PRIVATE_KEY", &raw).unwrap();
        assert_eq!(
            account.address().to_string(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(matches!(
            RelayAccount::from_env_value("K", "0x1234"),
            Err(ConfigError::KeyLength { actual: 4, .. })
        ));
        assert!(matches!(
            RelayAccount::from_env_value("K", &"zz".repeat(32)),
            Err(ConfigError::KeyNotHex { .. })
        ));
        assert!(matches!(
            RelayAccount::from_env_value("K", &"00".repeat(32)),
            Err(ConfigError::KeyInvalid { .. })
        ));
        assert!(matches!(
            RelayAccount::from_env_value("K", "   "),
            Err(ConfigError::Missing("K"))
        ));
    }

    #[test]
    fn signatures_recover_to_the_relay_address() {
        let account = RelayAccount::from_env_value("RELAY_PRIVATE_KEY", HARDHAT_KEY_0).unwrap();
        let hash = keccak256(b"sponsored");
        let parts = account.sign_prehash(&hash).unwrap();

        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&parts.r);
        bytes[32..].copy_from_slice(&parts.s);
        let signature = k256::ecdsa::Signature::from_slice(&bytes).unwrap();
        let recovery_id = RecoveryId::from_byte(parts.y_parity).unwrap();
        let key = VerifyingKey::recover_from_prehash(&hash, &signature, recovery_id).unwrap();
        assert_eq!(address_from_verifying_key(&key), account.address());
    }
}
