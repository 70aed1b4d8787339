//! Reading an account's current EIP-7702 delegation from its code.

use serde::Serialize;

use crate::codec::{to_hex_prefixed, Address};
use crate::error::RelayResult;
use crate::rpc::EthRpc;

/// Code prefix of a delegation designator: `0xef0100 || address`.
pub const DELEGATION_PREFIX: [u8; 3] = [0xef, 0x01, 0x00];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationStatus {
    pub account: Address,
    pub is_delegated: bool,
    /// `None` when the account has no code, or has code that is not a
    /// delegation designator.
    pub delegated_contract: Option<Address>,
    pub code: Option<String>,
}

/// Extracts the delegate from a designator. Returns `None` for anything
/// else, including empty code.
pub fn parse_designator(code: &[u8]) -> Option<Address> {
    if code.len() != DELEGATION_PREFIX.len() + 20 || !code.starts_with(&DELEGATION_PREFIX) {
        return None;
    }
    Address::from_slice(&code[DELEGATION_PREFIX.len()..]).ok()
}

pub fn designator_for(delegate: Address) -> Vec<u8> {
    let mut code = DELEGATION_PREFIX.to_vec();
    code.extend_from_slice(delegate.as_bytes());
    code
}

pub fn status_from_code(account: Address, code: &[u8]) -> DelegationStatus {
    if code.is_empty() {
        return DelegationStatus {
            account,
            is_delegated: false,
            delegated_contract: None,
            code: None,
        };
    }
    let code_hex = Some(to_hex_prefixed(code));
    match parse_designator(code) {
        Some(delegate) if delegate.is_zero() => DelegationStatus {
            account,
            is_delegated: false,
            delegated_contract: None,
            code: code_hex,
        },
        Some(delegate) => DelegationStatus {
            account,
            is_delegated: true,
            delegated_contract: Some(delegate),
            code: code_hex,
        },
        None => DelegationStatus {
            account,
            is_delegated: true,
            delegated_contract: None,
            code: code_hex,
        },
    }
}

pub async fn delegation_status<R>(rpc: &R, account: Address) -> RelayResult<DelegationStatus>
where
    R: EthRpc + ?Sized,
{
    let code = rpc.code(account).await?;
    Ok(status_from_code(account, &code))
}
