//! EIP-7702 (type `0x04`) transaction assembly.

use crate::authorization::Authorization;
use crate::codec::{
    keccak256, rlp_encode_bytes, rlp_encode_list, rlp_encode_u128, rlp_encode_u64,
    rlp_encode_uint_bytes, Address,
};
use crate::error::RelayResult;
use crate::signer::{RelayAccount, SignatureParts};

pub const SET_CODE_TX_TYPE: u8 = 0x04;

/// The relay's transaction intent. Built per request and dropped once the
/// raw bytes have been broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SponsoredTransaction {
    pub chain_id: u64,
    /// Relay account nonce.
    pub nonce: u64,
    pub max_priority_fee_per_gas: u128,
    pub max_fee_per_gas: u128,
    pub gas_limit: u64,
    /// The authorizing account itself.
    pub to: Address,
    pub data: Vec<u8>,
    pub authorization_list: Vec<Authorization>,
}

impl SponsoredTransaction {
    fn unsigned_items(&self) -> Vec<Vec<u8>> {
        let authorization_list: Vec<Vec<u8>> = self
            .authorization_list
            .iter()
            .map(Authorization::rlp_encode)
            .collect();
        vec![
            rlp_encode_u64(self.chain_id),
            rlp_encode_u64(self.nonce),
            rlp_encode_u128(self.max_priority_fee_per_gas),
            rlp_encode_u128(self.max_fee_per_gas),
            rlp_encode_u64(self.gas_limit),
            rlp_encode_bytes(self.to.as_bytes()),
            rlp_encode_u64(0), // value
            rlp_encode_bytes(&self.data),
            rlp_encode_list(&[]), // access list
            rlp_encode_list(&authorization_list),
        ]
    }

    pub fn signing_hash(&self) -> [u8; 32] {
        let unsigned_rlp = rlp_encode_list(&self.unsigned_items());
        let mut signing_payload = Vec::with_capacity(1 + unsigned_rlp.len());
        signing_payload.push(SET_CODE_TX_TYPE);
        signing_payload.extend_from_slice(&unsigned_rlp);
        keccak256(&signing_payload)
    }

    pub fn encode_signed(&self, signature: &SignatureParts) -> Vec<u8> {
        let mut signed_items = self.unsigned_items();
        signed_items.push(rlp_encode_u64(u64::from(signature.y_parity)));
        signed_items.push(rlp_encode_uint_bytes(&signature.r));
        signed_items.push(rlp_encode_uint_bytes(&signature.s));

        let signed_rlp = rlp_encode_list(&signed_items);
        let mut raw_tx = Vec::with_capacity(1 + signed_rlp.len());
        raw_tx.push(SET_CODE_TX_TYPE);
        raw_tx.extend_from_slice(&signed_rlp);
        raw_tx
    }

    pub fn sign(&self, relay: &RelayAccount) -> RelayResult<Vec<u8>> {
        let signature = relay.sign_prehash(&self.signing_hash())?;
        Ok(self.encode_signed(&signature))
    }
}
