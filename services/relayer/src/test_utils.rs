//! In-memory stand-in for an execution node.
//!
//! `MockRpc` decodes the type-4 transactions it receives and applies their
//! authorization lists the way a Prague node would: a tuple whose nonce
//! matches the authority's current nonce installs (or clears) the
//! delegation designator and bumps that nonce; a stale tuple is skipped.
//! In [`ReceiptMode::NeverMined`] transactions only enter the mempool: they
//! raise the sender's `pending` nonce and change nothing else.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

use crate::authorization::Authorization;
use crate::codec::{keccak256, rlp_encode_list, to_hex_prefixed, Address};
use crate::delegation::designator_for;
use crate::error::{RelayError, RelayResult};
use crate::rpc::{BlockTag, EstimateRequest, EthRpc, TransactionReceipt};
use crate::signer::address_from_verifying_key;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReceiptMode {
    Mined,
    NeverMined,
    Reverted,
}

struct ChainState {
    nonces: HashMap<Address, u64>,
    /// Unmined transactions per sender.
    mempool: HashMap<Address, u64>,
    code: HashMap<Address, Vec<u8>>,
    balances: HashMap<Address, u128>,
    receipts: HashMap<String, TransactionReceipt>,
    sent: Vec<SentTransaction>,
    block_number: u64,
    base_fee: u128,
    priority_fee: u128,
    gas_estimate: u64,
    default_balance: u128,
    receipt_mode: ReceiptMode,
    read_failure: Option<String>,
    receipt_failures: usize,
    broadcast_failure: Option<String>,
}

#[derive(Clone, Debug)]
pub(crate) struct SentTransaction {
    pub hash: String,
    pub sender: Address,
    pub to: Address,
    pub data: Vec<u8>,
    pub authorizations: Vec<Authorization>,
}

pub(crate) struct MockRpc {
    state: Mutex<ChainState>,
    calls: AtomicUsize,
}

impl MockRpc {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                nonces: HashMap::new(),
                mempool: HashMap::new(),
                code: HashMap::new(),
                balances: HashMap::new(),
                receipts: HashMap::new(),
                sent: Vec::new(),
                block_number: 100,
                base_fee: 1_000_000_000,
                priority_fee: 100_000_000,
                gas_estimate: 60_000,
                default_balance: 10u128.pow(18),
                receipt_mode: ReceiptMode::Mined,
                read_failure: None,
                receipt_failures: 0,
                broadcast_failure: None,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_nonce(&self, address: Address, nonce: u64) {
        self.state.lock().unwrap().nonces.insert(address, nonce);
    }

    pub fn nonce_of(&self, address: Address) -> u64 {
        self.state
            .lock()
            .unwrap()
            .nonces
            .get(&address)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_code(&self, address: Address, code: Vec<u8>) {
        self.state.lock().unwrap().code.insert(address, code);
    }

    pub fn set_balance(&self, address: Address, balance: u128) {
        self.state.lock().unwrap().balances.insert(address, balance);
    }

    pub fn set_receipt_mode(&self, mode: ReceiptMode) {
        self.state.lock().unwrap().receipt_mode = mode;
    }

    pub fn fail_reads(&self, message: &str) {
        self.state.lock().unwrap().read_failure = Some(message.to_string());
    }

    /// Fails the next `count` receipt lookups.
    pub fn fail_receipt_reads(&self, count: usize) {
        self.state.lock().unwrap().receipt_failures = count;
    }

    /// Evicts every unmined transaction.
    pub fn drop_mempool(&self) {
        self.state.lock().unwrap().mempool.clear();
    }

    pub fn fail_broadcast(&self, message: &str) {
        self.state.lock().unwrap().broadcast_failure = Some(message.to_string());
    }

    pub fn sent(&self) -> Vec<SentTransaction> {
        self.state.lock().unwrap().sent.clone()
    }

    async fn enter(&self) -> RelayResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        match &self.state.lock().unwrap().read_failure {
            Some(message) => Err(RelayError::RpcTransport {
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EthRpc for MockRpc {
    async fn chain_id(&self) -> RelayResult<u64> {
        self.enter().await?;
        Ok(11_155_111)
    }

    async fn transaction_count(&self, address: Address, tag: BlockTag) -> RelayResult<u64> {
        self.enter().await?;
        let state = self.state.lock().unwrap();
        let latest = state.nonces.get(&address).copied().unwrap_or_default();
        Ok(match tag {
            BlockTag::Latest => latest,
            BlockTag::Pending => latest + state.mempool.get(&address).copied().unwrap_or_default(),
        })
    }

    async fn code(&self, address: Address) -> RelayResult<Vec<u8>> {
        self.enter().await?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .code
            .get(&address)
            .cloned()
            .unwrap_or_default())
    }

    async fn balance(&self, address: Address) -> RelayResult<u128> {
        self.enter().await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .balances
            .get(&address)
            .copied()
            .unwrap_or(state.default_balance))
    }

    async fn base_fee(&self) -> RelayResult<u128> {
        self.enter().await?;
        Ok(self.state.lock().unwrap().base_fee)
    }

    async fn max_priority_fee(&self) -> RelayResult<u128> {
        self.enter().await?;
        Ok(self.state.lock().unwrap().priority_fee)
    }

    async fn estimate_gas(&self, _request: EstimateRequest<'_>) -> RelayResult<u64> {
        self.enter().await?;
        Ok(self.state.lock().unwrap().gas_estimate)
    }

    async fn send_raw_transaction(&self, raw_tx: &[u8]) -> RelayResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.broadcast_failure {
            return Err(RelayError::Rpc {
                code: -32_000,
                message: message.clone(),
            });
        }

        let decoded = decode_type4(raw_tx);
        let hash = to_hex_prefixed(&keccak256(raw_tx));

        let latest = state.nonces.get(&decoded.sender).copied().unwrap_or_default();
        let queued = state.mempool.get(&decoded.sender).copied().unwrap_or_default();
        assert_eq!(latest + queued, decoded.nonce, "relay nonce out of order");

        let sent = SentTransaction {
            hash: hash.clone(),
            sender: decoded.sender,
            to: decoded.to,
            data: decoded.data,
            authorizations: decoded.authorizations,
        };
        if state.receipt_mode == ReceiptMode::NeverMined {
            *state.mempool.entry(sent.sender).or_default() += 1;
            state.sent.push(sent);
            return Ok(hash);
        }
        state.nonces.insert(sent.sender, latest + 1);

        for authorization in &sent.authorizations {
            let Ok(authority) = authorization.recover_authority() else {
                continue;
            };
            let current = state.nonces.get(&authority).copied().unwrap_or_default();
            if current != authorization.nonce {
                continue;
            }
            state.nonces.insert(authority, current + 1);
            if authorization.address.is_zero() {
                state.code.remove(&authority);
            } else {
                state
                    .code
                    .insert(authority, designator_for(authorization.address));
            }
        }

        state.block_number += 1;
        let receipt = TransactionReceipt {
            transaction_hash: hash.clone(),
            block_number: state.block_number,
            status: state.receipt_mode == ReceiptMode::Mined,
        };
        state.receipts.insert(hash.clone(), receipt);
        state.sent.push(sent);
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: &str) -> RelayResult<Option<TransactionReceipt>> {
        self.enter().await?;
        let mut state = self.state.lock().unwrap();
        if state.receipt_failures > 0 {
            state.receipt_failures -= 1;
            return Err(RelayError::RpcTransport {
                message: "receipt lookup timed out".into(),
            });
        }
        Ok(state.receipts.get(hash).cloned())
    }
}

struct DecodedTransaction {
    sender: Address,
    nonce: u64,
    to: Address,
    data: Vec<u8>,
    authorizations: Vec<Authorization>,
}

/// Minimal RLP item reader: returns `(payload, is_list, total_len)`.
fn rlp_item(input: &[u8]) -> (&[u8], bool, usize) {
    let prefix = input[0];
    match prefix {
        0x00..=0x7f => (&input[..1], false, 1),
        0x80..=0xb7 => {
            let len = (prefix - 0x80) as usize;
            (&input[1..1 + len], false, 1 + len)
        }
        0xb8..=0xbf => {
            let len_of_len = (prefix - 0xb7) as usize;
            let len = be_usize(&input[1..1 + len_of_len]);
            let start = 1 + len_of_len;
            (&input[start..start + len], false, start + len)
        }
        0xc0..=0xf7 => {
            let len = (prefix - 0xc0) as usize;
            (&input[1..1 + len], true, 1 + len)
        }
        _ => {
            let len_of_len = (prefix - 0xf7) as usize;
            let len = be_usize(&input[1..1 + len_of_len]);
            let start = 1 + len_of_len;
            (&input[start..start + len], true, start + len)
        }
    }
}

fn be_usize(bytes: &[u8]) -> usize {
    bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize)
}

fn be_u64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

/// Splits a list payload into `(raw item, payload)` pairs.
fn rlp_list_items(mut payload: &[u8]) -> Vec<(&[u8], &[u8])> {
    let mut items = Vec::new();
    while !payload.is_empty() {
        let (inner, _, total) = rlp_item(payload);
        items.push((&payload[..total], inner));
        payload = &payload[total..];
    }
    items
}

fn scalar(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(bytes);
    out
}

fn decode_type4(raw_tx: &[u8]) -> DecodedTransaction {
    assert_eq!(raw_tx[0], 0x04, "expected an EIP-7702 transaction");
    let (payload, is_list, _) = rlp_item(&raw_tx[1..]);
    assert!(is_list);
    let items = rlp_list_items(payload);
    assert_eq!(items.len(), 13);

    let authorizations = rlp_list_items(items[9].1)
        .into_iter()
        .map(|(_, tuple)| {
            let fields = rlp_list_items(tuple);
            Authorization {
                chain_id: be_u64(fields[0].1),
                address: Address::from_slice(fields[1].1).unwrap(),
                nonce: be_u64(fields[2].1),
                y_parity: be_u64(fields[3].1) as u8,
                r: scalar(fields[4].1),
                s: scalar(fields[5].1),
            }
        })
        .collect();

    let unsigned: Vec<Vec<u8>> = items[..10].iter().map(|(raw, _)| raw.to_vec()).collect();
    let mut preimage = vec![0x04];
    preimage.extend_from_slice(&rlp_encode_list(&unsigned));
    let sighash = keccak256(&preimage);

    let mut signature = [0u8; 64];
    signature[..32].copy_from_slice(&scalar(items[11].1));
    signature[32..].copy_from_slice(&scalar(items[12].1));
    let signature = Signature::from_slice(&signature).unwrap();
    let recovery_id = RecoveryId::from_byte(be_u64(items[10].1) as u8).unwrap();
    let key = VerifyingKey::recover_from_prehash(&sighash, &signature, recovery_id).unwrap();

    DecodedTransaction {
        sender: address_from_verifying_key(&key),
        nonce: be_u64(items[1].1),
        to: Address::from_slice(items[5].1).unwrap(),
        data: items[7].1.to_vec(),
        authorizations,
    }
}
