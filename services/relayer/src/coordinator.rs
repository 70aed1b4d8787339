//! Sponsored submission and revocation of EIP-7702 authorizations.
//!
//! Two locks guard a submission. The per-account lock (keyed by the
//! authorizing address) is held from the nonce check until the outcome is
//! known, so two requests for the same account can never both pass
//! verification against the same nonce. The relay lock is held from reading
//! the relay's own nonce until the node has accepted the raw transaction,
//! since every sponsored transaction is sent from that one account.
//!
//! A broadcast transaction stays registered as in flight under its
//! `(account, nonce)` until a receipt is seen. A later request carrying the
//! same authorization waits on that transaction instead of sending another.
//! It is sent again only once the relay has nothing left in the mempool,
//! which means the first copy was dropped.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::authorization::Authorization;
use crate::codec::{scale_u128, Address};
use crate::config::{ConfirmationConfig, FeeConfig};
use crate::error::{RelayError, RelayResult};
use crate::rpc::{BlockTag, EstimateRequest, EthRpc, TransactionReceipt};
use crate::signer::RelayAccount;
use crate::transaction::SponsoredTransaction;
use crate::verifier;

const MIN_GAS_LIMIT: u64 = 100_000;
const GAS_LIMIT_MULTIPLIER: f64 = 1.2;
const FALLBACK_PRIORITY_FEE: u128 = 1_000_000_000;

/// Outcome of a confirmed sponsored transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Only present once the transaction has been mined.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubmissionResult {
    fn confirmed(receipt: TransactionReceipt, hash: String) -> Self {
        Self {
            success: true,
            hash: Some(hash),
            block_number: Some(receipt.block_number),
            error: None,
        }
    }
}

/// Static settings for a [`Coordinator`].
#[derive(Clone, Copy, Debug)]
pub struct CoordinatorSettings {
    pub chain_id: u64,
    pub fees: FeeConfig,
    pub confirmation: ConfirmationConfig,
}

pub struct Coordinator {
    rpc: Arc<dyn EthRpc>,
    relay: RelayAccount,
    settings: CoordinatorSettings,
    account_locks: DashMap<Address, Arc<Mutex<()>>>,
    /// Unconfirmed transaction hash per `(account, authorization nonce)`.
    in_flight: DashMap<(Address, u64), String>,
    relay_lock: Mutex<()>,
}

impl Coordinator {
    pub fn new(rpc: Arc<dyn EthRpc>, relay: RelayAccount, settings: CoordinatorSettings) -> Self {
        Self {
            rpc,
            relay,
            settings,
            account_locks: DashMap::new(),
            in_flight: DashMap::new(),
            relay_lock: Mutex::new(()),
        }
    }

    pub fn rpc(&self) -> &dyn EthRpc {
        self.rpc.as_ref()
    }

    pub fn relay_address(&self) -> Address {
        self.relay.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.settings.chain_id
    }

    /// Sponsors a transaction that installs `authorization` on `account`,
    /// optionally calling into the new code with `init_data`.
    #[tracing::instrument(
        name = "upgrade",
        skip_all,
        fields(account = %account, delegate = %authorization.address, nonce = authorization.nonce)
    )]
    pub async fn submit(
        &self,
        authorization: Authorization,
        account: Address,
        init_data: Option<Vec<u8>>,
    ) -> RelayResult<SubmissionResult> {
        self.sponsor(authorization, account, init_data.unwrap_or_default())
            .await
    }

    /// Sponsors a transaction that re-delegates `account` to the zero
    /// address. Revoking an account that has no delegation is allowed.
    #[tracing::instrument(
        name = "revoke",
        skip_all,
        fields(account = %account, nonce = authorization.nonce)
    )]
    pub async fn revoke(
        &self,
        authorization: Authorization,
        account: Address,
    ) -> RelayResult<SubmissionResult> {
        if !authorization.is_revocation() {
            return Err(RelayError::RevocationTargetNotZero {
                target: authorization.address,
            });
        }
        self.sponsor(authorization, account, Vec::new()).await
    }

    async fn sponsor(
        &self,
        authorization: Authorization,
        account: Address,
        data: Vec<u8>,
    ) -> RelayResult<SubmissionResult> {
        self.check_authorization(&authorization, account)?;

        let account_lock = self.account_lock(account);
        let result = {
            tracing::debug!("acquiring account lock");
            let _account_guard = account_lock.lock().await;
            self.sponsor_locked(authorization, account, data).await
        };
        drop(account_lock);
        // Only the map's own handle is left when no other request waits.
        self.account_locks
            .remove_if(&account, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn sponsor_locked(
        &self,
        authorization: Authorization,
        account: Address,
        data: Vec<u8>,
    ) -> RelayResult<SubmissionResult> {
        let nonce = authorization.nonce;
        if let Some(outcome) = self.resume_in_flight(account, nonce).await? {
            return outcome;
        }

        let verdict = verifier::verify(self.rpc.as_ref(), account, nonce).await?;
        let chain_nonce = match verdict {
            verifier::Verdict::Accept => nonce,
            verifier::Verdict::Reject { expected, .. } => expected,
        };
        self.in_flight
            .retain(|(pending_account, pending_nonce), _| {
                *pending_account != account || *pending_nonce >= chain_nonce
            });
        verdict.into_result()?;

        let hash = self.broadcast(authorization, account, data).await?;
        tracing::info!(%hash, "sponsored transaction broadcast");
        self.in_flight.insert((account, nonce), hash.clone());

        self.confirm(account, nonce, &hash).await
    }

    /// Looks for an earlier broadcast of the same authorization. Returns
    /// `None` when there is none, or when it left the mempool unmined and
    /// has to be sent again.
    async fn resume_in_flight(
        &self,
        account: Address,
        nonce: u64,
    ) -> RelayResult<Option<RelayResult<SubmissionResult>>> {
        let Some(hash) = self
            .in_flight
            .get(&(account, nonce))
            .map(|entry| entry.value().clone())
        else {
            return Ok(None);
        };

        if let Some(receipt) = self.rpc.transaction_receipt(&hash).await? {
            self.in_flight.remove(&(account, nonce));
            return Ok(Some(Self::outcome(&hash, receipt)));
        }

        let relay_address = self.relay.address();
        let latest = self
            .rpc
            .transaction_count(relay_address, BlockTag::Latest)
            .await?;
        let pending = self
            .rpc
            .transaction_count(relay_address, BlockTag::Pending)
            .await?;
        if pending > latest {
            tracing::info!(%hash, "authorization already in flight, waiting on it");
            return Ok(Some(self.confirm(account, nonce, &hash).await));
        }

        tracing::warn!(%hash, "in-flight transaction left the mempool unmined");
        self.in_flight.remove(&(account, nonce));
        Ok(None)
    }

    /// Waits for `hash` and clears its in-flight entry once a receipt is
    /// seen. A timeout leaves the entry in place.
    async fn confirm(
        &self,
        account: Address,
        nonce: u64,
        hash: &str,
    ) -> RelayResult<SubmissionResult> {
        let result = match self.wait_for_receipt(hash).await {
            Ok(receipt) => {
                self.in_flight.remove(&(account, nonce));
                Self::outcome(hash, receipt)
            }
            Err(err) => Err(err),
        };
        match &result {
            Ok(outcome) => {
                tracing::info!(%hash, block_number = ?outcome.block_number, "transaction confirmed")
            }
            Err(err) => tracing::warn!(%hash, %err, "transaction not confirmed"),
        }
        result
    }

    /// Checks that need no network access.
    fn check_authorization(&self, authorization: &Authorization, account: Address) -> RelayResult<()> {
        if authorization.chain_id != 0 && authorization.chain_id != self.settings.chain_id {
            return Err(RelayError::ChainIdMismatch {
                expected: self.settings.chain_id,
                actual: authorization.chain_id,
            });
        }
        let recovered = authorization.recover_authority()?;
        if recovered != account {
            return Err(RelayError::AuthorityMismatch { account, recovered });
        }
        Ok(())
    }

    fn account_lock(&self, account: Address) -> Arc<Mutex<()>> {
        let entry = self
            .account_locks
            .entry(account)
            .or_insert_with(|| Arc::new(Mutex::new(())));
        Arc::clone(entry.value())
    }

    async fn broadcast(
        &self,
        authorization: Authorization,
        account: Address,
        data: Vec<u8>,
    ) -> RelayResult<String> {
        let _relay_guard = self.relay_lock.lock().await;
        let relay_address = self.relay.address();
        let authorization_list = vec![authorization];

        let gas_limit = match self.settings.fees.gas_limit {
            Some(limit) => limit,
            None => {
                self.estimate_gas_limit(EstimateRequest {
                    from: relay_address,
                    to: account,
                    data: &data,
                    authorization_list: &authorization_list,
                })
                .await?
            }
        };
        let (max_priority_fee_per_gas, max_fee_per_gas) = self.fee_caps().await?;

        let balance = self.rpc.balance(relay_address).await?;
        let required = u128::from(gas_limit).saturating_mul(max_fee_per_gas);
        if balance < required {
            tracing::error!(%relay_address, balance, required, "relay balance too low");
            return Err(RelayError::Broadcast {
                message: format!(
                    "insufficient funds for gas * price + value: have {balance} want {required}"
                ),
            });
        }

        let nonce = self
            .rpc
            .transaction_count(relay_address, BlockTag::Pending)
            .await?;

        let transaction = SponsoredTransaction {
            chain_id: self.settings.chain_id,
            nonce,
            max_priority_fee_per_gas,
            max_fee_per_gas,
            gas_limit,
            to: account,
            data,
            authorization_list,
        };
        let raw_tx = transaction.sign(&self.relay)?;
        tracing::debug!(
            relay_nonce = nonce,
            gas_limit,
            max_fee_per_gas,
            max_priority_fee_per_gas,
            "sending sponsored transaction"
        );

        match self.rpc.send_raw_transaction(&raw_tx).await {
            Ok(hash) => Ok(hash),
            Err(RelayError::Rpc { message, .. }) | Err(RelayError::RpcTransport { message }) => {
                tracing::error!(%message, "broadcast rejected");
                Err(RelayError::Broadcast { message })
            }
            Err(other) => Err(other),
        }
    }

    async fn estimate_gas_limit(&self, request: EstimateRequest<'_>) -> RelayResult<u64> {
        let estimate = match self.rpc.estimate_gas(request).await {
            Ok(estimate) => estimate,
            Err(RelayError::Rpc { message, .. }) => {
                return Err(RelayError::Broadcast {
                    message: format!("gas estimation failed: {message}"),
                })
            }
            Err(other) => return Err(other),
        };
        let floored = estimate.max(MIN_GAS_LIMIT);
        let scaled = scale_u128(u128::from(floored), GAS_LIMIT_MULTIPLIER)?;
        u64::try_from(scaled).map_err(|_| RelayError::NumberOutOfRange {
            field: "gas limit".into(),
        })
    }

    /// Returns `(max_priority_fee_per_gas, max_fee_per_gas)`.
    async fn fee_caps(&self) -> RelayResult<(u128, u128)> {
        let fees = self.settings.fees;
        let base_fee = self.rpc.base_fee().await?;
        let priority_fee = self.rpc.max_priority_fee().await?;

        let mut priority_fee_effective =
            scale_u128(priority_fee, fees.priority_multiplier)?.max(priority_fee);
        if priority_fee_effective == 0 {
            priority_fee_effective = FALLBACK_PRIORITY_FEE;
        }
        let base_fee_scaled = scale_u128(base_fee, fees.max_fee_multiplier)?.max(base_fee);
        let max_fee_per_gas = base_fee_scaled
            .checked_add(priority_fee_effective)
            .ok_or_else(|| RelayError::NumberOutOfRange {
                field: "max fee per gas".into(),
            })?;
        Ok((priority_fee_effective, max_fee_per_gas))
    }

    /// Polls for the receipt until it appears or the configured bound
    /// elapses. A receipt lookup failure is logged and polled again; it does
    /// not resubmit anything.
    async fn wait_for_receipt(&self, hash: &str) -> RelayResult<TransactionReceipt> {
        let ConfirmationConfig {
            timeout,
            poll_interval,
        } = self.settings.confirmation;

        let poll = async {
            loop {
                match self.rpc.transaction_receipt(hash).await {
                    Ok(Some(receipt)) => break receipt,
                    Ok(None) => {}
                    Err(err) => tracing::warn!(%hash, %err, "receipt lookup failed"),
                }
                tokio::time::sleep(poll_interval).await;
            }
        };

        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| RelayError::ConfirmationTimeout {
                hash: hash.to_string(),
                waited: timeout,
            })
    }

    fn outcome(hash: &str, receipt: TransactionReceipt) -> RelayResult<SubmissionResult> {
        if !receipt.status {
            return Err(RelayError::Reverted {
                hash: hash.to_string(),
                block_number: receipt.block_number,
            });
        }
        Ok(SubmissionResult::confirmed(receipt, hash.to_string()))
    }
}
