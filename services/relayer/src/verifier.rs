//! Nonce check performed before any sponsored transaction is built.

use crate::codec::Address;
use crate::error::{RelayError, RelayResult};
use crate::rpc::{BlockTag, EthRpc};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// `expected` is the live on-chain nonce, `actual` the one signed.
    Reject { expected: u64, actual: u64 },
}

impl Verdict {
    /// Turns a rejection into the error reported to the caller.
    pub fn into_result(self) -> RelayResult<()> {
        match self {
            Verdict::Accept => Ok(()),
            Verdict::Reject { expected, actual } => {
                Err(RelayError::NonceMismatch { expected, actual })
            }
        }
    }
}

/// Compares `claimed_nonce` with the account's current transaction count.
///
/// An RPC failure is returned as `Err` and never as [`Verdict::Reject`]:
/// "could not check" must stay distinguishable from "stale".
#[tracing::instrument(level = "debug", skip(rpc), fields(account = %account))]
pub async fn verify<R>(rpc: &R, account: Address, claimed_nonce: u64) -> RelayResult<Verdict>
where
    R: EthRpc + ?Sized,
{
    let current_nonce = rpc.transaction_count(account, BlockTag::Latest).await?;
    if claimed_nonce == current_nonce {
        tracing::debug!(nonce = current_nonce, "authorization nonce is current");
        Ok(Verdict::Accept)
    } else {
        tracing::info!(
            expected = current_nonce,
            actual = claimed_nonce,
            "authorization nonce is stale"
        );
        Ok(Verdict::Reject {
            expected: current_nonce,
            actual: claimed_nonce,
        })
    }
}
