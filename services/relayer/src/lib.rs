//! Sponsored EIP-7702 relay.
//!
//! Accepts signed set-code authorizations over HTTP, checks the signed nonce
//! against the chain, and pays for the type-4 transaction that installs (or
//! revokes) the delegation on the signer's account.

pub mod authorization;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod delegation;
pub mod error;
pub mod rpc;
pub mod server;
pub mod signer;
pub mod transaction;
pub mod verifier;

#[cfg(test)]
mod test_utils;

pub use authorization::Authorization;
pub use codec::Address;
pub use config::RelayConfig;
pub use coordinator::{Coordinator, CoordinatorSettings, SubmissionResult};
pub use error::{ConfigError, RelayError, RelayResult};
pub use rpc::{EthRpc, HttpRpcClient};
pub use server::{router, AppState};
