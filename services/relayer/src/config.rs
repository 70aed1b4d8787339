use std::net::SocketAddr;
use std::time::Duration;

use crate::codec::Address;
use crate::error::ConfigError;
use crate::signer::RelayAccount;

pub const DEFAULT_CHAIN_ID: u64 = 11_155_111;
pub const DEFAULT_DELEGATION_CONTRACT: &str = "0x6987E30398b2896B5118ad1076fb9f58825a6f1a";

/// Checked in order. The `VITE_` names are what the web app's `.env` uses.
const PRIVATE_KEY_VARS: [&str; 3] = ["RELAY_PRIVATE_KEY", "PRIVATE_KEY", "VITE_PRIVATE_KEY"];
const RPC_URL_VARS: [&str; 3] = ["RPC_URL", "SEPOLIA_RPC_URL", "VITE_SEPOLIA_RPC_URL"];

/// Settings for one relay process. Built once in `main` and handed to the
/// coordinator and router; nothing here changes after startup.
#[derive(Debug)]
pub struct RelayConfig {
    pub relay_account: RelayAccount,
    pub rpc_url: url::Url,
    pub chain_id: u64,
    pub default_delegation_contract: Address,
    pub listen_addr: SocketAddr,
    pub rpc_timeout: Duration,
    pub fees: FeeConfig,
    pub confirmation: ConfirmationConfig,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FeeConfig {
    /// Fixed gas limit. When unset the node is asked to estimate.
    pub gas_limit: Option<u64>,
    pub max_fee_multiplier: f64,
    pub priority_multiplier: f64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            gas_limit: None,
            max_fee_multiplier: 2.0,
            priority_multiplier: 1.2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfirmationConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(1_000),
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads every setting through `lookup`, so tests can supply a map
    /// instead of mutating the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let (key_name, raw_key) = PRIVATE_KEY_VARS
            .iter()
            .find_map(|&name| non_empty(name).map(|value| (name, value)))
            .ok_or(ConfigError::Missing("RELAY_PRIVATE_KEY"))?;
        let relay_account = RelayAccount::from_env_value(key_name, &raw_key)?;

        let raw_url = RPC_URL_VARS
            .iter()
            .find_map(|&name| non_empty(name))
            .ok_or(ConfigError::Missing("RPC_URL"))?;
        let rpc_url = url::Url::parse(raw_url.trim()).map_err(|err| ConfigError::Invalid {
            name: "RPC_URL",
            reason: err.to_string(),
        })?;

        let chain_id = parse_or("CHAIN_ID", non_empty("CHAIN_ID"), DEFAULT_CHAIN_ID)?;

        let default_delegation_contract = match non_empty("DELEGATION_CONTRACT") {
            Some(raw) => Address::parse("DELEGATION_CONTRACT", &raw).map_err(|err| {
                ConfigError::Invalid {
                    name: "DELEGATION_CONTRACT",
                    reason: err.to_string(),
                }
            })?,
            None => DEFAULT_DELEGATION_CONTRACT
                .parse()
                .map_err(|err: crate::error::RelayError| ConfigError::Invalid {
                    name: "DELEGATION_CONTRACT",
                    reason: err.to_string(),
                })?,
        };

        let listen_addr = parse_or(
            "LISTEN_ADDR",
            non_empty("LISTEN_ADDR"),
            SocketAddr::from(([0, 0, 0, 0], 3000)),
        )?;

        let rpc_timeout =
            Duration::from_secs(parse_or("RPC_TIMEOUT_SECS", non_empty("RPC_TIMEOUT_SECS"), 30)?);

        let default_fees = FeeConfig::default();
        let gas_limit = match non_empty("GAS_LIMIT") {
            Some(raw) => Some(parse_value("GAS_LIMIT", &raw)?),
            None => None,
        };
        let fees = FeeConfig {
            gas_limit,
            max_fee_multiplier: parse_multiplier(
                "MAX_FEE_MULTIPLIER",
                non_empty("MAX_FEE_MULTIPLIER"),
                default_fees.max_fee_multiplier,
            )?,
            priority_multiplier: parse_multiplier(
                "PRIORITY_MULTIPLIER",
                non_empty("PRIORITY_MULTIPLIER"),
                default_fees.priority_multiplier,
            )?,
        };

        let default_confirmation = ConfirmationConfig::default();
        let confirmation = ConfirmationConfig {
            timeout: Duration::from_secs(parse_or(
                "CONFIRMATION_TIMEOUT_SECS",
                non_empty("CONFIRMATION_TIMEOUT_SECS"),
                default_confirmation.timeout.as_secs(),
            )?),
            poll_interval: Duration::from_millis(parse_or(
                "RECEIPT_POLL_INTERVAL_MS",
                non_empty("RECEIPT_POLL_INTERVAL_MS"),
                default_confirmation.poll_interval.as_millis() as u64,
            )?),
        };
        if confirmation.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                name: "CONFIRMATION_TIMEOUT_SECS",
                reason: "must be greater than zero".into(),
            });
        }

        Ok(Self {
            relay_account,
            rpc_url,
            chain_id,
            default_delegation_contract,
            listen_addr,
            rpc_timeout,
            fees,
            confirmation,
        })
    }
}

fn parse_value<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
        name,
        reason: err.to_string(),
    })
}

fn parse_or<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}

fn parse_multiplier(
    name: &'static str,
    raw: Option<String>,
    default: f64,
) -> Result<f64, ConfigError> {
    let value: f64 = parse_or(name, raw, default)?;
    if !value.is_finite() || value < 1.0 {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("expected a finite value >= 1.0, got {value}"),
        });
    }
    Ok(value)
}
