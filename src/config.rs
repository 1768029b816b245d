//! process configuration
//!
//! loaded once at startup from the environment, validated, then treated as
//! immutable for the lifetime of the process. any missing or malformed
//! value is a fatal startup error (the only case where this process exits
//! outside of an operator-triggered shutdown).

use ed25519_dalek::SigningKey;
use std::time::Duration;

use crate::token::Token;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Network {
    Devnet,
    Testnet,
    Mainnet,
}

impl Network {
    fn from_env(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "mainnet" => Network::Mainnet,
            "testnet" => Network::Testnet,
            _ => Network::Devnet,
        }
    }

    pub fn transfer_backend_base_url(&self) -> &'static str {
        match self {
            Network::Devnet => "https://zk-devnet.duel-escrow.internal",
            Network::Testnet => "https://zk-testnet.duel-escrow.internal",
            Network::Mainnet => "https://zk.duel-escrow.internal",
        }
    }
}

/// process-wide configuration, immutable after startup
pub struct Config {
    pub escrow_signing_key: SigningKey,
    pub treasury_signing_key: SigningKey,
    pub server_authority_signing_key: SigningKey,
    pub wallet_pepper: Vec<u8>,
    pub internal_api_key: String,
    pub house_fee_percent: u8,
    pub escrow_timeout: Duration,
    pub network: Network,
    pub is_development: bool,
}

impl Config {
    /// load and validate from the environment, or exit the process
    pub fn load_or_exit() -> Self {
        match Self::from_env() {
            Ok(cfg) => cfg,
            Err(msg) => {
                tracing::error!("configuration error: {msg}");
                std::process::exit(1);
            }
        }
    }

    fn from_env() -> std::result::Result<Self, String> {
        let escrow_signing_key = signing_key_from_env("ESCROW_WALLET_SECRET")?;
        let treasury_signing_key = signing_key_from_env("TREASURY_WALLET_SECRET")?;
        let server_authority_signing_key = signing_key_from_env("SERVER_AUTHORITY_SECRET")?;

        let wallet_pepper = std::env::var("WALLET_PEPPER")
            .map_err(|_| "WALLET_PEPPER is required".to_string())?;
        if wallet_pepper.len() < 32 {
            return Err("WALLET_PEPPER must be at least 32 characters".into());
        }

        let internal_api_key = std::env::var("INTERNAL_API_KEY")
            .map_err(|_| "INTERNAL_API_KEY is required".to_string())?;
        if internal_api_key.len() < 32 {
            return Err("INTERNAL_API_KEY must be at least 32 characters".into());
        }

        let house_fee_percent = std::env::var("HOUSE_FEE_PERCENT")
            .ok()
            .map(|v| v.parse::<u8>().map_err(|_| "HOUSE_FEE_PERCENT must be an integer".to_string()))
            .transpose()?
            .unwrap_or(2);
        if house_fee_percent > 10 {
            return Err("HOUSE_FEE_PERCENT must be between 0 and 10".into());
        }

        let escrow_timeout_seconds = std::env::var("ESCROW_TIMEOUT_SECONDS")
            .ok()
            .map(|v| v.parse::<u64>().map_err(|_| "ESCROW_TIMEOUT_SECONDS must be an integer".to_string()))
            .transpose()?
            .unwrap_or(1800);

        let network = std::env::var("NETWORK")
            .map(|v| Network::from_env(&v))
            .unwrap_or(Network::Devnet);

        let is_development = std::env::var("APP_ENV")
            .map(|v| v.to_lowercase() != "production")
            .unwrap_or(true);

        Ok(Config {
            escrow_signing_key,
            treasury_signing_key,
            server_authority_signing_key,
            wallet_pepper: wallet_pepper.into_bytes(),
            internal_api_key,
            house_fee_percent,
            escrow_timeout: Duration::from_secs(escrow_timeout_seconds),
            network,
            is_development,
        })
    }
}

fn signing_key_from_env(var: &str) -> std::result::Result<SigningKey, String> {
    let raw = std::env::var(var).map_err(|_| format!("{var} is required"))?;
    let decoded = bs58::decode(&raw)
        .into_vec()
        .map_err(|e| format!("{var} is not valid base58: {e}"))?;
    let bytes: [u8; 32] = decoded
        .try_into()
        .map_err(|_| format!("{var} must decode to 32 bytes"))?;
    Ok(SigningKey::from_bytes(&bytes))
}

/// minimum transfer-out threshold for a token, in smallest units
pub fn minimum_transfer(token: Token) -> u128 {
    token.table().minimum_transfer
}
