//! transfer client (C3)
//!
//! outbound client to the external zk transfer backend. the backend is
//! modeled as a trait so the real `reqwest`-backed implementation and an
//! in-process fake (used by tests) present the same surface, mirroring
//! the realm split in the pack this service is built from (a pluggable
//! backing implementation behind one trait).

use ed25519_dalek::{Signer, SigningKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::token::Token;

#[derive(Debug, Clone)]
pub enum TransferError {
    InsufficientBalance,
    BelowMinimum,
    InvalidProof,
    Network(String),
    RateLimit,
    UnknownWallet,
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferError::InsufficientBalance => write!(f, "insufficient balance"),
            TransferError::BelowMinimum => write!(f, "amount below minimum transfer"),
            TransferError::InvalidProof => write!(f, "invalid proof"),
            TransferError::Network(msg) => write!(f, "network error: {msg}"),
            TransferError::RateLimit => write!(f, "rate limited"),
            TransferError::UnknownWallet => write!(f, "unknown wallet"),
        }
    }
}

impl TransferError {
    /// §7: network/rate-limit/5xx is transient and worth retrying;
    /// everything else is permanent
    pub fn is_transient(&self) -> bool {
        matches!(self, TransferError::Network(_) | TransferError::RateLimit)
    }
}

pub type TransferResult<T> = std::result::Result<T, TransferError>;

/// a range proof bundle, opaque to the core — produced by a locally
/// loaded proof generator and passed through to the transfer backend
/// unexamined.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RangeProof {
    pub proof_hex: String,
    pub commitment_hex: String,
    pub blinding_hex: String,
}

/// black-box range proof generator; correctness is the backend's concern
pub trait ProofGenerator: Send + Sync {
    fn generate(&self, amount: u128, bit_length: u32) -> RangeProof;
}

/// stub generator returning placeholder hex blobs sized for a 64-bit
/// range proof. a real deployment loads an actual bulletproofs-style
/// prover here; the core never inspects the bytes either way.
pub struct StubProofGenerator;

impl ProofGenerator for StubProofGenerator {
    fn generate(&self, amount: u128, bit_length: u32) -> RangeProof {
        let mut bytes = vec![0u8; 64];
        rand::thread_rng().fill_bytes(&mut bytes);
        RangeProof {
            proof_hex: hex::encode(&bytes),
            commitment_hex: hex::encode(amount.to_be_bytes()),
            blinding_hex: hex::encode(bit_length.to_be_bytes()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InternalTransferRequest {
    pub sender_wallet: String,
    pub recipient_wallet: String,
    pub token: Token,
    pub nonce: u32,
    pub amount: u128,
    pub proof_bytes: String,
    pub commitment: String,
    pub sender_signature: String,
}

/// trait contract consumed by the escrow engine; satisfied by the real
/// http client and by `FakeTransferBackend` in tests
#[async_trait::async_trait]
pub trait TransferBackend: Send + Sync {
    async fn get_balance(&self, wallet: &str, token: Token) -> TransferResult<u128>;

    async fn internal_transfer(
        &self,
        sender_wallet: &str,
        recipient_wallet: &str,
        token: Token,
        amount: u128,
        nonce: u32,
    ) -> TransferResult<String>;
}

/// which of the two process keypairs signs an outgoing transfer
#[derive(Clone, Copy, Debug)]
pub enum SignerRole {
    Escrow,
    Treasury,
}

/// real client: owns the escrow and treasury signing keys, talks to the
/// zk transfer backend over http, and generates range proofs via the
/// configured proof generator.
pub struct HttpTransferBackend {
    http: reqwest::Client,
    base_url: String,
    escrow_key: SigningKey,
    treasury_key: SigningKey,
    proof_generator: Box<dyn ProofGenerator>,
}

impl HttpTransferBackend {
    pub fn new(
        base_url: String,
        escrow_key: SigningKey,
        treasury_key: SigningKey,
        proof_generator: Box<dyn ProofGenerator>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            escrow_key,
            treasury_key,
            proof_generator,
        }
    }

    fn signing_key_for(&self, signer: SignerRole) -> &SigningKey {
        match signer {
            SignerRole::Escrow => &self.escrow_key,
            SignerRole::Treasury => &self.treasury_key,
        }
    }

    /// sign the intent string `"<scheme>:<transfer-type>:<uuid-nonce>:<unix-seconds>"`
    /// with detached ed25519, returning base58
    fn sign_intent(&self, signer: SignerRole, transfer_type: &str, nonce: u32) -> String {
        let uuid_nonce = format!("{:08x}", nonce);
        let unix_seconds = crate::store::now_secs();
        let intent = format!("duel-escrow:{transfer_type}:{uuid_nonce}:{unix_seconds}");
        let signature = self.signing_key_for(signer).sign(intent.as_bytes());
        bs58::encode(signature.to_bytes()).into_string()
    }

    fn signer_for(transfer_type: &str) -> SignerRole {
        if transfer_type == "treasury-sweep" || transfer_type == "house-fee" {
            SignerRole::Treasury
        } else {
            SignerRole::Escrow
        }
    }
}

#[derive(Deserialize)]
struct RawTransferResponse {
    success: bool,
    tx_signature: Option<String>,
    error: Option<String>,
    #[allow(dead_code)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct RawBalanceResponse {
    available: Option<u128>,
    balance: Option<u128>,
}

#[async_trait::async_trait]
impl TransferBackend for HttpTransferBackend {
    async fn get_balance(&self, wallet: &str, _token: Token) -> TransferResult<u128> {
        let url = format!("{}/pool/balance/{}", self.base_url, wallet);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| TransferError::Network(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(TransferError::UnknownWallet);
        }

        let parsed: RawBalanceResponse = resp
            .json()
            .await
            .map_err(|e| TransferError::Network(e.to_string()))?;

        parsed
            .available
            .or(parsed.balance)
            .ok_or(TransferError::UnknownWallet)
    }

    async fn internal_transfer(
        &self,
        sender_wallet: &str,
        recipient_wallet: &str,
        token: Token,
        amount: u128,
        nonce: u32,
    ) -> TransferResult<String> {
        let proof = self.proof_generator.generate(amount, 64);
        let signer = Self::signer_for("internal-transfer");
        let sender_signature = self.sign_intent(signer, "internal-transfer", nonce);

        let req = InternalTransferRequest {
            sender_wallet: sender_wallet.to_string(),
            recipient_wallet: recipient_wallet.to_string(),
            token,
            nonce,
            amount,
            proof_bytes: proof.proof_hex,
            commitment: proof.commitment_hex,
            sender_signature,
        };

        let url = format!("{}/zk/internal-transfer", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&req)
            .send()
            .await
            .map_err(|e| TransferError::Network(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(TransferError::RateLimit);
        }
        if resp.status().is_server_error() {
            return Err(TransferError::Network(format!("server error: {}", resp.status())));
        }

        let parsed: RawTransferResponse = resp
            .json()
            .await
            .map_err(|e| TransferError::Network(e.to_string()))?;

        if parsed.success {
            parsed.tx_signature.ok_or_else(|| {
                TransferError::Network("backend reported success without a tx signature".into())
            })
        } else {
            Err(classify_backend_error(parsed.error.as_deref().unwrap_or("")))
        }
    }
}

fn classify_backend_error(reason: &str) -> TransferError {
    let r = reason.to_lowercase();
    if r.contains("insufficient") {
        TransferError::InsufficientBalance
    } else if r.contains("minimum") || r.contains("below") {
        TransferError::BelowMinimum
    } else if r.contains("proof") {
        TransferError::InvalidProof
    } else if r.contains("rate") {
        TransferError::RateLimit
    } else {
        TransferError::Network(reason.to_string())
    }
}

/// in-process fake backend for tests: tracks balances and optionally
/// scripts a sequence of outcomes for `internal_transfer` so tests can
/// exercise retry/exhaustion paths deterministically.
pub struct FakeTransferBackend {
    balances: Mutex<HashMap<String, u128>>,
    /// queued outcomes, consumed FIFO; once drained, transfers succeed
    scripted: Mutex<Vec<TransferResult<String>>>,
    pub calls: Mutex<Vec<InternalTransferRequest>>,
}

impl FakeTransferBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            balances: Mutex::new(HashMap::new()),
            scripted: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub async fn set_balance(&self, wallet: &str, amount: u128) {
        self.balances.lock().await.insert(wallet.to_string(), amount);
    }

    /// queue outcomes returned by successive `internal_transfer` calls,
    /// oldest first
    pub async fn script(&self, outcomes: Vec<TransferResult<String>>) {
        *self.scripted.lock().await = outcomes;
    }
}

#[async_trait::async_trait]
impl TransferBackend for FakeTransferBackend {
    async fn get_balance(&self, wallet: &str, _token: Token) -> TransferResult<u128> {
        self.balances
            .lock()
            .await
            .get(wallet)
            .copied()
            .ok_or(TransferError::UnknownWallet)
    }

    async fn internal_transfer(
        &self,
        sender_wallet: &str,
        recipient_wallet: &str,
        token: Token,
        amount: u128,
        nonce: u32,
    ) -> TransferResult<String> {
        self.calls.lock().await.push(InternalTransferRequest {
            sender_wallet: sender_wallet.to_string(),
            recipient_wallet: recipient_wallet.to_string(),
            token,
            nonce,
            amount,
            proof_bytes: String::new(),
            commitment: String::new(),
            sender_signature: String::new(),
        });

        let mut scripted = self.scripted.lock().await;
        if !scripted.is_empty() {
            return scripted.remove(0);
        }
        drop(scripted);

        Ok(format!("fake-tx-{}-{}", recipient_wallet, nonce))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_backend_default_success() {
        let backend = FakeTransferBackend::new();
        let tx = backend
            .internal_transfer("escrow", "wallet-a", Token::Sol, 100, 1)
            .await
            .unwrap();
        assert!(tx.starts_with("fake-tx-"));
    }

    #[tokio::test]
    async fn test_fake_backend_scripted_outcomes() {
        let backend = FakeTransferBackend::new();
        backend
            .script(vec![
                Err(TransferError::Network("timeout".into())),
                Err(TransferError::Network("timeout".into())),
                Ok("tx-final".into()),
            ])
            .await;

        assert!(backend
            .internal_transfer("escrow", "wallet-a", Token::Sol, 100, 1)
            .await
            .is_err());
        assert!(backend
            .internal_transfer("escrow", "wallet-a", Token::Sol, 100, 1)
            .await
            .is_err());
        assert_eq!(
            backend
                .internal_transfer("escrow", "wallet-a", Token::Sol, 100, 1)
                .await
                .unwrap(),
            "tx-final"
        );
    }

    #[test]
    fn test_classify_backend_error() {
        assert!(matches!(
            classify_backend_error("insufficient balance"),
            TransferError::InsufficientBalance
        ));
        assert!(matches!(
            classify_backend_error("below minimum"),
            TransferError::BelowMinimum
        ));
        assert!(matches!(
            classify_backend_error("invalid proof"),
            TransferError::InvalidProof
        ));
    }
}
