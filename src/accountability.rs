//! accountability (C4)
//!
//! builds the commitment record, hashes it, publishes the hash to the
//! ledger anchor, and keeps a local audit log regardless of publication
//! outcome. publication failure is non-fatal: freezing a winner's payout
//! because the ledger anchor is briefly unreachable is worse than a
//! missing accountability anchor, and the local audit log still proves
//! prior commitment at the operator level.

use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::store::now_secs;
use crate::types::{Commitment, CommitmentRecord};

pub const COMMITMENT_VERSION: u8 = 1;

/// ledger anchoring contract: publish an opaque payload, get a tx id,
/// confirmation is awaited internally by the implementation.
#[async_trait::async_trait]
pub trait LedgerAnchor: Send + Sync {
    async fn publish(&self, payload: &[u8]) -> Result<String, String>;
}

/// real anchor: signs the payload with the server-authority key and
/// submits it as an opaque memo instruction, confirmed at the "confirmed"
/// level by the backend.
pub struct HttpLedgerAnchor {
    http: reqwest::Client,
    base_url: String,
    authority_key: SigningKey,
}

impl HttpLedgerAnchor {
    pub fn new(base_url: String, authority_key: SigningKey) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            authority_key,
        }
    }
}

#[derive(serde::Serialize)]
struct AnchorRequest {
    payload_hex: String,
    signature: String,
}

#[derive(serde::Deserialize)]
struct AnchorResponse {
    success: bool,
    tx_signature: Option<String>,
    error: Option<String>,
}

#[async_trait::async_trait]
impl LedgerAnchor for HttpLedgerAnchor {
    async fn publish(&self, payload: &[u8]) -> Result<String, String> {
        let signature = self.authority_key.sign(payload);
        let req = AnchorRequest {
            payload_hex: hex::encode(payload),
            signature: bs58::encode(signature.to_bytes()).into_string(),
        };

        let resp = self
            .http
            .post(format!("{}/anchor/publish", self.base_url))
            .json(&req)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let parsed: AnchorResponse = resp.json().await.map_err(|e| e.to_string())?;
        if parsed.success {
            parsed
                .tx_signature
                .ok_or_else(|| "anchor reported success without a tx id".to_string())
        } else {
            Err(parsed.error.unwrap_or_else(|| "anchor publish failed".into()))
        }
    }
}

/// in-process fake for tests; always succeeds unless scripted otherwise
pub struct FakeLedgerAnchor {
    pub should_fail: std::sync::atomic::AtomicBool,
}

impl FakeLedgerAnchor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            should_fail: std::sync::atomic::AtomicBool::new(false),
        })
    }
}

#[async_trait::async_trait]
impl LedgerAnchor for FakeLedgerAnchor {
    async fn publish(&self, payload: &[u8]) -> Result<String, String> {
        if self.should_fail.load(std::sync::atomic::Ordering::Relaxed) {
            return Err("fake anchor unreachable".into());
        }
        Ok(format!("anchor-tx-{}", hex::encode(&payload[..4.min(payload.len())])))
    }
}

/// local audit log, keyed by duel id, plus the accountability contract
pub struct Accountability {
    anchor: Arc<dyn LedgerAnchor>,
    audit_log: RwLock<HashMap<String, CommitmentRecord>>,
}

impl Accountability {
    pub fn new(anchor: Arc<dyn LedgerAnchor>) -> Arc<Self> {
        Arc::new(Self {
            anchor,
            audit_log: RwLock::new(HashMap::new()),
        })
    }

    /// build, hash, optionally publish, and always record the commitment
    pub async fn commit_to_settlement(
        &self,
        duel_id: &str,
        winner_stealth_id: &str,
        loser_stealth_id: &str,
        game_server_signature: &str,
        publish: bool,
    ) -> CommitmentRecord {
        let commitment = Commitment {
            duel_id: duel_id.to_string(),
            winner_stealth_id: winner_stealth_id.to_string(),
            loser_stealth_id: loser_stealth_id.to_string(),
            game_server_signature: game_server_signature.to_string(),
            timestamp: now_secs(),
            version: COMMITMENT_VERSION,
        };

        let commitment_hash = hash_commitment(&commitment);

        let (on_chain_tx_id, on_chain_success) = if publish {
            match self.anchor.publish(commitment_hash.as_bytes()).await {
                Ok(tx_id) => (Some(tx_id), true),
                Err(e) => {
                    tracing::warn!(duel_id, error = %e, "ledger publication failed, continuing to settlement");
                    (None, false)
                }
            }
        } else {
            (None, false)
        };

        let record = CommitmentRecord {
            commitment,
            commitment_hash,
            on_chain_tx_id,
            on_chain_success,
            recorded_at: now_secs(),
        };

        self.audit_log
            .write()
            .await
            .insert(duel_id.to_string(), record.clone());

        record
    }

    pub async fn get_commitment_record(&self, duel_id: &str) -> Option<CommitmentRecord> {
        self.audit_log.read().await.get(duel_id).cloned()
    }

    /// recompute the hash from a commitment and compare against an
    /// expected hash
    pub fn verify_commitment(commitment: &Commitment, expected_hash: &str) -> bool {
        hash_commitment(commitment) == expected_hash
    }
}

/// canonical serialisation (declaration order, which serde_json
/// preserves) followed by sha-256, hex-encoded
pub fn hash_commitment(commitment: &Commitment) -> String {
    let bytes = serde_json::to_vec(commitment).expect("commitment always serialises");
    let digest = Sha256::digest(&bytes);
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_order_is_pinned() {
        let commitment = Commitment {
            duel_id: "d1".into(),
            winner_stealth_id: "w1".into(),
            loser_stealth_id: "l1".into(),
            game_server_signature: "sig".into(),
            timestamp: 1700000000,
            version: 1,
        };
        let bytes = serde_json::to_vec(&commitment).unwrap();
        let as_str = String::from_utf8(bytes).unwrap();
        assert_eq!(
            as_str,
            r#"{"duel_id":"d1","winner_stealth_id":"w1","loser_stealth_id":"l1","game_server_signature":"sig","timestamp":1700000000,"version":1}"#
        );
    }

    #[test]
    fn test_hash_is_deterministic_byte_for_byte() {
        let commitment = Commitment {
            duel_id: "d1".into(),
            winner_stealth_id: "w1".into(),
            loser_stealth_id: "l1".into(),
            game_server_signature: "sig".into(),
            timestamp: 1700000000,
            version: 1,
        };
        assert_eq!(hash_commitment(&commitment), hash_commitment(&commitment));
    }

    #[tokio::test]
    async fn test_commit_records_even_when_publish_fails() {
        let anchor = FakeLedgerAnchor::new();
        anchor.should_fail.store(true, std::sync::atomic::Ordering::Relaxed);
        let acc = Accountability::new(anchor);

        let record = acc
            .commit_to_settlement("d1", "w1", "l1", "sig", true)
            .await;

        assert!(!record.on_chain_success);
        assert!(record.on_chain_tx_id.is_none());
        assert!(acc.get_commitment_record("d1").await.is_some());
    }

    #[tokio::test]
    async fn test_verify_commitment_matches() {
        let anchor = FakeLedgerAnchor::new();
        let acc = Accountability::new(anchor);
        let record = acc
            .commit_to_settlement("d1", "w1", "l1", "sig", false)
            .await;

        assert!(Accountability::verify_commitment(
            &record.commitment,
            &record.commitment_hash
        ));
    }
}
