//! escrow engine (C5) — the heart of the core
//!
//! duel lifecycle, stake-lock recording, payout math under two nested
//! fee layers, retry, dust accumulation, refund, and recovery. every
//! operation here runs inside a per-duel critical section: a settle call
//! on one duel id blocks any other mutation of that duel id until it
//! returns, which is what makes duplicate settle calls idempotent via the
//! precondition check rather than via any separate dedup key.

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, RwLock};

use crate::accountability::Accountability;
use crate::config::Config;
use crate::error::{EscrowError, Result};
use crate::stealth::StealthIdentity;
use crate::store::{now_secs, Store};
use crate::token::Token;
use crate::transfer_client::TransferBackend;
use crate::types::{CombatSummary, DuelRecord, DuelStatus, Participant, Rules};

const SETTLEMENT_RETENTION: Duration = Duration::from_secs(24 * 3600);
const WINNER_PAYOUT_ATTEMPTS: u32 = 3;
const WINNER_PAYOUT_BACKOFF: Duration = Duration::from_secs(2);

pub struct CreateDuelInput {
    pub player1_wallet: String,
    pub player2_wallet: String,
    pub player1_character_id: String,
    pub player2_character_id: String,
    pub player1_name: String,
    pub player2_name: String,
    pub stake_amount: f64,
    pub token: Token,
    pub rules: Rules,
}

pub struct CreateDuelOutput {
    pub duel_id: String,
    pub player1_stealth_id: String,
    pub player2_stealth_id: String,
    pub stake_smallest_unit: u128,
    pub expires_at: i64,
}

pub struct LockOutput {
    pub tx_id: String,
    pub status: DuelStatus,
    pub both_locked: bool,
}

pub struct SettleOutput {
    pub winner_tx: String,
    pub treasury_tx: Option<String>,
    pub winner_payout: u128,
    pub house_fee: u128,
    pub commitment_hash: String,
    pub commitment_tx: Option<String>,
}

pub struct RefundOutput {
    pub tx_ids: Vec<String>,
}

pub struct SweepOutput {
    pub swept: u128,
    pub tx_id: Option<String>,
    pub under_minimum: bool,
}

pub struct EmergencyRefundEntry {
    pub player: String,
    pub success: bool,
    pub tx_id: Option<String>,
    pub error: Option<String>,
}

pub enum RefundReason {
    Timeout,
    Cancelled,
    Error,
}

pub struct EscrowEngine {
    store: Arc<Store>,
    stealth: Arc<StealthIdentity>,
    transfer: Arc<dyn TransferBackend>,
    accountability: Arc<Accountability>,
    config: Arc<Config>,
    escrow_wallet: String,
    treasury_wallet: String,
    duel_locks: RwLock<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl EscrowEngine {
    pub fn new(
        store: Arc<Store>,
        stealth: Arc<StealthIdentity>,
        transfer: Arc<dyn TransferBackend>,
        accountability: Arc<Accountability>,
        config: Arc<Config>,
    ) -> Arc<Self> {
        let escrow_wallet = wallet_address(&config.escrow_signing_key);
        let treasury_wallet = wallet_address(&config.treasury_signing_key);
        Arc::new(Self {
            store,
            stealth,
            transfer,
            accountability,
            config,
            escrow_wallet,
            treasury_wallet,
            duel_locks: RwLock::new(HashMap::new()),
        })
    }

    async fn lock_duel(&self, duel_id: &str) -> Arc<AsyncMutex<()>> {
        if let Some(lock) = self.duel_locks.read().await.get(duel_id) {
            return lock.clone();
        }
        self.duel_locks
            .write()
            .await
            .entry(duel_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub async fn get_duel(&self, duel_id: &str) -> Result<DuelRecord> {
        self.store.get(duel_id).await.ok_or(EscrowError::NotFound)
    }

    /// §4.5.2: create duel
    pub async fn create_duel(&self, input: CreateDuelInput) -> Result<CreateDuelOutput> {
        if input.player1_wallet == input.player2_wallet {
            return Err(EscrowError::Validation(
                "players must use different wallets".into(),
            ));
        }

        let stake = input.token.to_smallest_unit(input.stake_amount);
        if stake < input.token.table().minimum_stake {
            return Err(EscrowError::Validation("Stake too low".into()));
        }

        let stealth1 = self.stealth.register(&input.player1_wallet);
        let stealth2 = self.stealth.register(&input.player2_wallet);

        let duel_id = generate_duel_id();
        let now = now_secs();
        let expires_at = now + self.config.escrow_timeout.as_secs() as i64;

        let record = DuelRecord {
            duel_id: duel_id.clone(),
            status: DuelStatus::PendingStakes,
            player1: Participant::new(
                stealth1.clone(),
                input.player1_character_id,
                input.player1_name,
                stake,
            ),
            player2: Participant::new(
                stealth2.clone(),
                input.player2_character_id,
                input.player2_name,
                stake,
            ),
            token: input.token,
            house_fee_percent: self.config.house_fee_percent,
            rules: input.rules,
            created_at: now,
            updated_at: now,
            expires_at,
            winner_stealth_id: None,
            settlement_tx_ids: Vec::new(),
            combat_summary: None,
        };

        self.store
            .set(&duel_id, record, self.config.escrow_timeout)
            .await;

        Ok(CreateDuelOutput {
            duel_id,
            player1_stealth_id: stealth1,
            player2_stealth_id: stealth2,
            stake_smallest_unit: stake,
            expires_at,
        })
    }

    /// §4.5.3: lock stake
    pub async fn lock_stake(
        &self,
        duel_id: &str,
        wallet: &str,
        payment_proof: &str,
    ) -> Result<LockOutput> {
        let lock = self.lock_duel(duel_id).await;
        let _guard = lock.lock().await;

        let mut record = self.store.get(duel_id).await.ok_or(EscrowError::NotFound)?;
        let now = now_secs();

        if record.status != DuelStatus::PendingStakes || now > record.expires_at {
            return Err(EscrowError::Precondition(
                "duel is not accepting stakes".into(),
            ));
        }

        let stealth_id = if self.stealth.verify(wallet, &record.player1.stealth_id) {
            record.player1.stealth_id.clone()
        } else if self.stealth.verify(wallet, &record.player2.stealth_id) {
            record.player2.stealth_id.clone()
        } else {
            return Err(EscrowError::Precondition(
                "wallet is not a participant in this duel".into(),
            ));
        };

        if record.participant(&stealth_id).unwrap().stake_locked {
            return Err(EscrowError::Precondition("stake already locked".into()));
        }

        let tx_id = extract_tx_id(payment_proof);

        {
            let participant = record.participant_mut(&stealth_id).unwrap();
            participant.stake_locked = true;
            participant.lock_tx_id = Some(tx_id.clone());
            participant.lock_timestamp = Some(now);
        }
        record.updated_at = now;

        let both_locked = record.both_locked();
        if both_locked {
            record.status = DuelStatus::Active;
        }

        let remaining = (record.expires_at - now).max(1) as u64;
        let status = record.status;
        self.store
            .set(duel_id, record, Duration::from_secs(remaining))
            .await;

        Ok(LockOutput {
            tx_id,
            status,
            both_locked,
        })
    }

    /// §4.5.4: settle
    pub async fn settle(
        &self,
        duel_id: &str,
        winner_wallet: &str,
        combat_summary: Option<CombatSummary>,
        server_signature: &str,
    ) -> Result<SettleOutput> {
        let lock = self.lock_duel(duel_id).await;
        let _guard = lock.lock().await;

        let mut record = self.store.get(duel_id).await.ok_or(EscrowError::NotFound)?;

        if !matches!(
            record.status,
            DuelStatus::Active | DuelStatus::PendingSettlement
        ) {
            return Err(EscrowError::Precondition(
                "duel is not active or pending settlement".into(),
            ));
        }

        let winner_stealth_id = if self.stealth.verify(winner_wallet, &record.player1.stealth_id) {
            record.player1.stealth_id.clone()
        } else if self.stealth.verify(winner_wallet, &record.player2.stealth_id) {
            record.player2.stealth_id.clone()
        } else {
            return Err(EscrowError::Precondition(
                "winner wallet is not a participant".into(),
            ));
        };
        let loser_stealth_id = record
            .other_participant(&winner_stealth_id)
            .unwrap()
            .stealth_id
            .clone();

        // commit before any money moves; attempted exactly once per settle
        // call regardless of how many payout retries follow
        let commitment_record = self
            .accountability
            .commit_to_settlement(
                duel_id,
                &winner_stealth_id,
                &loser_stealth_id,
                server_signature,
                true,
            )
            .await;

        record.status = DuelStatus::PendingSettlement;
        record.updated_at = now_secs();
        self.store
            .set(duel_id, record.clone(), SETTLEMENT_RETENTION)
            .await;
        self.store.pending_recovery_add(duel_id).await;

        let token = record.token;
        let table = token.table();
        let stake = record.player1.stake;
        let a = stake * (10_000 - table.deposit_fee_percent_x100 as u128) / 10_000;
        let pot = 2 * a;
        let house_fee = pot * self.config.house_fee_percent as u128 / 100;
        let winner_payout = pot - house_fee;

        // retry loop: same nonce across all attempts so the backend can
        // deduplicate if an earlier attempt actually landed but the
        // response was lost (§9 open question, resolved)
        let nonce = rand::thread_rng().next_u32();
        let mut winner_tx = None;
        let mut last_error = String::new();
        let mut permanent_error = None;
        for attempt in 1..=WINNER_PAYOUT_ATTEMPTS {
            match self
                .transfer
                .internal_transfer(&self.escrow_wallet, winner_wallet, token, winner_payout, nonce)
                .await
            {
                Ok(tx) => {
                    winner_tx = Some(tx);
                    break;
                }
                Err(e) => {
                    tracing::warn!(duel_id, attempt, error = %e, "winner payout attempt failed");
                    if !e.is_transient() {
                        permanent_error = Some(e.to_string());
                        break;
                    }
                    last_error = e.to_string();
                    if attempt < WINNER_PAYOUT_ATTEMPTS {
                        tokio::time::sleep(WINNER_PAYOUT_BACKOFF).await;
                    }
                }
            }
        }

        // external-permanent rejections (insufficient balance, below
        // minimum, invalid proof) are not retried: fail immediately and
        // leave recovery to an operator, not the retry/failed_recovery path
        if let Some(err) = permanent_error {
            record.status = DuelStatus::Active;
            record.updated_at = now_secs();
            self.store
                .set(duel_id, record, SETTLEMENT_RETENTION)
                .await;
            self.store.pending_recovery_remove(duel_id).await;
            return Err(EscrowError::ExternalPermanent(format!(
                "winner payout rejected: {err}"
            )));
        }

        let winner_tx = match winner_tx {
            Some(tx) => tx,
            None => {
                record.status = DuelStatus::Active;
                record.updated_at = now_secs();
                self.store
                    .set(duel_id, record, SETTLEMENT_RETENTION)
                    .await;
                self.store.pending_recovery_remove(duel_id).await;
                self.store.failed_recovery_add(duel_id).await;
                return Err(EscrowError::ExternalTransient(format!(
                    "winner payout failed after {WINNER_PAYOUT_ATTEMPTS} attempts: {last_error}"
                )));
            }
        };

        self.store.pending_recovery_remove(duel_id).await;

        let mut treasury_tx = None;
        if house_fee >= table.minimum_transfer {
            let treasury_nonce = rand::thread_rng().next_u32();
            match self
                .transfer
                .internal_transfer(
                    &self.escrow_wallet,
                    &self.treasury_wallet,
                    token,
                    house_fee,
                    treasury_nonce,
                )
                .await
            {
                Ok(tx) => treasury_tx = Some(tx),
                Err(e) => {
                    tracing::warn!(duel_id, error = %e, "treasury payout failed, accumulating dust");
                    self.store.dust_add(token, house_fee).await;
                }
            }
        } else {
            self.store.dust_add(token, house_fee).await;
        }

        record.status = DuelStatus::Settled;
        record.winner_stealth_id = Some(winner_stealth_id.clone());
        record.settlement_tx_ids = vec![winner_tx.clone()];
        if let Some(tx) = &treasury_tx {
            record.settlement_tx_ids.push(tx.clone());
        }
        if let Some(summary) = combat_summary {
            record.combat_summary = Some(summary);
        }
        record.updated_at = now_secs();
        self.store
            .set(duel_id, record, SETTLEMENT_RETENTION)
            .await;

        self.stealth.unregister(&winner_stealth_id);
        self.stealth.unregister(&loser_stealth_id);

        Ok(SettleOutput {
            winner_tx,
            treasury_tx,
            winner_payout,
            house_fee,
            commitment_hash: commitment_record.commitment_hash,
            commitment_tx: commitment_record.on_chain_tx_id,
        })
    }

    /// §4.5.5: refund. pays nominal stake `S`, not the after-deposit-fee
    /// amount `A` — intentional, the house absorbs the deposit fee so
    /// players are made whole.
    pub async fn refund(&self, duel_id: &str, _reason: RefundReason) -> Result<RefundOutput> {
        let lock = self.lock_duel(duel_id).await;
        let _guard = lock.lock().await;

        let mut record = self.store.get(duel_id).await.ok_or(EscrowError::NotFound)?;
        if matches!(record.status, DuelStatus::Settled | DuelStatus::Refunded) {
            return Err(EscrowError::Precondition(
                "duel already settled or refunded".into(),
            ));
        }

        let mut tx_ids = Vec::new();
        for stealth_id in [
            record.player1.stealth_id.clone(),
            record.player2.stealth_id.clone(),
        ] {
            let participant = record.participant(&stealth_id).unwrap();
            if !participant.stake_locked {
                continue;
            }
            let stake = participant.stake;
            let Some(wallet) = self.stealth.resolve(&stealth_id) else {
                tracing::warn!(duel_id, %stealth_id, "no reverse-map entry for locked participant, skipping refund");
                continue;
            };
            let nonce = rand::thread_rng().next_u32();
            match self
                .transfer
                .internal_transfer(&self.escrow_wallet, &wallet, record.token, stake, nonce)
                .await
            {
                Ok(tx) => tx_ids.push(tx),
                Err(e) => tracing::warn!(duel_id, %stealth_id, error = %e, "refund transfer failed"),
            }
        }

        record.status = DuelStatus::Refunded;
        record.updated_at = now_secs();
        self.stealth.unregister(&record.player1.stealth_id);
        self.stealth.unregister(&record.player2.stealth_id);
        self.store
            .set(duel_id, record, SETTLEMENT_RETENTION)
            .await;

        Ok(RefundOutput { tx_ids })
    }

    /// §4.5.6: dust sweep
    pub async fn sweep_dust(&self, token: Token) -> Result<SweepOutput> {
        let dust = self.store.dust_read(token).await;
        let minimum = token.table().minimum_transfer;
        if dust < minimum {
            return Ok(SweepOutput {
                swept: 0,
                tx_id: None,
                under_minimum: true,
            });
        }

        let nonce = rand::thread_rng().next_u32();
        let tx_id = self
            .transfer
            .internal_transfer(&self.escrow_wallet, &self.treasury_wallet, token, dust, nonce)
            .await
            .map_err(|e| EscrowError::ExternalTransient(e.to_string()))?;

        self.store.dust_reset(token).await;
        Ok(SweepOutput {
            swept: dust,
            tx_id: Some(tx_id),
            under_minimum: false,
        })
    }

    pub async fn dust_status(&self, token: Token) -> (u128, bool, u128) {
        let dust = self.store.dust_read(token).await;
        let minimum = token.table().minimum_transfer;
        (dust, dust >= minimum, minimum)
    }

    pub async fn recovery_status(&self) -> (Vec<String>, Vec<String>) {
        (
            self.store.failed_recovery_list().await,
            self.store.pending_recovery_list().await,
        )
    }

    /// §4.5.7: emergency refund — takes explicit wallets since the
    /// reverse stealth map does not survive a process restart
    pub async fn emergency_refund(
        &self,
        duel_id: &str,
        wallet1: &str,
        wallet2: &str,
        stake_per_player: u128,
        token: Token,
    ) -> Vec<EmergencyRefundEntry> {
        let lock = self.lock_duel(duel_id).await;
        let _guard = lock.lock().await;

        let table = token.table();
        let a = stake_per_player * (10_000 - table.deposit_fee_percent_x100 as u128) / 10_000;

        let mut results = Vec::new();
        let mut all_success = true;
        for wallet in [wallet1, wallet2] {
            let nonce = rand::thread_rng().next_u32();
            match self
                .transfer
                .internal_transfer(&self.escrow_wallet, wallet, token, a, nonce)
                .await
            {
                Ok(tx) => results.push(EmergencyRefundEntry {
                    player: wallet.to_string(),
                    success: true,
                    tx_id: Some(tx),
                    error: None,
                }),
                Err(e) => {
                    all_success = false;
                    results.push(EmergencyRefundEntry {
                        player: wallet.to_string(),
                        success: false,
                        tx_id: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        if all_success {
            self.store.recovery_clear(duel_id).await;
            self.stealth.unregister(&self.stealth.generate(wallet1));
            self.stealth.unregister(&self.stealth.generate(wallet2));
            if let Some(mut record) = self.store.get(duel_id).await {
                record.status = DuelStatus::Refunded;
                record.updated_at = now_secs();
                self.store
                    .set(duel_id, record, SETTLEMENT_RETENTION)
                    .await;
            }
        }

        results
    }
}

fn wallet_address(signing_key: &SigningKey) -> String {
    let verifying: VerifyingKey = signing_key.verifying_key();
    bs58::encode(verifying.to_bytes()).into_string()
}

fn generate_duel_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// the lock endpoint trusts the caller's proof; it never independently
/// verifies a transfer against the backend (§9 open question, flagged
/// not fixed). extracts any of txSignature/signature/tx from a JSON
/// body, or treats the whole input as the tx id.
fn extract_tx_id(payment_proof: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(payment_proof) {
        for key in ["txSignature", "signature", "tx"] {
            if let Some(s) = value.get(key).and_then(|v| v.as_str()) {
                return s.to_string();
            }
        }
    }
    payment_proof.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accountability::{Accountability, FakeLedgerAnchor};
    use crate::transfer_client::{FakeTransferBackend, TransferError};

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            escrow_signing_key: SigningKey::from_bytes(&[1u8; 32]),
            treasury_signing_key: SigningKey::from_bytes(&[2u8; 32]),
            server_authority_signing_key: SigningKey::from_bytes(&[3u8; 32]),
            wallet_pepper: b"a-pepper-that-is-at-least-32-bytes-long".to_vec(),
            internal_api_key: "a-secret-that-is-at-least-32-bytes-long".to_string(),
            house_fee_percent: 2,
            escrow_timeout: Duration::from_secs(1800),
            network: crate::config::Network::Devnet,
            is_development: true,
        })
    }

    fn engine(transfer: Arc<dyn TransferBackend>) -> Arc<EscrowEngine> {
        let config = test_config();
        let store = Store::new();
        let stealth = Arc::new(StealthIdentity::new(config.wallet_pepper.clone()));
        let accountability = Accountability::new(FakeLedgerAnchor::new());
        EscrowEngine::new(store, stealth, transfer, accountability, config)
    }

    async fn create_locked_duel(engine: &EscrowEngine, stake_sol: f64) -> String {
        let out = engine
            .create_duel(CreateDuelInput {
                player1_wallet: "wallet-p1".into(),
                player2_wallet: "wallet-p2".into(),
                player1_character_id: "char1".into(),
                player2_character_id: "char2".into(),
                player1_name: "Alice".into(),
                player2_name: "Bob".into(),
                stake_amount: stake_sol,
                token: Token::Sol,
                rules: Rules::default(),
            })
            .await
            .unwrap();

        engine
            .lock_stake(&out.duel_id, "wallet-p1", "tx_p1")
            .await
            .unwrap();
        engine
            .lock_stake(&out.duel_id, "wallet-p2", "tx_p2")
            .await
            .unwrap();

        out.duel_id
    }

    #[tokio::test]
    async fn e1_happy_path() {
        let transfer = FakeTransferBackend::new();
        let engine = engine(transfer);
        let duel_id = create_locked_duel(&engine, 0.1).await;

        let record = engine.get_duel(&duel_id).await.unwrap();
        assert_eq!(record.status, DuelStatus::Active);
        assert_eq!(record.player1.stake, 100_000_000);

        let out = engine
            .settle(&duel_id, "wallet-p1", None, "server-sig")
            .await
            .unwrap();

        assert_eq!(out.winner_payout, 195_020_000);
        assert_eq!(out.house_fee, 3_980_000);

        let record = engine.get_duel(&duel_id).await.unwrap();
        assert_eq!(record.status, DuelStatus::Settled);
    }

    #[tokio::test]
    async fn e2_timeout_refund_no_transfers() {
        let transfer = FakeTransferBackend::new();
        let engine = engine(transfer);

        let out = engine
            .create_duel(CreateDuelInput {
                player1_wallet: "wallet-p1".into(),
                player2_wallet: "wallet-p2".into(),
                player1_character_id: "char1".into(),
                player2_character_id: "char2".into(),
                player1_name: "Alice".into(),
                player2_name: "Bob".into(),
                stake_amount: 0.1,
                token: Token::Sol,
                rules: Rules::default(),
            })
            .await
            .unwrap();

        let refund = engine
            .refund(&out.duel_id, RefundReason::Timeout)
            .await
            .unwrap();

        assert!(refund.tx_ids.is_empty());
        let record = engine.get_duel(&out.duel_id).await.unwrap();
        assert_eq!(record.status, DuelStatus::Refunded);
    }

    #[tokio::test]
    async fn e3_one_sided_lock_then_refund() {
        let transfer = FakeTransferBackend::new();
        let engine = engine(transfer);

        let out = engine
            .create_duel(CreateDuelInput {
                player1_wallet: "wallet-p1".into(),
                player2_wallet: "wallet-p2".into(),
                player1_character_id: "char1".into(),
                player2_character_id: "char2".into(),
                player1_name: "Alice".into(),
                player2_name: "Bob".into(),
                stake_amount: 0.1,
                token: Token::Sol,
                rules: Rules::default(),
            })
            .await
            .unwrap();

        engine
            .lock_stake(&out.duel_id, "wallet-p1", "tx_p1")
            .await
            .unwrap();

        let refund = engine
            .refund(&out.duel_id, RefundReason::Cancelled)
            .await
            .unwrap();

        assert_eq!(refund.tx_ids.len(), 1);
        let record = engine.get_duel(&out.duel_id).await.unwrap();
        assert_eq!(record.status, DuelStatus::Refunded);
    }

    #[tokio::test]
    async fn e4_retry_exhaustion_reverts_to_active() {
        let transfer = FakeTransferBackend::new();
        transfer
            .script(vec![
                Err(TransferError::Network("timeout".into())),
                Err(TransferError::Network("timeout".into())),
                Err(TransferError::Network("timeout".into())),
            ])
            .await;
        let engine = engine(transfer);
        let duel_id = create_locked_duel(&engine, 0.1).await;

        let result = engine.settle(&duel_id, "wallet-p1", None, "server-sig").await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("after 3 attempts"));

        let record = engine.get_duel(&duel_id).await.unwrap();
        assert_eq!(record.status, DuelStatus::Active);

        let (failed, _) = engine.recovery_status().await;
        assert!(failed.contains(&duel_id));
    }

    #[tokio::test]
    async fn permanent_backend_rejection_fails_immediately_without_retry() {
        let transfer = FakeTransferBackend::new();
        transfer
            .script(vec![Err(TransferError::InsufficientBalance)])
            .await;
        let engine = engine(transfer.clone());
        let duel_id = create_locked_duel(&engine, 0.1).await;

        let result = engine.settle(&duel_id, "wallet-p1", None, "server-sig").await;
        assert!(matches!(result, Err(EscrowError::ExternalPermanent(_))));

        // only one attempt was made, not three
        assert_eq!(transfer.calls.lock().await.len(), 1);

        // reverted to ACTIVE but not pushed into failed_recovery: this
        // wasn't a retry exhaustion, it was an un-retriable rejection
        let record = engine.get_duel(&duel_id).await.unwrap();
        assert_eq!(record.status, DuelStatus::Active);
        let (failed, pending) = engine.recovery_status().await;
        assert!(!failed.contains(&duel_id));
        assert!(!pending.contains(&duel_id));
    }

    #[tokio::test]
    async fn e5_dust_accumulates_below_minimum() {
        let transfer = FakeTransferBackend::new();
        let engine = engine(transfer);
        let duel_id = create_locked_duel(&engine, 0.11).await;

        let out = engine
            .settle(&duel_id, "wallet-p1", None, "server-sig")
            .await
            .unwrap();

        assert_eq!(out.house_fee, 4_378_000);
        assert!(out.treasury_tx.is_none());

        let (dust, can_sweep, _) = engine.dust_status(Token::Sol).await;
        assert_eq!(dust, 4_378_000);
        assert!(!can_sweep);
    }

    #[tokio::test]
    async fn e6_verification_matches() {
        let transfer = FakeTransferBackend::new();
        let engine = engine(transfer);
        let duel_id = create_locked_duel(&engine, 0.1).await;

        let out = engine
            .settle(&duel_id, "wallet-p1", None, "server-sig")
            .await
            .unwrap();

        let expected_winner = engine.stealth.generate("wallet-p1");
        let record = engine.get_duel(&duel_id).await.unwrap();
        assert_eq!(record.winner_stealth_id, Some(expected_winner));
        assert!(!out.commitment_hash.is_empty());
    }

    #[tokio::test]
    async fn settle_after_settle_is_idempotent_precondition_error() {
        let transfer = FakeTransferBackend::new();
        let engine = engine(transfer);
        let duel_id = create_locked_duel(&engine, 0.1).await;

        engine
            .settle(&duel_id, "wallet-p1", None, "server-sig")
            .await
            .unwrap();

        let second = engine.settle(&duel_id, "wallet-p1", None, "server-sig").await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn lock_after_lock_is_already_locked_error() {
        let transfer = FakeTransferBackend::new();
        let engine = engine(transfer);

        let out = engine
            .create_duel(CreateDuelInput {
                player1_wallet: "wallet-p1".into(),
                player2_wallet: "wallet-p2".into(),
                player1_character_id: "char1".into(),
                player2_character_id: "char2".into(),
                player1_name: "Alice".into(),
                player2_name: "Bob".into(),
                stake_amount: 0.1,
                token: Token::Sol,
                rules: Rules::default(),
            })
            .await
            .unwrap();

        engine
            .lock_stake(&out.duel_id, "wallet-p1", "tx_p1")
            .await
            .unwrap();

        let second = engine.lock_stake(&out.duel_id, "wallet-p1", "tx_p1_again").await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn emergency_refund_unregisters_stealth_ids_on_success() {
        let transfer = FakeTransferBackend::new();
        let engine = engine(transfer);

        let out = engine
            .create_duel(CreateDuelInput {
                player1_wallet: "wallet-p1".into(),
                player2_wallet: "wallet-p2".into(),
                player1_character_id: "char1".into(),
                player2_character_id: "char2".into(),
                player1_name: "Alice".into(),
                player2_name: "Bob".into(),
                stake_amount: 0.1,
                token: Token::Sol,
                rules: Rules::default(),
            })
            .await
            .unwrap();

        let results = engine
            .emergency_refund(&out.duel_id, "wallet-p1", "wallet-p2", 100_000_000, Token::Sol)
            .await;
        assert!(results.iter().all(|r| r.success));

        let record = engine.get_duel(&out.duel_id).await.unwrap();
        assert_eq!(record.status, DuelStatus::Refunded);

        // invariant #2 (§3): neither participant's stealth id resolves
        // after a terminal transition, including emergency refund
        assert!(engine.stealth.resolve(&out.player1_stealth_id).is_none());
        assert!(engine.stealth.resolve(&out.player2_stealth_id).is_none());
    }

    #[test]
    fn test_extract_tx_id_from_plain_string() {
        assert_eq!(extract_tx_id("raw-tx-id"), "raw-tx-id");
    }

    #[test]
    fn test_extract_tx_id_from_json_variants() {
        assert_eq!(
            extract_tx_id(r#"{"txSignature":"sig-a"}"#),
            "sig-a"
        );
        assert_eq!(extract_tx_id(r#"{"signature":"sig-b"}"#), "sig-b");
        assert_eq!(extract_tx_id(r#"{"tx":"sig-c"}"#), "sig-c");
    }

    #[test]
    fn test_stake_below_minimum_rejected() {
        assert!(Token::Sol.to_smallest_unit(0.001) < Token::Sol.table().minimum_stake);
    }
}
