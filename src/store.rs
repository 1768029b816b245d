//! in-memory store (C2)
//!
//! keyed duel records with per-entry expiry, a background reaper, and the
//! side collections the escrow engine needs for dust accounting and
//! settlement recovery. authoritative only for the process lifetime —
//! there is no persistence layer, by design (see spec §6.5).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::token::Token;
use crate::types::DuelRecord;

const REAPER_INTERVAL: Duration = Duration::from_secs(60);

struct Entry {
    record: DuelRecord,
    expires_at: i64,
}

#[derive(Default)]
pub struct StoreStats {
    pub created: AtomicU64,
    pub expired: AtomicU64,
}

pub struct Store {
    records: RwLock<HashMap<String, Entry>>,
    dust: RwLock<HashMap<Token, u128>>,
    pending_recovery: RwLock<HashSet<String>>,
    failed_recovery: RwLock<HashSet<String>>,
    pub stats: StoreStats,
}

impl Store {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            records: RwLock::new(HashMap::new()),
            dust: RwLock::new(HashMap::new()),
            pending_recovery: RwLock::new(HashSet::new()),
            failed_recovery: RwLock::new(HashSet::new()),
            stats: StoreStats::default(),
        })
    }

    /// spawn the background reaper; runs for the lifetime of the process
    /// (or until the returned handle is aborted on shutdown)
    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAPER_INTERVAL);
            loop {
                interval.tick().await;
                store.sweep_expired().await;
            }
        })
    }

    async fn sweep_expired(&self) {
        let now = now_secs();
        let mut records = self.records.write().await;
        let expired: Vec<String> = records
            .iter()
            .filter(|(_, e)| e.expires_at < now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            records.remove(key);
            self.stats.expired.fetch_add(1, Ordering::Relaxed);
            tracing::info!(duel_id = %key, "reaper evicted expired duel");
        }
    }

    /// upsert with an absolute expiry of now + ttl
    pub async fn set(&self, duel_id: &str, record: DuelRecord, ttl: Duration) {
        let expires_at = now_secs() + ttl.as_secs() as i64;
        let is_new = !self.records.read().await.contains_key(duel_id);
        self.records
            .write()
            .await
            .insert(duel_id.to_string(), Entry { record, expires_at });
        if is_new {
            self.stats.created.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// returns the record, evicting and returning absent if past expiry
    pub async fn get(&self, duel_id: &str) -> Option<DuelRecord> {
        {
            let records = self.records.read().await;
            match records.get(duel_id) {
                Some(entry) if entry.expires_at >= now_secs() => return Some(entry.record.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // past expiry: evict under a write lock and report absent
        let mut records = self.records.write().await;
        records.remove(duel_id);
        self.stats.expired.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub async fn delete(&self, duel_id: &str) {
        self.records.write().await.remove(duel_id);
    }

    pub async fn dust_add(&self, token: Token, delta: u128) {
        *self.dust.write().await.entry(token).or_insert(0) += delta;
    }

    pub async fn dust_read(&self, token: Token) -> u128 {
        *self.dust.read().await.get(&token).unwrap_or(&0)
    }

    pub async fn dust_reset(&self, token: Token) {
        self.dust.write().await.insert(token, 0);
    }

    pub async fn pending_recovery_add(&self, duel_id: &str) {
        self.pending_recovery.write().await.insert(duel_id.to_string());
    }

    pub async fn pending_recovery_remove(&self, duel_id: &str) {
        self.pending_recovery.write().await.remove(duel_id);
    }

    pub async fn pending_recovery_list(&self) -> Vec<String> {
        self.pending_recovery.read().await.iter().cloned().collect()
    }

    pub async fn failed_recovery_add(&self, duel_id: &str) {
        self.failed_recovery.write().await.insert(duel_id.to_string());
    }

    pub async fn failed_recovery_remove(&self, duel_id: &str) {
        self.failed_recovery.write().await.remove(duel_id);
    }

    pub async fn failed_recovery_list(&self) -> Vec<String> {
        self.failed_recovery.read().await.iter().cloned().collect()
    }

    /// clear both recovery sets for a duel (used by emergency refund)
    pub async fn recovery_clear(&self, duel_id: &str) {
        self.pending_recovery.write().await.remove(duel_id);
        self.failed_recovery.write().await.remove(duel_id);
    }
}

pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DuelStatus, Participant, Rules};

    fn sample_record(id: &str) -> DuelRecord {
        DuelRecord {
            duel_id: id.to_string(),
            status: DuelStatus::PendingStakes,
            player1: Participant::new("s1".into(), "c1".into(), "p1".into(), 1000),
            player2: Participant::new("s2".into(), "c2".into(), "p2".into(), 1000),
            token: Token::Sol,
            house_fee_percent: 2,
            rules: Rules::default(),
            created_at: now_secs(),
            updated_at: now_secs(),
            expires_at: now_secs() + 1800,
            winner_stealth_id: None,
            settlement_tx_ids: vec![],
            combat_summary: None,
        }
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let store = Store::new();
        store.set("d1", sample_record("d1"), Duration::from_secs(60)).await;
        let got = store.get("d1").await.unwrap();
        assert_eq!(got.duel_id, "d1");
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent() {
        let store = Store::new();
        store.set("d1", sample_record("d1"), Duration::from_secs(0)).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(store.get("d1").await.is_none());
    }

    #[tokio::test]
    async fn test_dust_accumulates() {
        let store = Store::new();
        store.dust_add(Token::Sol, 100).await;
        store.dust_add(Token::Sol, 50).await;
        assert_eq!(store.dust_read(Token::Sol).await, 150);
        store.dust_reset(Token::Sol).await;
        assert_eq!(store.dust_read(Token::Sol).await, 0);
    }

    #[tokio::test]
    async fn test_recovery_sets() {
        let store = Store::new();
        store.pending_recovery_add("d1").await;
        assert_eq!(store.pending_recovery_list().await, vec!["d1".to_string()]);
        store.pending_recovery_remove("d1").await;
        assert!(store.pending_recovery_list().await.is_empty());

        store.failed_recovery_add("d2").await;
        store.recovery_clear("d2").await;
        assert!(store.failed_recovery_list().await.is_empty());
    }
}
