//! stealth identity (C1)
//!
//! keyed one-way hash of a wallet address to a stable id, plus an
//! in-memory reverse map scoped to active duels. the map is single-writer
//! in practice: all registration/resolution/unregistration calls happen
//! from inside the escrow engine's per-duel critical section (C5), so no
//! additional locking is layered on top here beyond the map's own mutex.

use hmac::{digest::KeyInit, Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::RwLock;

type HmacSha256 = Hmac<Sha256>;

/// keyed hasher plus the duel-scoped reverse map
pub struct StealthIdentity {
    pepper: Vec<u8>,
    reverse: RwLock<HashMap<String, String>>,
}

impl StealthIdentity {
    pub fn new(pepper: Vec<u8>) -> Self {
        Self {
            pepper,
            reverse: RwLock::new(HashMap::new()),
        }
    }

    /// normalise a wallet address: trim whitespace, preserve case
    fn normalise(wallet: &str) -> String {
        wallet.trim().to_string()
    }

    /// derive the stable stealth id for a wallet: lowercase hex of
    /// HMAC-SHA256(pepper, normalise(wallet))
    pub fn generate(&self, wallet: &str) -> String {
        let mut mac: HmacSha256 =
            KeyInit::new_from_slice(&self.pepper).expect("hmac accepts any key length");
        mac.update(Self::normalise(wallet).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// recompute and compare in constant time
    pub fn verify(&self, wallet: &str, stealth_id: &str) -> bool {
        let expected = self.generate(wallet);
        constant_time_eq(expected.as_bytes(), stealth_id.as_bytes())
    }

    /// register a wallet in the duel-scoped reverse map, returning its
    /// stealth id
    pub fn register(&self, wallet: &str) -> String {
        let stealth_id = self.generate(wallet);
        self.reverse
            .write()
            .expect("reverse map lock poisoned")
            .insert(stealth_id.clone(), wallet.to_string());
        stealth_id
    }

    /// resolve a stealth id back to its wallet, if still registered
    pub fn resolve(&self, stealth_id: &str) -> Option<String> {
        self.reverse
            .read()
            .expect("reverse map lock poisoned")
            .get(stealth_id)
            .cloned()
    }

    /// drop a stealth id from the reverse map (called on terminal
    /// transitions: SETTLED, REFUNDED)
    pub fn unregister(&self, stealth_id: &str) {
        self.reverse
            .write()
            .expect("reverse map lock poisoned")
            .remove(stealth_id);
    }

    /// display-safe truncation; never returns the raw wallet
    pub fn mask(wallet: &str) -> String {
        let w = Self::normalise(wallet);
        if w.len() <= 8 {
            return "*".repeat(w.len());
        }
        format!("{}...{}", &w[..4], &w[w.len() - 4..])
    }
}

/// constant-time byte comparison; avoids leaking match length via timing
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
