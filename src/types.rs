//! core data model: duel records, participants, commitments

use serde::{Deserialize, Serialize};

use crate::token::Token;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuelStatus {
    #[serde(rename = "PENDING_STAKES")]
    PendingStakes,
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "PENDING_SETTLEMENT")]
    PendingSettlement,
    #[serde(rename = "SETTLED")]
    Settled,
    #[serde(rename = "REFUNDED")]
    Refunded,
    #[serde(rename = "FAILED")]
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Participant {
    pub stealth_id: String,
    pub character_id: String,
    pub name: String,
    /// stake amount in smallest unit
    pub stake: u128,
    pub stake_locked: bool,
    pub lock_tx_id: Option<String>,
    pub lock_timestamp: Option<i64>,
}

impl Participant {
    pub fn new(stealth_id: String, character_id: String, name: String, stake: u128) -> Self {
        Self {
            stealth_id,
            character_id,
            name,
            stake,
            stake_locked: false,
            lock_tx_id: None,
            lock_timestamp: None,
        }
    }
}

/// opaque per-duel rules bag, passed through unchanged
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Rules {
    #[serde(default)]
    pub flags: std::collections::HashMap<String, bool>,
    #[serde(default)]
    pub time_limit_seconds: Option<u64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CombatSummary(pub serde_json::Value);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DuelRecord {
    pub duel_id: String,
    pub status: DuelStatus,
    pub player1: Participant,
    pub player2: Participant,
    pub token: Token,
    pub house_fee_percent: u8,
    pub rules: Rules,
    pub created_at: i64,
    pub updated_at: i64,
    pub expires_at: i64,
    pub winner_stealth_id: Option<String>,
    pub settlement_tx_ids: Vec<String>,
    pub combat_summary: Option<CombatSummary>,
}

impl DuelRecord {
    /// the participant matching a given stealth id, if any
    pub fn participant(&self, stealth_id: &str) -> Option<&Participant> {
        if self.player1.stealth_id == stealth_id {
            Some(&self.player1)
        } else if self.player2.stealth_id == stealth_id {
            Some(&self.player2)
        } else {
            None
        }
    }

    pub fn participant_mut(&mut self, stealth_id: &str) -> Option<&mut Participant> {
        if self.player1.stealth_id == stealth_id {
            Some(&mut self.player1)
        } else if self.player2.stealth_id == stealth_id {
            Some(&mut self.player2)
        } else {
            None
        }
    }

    pub fn other_participant(&self, stealth_id: &str) -> Option<&Participant> {
        if self.player1.stealth_id == stealth_id {
            Some(&self.player2)
        } else if self.player2.stealth_id == stealth_id {
            Some(&self.player1)
        } else {
            None
        }
    }

    pub fn both_locked(&self) -> bool {
        self.player1.stake_locked && self.player2.stake_locked
    }
}

/// the commitment object that gets canonically serialised and hashed.
/// field order is declaration order — serde_json preserves it — and is
/// pinned by a unit test in accountability.rs; bump `version` rather than
/// reordering fields if the shape ever changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Commitment {
    pub duel_id: String,
    pub winner_stealth_id: String,
    pub loser_stealth_id: String,
    pub game_server_signature: String,
    pub timestamp: i64,
    pub version: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommitmentRecord {
    pub commitment: Commitment,
    pub commitment_hash: String,
    pub on_chain_tx_id: Option<String>,
    pub on_chain_success: bool,
    pub recorded_at: i64,
}
