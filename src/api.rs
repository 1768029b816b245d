//! API surface (C6) — thin request validation, authentication, dispatch
//!
//! internal routes live under `/api/v1/duel`, gated by a shared-secret
//! header compared in constant time. public routes are the health probes
//! plus, when `is_development`, the same duel routes without the secret
//! check (browser testing convenience, per spec §6.1).

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::HeaderMap;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::accountability::Accountability;
use crate::error::{EscrowError, Result};
use crate::escrow::{CreateDuelInput, EscrowEngine, RefundReason};
use crate::rate_limit::RateLimiter;
use crate::token::Token;
use crate::types::{CombatSummary, DuelStatus, Rules};

pub struct AppState {
    pub engine: Arc<EscrowEngine>,
    pub accountability: Arc<Accountability>,
    pub internal_api_key: String,
    pub is_development: bool,
    pub rate_limiter: RateLimiter,
    pub network: crate::config::Network,
}

pub fn router(state: Arc<AppState>) -> Router {
    let duel_routes = Router::new()
        .route("/create", post(create_duel))
        .route("/lock-stake", post(lock_stake))
        .route("/settle", post(settle))
        .route("/refund", post(refund))
        .route("/recovery/status", get(recovery_status))
        .route("/recovery/emergency-refund", post(emergency_refund))
        .route("/dust-status", get(dust_status))
        .route("/sweep-dust", post(sweep_dust))
        .route("/verify/{duel_id}", get(verify_duel))
        .route("/{duel_id}", get(get_duel));

    let internal = duel_routes
        .clone()
        .layer(middleware::from_fn_with_state(state.clone(), require_internal_secret));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(health))
        .route("/health/live", get(health))
        .nest("/api/v1/duel", internal);

    // development convenience: the same routes reachable without the
    // shared secret, for browser-based testing (spec §6.1)
    if state.is_development {
        app = app.nest("/dev/duel", duel_routes);
    }

    app.layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

// === middleware ===

async fn require_internal_secret(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let provided = headers
        .get("X-Internal-Secret")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !constant_time_eq(provided.as_bytes(), state.internal_api_key.as_bytes()) {
        return EscrowError::Unauthorized.into_response();
    }
    next.run(request).await
}

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

async fn rate_limit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    match state.rate_limiter.check(client_ip(&request, addr)).await {
        Ok(()) => next.run(request).await,
        Err(retry_after) => EscrowError::RateLimited {
            retry_after_secs: retry_after.as_secs(),
        }
        .into_response(),
    }
}

fn client_ip(request: &axum::extract::Request, fallback: SocketAddr) -> IpAddr {
    request
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
        .unwrap_or(fallback.ip())
}

// === validation ===

fn validate_wallet(wallet: &str) -> Result<()> {
    if wallet.len() < 32 || wallet.len() > 44 {
        return Err(EscrowError::Validation(
            "wallet must be 32-44 characters".into(),
        ));
    }
    Ok(())
}

fn validate_duel_id(duel_id: &str) -> Result<()> {
    if duel_id.len() != 32 {
        return Err(EscrowError::Validation(
            "duel id must be exactly 32 characters".into(),
        ));
    }
    Ok(())
}

fn validate_character_id(character_id: &str) -> Result<()> {
    if character_id.is_empty() {
        return Err(EscrowError::Validation("character id must not be empty".into()));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 32 {
        return Err(EscrowError::Validation(
            "name must be 1-32 characters".into(),
        ));
    }
    Ok(())
}

fn validate_stake(stake: f64) -> Result<()> {
    if !(stake > 0.0) {
        return Err(EscrowError::Validation("stake must be positive".into()));
    }
    Ok(())
}

fn parse_token(raw: Option<&str>) -> Result<Token> {
    match raw {
        None => Ok(Token::default()),
        Some(s) => Token::parse(s)
            .ok_or_else(|| EscrowError::Validation(format!("unsupported token: {s}"))),
    }
}

// === /create ===

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDuelRequest {
    player1_wallet: String,
    player2_wallet: String,
    player1_character_id: String,
    player2_character_id: String,
    player1_name: String,
    player2_name: String,
    stake_amount: f64,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    rules: Option<Rules>,
}

async fn create_duel(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateDuelRequest>,
) -> Result<Json<serde_json::Value>> {
    validate_wallet(&req.player1_wallet)?;
    validate_wallet(&req.player2_wallet)?;
    validate_character_id(&req.player1_character_id)?;
    validate_character_id(&req.player2_character_id)?;
    validate_name(&req.player1_name)?;
    validate_name(&req.player2_name)?;
    validate_stake(req.stake_amount)?;
    let token = parse_token(req.token.as_deref())?;

    let out = state
        .engine
        .create_duel(CreateDuelInput {
            player1_wallet: req.player1_wallet,
            player2_wallet: req.player2_wallet,
            player1_character_id: req.player1_character_id,
            player2_character_id: req.player2_character_id,
            player1_name: req.player1_name,
            player2_name: req.player2_name,
            stake_amount: req.stake_amount,
            token,
            rules: req.rules.unwrap_or_default(),
        })
        .await?;

    tracing::info!(duel_id = %out.duel_id, "duel created");

    Ok(Json(json!({
        "success": true,
        "duelId": out.duel_id,
        "player1StealthId": out.player1_stealth_id,
        "player2StealthId": out.player2_stealth_id,
        "stakeAmountLamports": out.stake_smallest_unit.to_string(),
        "expiresAt": out.expires_at,
    })))
}

// === /lock-stake ===

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockStakeRequest {
    duel_id: String,
    player_wallet: String,
    payment_proof: String,
}

async fn lock_stake(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LockStakeRequest>,
) -> Result<Json<serde_json::Value>> {
    validate_duel_id(&req.duel_id)?;
    validate_wallet(&req.player_wallet)?;

    let out = state
        .engine
        .lock_stake(&req.duel_id, &req.player_wallet, &req.payment_proof)
        .await?;

    Ok(Json(json!({
        "success": true,
        "txSignature": out.tx_id,
        "duelStatus": status_str(out.status),
        "bothLocked": out.both_locked,
    })))
}

// === /settle ===

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettleRequest {
    duel_id: String,
    winner_wallet: String,
    #[allow(dead_code)]
    #[serde(default)]
    winner_character_id: Option<String>,
    server_signature: String,
    #[serde(default)]
    combat_summary: Option<serde_json::Value>,
}

async fn settle(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SettleRequest>,
) -> Result<Json<serde_json::Value>> {
    validate_duel_id(&req.duel_id)?;
    validate_wallet(&req.winner_wallet)?;

    let out = state
        .engine
        .settle(
            &req.duel_id,
            &req.winner_wallet,
            req.combat_summary.map(CombatSummary),
            &req.server_signature,
        )
        .await?;

    tracing::info!(duel_id = %req.duel_id, "duel settled");

    Ok(Json(json!({
        "success": true,
        "winnerTxSignature": out.winner_tx,
        "treasuryTxSignature": out.treasury_tx,
        "winnerPayoutLamports": out.winner_payout.to_string(),
        "treasuryFeeLamports": out.house_fee.to_string(),
        "commitmentHash": out.commitment_hash,
        "commitmentTxSignature": out.commitment_tx,
    })))
}

// === /refund ===

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefundRequest {
    duel_id: String,
    reason: String,
    #[allow(dead_code)]
    server_signature: String,
}

async fn refund(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefundRequest>,
) -> Result<Json<serde_json::Value>> {
    validate_duel_id(&req.duel_id)?;
    let reason = match req.reason.as_str() {
        "timeout" => RefundReason::Timeout,
        "cancelled" => RefundReason::Cancelled,
        "error" => RefundReason::Error,
        other => {
            return Err(EscrowError::Validation(format!(
                "unknown refund reason: {other}"
            )))
        }
    };

    let out = state.engine.refund(&req.duel_id, reason).await?;

    tracing::info!(duel_id = %req.duel_id, "duel refunded");

    Ok(Json(json!({
        "success": true,
        "refundTxSignatures": out.tx_ids,
    })))
}

// === GET /:duelId ===

async fn get_duel(
    State(state): State<Arc<AppState>>,
    Path(duel_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    validate_duel_id(&duel_id)?;
    let record = state.engine.get_duel(&duel_id).await?;

    Ok(Json(json!({
        "success": true,
        "duel": {
            "duelId": record.duel_id,
            "status": status_str(record.status),
            "player1StealthId": record.player1.stealth_id,
            "player2StealthId": record.player2.stealth_id,
            "player1Name": record.player1.name,
            "player2Name": record.player2.name,
            "player1Locked": record.player1.stake_locked,
            "player2Locked": record.player2.stake_locked,
            "stake": record.player1.stake.to_string(),
            "token": record.token.as_str(),
            "rules": record.rules,
            "expiresAt": record.expires_at,
            "winnerStealthId": record.winner_stealth_id,
            "combatSummary": record.combat_summary.map(|s| s.0),
        },
    })))
}

// === GET /verify/:duelId ===

async fn verify_duel(
    State(state): State<Arc<AppState>>,
    Path(duel_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    validate_duel_id(&duel_id)?;
    let record = state.engine.get_duel(&duel_id).await?;
    let commitment_record = state
        .accountability
        .get_commitment_record(&duel_id)
        .await
        .ok_or(EscrowError::NotFound)?;

    let recomputed = crate::accountability::hash_commitment(&commitment_record.commitment);
    let hash_matches = recomputed == commitment_record.commitment_hash;

    let explorer_url = commitment_record.on_chain_tx_id.as_ref().map(|tx| {
        format!(
            "https://explorer.duel-escrow.internal/tx/{tx}?cluster={}",
            network_tag(state.network)
        )
    });

    Ok(Json(json!({
        "success": true,
        "verification": {
            "duelId": duel_id,
            "winnerStealthId": record.winner_stealth_id,
        },
        "commitment": {
            "rawData": commitment_record.commitment,
            "hash": commitment_record.commitment_hash,
            "recomputedHash": recomputed,
            "hashMatches": hash_matches,
        },
        "onChain": {
            "posted": commitment_record.on_chain_success,
            "txSignature": commitment_record.on_chain_tx_id,
            "explorerUrl": explorer_url,
        },
    })))
}

fn network_tag(network: crate::config::Network) -> &'static str {
    match network {
        crate::config::Network::Devnet => "devnet",
        crate::config::Network::Testnet => "testnet",
        crate::config::Network::Mainnet => "mainnet-beta",
    }
}

// === recovery ===

async fn recovery_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let (failed, pending) = state.engine.recovery_status().await;
    Json(json!({
        "success": true,
        "failedDuels": failed,
        "pendingSettlements": pending,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmergencyRefundRequest {
    duel_id: String,
    player1_wallet: String,
    player2_wallet: String,
    stake_per_player_lamports: String,
    #[serde(default)]
    token: Option<String>,
}

async fn emergency_refund(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmergencyRefundRequest>,
) -> Result<Json<serde_json::Value>> {
    validate_duel_id(&req.duel_id)?;
    validate_wallet(&req.player1_wallet)?;
    validate_wallet(&req.player2_wallet)?;
    let token = parse_token(req.token.as_deref())?;
    let stake: u128 = req
        .stake_per_player_lamports
        .parse()
        .map_err(|_| EscrowError::Validation("stakePerPlayerLamports must be an integer".into()))?;

    let results = state
        .engine
        .emergency_refund(
            &req.duel_id,
            &req.player1_wallet,
            &req.player2_wallet,
            stake,
            token,
        )
        .await;

    let refunds: Vec<_> = results
        .into_iter()
        .map(|r| {
            json!({
                "player": r.player,
                "success": r.success,
                "txSignature": r.tx_id,
                "error": r.error,
            })
        })
        .collect();

    Ok(Json(json!({ "success": true, "refunds": refunds })))
}

// === dust ===

#[derive(Deserialize)]
struct TokenQuery {
    #[serde(default)]
    token: Option<String>,
}

async fn dust_status(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TokenQuery>,
) -> Result<Json<serde_json::Value>> {
    let token = parse_token(q.token.as_deref())?;
    let (dust, can_sweep, minimum) = state.engine.dust_status(token).await;
    Ok(Json(json!({
        "success": true,
        "dustLamports": dust.to_string(),
        "canSweep": can_sweep,
        "minimumToSweep": minimum.to_string(),
    })))
}

#[derive(Deserialize)]
struct SweepDustRequest {
    #[serde(default)]
    token: Option<String>,
}

async fn sweep_dust(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SweepDustRequest>,
) -> Result<Json<serde_json::Value>> {
    let token = parse_token(req.token.as_deref())?;
    let out = state.engine.sweep_dust(token).await?;

    Ok(Json(json!({
        "success": true,
        "sweptLamports": out.swept.to_string(),
        "txSignature": out.tx_id,
        "underMinimum": out.under_minimum,
    })))
}

fn status_str(status: DuelStatus) -> &'static str {
    match status {
        DuelStatus::PendingStakes => "PENDING_STAKES",
        DuelStatus::Active => "ACTIVE",
        DuelStatus::PendingSettlement => "PENDING_SETTLEMENT",
        DuelStatus::Settled => "SETTLED",
        DuelStatus::Refunded => "REFUNDED",
        DuelStatus::Failed => "FAILED",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_wallet_bounds() {
        assert!(validate_wallet(&"a".repeat(32)).is_ok());
        assert!(validate_wallet(&"a".repeat(44)).is_ok());
        assert!(validate_wallet(&"a".repeat(31)).is_err());
        assert!(validate_wallet(&"a".repeat(45)).is_err());
    }

    #[test]
    fn test_validate_duel_id_exact_length() {
        assert!(validate_duel_id(&"a".repeat(32)).is_ok());
        assert!(validate_duel_id(&"a".repeat(31)).is_err());
        assert!(validate_duel_id(&"a".repeat(33)).is_err());
    }

    #[test]
    fn test_validate_name_bounds() {
        assert!(validate_name("a").is_ok());
        assert!(validate_name(&"a".repeat(32)).is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(&"a".repeat(33)).is_err());
    }

    #[test]
    fn test_validate_stake_positive() {
        assert!(validate_stake(0.1).is_ok());
        assert!(validate_stake(0.0).is_err());
        assert!(validate_stake(-1.0).is_err());
    }

    #[test]
    fn test_parse_token_default_and_unknown() {
        assert_eq!(parse_token(None).unwrap(), Token::Sol);
        assert!(parse_token(Some("DOGE")).is_err());
    }
}
