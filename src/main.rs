//! duel-escrow — privacy-preserving duel escrow and settlement service
//!
//! holds two-sided stakes in a shielded pool while an external game server
//! runs a pvp match, then pays the declared winner with a commit-then-settle
//! accountability trail on a public ledger.
//!
//! usage:
//!   duel-escrow --port 8080
//!
//! configuration is read from the environment (see README / spec §6.4):
//! ESCROW_WALLET_SECRET, TREASURY_WALLET_SECRET, SERVER_AUTHORITY_SECRET,
//! WALLET_PEPPER, INTERNAL_API_KEY are required; the rest have defaults.

use clap::Parser;
use duel_escrow::accountability::{Accountability, HttpLedgerAnchor};
use duel_escrow::api::{self, AppState};
use duel_escrow::config::Config;
use duel_escrow::escrow::EscrowEngine;
use duel_escrow::rate_limit::RateLimiter;
use duel_escrow::stealth::StealthIdentity;
use duel_escrow::store::Store;
use duel_escrow::transfer_client::{HttpTransferBackend, StubProofGenerator};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// duel-escrow - privacy-preserving duel escrow and settlement service
#[derive(Parser)]
#[command(name = "duel-escrow")]
#[command(about = "privacy-preserving duel escrow and settlement service")]
#[command(version)]
struct Args {
    /// port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("duel_escrow=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let config = Arc::new(Config::load_or_exit());

    info!("duel-escrow v{}", env!("CARGO_PKG_VERSION"));
    info!("  network: {:?}", config.network);
    info!("  house fee: {}%", config.house_fee_percent);
    info!("  escrow timeout: {}s", config.escrow_timeout.as_secs());
    info!("  bind: {}:{}", args.bind, args.port);
    if config.is_development {
        tracing::warn!("running in development mode: duel routes also reachable under /dev/duel without the internal secret");
    }

    let store = Store::new();
    let _reaper = store.spawn_reaper();

    let stealth = Arc::new(StealthIdentity::new(config.wallet_pepper.clone()));

    let transfer_backend = Arc::new(HttpTransferBackend::new(
        config.network.transfer_backend_base_url().to_string(),
        config.escrow_signing_key.clone(),
        config.treasury_signing_key.clone(),
        Box::new(StubProofGenerator),
    ));

    let ledger_anchor = Arc::new(HttpLedgerAnchor::new(
        config.network.transfer_backend_base_url().to_string(),
        config.server_authority_signing_key.clone(),
    ));
    let accountability = Accountability::new(ledger_anchor);

    let engine = EscrowEngine::new(
        store.clone(),
        stealth.clone(),
        transfer_backend,
        accountability.clone(),
        config.clone(),
    );

    let state = Arc::new(AppState {
        engine,
        accountability,
        internal_api_key: config.internal_api_key.clone(),
        is_development: config.is_development,
        rate_limiter: RateLimiter::new(),
        network: config.network,
    });

    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .expect("invalid bind address");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind listener");
    info!("listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");

    info!("shutdown complete");
}

/// waits for ctrl-c (or SIGTERM on unix); process shutdown per spec §5
/// stops accepting new connections and lets in-flight requests finish
/// best-effort — the reaper task and in-memory store are simply dropped
/// with the process, there being nothing to flush by design.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, draining in-flight requests");
}
