use anyhow::Context;
use daybook::engine::ConfirmationHandshake;
use daybook::{api, config::Config, db::init_db, Ledger, Repository, SqliteRateProvider, TimeMs};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("Configuration error")?;
    let clock = config.business_clock().context("Configuration error")?;

    let pool = init_db(&config.database_path)
        .await
        .with_context(|| format!("Failed to initialize database at {}", config.database_path))?;

    let repo = Arc::new(Repository::new(pool));
    let rates = Arc::new(SqliteRateProvider::new(repo.clone()));
    let handshake = Arc::new(ConfirmationHandshake::new(config.confirmation_timeout));
    let ledger = Ledger::new(repo, rates.clone(), clock, config.ledger_settings())
        .with_handshake(handshake.clone());

    // Prune bulk-delete requests nobody confirmed.
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(handshake.timeout());
        loop {
            ticker.tick().await;
            let evicted = handshake.evict_expired(TimeMs::now());
            if evicted > 0 {
                tracing::debug!(evicted, "Evicted expired bulk delete requests");
            }
        }
    });

    let app = api::create_router(api::AppState::new(Arc::new(ledger), rates));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!(
        %addr,
        utc_offset_minutes = config.business_utc_offset_minutes,
        day_boundary_hour = config.day_boundary_hour,
        "Server listening"
    );

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
