//! Batch refresh runner: one full recomputation of the snapshot
//! generation for the configured database, optionally scoped to the
//! tickers given on the command line.

use derivation_engine::{refresh_metrics, DerivationContext};
use metrics_core::QuoteSource;
use metrics_store::{MetricsDb, SnapshotStore, SqliteFactStore};
use quote_client::QuoteClient;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "finsight_refresh=info,derivation_engine=info,metrics_store=info".into());

    if json_logging {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:finsight.db".to_string());
    let tickers: Vec<String> = std::env::args()
        .skip(1)
        .map(|t| t.to_ascii_uppercase())
        .collect();

    let db = MetricsDb::new(&database_url).await?;
    let facts = SqliteFactStore::new(db.clone());
    let snapshots = SnapshotStore::new(db);

    // Quotes are optional enrichment: without an API key the refresh
    // still derives everything that doesn't need a price.
    let quote_client = match std::env::var("QUOTE_API_KEY") {
        Ok(key) if !key.is_empty() => Some(QuoteClient::new(key)),
        _ => {
            tracing::warn!("QUOTE_API_KEY not set, skipping price-based metrics");
            None
        }
    };

    let ctx = DerivationContext::default();
    let scope = if tickers.is_empty() {
        None
    } else {
        Some(tickers.as_slice())
    };

    let outcome = refresh_metrics(
        &ctx,
        &facts,
        quote_client.as_ref().map(|c| c as &dyn QuoteSource),
        &snapshots,
        scope,
    )
    .await?;

    tracing::info!(
        tickers = outcome.tickers,
        snapshots = outcome.snapshots,
        "refresh run finished"
    );
    Ok(())
}
