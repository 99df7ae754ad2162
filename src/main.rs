//! OpenSASE Checkout - cart, checkout and order lifecycle service

use anyhow::Result;
use opensase_checkout::{
    api::{router, AppState},
    config::AppConfig,
    infrastructure::{
        events::{NatsPublisher, TracingPublisher},
        memory::{MemoryCarts, MemoryDiscounts, MemoryInventory, MemoryOrders},
        postgres::PgStore,
    },
    ports::EventPublisher,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let events: Arc<dyn EventPublisher> = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Arc::new(NatsPublisher::new(client, config.event_subject_prefix.clone())),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, logging events only");
                Arc::new(TracingPublisher)
            }
        },
        None => Arc::new(TracingPublisher),
    };

    let state = match &config.database_url {
        Some(url) => {
            let store = Arc::new(PgStore::connect(url, config.database_max_connections).await?);
            store.migrate().await?;
            AppState::new(store.clone(), store.clone(), store.clone(), store, events, config.order_numbers.clone())
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory stores");
            AppState::new(
                Arc::new(MemoryInventory::default()), Arc::new(MemoryCarts::default()), Arc::new(MemoryOrders::default()),
                Arc::new(MemoryDiscounts::default()), events, config.order_numbers.clone(),
            )
        }
    };

    let app = router(state).layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive());

    tracing::info!("🚀 OpenSASE Checkout listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}
