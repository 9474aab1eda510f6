use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use wayfarer::config::AppConfig;
use wayfarer::db::{init_pool, migrate};
use wayfarer::error::AppError;
use wayfarer::routes::create_router;
use wayfarer::services::{ai::AiGateway, gemini::GeminiBackend, remote::MemoryTripCollection};
use wayfarer::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_logging();

    let config = AppConfig::from_env()?;
    let db = init_pool(&config.database_url).await?;
    migrate(&db).await?;

    let ai = match GeminiBackend::from_config(&config.ai)? {
        Some(backend) => AiGateway::new(Arc::new(backend)),
        None => {
            warn!("AI_API_KEY is not set, AI actions will fail");
            AiGateway::disabled()
        }
    };

    let remote = Arc::new(MemoryTripCollection::new());
    info!(client_id = %config.client_id, "using in-process trip collection");

    let (state, tasks) = AppState::new(config.clone(), db, remote, ai).await?;
    info!(trips = state.trips.trip_ids().len(), "trip store ready");

    let app = create_router(state);

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service()).await?;

    tasks.abort();
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,wayfarer=debug".into());

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
