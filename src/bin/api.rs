use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use travel_itinerary_orchestrator::{
    api::start_server, cache::spawn_purge_task, config::AppConfig, pipeline::ItineraryPipeline,
    resolver::RADIUS_SCHEDULE_KM,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;

    info!("Travel Itinerary Orchestrator - API Server");
    info!(
        port = config.port,
        strategy = config.framing_strategy.as_str(),
        "Configuration loaded"
    );

    // Create components
    let pipeline = Arc::new(ItineraryPipeline::from_config(&config)?);
    let public_config = config.public_view(&RADIUS_SCHEDULE_KM, pipeline.catalog().names());

    // Evict expired frames in the background
    let _purge = spawn_purge_task(pipeline.schedule_cache(), config.cache_purge_interval);
    info!(
        every_secs = config.cache_purge_interval.as_secs(),
        "Schedule cache purge scheduled"
    );

    info!("Pipeline initialized, starting API server");

    // Start API server
    start_server(pipeline, public_config, config.port).await?;

    Ok(())
}
