//! One-shot itinerary generation from the command line.
//!
//! Usage: orchestrator <destination> <start-date> <end-date> [HH:MM] [HH:MM] [--rules] [--style=<text>]

use chrono::NaiveDate;
use tracing::info;
use tracing_subscriber::EnvFilter;
use travel_itinerary_orchestrator::{
    config::AppConfig,
    models::{parse_hhmm, FramingStrategy, ItineraryOutcome, TripRequest},
    pipeline::ItineraryPipeline,
};

fn usage() -> String {
    "usage: orchestrator <destination> <start-date YYYY-MM-DD> <end-date YYYY-MM-DD> [start HH:MM] [end HH:MM] [--rules] [--style=<text>]"
        .to_string()
}

fn parse_args(args: &[String]) -> Result<TripRequest, String> {
    let rules = args.iter().any(|a| a == "--rules");
    let travel_style = args
        .iter()
        .find_map(|a| a.strip_prefix("--style="))
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.trim().to_string());
    let positional: Vec<&String> = args.iter().filter(|a| !a.starts_with("--")).collect();

    let (Some(destination), Some(start), Some(end)) =
        (positional.first(), positional.get(1), positional.get(2))
    else {
        return Err(usage());
    };

    let date = |raw: &str| {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| format!("invalid date '{}'", raw))
    };
    let time = |raw: Option<&&String>, default: &str| {
        let raw = raw.map(|s| s.as_str()).unwrap_or(default);
        parse_hhmm(raw).ok_or_else(|| format!("invalid time '{}'", raw))
    };

    Ok(TripRequest {
        destination: destination.to_string(),
        start_date: date(start.as_str())?,
        end_date: date(end.as_str())?,
        start_time: time(positional.get(3), "09:00")?,
        end_time: time(positional.get(4), "18:00")?,
        strategy: rules.then_some(FramingStrategy::RuleBased),
        travel_style,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let request = parse_args(&args)?;

    let config = AppConfig::from_env()?;
    let pipeline = ItineraryPipeline::from_config(&config)?;

    info!(destination = %request.destination, "Running pipeline");
    let outcome = pipeline.generate(request).await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    eprintln!("\nTrace:");
    for (i, step) in outcome.trace().iter().enumerate() {
        eprintln!("  {}: {}", i + 1, step);
    }

    if let ItineraryOutcome::Failure { message, .. } = &outcome {
        return Err(message.clone().into());
    }

    Ok(())
}
