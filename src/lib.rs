//! Travel Itinerary Orchestrator
//!
//! Builds day-by-day Korean travel itineraries from a destination, a date
//! range and a daily time window:
//! - frames the days into category-tagged time slots (AI, rule-based fallback)
//! - caches frames under a request fingerprint
//! - fills each slot with a real venue near the previous one
//! - annotates travel between venues with distance, duration and mode
//! - verifies the result before returning it
//!
//! PIPELINE:
//! VALIDATE → FRAME → RESOLVE → ROUTE → VERIFY → COMPLETE

pub mod api;
pub mod cache;
pub mod cities;
pub mod config;
pub mod error;
pub mod framer;
pub mod gemini;
pub mod models;
pub mod pipeline;
pub mod places;
pub mod resolver;
pub mod routing;
pub mod verification;

#[cfg(test)]
mod testing;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use pipeline::ItineraryPipeline;
