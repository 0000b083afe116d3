//! Itinerary pipeline
//!
//! VALIDATE → FRAME → RESOLVE → ROUTE → VERIFY → COMPLETE
//!
//! Stages run strictly in sequence for one request; the pipeline itself is
//! shared across requests behind an `Arc`.

use crate::cache::{build_schedule_cache, ScheduleCache};
use crate::cities::CityCatalog;
use crate::config::AppConfig;
use crate::error::ItineraryError;
use crate::framer::{GeminiScheduleGenerator, ScheduleFramer, ScheduleGenerator};
use crate::gemini::GeminiClient;
use crate::models::{Itinerary, ItineraryOutcome, TripRequest};
use crate::places::{GooglePlacesClient, PlaceSearch, StaticPlaceSearch};
use crate::resolver::PlaceResolver;
use crate::routing::{GoogleDirectionsClient, RouteOptimizer, RouteProvider};
use crate::verification::{create_default_verification_engine, VerificationEngine};
use crate::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Main pipeline that coordinates the entire workflow
pub struct ItineraryPipeline {
    catalog: CityCatalog,
    framer: ScheduleFramer,
    resolver: PlaceResolver,
    optimizer: RouteOptimizer,
    verification_engine: VerificationEngine,
}

impl ItineraryPipeline {
    pub fn new(
        framer: ScheduleFramer,
        resolver: PlaceResolver,
        optimizer: RouteOptimizer,
        verification_engine: VerificationEngine,
    ) -> Self {
        Self {
            catalog: CityCatalog::korea(),
            framer,
            resolver,
            optimizer,
            verification_engine,
        }
    }

    /// Wire the production capabilities described by `config`.
    ///
    /// Missing API keys disable the matching integration: no AI framing,
    /// an empty place catalog, straight-line routing.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let cache = build_schedule_cache(config);

        let ai: Option<Arc<dyn ScheduleGenerator>> = match &config.gemini_api_key {
            Some(key) => {
                let client = GeminiClient::new(key.clone(), config.ai_timeout)?;
                Some(Arc::new(GeminiScheduleGenerator::new(client)))
            }
            None => {
                warn!("GEMINI_API_KEY not set, schedule framing is rule-based only");
                None
            }
        };

        let search: Arc<dyn PlaceSearch> = match &config.google_maps_api_key {
            Some(key) => Arc::new(GooglePlacesClient::new(key.clone(), config.places_timeout)?),
            None => {
                warn!("GOOGLE_MAPS_API_KEY not set, place search has no venues");
                Arc::new(StaticPlaceSearch::default())
            }
        };

        let routes: Option<Arc<dyn RouteProvider>> = match &config.google_maps_api_key {
            Some(key) => Some(Arc::new(GoogleDirectionsClient::new(
                key.clone(),
                config.routes_timeout,
            )?)),
            None => None,
        };

        Ok(Self::new(
            ScheduleFramer::new(
                config.framing_strategy,
                ai,
                cache,
                config.cache_ttl,
                config.ai_timeout,
            ),
            PlaceResolver::new(search, config.places_timeout),
            RouteOptimizer::new(routes, config.routes_timeout),
            create_default_verification_engine(),
        ))
    }

    pub fn catalog(&self) -> &CityCatalog {
        &self.catalog
    }

    pub fn schedule_cache(&self) -> Arc<dyn ScheduleCache> {
        self.framer.cache()
    }

    /// Run the pipeline. Every failure is folded into the outcome.
    pub async fn generate(&self, request: TripRequest) -> ItineraryOutcome {
        let start_time = Instant::now();
        let mut trace = Vec::new();

        info!(
            destination = %request.destination,
            start_date = %request.start_date,
            end_date = %request.end_date,
            "Pipeline: starting itinerary generation"
        );

        trace.push(format!("INPUT: trip to '{}'", request.destination.trim()));

        let outcome = match self.run(&request, &mut trace).await {
            Ok(itinerary) if itinerary.gaps.is_empty() => {
                trace.push("COMPLETE: all slots filled".to_string());
                ItineraryOutcome::Success { itinerary, trace }
            }
            Ok(itinerary) => {
                trace.push(format!("COMPLETE: {} slot(s) left unfilled", itinerary.gaps.len()));
                let gaps = itinerary.gaps.clone();
                ItineraryOutcome::Partial {
                    itinerary,
                    gaps,
                    trace,
                }
            }
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Pipeline failed");
                trace.push(format!("FAIL: {}", e));
                ItineraryOutcome::failure(&e, trace)
            }
        };

        info!(
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Pipeline: finished"
        );

        outcome
    }

    async fn run(&self, request: &TripRequest, trace: &mut Vec<String>) -> Result<Itinerary> {
        // === VALIDATE ===
        let trip = request.accept(&self.catalog)?;
        trace.push(format!(
            "VALIDATE: {} ({}), {} day(s), {}-{}",
            trip.city.name,
            trip.city.english_name,
            trip.days_count(),
            trip.request.start_time.format("%H:%M"),
            trip.request.end_time.format("%H:%M")
        ));

        // === FRAME ===
        let framed = self.framer.frame(&trip).await?;
        trace.push(format!(
            "FRAME: {} slots from {:?}",
            framed.slots.len(),
            framed.source
        ));
        debug!(fingerprint = %framed.fingerprint, "Frame ready");

        // === RESOLVE ===
        let resolution = self.resolver.resolve(&framed.slots, &trip.city).await?;
        let relaxed = resolution.venues.iter().filter(|v| v.relaxed).count();
        trace.push(format!(
            "RESOLVE: {}/{} slots filled, {} relaxed",
            resolution.venues.len(),
            framed.slots.len(),
            relaxed
        ));
        for gap in &resolution.gaps {
            trace.push(format!(
                "GAP: slot {} (day {}, {}): {}",
                gap.slot_index, gap.day, gap.category, gap.reason
            ));
        }

        // === ROUTE ===
        let itinerary = self.optimizer.optimize(&trip, resolution, framed.source).await;
        trace.push(format!(
            "ROUTE: {} segments via {:?}",
            itinerary.segments.len(),
            itinerary.routing_source
        ));

        // === VERIFY ===
        let report = self.verification_engine.verify(&itinerary);
        trace.push(format!(
            "VERIFY: {} / {} rules passed",
            report.checks.iter().filter(|c| c.passed).count(),
            report.checks.len()
        ));

        if !report.verified {
            return Err(ItineraryError::VerificationError(report.issues.join("; ")));
        }

        Ok(itinerary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryScheduleCache;
    use crate::models::{
        parse_hhmm, AcceptedTrip, Coordinate, FrameSource, FramingStrategy, ModeSource,
        PlaceCategory, RoutingSource, ScheduleSlot,
    };
    use crate::places::{fixtures, PlaceCandidate};
    use crate::routing::{transport_mode_for_distance, RouteLeg};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashSet;
    use std::time::Duration;

    struct FailingGenerator;

    #[async_trait]
    impl ScheduleGenerator for FailingGenerator {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn generate(&self, _trip: &AcceptedTrip) -> Result<Vec<ScheduleSlot>> {
            Err(ItineraryError::MalformedUpstreamResponse("not json".to_string()))
        }
    }

    struct FailingRoutes;

    #[async_trait]
    impl RouteProvider for FailingRoutes {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn route(&self, _stops: &[Coordinate]) -> Result<Vec<RouteLeg>> {
            Err(ItineraryError::UpstreamTimeout("directions".to_string()))
        }
    }

    fn pipeline(
        places: Vec<PlaceCandidate>,
        ai: Option<Arc<dyn ScheduleGenerator>>,
        routes: Option<Arc<dyn RouteProvider>>,
    ) -> ItineraryPipeline {
        let strategy = if ai.is_some() {
            FramingStrategy::Ai
        } else {
            FramingStrategy::RuleBased
        };
        ItineraryPipeline::new(
            ScheduleFramer::new(
                strategy,
                ai,
                Arc::new(InMemoryScheduleCache::new()),
                Duration::from_secs(3600),
                Duration::from_secs(1),
            ),
            PlaceResolver::new(Arc::new(StaticPlaceSearch::new(places)), Duration::from_secs(1)),
            RouteOptimizer::new(routes, Duration::from_secs(1)),
            create_default_verification_engine(),
        )
    }

    fn request(destination: &str, days: i64) -> TripRequest {
        let start_date = NaiveDate::from_ymd_opt(2026, 11, 1).unwrap();
        TripRequest {
            destination: destination.to_string(),
            start_date,
            end_date: start_date + chrono::Duration::days(days - 1),
            start_time: parse_hhmm("09:00").unwrap(),
            end_time: parse_hhmm("18:00").unwrap(),
            strategy: None,
            travel_style: None,
        }
    }

    /// 순천 venues plus nearer 서울-addressed and city-less venues
    fn leaky_places() -> Vec<PlaceCandidate> {
        let center = Coordinate::new(34.9507, 127.4872);
        let mut leaks = Vec::new();
        for category in [PlaceCategory::Sightseeing, PlaceCategory::Restaurant, PlaceCategory::Cafe] {
            leaks.extend(fixtures::line("서울", category, center, 0.0003, 8));
        }
        for (k, place) in leaks.iter_mut().enumerate() {
            place.coordinate.lat -= 0.0015;
            if k % 3 == 0 {
                place.city = None;
                place.id = format!("unknown-{}", k);
            }
        }

        let mut places = fixtures::suncheon();
        places.extend(leaks);
        places
    }

    #[tokio::test]
    async fn test_suncheon_three_days_stays_in_suncheon() {
        let outcome = pipeline(leaky_places(), None, None)
            .generate(request("순천", 3))
            .await;

        let itinerary = match &outcome {
            ItineraryOutcome::Success { itinerary, .. } => itinerary,
            other => panic!("expected success, got {:?}", other),
        };

        assert_eq!(itinerary.city.name, "순천");
        assert_eq!(itinerary.venues.len(), 15);
        assert!(itinerary.venues.iter().all(|v| v.city == "순천"));
        assert!(itinerary.venues.iter().all(|v| v.venue_id.starts_with("순천-")));

        let ids: HashSet<&str> = itinerary.venues.iter().map(|v| v.venue_id.as_str()).collect();
        assert_eq!(ids.len(), itinerary.venues.len());
    }

    #[tokio::test]
    async fn test_ai_failure_yields_complete_fallback_itinerary() {
        let outcome = pipeline(fixtures::suncheon(), Some(Arc::new(FailingGenerator)), None)
            .generate(request("Suncheon", 3))
            .await;

        let itinerary = match &outcome {
            ItineraryOutcome::Success { itinerary, .. } => itinerary,
            other => panic!("expected success, got {:?}", other),
        };
        assert_eq!(itinerary.framing_source, FrameSource::Fallback);
        assert!(itinerary.gaps.is_empty());
        assert_eq!(itinerary.venues[0].slot_category, PlaceCategory::Sightseeing);
        assert_eq!(itinerary.venues[2].slot_category, PlaceCategory::Cafe);
    }

    #[tokio::test]
    async fn test_mapping_failure_uses_haversine_segments() {
        let outcome = pipeline(fixtures::suncheon(), None, Some(Arc::new(FailingRoutes)))
            .generate(request("순천", 2))
            .await;

        let itinerary = outcome.itinerary().unwrap();
        assert_eq!(itinerary.routing_source, RoutingSource::Haversine);
        // 5 venues per day, no overnight segment
        assert_eq!(itinerary.segments.len(), 8);
        for segment in &itinerary.segments {
            assert_eq!(segment.mode_source, ModeSource::DistanceRule);
            assert_eq!(segment.mode, transport_mode_for_distance(segment.distance_km));
        }
    }

    #[tokio::test]
    async fn test_invalid_request_is_failure_with_trace() {
        let outcome = pipeline(fixtures::suncheon(), None, None)
            .generate(request("Atlantis", 2))
            .await;

        match outcome {
            ItineraryOutcome::Failure { kind, message, trace } => {
                assert_eq!(kind, "invalid_trip_request");
                assert!(message.contains("Atlantis"));
                assert!(trace.last().unwrap().starts_with("FAIL"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_venues_is_resolution_failure() {
        let outcome = pipeline(Vec::new(), None, None)
            .generate(request("순천", 1))
            .await;

        assert!(matches!(
            outcome,
            ItineraryOutcome::Failure { ref kind, .. } if kind == "resolution_error"
        ));
    }

    #[tokio::test]
    async fn test_gaps_make_partial_outcome() {
        let center = Coordinate::new(34.9507, 127.4872);
        let places = fixtures::line("순천", PlaceCategory::Sightseeing, center, 0.0, 2);

        let outcome = pipeline(places, None, None).generate(request("순천", 1)).await;

        match outcome {
            ItineraryOutcome::Partial { itinerary, gaps, trace } => {
                assert_eq!(itinerary.venues.len(), 2);
                assert_eq!(gaps.len(), 3);
                assert!(trace.iter().any(|t| t.starts_with("GAP: slot 1")));
            }
            other => panic!("expected partial, got {:?}", other),
        }
    }
}
