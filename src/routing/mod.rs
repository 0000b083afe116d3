//! Route optimization
//!
//! Venues keep their slot order (slots are time-bound); this stage only
//! annotates consecutive same-day venues with distance, duration and a
//! transport mode. Each day asks the mapping provider once and falls back
//! to great-circle estimates when the provider fails or answers nonsense.

use crate::error::ItineraryError;
use crate::models::{
    AcceptedTrip, Coordinate, FrameSource, Itinerary, ModeSource, ResolvedVenue, RouteSegment,
    RoutingSource, TransportMode,
};
use crate::resolver::Resolution;
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod google;
pub use google::GoogleDirectionsClient;

pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const WALKING_MAX_KM: f64 = 0.5;
pub const TRANSIT_MAX_KM: f64 = 5.0;

/// Great-circle distance in kilometres
pub fn haversine_km(a: &Coordinate, b: &Coordinate) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

pub fn transport_mode_for_distance(distance_km: f64) -> TransportMode {
    if distance_km <= WALKING_MAX_KM {
        TransportMode::Walking
    } else if distance_km <= TRANSIT_MAX_KM {
        TransportMode::Transit
    } else {
        TransportMode::Driving
    }
}

/// One leg between consecutive stops as reported by a mapping provider.
/// `mode` is `None` when the provider leaves the choice to distance rules.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteLeg {
    pub distance_km: f64,
    pub duration_minutes: u32,
    pub mode: Option<TransportMode>,
}

/// Trait for mapping/directions lookups
#[async_trait]
pub trait RouteProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Legs for visiting `stops` in the given order
    async fn route(&self, stops: &[Coordinate]) -> Result<Vec<RouteLeg>>;
}

pub struct RouteOptimizer {
    provider: Option<Arc<dyn RouteProvider>>,
    timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DaySource {
    Mapping,
    Haversine,
}

impl RouteOptimizer {
    pub fn new(provider: Option<Arc<dyn RouteProvider>>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Assemble the final itinerary from resolved venues.
    pub async fn optimize(
        &self,
        trip: &AcceptedTrip,
        resolution: Resolution,
        framing_source: FrameSource,
    ) -> Itinerary {
        let Resolution { venues, gaps } = resolution;
        let mut segments = Vec::new();
        let mut day_sources = Vec::new();

        for (first, last) in day_ranges(&venues) {
            if last - first < 1 {
                continue;
            }
            let day_venues = &venues[first..=last];
            let (day_segments, source) = self.route_day(first, day_venues).await;
            segments.extend(day_segments);
            day_sources.push(source);
        }

        let routing_source = if day_sources.is_empty() {
            RoutingSource::NotRequired
        } else if day_sources.iter().all(|s| *s == DaySource::Mapping) {
            RoutingSource::Mapping
        } else if day_sources.iter().all(|s| *s == DaySource::Haversine) {
            RoutingSource::Haversine
        } else {
            RoutingSource::Mixed
        };

        info!(
            venues = venues.len(),
            segments = segments.len(),
            routing_source = ?routing_source,
            "Itinerary routed"
        );

        Itinerary {
            itinerary_id: Uuid::new_v4(),
            city: trip.city.clone(),
            start_date: trip.request.start_date,
            end_date: trip.request.end_date,
            venues,
            segments,
            gaps,
            framing_source,
            routing_source,
            created_at: Utc::now(),
        }
    }

    async fn route_day(&self, offset: usize, venues: &[ResolvedVenue]) -> (Vec<RouteSegment>, DaySource) {
        let day = venues[0].day;

        if let Some(provider) = &self.provider {
            match self.fetch_legs(provider.as_ref(), venues).await {
                Ok(legs) => {
                    debug!(day, provider = provider.name(), "Day routed by mapping provider");
                    let segments = legs
                        .into_iter()
                        .enumerate()
                        .map(|(i, leg)| mapped_segment(offset + i, day, leg))
                        .collect();
                    return (segments, DaySource::Mapping);
                }
                Err(e) => warn!(
                    day,
                    provider = provider.name(),
                    error = %e,
                    "Routing failed, using straight-line estimates"
                ),
            }
        }

        let segments = venues
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                estimated_segment(offset + i, day, haversine_km(&pair[0].coordinate, &pair[1].coordinate))
            })
            .collect();
        (segments, DaySource::Haversine)
    }

    async fn fetch_legs(&self, provider: &dyn RouteProvider, venues: &[ResolvedVenue]) -> Result<Vec<RouteLeg>> {
        let stops: Vec<Coordinate> = venues.iter().map(|v| v.coordinate).collect();

        let legs = tokio::time::timeout(self.timeout, provider.route(&stops))
            .await
            .map_err(|_| {
                ItineraryError::UpstreamTimeout(format!(
                    "{} exceeded {} ms",
                    provider.name(),
                    self.timeout.as_millis()
                ))
            })??;

        if legs.len() != stops.len() - 1 {
            return Err(ItineraryError::MalformedUpstreamResponse(format!(
                "expected {} legs, got {}",
                stops.len() - 1,
                legs.len()
            )));
        }
        if let Some(bad) = legs
            .iter()
            .find(|l| !l.distance_km.is_finite() || l.distance_km < 0.0)
        {
            return Err(ItineraryError::MalformedUpstreamResponse(format!(
                "invalid leg distance {}",
                bad.distance_km
            )));
        }

        Ok(legs)
    }
}

/// Inclusive index ranges of venues sharing a day
fn day_ranges(venues: &[ResolvedVenue]) -> Vec<(usize, usize)> {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for (i, venue) in venues.iter().enumerate() {
        match ranges.last_mut() {
            Some((_, last)) if venues[*last].day == venue.day => *last = i,
            _ => ranges.push((i, i)),
        }
    }
    ranges
}

fn mapped_segment(from_index: usize, day: u32, leg: RouteLeg) -> RouteSegment {
    match leg.mode {
        Some(mode) => RouteSegment {
            from_index,
            to_index: from_index + 1,
            day,
            distance_km: leg.distance_km,
            duration_minutes: leg.duration_minutes,
            mode,
            mode_source: ModeSource::Mapping,
        },
        None => estimated_segment(from_index, day, leg.distance_km),
    }
}

fn estimated_segment(from_index: usize, day: u32, distance_km: f64) -> RouteSegment {
    let mode = transport_mode_for_distance(distance_km);
    RouteSegment {
        from_index,
        to_index: from_index + 1,
        day,
        distance_km,
        duration_minutes: mode.estimate_minutes(distance_km),
        mode,
        mode_source: ModeSource::DistanceRule,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cities::CityCatalog;
    use crate::models::{parse_hhmm, PlaceCategory, TripRequest};
    use chrono::NaiveDate;
    use std::f64::consts::PI;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn trip() -> AcceptedTrip {
        TripRequest {
            destination: "순천".to_string(),
            start_date: NaiveDate::from_ymd_opt(2026, 11, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
            start_time: parse_hhmm("09:00").unwrap(),
            end_time: parse_hhmm("18:00").unwrap(),
            strategy: None,
            travel_style: None,
        }
        .accept(&CityCatalog::korea())
        .unwrap()
    }

    fn venue(slot_index: usize, day: u32, lat: f64, lng: f64) -> ResolvedVenue {
        ResolvedVenue {
            slot_index,
            day,
            date: NaiveDate::from_ymd_opt(2026, 11, day).unwrap(),
            start: parse_hhmm("09:00").unwrap(),
            end: parse_hhmm("10:00").unwrap(),
            slot_category: PlaceCategory::Sightseeing,
            venue_id: format!("v{}", slot_index),
            name: format!("venue {}", slot_index),
            address: "순천시".to_string(),
            city: "순천".to_string(),
            coordinate: Coordinate::new(lat, lng),
            category: PlaceCategory::Sightseeing,
            relaxed: false,
            distance_from_anchor_km: 0.0,
            search_radius_km: 1.0,
        }
    }

    /// Three venues on day 1 (0.3 km then ~3.3 km apart), two on day 2 (~11 km apart)
    fn resolution() -> Resolution {
        Resolution {
            venues: vec![
                venue(0, 1, 34.9500, 127.4800),
                venue(1, 1, 34.9527, 127.4800),
                venue(2, 1, 34.9827, 127.4800),
                venue(3, 2, 34.9500, 127.4800),
                venue(4, 2, 35.0500, 127.4800),
            ],
            gaps: vec![],
        }
    }

    struct FailingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RouteProvider for FailingProvider {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn route(&self, _stops: &[Coordinate]) -> Result<Vec<RouteLeg>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ItineraryError::UpstreamError("directions unavailable".to_string()))
        }
    }

    struct FixedProvider;

    #[async_trait]
    impl RouteProvider for FixedProvider {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn route(&self, stops: &[Coordinate]) -> Result<Vec<RouteLeg>> {
            Ok(stops
                .windows(2)
                .map(|_| RouteLeg {
                    distance_km: 7.0,
                    duration_minutes: 17,
                    mode: Some(TransportMode::Driving),
                })
                .collect())
        }
    }

    /// Routes two-stop days, fails longer ones
    struct PairOnlyProvider;

    #[async_trait]
    impl RouteProvider for PairOnlyProvider {
        fn name(&self) -> &'static str {
            "pair_only"
        }

        async fn route(&self, stops: &[Coordinate]) -> Result<Vec<RouteLeg>> {
            if stops.len() > 2 {
                return Err(ItineraryError::UpstreamError("too many waypoints".to_string()));
            }
            Ok(vec![RouteLeg {
                distance_km: 12.5,
                duration_minutes: 20,
                mode: Some(TransportMode::Driving),
            }])
        }
    }

    /// Always answers with one leg too few
    struct ShortProvider;

    #[async_trait]
    impl RouteProvider for ShortProvider {
        fn name(&self) -> &'static str {
            "short"
        }

        async fn route(&self, stops: &[Coordinate]) -> Result<Vec<RouteLeg>> {
            Ok(stops
                .windows(2)
                .skip(1)
                .map(|_| RouteLeg {
                    distance_km: 1.0,
                    duration_minutes: 3,
                    mode: None,
                })
                .collect())
        }
    }

    #[test]
    fn test_haversine_identity_and_antipode() {
        let p = Coordinate::new(34.95, 127.48);
        assert_eq!(haversine_km(&p, &p), 0.0);

        let d = haversine_km(&Coordinate::new(0.0, 0.0), &Coordinate::new(0.0, 180.0));
        assert!((d - PI * EARTH_RADIUS_KM).abs() < 1e-6);
    }

    #[test]
    fn test_mode_thresholds() {
        assert_eq!(transport_mode_for_distance(0.4), TransportMode::Walking);
        assert_eq!(transport_mode_for_distance(0.5), TransportMode::Walking);
        assert_eq!(transport_mode_for_distance(3.0), TransportMode::Transit);
        assert_eq!(transport_mode_for_distance(8.0), TransportMode::Driving);
    }

    #[tokio::test]
    async fn test_mapping_failure_falls_back_per_day() {
        let provider = Arc::new(FailingProvider {
            calls: AtomicUsize::new(0),
        });
        let optimizer = RouteOptimizer::new(Some(provider.clone()), Duration::from_secs(1));
        let itinerary = optimizer
            .optimize(&trip(), resolution(), FrameSource::RuleBased)
            .await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(itinerary.routing_source, RoutingSource::Haversine);
        assert_eq!(itinerary.segments.len(), 3);

        for segment in &itinerary.segments {
            assert_eq!(segment.mode, transport_mode_for_distance(segment.distance_km));
            assert_eq!(segment.mode_source, ModeSource::DistanceRule);
            assert_eq!(segment.to_index, segment.from_index + 1);
        }
        assert_eq!(itinerary.segments[0].mode, TransportMode::Walking);
        assert_eq!(itinerary.segments[1].mode, TransportMode::Transit);
        assert_eq!(itinerary.segments[2].mode, TransportMode::Driving);
    }

    #[tokio::test]
    async fn test_no_segment_across_days() {
        let optimizer = RouteOptimizer::new(None, Duration::from_secs(1));
        let itinerary = optimizer
            .optimize(&trip(), resolution(), FrameSource::RuleBased)
            .await;

        assert!(itinerary.segments.iter().all(|s| s.from_index != 2));
        assert_eq!(itinerary.segments[2].day, 2);
    }

    #[tokio::test]
    async fn test_mapping_success() {
        let optimizer = RouteOptimizer::new(Some(Arc::new(FixedProvider)), Duration::from_secs(1));
        let itinerary = optimizer
            .optimize(&trip(), resolution(), FrameSource::Ai)
            .await;

        assert_eq!(itinerary.routing_source, RoutingSource::Mapping);
        assert!(itinerary
            .segments
            .iter()
            .all(|s| s.mode_source == ModeSource::Mapping && s.duration_minutes == 17));
    }

    #[tokio::test]
    async fn test_partial_mapping_is_mixed() {
        let optimizer = RouteOptimizer::new(Some(Arc::new(PairOnlyProvider)), Duration::from_secs(1));
        let itinerary = optimizer
            .optimize(&trip(), resolution(), FrameSource::Ai)
            .await;

        assert_eq!(itinerary.routing_source, RoutingSource::Mixed);
        // Day 1 falls back to distance rules, day 2 keeps the provider's leg
        assert!(itinerary.segments[..2]
            .iter()
            .all(|s| s.day == 1 && s.mode_source == ModeSource::DistanceRule));
        assert_eq!(itinerary.segments[2].mode_source, ModeSource::Mapping);
        assert_eq!(itinerary.segments[2].distance_km, 12.5);
        assert_eq!(itinerary.segments[2].duration_minutes, 20);
    }

    #[tokio::test]
    async fn test_wrong_leg_count_is_rejected() {
        let optimizer = RouteOptimizer::new(Some(Arc::new(ShortProvider)), Duration::from_secs(1));
        let itinerary = optimizer
            .optimize(&trip(), resolution(), FrameSource::Ai)
            .await;

        // Day 2 has a single leg so skip(1) leaves none; day 1 loses one of two
        assert_eq!(itinerary.routing_source, RoutingSource::Haversine);
    }

    #[tokio::test]
    async fn test_single_venue_days_need_no_routing() {
        let optimizer = RouteOptimizer::new(None, Duration::from_secs(1));
        let resolution = Resolution {
            venues: vec![venue(0, 1, 34.95, 127.48), venue(1, 2, 34.96, 127.48)],
            gaps: vec![],
        };
        let itinerary = optimizer
            .optimize(&trip(), resolution, FrameSource::Cache)
            .await;

        assert!(itinerary.segments.is_empty());
        assert_eq!(itinerary.routing_source, RoutingSource::NotRequired);
    }

    #[test]
    fn test_override_mode_recomputes_one_segment() {
        let mut itinerary = tokio_test::block_on(
            RouteOptimizer::new(None, Duration::from_secs(1)).optimize(
                &trip(),
                resolution(),
                FrameSource::RuleBased,
            ),
        );
        let untouched = itinerary.segments[0].clone();

        itinerary.override_mode(1, TransportMode::Driving).unwrap();
        let changed = &itinerary.segments[1];
        assert_eq!(changed.mode, TransportMode::Driving);
        assert_eq!(changed.mode_source, ModeSource::UserSelected);
        assert_eq!(
            changed.duration_minutes,
            TransportMode::Driving.estimate_minutes(changed.distance_km)
        );
        assert_eq!(itinerary.segments[0], untouched);

        assert!(matches!(
            itinerary.override_mode(9, TransportMode::Walking),
            Err(ItineraryError::InvalidSegment(_))
        ));
    }
}
