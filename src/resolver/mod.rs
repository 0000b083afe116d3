//! Place resolution
//!
//! Fills slots in order, each one searched around the previously chosen
//! venue (the city center for the first slot). A slot that cannot be filled
//! after the full radius schedule and one category relaxation becomes an
//! explicit gap.

use crate::error::ItineraryError;
use crate::models::{Coordinate, ResolvedCity, ResolvedVenue, ScheduleSlot, SlotGap};
use crate::places::{PlaceCandidate, PlaceQuery, PlaceSearch};
use crate::routing::haversine_km;
use crate::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Search radii tried in order; the last entry is the cap
pub const RADIUS_SCHEDULE_KM: [f64; 4] = [1.0, 2.0, 4.0, 5.0];

/// Calls per radius step before moving on (one retry)
const ATTEMPTS_PER_RADIUS: usize = 2;

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub venues: Vec<ResolvedVenue>,
    pub gaps: Vec<SlotGap>,
}

pub struct PlaceResolver {
    search: Arc<dyn PlaceSearch>,
    timeout: Duration,
}

/// Outcome of one slot: a venue, or why there is none
enum SlotResult {
    Found(ResolvedVenue),
    Gap(String),
}

impl PlaceResolver {
    pub fn new(search: Arc<dyn PlaceSearch>, timeout: Duration) -> Self {
        Self { search, timeout }
    }

    /// Resolve every slot against `city`. Fails only when nothing resolves.
    pub async fn resolve(&self, slots: &[ScheduleSlot], city: &ResolvedCity) -> Result<Resolution> {
        let mut resolution = Resolution::default();
        let mut used: HashSet<String> = HashSet::new();
        let mut anchor = city.center;

        for slot in slots {
            match self.resolve_slot(slot, city, anchor, &used).await {
                SlotResult::Found(venue) => {
                    debug!(
                        slot = slot.index,
                        venue = %venue.name,
                        distance_km = venue.distance_from_anchor_km,
                        radius_km = venue.search_radius_km,
                        relaxed = venue.relaxed,
                        "Slot resolved"
                    );
                    anchor = venue.coordinate;
                    used.insert(venue.venue_id.clone());
                    resolution.venues.push(venue);
                }
                SlotResult::Gap(reason) => {
                    warn!(slot = slot.index, day = slot.day, category = %slot.category, %reason, "Slot left unfilled");
                    resolution.gaps.push(SlotGap {
                        slot_index: slot.index,
                        day: slot.day,
                        category: slot.category,
                        reason,
                    });
                }
            }
        }

        info!(
            city = %city.name,
            resolved = resolution.venues.len(),
            gaps = resolution.gaps.len(),
            "Place resolution finished"
        );

        if resolution.venues.is_empty() {
            return Err(ItineraryError::ResolutionError(format!(
                "no venue in {} could be found for any of {} slots",
                city.name,
                slots.len()
            )));
        }

        Ok(resolution)
    }

    async fn resolve_slot(
        &self,
        slot: &ScheduleSlot,
        city: &ResolvedCity,
        anchor: Coordinate,
        used: &HashSet<String>,
    ) -> SlotResult {
        let categories = std::iter::once(slot.category).chain(slot.category.parent());
        let mut search_failed = false;

        for category in categories {
            for radius_km in RADIUS_SCHEDULE_KM {
                let query = PlaceQuery::new(
                    &city.name,
                    category,
                    slot.search_keyword(category),
                    anchor,
                    radius_km,
                );

                let Some(candidates) = self.search_with_retry(&query).await else {
                    search_failed = true;
                    continue;
                };

                if let Some((candidate, distance_km)) =
                    select_candidate(&candidates, &query, city, used)
                {
                    let venue_category = candidate.category.unwrap_or(category);
                    return SlotResult::Found(ResolvedVenue {
                        slot_index: slot.index,
                        day: slot.day,
                        date: slot.date,
                        start: slot.start,
                        end: slot.end,
                        slot_category: slot.category,
                        venue_id: candidate.id.clone(),
                        name: candidate.name.clone(),
                        address: candidate.address.clone(),
                        city: city.name.clone(),
                        coordinate: candidate.coordinate,
                        category: venue_category,
                        relaxed: venue_category != slot.category,
                        distance_from_anchor_km: distance_km,
                        search_radius_km: radius_km,
                    });
                }
            }
        }

        let cap = RADIUS_SCHEDULE_KM[RADIUS_SCHEDULE_KM.len() - 1];
        let tried = match slot.category.parent() {
            Some(parent) => format!("{} or {}", slot.category, parent),
            None => slot.category.to_string(),
        };
        let mut reason = format!("no unused {} venue in {} within {} km", tried, city.name, cap);
        if search_failed {
            reason.push_str(" (place search failed for some radii)");
        }
        SlotResult::Gap(reason)
    }

    /// One call plus one retry under the places timeout; `None` when both fail
    async fn search_with_retry(&self, query: &PlaceQuery) -> Option<Vec<PlaceCandidate>> {
        for attempt in 1..=ATTEMPTS_PER_RADIUS {
            match tokio::time::timeout(self.timeout, self.search.search(query)).await {
                Ok(Ok(candidates)) => return Some(candidates),
                Ok(Err(e)) => warn!(
                    attempt,
                    backend = self.search.name(),
                    radius_km = query.radius_km,
                    error = %e,
                    "Place search failed"
                ),
                Err(_) => warn!(
                    attempt,
                    backend = self.search.name(),
                    radius_km = query.radius_km,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Place search timed out"
                ),
            }
        }
        None
    }
}

/// Nearest eligible candidate, ties broken by identifier.
///
/// Eligible: inside the query radius, inside Korea, in the resolved city,
/// of the queried category, not already used.
fn select_candidate<'a>(
    candidates: &'a [PlaceCandidate],
    query: &PlaceQuery,
    city: &ResolvedCity,
    used: &HashSet<String>,
) -> Option<(&'a PlaceCandidate, f64)> {
    candidates
        .iter()
        .filter(|c| !used.contains(&c.id))
        .filter(|c| c.coordinate.in_korea())
        .filter(|c| c.city.as_deref() == Some(city.name.as_str()))
        .filter(|c| c.category.map_or(true, |cat| cat == query.category))
        .map(|c| (c, haversine_km(&query.anchor, &c.coordinate)))
        .filter(|(_, km)| km.is_finite() && *km <= query.radius_km)
        .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cities::CityCatalog;
    use crate::models::{parse_hhmm, PlaceCategory};
    use crate::places::{fixtures, StaticPlaceSearch};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn suncheon() -> ResolvedCity {
        CityCatalog::korea().resolve("순천").unwrap()
    }

    fn slot(index: usize, category: PlaceCategory) -> ScheduleSlot {
        ScheduleSlot {
            index,
            day: 1,
            date: NaiveDate::from_ymd_opt(2026, 11, 1).unwrap(),
            start: parse_hhmm("09:00").unwrap(),
            end: parse_hhmm("10:00").unwrap(),
            category,
            purpose: category.to_string(),
            keywords: Vec::new(),
        }
    }

    fn resolver(places: Vec<PlaceCandidate>) -> PlaceResolver {
        PlaceResolver::new(Arc::new(StaticPlaceSearch::new(places)), Duration::from_secs(1))
    }

    /// Fails the first `failures` calls, then behaves like the wrapped search
    struct FlakySearch {
        inner: StaticPlaceSearch,
        failures: usize,
        calls: AtomicUsize,
        radii: std::sync::Mutex<Vec<f64>>,
    }

    #[async_trait]
    impl PlaceSearch for FlakySearch {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn search(&self, query: &PlaceQuery) -> Result<Vec<PlaceCandidate>> {
            self.radii.lock().unwrap().push(query.radius_km);
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(ItineraryError::UpstreamError("503".to_string()));
            }
            self.inner.search(query).await
        }
    }

    /// Records every keyword it is asked for
    struct RecordingSearch {
        inner: StaticPlaceSearch,
        keywords: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PlaceSearch for RecordingSearch {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn search(&self, query: &PlaceQuery) -> Result<Vec<PlaceCandidate>> {
            self.keywords.lock().unwrap().push(query.keyword.clone());
            self.inner.search(query).await
        }
    }

    #[tokio::test]
    async fn test_searches_with_slot_keywords() {
        let city = suncheon();
        let search = Arc::new(RecordingSearch {
            inner: StaticPlaceSearch::new(fixtures::line(
                "순천",
                PlaceCategory::Restaurant,
                city.center,
                0.0,
                1,
            )),
            keywords: std::sync::Mutex::new(Vec::new()),
        });
        let resolver = PlaceResolver::new(search.clone(), Duration::from_secs(1));

        let mut cafe = slot(0, PlaceCategory::Cafe);
        cafe.keywords = vec!["빙수".to_string()];
        let resolution = resolver.resolve(&[cafe], &city).await.unwrap();
        assert!(resolution.venues[0].relaxed);

        let keywords = search.keywords.lock().unwrap();
        // Four radii for the slot's own keyword, then the relaxed category default
        assert_eq!(keywords.len(), RADIUS_SCHEDULE_KM.len() + 1);
        assert!(keywords[..RADIUS_SCHEDULE_KM.len()].iter().all(|k| k == "순천 빙수"));
        assert_eq!(keywords[RADIUS_SCHEDULE_KM.len()], "순천 맛집");
    }

    #[tokio::test]
    async fn test_chains_from_previous_venue() {
        let city = suncheon();
        let resolver = resolver(fixtures::suncheon());
        let slots = vec![
            slot(0, PlaceCategory::Sightseeing),
            slot(1, PlaceCategory::Restaurant),
            slot(2, PlaceCategory::Sightseeing),
        ];

        let resolution = resolver.resolve(&slots, &city).await.unwrap();

        assert!(resolution.gaps.is_empty());
        assert_eq!(resolution.venues[0].venue_id, "순천-sightseeing-0");
        assert_eq!(resolution.venues[1].venue_id, "순천-restaurant-0");
        assert_eq!(resolution.venues[2].venue_id, "순천-sightseeing-1");
    }

    #[tokio::test]
    async fn test_never_exceeds_found_radius_and_no_duplicates() {
        let city = suncheon();
        let resolver = resolver(fixtures::suncheon());
        let slots: Vec<ScheduleSlot> = (0..8).map(|i| slot(i, PlaceCategory::Sightseeing)).collect();

        let resolution = resolver.resolve(&slots, &city).await.unwrap();

        let ids: HashSet<&str> = resolution.venues.iter().map(|v| v.venue_id.as_str()).collect();
        assert_eq!(ids.len(), resolution.venues.len());
        for venue in &resolution.venues {
            assert!(venue.distance_from_anchor_km <= venue.search_radius_km);
            assert!(RADIUS_SCHEDULE_KM.contains(&venue.search_radius_km));
        }
    }

    #[tokio::test]
    async fn test_rejects_venues_from_other_cities() {
        let city = suncheon();
        let center = city.center;
        let mut places = fixtures::line("서울", PlaceCategory::Sightseeing, center, 0.0, 3);
        for p in &mut places {
            // Closer to the anchor than any 순천 venue
            p.coordinate.lat -= 0.002;
        }
        places.extend(fixtures::line("순천", PlaceCategory::Sightseeing, center, 0.001, 3));

        let resolution = resolver(places)
            .resolve(&[slot(0, PlaceCategory::Sightseeing)], &city)
            .await
            .unwrap();

        assert_eq!(resolution.venues[0].city, "순천");
        assert!(resolution.venues[0].venue_id.starts_with("순천-"));
    }

    #[tokio::test]
    async fn test_relaxes_category_once() {
        let city = suncheon();
        let places = fixtures::line("순천", PlaceCategory::Restaurant, city.center, 0.0, 2);

        let resolution = resolver(places)
            .resolve(&[slot(0, PlaceCategory::Cafe)], &city)
            .await
            .unwrap();

        let venue = &resolution.venues[0];
        assert!(venue.relaxed);
        assert_eq!(venue.category, PlaceCategory::Restaurant);
        assert_eq!(venue.slot_category, PlaceCategory::Cafe);
        assert!(venue.slot_category.accepts(venue.category));
    }

    #[tokio::test]
    async fn test_unfillable_slot_becomes_gap() {
        let city = suncheon();
        let places = fixtures::line("순천", PlaceCategory::Sightseeing, city.center, 0.0, 1);
        let slots = vec![
            slot(0, PlaceCategory::Sightseeing),
            slot(1, PlaceCategory::Sightseeing),
        ];

        let resolution = resolver(places).resolve(&slots, &city).await.unwrap();

        assert_eq!(resolution.venues.len(), 1);
        assert_eq!(resolution.gaps.len(), 1);
        assert_eq!(resolution.gaps[0].slot_index, 1);
        assert!(resolution.gaps[0].reason.contains("5 km"));
    }

    #[tokio::test]
    async fn test_nothing_resolved_is_error() {
        let result = resolver(Vec::new())
            .resolve(&[slot(0, PlaceCategory::Cafe)], &suncheon())
            .await;
        assert!(matches!(result, Err(ItineraryError::ResolutionError(_))));
    }

    #[tokio::test]
    async fn test_retries_same_radius_once() {
        let city = suncheon();
        let search = Arc::new(FlakySearch {
            inner: StaticPlaceSearch::new(fixtures::suncheon()),
            failures: 1,
            calls: AtomicUsize::new(0),
            radii: std::sync::Mutex::new(Vec::new()),
        });
        let resolver = PlaceResolver::new(search.clone(), Duration::from_secs(1));

        let resolution = resolver
            .resolve(&[slot(0, PlaceCategory::Sightseeing)], &city)
            .await
            .unwrap();

        assert_eq!(resolution.venues[0].search_radius_km, 1.0);
        assert_eq!(*search.radii.lock().unwrap(), vec![1.0, 1.0]);
    }

    #[tokio::test]
    async fn test_double_failure_moves_to_next_radius() {
        let city = suncheon();
        let search = Arc::new(FlakySearch {
            inner: StaticPlaceSearch::new(fixtures::suncheon()),
            failures: 2,
            calls: AtomicUsize::new(0),
            radii: std::sync::Mutex::new(Vec::new()),
        });
        let resolver = PlaceResolver::new(search.clone(), Duration::from_secs(1));

        let resolution = resolver
            .resolve(&[slot(0, PlaceCategory::Sightseeing)], &city)
            .await
            .unwrap();

        assert_eq!(resolution.venues[0].search_radius_km, 2.0);
        assert_eq!(*search.radii.lock().unwrap(), vec![1.0, 1.0, 2.0]);
    }
}
