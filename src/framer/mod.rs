//! Schedule framing
//!
//! Produces the category/time-window skeleton of an itinerary before any
//! venue is chosen. The AI generator is tried first when the strategy asks
//! for it; any failure lands on the rule-based generator. Every result is
//! cached under the trip fingerprint.

use crate::cache::{compute_fingerprint, ScheduleCache};
use crate::error::ItineraryError;
use crate::models::{AcceptedTrip, FrameSource, FramingStrategy, PlaceCategory, ScheduleSlot};
use crate::Result;
use async_trait::async_trait;
use chrono::{NaiveTime, Timelike};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod gemini;
pub mod rules;
pub use gemini::GeminiScheduleGenerator;
pub use rules::RuleBasedScheduleGenerator;

/// Trait for schedule frame generation
#[async_trait]
pub trait ScheduleGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, trip: &AcceptedTrip) -> Result<Vec<ScheduleSlot>>;
}

/// Framer output plus where it came from
#[derive(Debug, Clone)]
pub struct FramedSchedule {
    pub slots: Vec<ScheduleSlot>,
    pub source: FrameSource,
    pub fingerprint: String,
}

pub struct ScheduleFramer {
    default_strategy: FramingStrategy,
    ai: Option<Arc<dyn ScheduleGenerator>>,
    rules: RuleBasedScheduleGenerator,
    cache: Arc<dyn ScheduleCache>,
    cache_ttl: Duration,
    ai_timeout: Duration,
}

impl ScheduleFramer {
    pub fn new(
        default_strategy: FramingStrategy,
        ai: Option<Arc<dyn ScheduleGenerator>>,
        cache: Arc<dyn ScheduleCache>,
        cache_ttl: Duration,
        ai_timeout: Duration,
    ) -> Self {
        Self {
            default_strategy,
            ai,
            rules: RuleBasedScheduleGenerator,
            cache,
            cache_ttl,
            ai_timeout,
        }
    }

    /// Backend the framer reads and writes, shared for maintenance tasks
    pub fn cache(&self) -> Arc<dyn ScheduleCache> {
        self.cache.clone()
    }

    /// Frame a trip, consulting the cache first.
    pub async fn frame(&self, trip: &AcceptedTrip) -> Result<FramedSchedule> {
        let strategy = trip.request.strategy.unwrap_or(self.default_strategy);
        let fingerprint = compute_fingerprint(trip, strategy);

        match self.cache.get(&fingerprint).await {
            Ok(Some(slots)) if validate_frame(&slots, trip).is_ok() => {
                info!(city = %trip.city.name, %fingerprint, "Schedule frame cache hit");
                return Ok(FramedSchedule {
                    slots,
                    source: FrameSource::Cache,
                    fingerprint,
                });
            }
            Ok(Some(_)) => warn!(%fingerprint, "Cached schedule frame failed validation, recomputing"),
            Ok(None) => debug!(%fingerprint, "Schedule frame cache miss"),
            Err(e) => warn!(%fingerprint, error = %e, "Schedule cache read failed, treating as miss"),
        }

        let (slots, source) = match (strategy, &self.ai) {
            (FramingStrategy::Ai, Some(ai)) => match self.generate_with_ai(ai.as_ref(), trip).await {
                Ok(slots) => (slots, FrameSource::Ai),
                Err(e) => {
                    warn!(
                        generator = ai.name(),
                        error = %e,
                        upstream = e.triggers_fallback(),
                        "AI framing failed, using rule-based frame"
                    );
                    (self.rules.build(trip), FrameSource::Fallback)
                }
            },
            (FramingStrategy::Ai, None) => {
                warn!("AI framing requested but no AI generator configured, using rule-based frame");
                (self.rules.build(trip), FrameSource::Fallback)
            }
            (FramingStrategy::RuleBased, _) => (self.rules.build(trip), FrameSource::RuleBased),
        };

        if let Err(e) = self.cache.put(&fingerprint, &slots, self.cache_ttl).await {
            warn!(%fingerprint, error = %e, "Failed to store schedule frame");
        }

        info!(
            city = %trip.city.name,
            days = trip.days_count(),
            slot_count = slots.len(),
            source = ?source,
            "Schedule frame ready"
        );

        Ok(FramedSchedule {
            slots,
            source,
            fingerprint,
        })
    }

    async fn generate_with_ai(
        &self,
        ai: &dyn ScheduleGenerator,
        trip: &AcceptedTrip,
    ) -> Result<Vec<ScheduleSlot>> {
        let slots = tokio::time::timeout(self.ai_timeout, ai.generate(trip))
            .await
            .map_err(|_| {
                ItineraryError::UpstreamTimeout(format!(
                    "{} exceeded {} ms",
                    ai.name(),
                    self.ai_timeout.as_millis()
                ))
            })??;

        validate_frame(&slots, trip)?;
        validate_meal_times(&slots)?;
        Ok(slots)
    }
}

/// Structural checks every frame must pass before it is used or cached.
///
/// - non-empty, indices sequential
/// - each slot on a trip day, inside the daily window, start < end
/// - per day: ordered, non-overlapping, no two adjacent slots of one category
/// - every day covered for at least half its active window
pub fn validate_frame(slots: &[ScheduleSlot], trip: &AcceptedTrip) -> Result<()> {
    let malformed = |msg: String| Err(ItineraryError::MalformedUpstreamResponse(msg));

    if slots.is_empty() {
        return malformed("schedule frame is empty".to_string());
    }

    let window_start = trip.request.start_time;
    let window_end = trip.request.end_time;
    let mut covered = vec![0i64; trip.days_count()];

    for (position, slot) in slots.iter().enumerate() {
        if slot.index != position {
            return malformed(format!("slot {} has index {}", position, slot.index));
        }

        let day = slot.day as usize;
        if day == 0 || day > trip.days_count() {
            return malformed(format!("slot {} is on day {} of a {}-day trip", position, slot.day, trip.days_count()));
        }
        if slot.date != trip.dates[day - 1] {
            return malformed(format!("slot {} date {} does not match day {}", position, slot.date, slot.day));
        }
        if slot.start >= slot.end {
            return malformed(format!("slot {} has an empty time window", position));
        }
        if slot.start < window_start || slot.end > window_end {
            return malformed(format!(
                "slot {} ({}-{}) is outside the daily window",
                position,
                slot.start.format("%H:%M"),
                slot.end.format("%H:%M")
            ));
        }

        if let Some(prev) = position.checked_sub(1).map(|p| &slots[p]) {
            if slot.day < prev.day {
                return malformed(format!("slot {} goes back to day {}", position, slot.day));
            }
            if slot.day == prev.day {
                if slot.start < prev.end {
                    return malformed(format!("slot {} overlaps the previous slot", position));
                }
                if slot.category == prev.category {
                    return malformed(format!(
                        "slots {} and {} are both {}",
                        position - 1,
                        position,
                        slot.category
                    ));
                }
            }
        }

        covered[day - 1] += slot.duration_minutes();
    }

    let window = trip.window_minutes();
    for (offset, minutes) in covered.iter().enumerate() {
        if *minutes * 2 < window {
            return malformed(format!(
                "day {} covers {} of {} active minutes",
                offset + 1,
                minutes,
                window
            ));
        }
    }

    Ok(())
}

/// Meal window a restaurant slot starting at `start` belongs to.
///
/// Breakfast 07-11, lunch 11-15, dinner 17-22 (start hour, end exclusive).
fn meal_window(start: NaiveTime) -> Option<&'static str> {
    match start.hour() {
        7..=10 => Some("breakfast"),
        11..=14 => Some("lunch"),
        17..=21 => Some("dinner"),
        _ => None,
    }
}

/// Meal placement rules for AI frames: every restaurant slot starts inside
/// a meal window, and each window holds at most one meal per day.
///
/// Not applied to rule-based frames, whose meal slots follow the user's
/// window rather than the clock.
pub fn validate_meal_times(slots: &[ScheduleSlot]) -> Result<()> {
    let mut taken: HashSet<(u32, &'static str)> = HashSet::new();

    for slot in slots.iter().filter(|s| s.category == PlaceCategory::Restaurant) {
        let Some(window) = meal_window(slot.start) else {
            return Err(ItineraryError::MalformedUpstreamResponse(format!(
                "day {} meal at {} is outside breakfast, lunch and dinner hours",
                slot.day,
                slot.start.format("%H:%M")
            )));
        };

        if !taken.insert((slot.day, window)) {
            return Err(ItineraryError::MalformedUpstreamResponse(format!(
                "day {} has more than one {} (slot {})",
                slot.day, window, slot.index
            )));
        }
    }

    Ok(())
}
