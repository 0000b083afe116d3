//! Core data models for the itinerary pipeline

use crate::cities::CityCatalog;
use crate::error::ItineraryError;
use crate::Result;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Longest trip the pipeline accepts, in days
pub const MAX_TRIP_DAYS: usize = 14;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PlaceCategory {
    Sightseeing,
    Restaurant,
    Cafe,
    Lodging,
    Other,
}

impl PlaceCategory {
    /// Broader category tried once when a slot cannot be filled.
    pub fn parent(&self) -> Option<PlaceCategory> {
        match self {
            PlaceCategory::Cafe => Some(PlaceCategory::Restaurant),
            PlaceCategory::Restaurant => Some(PlaceCategory::Other),
            PlaceCategory::Sightseeing => Some(PlaceCategory::Other),
            PlaceCategory::Lodging => Some(PlaceCategory::Other),
            PlaceCategory::Other => None,
        }
    }

    /// A venue of `venue` category may fill a slot tagged `self`.
    pub fn accepts(&self, venue: PlaceCategory) -> bool {
        *self == venue || self.parent() == Some(venue)
    }

    /// Korean search keywords sent to place search, most specific first
    pub fn search_keywords(&self) -> &'static [&'static str] {
        match self {
            PlaceCategory::Sightseeing => &["관광지", "명소"],
            PlaceCategory::Restaurant => &["맛집", "식당"],
            PlaceCategory::Cafe => &["카페", "디저트"],
            PlaceCategory::Lodging => &["숙소", "호텔"],
            PlaceCategory::Other => &["가볼만한곳"],
        }
    }

    /// Map a free-form place type (AI output, place-search types) to a category
    pub fn from_place_type(raw: &str) -> PlaceCategory {
        match raw.trim().to_lowercase().as_str() {
            "tourist_attraction" | "attraction" | "sightseeing" | "park" | "museum"
            | "관광지" | "명소" => PlaceCategory::Sightseeing,
            "restaurant" | "food" | "meal_takeaway" | "맛집" | "식당" => PlaceCategory::Restaurant,
            "cafe" | "dessert" | "bakery" | "카페" => PlaceCategory::Cafe,
            "lodging" | "hotel" | "accommodation" | "숙소" => PlaceCategory::Lodging,
            _ => PlaceCategory::Other,
        }
    }
}

impl fmt::Display for PlaceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlaceCategory::Sightseeing => "sightseeing",
            PlaceCategory::Restaurant => "restaurant",
            PlaceCategory::Cafe => "cafe",
            PlaceCategory::Lodging => "lodging",
            PlaceCategory::Other => "other",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FramingStrategy {
    Ai,
    #[serde(alias = "rules")]
    RuleBased,
}

impl FramingStrategy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "ai" => Some(FramingStrategy::Ai),
            "rules" | "rule_based" | "rule-based" => Some(FramingStrategy::RuleBased),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FramingStrategy::Ai => "ai",
            FramingStrategy::RuleBased => "rules",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FrameSource {
    Cache,
    Ai,
    RuleBased,
    /// Rule-based frame produced because the AI path failed
    Fallback,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Walking,
    Transit,
    Driving,
}

impl TransportMode {
    /// Average door-to-door speed used when no mapping data is available
    pub fn speed_kmh(&self) -> f64 {
        match self {
            TransportMode::Walking => 4.5,
            TransportMode::Transit => 20.0,
            TransportMode::Driving => 40.0,
        }
    }

    pub fn estimate_minutes(&self, distance_km: f64) -> u32 {
        if distance_km <= 0.0 {
            return 0;
        }
        (distance_km / self.speed_kmh() * 60.0).ceil() as u32
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModeSource {
    Mapping,
    DistanceRule,
    UserSelected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoutingSource {
    Mapping,
    Haversine,
    Mixed,
    NotRequired,
}

//
// ================= Geography =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Rough bounding box of South Korea, used to drop bogus geocodes
    pub fn in_korea(&self) -> bool {
        (33.0..=43.0).contains(&self.lat) && (124.0..=132.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedCity {
    /// Canonical Korean name, e.g. "순천"
    pub name: String,
    pub english_name: String,
    pub center: Coordinate,
}

//
// ================= Trip Request =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripRequest {
    pub destination: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    #[serde(default)]
    pub strategy: Option<FramingStrategy>,
    /// Free-form style hint for AI framing, e.g. "힐링" or "맛집 탐방"
    #[serde(default)]
    pub travel_style: Option<String>,
}

/// A validated trip with its destination pinned to exactly one city
#[derive(Debug, Clone, Serialize)]
pub struct AcceptedTrip {
    pub request: TripRequest,
    pub city: ResolvedCity,
    pub dates: Vec<NaiveDate>,
}

impl TripRequest {
    /// Sanity-check the request and resolve its destination.
    pub fn accept(&self, catalog: &CityCatalog) -> Result<AcceptedTrip> {
        if self.destination.trim().is_empty() {
            return Err(ItineraryError::InvalidTripRequest(
                "destination must not be empty".to_string(),
            ));
        }

        if self.start_date > self.end_date {
            return Err(ItineraryError::InvalidTripRequest(format!(
                "start date {} is after end date {}",
                self.start_date, self.end_date
            )));
        }

        if self.start_time >= self.end_time {
            return Err(ItineraryError::InvalidTripRequest(format!(
                "daily window {}-{} is empty",
                self.start_time.format("%H:%M"),
                self.end_time.format("%H:%M")
            )));
        }

        let dates: Vec<NaiveDate> = self
            .start_date
            .iter_days()
            .take_while(|d| *d <= self.end_date)
            .take(MAX_TRIP_DAYS + 1)
            .collect();

        if dates.len() > MAX_TRIP_DAYS {
            return Err(ItineraryError::InvalidTripRequest(format!(
                "trips are limited to {} days",
                MAX_TRIP_DAYS
            )));
        }

        let city = catalog.resolve(&self.destination)?;

        Ok(AcceptedTrip {
            request: self.clone(),
            city,
            dates,
        })
    }
}

impl AcceptedTrip {
    pub fn days_count(&self) -> usize {
        self.dates.len()
    }

    pub fn window_minutes(&self) -> i64 {
        (self.request.end_time - self.request.start_time).num_minutes()
    }
}

//
// ================= Schedule Frame =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleSlot {
    pub index: usize,
    pub day: u32,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
    pub category: PlaceCategory,
    pub purpose: String,
    /// Place-search keywords for this slot, most specific first.
    /// Empty means the category defaults.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl ScheduleSlot {
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Keyword to search with when looking for `category`.
    ///
    /// The slot's own keywords only apply to its own category; a relaxed
    /// search uses the broader category's default.
    pub fn search_keyword(&self, category: PlaceCategory) -> &str {
        let own = self
            .keywords
            .iter()
            .map(|k| k.trim())
            .find(|k| !k.is_empty())
            .filter(|_| category == self.category);

        own.or_else(|| category.search_keywords().first().copied())
            .unwrap_or_default()
    }
}

/// Category default keywords as owned strings
pub fn default_keywords(category: PlaceCategory) -> Vec<String> {
    category.search_keywords().iter().map(|k| k.to_string()).collect()
}

//
// ================= Resolution =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedVenue {
    pub slot_index: usize,
    pub day: u32,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
    pub slot_category: PlaceCategory,
    pub venue_id: String,
    pub name: String,
    pub address: String,
    pub city: String,
    pub coordinate: Coordinate,
    pub category: PlaceCategory,
    pub relaxed: bool,
    pub distance_from_anchor_km: f64,
    pub search_radius_km: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotGap {
    pub slot_index: usize,
    pub day: u32,
    pub category: PlaceCategory,
    pub reason: String,
}

//
// ================= Itinerary =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteSegment {
    pub from_index: usize,
    pub to_index: usize,
    pub day: u32,
    pub distance_km: f64,
    pub duration_minutes: u32,
    pub mode: TransportMode,
    pub mode_source: ModeSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Itinerary {
    pub itinerary_id: Uuid,
    pub city: ResolvedCity,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub venues: Vec<ResolvedVenue>,
    pub segments: Vec<RouteSegment>,
    pub gaps: Vec<SlotGap>,
    pub framing_source: FrameSource,
    pub routing_source: RoutingSource,
    pub created_at: DateTime<Utc>,
}

impl Itinerary {
    /// Apply a user-selected transport mode to one segment.
    ///
    /// Only the segment's duration is recomputed; venues and the other
    /// segments are untouched.
    pub fn override_mode(&mut self, segment_index: usize, mode: TransportMode) -> Result<()> {
        let count = self.segments.len();
        let segment = self.segments.get_mut(segment_index).ok_or_else(|| {
            ItineraryError::InvalidSegment(format!(
                "segment {} does not exist ({} segments)",
                segment_index, count
            ))
        })?;

        segment.mode = mode;
        segment.duration_minutes = mode.estimate_minutes(segment.distance_km);
        segment.mode_source = ModeSource::UserSelected;
        Ok(())
    }
}

//
// ================= Final Result =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItineraryOutcome {
    Success {
        itinerary: Itinerary,
        trace: Vec<String>,
    },
    Partial {
        itinerary: Itinerary,
        gaps: Vec<SlotGap>,
        trace: Vec<String>,
    },
    Failure {
        kind: String,
        message: String,
        trace: Vec<String>,
    },
}

impl ItineraryOutcome {
    pub fn failure(error: &ItineraryError, trace: Vec<String>) -> Self {
        ItineraryOutcome::Failure {
            kind: error.kind().to_string(),
            message: error.to_string(),
            trace,
        }
    }

    pub fn itinerary(&self) -> Option<&Itinerary> {
        match self {
            ItineraryOutcome::Success { itinerary, .. }
            | ItineraryOutcome::Partial { itinerary, .. } => Some(itinerary),
            ItineraryOutcome::Failure { .. } => None,
        }
    }

    pub fn trace(&self) -> &[String] {
        match self {
            ItineraryOutcome::Success { trace, .. }
            | ItineraryOutcome::Partial { trace, .. }
            | ItineraryOutcome::Failure { trace, .. } => trace,
        }
    }
}

//
// ================= Wire Helpers =================
//

/// Parse `HH:MM` (seconds tolerated)
pub fn parse_hhmm(raw: &str) -> Option<NaiveTime> {
    let trimmed = raw.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .ok()
}

/// Serde adapter for `HH:MM` times
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_hhmm(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid time '{}', expected HH:MM", raw))
        })
    }
}
