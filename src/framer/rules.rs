//! Deterministic schedule frame
//!
//! Lays a fixed daily pattern (sightseeing, lunch, cafe, sightseeing,
//! dinner) over the active window. Used when the AI path is disabled or
//! fails, so it must always succeed for any accepted trip.

use super::ScheduleGenerator;
use crate::models::{AcceptedTrip, PlaceCategory, ScheduleSlot};
use crate::Result;
use async_trait::async_trait;
use chrono::Duration;

struct PatternEntry {
    category: PlaceCategory,
    minutes: i64,
    purpose: &'static str,
    keywords: &'static [&'static str],
}

const DAILY_PATTERN: [PatternEntry; 5] = [
    PatternEntry {
        category: PlaceCategory::Sightseeing,
        minutes: 120,
        purpose: "오전 관광",
        keywords: &["관광지", "명소"],
    },
    PatternEntry {
        category: PlaceCategory::Restaurant,
        minutes: 90,
        purpose: "점심 식사",
        keywords: &["맛집", "식당"],
    },
    PatternEntry {
        category: PlaceCategory::Cafe,
        minutes: 60,
        purpose: "카페 휴식",
        keywords: &["카페", "디저트"],
    },
    PatternEntry {
        category: PlaceCategory::Sightseeing,
        minutes: 120,
        purpose: "오후 관광",
        keywords: &["관광지", "공원"],
    },
    PatternEntry {
        category: PlaceCategory::Restaurant,
        minutes: 90,
        purpose: "저녁 식사",
        keywords: &["맛집", "저녁식사"],
    },
];

const NIGHT_SIGHTS: &[&str] = &["야경명소", "관광지"];
const LATE_FOOD: &[&str] = &["야식", "맛집"];

/// Purpose label and keywords for entries past the first pass over the pattern
fn evening_entry(category: PlaceCategory) -> (&'static str, &'static [&'static str]) {
    let purpose = match category {
        PlaceCategory::Sightseeing => "야간 관광",
        PlaceCategory::Restaurant => "야식",
        PlaceCategory::Cafe => "야간 카페",
        PlaceCategory::Lodging => "숙소",
        PlaceCategory::Other => "자유 일정",
    };
    let keywords = match category {
        PlaceCategory::Sightseeing => NIGHT_SIGHTS,
        PlaceCategory::Restaurant => LATE_FOOD,
        _ => category.search_keywords(),
    };
    (purpose, keywords)
}

/// One placed block, as minute offsets from the window start
#[derive(Debug, Clone, Copy, PartialEq)]
struct Block {
    start: i64,
    end: i64,
    category: PlaceCategory,
    purpose: &'static str,
    keywords: &'static [&'static str],
}

/// Greedily take pattern entries while they fit, then spread the spare
/// minutes evenly between them. The integer remainder stays at day's end.
fn layout_day(window_minutes: i64) -> Vec<Block> {
    let mut chosen: Vec<(&PatternEntry, &'static str, &'static [&'static str])> = Vec::new();
    let mut used = 0;

    for (position, entry) in DAILY_PATTERN.iter().cycle().enumerate() {
        if used + entry.minutes > window_minutes {
            break;
        }
        used += entry.minutes;
        let (purpose, keywords) = if position < DAILY_PATTERN.len() {
            (entry.purpose, entry.keywords)
        } else {
            evening_entry(entry.category)
        };
        chosen.push((entry, purpose, keywords));
    }

    if chosen.is_empty() {
        return vec![Block {
            start: 0,
            end: window_minutes,
            category: PlaceCategory::Sightseeing,
            purpose: DAILY_PATTERN[0].purpose,
            keywords: DAILY_PATTERN[0].keywords,
        }];
    }

    let gap = if chosen.len() > 1 {
        (window_minutes - used) / (chosen.len() as i64 - 1)
    } else {
        0
    };

    let mut cursor = 0;
    chosen
        .into_iter()
        .map(|(entry, purpose, keywords)| {
            let block = Block {
                start: cursor,
                end: cursor + entry.minutes,
                category: entry.category,
                purpose,
                keywords,
            };
            cursor = block.end + gap;
            block
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedScheduleGenerator;

impl RuleBasedScheduleGenerator {
    /// Build the frame for every trip day. Infallible for accepted trips.
    pub fn build(&self, trip: &AcceptedTrip) -> Vec<ScheduleSlot> {
        let window_start = trip.request.start_time;
        let blocks = layout_day(trip.window_minutes());

        let mut slots = Vec::with_capacity(blocks.len() * trip.days_count());
        for (offset, date) in trip.dates.iter().enumerate() {
            for block in &blocks {
                slots.push(ScheduleSlot {
                    index: slots.len(),
                    day: offset as u32 + 1,
                    date: *date,
                    start: window_start + Duration::minutes(block.start),
                    end: window_start + Duration::minutes(block.end),
                    category: block.category,
                    purpose: block.purpose.to_string(),
                    keywords: block.keywords.iter().map(|k| k.to_string()).collect(),
                });
            }
        }
        slots
    }
}

#[async_trait]
impl ScheduleGenerator for RuleBasedScheduleGenerator {
    fn name(&self) -> &'static str {
        "rule_based"
    }

    async fn generate(&self, trip: &AcceptedTrip) -> Result<Vec<ScheduleSlot>> {
        Ok(self.build(trip))
    }
}
