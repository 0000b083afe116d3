//! Gemini-backed schedule framing
//!
//! Asks the model for a day-by-day list of time slots and place types,
//! then parses it strictly. Anything that does not validate is reported as
//! a malformed upstream response so the framer can fall back.

use super::{validate_frame, validate_meal_times, ScheduleGenerator};
use crate::error::ItineraryError;
use crate::gemini::GeminiClient;
use crate::models::{default_keywords, parse_hhmm, AcceptedTrip, PlaceCategory, ScheduleSlot};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "당신은 한국 국내 여행 일정을 설계하는 전문가입니다. \
장소 이름은 정하지 말고 시간대와 장소 유형만 정하세요. \
반드시 JSON 하나만 출력하고 설명 문장은 붙이지 마세요.";

pub struct GeminiScheduleGenerator {
    client: GeminiClient,
}

impl GeminiScheduleGenerator {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }

    fn build_prompt(trip: &AcceptedTrip) -> String {
        let dates = trip
            .dates
            .iter()
            .enumerate()
            .map(|(i, d)| format!("- {}일차: {}", i + 1, d))
            .collect::<Vec<_>>()
            .join("\n");

        let style = trip
            .request
            .travel_style
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("자유 여행");

        format!(
            r#"여행지: {city} ({english})
기간: {start} ~ {end} ({days}일)
하루 활동 시간: {open} ~ {close}
여행 스타일: {style}

날짜:
{dates}

규칙:
- 매일 활동 시간 안에서만 시간대를 배치
- 같은 날 시간대는 겹치지 않게, 시작 시간 순서대로
- 같은 유형을 연속으로 배치하지 말 것
- restaurant는 아침(07~11시), 점심(11~15시), 저녁(17~22시) 사이에만 시작
- 같은 날 같은 식사 시간대에 restaurant는 한 번만
- 하루 활동 시간의 절반 이상을 채울 것
- place_type은 sightseeing, restaurant, cafe, lodging, other 중 하나
- 특정 장소 이름은 쓰지 말 것
- search_keywords에는 여행 스타일에 맞는 장소 검색어를 1~3개

JSON 형식:
{{
  "schedule_frame": [
    {{"day": 1, "time_slot": "09:00-11:00", "place_type": "sightseeing", "purpose": "오전 관광", "search_keywords": ["관광지", "명소"]}}
  ]
}}
"#,
            city = trip.city.name,
            english = trip.city.english_name,
            start = trip.request.start_date,
            end = trip.request.end_date,
            days = trip.days_count(),
            open = trip.request.start_time.format("%H:%M"),
            close = trip.request.end_time.format("%H:%M"),
            style = style,
            dates = dates,
        )
    }
}

#[async_trait]
impl ScheduleGenerator for GeminiScheduleGenerator {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn generate(&self, trip: &AcceptedTrip) -> Result<Vec<ScheduleSlot>> {
        let prompt = Self::build_prompt(trip);
        let reply = self.client.generate_json(SYSTEM_PROMPT, &prompt).await?;

        if reply.is_truncated() {
            warn!(finish_reason = ?reply.finish_reason, "Gemini schedule frame was truncated");
            return Err(ItineraryError::MalformedUpstreamResponse(
                "schedule frame truncated by token limit".to_string(),
            ));
        }

        parse_frame_response(&reply.text, trip)
    }
}

#[derive(Debug, Deserialize)]
struct FrameResponse {
    schedule_frame: Vec<FrameItem>,
}

#[derive(Debug, Deserialize)]
struct FrameItem {
    day: u32,
    time_slot: String,
    place_type: String,
    #[serde(default)]
    purpose: String,
    #[serde(default)]
    search_keywords: Vec<String>,
}

/// Parse and validate a model reply into an ordered slot list
pub fn parse_frame_response(response: &str, trip: &AcceptedTrip) -> Result<Vec<ScheduleSlot>> {
    let cleaned = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    if cleaned.is_empty() {
        return Err(ItineraryError::MalformedUpstreamResponse(
            "empty schedule frame reply".to_string(),
        ));
    }

    let parsed: FrameResponse = serde_json::from_str(cleaned).map_err(|e| {
        ItineraryError::MalformedUpstreamResponse(format!(
            "Failed to parse schedule frame: {} | raw={}",
            e, response
        ))
    })?;

    let mut slots = Vec::with_capacity(parsed.schedule_frame.len());
    for item in parsed.schedule_frame {
        let (start, end) = split_time_slot(&item.time_slot).ok_or_else(|| {
            ItineraryError::MalformedUpstreamResponse(format!(
                "invalid time_slot '{}'",
                item.time_slot
            ))
        })?;

        let date = item
            .day
            .checked_sub(1)
            .and_then(|offset| trip.dates.get(offset as usize))
            .copied()
            .ok_or_else(|| {
                ItineraryError::MalformedUpstreamResponse(format!(
                    "day {} is outside the {}-day trip",
                    item.day,
                    trip.days_count()
                ))
            })?;

        let purpose = if item.purpose.trim().is_empty() {
            item.place_type.clone()
        } else {
            item.purpose.trim().to_string()
        };

        let category = PlaceCategory::from_place_type(&item.place_type);
        let mut keywords: Vec<String> = item
            .search_keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            keywords = default_keywords(category);
        }

        slots.push(ScheduleSlot {
            index: 0,
            day: item.day,
            date,
            start,
            end,
            category,
            purpose,
            keywords,
        });
    }

    slots.sort_by(|a, b| (a.day, a.start).cmp(&(b.day, b.start)));
    for (index, slot) in slots.iter_mut().enumerate() {
        slot.index = index;
    }

    validate_frame(&slots, trip)?;
    validate_meal_times(&slots)?;
    debug!(slot_count = slots.len(), "Parsed AI schedule frame");
    Ok(slots)
}

/// "09:00-11:00" (also "09:00 ~ 11:00")
fn split_time_slot(raw: &str) -> Option<(chrono::NaiveTime, chrono::NaiveTime)> {
    let (start, end) = raw.split_once('-').or_else(|| raw.split_once('~'))?;
    Some((parse_hhmm(start)?, parse_hhmm(end)?))
}
