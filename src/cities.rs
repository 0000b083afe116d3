//! City gazetteer
//!
//! Pins a free-text destination to exactly one canonical city and derives
//! the city a venue address belongs to. Every pipeline stage works against
//! the resolved city rather than whatever name an upstream service echoes.

use crate::error::ItineraryError;
use crate::models::{Coordinate, ResolvedCity};
use crate::routing::haversine_km;
use crate::Result;

#[derive(Debug, Clone)]
struct CityEntry {
    name: &'static str,
    english_name: &'static str,
    lat: f64,
    lng: f64,
    aliases: &'static [&'static str],
}

impl CityEntry {
    fn to_resolved(&self) -> ResolvedCity {
        ResolvedCity {
            name: self.name.to_string(),
            english_name: self.english_name.to_string(),
            center: Coordinate::new(self.lat, self.lng),
        }
    }

    fn matches(&self, token: &str) -> bool {
        token == self.name
            || token.eq_ignore_ascii_case(self.english_name)
            || self.aliases.iter().any(|a| token.eq_ignore_ascii_case(a))
    }
}

const KOREAN_CITIES: &[CityEntry] = &[
    CityEntry { name: "서울", english_name: "Seoul", lat: 37.5665, lng: 126.9780, aliases: &[] },
    CityEntry { name: "부산", english_name: "Busan", lat: 35.1796, lng: 129.0756, aliases: &["pusan"] },
    CityEntry { name: "인천", english_name: "Incheon", lat: 37.4563, lng: 126.7052, aliases: &[] },
    CityEntry { name: "대구", english_name: "Daegu", lat: 35.8714, lng: 128.6014, aliases: &[] },
    CityEntry { name: "대전", english_name: "Daejeon", lat: 36.3504, lng: 127.3845, aliases: &[] },
    CityEntry { name: "광주", english_name: "Gwangju", lat: 35.1595, lng: 126.8526, aliases: &[] },
    CityEntry { name: "울산", english_name: "Ulsan", lat: 35.5384, lng: 129.3114, aliases: &[] },
    CityEntry { name: "세종", english_name: "Sejong", lat: 36.4800, lng: 127.2890, aliases: &[] },
    CityEntry { name: "수원", english_name: "Suwon", lat: 37.2636, lng: 127.0286, aliases: &[] },
    CityEntry { name: "춘천", english_name: "Chuncheon", lat: 37.8813, lng: 127.7298, aliases: &[] },
    CityEntry { name: "강릉", english_name: "Gangneung", lat: 37.7519, lng: 128.8761, aliases: &[] },
    CityEntry { name: "속초", english_name: "Sokcho", lat: 38.2070, lng: 128.5918, aliases: &[] },
    CityEntry { name: "전주", english_name: "Jeonju", lat: 35.8242, lng: 127.1480, aliases: &[] },
    CityEntry { name: "경주", english_name: "Gyeongju", lat: 35.8562, lng: 129.2247, aliases: &[] },
    CityEntry { name: "안동", english_name: "Andong", lat: 36.5684, lng: 128.7294, aliases: &[] },
    CityEntry { name: "여수", english_name: "Yeosu", lat: 34.7604, lng: 127.6622, aliases: &[] },
    CityEntry { name: "순천", english_name: "Suncheon", lat: 34.9507, lng: 127.4872, aliases: &[] },
    CityEntry { name: "목포", english_name: "Mokpo", lat: 34.8118, lng: 126.3922, aliases: &[] },
    CityEntry { name: "통영", english_name: "Tongyeong", lat: 34.8544, lng: 128.4332, aliases: &[] },
    CityEntry { name: "제주", english_name: "Jeju", lat: 33.4996, lng: 126.5312, aliases: &["jeju-do", "제주도"] },
    CityEntry { name: "서귀포", english_name: "Seogwipo", lat: 33.2541, lng: 126.5601, aliases: &[] },
];

/// Administrative suffixes stripped before matching, longest first
const KOREAN_SUFFIXES: &[&str] = &["특별자치시", "특별자치도", "광역시", "특별시", "시"];
const ENGLISH_SUFFIXES: &[&str] = &["-si", " city", "-do"];

/// Lookup table of supported destinations
pub struct CityCatalog {
    entries: Vec<CityEntry>,
}

impl CityCatalog {
    /// Catalog of the Korean cities the service plans trips for
    pub fn korea() -> Self {
        Self {
            entries: KOREAN_CITIES.to_vec(),
        }
    }

    /// Resolve a destination to exactly one city.
    ///
    /// An exact match wins; otherwise every token is tried and the
    /// destination must mention exactly one known city.
    pub fn resolve(&self, destination: &str) -> Result<ResolvedCity> {
        let whole = normalize_token(destination);
        if let Some(entry) = self.entries.iter().find(|e| e.matches(&whole)) {
            return Ok(entry.to_resolved());
        }

        let mut found: Vec<&CityEntry> = Vec::new();
        for token in tokenize(destination) {
            if let Some(entry) = self.entries.iter().find(|e| e.matches(&token)) {
                if !found.iter().any(|f| f.name == entry.name) {
                    found.push(entry);
                }
            }
        }

        match found.as_slice() {
            [single] => Ok(single.to_resolved()),
            [] => Err(ItineraryError::InvalidTripRequest(format!(
                "destination '{}' is not a supported city",
                destination.trim()
            ))),
            many => Err(ItineraryError::InvalidTripRequest(format!(
                "destination '{}' is ambiguous: {}",
                destination.trim(),
                many.iter().map(|e| e.name).collect::<Vec<_>>().join(", ")
            ))),
        }
    }

    /// Canonical city name found in a postal address, if any.
    ///
    /// Korean addresses run from province to street, so the last matching
    /// token is the most specific one ("제주특별자치도 서귀포시" is 서귀포).
    pub fn city_of_address(&self, address: &str) -> Option<String> {
        tokenize(address)
            .into_iter()
            .filter_map(|token| {
                self.entries
                    .iter()
                    .find(|e| e.matches(&token))
                    .map(|e| e.name.to_string())
            })
            .last()
    }

    /// Closest catalog city whose center lies within `within_km`
    pub fn nearest(&self, coordinate: &Coordinate, within_km: f64) -> Option<String> {
        self.entries
            .iter()
            .map(|e| (e, haversine_km(&Coordinate::new(e.lat, e.lng), coordinate)))
            .filter(|(_, km)| *km <= within_km)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(e, _)| e.name.to_string())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name).collect()
    }
}

impl Default for CityCatalog {
    fn default() -> Self {
        Self::korea()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c == ',' || c == '/' || c == '(' || c == ')')
        .filter(|t| !t.is_empty())
        .map(normalize_token)
        .filter(|t| !t.is_empty())
        .collect()
}

fn normalize_token(raw: &str) -> String {
    let mut token = raw.trim().to_string();

    for suffix in ENGLISH_SUFFIXES {
        let lowered = token.to_lowercase();
        if lowered.ends_with(suffix) && lowered.len() > suffix.len() {
            token.truncate(token.len() - suffix.len());
            break;
        }
    }

    for suffix in KOREAN_SUFFIXES {
        if let Some(stripped) = token.strip_suffix(suffix) {
            if !stripped.is_empty() {
                token = stripped.to_string();
                break;
            }
        }
    }

    token
}
