//! Google Places Nearby Search backend

use super::{PlaceCandidate, PlaceQuery, PlaceSearch};
use crate::cities::CityCatalog;
use crate::error::ItineraryError;
use crate::models::{Coordinate, PlaceCategory};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};

const NEARBY_SEARCH_ENDPOINT: &str =
    "https://maps.googleapis.com/maps/api/place/nearbysearch/json";

/// Addresses without a recognisable city fall back to the nearest city
/// center inside this distance
const CITY_FALLBACK_RADIUS_KM: f64 = 15.0;

pub struct GooglePlacesClient {
    client: Client,
    api_key: String,
    base_url: String,
    catalog: CityCatalog,
}

impl GooglePlacesClient {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: NEARBY_SEARCH_ENDPOINT.to_string(),
            catalog: CityCatalog::korea(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl PlaceSearch for GooglePlacesClient {
    fn name(&self) -> &'static str {
        "google_places"
    }

    async fn search(&self, query: &PlaceQuery) -> Result<Vec<PlaceCandidate>> {
        if self.api_key.is_empty() {
            return Err(ItineraryError::ConfigError(
                "GOOGLE_MAPS_API_KEY not configured".to_string(),
            ));
        }

        let location = format!("{},{}", query.anchor.lat, query.anchor.lng);
        let radius_m = ((query.radius_km * 1000.0).round() as u64).to_string();

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("location", location.as_str()),
                ("radius", radius_m.as_str()),
                ("keyword", query.keyword.as_str()),
                ("language", "ko"),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                error!("Places request failed: {}", e);
                if e.is_timeout() {
                    ItineraryError::UpstreamTimeout(format!("Places API: {}", e))
                } else {
                    ItineraryError::UpstreamError(format!("Places API error: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ItineraryError::UpstreamError(format!(
                "Places API returned {}: {}",
                status, body
            )));
        }

        let body: NearbyResponse = response.json().await.map_err(|e| {
            ItineraryError::MalformedUpstreamResponse(format!("Places parse error: {}", e))
        })?;

        let candidates = parse_nearby_response(body, &self.catalog)?;
        debug!(
            keyword = %query.keyword,
            radius_km = query.radius_km,
            count = candidates.len(),
            "Places search returned candidates"
        );
        Ok(candidates)
    }
}

#[derive(Debug, Deserialize)]
struct NearbyResponse {
    status: String,
    #[serde(default)]
    results: Vec<NearbyResult>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NearbyResult {
    place_id: Option<String>,
    name: Option<String>,
    vicinity: Option<String>,
    formatted_address: Option<String>,
    geometry: Option<Geometry>,
    #[serde(default)]
    types: Vec<String>,
    rating: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

fn parse_nearby_response(body: NearbyResponse, catalog: &CityCatalog) -> Result<Vec<PlaceCandidate>> {
    match body.status.as_str() {
        "OK" | "ZERO_RESULTS" => {}
        other => {
            return Err(ItineraryError::UpstreamError(format!(
                "Places API status {}: {}",
                other,
                body.error_message.unwrap_or_default()
            )))
        }
    }

    let candidates = body
        .results
        .into_iter()
        .filter_map(|raw| {
            // Results without an id or location cannot be chained or deduplicated
            let id = raw.place_id?;
            let location = raw.geometry?.location;
            let coordinate = Coordinate::new(location.lat, location.lng);
            let address = raw.formatted_address.or(raw.vicinity).unwrap_or_default();

            let city = catalog
                .city_of_address(&address)
                .or_else(|| catalog.nearest(&coordinate, CITY_FALLBACK_RADIUS_KM));

            let category = raw
                .types
                .iter()
                .map(|t| PlaceCategory::from_place_type(t))
                .find(|c| *c != PlaceCategory::Other);

            Some(PlaceCandidate {
                name: raw.name.unwrap_or_else(|| id.clone()),
                id,
                address,
                city,
                coordinate,
                category,
                rating: raw.rating,
            })
        })
        .collect();

    Ok(candidates)
}
