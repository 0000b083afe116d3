//! Google Directions backend
//!
//! One driving request per day with the intermediate venues as fixed-order
//! waypoints. Road distances are kept; short legs leave the mode to the
//! distance rules since a driving duration says little about a 300 m walk.

use super::{RouteLeg, RouteProvider, TRANSIT_MAX_KM};
use crate::error::ItineraryError;
use crate::models::{Coordinate, TransportMode};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::error;

const DIRECTIONS_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/directions/json";

pub struct GoogleDirectionsClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GoogleDirectionsClient {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: DIRECTIONS_ENDPOINT.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

fn lat_lng(c: &Coordinate) -> String {
    format!("{},{}", c.lat, c.lng)
}

#[async_trait]
impl RouteProvider for GoogleDirectionsClient {
    fn name(&self) -> &'static str {
        "google_directions"
    }

    async fn route(&self, stops: &[Coordinate]) -> Result<Vec<RouteLeg>> {
        if self.api_key.is_empty() {
            return Err(ItineraryError::ConfigError(
                "GOOGLE_MAPS_API_KEY not configured".to_string(),
            ));
        }

        let (Some(origin), Some(destination)) = (stops.first(), stops.last()) else {
            return Ok(Vec::new());
        };
        if stops.len() < 2 {
            return Ok(Vec::new());
        }

        let waypoints = stops[1..stops.len() - 1]
            .iter()
            .map(lat_lng)
            .collect::<Vec<_>>()
            .join("|");

        let mut params = vec![
            ("origin", lat_lng(origin)),
            ("destination", lat_lng(destination)),
            ("mode", "driving".to_string()),
            ("language", "ko".to_string()),
            ("key", self.api_key.clone()),
        ];
        if !waypoints.is_empty() {
            params.push(("waypoints", waypoints));
        }

        let response = self
            .client
            .get(&self.base_url)
            .query(&params)
            .send()
            .await
            .map_err(|e| {
                error!("Directions request failed: {}", e);
                if e.is_timeout() {
                    ItineraryError::UpstreamTimeout(format!("Directions API: {}", e))
                } else {
                    ItineraryError::UpstreamError(format!("Directions API error: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ItineraryError::UpstreamError(format!(
                "Directions API returned {}: {}",
                status, body
            )));
        }

        let body: DirectionsResponse = response.json().await.map_err(|e| {
            ItineraryError::MalformedUpstreamResponse(format!("Directions parse error: {}", e))
        })?;

        parse_directions_response(body)
    }
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    status: String,
    #[serde(default)]
    routes: Vec<DirectionsRoute>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectionsRoute {
    #[serde(default)]
    legs: Vec<DirectionsLeg>,
}

#[derive(Debug, Deserialize)]
struct DirectionsLeg {
    distance: ValueField,
    duration: ValueField,
}

#[derive(Debug, Deserialize)]
struct ValueField {
    value: f64,
}

fn parse_directions_response(body: DirectionsResponse) -> Result<Vec<RouteLeg>> {
    if body.status != "OK" {
        return Err(ItineraryError::UpstreamError(format!(
            "Directions API status {}: {}",
            body.status,
            body.error_message.unwrap_or_default()
        )));
    }

    let route = body.routes.into_iter().next().ok_or_else(|| {
        ItineraryError::MalformedUpstreamResponse("Directions returned no routes".to_string())
    })?;

    Ok(route
        .legs
        .into_iter()
        .map(|leg| {
            let distance_km = leg.distance.value / 1000.0;
            RouteLeg {
                distance_km,
                duration_minutes: (leg.duration.value.max(0.0) / 60.0).ceil() as u32,
                mode: (distance_km > TRANSIT_MAX_KM).then_some(TransportMode::Driving),
            }
        })
        .collect())
}
