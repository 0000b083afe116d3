//! Place search capability
//!
//! The resolver only sees the `PlaceSearch` trait. Results are treated as
//! untrusted: a backend may return venues outside the radius or from a
//! neighbouring city, and the resolver filters them.

use crate::models::{Coordinate, PlaceCategory};
use crate::routing::haversine_km;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod google;
pub use google::GooglePlacesClient;

/// One nearby search around an anchor
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceQuery {
    /// Canonical city name, e.g. "순천"
    pub city: String,
    pub category: PlaceCategory,
    pub keyword: String,
    pub anchor: Coordinate,
    pub radius_km: f64,
}

impl PlaceQuery {
    /// `keyword` is prefixed with the city so text-matching backends stay local
    pub fn new(
        city: &str,
        category: PlaceCategory,
        keyword: &str,
        anchor: Coordinate,
        radius_km: f64,
    ) -> Self {
        Self {
            city: city.to_string(),
            category,
            keyword: format!("{} {}", city, keyword),
            anchor,
            radius_km,
        }
    }
}

/// A venue as reported by place search
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaceCandidate {
    pub id: String,
    pub name: String,
    pub address: String,
    /// City derived from the address; `None` when it could not be determined
    pub city: Option<String>,
    pub coordinate: Coordinate,
    pub category: Option<PlaceCategory>,
    #[serde(default)]
    pub rating: Option<f64>,
}

/// Trait for venue lookup
#[async_trait]
pub trait PlaceSearch: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, query: &PlaceQuery) -> Result<Vec<PlaceCandidate>>;
}

/// Fixed in-memory venue list.
///
/// Answers like a naive nearby search: everything within the radius whose
/// category is unknown or matches, regardless of city.
#[derive(Debug, Clone, Default)]
pub struct StaticPlaceSearch {
    places: Vec<PlaceCandidate>,
}

impl StaticPlaceSearch {
    pub fn new(places: Vec<PlaceCandidate>) -> Self {
        Self { places }
    }
}

#[async_trait]
impl PlaceSearch for StaticPlaceSearch {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn search(&self, query: &PlaceQuery) -> Result<Vec<PlaceCandidate>> {
        Ok(self
            .places
            .iter()
            .filter(|p| p.category.map_or(true, |c| c == query.category))
            .filter(|p| haversine_km(&query.anchor, &p.coordinate) <= query.radius_km)
            .cloned()
            .collect())
    }
}
