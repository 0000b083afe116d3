//! REST API server for the itinerary pipeline
//!
//! Renders `ItineraryOutcome` values; no pipeline logic lives here.

use async_trait::async_trait;
use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::PublicConfig;
use crate::error::ItineraryError;
use crate::models::{Itinerary, ItineraryOutcome, TransportMode, TripRequest};
use crate::pipeline::ItineraryPipeline;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct TransportOverrideRequest {
    pub itinerary: Itinerary,
    pub segment_index: usize,
    pub mode: TransportMode,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Error that still carries a body (e.g. the failure trace)
    pub fn failure<T: Serialize>(message: String, data: T) -> Self {
        Self {
            data: serde_json::to_value(data).ok(),
            ..Self::error(message)
        }
    }
}

/// =============================
/// Request Extraction
/// =============================

/// Request bodies that know which error a malformed payload maps to
pub trait RequestBody: DeserializeOwned {
    fn malformed(message: String) -> ItineraryError;
}

impl RequestBody for TripRequest {
    fn malformed(message: String) -> ItineraryError {
        ItineraryError::InvalidTripRequest(message)
    }
}

impl RequestBody for TransportOverrideRequest {
    fn malformed(message: String) -> ItineraryError {
        ItineraryError::InvalidSegment(message)
    }
}

/// JSON extractor whose rejections are rendered as `ApiResponse` failures
/// instead of axum's plain-text bodies.
#[derive(Debug, Clone)]
pub struct ApiJson<T>(pub T);

#[derive(Debug)]
pub struct BodyRejection(ItineraryError);

impl IntoResponse for BodyRejection {
    fn into_response(self) -> Response {
        let error = self.0;
        let outcome = ItineraryOutcome::failure(&error, vec![format!("FAIL: {}", error)]);

        (
            failure_status(error.kind()),
            Json(ApiResponse::failure(error.to_string(), &outcome)),
        )
            .into_response()
    }
}

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: RequestBody,
    S: Send + Sync,
{
    type Rejection = BodyRejection;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => {
                let message = describe_rejection(&rejection);
                warn!(status = %rejection.status(), %message, "Rejected request body");
                Err(BodyRejection(T::malformed(message)))
            }
        }
    }
}

fn describe_rejection(rejection: &JsonRejection) -> String {
    match rejection {
        JsonRejection::JsonDataError(err) => format!("invalid request data: {}", err.body_text()),
        JsonRejection::JsonSyntaxError(err) => format!("invalid JSON syntax: {}", err.body_text()),
        JsonRejection::MissingJsonContentType(_) => {
            "missing Content-Type header, expected 'application/json'".to_string()
        }
        JsonRejection::BytesRejection(err) => {
            format!("failed to read request body: {}", err.body_text())
        }
        other => other.body_text(),
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<ItineraryPipeline>,
    pub public_config: Arc<PublicConfig>,
}

/// HTTP status for a failed outcome, by error kind
fn failure_status(kind: &str) -> StatusCode {
    match kind {
        "invalid_trip_request" | "invalid_segment" => StatusCode::BAD_REQUEST,
        "resolution_error" => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// =============================
/// Health & Config Endpoints
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn get_config(State(state): State<ApiState>) -> Json<ApiResponse> {
    Json(ApiResponse::success(state.public_config.as_ref()))
}

/// =============================
/// Itinerary Endpoints
/// =============================

async fn generate_itinerary(
    State(state): State<ApiState>,
    ApiJson(req): ApiJson<TripRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(
        destination = %req.destination,
        start_date = %req.start_date,
        end_date = %req.end_date,
        "Received itinerary request"
    );

    let outcome = state.pipeline.generate(req).await;

    match &outcome {
        ItineraryOutcome::Success { .. } | ItineraryOutcome::Partial { .. } => {
            (StatusCode::OK, Json(ApiResponse::success(&outcome)))
        }
        ItineraryOutcome::Failure { kind, message, .. } => (
            failure_status(kind),
            Json(ApiResponse::failure(message.clone(), &outcome)),
        ),
    }
}

async fn override_transport(
    ApiJson(req): ApiJson<TransportOverrideRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let TransportOverrideRequest {
        mut itinerary,
        segment_index,
        mode,
    } = req;

    info!(
        itinerary_id = %itinerary.itinerary_id,
        segment_index,
        mode = ?mode,
        "Received transport override"
    );

    match itinerary.override_mode(segment_index, mode) {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::success(&itinerary))),
        Err(e) => (
            failure_status(e.kind()),
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(pipeline: Arc<ItineraryPipeline>, public_config: PublicConfig) -> Router {
    let state = ApiState {
        pipeline,
        public_config: Arc::new(public_config),
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/config", get(get_config))
        .route("/api/itinerary", post(generate_itinerary))
        .route("/api/itinerary/transport", post(override_transport))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    pipeline: Arc<ItineraryPipeline>,
    public_config: PublicConfig,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(pipeline, public_config);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryScheduleCache;
    use crate::config::AppConfig;
    use crate::framer::ScheduleFramer;
    use crate::models::{FramingStrategy, ModeSource};
    use crate::places::{fixtures, PlaceCandidate, StaticPlaceSearch};
    use crate::resolver::{PlaceResolver, RADIUS_SCHEDULE_KM};
    use crate::routing::RouteOptimizer;
    use crate::verification::create_default_verification_engine;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn router(places: Vec<PlaceCandidate>) -> Router {
        let pipeline = ItineraryPipeline::new(
            ScheduleFramer::new(
                FramingStrategy::RuleBased,
                None,
                Arc::new(InMemoryScheduleCache::new()),
                Duration::from_secs(3600),
                Duration::from_secs(1),
            ),
            PlaceResolver::new(Arc::new(StaticPlaceSearch::new(places)), Duration::from_secs(1)),
            RouteOptimizer::new(None, Duration::from_secs(1)),
            create_default_verification_engine(),
        );
        let public = AppConfig::default().public_view(&RADIUS_SCHEDULE_KM, pipeline.catalog().names());
        create_router(Arc::new(pipeline), public)
    }

    async fn call(router: Router, method: &str, uri: &str, body: Option<String>) -> (StatusCode, ApiResponse) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map(Body::from).unwrap_or_else(Body::empty))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn trip_body(destination: &str) -> String {
        serde_json::json!({
            "destination": destination,
            "start_date": "2026-11-01",
            "end_date": "2026-11-02",
            "start_time": "09:00",
            "end_time": "18:00"
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let response = router(Vec::new())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_config_has_no_secrets() {
        let (status, body) = call(router(Vec::new()), "GET", "/api/config", None).await;
        assert_eq!(status, StatusCode::OK);

        let data = body.data.unwrap();
        assert_eq!(data["cache_ttl_days"], 7);
        assert_eq!(data["radius_schedule_km"][3], 5.0);
        assert!(data.get("gemini_api_key").is_none());
    }

    #[tokio::test]
    async fn test_generate_success() {
        let (status, body) = call(
            router(fixtures::suncheon()),
            "POST",
            "/api/itinerary",
            Some(trip_body("순천")),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.success);
        let data = body.data.unwrap();
        assert_eq!(data["status"], "success");
        assert_eq!(data["itinerary"]["city"]["name"], "순천");
        assert_eq!(data["itinerary"]["venues"].as_array().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_unknown_city_is_bad_request() {
        let (status, body) = call(
            router(fixtures::suncheon()),
            "POST",
            "/api/itinerary",
            Some(trip_body("Atlantis")),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.success);
        assert!(body.error.unwrap().contains("Atlantis"));
        assert_eq!(body.data.unwrap()["kind"], "invalid_trip_request");
    }

    #[tokio::test]
    async fn test_unresolvable_is_unprocessable() {
        let (status, body) =
            call(router(Vec::new()), "POST", "/api/itinerary", Some(trip_body("순천"))).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.data.unwrap()["status"], "failure");
    }

    #[tokio::test]
    async fn test_malformed_trip_is_bad_request_envelope() {
        let body = serde_json::json!({
            "destination": "순천",
            "start_date": "2026-11-01",
            "end_date": "2026-11-02",
            "start_time": "25:00",
            "end_time": "18:00"
        })
        .to_string();

        let (status, body) =
            call(router(fixtures::suncheon()), "POST", "/api/itinerary", Some(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.success);
        assert!(body.error.unwrap().contains("25:00"));
        let data = body.data.unwrap();
        assert_eq!(data["status"], "failure");
        assert_eq!(data["kind"], "invalid_trip_request");
    }

    #[tokio::test]
    async fn test_missing_field_and_bad_syntax_are_bad_requests() {
        let missing = serde_json::json!({ "destination": "순천" }).to_string();
        let (status, body) =
            call(router(Vec::new()), "POST", "/api/itinerary", Some(missing)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.data.unwrap()["kind"], "invalid_trip_request");

        let (status, body) = call(
            router(Vec::new()),
            "POST",
            "/api/itinerary",
            Some("{not json".to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.error.unwrap().contains("syntax"));
    }

    #[tokio::test]
    async fn test_missing_content_type_is_bad_request() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/itinerary")
            .body(Body::from(trip_body("순천")))
            .unwrap();

        let response = router(Vec::new()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ApiResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(body.error.unwrap().contains("Content-Type"));
    }

    #[tokio::test]
    async fn test_malformed_transport_override_is_bad_request() {
        let body = serde_json::json!({
            "itinerary": {},
            "segment_index": 0,
            "mode": "teleport"
        })
        .to_string();

        let (status, body) =
            call(router(Vec::new()), "POST", "/api/itinerary/transport", Some(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.data.unwrap()["kind"], "invalid_segment");
    }

    #[tokio::test]
    async fn test_transport_override() {
        let (_, generated) = call(
            router(fixtures::suncheon()),
            "POST",
            "/api/itinerary",
            Some(trip_body("순천")),
        )
        .await;
        let itinerary = generated.data.unwrap()["itinerary"].clone();

        let request = serde_json::json!({
            "itinerary": itinerary,
            "segment_index": 0,
            "mode": "driving"
        })
        .to_string();
        let (status, body) = call(
            router(Vec::new()),
            "POST",
            "/api/itinerary/transport",
            Some(request),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let updated: Itinerary = serde_json::from_value(body.data.unwrap()).unwrap();
        assert_eq!(updated.segments[0].mode, TransportMode::Driving);
        assert_eq!(updated.segments[0].mode_source, ModeSource::UserSelected);
        assert_eq!(updated.venues.len(), 10);

        let bad = serde_json::json!({
            "itinerary": itinerary,
            "segment_index": 99,
            "mode": "walking"
        })
        .to_string();
        let (status, _) = call(router(Vec::new()), "POST", "/api/itinerary/transport", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
