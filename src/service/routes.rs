//! Axum routes for the referral service.
//!
//! The acting user is taken from the `X-User-Id` header, which the upstream
//! identity gateway sets after authenticating the session.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    async_trait,
    extract::{rejection::QueryRejection, FromRequestParts, Json, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{ReferralError, ReferralRejection};
use crate::lifecycle::ReferralApplied;
use crate::store::RegistrationStore;
use crate::types::{Leaderboard, ProfileFields, ReferralCode, RegistrationRecord, UserId};
use crate::REFERRAL_KERNEL_SCHEMA_VERSION;

use super::middleware::{metrics_middleware, record_leaderboard_metric, record_registration_metric};
use super::state::ServiceState;

/// Header carrying the authenticated principal.
pub const USER_ID_HEADER: &str = "x-user-id";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to register the acting user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Form fields.
    #[serde(default)]
    pub profile: ProfileFields,
    /// Optional code of the registrant who referred this one.
    #[serde(default)]
    pub referral_code: Option<String>,
}

/// Non-fatal referral problem reported with a registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralWarning {
    /// Machine-readable reason.
    pub code: ReferralRejection,
    /// Human-readable message.
    pub message: String,
}

/// Response to a registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationResponse {
    /// The committed record.
    pub registration: RegistrationRecord,
    /// Present when the supplied referral code was not applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral_warning: Option<ReferralWarning>,
}

/// Request to apply a referral code for the acting user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyReferralRequest {
    /// Code of the referrer.
    pub referral_code: String,
}

/// The acting user's own code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnCodeResponse {
    /// Shareable code.
    pub referral_code: ReferralCode,
}

/// Leaderboard query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeaderboardQuery {
    /// Maximum number of entries.
    pub limit: Option<usize>,
}

/// Leaderboard response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardResponse {
    /// Ranked referrers.
    pub entries: Leaderboard,
    /// Limit applied.
    pub limit: usize,
}

/// Service health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded".
    pub status: String,
    /// Crate version.
    pub version: String,
    /// Schema version.
    pub schema_version: String,
    /// Store reachability.
    pub store_connected: bool,
}

/// Simple liveness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    /// Always "alive".
    pub status: String,
}

/// Readiness response with dependency status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// Whether traffic can be accepted.
    pub ready: bool,
    /// Store reachability.
    pub store: bool,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Structured error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code.
    pub code: String,
    /// Additional error details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response with code and message.
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }

    /// Add details to the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Error returned by handlers: a status plus an [`ErrorResponse`] body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn missing_user() -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorResponse::new("MISSING_USER", "Please sign in first.")
                .with_details(format!("{USER_ID_HEADER} header is required")),
        }
    }

    fn invalid_query(rejection: QueryRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorResponse::new("INVALID_QUERY", "The request parameters are not valid.")
                .with_details(rejection.body_text()),
        }
    }
}

/// HTTP status for an engine error.
pub fn status_for(err: &ReferralError) -> StatusCode {
    match err {
        ReferralError::AlreadyRegistered(_) => StatusCode::CONFLICT,
        ReferralError::NotRegistered(_) | ReferralError::CodeNotFound(_) => StatusCode::NOT_FOUND,
        ReferralError::InvalidUserId => StatusCode::BAD_REQUEST,
        ReferralError::SelfReferral | ReferralError::ReferralCycle => StatusCode::UNPROCESSABLE_ENTITY,
        ReferralError::DuplicateCode { .. } | ReferralError::StoreUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ReferralError::GenerationExhausted { .. } | ReferralError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<ReferralError> for ApiError {
    fn from(err: ReferralError) -> Self {
        Self {
            status: status_for(&err),
            body: ErrorResponse::new(err.error_code(), err.user_message()).with_details(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = %self.body.code, details = ?self.body.details, "Request failed");
        } else {
            tracing::warn!(code = %self.body.code, details = ?self.body.details, "Request rejected");
        }
        (self.status, Json(self.body)).into_response()
    }
}

/// The authenticated principal making the request.
#[derive(Debug, Clone)]
pub struct ActingUser(pub UserId);

#[async_trait]
impl<St: Send + Sync> FromRequestParts<St> for ActingUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(ApiError::missing_user)?
            .to_str()
            .map_err(|_| ApiError::from(ReferralError::InvalidUserId))?;
        UserId::parse(raw)
            .map(ActingUser)
            .ok_or_else(|| ApiError::from(ReferralError::InvalidUserId))
    }
}

fn outcome_label<T>(result: &Result<T, ReferralError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(err) => err.error_code(),
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Register the acting user.
async fn register_handler<S: RegistrationStore + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
    ActingUser(user_id): ActingUser,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegistrationResponse>), ApiError> {
    let start = Instant::now();
    let result = state
        .manager
        .register(&user_id, request.profile, request.referral_code.as_deref())
        .await;
    record_registration_metric("register", outcome_label(&result), start.elapsed().as_millis() as u64);

    let outcome = result?;
    Ok((
        StatusCode::CREATED,
        Json(RegistrationResponse {
            registration: outcome.record,
            referral_warning: outcome.referral_warning.map(|code| ReferralWarning {
                code,
                message: code.user_message().to_string(),
            }),
        }),
    ))
}

/// Apply or update the acting user's referrer.
async fn apply_referral_handler<S: RegistrationStore + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
    ActingUser(user_id): ActingUser,
    Json(request): Json<ApplyReferralRequest>,
) -> Result<Json<ReferralApplied>, ApiError> {
    let start = Instant::now();
    let result = state.manager.apply_referral(&user_id, &request.referral_code).await;
    record_registration_metric("apply_referral", outcome_label(&result), start.elapsed().as_millis() as u64);
    Ok(Json(result?))
}

/// The acting user's registration.
async fn own_registration_handler<S: RegistrationStore + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
    ActingUser(user_id): ActingUser,
) -> Result<Json<RegistrationRecord>, ApiError> {
    Ok(Json(state.manager.get_registration(&user_id).await?))
}

/// The acting user's own referral code.
async fn own_code_handler<S: RegistrationStore + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
    ActingUser(user_id): ActingUser,
) -> Result<Json<OwnCodeResponse>, ApiError> {
    let referral_code = state.manager.get_own_code(&user_id).await?;
    Ok(Json(OwnCodeResponse { referral_code }))
}

/// Top referrers.
async fn leaderboard_handler<S: RegistrationStore + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
    query: Result<Query<LeaderboardQuery>, QueryRejection>,
) -> Result<Json<LeaderboardResponse>, ApiError> {
    let start = Instant::now();
    let Query(query) = query.map_err(ApiError::invalid_query)?;
    let limit = query
        .limit
        .unwrap_or(state.config().default_leaderboard_limit)
        .min(state.config().max_leaderboard_limit);
    let entries = state.leaderboard.top_referrers(limit).await?;
    record_leaderboard_metric(entries.len(), start.elapsed().as_millis() as u64);
    Ok(Json(LeaderboardResponse { entries, limit }))
}

/// Health check endpoint (detailed).
async fn health_handler<S: RegistrationStore + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
) -> Json<HealthResponse> {
    let connected = state.store.ping().await.is_ok();
    Json(HealthResponse {
        status: if connected { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        schema_version: REFERRAL_KERNEL_SCHEMA_VERSION.to_string(),
        store_connected: connected,
    })
}

/// Liveness probe endpoint. Does NOT check dependencies.
async fn liveness_handler() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
    })
}

/// Readiness probe endpoint.
///
/// Returns 200 if the store is reachable, 503 otherwise.
async fn readiness_handler<S: RegistrationStore + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    match state.store.ping().await {
        Ok(()) => Ok(Json(ReadinessResponse {
            ready: true,
            store: true,
            details: None,
        })),
        Err(err) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                ready: false,
                store: false,
                details: Some(err.to_string()),
            }),
        )),
    }
}

// ============================================================================
// Router Construction
// ============================================================================

/// Create the Axum router for the referral service.
pub fn create_router<S: RegistrationStore + 'static>(state: ServiceState<S>) -> Router {
    let state = Arc::new(state);

    Router::new()
        // Registration lifecycle
        .route("/api/registrations", post(register_handler::<S>))
        .route("/api/registrations/me", get(own_registration_handler::<S>))
        .route("/api/registrations/me/code", get(own_code_handler::<S>))
        .route("/api/referrals", post(apply_referral_handler::<S>))
        // Rankings
        .route("/api/leaderboard", get(leaderboard_handler::<S>))
        // Health checks
        .route("/health", get(health_handler::<S>))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler::<S>))
        .layer(axum::middleware::from_fn(metrics_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::store::InMemoryRegistrationStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn router() -> (Router, Arc<InMemoryRegistrationStore>) {
        let state = ServiceState::new(InMemoryRegistrationStore::new(), EngineConfig::default()).unwrap();
        let store = Arc::clone(&state.store);
        (create_router(state), store)
    }

    fn post_json(uri: &str, user: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(user) = user {
            builder = builder.header(USER_ID_HEADER, user);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_as(uri: &str, user: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_ID_HEADER, user);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_refer_flow() {
        let (app, _) = router();

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/registrations",
                Some("x"),
                serde_json::json!({ "profile": { "display_name": "Xena" } }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        let code = body["registration"]["referral_code"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/registrations",
                Some("y"),
                serde_json::json!({ "referral_code": code.to_lowercase() }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert!(body.get("referral_warning").is_none());

        let response = app.oneshot(get_as("/api/leaderboard?limit=5", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["entries"][0]["display_name"], "Xena");
        assert_eq!(body["entries"][0]["count"], 1);
    }

    #[tokio::test]
    async fn test_malformed_limit_is_json_error() {
        let (app, _) = router();
        let response = app.oneshot(get_as("/api/leaderboard?limit=abc", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "INVALID_QUERY");
    }

    #[tokio::test]
    async fn test_missing_user_header() {
        let (app, _) = router();
        let response = app
            .oneshot(post_json("/api/registrations", None, serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "MISSING_USER");
    }

    #[tokio::test]
    async fn test_self_referral_is_unprocessable() {
        let (app, _) = router();
        app.clone()
            .oneshot(post_json("/api/registrations", Some("x"), serde_json::json!({})))
            .await
            .unwrap();

        let response = app.clone().oneshot(get_as("/api/registrations/me/code", Some("x"))).await.unwrap();
        let code = json_body(response).await["referral_code"].as_str().unwrap().to_string();

        let response = app
            .oneshot(post_json(
                "/api/referrals",
                Some("x"),
                serde_json::json!({ "referral_code": code }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json_body(response).await["code"], "SELF_REFERRAL");
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let (app, _) = router();
        for expected in [StatusCode::CREATED, StatusCode::CONFLICT] {
            let response = app
                .clone()
                .oneshot(post_json("/api/registrations", Some("x"), serde_json::json!({})))
                .await
                .unwrap();
            assert_eq!(response.status(), expected);
        }
    }

    #[tokio::test]
    async fn test_readiness_reflects_store() {
        let (app, store) = router();
        let response = app.clone().oneshot(get_as("/health/ready", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        store.set_available(false);
        let response = app.oneshot(get_as("/health/ready", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
