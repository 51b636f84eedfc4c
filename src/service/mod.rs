//! Referral Kernel REST Service
//!
//! Exposes registration, referral attribution and the leaderboard over HTTP.
//! Every user-scoped endpoint acts on the principal named by `X-User-Id`.
//!
//! ## Endpoints
//!
//! - `POST /api/registrations` - Register the acting user, optionally with a referral code
//! - `GET /api/registrations/me` - The acting user's registration
//! - `GET /api/registrations/me/code` - The acting user's own referral code
//! - `POST /api/referrals` - Apply or change the acting user's referrer
//! - `GET /api/leaderboard?limit=N` - Top referrers
//! - `GET /health` - Detailed service health check
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe

pub mod middleware;
pub mod routes;
pub mod state;

pub use middleware::{metrics_middleware, record_leaderboard_metric, record_registration_metric};
pub use routes::{create_router, status_for, ApiError, ErrorResponse, USER_ID_HEADER};
pub use state::ServiceState;
