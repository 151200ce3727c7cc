mod api_error;
mod api_server;
mod auth;
mod instrumentation;

pub use api_server::{router, ApiServer, AppState, BuildInfo, LoginRequest, METRICS_CONTENT_TYPE};
pub use auth::{bearer_token, AdminUser, AuthUser};
pub use instrumentation::{route_label, track_requests, METRICS_PATH};
