//! Ingress surface (spec §4.6): axum HTTP API for task submission, status,
//! SSE streaming, and webhook intake.

pub mod auth;
pub mod routes;
pub mod state;
pub mod webhook;

pub use auth::AuthenticatedKey;
pub use routes::build_router;
pub use state::{AppState, IngressConfig};
pub use webhook::{verify_webhook, SignatureScheme};
