//! HTTP API.
//!
//! ## Endpoints
//!
//! - `POST /initiate_task` (alias `POST /api/task`) - Submit a task envelope
//! - `GET /api/health` (alias `GET /health`) - Health check
//! - `GET /api/runs` - List recent runs (bearer auth)
//! - `GET /api/runs/:task/:round` - Latest run for a task and round (bearer auth)

mod auth;
mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
