//! # HTTP API
//!
//! Thin request layer over the repository, the hub, and the rate limiter:
//! auth, room CRUD, execution submission, chat and execution history,
//! activity stats, and health probes. All success responses use the
//! `{success: true, data}` envelope; failures map through
//! [`crate::error::AppError`].

mod handlers;
mod middleware;
mod responses;
mod routes;

pub use middleware::{client_ip, AuthUser};
pub use responses::ApiResponse;
pub use routes::router;
