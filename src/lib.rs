//! # CodeCollab
//!
//! Backend for a real-time collaborative code editor: authenticated
//! participants share rooms, edit one buffer together, chat, and run the
//! buffer inside sandboxed containers.
//!
//! ## Architecture
//!
//! - `models`: persistent entities and their validation rules
//! - `repository`: narrow persistence capability (Postgres / in-memory)
//! - `auth`: bearer tokens and password verifiers
//! - `ratelimit`: sliding-window ceilings per traffic class
//! - `ot`: operational transformation for convergent concurrent editing
//! - `hub`: per-room serializers, broadcast fan-out, execution latch
//! - `ws`: WebSocket gateway and the `{event, data}` wire vocabulary
//! - `queue`: at-least-once execution job queue with retries and DLQ
//! - `sandbox`: container lifecycle, language table, security scan
//! - `worker`: queue consumers driving the sandbox and publishing results
//! - `api`: HTTP surface (auth, rooms, execution, activity, health)

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod hub;
pub mod models;
pub mod ot;
pub mod queue;
pub mod ratelimit;
pub mod repository;
pub mod sandbox;
pub mod services;
pub mod worker;
pub mod ws;

pub use config::Config;
pub use error::{AppError, AppResult, ErrorCode};
pub use services::AppServices;

/// Crate version, surfaced by the health endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
