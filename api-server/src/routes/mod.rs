//! HTTP route handlers.
//!
//! Handlers are annotated with `#[openapi]` so `rocket_okapi` can derive the
//! OpenAPI document automatically.

pub mod health;
pub mod params;
pub mod posts;
