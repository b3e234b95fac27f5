//! HTTP API handlers
//!
//! REST endpoints for the catalog and background workflows, plus the SSE
//! event stream.

pub mod catalog;
pub mod health;
pub mod sse;
pub mod workflow;

pub use catalog::catalog_routes;
pub use health::health_routes;
pub use sse::event_stream;
pub use workflow::workflow_routes;
