//! Building blocks shared by imagehub services.
//!
//! Environment configuration, tracing setup, HTTP middleware and probes,
//! and timestamp formatting. No service-specific types live here.

pub mod config;
pub mod health;
pub mod middleware;
pub mod serde;
pub mod tracing;
