//! HTTP middleware stack: bearer authentication, CORS and request tracing.

pub mod auth;
pub mod cors;
pub mod trace;
