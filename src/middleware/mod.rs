//! Middleware for the Barterly API
//!
//! This module provides request tracing and authentication extractors.

pub mod auth;
mod tracing;

pub use self::tracing::request_tracing;
