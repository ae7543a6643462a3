//! REST API client module for the hosted data service.
//!
//! This module provides the `ApiClient` used by fetchers to read progress,
//! lesson, scheme and profile records, plus password sign-in.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
