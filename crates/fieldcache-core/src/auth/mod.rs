//! Session management.
//!
//! `Session` holds the access token from a password sign-in and persists it
//! in the cache directory until it expires.

pub mod session;

pub use session::{Session, SessionData};
