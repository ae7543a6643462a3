//! Data models for the learning app's remote records.
//!
//! - `UserProgress`, `QuestDetail`: dashboard summary
//! - `Lesson`, `LessonDetail`: lesson text per language
//! - `Scheme`: government scheme listing
//! - `ProfileScore`, `ProfileStats`: profile and sustainability score

pub mod lesson;
pub mod profile;
pub mod progress;
pub mod scheme;

pub use lesson::{Lesson, LessonDetail};
pub use profile::{ProfileScore, ProfileStats};
pub use progress::{QuestDetail, UserProgress};
pub use scheme::Scheme;

/// Language used when a translation is missing
pub const DEFAULT_LANGUAGE: &str = "en";
