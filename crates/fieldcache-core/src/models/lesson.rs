use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::DEFAULT_LANGUAGE;

/// A lesson with its text in one language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub content: String,
    pub sequence: Option<i64>,
    pub points: i64,
    pub theme: Option<String>,
}

impl Lesson {
    /// Build a lesson from a raw `lessons` row.
    ///
    /// Text columns are per language (`title_hi`, `content_hi`, ...); missing
    /// or empty columns fall back to the default language.
    pub fn from_row(row: &Map<String, Value>, lang: &str) -> Result<Self> {
        let id = row
            .get("id")
            .and_then(Value::as_i64)
            .context("Lesson row has no id")?;

        Ok(Self {
            id,
            title: localized(row, "title", lang).unwrap_or_else(|| "Lesson".to_string()),
            description: localized(row, "description", lang).unwrap_or_default(),
            content: localized(row, "content", lang).unwrap_or_default(),
            sequence: row.get("sequence").and_then(Value::as_i64),
            points: row.get("points").and_then(Value::as_i64).unwrap_or(0),
            theme: row.get("theme").and_then(Value::as_str).map(String::from),
        })
    }
}

fn localized(row: &Map<String, Value>, field: &str, lang: &str) -> Option<String> {
    let text = |lang: &str| {
        row.get(&format!("{}_{}", field, lang))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };
    text(lang).or_else(|| text(DEFAULT_LANGUAGE))
}

/// Lesson screen data: the lesson plus whether the user finished it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonDetail {
    pub lesson: Lesson,
    pub is_completed: bool,
}
