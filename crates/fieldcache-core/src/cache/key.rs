use std::collections::BTreeMap;
use std::fmt;

use sha2::{Digest, Sha256};

/// Longest purpose prefix kept in a storage key
const MAX_PREFIX_LEN: usize = 40;

/// Structured cache key: a purpose plus named parameters.
///
/// Parameters are kept sorted, so the order in which they are added does not
/// change the key. Two keys address the same entry only if purpose and every
/// parameter match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    purpose: String,
    params: BTreeMap<String, String>,
}

impl QueryKey {
    pub fn new(purpose: impl Into<String>) -> Self {
        Self {
            purpose: purpose.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add a parameter, e.g. `.with("lang", "hi")`
    pub fn with(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Deterministic, filesystem-safe key used by the persisted store.
    ///
    /// Format is `<purpose>-<sha256 hex>`; the readable prefix is only a hint,
    /// the digest covers the full structure.
    pub fn storage_key(&self) -> String {
        let mut hasher = Sha256::new();
        write_field(&mut hasher, &self.purpose);
        for (name, value) in &self.params {
            write_field(&mut hasher, name);
            write_field(&mut hasher, value);
        }
        let digest = hex::encode(hasher.finalize());
        format!("{}-{}", sanitize(&self.purpose), digest)
    }
}

// Length-prefixed so that ("ab", "c") and ("a", "bc") hash differently.
fn write_field(hasher: &mut Sha256, field: &str) {
    hasher.update((field.len() as u64).to_le_bytes());
    hasher.update(field.as_bytes());
}

fn sanitize(purpose: &str) -> String {
    purpose
        .chars()
        .take(MAX_PREFIX_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.purpose)?;
        if !self.params.is_empty() {
            let params: Vec<String> = self
                .params
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect();
            write!(f, "[{}]", params.join(","))?;
        }
        Ok(())
    }
}

impl From<&str> for QueryKey {
    fn from(purpose: &str) -> Self {
        Self::new(purpose)
    }
}

impl From<String> for QueryKey {
    fn from(purpose: String) -> Self {
        Self::new(purpose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_is_deterministic() {
        let a = QueryKey::new("lesson_detail").with("id", 7).with("lang", "hi");
        let b = QueryKey::new("lesson_detail").with("lang", "hi").with("id", 7);
        assert_eq!(a, b);
        assert_eq!(a.storage_key(), b.storage_key());
    }

    #[test]
    fn test_storage_key_separates_dimensions() {
        let hi = QueryKey::new("lesson_detail").with("id", 7).with("lang", "hi");
        let en = QueryKey::new("lesson_detail").with("id", 7).with("lang", "en");
        assert_ne!(hi.storage_key(), en.storage_key());

        // A composed string purpose must not collide with a structured key
        let composed = QueryKey::new("lesson_detail_7_hi");
        assert_ne!(composed.storage_key(), hi.storage_key());

        let shifted_a = QueryKey::new("p").with("ab", "c");
        let shifted_b = QueryKey::new("p").with("a", "bc");
        assert_ne!(shifted_a.storage_key(), shifted_b.storage_key());
    }

    #[test]
    fn test_storage_key_is_file_safe() {
        let key = QueryKey::new("Dashboard Tip/of Day").with("lang", "hi");
        let storage_key = key.storage_key();
        assert!(storage_key.starts_with("dashboard_tip_of_day-"));
        assert!(storage_key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
        // prefix, dash, 64 hex chars
        assert_eq!(storage_key.len(), "dashboard_tip_of_day-".len() + 64);
    }

    #[test]
    fn test_display() {
        let key = QueryKey::new("lesson_detail").with("lang", "hi").with("id", 7);
        assert_eq!(key.to_string(), "lesson_detail[id=7,lang=hi]");
        assert_eq!(QueryKey::from("progress").to_string(), "progress");
        assert_eq!(key.param("lang"), Some("hi"));
    }
}
