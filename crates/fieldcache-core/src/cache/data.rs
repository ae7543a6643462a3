use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A value together with the time it was fetched.
///
/// This is also the on-disk format of every persisted entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_display(&self) -> String {
        age_display(self.cached_at)
    }
}

/// True when `cached_at` is less than `window` ago.
pub fn is_within(cached_at: DateTime<Utc>, window: Duration) -> bool {
    Utc::now() - cached_at < window
}

/// Human readable age of a timestamp ("just now", "5m ago", "2h ago", "3d ago").
pub fn age_display(cached_at: DateTime<Utc>) -> String {
    let minutes = (Utc::now() - cached_at).num_minutes();
    if minutes < 1 {
        // Also covers clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        if minutes % 60 >= 30 {
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        let days = minutes / 1440;
        if (minutes % 1440) / 60 >= 12 {
            format!("{}d ago", days + 1)
        } else {
            format!("{}d ago", days)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_display_just_now() {
        let cached = CachedData::new(vec![1, 2, 3]);
        assert_eq!(cached.age_display(), "just now");
    }

    #[test]
    fn test_age_display_rounding() {
        let now = Utc::now();
        assert_eq!(age_display(now - Duration::minutes(5)), "5m ago");
        assert_eq!(age_display(now - Duration::minutes(95)), "2h ago");
        assert_eq!(age_display(now - Duration::minutes(70)), "1h ago");
        assert_eq!(age_display(now - Duration::hours(60)), "3d ago");
        assert_eq!(age_display(now + Duration::minutes(10)), "just now");
    }

    #[test]
    fn test_is_within() {
        let fetched_at = Utc::now() - Duration::minutes(10);
        assert!(is_within(fetched_at, Duration::minutes(15)));
        assert!(!is_within(fetched_at, Duration::minutes(5)));
    }

    #[test]
    fn test_serialized_shape() {
        let cached = CachedData::new(serde_json::json!({"completed": 3}));
        let value = serde_json::to_value(&cached).unwrap();
        assert_eq!(value["data"]["completed"], 3);
        assert!(value["cached_at"].is_string());
    }
}
