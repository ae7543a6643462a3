use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Share of the sustainability score earned by lessons, in percent.
const LESSON_WEIGHT: f64 = 0.6;

/// Share of the sustainability score earned by quests, in percent.
const QUEST_WEIGHT: f64 = 0.4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileStats {
    pub completed_lessons: u64,
    pub total_lessons: u64,
    pub completed_quests: u64,
    pub total_quests: u64,
}

impl ProfileStats {
    /// Weighted score from 0 to 100: lessons count 60%, quests 40%.
    pub fn sustainability_score(&self) -> u32 {
        let ratio = |done: u64, total: u64| {
            if total == 0 {
                0.0
            } else {
                done as f64 / total as f64
            }
        };
        let lessons = ratio(self.completed_lessons, self.total_lessons);
        let quests = ratio(self.completed_quests, self.total_quests);
        (lessons * 100.0 * LESSON_WEIGHT + quests * 100.0 * QUEST_WEIGHT).round() as u32
    }
}

/// Profile screen data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileScore {
    /// The raw `profiles` row
    pub profile: Map<String, Value>,
    pub sustainability_score: u32,
    pub stats: ProfileStats,
}

impl ProfileScore {
    pub fn new(profile: Map<String, Value>, stats: ProfileStats) -> Self {
        Self {
            profile,
            sustainability_score: stats.sustainability_score(),
            stats,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.text("full_name").or_else(|| self.text("name"))
    }

    pub fn selected_crop(&self) -> Option<&str> {
        self.text("selected_crop")
    }

    pub fn coins(&self) -> i64 {
        self.profile.get("coins").and_then(Value::as_i64).unwrap_or(0)
    }

    pub fn xp(&self) -> i64 {
        self.profile.get("xp").and_then(Value::as_i64).unwrap_or(0)
    }

    fn text(&self, field: &str) -> Option<&str> {
        self.profile.get(field).and_then(Value::as_str)
    }
}
