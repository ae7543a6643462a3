use serde::{Deserialize, Serialize};

/// Dashboard summary for the signed-in farmer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProgress {
    pub total_lessons: u64,
    pub completed_lessons: u64,
    pub user_coins: i64,
    pub active_quest: Option<QuestDetail>,
}

impl UserProgress {
    /// Completed lessons as a whole percentage, 0 when there are no lessons
    pub fn completion_percent(&self) -> u32 {
        if self.total_lessons == 0 {
            return 0;
        }
        let completed = self.completed_lessons.min(self.total_lessons);
        ((completed as f64 / self.total_lessons as f64) * 100.0).round() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestDetail {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Row of `user_quests` with the quest embedded.
#[derive(Debug, Deserialize)]
pub(crate) struct UserQuestRow {
    #[allow(dead_code)]
    pub status: Option<String>,
    pub quest: Option<QuestDetail>,
}

/// Row of `profiles` when only coins are selected.
#[derive(Debug, Deserialize)]
pub(crate) struct CoinsRow {
    pub coins: Option<i64>,
}
