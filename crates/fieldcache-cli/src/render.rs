//! Plain text rendering of query state.

use fieldcache_core::models::{LessonDetail, ProfileScore, Scheme, UserProgress};
use fieldcache_core::QueryState;

/// Status line for a query: freshness, offline marker and last error
pub fn status_line<T>(state: &QueryState<T>) -> String {
    let mut parts = Vec::new();
    if state.loading {
        parts.push("loading...".to_string());
    } else if state.refreshing {
        parts.push("refreshing...".to_string());
    }
    if let Some(age) = state.age_display() {
        parts.push(format!("updated {}", age));
    }
    if state.is_offline {
        parts.push("offline".to_string());
    }
    if let Some(error) = &state.last_error {
        parts.push(format!("{:?} error: {}", error.kind, error.message));
    }
    format!("[{}] {}", state.key, parts.join(" | "))
}

pub fn progress(progress: &UserProgress) -> String {
    let mut out = format!(
        "Lessons: {}/{} ({}%)\nCoins:   {}",
        progress.completed_lessons,
        progress.total_lessons,
        progress.completion_percent(),
        progress.user_coins
    );
    match &progress.active_quest {
        Some(quest) => {
            out.push_str(&format!("\nQuest:   {}", quest.title));
            if let Some(description) = &quest.description {
                out.push_str(&format!("\n         {}", description));
            }
        }
        None => out.push_str("\nQuest:   none active"),
    }
    out
}

pub fn lesson(detail: &LessonDetail) -> String {
    let lesson = &detail.lesson;
    let done = if detail.is_completed { " (completed)" } else { "" };
    let mut out = format!("{}{}\n{} points", lesson.title, done, lesson.points);
    if !lesson.description.is_empty() {
        out.push_str(&format!("\n\n{}", lesson.description));
    }
    if !lesson.content.is_empty() {
        out.push_str(&format!("\n\n{}", lesson.content));
    }
    out
}

pub fn schemes(schemes: &[Scheme]) -> String {
    if schemes.is_empty() {
        return "No schemes available".to_string();
    }
    schemes
        .iter()
        .map(|s| format!("- {}\n  {}", s.title, s.description))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn profile(profile: &Option<ProfileScore>) -> String {
    let Some(profile) = profile else {
        return "No profile yet. Sign in with `fieldcache login`.".to_string();
    };
    let stats = &profile.stats;
    format!(
        "Name:   {}\nCrop:   {}\nCoins:  {}  XP: {}\nScore:  {}/100 (lessons {}/{}, quests {}/{})",
        profile.name().unwrap_or("-"),
        profile.selected_crop().unwrap_or("-"),
        profile.coins(),
        profile.xp(),
        profile.sustainability_score,
        stats.completed_lessons,
        stats.total_lessons,
        stats.completed_quests,
        stats.total_quests
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldcache_core::models::{Lesson, QuestDetail};
    use fieldcache_core::QueryKey;

    fn state(loading: bool, is_offline: bool) -> QueryState<UserProgress> {
        QueryState {
            key: QueryKey::new("dashboard_progress"),
            data: None,
            loading,
            refreshing: false,
            is_offline,
            fetched_at: None,
            last_error: None,
        }
    }

    #[test]
    fn test_status_line() {
        assert_eq!(
            status_line(&state(true, false)),
            "[dashboard_progress] loading..."
        );
        assert!(status_line(&state(false, true)).ends_with("offline"));
    }

    #[test]
    fn test_progress_with_quest() {
        let text = progress(&UserProgress {
            total_lessons: 4,
            completed_lessons: 1,
            user_coins: 30,
            active_quest: Some(QuestDetail {
                id: 1,
                title: "Mulch one bed".to_string(),
                description: None,
            }),
        });
        assert!(text.contains("1/4 (25%)"));
        assert!(text.contains("Mulch one bed"));
    }

    #[test]
    fn test_lesson_marks_completed() {
        let text = lesson(&LessonDetail {
            lesson: Lesson {
                id: 7,
                title: "Soil health".to_string(),
                description: String::new(),
                content: "Test your soil.".to_string(),
                sequence: None,
                points: 20,
                theme: None,
            },
            is_completed: true,
        });
        assert!(text.starts_with("Soil health (completed)"));
    }

    #[test]
    fn test_signed_out_profile() {
        assert!(profile(&None).contains("fieldcache login"));
    }
}
