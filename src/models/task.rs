use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct TaskId(pub i64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub created_at: String,
}

impl Task {
    /// Case-insensitive substring match against title or notes.
    pub fn matches_text(&self, needle_lower: &str) -> bool {
        if needle_lower.is_empty() {
            return true;
        }
        self.title.to_lowercase().contains(needle_lower)
            || self
                .notes
                .as_deref()
                .is_some_and(|n| n.to_lowercase().contains(needle_lower))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self { title: title.into(), notes: None }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Trimmed copy, or `None` when the title is blank.
    pub fn normalized(&self) -> Option<NewTask> {
        let title = self.title.trim();
        if title.is_empty() {
            return None;
        }
        Some(NewTask {
            title: title.to_string(),
            notes: normalize_notes(self.notes.as_deref()),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl TaskPatch {
    pub fn completed(value: bool) -> Self {
        Self {
            completed: Some(value),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.notes.is_none() && self.completed.is_none()
    }

    /// Trimmed copy, or `None` when the patch would blank the title.
    pub fn normalized(&self) -> Option<TaskPatch> {
        let title = match self.title.as_deref().map(str::trim) {
            Some("") => return None,
            other => other.map(str::to_string),
        };
        Some(TaskPatch {
            title,
            notes: self.notes.as_deref().map(|n| n.trim().to_string()),
            completed: self.completed,
        })
    }

    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(notes) = &self.notes {
            task.notes = normalize_notes(Some(notes));
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
    }
}

fn normalize_notes(notes: Option<&str>) -> Option<String> {
    notes
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

/// Row identity carried by DELETE notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OldTask {
    pub id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "UPPERCASE")]
pub enum ChangeEvent {
    Insert { new: Task },
    Update { new: Task },
    Delete { old: OldTask },
}

impl ChangeEvent {
    pub fn id(&self) -> TaskId {
        match self {
            ChangeEvent::Insert { new } | ChangeEvent::Update { new } => new.id,
            ChangeEvent::Delete { old } => old.id,
        }
    }

    pub fn owner(&self) -> Option<&str> {
        match self {
            ChangeEvent::Insert { new } | ChangeEvent::Update { new } => new.user_id.as_deref(),
            ChangeEvent::Delete { old } => old.user_id.as_deref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Insert { .. } => "INSERT",
            ChangeEvent::Update { .. } => "UPDATE",
            ChangeEvent::Delete { .. } => "DELETE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: i64, title: &str) -> Task {
        Task {
            id: TaskId(id),
            title: title.to_string(),
            notes: None,
            user_id: None,
            completed: false,
            created_at: String::new(),
        }
    }

    #[test]
    fn test_new_task_whitespace_is_declined() {
        assert!(NewTask::new("   \t ").normalized().is_none());
        assert!(NewTask::new("").with_notes("  ").normalized().is_none());
    }

    #[test]
    fn test_new_task_trims_and_drops_blank_notes() {
        let n = NewTask::new("  Buy milk ").with_notes("   ").normalized().unwrap();
        assert_eq!(n.title, "Buy milk");
        assert_eq!(n.notes, None);
    }

    #[test]
    fn test_patch_blank_title_is_declined() {
        let patch = TaskPatch {
            title: Some("  ".to_string()),
            ..TaskPatch::default()
        };
        assert!(patch.normalized().is_none());
        assert!(TaskPatch::completed(true).normalized().is_some());
    }

    #[test]
    fn test_patch_apply_keeps_untouched_fields() {
        let mut t = task(1, "Call Al");
        t.notes = Some("after lunch".to_string());
        TaskPatch::completed(true).apply_to(&mut t);
        assert!(t.completed);
        assert_eq!(t.title, "Call Al");
        assert_eq!(t.notes.as_deref(), Some("after lunch"));
    }

    #[test]
    fn test_matches_text_checks_notes() {
        let mut t = task(1, "Groceries");
        t.notes = Some("Oat MILK".to_string());
        assert!(t.matches_text("milk"));
        assert!(!t.matches_text("bread"));
        assert!(t.matches_text(""));
    }

    #[test]
    fn test_change_event_wire_shape() {
        let insert: ChangeEvent = serde_json::from_value(serde_json::json!({
            "eventType": "INSERT",
            "new": { "id": 7, "title": "Water plants", "completed": false }
        }))
        .unwrap();
        assert_eq!(insert.id(), TaskId(7));
        assert_eq!(insert.kind(), "INSERT");

        let delete: ChangeEvent = serde_json::from_value(serde_json::json!({
            "eventType": "DELETE",
            "old": { "id": 7 }
        }))
        .unwrap();
        assert_eq!(delete, ChangeEvent::Delete { old: OldTask { id: TaskId(7), user_id: None } });
    }
}
