use serde::{Deserialize, Serialize};

use crate::models::{ChangeEvent, NewTask, Task, TaskId, TaskPatch};

/// Token for an optimistic insert that has no store id yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisionalToken(u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTask {
    pub title: String,
    pub notes: Option<String>,
}

/// Local, ordered copy of the task table plus the display filter.
///
/// Ordering is newest first. New rows, whether they come from a change
/// notification or from an insert response, are prepended. Every id appears
/// at most once.
#[derive(Debug, Default)]
pub struct TaskList {
    records: Vec<Task>,
    provisional: Vec<(ProvisionalToken, NewTask)>,
    next_token: u64,
    filter_text: String,
    hide_completed: bool,
    editing: Option<TaskId>,
    loaded: bool,
}

impl TaskList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Task] {
        &self.records
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.records.iter().find(|t| t.id == id)
    }

    fn position(&self, id: TaskId) -> Option<usize> {
        self.records.iter().position(|t| t.id == id)
    }

    /// Wholesale replacement in the order given. Repeated ids keep the
    /// first occurrence.
    pub fn replace_all(&mut self, tasks: Vec<Task>) {
        let mut records: Vec<Task> = Vec::with_capacity(tasks.len());
        for task in tasks {
            if !records.iter().any(|t| t.id == task.id) {
                records.push(task);
            }
        }
        self.records = records;
        if self.editing.is_some_and(|id| self.position(id).is_none()) {
            self.editing = None;
        }
        self.loaded = true;
    }

    /// Drops every row and returns to the unloaded state. Filter settings
    /// are kept.
    pub fn clear(&mut self) {
        self.records.clear();
        self.provisional.clear();
        self.editing = None;
        self.loaded = false;
    }

    /// Applies one change notification. Returns whether anything changed.
    pub fn apply_event(&mut self, event: &ChangeEvent) -> bool {
        match event {
            ChangeEvent::Insert { new } => self.insert_if_absent(new.clone()),
            ChangeEvent::Update { new } => self.replace(new.clone()),
            ChangeEvent::Delete { old } => self.remove(old.id),
        }
    }

    pub fn insert_if_absent(&mut self, task: Task) -> bool {
        if self.position(task.id).is_some() {
            return false;
        }
        self.records.insert(0, task);
        true
    }

    /// Replaces the row with the same id in place.
    pub fn replace(&mut self, task: Task) -> bool {
        match self.position(task.id) {
            Some(idx) => {
                self.records[idx] = task;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: TaskId) -> bool {
        let Some(idx) = self.position(id) else {
            return false;
        };
        self.records.remove(idx);
        if self.editing == Some(id) {
            self.editing = None;
        }
        true
    }

    /// Applies a confirmed patch and ends editing of that row.
    pub fn apply_patch(&mut self, id: TaskId, patch: &TaskPatch) -> Option<&Task> {
        if self.editing == Some(id) {
            self.editing = None;
        }
        let idx = self.position(id)?;
        patch.apply_to(&mut self.records[idx]);
        Some(&self.records[idx])
    }

    pub fn begin_provisional(&mut self, task: NewTask) -> ProvisionalToken {
        let token = ProvisionalToken(self.next_token);
        self.next_token += 1;
        self.provisional.push((token, task));
        token
    }

    /// Resolves an optimistic insert: with the authoritative row it joins
    /// the list (unless a notification already added it), without one it is
    /// rolled back.
    pub fn settle_provisional(&mut self, token: ProvisionalToken, created: Option<Task>) -> bool {
        self.provisional.retain(|(t, _)| *t != token);
        match created {
            Some(task) => self.insert_if_absent(task),
            None => false,
        }
    }

    pub fn pending(&self) -> Vec<PendingTask> {
        self.provisional
            .iter()
            .rev()
            .map(|(_, t)| PendingTask {
                title: t.title.clone(),
                notes: t.notes.clone(),
            })
            .collect()
    }

    pub fn filter_text(&self) -> &str {
        &self.filter_text
    }

    pub fn set_filter_text(&mut self, text: impl Into<String>) {
        self.filter_text = text.into();
    }

    pub fn hide_completed(&self) -> bool {
        self.hide_completed
    }

    pub fn set_hide_completed(&mut self, hide: bool) {
        self.hide_completed = hide;
    }

    pub fn editing(&self) -> Option<TaskId> {
        self.editing
    }

    pub fn begin_edit(&mut self, id: TaskId) -> bool {
        if self.position(id).is_none() {
            return false;
        }
        self.editing = Some(id);
        true
    }

    pub fn cancel_edit(&mut self) {
        self.editing = None;
    }

    /// Ends editing if `id` is the row being edited. Editing of any other
    /// row is left alone.
    pub fn cancel_edit_of(&mut self, id: TaskId) -> bool {
        if self.editing != Some(id) {
            return false;
        }
        self.editing = None;
        true
    }

    /// Rows matching the filter text (title or notes, case-insensitive),
    /// minus completed rows when those are hidden.
    pub fn visible(&self) -> Vec<&Task> {
        let needle = self.filter_text.to_lowercase();
        self.records
            .iter()
            .filter(|t| t.matches_text(&needle))
            .filter(|t| !self.hide_completed || !t.completed)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OldTask;

    fn task(id: i64, title: &str, completed: bool) -> Task {
        Task {
            id: TaskId(id),
            title: title.to_string(),
            notes: None,
            user_id: None,
            completed,
            created_at: String::new(),
        }
    }

    fn ids(list: &TaskList) -> Vec<i64> {
        list.records().iter().map(|t| t.id.0).collect()
    }

    #[test]
    fn test_replace_all_marks_loaded_and_dedups() {
        let mut list = TaskList::new();
        assert!(!list.is_loaded());

        list.replace_all(vec![task(3, "c", false), task(2, "b", false), task(3, "dup", true)]);
        assert!(list.is_loaded());
        assert_eq!(ids(&list), vec![3, 2]);
        assert_eq!(list.get(TaskId(3)).unwrap().title, "c");
    }

    #[test]
    fn test_insert_event_is_idempotent() {
        let mut list = TaskList::new();
        list.replace_all(vec![task(1, "a", false)]);

        let event = ChangeEvent::Insert { new: task(2, "b", false) };
        assert!(list.apply_event(&event));
        assert!(!list.apply_event(&event));
        assert_eq!(ids(&list), vec![2, 1]);
    }

    #[test]
    fn test_update_event_preserves_position() {
        let mut list = TaskList::new();
        list.replace_all(vec![task(3, "c", false), task(2, "b", false), task(1, "a", false)]);

        assert!(list.apply_event(&ChangeEvent::Update { new: task(2, "b edited", true) }));
        assert_eq!(ids(&list), vec![3, 2, 1]);
        assert_eq!(list.records()[1].title, "b edited");
        assert!(list.records()[1].completed);
    }

    #[test]
    fn test_update_and_delete_for_absent_id_are_noops() {
        let mut list = TaskList::new();
        list.replace_all(vec![task(1, "a", false)]);

        assert!(!list.apply_event(&ChangeEvent::Update { new: task(9, "x", false) }));
        assert!(!list.apply_event(&ChangeEvent::Delete {
            old: OldTask { id: TaskId(9), user_id: None }
        }));
        assert_eq!(ids(&list), vec![1]);
    }

    #[test]
    fn test_provisional_settles_once_in_either_order() {
        // Response first, then the notification.
        let mut list = TaskList::new();
        list.replace_all(Vec::new());
        let token = list.begin_provisional(NewTask::new("Buy milk"));
        assert_eq!(list.pending().len(), 1);
        assert!(list.settle_provisional(token, Some(task(5, "Buy milk", false))));
        assert!(!list.apply_event(&ChangeEvent::Insert { new: task(5, "Buy milk", false) }));
        assert_eq!(ids(&list), vec![5]);
        assert!(list.pending().is_empty());

        // Notification first, then the response.
        let mut list = TaskList::new();
        list.replace_all(Vec::new());
        let token = list.begin_provisional(NewTask::new("Buy milk"));
        assert!(list.apply_event(&ChangeEvent::Insert { new: task(5, "Buy milk", false) }));
        assert!(!list.settle_provisional(token, Some(task(5, "Buy milk", false))));
        assert_eq!(ids(&list), vec![5]);
        assert!(list.pending().is_empty());
    }

    #[test]
    fn test_failed_provisional_is_rolled_back() {
        let mut list = TaskList::new();
        list.replace_all(vec![task(1, "a", false)]);
        let token = list.begin_provisional(NewTask::new("never stored"));

        assert!(!list.settle_provisional(token, None));
        assert!(list.pending().is_empty());
        assert_eq!(ids(&list), vec![1]);
    }

    #[test]
    fn test_apply_patch_clears_editing_marker() {
        let mut list = TaskList::new();
        list.replace_all(vec![task(1, "a", false), task(2, "b", false)]);
        assert!(list.begin_edit(TaskId(1)));
        assert!(!list.begin_edit(TaskId(7)));

        let patched = list.apply_patch(TaskId(1), &TaskPatch::completed(true)).unwrap();
        assert!(patched.completed);
        assert_eq!(list.editing(), None);
    }

    #[test]
    fn test_cancel_edit_of_only_ends_matching_row() {
        let mut list = TaskList::new();
        list.replace_all(vec![task(1, "a", false), task(2, "b", false)]);
        list.begin_edit(TaskId(2));

        assert!(!list.cancel_edit_of(TaskId(1)));
        assert_eq!(list.editing(), Some(TaskId(2)));

        assert!(list.cancel_edit_of(TaskId(2)));
        assert_eq!(list.editing(), None);
    }

    #[test]
    fn test_visible_filters_text_and_completed() {
        let mut list = TaskList::new();
        list.replace_all(vec![task(1, "Buy milk", false), task(2, "Call Al", true)]);

        list.set_filter_text("al");
        let visible: Vec<i64> = list.visible().iter().map(|t| t.id.0).collect();
        assert_eq!(visible, vec![2]);

        list.set_hide_completed(true);
        assert!(list.visible().is_empty());

        list.set_filter_text("");
        let visible: Vec<i64> = list.visible().iter().map(|t| t.id.0).collect();
        assert_eq!(visible, vec![1]);
    }

    #[test]
    fn test_visible_matches_notes() {
        let mut list = TaskList::new();
        let mut groceries = task(1, "Groceries", false);
        groceries.notes = Some("remember the ALMONDS".to_string());
        list.replace_all(vec![groceries, task(2, "Dentist", false)]);

        list.set_filter_text("al");
        let visible: Vec<i64> = list.visible().iter().map(|t| t.id.0).collect();
        assert_eq!(visible, vec![1]);
    }

    #[test]
    fn test_clear_returns_to_unloaded_but_keeps_filter() {
        let mut list = TaskList::new();
        list.set_filter_text("milk");
        list.replace_all(vec![task(1, "Buy milk", false)]);
        list.begin_provisional(NewTask::new("pending"));

        list.clear();
        assert!(!list.is_loaded());
        assert!(list.is_empty());
        assert!(list.pending().is_empty());
        assert_eq!(list.filter_text(), "milk");
    }
}
