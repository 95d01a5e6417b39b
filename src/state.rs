use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use crate::events::{StatePayload, SyncStatus};
use crate::models::{normalize_tags, Settings, Task, TaskList, DEFAULT_LIST_ID};
use crate::storage::Snapshot;
use crate::sync::{Change, PendingChange, PendingQueue};
use crate::workflow::WorkflowRule;

/// Shared in-memory store. Performs no I/O; `TaskStore` persists after each mutation.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Mutex<AppData>>,
}

#[derive(Debug)]
struct AppData {
    tasks: Vec<Task>,
    lists: Vec<TaskList>,
    tags: Vec<String>,
    pending: PendingQueue,
    rules: Vec<WorkflowRule>,
    settings: Settings,
    status: SyncStatus,
}

impl AppState {
    pub fn new(snapshot: Snapshot, pending_limit: usize) -> Self {
        let mut data = AppData {
            tasks: snapshot.tasks,
            lists: snapshot.lists,
            tags: Vec::new(),
            pending: PendingQueue::new(snapshot.pending, pending_limit),
            rules: snapshot.rules,
            settings: snapshot.settings,
            status: SyncStatus::default(),
        };
        data.tags = normalize_tags(&snapshot.tags);
        data.repair();
        data.status.pending = data.pending.len();
        Self {
            inner: Arc::new(Mutex::new(data)),
        }
    }

    fn data(&self) -> MutexGuard<'_, AppData> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn payload(&self) -> StatePayload {
        let guard = self.data();
        StatePayload {
            tasks: guard.tasks.clone(),
            lists: guard.lists.clone(),
            tags: guard.tags.clone(),
        }
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.data().tasks.clone()
    }

    pub fn task(&self, task_id: &str) -> Option<Task> {
        self.data().tasks.iter().find(|t| t.id == task_id).cloned()
    }

    pub fn lists(&self) -> Vec<TaskList> {
        self.data().lists.clone()
    }

    pub fn list(&self, list_id: &str) -> Option<TaskList> {
        self.data().lists.iter().find(|l| l.id == list_id).cloned()
    }

    pub fn has_list(&self, list_id: &str) -> bool {
        self.data().lists.iter().any(|l| l.id == list_id)
    }

    pub fn tags(&self) -> Vec<String> {
        self.data().tags.clone()
    }

    pub fn rules(&self) -> Vec<WorkflowRule> {
        self.data().rules.clone()
    }

    pub fn settings(&self) -> Settings {
        self.data().settings.clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.data().status.clone()
    }

    pub fn pending(&self) -> Vec<PendingChange> {
        self.data().pending.entries().to_vec()
    }

    /// Highest position in a list plus one.
    pub fn next_position(&self, list_id: &str) -> i64 {
        self.data()
            .tasks
            .iter()
            .filter(|t| t.list_id == list_id)
            .map(|t| t.position)
            .max()
            .map_or(0, |p| p + 1)
    }

    pub fn add_task(&self, task: Task) {
        let mut guard = self.data();
        guard.register_tags(&task.tags);
        guard.tasks.push(task);
    }

    /// Replaces the task with the same id. Returns false when it does not exist.
    pub fn update_task(&self, task: Task) -> bool {
        let mut guard = self.data();
        guard.register_tags(&task.tags);
        match guard.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => {
                *existing = task;
                true
            }
            None => false,
        }
    }

    pub fn remove_task(&self, task_id: &str) -> Option<Task> {
        let mut guard = self.data();
        let index = guard.tasks.iter().position(|t| t.id == task_id)?;
        Some(guard.tasks.remove(index))
    }

    /// Replaces local collections wholesale (remote pull, import). The default list and
    /// list membership invariants are restored afterwards.
    pub fn replace_all(&self, tasks: Vec<Task>, lists: Vec<TaskList>, tags: Option<Vec<String>>) {
        let mut guard = self.data();
        guard.tasks = tasks;
        guard.lists = lists;
        if let Some(tags) = tags {
            guard.tags = normalize_tags(&tags);
        }
        guard.repair();
    }

    pub fn add_list(&self, list: TaskList) {
        self.data().lists.push(list);
    }

    pub fn update_list(&self, list: TaskList) -> bool {
        let mut guard = self.data();
        match guard.lists.iter_mut().find(|l| l.id == list.id) {
            Some(existing) => {
                *existing = list;
                true
            }
            None => false,
        }
    }

    /// Removes a list and moves its tasks to the default list. Returns the moved tasks.
    /// The default list itself is never removed.
    pub fn remove_list(&self, list_id: &str) -> Option<Vec<Task>> {
        if list_id == DEFAULT_LIST_ID {
            return None;
        }
        let mut guard = self.data();
        let index = guard.lists.iter().position(|l| l.id == list_id)?;
        guard.lists.remove(index);
        let now = Utc::now();
        let mut next = guard
            .tasks
            .iter()
            .filter(|t| t.list_id == DEFAULT_LIST_ID)
            .map(|t| t.position)
            .max()
            .map_or(0, |p| p + 1);
        let mut moved = Vec::new();
        for task in guard.tasks.iter_mut().filter(|t| t.list_id == list_id) {
            task.list_id = DEFAULT_LIST_ID.to_string();
            task.position = next;
            task.updated_at = now;
            next += 1;
            moved.push(task.clone());
        }
        Some(moved)
    }

    /// Registers a tag. Returns false when it was already known.
    pub fn add_tag(&self, tag: String) -> bool {
        let mut guard = self.data();
        if guard.tags.contains(&tag) {
            return false;
        }
        guard.tags.push(tag);
        true
    }

    /// Drops a tag from the registry and from every task. Returns the changed tasks.
    pub fn remove_tag(&self, tag: &str) -> Vec<Task> {
        let mut guard = self.data();
        guard.tags.retain(|t| t != tag);
        let now = Utc::now();
        let mut changed = Vec::new();
        for task in guard.tasks.iter_mut() {
            let before = task.tags.len();
            task.tags.retain(|t| t != tag);
            if task.tags.len() != before {
                task.updated_at = now;
                changed.push(task.clone());
            }
        }
        changed
    }

    pub fn swap_positions(&self, first_id: &str, second_id: &str) -> Option<(Task, Task)> {
        let mut guard = self.data();
        let first_index = guard.tasks.iter().position(|t| t.id == first_id)?;
        let second_index = guard.tasks.iter().position(|t| t.id == second_id)?;
        let now = Utc::now();
        let first_position = guard.tasks[first_index].position;
        guard.tasks[first_index].position = guard.tasks[second_index].position;
        guard.tasks[second_index].position = first_position;
        guard.tasks[first_index].updated_at = now;
        guard.tasks[second_index].updated_at = now;
        Some((
            guard.tasks[first_index].clone(),
            guard.tasks[second_index].clone(),
        ))
    }

    pub fn enqueue(&self, change: Change) {
        let mut guard = self.data();
        guard.pending.enqueue(change);
        guard.status.pending = guard.pending.len();
    }

    /// Marks the oldest queued change as in flight. It stays in the persisted queue until
    /// `complete_pending` or `release_pending`.
    pub fn begin_pending(&self) -> Option<PendingChange> {
        self.data().pending.begin_next()
    }

    pub fn complete_pending(&self, entry_id: &str) {
        let mut guard = self.data();
        guard.pending.complete(entry_id);
        guard.status.pending = guard.pending.len();
    }

    pub fn release_pending(&self, entry_id: &str) {
        self.data().pending.release(entry_id);
    }

    pub fn has_pending(&self) -> bool {
        !self.data().pending.is_empty()
    }

    /// True when a queued change still carries a newer local copy of the task.
    pub fn task_has_pending(&self, task_id: &str) -> bool {
        self.data().pending.mentions_task(task_id)
    }

    pub fn list_has_pending(&self, list_id: &str) -> bool {
        self.data().pending.mentions_list(list_id)
    }

    pub fn set_rules(&self, rules: Vec<WorkflowRule>) {
        self.data().rules = rules;
    }

    pub fn update_settings(&self, settings: Settings) {
        self.data().settings = settings;
    }

    pub fn update_status<F: FnOnce(&mut SyncStatus)>(&self, f: F) -> SyncStatus {
        let mut guard = self.data();
        f(&mut guard.status);
        guard.status.pending = guard.pending.len();
        guard.status.clone()
    }
}

impl AppData {
    fn register_tags(&mut self, tags: &[String]) {
        for tag in tags {
            if !self.tags.contains(tag) {
                self.tags.push(tag.clone());
            }
        }
    }

    /// Restores load invariants: the default list exists, every task points at a known
    /// list, and task tags are normalized and registered.
    fn repair(&mut self) {
        if !self.lists.iter().any(|l| l.id == DEFAULT_LIST_ID) {
            self.lists.insert(0, TaskList::default_list(Utc::now()));
        }
        let known: Vec<String> = self.lists.iter().map(|l| l.id.clone()).collect();
        let mut all_tags = Vec::new();
        for task in &mut self.tasks {
            if !known.contains(&task.list_id) {
                log::warn!(
                    "task={} referenced unknown list={}; moved to default list",
                    task.id,
                    task.list_id
                );
                task.list_id = DEFAULT_LIST_ID.to_string();
            }
            task.tags = normalize_tags(&task.tags);
            all_tags.extend(task.tags.iter().cloned());
        }
        self.register_tags(&all_tags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;
    use crate::sync::DEFAULT_PENDING_LIMIT;

    fn make_task(id: &str, list_id: &str, position: i64) -> Task {
        let now = Utc::now();
        Task {
            id: id.to_string(),
            title: format!("task-{id}"),
            description: None,
            completed: false,
            completed_at: None,
            priority: Priority::Medium,
            due_date: None,
            list_id: list_id.to_string(),
            tags: Vec::new(),
            subtasks: Vec::new(),
            created_at: now,
            updated_at: now,
            position,
            column_id: None,
        }
    }

    fn make_list(id: &str) -> TaskList {
        TaskList {
            id: id.to_string(),
            name: id.to_string(),
            color: "#000".into(),
            created_at: Utc::now(),
        }
    }

    fn state_with(tasks: Vec<Task>, lists: Vec<TaskList>) -> AppState {
        AppState::new(
            Snapshot {
                tasks,
                lists,
                ..Snapshot::default()
            },
            DEFAULT_PENDING_LIMIT,
        )
    }

    #[test]
    fn empty_snapshot_gets_default_list() {
        let state = state_with(Vec::new(), Vec::new());
        let lists = state.lists();
        assert_eq!(lists.len(), 1);
        assert!(lists[0].is_default());
        assert!(state.tasks().is_empty());
    }

    #[test]
    fn load_repairs_orphans_and_tags() {
        let mut task = make_task("a", "gone", 0);
        task.tags = vec!["Work".into(), "work".into(), "Home".into()];
        let state = state_with(vec![task], vec![make_list("other")]);
        let loaded = state.task("a").unwrap();
        assert_eq!(loaded.list_id, DEFAULT_LIST_ID);
        assert_eq!(loaded.tags, vec!["work", "home"]);
        assert_eq!(state.tags(), vec!["work", "home"]);
        assert_eq!(state.lists().len(), 2);
    }

    #[test]
    fn remove_list_moves_tasks_to_default_and_protects_default() {
        let state = state_with(
            vec![
                make_task("a", DEFAULT_LIST_ID, 4),
                make_task("b", "work", 0),
                make_task("c", "work", 1),
            ],
            vec![make_list("work")],
        );
        let moved = state.remove_list("work").expect("list exists");
        assert_eq!(moved.len(), 2);
        assert!(state.tasks().iter().all(|t| t.list_id == DEFAULT_LIST_ID));
        assert_eq!(state.task("b").unwrap().position, 5);
        assert_eq!(state.task("c").unwrap().position, 6);
        assert!(!state.has_list("work"));

        assert!(state.remove_list(DEFAULT_LIST_ID).is_none());
        assert!(state.has_list(DEFAULT_LIST_ID));
        assert!(state.remove_list("missing").is_none());
    }

    #[test]
    fn add_and_remove_tag() {
        let mut a = make_task("a", DEFAULT_LIST_ID, 0);
        a.tags = vec!["work".into()];
        let b = make_task("b", DEFAULT_LIST_ID, 1);
        let state = state_with(vec![a, b], Vec::new());

        assert!(!state.add_tag("work".into()));
        assert!(state.add_tag("home".into()));

        let changed = state.remove_tag("work");
        assert_eq!(changed.len(), 1);
        assert!(state.tasks().iter().all(|t| t.tags.is_empty()));
        assert_eq!(state.tags(), vec!["home"]);
    }

    #[test]
    fn swap_positions_success_and_failure() {
        let state = state_with(
            vec![make_task("a", DEFAULT_LIST_ID, 100), make_task("b", DEFAULT_LIST_ID, 200)],
            Vec::new(),
        );
        let (a, b) = state.swap_positions("a", "b").unwrap();
        assert_eq!(a.position, 200);
        assert_eq!(b.position, 100);
        assert!(state.swap_positions("a", "missing").is_none());
    }

    #[test]
    fn next_position_is_per_list() {
        let state = state_with(
            vec![make_task("a", DEFAULT_LIST_ID, 3), make_task("b", "work", 9)],
            vec![make_list("work")],
        );
        assert_eq!(state.next_position(DEFAULT_LIST_ID), 4);
        assert_eq!(state.next_position("work"), 10);
        assert_eq!(state.next_position("empty"), 0);
    }

    #[test]
    fn in_flight_change_stays_queued_until_completed() {
        let state = state_with(Vec::new(), Vec::new());
        state.enqueue(Change::DeleteTask {
            task_id: "a".into(),
        });
        let sent = state.begin_pending().unwrap();
        assert_eq!(state.pending().len(), 1);

        state.enqueue(Change::DeleteTask {
            task_id: "b".into(),
        });
        assert_eq!(state.status().pending, 2);
        assert!(state.task_has_pending("a"));

        state.complete_pending(&sent.id);
        assert_eq!(state.status().pending, 1);
        assert!(!state.task_has_pending("a"));
        assert!(state.task_has_pending("b"));

        let sent = state.begin_pending().unwrap();
        state.release_pending(&sent.id);
        assert_eq!(state.pending()[0].attempts, 1);
        assert!(state.has_pending());
    }
}
