use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, Utc};
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::events::{StoreEvent, SyncStatus, EVENT_CHANNEL_CAPACITY};
use crate::filter::{self, TaskFilter};
use crate::models::{
    new_id, normalize_tag, normalize_tags, ListPatch, NewList, NewTask, NotificationPermission,
    Settings, Subtask, Task, TaskList, TaskPatch, DEFAULT_LIST_COLOR, DEFAULT_LIST_ID,
};
use crate::remote::{RemoteBackend, RemoteError};
use crate::scheduler::{NotificationRecord, NotificationScheduler, Notifier};
use crate::state::AppState;
use crate::storage::{
    Storage, StorageError, KEY_LISTS, KEY_PENDING, KEY_SETTINGS, KEY_TAGS, KEY_TASKS,
    KEY_WORKFLOW_RULES,
};
use crate::sync::{apply_change, Change, Confirmed, PendingChange};
use crate::transfer::{self, ExportDocument, ImportError};
use crate::workflow::{self, WorkflowRule};

#[derive(Debug)]
pub enum StoreError {
    Storage(StorageError),
    Import(ImportError),
    NotFound { kind: &'static str, id: String },
    DefaultListProtected,
    Invalid(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Storage(err) => write!(f, "storage error: {err}"),
            StoreError::Import(err) => write!(f, "{err}"),
            StoreError::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            StoreError::DefaultListProtected => write!(f, "the default list cannot be deleted"),
            StoreError::Invalid(message) => write!(f, "invalid input: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<StorageError> for StoreError {
    fn from(value: StorageError) -> Self {
        StoreError::Storage(value)
    }
}

impl From<ImportError> for StoreError {
    fn from(value: ImportError) -> Self {
        StoreError::Import(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        StoreError::Storage(StorageError::Json(value))
    }
}

fn not_found(kind: &'static str, id: &str) -> StoreError {
    StoreError::NotFound {
        kind,
        id: id.to_string(),
    }
}

fn required(field: &str, value: &str) -> Result<String, StoreError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(StoreError::Invalid(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

fn tag_arg(raw: &str) -> Result<String, StoreError> {
    normalize_tag(raw).ok_or_else(|| StoreError::Invalid("tag must not be empty".into()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub tasks: usize,
    pub lists: usize,
    pub tags: usize,
}

/// Offline-first façade over the task collections.
///
/// Every mutation is applied to memory and written to disk before the remote backend is
/// contacted. When the backend is unreachable the change lands in the pending queue and
/// is replayed by [`TaskStore::sync_now`]. Remote failures are logged, never returned.
pub struct TaskStore {
    state: AppState,
    storage: Storage,
    remote: Option<Arc<dyn RemoteBackend>>,
    scheduler: NotificationScheduler,
    events: broadcast::Sender<StoreEvent>,
    sync_lock: tokio::sync::Mutex<()>,
}

impl TaskStore {
    /// Loads persisted state from `config.data_dir`. Must be called inside a tokio runtime
    /// since reminders are scheduled immediately.
    pub async fn open(
        config: &AppConfig,
        remote: Option<Arc<dyn RemoteBackend>>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, StoreError> {
        let storage = Storage::new(config.data_dir.clone());
        Self::open_with_storage(storage, config.pending_limit, remote, notifier).await
    }

    pub async fn open_with_storage(
        storage: Storage,
        pending_limit: usize,
        remote: Option<Arc<dyn RemoteBackend>>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, StoreError> {
        storage.ensure_dirs()?;
        let snapshot = storage.load_snapshot();
        let state = AppState::new(snapshot, pending_limit);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let settings = state.settings();
        let scheduler = NotificationScheduler::new(
            notifier,
            storage.clone(),
            events.clone(),
            settings.reminder_lead_minutes,
            settings.notification_permission == NotificationPermission::Granted,
        );
        scheduler.rebuild(&state.tasks());
        log::info!(
            "store opened root={} tasks={} lists={} pending={}",
            storage.root().display(),
            state.tasks().len(),
            state.lists().len(),
            state.status().pending
        );
        Ok(Self {
            state,
            storage,
            remote,
            scheduler,
            events,
            sync_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.state.tasks()
    }

    pub fn task(&self, task_id: &str) -> Option<Task> {
        self.state.task(task_id)
    }

    pub fn lists(&self) -> Vec<TaskList> {
        self.state.lists()
    }

    pub fn tags(&self) -> Vec<String> {
        self.state.tags()
    }

    pub fn rules(&self) -> Vec<WorkflowRule> {
        self.state.rules()
    }

    pub fn pending(&self) -> Vec<PendingChange> {
        self.state.pending()
    }

    pub fn status(&self) -> SyncStatus {
        self.state.status()
    }

    pub fn settings(&self) -> Settings {
        self.state.settings()
    }

    pub fn notification_history(&self) -> Vec<NotificationRecord> {
        self.scheduler.history()
    }

    pub fn scheduled_reminders(&self) -> Vec<String> {
        self.scheduler.scheduled_ids()
    }

    pub fn filtered(&self, filter: &TaskFilter) -> Vec<Task> {
        filter::apply(&self.state.tasks(), filter)
    }

    fn persist(&self) -> Result<(), StorageError> {
        self.storage.ensure_dirs()?;
        let payload = self.state.payload();
        self.storage.save_key(KEY_TASKS, &payload.tasks)?;
        self.storage.save_key(KEY_LISTS, &payload.lists)?;
        self.storage.save_key(KEY_TAGS, &payload.tags)?;
        self.storage.save_key(KEY_PENDING, &self.state.pending())?;
        self.storage.save_key(KEY_WORKFLOW_RULES, &self.state.rules())?;
        self.storage.save_key(KEY_SETTINGS, &self.state.settings())?;
        // no receivers is fine
        let _ = self.events.send(StoreEvent::StateUpdated(payload));
        Ok(())
    }

    fn set_status<F: FnOnce(&mut SyncStatus)>(&self, f: F) -> SyncStatus {
        let before = self.state.status();
        self.state.update_status(f);
        self.notify_status(&before)
    }

    fn notify_status(&self, before: &SyncStatus) -> SyncStatus {
        let after = self.state.status();
        if after != *before {
            let _ = self.events.send(StoreEvent::SyncStatusChanged(after.clone()));
        }
        after
    }

    /// Queues the changes and persists them, then sends what the backend can take. The
    /// second persist records confirmations and server copies.
    async fn commit(&self, changes: Vec<Change>) -> Result<(), StoreError> {
        if changes.is_empty() {
            self.persist()?;
            return Ok(());
        }
        for change in changes {
            self.enqueue(change);
        }
        self.persist()?;
        self.flush().await;
        self.persist()?;
        Ok(())
    }

    fn enqueue(&self, change: Change) {
        log::debug!("change queued kind={}", change.label());
        let before = self.state.status();
        self.state.enqueue(change);
        self.notify_status(&before);
    }

    fn syncable_remote(&self) -> Option<Arc<dyn RemoteBackend>> {
        self.remote
            .as_ref()
            .filter(|_| self.state.status().can_sync())
            .cloned()
    }

    /// Sends queued changes when the backend is reachable. If a sync already holds the
    /// lock, that sync sends whatever was queued behind it.
    async fn flush(&self) {
        loop {
            let Some(remote) = self.syncable_remote() else {
                return;
            };
            let Ok(guard) = self.sync_lock.try_lock() else {
                log::debug!(
                    "sync running; change left for it pending={}",
                    self.state.status().pending
                );
                return;
            };
            let drained = self.drain(remote.as_ref()).await;
            drop(guard);
            if drained.is_err() || !self.state.has_pending() {
                return;
            }
        }
    }

    /// Sends queued changes oldest first. Callers hold `sync_lock`. An entry leaves the
    /// queue only once the remote has answered for it, so a crash mid-request replays it.
    async fn drain(&self, remote: &dyn RemoteBackend) -> Result<(), RemoteError> {
        loop {
            if !self.state.status().can_sync() {
                return Ok(());
            }
            let Some(entry) = self.state.begin_pending() else {
                return Ok(());
            };
            let before = self.state.status();
            match apply_change(remote, &entry.change).await {
                Ok(confirmed) => {
                    self.state.complete_pending(&entry.id);
                    self.reconcile(confirmed);
                }
                Err(err) if err.is_unauthorized() => {
                    self.state.release_pending(&entry.id);
                    log::warn!(
                        "remote refused credentials kind={} err={err}; sync paused",
                        entry.change.label()
                    );
                    self.set_status(|s| {
                        s.authenticated = false;
                        s.last_error = Some(err.to_string());
                    });
                    return Err(err);
                }
                Err(err) if err.is_permanent() => {
                    self.state.complete_pending(&entry.id);
                    log::warn!(
                        "remote rejected change kind={} attempts={} err={err}; dropped",
                        entry.change.label(),
                        entry.attempts
                    );
                }
                Err(err) => {
                    self.state.release_pending(&entry.id);
                    log::warn!(
                        "remote write failed kind={} err={err}; kept in queue",
                        entry.change.label()
                    );
                    self.set_status(|s| s.last_error = Some(err.to_string()));
                    return Err(err);
                }
            }
            self.notify_status(&before);
        }
    }

    /// Remote wins: the server copy replaces the optimistic write, unless a newer local
    /// edit of the same entity is still queued.
    fn reconcile(&self, confirmed: Confirmed) {
        match confirmed {
            Confirmed::Task(task) => {
                if self.state.task_has_pending(&task.id) {
                    log::debug!("server copy superseded by queued edit task={}", task.id);
                } else if self.state.update_task(task.clone()) {
                    self.reschedule(&task);
                }
            }
            Confirmed::List(list) => {
                if !self.state.list_has_pending(&list.id) {
                    self.state.update_list(list);
                }
            }
            Confirmed::Subtask(subtask) => {
                if self.state.task_has_pending(&subtask.task_id) {
                    return;
                }
                if let Some(mut task) = self.state.task(&subtask.task_id) {
                    if let Some(existing) = task.subtasks.iter_mut().find(|s| s.id == subtask.id) {
                        *existing = subtask;
                        self.state.update_task(task);
                    }
                }
            }
            Confirmed::Deleted => {}
        }
    }

    fn resolve_list(&self, list_id: Option<&str>) -> String {
        match list_id {
            Some(id) if self.state.has_list(id) => id.to_string(),
            Some(id) => {
                log::warn!("unknown list={id}; using default list");
                DEFAULT_LIST_ID.to_string()
            }
            None => DEFAULT_LIST_ID.to_string(),
        }
    }

    fn reschedule(&self, task: &Task) {
        if task.completed {
            self.scheduler.cancel(&task.id);
        } else {
            self.scheduler.schedule(task);
        }
    }

    /// Runs workflow rules against the edit, keeping rule-driven list moves inside
    /// known lists.
    fn apply_rules(&self, before: &Task, after: &mut Task) {
        let fired = workflow::evaluate(&self.state.rules(), before, after);
        if fired.is_empty() {
            return;
        }
        log::info!("workflow rules fired task={} rules={fired:?}", after.id);
        if !self.state.has_list(&after.list_id) {
            log::warn!(
                "workflow rule targeted unknown list={} task={}; keeping list={}",
                after.list_id,
                after.id,
                before.list_id
            );
            after.list_id = before.list_id.clone();
        } else if after.list_id != before.list_id {
            after.position = self.state.next_position(&after.list_id);
        }
        after.tags = normalize_tags(&after.tags);
    }

    /// Stores an edited task and pushes it. `before` is the copy the edit started from.
    async fn save_task(&self, before: &Task, mut after: Task) -> Result<Task, StoreError> {
        after.updated_at = Utc::now();
        self.apply_rules(before, &mut after);
        if !self.state.update_task(after.clone()) {
            return Err(not_found("task", &after.id));
        }
        self.reschedule(&after);
        let id = after.id.clone();
        self.commit(vec![Change::UpdateTask { task: after.clone() }])
            .await?;
        Ok(self.state.task(&id).unwrap_or(after))
    }

    pub async fn add_task(&self, input: NewTask) -> Result<Task, StoreError> {
        let title = required("title", &input.title)?;
        let list_id = self.resolve_list(input.list_id.as_deref());
        let now = Utc::now();
        let task = Task {
            id: new_id(),
            title,
            description: input.description.filter(|d| !d.trim().is_empty()),
            completed: false,
            completed_at: None,
            priority: input.priority,
            due_date: input.due_date,
            position: self.state.next_position(&list_id),
            list_id,
            tags: normalize_tags(&input.tags),
            subtasks: Vec::new(),
            created_at: now,
            updated_at: now,
            column_id: input.column_id,
        };
        self.state.add_task(task.clone());
        self.scheduler.schedule(&task);
        log::info!("task created id={} list={}", task.id, task.list_id);
        let id = task.id.clone();
        self.commit(vec![Change::CreateTask { task: task.clone() }])
            .await?;
        Ok(self.state.task(&id).unwrap_or(task))
    }

    pub async fn update_task(&self, task_id: &str, patch: TaskPatch) -> Result<Task, StoreError> {
        let before = self.state.task(task_id).ok_or_else(|| not_found("task", task_id))?;
        let mut after = before.clone();
        let now = Utc::now();
        if let Some(title) = patch.title {
            after.title = required("title", &title)?;
        }
        if let Some(description) = patch.description {
            after.description = description.filter(|d| !d.trim().is_empty());
        }
        if let Some(completed) = patch.completed {
            if completed != after.completed {
                after.set_completed(completed, now);
            }
        }
        if let Some(priority) = patch.priority {
            after.priority = priority;
        }
        if let Some(due_date) = patch.due_date {
            after.due_date = due_date;
        }
        if let Some(list_id) = patch.list_id {
            if !self.state.has_list(&list_id) {
                return Err(not_found("list", &list_id));
            }
            if list_id != after.list_id {
                after.position = self.state.next_position(&list_id);
                after.list_id = list_id;
            }
        }
        if let Some(tags) = patch.tags {
            after.tags = normalize_tags(&tags);
        }
        if let Some(position) = patch.position {
            after.position = position;
        }
        if let Some(column_id) = patch.column_id {
            after.column_id = column_id;
        }
        self.save_task(&before, after).await
    }

    pub async fn toggle_task(&self, task_id: &str) -> Result<Task, StoreError> {
        let before = self.state.task(task_id).ok_or_else(|| not_found("task", task_id))?;
        let mut after = before.clone();
        after.set_completed(!before.completed, Utc::now());
        self.save_task(&before, after).await
    }

    pub async fn delete_task(&self, task_id: &str) -> Result<Task, StoreError> {
        let removed = self
            .state
            .remove_task(task_id)
            .ok_or_else(|| not_found("task", task_id))?;
        self.scheduler.cancel(task_id);
        log::info!("task deleted id={task_id}");
        self.commit(vec![Change::DeleteTask {
            task_id: task_id.to_string(),
        }])
        .await?;
        Ok(removed)
    }

    pub async fn add_subtask(&self, task_id: &str, title: &str) -> Result<Subtask, StoreError> {
        let title = required("title", title)?;
        let mut task = self.state.task(task_id).ok_or_else(|| not_found("task", task_id))?;
        let subtask = Subtask {
            id: new_id(),
            title,
            completed: false,
            task_id: task_id.to_string(),
        };
        task.subtasks.push(subtask.clone());
        task.updated_at = Utc::now();
        self.state.update_task(task);
        self.commit(vec![Change::AddSubtask {
            subtask: subtask.clone(),
        }])
        .await?;
        Ok(subtask)
    }

    pub async fn delete_subtask(&self, task_id: &str, subtask_id: &str) -> Result<(), StoreError> {
        let mut task = self.state.task(task_id).ok_or_else(|| not_found("task", task_id))?;
        let index = task
            .subtasks
            .iter()
            .position(|s| s.id == subtask_id)
            .ok_or_else(|| not_found("subtask", subtask_id))?;
        task.subtasks.remove(index);
        task.updated_at = Utc::now();
        self.state.update_task(task);
        self.commit(vec![Change::DeleteSubtask {
            task_id: task_id.to_string(),
            subtask_id: subtask_id.to_string(),
        }])
        .await
    }

    /// Flips a subtask. Completing the last open subtask completes the parent; the parent's
    /// own completion never touches its subtasks.
    pub async fn toggle_subtask(
        &self,
        task_id: &str,
        subtask_id: &str,
    ) -> Result<Task, StoreError> {
        let before = self.state.task(task_id).ok_or_else(|| not_found("task", task_id))?;
        let mut after = before.clone();
        let subtask = after
            .subtasks
            .iter_mut()
            .find(|s| s.id == subtask_id)
            .ok_or_else(|| not_found("subtask", subtask_id))?;
        subtask.completed = !subtask.completed;
        if after.all_subtasks_completed() && !after.completed {
            after.set_completed(true, Utc::now());
        }
        self.save_task(&before, after).await
    }

    pub async fn add_list(&self, input: NewList) -> Result<TaskList, StoreError> {
        let name = required("name", &input.name)?;
        let list = TaskList {
            id: new_id(),
            name,
            color: input
                .color
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LIST_COLOR.to_string()),
            created_at: Utc::now(),
        };
        self.state.add_list(list.clone());
        log::info!("list created id={}", list.id);
        let id = list.id.clone();
        self.commit(vec![Change::CreateList { list: list.clone() }])
            .await?;
        Ok(self.state.list(&id).unwrap_or(list))
    }

    pub async fn update_list(
        &self,
        list_id: &str,
        patch: ListPatch,
    ) -> Result<TaskList, StoreError> {
        let mut list = self.state.list(list_id).ok_or_else(|| not_found("list", list_id))?;
        if let Some(name) = patch.name {
            list.name = required("name", &name)?;
        }
        if let Some(color) = patch.color {
            list.color = color;
        }
        self.state.update_list(list.clone());
        self.commit(vec![Change::UpdateList { list: list.clone() }])
            .await?;
        Ok(self.state.list(list_id).unwrap_or(list))
    }

    /// Deletes a list, moving its tasks to the end of the default list. Returns the moved
    /// tasks.
    pub async fn delete_list(&self, list_id: &str) -> Result<Vec<Task>, StoreError> {
        if list_id == DEFAULT_LIST_ID {
            return Err(StoreError::DefaultListProtected);
        }
        let moved = self
            .state
            .remove_list(list_id)
            .ok_or_else(|| not_found("list", list_id))?;
        log::info!("list deleted id={list_id} moved_tasks={}", moved.len());
        // Reassignments go out before the delete so the server never cascades them away.
        let mut changes: Vec<Change> = moved
            .iter()
            .map(|task| Change::UpdateTask { task: task.clone() })
            .collect();
        changes.push(Change::DeleteList {
            list_id: list_id.to_string(),
        });
        self.commit(changes).await?;
        Ok(moved)
    }

    /// Registers a tag. Returns false when it already existed. Tags are local only.
    pub async fn add_tag(&self, tag: &str) -> Result<bool, StoreError> {
        let tag = tag_arg(tag)?;
        if !self.state.add_tag(tag) {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    /// Removes a tag from the registry and from every task carrying it.
    pub async fn remove_tag(&self, tag: &str) -> Result<Vec<Task>, StoreError> {
        let tag = tag_arg(tag)?;
        let changed = self.state.remove_tag(&tag);
        let changes = changed
            .iter()
            .map(|task| Change::UpdateTask { task: task.clone() })
            .collect();
        self.commit(changes).await?;
        Ok(changed)
    }

    pub async fn tag_task(&self, task_id: &str, tag: &str) -> Result<Task, StoreError> {
        let tag = tag_arg(tag)?;
        let before = self.state.task(task_id).ok_or_else(|| not_found("task", task_id))?;
        if before.tags.contains(&tag) {
            return Ok(before);
        }
        let mut after = before.clone();
        after.tags.push(tag);
        self.save_task(&before, after).await
    }

    pub async fn untag_task(&self, task_id: &str, tag: &str) -> Result<Task, StoreError> {
        let tag = tag_arg(tag)?;
        let before = self.state.task(task_id).ok_or_else(|| not_found("task", task_id))?;
        if !before.tags.contains(&tag) {
            return Ok(before);
        }
        let mut after = before.clone();
        after.tags.retain(|t| *t != tag);
        self.save_task(&before, after).await
    }

    /// Moves a task to another list and board column. A list change appends it to the
    /// end of the target list.
    pub async fn move_task(
        &self,
        task_id: &str,
        list_id: &str,
        column_id: Option<String>,
    ) -> Result<Task, StoreError> {
        let before = self.state.task(task_id).ok_or_else(|| not_found("task", task_id))?;
        if !self.state.has_list(list_id) {
            return Err(not_found("list", list_id));
        }
        let mut after = before.clone();
        if before.list_id != list_id {
            after.list_id = list_id.to_string();
            after.position = self.state.next_position(list_id);
        }
        after.column_id = column_id;
        self.save_task(&before, after).await
    }

    pub async fn swap_positions(
        &self,
        first_id: &str,
        second_id: &str,
    ) -> Result<(Task, Task), StoreError> {
        if self.state.task(first_id).is_none() {
            return Err(not_found("task", first_id));
        }
        let (first, second) = self
            .state
            .swap_positions(first_id, second_id)
            .ok_or_else(|| not_found("task", second_id))?;
        self.commit(vec![
            Change::UpdateTask { task: first.clone() },
            Change::UpdateTask {
                task: second.clone(),
            },
        ])
        .await?;
        Ok((first, second))
    }

    /// Rewrites positions in `list_id` to follow `ordered_ids`. Tasks of the list that are
    /// not named keep their relative order after the named ones.
    pub async fn reorder(
        &self,
        list_id: &str,
        ordered_ids: &[String],
    ) -> Result<Vec<Task>, StoreError> {
        if !self.state.has_list(list_id) {
            return Err(not_found("list", list_id));
        }
        let mut in_list: Vec<Task> = self
            .state
            .tasks()
            .into_iter()
            .filter(|t| t.list_id == list_id)
            .collect();
        in_list.sort_by_key(|t| t.position);
        for id in ordered_ids {
            if !in_list.iter().any(|t| t.id == *id) {
                return Err(not_found("task", id));
            }
        }
        let mut ordered: Vec<Task> = Vec::with_capacity(in_list.len());
        for id in ordered_ids {
            if let Some(index) = in_list.iter().position(|t| t.id == *id) {
                ordered.push(in_list.remove(index));
            }
        }
        ordered.extend(in_list);

        let now = Utc::now();
        let mut changes = Vec::new();
        for (position, mut task) in (0_i64..).zip(ordered) {
            if task.position == position {
                continue;
            }
            task.position = position;
            task.updated_at = now;
            self.state.update_task(task.clone());
            changes.push(Change::UpdateTask { task });
        }
        self.commit(changes).await?;
        let mut result: Vec<Task> = self
            .state
            .tasks()
            .into_iter()
            .filter(|t| t.list_id == list_id)
            .collect();
        result.sort_by_key(|t| t.position);
        Ok(result)
    }

    pub async fn add_rule(&self, mut rule: WorkflowRule) -> Result<WorkflowRule, StoreError> {
        rule.name = required("name", &rule.name)?;
        if rule.id.trim().is_empty() {
            rule.id = new_id();
        }
        let mut rules = self.state.rules();
        match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule.clone(),
            None => rules.push(rule.clone()),
        }
        self.state.set_rules(rules);
        self.persist()?;
        Ok(rule)
    }

    pub async fn remove_rule(&self, rule_id: &str) -> Result<(), StoreError> {
        let mut rules = self.state.rules();
        let before = rules.len();
        rules.retain(|r| r.id != rule_id);
        if rules.len() == before {
            return Err(not_found("rule", rule_id));
        }
        self.state.set_rules(rules);
        self.persist()?;
        Ok(())
    }

    pub async fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> Result<(), StoreError> {
        let mut rules = self.state.rules();
        let rule = rules
            .iter_mut()
            .find(|r| r.id == rule_id)
            .ok_or_else(|| not_found("rule", rule_id))?;
        rule.enabled = enabled;
        self.state.set_rules(rules);
        self.persist()?;
        Ok(())
    }

    pub async fn update_settings(&self, settings: Settings) -> Result<Settings, StoreError> {
        if settings.reminder_lead_minutes < 0 {
            return Err(StoreError::Invalid(
                "reminder lead time must not be negative".into(),
            ));
        }
        self.state.update_settings(settings.clone());
        let enabled = settings.notification_permission == NotificationPermission::Granted;
        self.scheduler.configure(enabled, settings.reminder_lead_minutes);
        if enabled {
            self.scheduler.rebuild(&self.state.tasks());
        }
        self.persist()?;
        Ok(settings)
    }

    pub async fn request_notification_permission(
        &self,
    ) -> Result<NotificationPermission, StoreError> {
        let permission = self.scheduler.notifier().request_permission();
        log::info!("notification permission={permission:?}");
        let mut settings = self.state.settings();
        settings.notification_permission = permission;
        self.update_settings(settings).await?;
        Ok(permission)
    }

    pub async fn set_online(&self, online: bool) -> Result<SyncStatus, StoreError> {
        self.set_connectivity(|s| s.online = online).await
    }

    pub async fn set_authenticated(&self, authenticated: bool) -> Result<SyncStatus, StoreError> {
        self.set_connectivity(|s| s.authenticated = authenticated)
            .await
    }

    async fn set_connectivity<F>(&self, f: F) -> Result<SyncStatus, StoreError>
    where
        F: FnOnce(&mut SyncStatus),
    {
        let was_syncable = self.state.status().can_sync();
        let status = self.set_status(f);
        if !was_syncable && status.can_sync() {
            log::info!("connectivity restored; syncing pending={}", status.pending);
            return self.sync_now().await;
        }
        Ok(status)
    }

    /// Replays the pending queue, then pulls the remote collections. The pull only runs
    /// once the queue has fully drained so unsent local edits are never overwritten.
    pub async fn sync_now(&self) -> Result<SyncStatus, StoreError> {
        let Some(remote) = self.syncable_remote() else {
            return Ok(self.state.status());
        };
        let status = {
            let _guard = self.sync_lock.lock().await;
            self.sync_locked(remote.as_ref()).await?
        };
        // writes made during the pull found the lock taken
        if status.last_error.is_none() && self.state.has_pending() {
            self.flush().await;
            self.persist()?;
        }
        Ok(self.state.status())
    }

    async fn sync_locked(&self, remote: &dyn RemoteBackend) -> Result<SyncStatus, StoreError> {
        self.set_status(|s| s.syncing = true);
        let replayed = self.state.status().pending;
        if let Err(err) = self.drain(remote).await {
            log::warn!("sync stopped err={err} pending={}", self.state.status().pending);
            self.persist()?;
            return Ok(self.set_status(|s| s.syncing = false));
        }
        log::info!("pending replayed count={replayed}");

        if self.state.has_pending() || !self.state.status().can_sync() {
            self.persist()?;
            return Ok(self.set_status(|s| s.syncing = false));
        }
        let pulled = match (remote.fetch_tasks().await, remote.fetch_lists().await) {
            (Ok(tasks), Ok(lists)) => Ok((tasks, lists)),
            (Err(err), _) | (_, Err(err)) => Err(err),
        };
        match pulled {
            Ok((tasks, lists)) => {
                if self.state.has_pending() {
                    log::debug!("local changes queued during pull; keeping local state");
                } else if !tasks.is_empty() || !lists.is_empty() {
                    self.apply_pull(tasks, lists);
                }
                self.persist()?;
                Ok(self.set_status(|s| {
                    s.syncing = false;
                    s.last_error = None;
                    s.last_synced_at = Some(Utc::now());
                }))
            }
            Err(err) => {
                log::warn!("remote pull failed err={err}");
                if err.is_unauthorized() {
                    self.set_status(|s| s.authenticated = false);
                }
                self.persist()?;
                Ok(self.set_status(|s| {
                    s.syncing = false;
                    s.last_error = Some(err.to_string());
                }))
            }
        }
    }

    fn apply_pull(&self, tasks: Vec<Task>, lists: Vec<TaskList>) {
        let tasks = if tasks.is_empty() { self.state.tasks() } else { tasks };
        let lists = if lists.is_empty() { self.state.lists() } else { lists };
        log::info!("remote state applied tasks={} lists={}", tasks.len(), lists.len());
        self.state.replace_all(tasks, lists, None);
        self.scheduler.rebuild(&self.state.tasks());
    }

    pub fn export_json(&self) -> Result<String, StoreError> {
        let payload = self.state.payload();
        let document = ExportDocument::new(payload.tasks, payload.lists, payload.tags);
        Ok(transfer::export_json(&document)?)
    }

    /// Writes an export under `{data_dir}/exports/` and returns its path.
    pub fn export_to_file(&self) -> Result<PathBuf, StoreError> {
        let path = export_default_path(self.storage.root());
        write_atomic_bytes(&path, self.export_json()?.as_bytes())?;
        log::info!("export written path={}", path.display());
        Ok(path)
    }

    /// Replaces local tasks, lists and tags with an export document and queues them for
    /// the remote backend. Entities this device already knew are sent as updates, new
    /// ones as creates.
    pub async fn import_json(&self, text: &str) -> Result<ImportSummary, StoreError> {
        let document = transfer::parse_import(text)?;
        let known_tasks: HashSet<String> = self.state.tasks().into_iter().map(|t| t.id).collect();
        let known_lists: HashSet<String> = self.state.lists().into_iter().map(|l| l.id).collect();
        self.state
            .replace_all(document.tasks, document.lists, Some(document.tags));
        self.scheduler.rebuild(&self.state.tasks());
        let lists = self.state.lists();
        let tasks = self.state.tasks();
        let summary = ImportSummary {
            tasks: tasks.len(),
            lists: lists.len(),
            tags: self.state.tags().len(),
        };
        log::info!(
            "import applied tasks={} lists={} tags={}",
            summary.tasks,
            summary.lists,
            summary.tags
        );
        let list_changes = lists.into_iter().filter(|l| !l.is_default()).map(|list| {
            if known_lists.contains(&list.id) {
                Change::UpdateList { list }
            } else {
                Change::CreateList { list }
            }
        });
        let task_changes = tasks.into_iter().map(|task| {
            if known_tasks.contains(&task.id) {
                Change::UpdateTask { task }
            } else {
                Change::CreateTask { task }
            }
        });
        self.commit(list_changes.chain(task_changes).collect()).await?;
        Ok(summary)
    }

    pub async fn import_file(&self, path: &Path) -> Result<ImportSummary, StoreError> {
        let text = fs::read_to_string(path).map_err(StorageError::Io)?;
        self.import_json(&text).await
    }
}

fn export_default_path(root: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    root.join("exports").join(format!("todo-sync-{stamp}.json"))
}

fn write_atomic_bytes(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let tmp = path.with_extension("tmp");
    fs::create_dir_all(
        path.parent()
            .ok_or_else(|| StorageError::Io(std::io::Error::other("invalid export path")))?,
    )?;
    fs::write(&tmp, bytes)?;
    fs::rename(tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::filter::StatusFilter;
    use crate::models::Priority;
    use crate::remote::testing::FakeRemote;
    use crate::scheduler::LogNotifier;
    use crate::sync::DEFAULT_PENDING_LIMIT;
    use crate::workflow::{RuleAction, RuleTrigger};

    struct Harness {
        _root: tempfile::TempDir,
        storage: Storage,
        remote: Arc<FakeRemote>,
        store: TaskStore,
    }

    async fn open_store() -> Harness {
        let root = tempfile::tempdir().unwrap();
        let storage = Storage::new(root.path().to_path_buf());
        let remote = Arc::new(FakeRemote::default());
        let store = TaskStore::open_with_storage(
            storage.clone(),
            DEFAULT_PENDING_LIMIT,
            Some(remote.clone() as Arc<dyn RemoteBackend>),
            Arc::new(LogNotifier),
        )
        .await
        .unwrap();
        Harness {
            _root: root,
            storage,
            remote,
            store,
        }
    }

    async fn online(h: &Harness) {
        h.store.set_authenticated(true).await.unwrap();
        h.store.set_online(true).await.unwrap();
    }

    fn new_task(title: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            ..NewTask::default()
        }
    }

    #[tokio::test]
    async fn offline_writes_are_queued_and_persisted() {
        let h = open_store().await;
        let task = h.store.add_task(new_task("Buy milk")).await.unwrap();
        assert_eq!(task.list_id, DEFAULT_LIST_ID);
        assert_eq!(h.store.pending().len(), 1);
        assert!(h.remote.calls().is_empty());

        let saved: Vec<Task> = h.storage.load_key(KEY_TASKS).unwrap();
        assert_eq!(saved, vec![task]);
        let queued: Vec<PendingChange> = h.storage.load_key(KEY_PENDING).unwrap();
        assert_eq!(queued.len(), 1);
    }

    #[tokio::test]
    async fn reconnect_replays_queue_then_pulls() {
        let h = open_store().await;
        let task = h.store.add_task(new_task("Write report")).await.unwrap();
        h.store
            .update_task(
                &task.id,
                TaskPatch {
                    priority: Some(Priority::High),
                    ..TaskPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(h.store.pending().len(), 1);

        online(&h).await;
        assert_eq!(
            h.remote.calls(),
            vec![
                format!("create_task:{}", task.id),
                "fetch_tasks".to_string(),
                "fetch_lists".to_string(),
            ]
        );
        assert!(h.store.pending().is_empty());
        let status = h.store.status();
        assert!(status.last_synced_at.is_some());
        assert_eq!(status.pending, 0);
        assert_eq!(h.remote.tasks.lock().unwrap()[0].priority, Priority::High);
    }

    #[tokio::test]
    async fn failed_replay_keeps_queue_and_skips_pull() {
        let h = open_store().await;
        h.store.add_task(new_task("a")).await.unwrap();
        h.remote.set_failing(true);
        online(&h).await;
        assert_eq!(h.store.pending().len(), 1);
        assert_eq!(h.store.pending()[0].attempts, 1);
        assert!(h.store.status().last_error.is_some());

        h.remote.set_failing(false);
        h.store.sync_now().await.unwrap();
        assert!(h.store.pending().is_empty());
        assert!(h.store.status().last_error.is_none());
    }

    #[tokio::test]
    async fn online_write_uses_server_copy() {
        let h = open_store().await;
        online(&h).await;
        *h.remote.server_title_suffix.lock().unwrap() = Some(" (server)".into());
        let task = h.store.add_task(new_task("Plan trip")).await.unwrap();
        assert_eq!(task.title, "Plan trip (server)");
        assert_eq!(h.store.task(&task.id).unwrap().title, "Plan trip (server)");
        assert!(h.store.pending().is_empty());
    }

    #[tokio::test]
    async fn remote_failure_while_online_queues_without_error() {
        let h = open_store().await;
        online(&h).await;
        h.remote.set_failing(true);
        let task = h.store.add_task(new_task("x")).await.unwrap();
        assert_eq!(h.store.task(&task.id).unwrap().title, "x");
        assert_eq!(h.store.pending().len(), 1);
        assert!(h.store.status().last_error.is_some());
    }

    #[tokio::test]
    async fn pull_replaces_local_state_when_remote_has_data() {
        let h = open_store().await;
        let local = h.store.add_task(new_task("local")).await.unwrap();
        let mut remote_task = local.clone();
        remote_task.id = "server-1".into();
        remote_task.title = "from server".into();
        h.remote.tasks.lock().unwrap().push(remote_task);

        online(&h).await;
        let titles: Vec<String> = h.store.tasks().into_iter().map(|t| t.title).collect();
        assert!(titles.contains(&"from server".to_string()));
        assert!(h.store.lists().iter().any(|l| l.is_default()));
    }

    #[tokio::test]
    async fn delete_list_reassigns_tasks_and_protects_default() {
        let h = open_store().await;
        let list = h
            .store
            .add_list(NewList {
                name: "Work".into(),
                color: None,
            })
            .await
            .unwrap();
        assert_eq!(list.color, DEFAULT_LIST_COLOR);
        let task = h
            .store
            .add_task(NewTask {
                list_id: Some(list.id.clone()),
                ..new_task("Quarterly review")
            })
            .await
            .unwrap();
        assert_eq!(task.list_id, list.id);

        let moved = h.store.delete_list(&list.id).await.unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(h.store.task(&task.id).unwrap().list_id, DEFAULT_LIST_ID);
        assert!(matches!(
            h.store.delete_list(DEFAULT_LIST_ID).await,
            Err(StoreError::DefaultListProtected)
        ));
        assert!(matches!(
            h.store.delete_list("missing").await,
            Err(StoreError::NotFound { kind: "list", .. })
        ));
        // create + delete of an unsynced list cancel out; only the task remains queued
        let kinds: Vec<&str> = h.store.pending().iter().map(|p| p.change.label()).collect();
        assert_eq!(kinds, vec!["create_task"]);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let h = open_store().await;
        assert!(matches!(
            h.store.add_task(new_task("   ")).await,
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            h.store.add_list(NewList::default()).await,
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            h.store.toggle_task("missing").await,
            Err(StoreError::NotFound { kind: "task", .. })
        ));
        let unknown_list = h
            .store
            .add_task(NewTask {
                list_id: Some("nope".into()),
                ..new_task("t")
            })
            .await
            .unwrap();
        assert_eq!(unknown_list.list_id, DEFAULT_LIST_ID);
    }

    #[tokio::test]
    async fn tags_are_normalized_idempotent_and_removable() {
        let h = open_store().await;
        assert!(h.store.add_tag(" Work ").await.unwrap());
        assert!(!h.store.add_tag("work").await.unwrap());
        let task = h.store.add_task(new_task("t")).await.unwrap();
        let tagged = h.store.tag_task(&task.id, "WORK").await.unwrap();
        assert_eq!(tagged.tags, vec!["work"]);
        let again = h.store.tag_task(&task.id, "work").await.unwrap();
        assert_eq!(again.tags, vec!["work"]);

        let changed = h.store.remove_tag("work").await.unwrap();
        assert_eq!(changed.len(), 1);
        assert!(h.store.task(&task.id).unwrap().tags.is_empty());
        assert!(h.store.tags().is_empty());
    }

    #[tokio::test]
    async fn completing_last_subtask_completes_parent() {
        let h = open_store().await;
        let task = h.store.add_task(new_task("Launch")).await.unwrap();
        let a = h.store.add_subtask(&task.id, "copy").await.unwrap();
        let b = h.store.add_subtask(&task.id, "images").await.unwrap();

        let after_a = h.store.toggle_subtask(&task.id, &a.id).await.unwrap();
        assert!(!after_a.completed);
        let after_b = h.store.toggle_subtask(&task.id, &b.id).await.unwrap();
        assert!(after_b.completed);
        assert!(after_b.completed_at.is_some());

        h.store.delete_subtask(&task.id, &a.id).await.unwrap();
        assert_eq!(h.store.task(&task.id).unwrap().subtasks.len(), 1);
        assert!(matches!(
            h.store.delete_subtask(&task.id, &a.id).await,
            Err(StoreError::NotFound { kind: "subtask", .. })
        ));
    }

    #[tokio::test]
    async fn workflow_rule_runs_on_completion() {
        let h = open_store().await;
        let done = h
            .store
            .add_list(NewList {
                name: "Done".into(),
                color: None,
            })
            .await
            .unwrap();
        let rule = h
            .store
            .add_rule(WorkflowRule {
                id: String::new(),
                name: "archive".into(),
                enabled: true,
                trigger: RuleTrigger::TaskCompleted,
                action: RuleAction::MoveToList {
                    list_id: done.id.clone(),
                },
            })
            .await
            .unwrap();
        assert!(!rule.id.is_empty());

        let task = h.store.add_task(new_task("ship")).await.unwrap();
        let toggled = h.store.toggle_task(&task.id).await.unwrap();
        assert_eq!(toggled.list_id, done.id);

        h.store.set_rule_enabled(&rule.id, false).await.unwrap();
        let other = h.store.add_task(new_task("other")).await.unwrap();
        let toggled = h.store.toggle_task(&other.id).await.unwrap();
        assert_eq!(toggled.list_id, DEFAULT_LIST_ID);

        h.store.remove_rule(&rule.id).await.unwrap();
        assert!(h.store.rules().is_empty());
    }

    #[tokio::test]
    async fn swap_and_reorder_positions() {
        let h = open_store().await;
        let a = h.store.add_task(new_task("a")).await.unwrap();
        let b = h.store.add_task(new_task("b")).await.unwrap();
        let c = h.store.add_task(new_task("c")).await.unwrap();
        assert_eq!((a.position, b.position, c.position), (0, 1, 2));

        let (a2, b2) = h.store.swap_positions(&a.id, &b.id).await.unwrap();
        assert_eq!((a2.position, b2.position), (1, 0));

        let ordered = h
            .store
            .reorder(DEFAULT_LIST_ID, &[c.id.clone(), a.id.clone()])
            .await
            .unwrap();
        let ids: Vec<&str> = ordered.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![c.id.as_str(), a.id.as_str(), b.id.as_str()]);
        assert!(matches!(
            h.store.reorder(DEFAULT_LIST_ID, &["nope".to_string()]).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn move_task_appends_to_target_list() {
        let h = open_store().await;
        let list = h
            .store
            .add_list(NewList {
                name: "Board".into(),
                color: Some("#111111".into()),
            })
            .await
            .unwrap();
        h.store
            .add_task(NewTask {
                list_id: Some(list.id.clone()),
                ..new_task("existing")
            })
            .await
            .unwrap();
        let task = h.store.add_task(new_task("mover")).await.unwrap();
        let moved = h
            .store
            .move_task(&task.id, &list.id, Some("doing".into()))
            .await
            .unwrap();
        assert_eq!(moved.list_id, list.id);
        assert_eq!(moved.position, 1);
        assert_eq!(moved.column_id.as_deref(), Some("doing"));
        assert!(matches!(
            h.store.move_task(&task.id, "missing", None).await,
            Err(StoreError::NotFound { kind: "list", .. })
        ));
    }

    #[tokio::test]
    async fn filtered_combines_conditions() {
        let h = open_store().await;
        let a = h
            .store
            .add_task(NewTask {
                priority: Priority::High,
                tags: vec!["work".into()],
                ..new_task("Email boss")
            })
            .await
            .unwrap();
        h.store
            .add_task(NewTask {
                priority: Priority::Low,
                tags: vec!["work".into()],
                ..new_task("Email team")
            })
            .await
            .unwrap();
        let done = h.store.add_task(new_task("Email done")).await.unwrap();
        h.store.toggle_task(&done.id).await.unwrap();

        let filter = TaskFilter {
            status: StatusFilter::Active,
            priority: Some(Priority::High),
            search: Some("email".into()),
            tags: vec!["work".into()],
            ..TaskFilter::default()
        };
        let found = h.store.filtered(&filter);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a.id);
    }

    #[tokio::test]
    async fn export_then_import_restores_state() {
        let h = open_store().await;
        h.store
            .add_list(NewList {
                name: "Home".into(),
                color: None,
            })
            .await
            .unwrap();
        h.store
            .add_task(NewTask {
                tags: vec!["chores".into()],
                ..new_task("Vacuum")
            })
            .await
            .unwrap();
        let exported = h.store.export_json().unwrap();

        let other = open_store().await;
        let summary = other.store.import_json(&exported).await.unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                tasks: 1,
                lists: 2,
                tags: 1
            }
        );
        assert_eq!(other.store.tasks(), h.store.tasks());
        assert_eq!(other.store.lists(), h.store.lists());
        assert_eq!(other.store.tags(), vec!["chores"]);

        let path = h.store.export_to_file().unwrap();
        let third = open_store().await;
        third.store.import_file(&path).await.unwrap();
        assert_eq!(third.store.tasks(), h.store.tasks());
    }

    #[tokio::test]
    async fn invalid_import_leaves_state_untouched() {
        let h = open_store().await;
        h.store.add_task(new_task("keep")).await.unwrap();
        let err = h.store.import_json(r#"{"tasks": {}}"#).await.unwrap_err();
        assert!(matches!(err, StoreError::Import(ImportError::InvalidFormat(_))));
        assert_eq!(h.store.tasks().len(), 1);
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let h = open_store().await;
        let task = h.store.add_task(new_task("persisted")).await.unwrap();
        h.store.add_tag("later").await.unwrap();

        let reopened = TaskStore::open_with_storage(
            h.storage.clone(),
            DEFAULT_PENDING_LIMIT,
            None,
            Arc::new(LogNotifier),
        )
        .await
        .unwrap();
        assert_eq!(reopened.task(&task.id), Some(task));
        assert_eq!(reopened.tags(), vec!["later"]);
        assert_eq!(reopened.pending().len(), 1);
    }

    #[tokio::test]
    async fn reminders_follow_permission_and_completion() {
        let h = open_store().await;
        let due = Utc::now() + chrono::Duration::hours(2);
        let task = h
            .store
            .add_task(NewTask {
                due_date: Some(due),
                ..new_task("dentist")
            })
            .await
            .unwrap();
        assert!(h.store.scheduled_reminders().is_empty());

        let permission = h.store.request_notification_permission().await.unwrap();
        assert_eq!(permission, NotificationPermission::Granted);
        assert_eq!(h.store.scheduled_reminders(), vec![task.id.clone()]);

        h.store.toggle_task(&task.id).await.unwrap();
        assert!(h.store.scheduled_reminders().is_empty());
    }

    #[tokio::test]
    async fn mutations_emit_state_events() {
        let h = open_store().await;
        let mut events = h.store.subscribe();
        h.store.add_task(new_task("observed")).await.unwrap();
        let mut saw_state = false;
        while let Ok(event) = events.try_recv() {
            if let StoreEvent::StateUpdated(payload) = event {
                saw_state = payload.tasks.iter().any(|t| t.title == "observed");
            }
        }
        assert!(saw_state);
    }

    #[tokio::test(start_paused = true)]
    async fn edit_while_change_is_in_flight_is_persisted_and_sent_after() {
        let h = open_store().await;
        let task = h.store.add_task(new_task("A")).await.unwrap();
        h.store.set_authenticated(true).await.unwrap();
        *h.remote.create_delay.lock().unwrap() = Some(Duration::from_millis(50));

        let (synced, (edited, queued)) = tokio::join!(h.store.set_online(true), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let edited = h
                .store
                .update_task(
                    &task.id,
                    TaskPatch {
                        title: Some("A2".into()),
                        ..TaskPatch::default()
                    },
                )
                .await;
            let queued: Vec<PendingChange> = h.storage.load_key(KEY_PENDING).unwrap();
            (edited, queued)
        });
        synced.unwrap();
        assert_eq!(edited.unwrap().title, "A2");
        let labels: Vec<&str> = queued.iter().map(|p| p.change.label()).collect();
        assert_eq!(labels, vec!["create_task", "update_task"]);

        assert_eq!(
            h.remote.calls(),
            vec![
                format!("create_task:{}", task.id),
                format!("update_task:{}", task.id),
                "fetch_tasks".to_string(),
                "fetch_lists".to_string(),
            ]
        );
        assert!(h.store.pending().is_empty());
        assert_eq!(h.store.task(&task.id).unwrap().title, "A2");
        assert_eq!(h.remote.tasks.lock().unwrap()[0].title, "A2");
        let saved: Vec<PendingChange> = h.storage.load_key(KEY_PENDING).unwrap();
        assert!(saved.is_empty());
    }

    #[tokio::test]
    async fn write_behind_backlog_is_sent_after_it() {
        let h = open_store().await;
        online(&h).await;
        h.remote.set_failing(true);
        let first = h.store.add_task(new_task("first")).await.unwrap();
        assert_eq!(h.store.pending().len(), 1);

        h.remote.set_failing(false);
        let second = h.store.add_task(new_task("second")).await.unwrap();
        let calls = h.remote.calls();
        assert_eq!(
            calls[calls.len() - 2..],
            [
                format!("create_task:{}", first.id),
                format!("create_task:{}", second.id),
            ]
        );
        assert!(h.store.pending().is_empty());
    }

    #[tokio::test]
    async fn rejected_direct_write_is_dropped_but_kept_locally() {
        let h = open_store().await;
        online(&h).await;
        h.remote.set_rejecting(Some(409));
        let task = h.store.add_task(new_task("conflicting")).await.unwrap();
        assert!(h.store.pending().is_empty());
        assert_eq!(h.store.task(&task.id).unwrap().title, "conflicting");
        let saved: Vec<PendingChange> = h.storage.load_key(KEY_PENDING).unwrap();
        assert!(saved.is_empty());
    }

    #[tokio::test]
    async fn refused_credentials_keep_the_queue_and_pause_sync() {
        let h = open_store().await;
        h.store.add_task(new_task("private")).await.unwrap();
        h.remote.set_rejecting(Some(401));
        online(&h).await;

        assert_eq!(h.store.pending().len(), 1);
        assert_eq!(h.store.pending()[0].attempts, 1);
        let status = h.store.status();
        assert!(!status.authenticated);
        assert!(!status.can_sync());
        assert!(status.last_error.is_some());

        // writes while paused stay queued without touching the remote
        h.store.add_task(new_task("later")).await.unwrap();
        assert_eq!(h.store.pending().len(), 2);

        h.remote.set_rejecting(None);
        h.store.set_authenticated(true).await.unwrap();
        assert!(h.store.pending().is_empty());
        assert!(h.store.status().last_error.is_none());
    }

    #[tokio::test]
    async fn import_sends_known_tasks_as_updates() {
        let h = open_store().await;
        online(&h).await;
        let task = h.store.add_task(new_task("Original")).await.unwrap();

        let mut document: serde_json::Value =
            serde_json::from_str(&h.store.export_json().unwrap()).unwrap();
        document["tasks"][0]["title"] = "Renamed".into();
        h.store.import_json(&document.to_string()).await.unwrap();

        let calls = h.remote.calls();
        let creates = calls
            .iter()
            .filter(|c| **c == format!("create_task:{}", task.id))
            .count();
        assert_eq!(creates, 1);
        assert!(calls.contains(&format!("update_task:{}", task.id)));
        assert!(h.store.pending().is_empty());
        assert_eq!(h.remote.tasks.lock().unwrap()[0].title, "Renamed");
    }
}
