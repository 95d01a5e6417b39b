use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::models::{new_id, Subtask, Task, TaskList, Timestamp};
use crate::remote::{RemoteBackend, RemoteError};

pub const DEFAULT_PENDING_LIMIT: usize = 500;

/// A mutation that has been applied locally but not yet confirmed by the remote backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Change {
    CreateTask { task: Task },
    UpdateTask { task: Task },
    #[serde(rename_all = "camelCase")]
    DeleteTask { task_id: String },
    CreateList { list: TaskList },
    UpdateList { list: TaskList },
    #[serde(rename_all = "camelCase")]
    DeleteList { list_id: String },
    AddSubtask { subtask: Subtask },
    #[serde(rename_all = "camelCase")]
    DeleteSubtask { task_id: String, subtask_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum EntityKey<'a> {
    Task(&'a str),
    List(&'a str),
    Subtask(&'a str),
}

impl Change {
    fn entity(&self) -> EntityKey<'_> {
        match self {
            Change::CreateTask { task } | Change::UpdateTask { task } => EntityKey::Task(&task.id),
            Change::DeleteTask { task_id } => EntityKey::Task(task_id),
            Change::CreateList { list } | Change::UpdateList { list } => EntityKey::List(&list.id),
            Change::DeleteList { list_id } => EntityKey::List(list_id),
            Change::AddSubtask { subtask } => EntityKey::Subtask(&subtask.id),
            Change::DeleteSubtask { subtask_id, .. } => EntityKey::Subtask(subtask_id),
        }
    }

    fn task_payload(&self) -> Option<&Task> {
        match self {
            Change::CreateTask { task } | Change::UpdateTask { task } => Some(task),
            _ => None,
        }
    }

    fn parent_task_id(&self) -> Option<&str> {
        match self {
            Change::AddSubtask { subtask } => Some(&subtask.task_id),
            Change::DeleteSubtask { task_id, .. } => Some(task_id),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Change::CreateTask { .. } => "create_task",
            Change::UpdateTask { .. } => "update_task",
            Change::DeleteTask { .. } => "delete_task",
            Change::CreateList { .. } => "create_list",
            Change::UpdateList { .. } => "update_list",
            Change::DeleteList { .. } => "delete_list",
            Change::AddSubtask { .. } => "add_subtask",
            Change::DeleteSubtask { .. } => "delete_subtask",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    pub id: String,
    pub change: Change,
    pub queued_at: Timestamp,
    #[serde(default)]
    pub attempts: u32,
}

/// Canonical server copy returned while replaying, used to reconcile local state.
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmed {
    Task(Task),
    List(TaskList),
    Subtask(Subtask),
    Deleted,
}

/// FIFO queue of local changes waiting for the remote backend.
///
/// At most one entry is in flight at a time. It stays queued (and persisted) until the
/// remote answers, and later changes never fold into it.
#[derive(Debug, Clone)]
pub struct PendingQueue {
    entries: Vec<PendingChange>,
    limit: usize,
    in_flight: Option<String>,
}

impl PendingQueue {
    pub fn new(entries: Vec<PendingChange>, limit: usize) -> Self {
        let mut queue = Self {
            entries,
            limit: limit.max(1),
            in_flight: None,
        };
        queue.enforce_limit();
        queue
    }

    pub fn entries(&self) -> &[PendingChange] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn in_flight(&self) -> Option<&str> {
        self.in_flight.as_deref()
    }

    fn is_in_flight(&self, entry: &PendingChange) -> bool {
        self.in_flight.as_deref() == Some(entry.id.as_str())
    }

    /// Marks the oldest entry as in flight and returns a copy of it.
    pub fn begin_next(&mut self) -> Option<PendingChange> {
        let entry = self.entries.first()?.clone();
        self.in_flight = Some(entry.id.clone());
        Some(entry)
    }

    /// Drops an entry the remote has answered for, whether it accepted or refused it.
    pub fn complete(&mut self, entry_id: &str) {
        self.entries.retain(|entry| entry.id != entry_id);
        if self.in_flight.as_deref() == Some(entry_id) {
            self.in_flight = None;
        }
    }

    /// Keeps a failed entry at its place for the next attempt.
    pub fn release(&mut self, entry_id: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.id == entry_id) {
            entry.attempts += 1;
        }
        if self.in_flight.as_deref() == Some(entry_id) {
            self.in_flight = None;
        }
    }

    /// True when a queued change still carries a newer copy of the task or one of its
    /// subtasks.
    pub fn mentions_task(&self, task_id: &str) -> bool {
        self.entries.iter().any(|entry| {
            entry.change.entity() == EntityKey::Task(task_id)
                || entry.change.parent_task_id() == Some(task_id)
        })
    }

    pub fn mentions_list(&self, list_id: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.change.entity() == EntityKey::List(list_id))
    }

    /// Index of the queued entry a change for `key` may fold into: the newest entry for
    /// that entity, provided nothing for another entity was queued after it and it is
    /// not in flight. Folding further back would reorder the change past its dependencies.
    fn fold_target(&self, key: &EntityKey<'_>, foldable: fn(&Change) -> bool) -> Option<usize> {
        let index = self
            .entries
            .iter()
            .rposition(|entry| entry.change.entity() == *key)?;
        let entry = &self.entries[index];
        if !foldable(&entry.change) || self.is_in_flight(entry) {
            return None;
        }
        let later_only_same_entity = self.entries[index + 1..]
            .iter()
            .all(|later| later.change.entity() == *key);
        later_only_same_entity.then_some(index)
    }

    /// Appends a change, folding it into queued changes for the same entity.
    pub fn enqueue(&mut self, change: Change) {
        let now = Utc::now();
        match change {
            Change::UpdateTask { task } => {
                let target = self.fold_target(&EntityKey::Task(&task.id), |change| {
                    matches!(change, Change::CreateTask { .. } | Change::UpdateTask { .. })
                });
                match target.map(|index| &mut self.entries[index].change) {
                    Some(
                        Change::CreateTask { task: queued } | Change::UpdateTask { task: queued },
                    ) => *queued = task,
                    _ => self.push(Change::UpdateTask { task }, now),
                }
            }
            Change::UpdateList { list } => {
                let target = self.fold_target(&EntityKey::List(&list.id), |change| {
                    matches!(change, Change::CreateList { .. } | Change::UpdateList { .. })
                });
                match target.map(|index| &mut self.entries[index].change) {
                    Some(
                        Change::CreateList { list: queued } | Change::UpdateList { list: queued },
                    ) => *queued = list,
                    _ => self.push(Change::UpdateList { list }, now),
                }
            }
            Change::DeleteTask { task_id } => {
                let never_synced = self.entries.iter().any(|entry| {
                    !self.is_in_flight(entry)
                        && matches!(
                            &entry.change,
                            Change::CreateTask { task } if task.id == task_id
                        )
                });
                let in_flight = self.in_flight.clone();
                self.entries.retain(|entry| {
                    in_flight.as_deref() == Some(entry.id.as_str())
                        || (entry.change.entity() != EntityKey::Task(&task_id)
                            && entry.change.parent_task_id() != Some(task_id.as_str()))
                });
                if !never_synced {
                    self.push(Change::DeleteTask { task_id }, now);
                }
            }
            Change::DeleteList { list_id } => {
                let never_synced = self.entries.iter().any(|entry| {
                    !self.is_in_flight(entry)
                        && matches!(
                            &entry.change,
                            Change::CreateList { list } if list.id == list_id
                        )
                });
                // A queued task payload still pointing at the list needs it to exist remotely.
                let referenced = self
                    .entries
                    .iter()
                    .filter_map(|entry| entry.change.task_payload())
                    .any(|task| task.list_id == list_id);
                if never_synced && !referenced {
                    self.entries
                        .retain(|entry| entry.change.entity() != EntityKey::List(&list_id));
                } else {
                    self.push(Change::DeleteList { list_id }, now);
                }
            }
            Change::DeleteSubtask {
                task_id,
                subtask_id,
            } => {
                let before = self.entries.len();
                let in_flight = self.in_flight.clone();
                self.entries.retain(|entry| {
                    in_flight.as_deref() == Some(entry.id.as_str())
                        || !matches!(
                            &entry.change,
                            Change::AddSubtask { subtask } if subtask.id == subtask_id
                        )
                });
                if self.entries.len() == before {
                    self.push(
                        Change::DeleteSubtask {
                            task_id,
                            subtask_id,
                        },
                        now,
                    );
                }
            }
            other => self.push(other, now),
        }
    }

    fn push(&mut self, change: Change, now: Timestamp) {
        self.entries.push(PendingChange {
            id: new_id(),
            change,
            queued_at: now,
            attempts: 0,
        });
        self.enforce_limit();
    }

    fn enforce_limit(&mut self) {
        while self.entries.len() > self.limit {
            let oldest = self
                .entries
                .iter()
                .position(|entry| !self.is_in_flight(entry))
                .unwrap_or(0);
            let dropped = self.entries.remove(oldest);
            log::warn!(
                "pending queue full limit={} dropped id={} kind={}",
                self.limit,
                dropped.id,
                dropped.change.label()
            );
        }
    }
}

/// Sends a single change to the remote backend.
pub async fn apply_change(
    remote: &dyn RemoteBackend,
    change: &Change,
) -> Result<Confirmed, RemoteError> {
    match change {
        Change::CreateTask { task } => remote.create_task(task).await.map(Confirmed::Task),
        Change::UpdateTask { task } => remote.update_task(task).await.map(Confirmed::Task),
        Change::DeleteTask { task_id } => {
            remote.delete_task(task_id).await?;
            Ok(Confirmed::Deleted)
        }
        Change::CreateList { list } => remote.create_list(list).await.map(Confirmed::List),
        Change::UpdateList { list } => remote.update_list(list).await.map(Confirmed::List),
        Change::DeleteList { list_id } => {
            remote.delete_list(list_id).await?;
            Ok(Confirmed::Deleted)
        }
        Change::AddSubtask { subtask } => remote.add_subtask(subtask).await.map(Confirmed::Subtask),
        Change::DeleteSubtask {
            task_id,
            subtask_id,
        } => {
            remote.delete_subtask(task_id, subtask_id).await?;
            Ok(Confirmed::Deleted)
        }
    }
}
