use serde::Serialize;

use crate::models::{Task, TaskList};
use crate::scheduler::NotificationRecord;

pub const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePayload {
    pub tasks: Vec<Task>,
    pub lists: Vec<TaskList>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub online: bool,
    pub authenticated: bool,
    pub syncing: bool,
    pub pending: usize,
    pub last_synced_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error: Option<String>,
}

impl SyncStatus {
    pub fn can_sync(&self) -> bool {
        self.online && self.authenticated
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum StoreEvent {
    StateUpdated(StatePayload),
    SyncStatusChanged(SyncStatus),
    ReminderFired(NotificationRecord),
}
