use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::events::StoreEvent;
use crate::models::{new_id, NotificationPermission, Task, Timestamp};
use crate::storage::Storage;

pub const NOTIFICATION_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    pub task_id: String,
    pub title: String,
    pub body: String,
    pub due_date: Option<Timestamp>,
    pub fired_at: Timestamp,
}

/// Display side of reminders (desktop notification, push, log line, ...).
pub trait Notifier: Send + Sync {
    fn request_permission(&self) -> NotificationPermission;
    fn notify(&self, notification: &NotificationRecord);
}

/// Notifier used when no display surface exists: reminders go to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn request_permission(&self) -> NotificationPermission {
        NotificationPermission::Granted
    }

    fn notify(&self, notification: &NotificationRecord) {
        log::info!(
            "reminder task={} title={:?} body={:?}",
            notification.task_id,
            notification.title,
            notification.body
        );
    }
}

/// Time left until a task's reminder should fire, or `None` when it should not be
/// scheduled (completed, undated, or reminder time already passed).
pub fn reminder_delay(task: &Task, lead_minutes: i64, now: Timestamp) -> Option<Duration> {
    if task.completed {
        return None;
    }
    let due = task.due_date?;
    let fire_at = due - chrono::Duration::minutes(lead_minutes.max(0));
    (fire_at - now).to_std().ok()
}

fn reminder_body(task: &Task, lead_minutes: i64) -> String {
    let mut body = if lead_minutes <= 0 {
        "Task is due now".to_string()
    } else {
        format!("Due in {lead_minutes} minutes")
    };
    if let Some(description) = task.description.as_deref() {
        body.push_str(": ");
        body.push_str(description);
    }
    body
}

/// One tokio timer per task id. Timers are in-memory only and rebuilt from due dates on load.
#[derive(Clone)]
pub struct NotificationScheduler {
    inner: Arc<SchedulerInner>,
}

/// Task id to the generation and handle of its current timer.
type TimerMap = HashMap<String, (u64, JoinHandle<()>)>;

struct SchedulerInner {
    timers: Mutex<TimerMap>,
    next_generation: AtomicU64,
    history: Mutex<Vec<NotificationRecord>>,
    notifier: Arc<dyn Notifier>,
    storage: Storage,
    events: broadcast::Sender<StoreEvent>,
    lead_minutes: AtomicI64,
    enabled: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a fired timer's entry if it is still the current one for the task. A timer
/// replaced by a reschedule must neither fire nor evict its successor.
fn take_timer(timers: &mut TimerMap, task_id: &str, generation: u64) -> bool {
    match timers.get(task_id) {
        Some((current, _)) if *current == generation => {
            timers.remove(task_id);
            true
        }
        _ => false,
    }
}

impl NotificationScheduler {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        storage: Storage,
        events: broadcast::Sender<StoreEvent>,
        lead_minutes: i64,
        enabled: bool,
    ) -> Self {
        let history = storage.load_notifications().unwrap_or_else(|err| {
            log::warn!("notification history unreadable err={err}; starting empty");
            Vec::new()
        });
        Self {
            inner: Arc::new(SchedulerInner {
                timers: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                history: Mutex::new(history),
                notifier,
                storage,
                events,
                lead_minutes: AtomicI64::new(lead_minutes),
                enabled: AtomicBool::new(enabled),
            }),
        }
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.inner.notifier.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Applies new preferences. Callers rebuild afterwards to reschedule.
    pub fn configure(&self, enabled: bool, lead_minutes: i64) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
        self.inner.lead_minutes.store(lead_minutes, Ordering::SeqCst);
        if !enabled {
            self.cancel_all();
        }
    }

    pub fn scheduled_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.inner.timers).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn history(&self) -> Vec<NotificationRecord> {
        lock(&self.inner.history).clone()
    }

    /// (Re)schedules a task's reminder, replacing any previous timer for it.
    pub fn schedule(&self, task: &Task) {
        self.cancel(&task.id);
        if !self.is_enabled() {
            return;
        }
        let lead = self.inner.lead_minutes.load(Ordering::SeqCst);
        let Some(delay) = reminder_delay(task, lead, Utc::now()) else {
            return;
        };
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::downgrade(&self.inner);
        let task = task.clone();
        let task_id = task.id.clone();
        // held across the spawn so the timer cannot look itself up before it is registered
        let mut timers = lock(&self.inner.timers);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let current = take_timer(&mut lock(&inner.timers), &task.id, generation);
            if current {
                fire(&inner, &task, lead);
            }
        });
        log::debug!("reminder scheduled task={task_id} delay_secs={}", delay.as_secs());
        if let Some((_, previous)) = timers.insert(task_id, (generation, handle)) {
            previous.abort();
        }
    }

    pub fn cancel(&self, task_id: &str) {
        if let Some((_, handle)) = lock(&self.inner.timers).remove(task_id) {
            handle.abort();
            log::debug!("reminder cancelled task={task_id}");
        }
    }

    pub fn cancel_all(&self) {
        for (_, (_, handle)) in lock(&self.inner.timers).drain() {
            handle.abort();
        }
    }

    pub fn rebuild(&self, tasks: &[Task]) {
        self.cancel_all();
        for task in tasks {
            self.schedule(task);
        }
    }
}

fn fire(inner: &SchedulerInner, task: &Task, lead_minutes: i64) {
    let record = NotificationRecord {
        id: new_id(),
        task_id: task.id.clone(),
        title: task.title.clone(),
        body: reminder_body(task, lead_minutes),
        due_date: task.due_date,
        fired_at: Utc::now(),
    };
    inner.notifier.notify(&record);

    let snapshot = {
        let mut history = lock(&inner.history);
        history.push(record.clone());
        let overflow = history.len().saturating_sub(NOTIFICATION_HISTORY_LIMIT);
        history.drain(..overflow);
        history.clone()
    };
    if let Err(err) = inner.storage.save_notifications(&snapshot) {
        log::warn!("failed to persist notification history err={err}");
    }
    // no receivers is fine
    let _ = inner.events.send(StoreEvent::ReminderFired(record));
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        let timers = self.timers.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, (_, handle)) in timers.drain() {
            handle.abort();
        }
    }
}
