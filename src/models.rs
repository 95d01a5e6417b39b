use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Timestamp = DateTime<Utc>;

pub const DEFAULT_LIST_ID: &str = "default";
pub const DEFAULT_LIST_NAME: &str = "My Tasks";
pub const DEFAULT_LIST_COLOR: &str = "#3B82F6";

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Trims and lowercases a tag. Returns `None` for blank input.
pub fn normalize_tag(raw: &str) -> Option<String> {
    let tag = raw.trim().to_lowercase();
    if tag.is_empty() {
        None
    } else {
        Some(tag)
    }
}

/// Normalizes every tag and drops duplicates, keeping first-seen order.
pub fn normalize_tags(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for tag in raw.iter().filter_map(|t| normalize_tag(t)) {
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub id: String,
    pub title: String,
    pub completed: bool,
    pub task_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub due_date: Option<Timestamp>,
    pub list_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    pub created_at: Timestamp,
    #[serde(default = "Utc::now")]
    pub updated_at: Timestamp,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub column_id: Option<String>,
}

impl Task {
    pub fn all_subtasks_completed(&self) -> bool {
        !self.subtasks.is_empty() && self.subtasks.iter().all(|s| s.completed)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        let tag = tag.trim().to_lowercase();
        self.tags.iter().any(|t| *t == tag)
    }

    pub fn set_completed(&mut self, completed: bool, now: Timestamp) {
        self.completed = completed;
        self.completed_at = if completed { Some(now) } else { None };
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskList {
    pub id: String,
    pub name: String,
    #[serde(default = "default_list_color")]
    pub color: String,
    pub created_at: Timestamp,
}

impl TaskList {
    pub fn default_list(now: Timestamp) -> Self {
        Self {
            id: DEFAULT_LIST_ID.to_string(),
            name: DEFAULT_LIST_NAME.to_string(),
            color: default_list_color(),
            created_at: now,
        }
    }

    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_LIST_ID
    }
}

fn default_list_color() -> String {
    DEFAULT_LIST_COLOR.to_string()
}

/// Input for `TaskStore::add_task`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub due_date: Option<Timestamp>,
    /// Falls back to the default list when missing or unknown.
    #[serde(default)]
    pub list_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub column_id: Option<String>,
}

/// Partial update. `None` leaves a field untouched; the nested options of the
/// nullable fields clear them with `Some(None)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub completed: Option<bool>,
    pub priority: Option<Priority>,
    pub due_date: Option<Option<Timestamp>>,
    pub list_id: Option<String>,
    pub tags: Option<Vec<String>>,
    pub position: Option<i64>,
    pub column_id: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewList {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPatch {
    pub name: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPermission {
    #[default]
    Default,
    Granted,
    Denied,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PomodoroSettings {
    pub work_minutes: u32,
    pub short_break_minutes: u32,
    pub long_break_minutes: u32,
    pub long_break_interval: u32,
}

impl Default for PomodoroSettings {
    fn default() -> Self {
        Self {
            work_minutes: 25,
            short_break_minutes: 5,
            long_break_minutes: 15,
            long_break_interval: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub theme: String,
    #[serde(default = "default_accent_color")]
    pub accent_color: String,
    #[serde(default)]
    pub notification_permission: NotificationPermission,
    #[serde(default = "default_reminder_lead_minutes")]
    pub reminder_lead_minutes: i64,
    #[serde(default)]
    pub pomodoro: PomodoroSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: "light".to_string(),
            accent_color: default_accent_color(),
            notification_permission: NotificationPermission::Default,
            reminder_lead_minutes: default_reminder_lead_minutes(),
            pomodoro: PomodoroSettings::default(),
        }
    }
}

fn default_accent_color() -> String {
    "#6366F1".to_string()
}

fn default_reminder_lead_minutes() -> i64 {
    15
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_tag_trims_and_lowercases() {
        assert_eq!(normalize_tag("  Work "), Some("work".to_string()));
        assert_eq!(normalize_tag("   "), None);
    }

    #[test]
    fn normalize_tags_dedupes_case_insensitively_in_order() {
        let raw = vec![
            "Urgent".to_string(),
            "home".to_string(),
            "URGENT".to_string(),
            "".to_string(),
        ];
        assert_eq!(normalize_tags(&raw), vec!["urgent", "home"]);
    }

    #[test]
    fn settings_serde_applies_defaults_for_missing_optional_fields() {
        let json = r#"{ "theme": "dark" }"#;
        let settings: Settings = serde_json::from_str(json).expect("settings should deserialize");
        assert_eq!(settings.theme, "dark");
        assert_eq!(settings.accent_color, "#6366F1");
        assert_eq!(
            settings.notification_permission,
            NotificationPermission::Default
        );
        assert_eq!(settings.reminder_lead_minutes, 15);
        assert_eq!(settings.pomodoro, PomodoroSettings::default());
    }

    #[test]
    fn task_deserializes_with_defaults_for_missing_fields() {
        let json = r#"
        {
          "id": "t1",
          "title": "task",
          "completed": false,
          "listId": "default",
          "createdAt": "2024-03-01T10:00:00Z"
        }
        "#;
        let task: Task = serde_json::from_str(json).expect("task should deserialize");
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.position, 0);
        assert!(task.tags.is_empty());
        assert!(task.subtasks.is_empty());
        assert!(task.due_date.is_none());
        assert!(task.column_id.is_none());
    }

    #[test]
    fn task_serializes_camel_case_fields() {
        let now = Utc::now();
        let task = Task {
            id: "t1".into(),
            title: "x".into(),
            description: None,
            completed: false,
            completed_at: None,
            priority: Priority::High,
            due_date: Some(now),
            list_id: DEFAULT_LIST_ID.into(),
            tags: vec![],
            subtasks: vec![],
            created_at: now,
            updated_at: now,
            position: 3,
            column_id: None,
        };
        let value = serde_json::to_value(&task).expect("serialize task");
        assert_eq!(value["listId"], "default");
        assert_eq!(value["priority"], "high");
        assert!(value["dueDate"].is_string());
    }

    #[test]
    fn priority_orders_low_to_high() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::Medium < Priority::High);
    }

    #[test]
    fn all_subtasks_completed_requires_at_least_one_subtask() {
        let now = Utc::now();
        let mut task = Task {
            id: "t".into(),
            title: "t".into(),
            description: None,
            completed: false,
            completed_at: None,
            priority: Priority::Low,
            due_date: None,
            list_id: DEFAULT_LIST_ID.into(),
            tags: vec![],
            subtasks: vec![],
            created_at: now,
            updated_at: now,
            position: 0,
            column_id: None,
        };
        assert!(!task.all_subtasks_completed());
        task.subtasks.push(Subtask {
            id: "s".into(),
            title: "s".into(),
            completed: true,
            task_id: "t".into(),
        });
        assert!(task.all_subtasks_completed());
    }
}
