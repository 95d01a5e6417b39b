use serde::{Deserialize, Serialize};

use crate::models::{Priority, Task, Timestamp};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Completed,
}

/// Transient predicate set over tasks. Every set field must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskFilter {
    #[serde(default)]
    pub status: StatusFilter,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub list_id: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    /// A task must carry every tag listed here.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub due_from: Option<Timestamp>,
    #[serde(default)]
    pub due_to: Option<Timestamp>,
}

impl TaskFilter {
    pub fn is_active(&self) -> bool {
        self.status != StatusFilter::All
            || self.priority.is_some()
            || self.list_id.is_some()
            || self.search_term().is_some()
            || !self.tags.is_empty()
            || self.due_from.is_some()
            || self.due_to.is_some()
    }

    fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.matches_status(task)
            && self.priority.map_or(true, |p| task.priority == p)
            && self.list_id.as_deref().map_or(true, |id| task.list_id == id)
            && self.search_term().map_or(true, |term| matches_search(task, &term))
            && self.tags.iter().all(|tag| task.has_tag(tag))
            && self.matches_due_range(task)
    }

    fn matches_status(&self, task: &Task) -> bool {
        match self.status {
            StatusFilter::All => true,
            StatusFilter::Active => !task.completed,
            StatusFilter::Completed => task.completed,
        }
    }

    fn matches_due_range(&self, task: &Task) -> bool {
        if self.due_from.is_none() && self.due_to.is_none() {
            return true;
        }
        let Some(due) = task.due_date else {
            return false;
        };
        self.due_from.map_or(true, |from| due >= from) && self.due_to.map_or(true, |to| due <= to)
    }
}

fn matches_search(task: &Task, term: &str) -> bool {
    task.title.to_lowercase().contains(term)
        || task
            .description
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(term))
        || task
            .subtasks
            .iter()
            .any(|s| s.title.to_lowercase().contains(term))
}

/// Returns the tasks matching `filter`, preserving input order.
pub fn apply(tasks: &[Task], filter: &TaskFilter) -> Vec<Task> {
    if !filter.is_active() {
        return tasks.to_vec();
    }
    tasks.iter().filter(|t| filter.matches(t)).cloned().collect()
}
