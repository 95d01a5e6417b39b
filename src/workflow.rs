use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::models::{normalize_tag, Priority, Task};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleTrigger {
    TaskCompleted,
    AllSubtasksCompleted,
    #[serde(rename_all = "camelCase")]
    MovedToColumn { column_id: String },
    TaskTagged { tag: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleAction {
    #[serde(rename_all = "camelCase")]
    MoveToList { list_id: String },
    AddTag { tag: String },
    SetPriority { priority: Priority },
    MarkCompleted,
    #[serde(rename_all = "camelCase")]
    MoveToColumn { column_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRule {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub trigger: RuleTrigger,
    pub action: RuleAction,
}

fn default_enabled() -> bool {
    true
}

impl RuleTrigger {
    fn holds(&self, task: &Task) -> bool {
        match self {
            RuleTrigger::TaskCompleted => task.completed,
            RuleTrigger::AllSubtasksCompleted => task.all_subtasks_completed(),
            RuleTrigger::MovedToColumn { column_id } => {
                task.column_id.as_deref() == Some(column_id.as_str())
            }
            RuleTrigger::TaskTagged { tag } => task.has_tag(tag),
        }
    }

    /// Fires only on a false -> true edge between the two copies.
    fn fired(&self, before: &Task, after: &Task) -> bool {
        !self.holds(before) && self.holds(after)
    }
}

impl RuleAction {
    fn apply(&self, task: &mut Task) {
        let now = Utc::now();
        match self {
            RuleAction::MoveToList { list_id } => task.list_id = list_id.clone(),
            RuleAction::AddTag { tag } => {
                if let Some(tag) = normalize_tag(tag) {
                    if !task.tags.contains(&tag) {
                        task.tags.push(tag);
                    }
                }
            }
            RuleAction::SetPriority { priority } => task.priority = *priority,
            RuleAction::MarkCompleted => {
                if !task.completed {
                    task.set_completed(true, now);
                }
            }
            RuleAction::MoveToColumn { column_id } => task.column_id = Some(column_id.clone()),
        }
        task.updated_at = now;
    }
}

/// Applies every enabled rule whose trigger turned true between `before` and `after`.
/// Actions don't re-trigger other rules. Returns the names of the rules that fired.
pub fn evaluate(rules: &[WorkflowRule], before: &Task, after: &mut Task) -> Vec<String> {
    let snapshot = after.clone();
    let mut fired = Vec::new();
    for rule in rules.iter().filter(|r| r.enabled) {
        if rule.trigger.fired(before, &snapshot) {
            log::debug!("workflow rule fired rule={} task={}", rule.id, after.id);
            rule.action.apply(after);
            fired.push(rule.name.clone());
        }
    }
    fired
}
