//! Pure presentation transforms over task snapshots: sorting, grouping, the calendar
//! month grid and dashboard counters. None of these touch the store.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone};
use serde::Serialize;

use crate::models::{Priority, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Position,
    DueDate,
    Priority,
    CreatedAt,
    Title,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKey {
    List,
    Priority,
    DueBucket,
    Completion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DueBucket {
    Overdue,
    Today,
    Tomorrow,
    ThisWeek,
    Later,
    NoDate,
}

impl DueBucket {
    pub fn label(self) -> &'static str {
        match self {
            DueBucket::Overdue => "overdue",
            DueBucket::Today => "today",
            DueBucket::Tomorrow => "tomorrow",
            DueBucket::ThisWeek => "thisWeek",
            DueBucket::Later => "later",
            DueBucket::NoDate => "noDate",
        }
    }
}

/// Stable sort. Undated tasks always go last when sorting by due date.
pub fn sort_tasks(tasks: &mut [Task], key: SortKey, direction: SortDirection) {
    tasks.sort_by(|a, b| {
        if key == SortKey::DueDate {
            return match (a.due_date, b.due_date) {
                (Some(x), Some(y)) => directed(x.cmp(&y), direction),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
        }
        let ord = match key {
            SortKey::Position => a.position.cmp(&b.position),
            SortKey::Priority => a.priority.cmp(&b.priority),
            SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
            SortKey::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
            SortKey::DueDate => Ordering::Equal,
        };
        directed(ord, direction)
    });
}

fn directed(ord: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Ascending => ord,
        SortDirection::Descending => ord.reverse(),
    }
}

pub fn due_bucket<Tz: TimeZone>(task: &Task, now: &DateTime<Tz>) -> DueBucket {
    let Some(due) = task.due_date else {
        return DueBucket::NoDate;
    };
    let due_local = due.with_timezone(&now.timezone());
    let today = now.date_naive();
    let due_day = due_local.date_naive();
    if due_local < *now && due_day < today {
        return DueBucket::Overdue;
    }
    if due_day == today {
        return if due_local < *now {
            DueBucket::Overdue
        } else {
            DueBucket::Today
        };
    }
    if due_day == today + Duration::days(1) {
        return DueBucket::Tomorrow;
    }
    if due_day <= end_of_week(today) {
        return DueBucket::ThisWeek;
    }
    DueBucket::Later
}

fn end_of_week(day: NaiveDate) -> NaiveDate {
    let remaining = 6 - day.weekday().num_days_from_monday() as i64;
    day + Duration::days(remaining)
}

/// Groups tasks under string keys, keeping input order inside each group.
pub fn group_tasks<Tz: TimeZone>(
    tasks: &[Task],
    key: GroupKey,
    now: &DateTime<Tz>,
) -> Vec<(String, Vec<Task>)> {
    let mut groups: Vec<(String, Vec<Task>)> = Vec::new();
    let mut ordered: Vec<(u8, String, &Task)> = tasks
        .iter()
        .map(|task| {
            let (rank, label) = match key {
                GroupKey::List => (0, task.list_id.clone()),
                GroupKey::Priority => (
                    match task.priority {
                        Priority::High => 0,
                        Priority::Medium => 1,
                        Priority::Low => 2,
                    },
                    priority_label(task.priority).to_string(),
                ),
                GroupKey::DueBucket => {
                    let bucket = due_bucket(task, now);
                    (bucket as u8, bucket.label().to_string())
                }
                GroupKey::Completion => {
                    if task.completed {
                        (1, "completed".to_string())
                    } else {
                        (0, "active".to_string())
                    }
                }
            };
            (rank, label, task)
        })
        .collect();
    // rank orders fixed buckets; list groups keep first-seen order
    ordered.sort_by_key(|(rank, _, _)| *rank);
    for (_, label, task) in ordered {
        match groups.iter_mut().find(|(name, _)| *name == label) {
            Some((_, members)) => members.push(task.clone()),
            None => groups.push((label, vec![task.clone()])),
        }
    }
    groups
}

fn priority_label(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "high",
        Priority::Medium => "medium",
        Priority::Low => "low",
    }
}

/// Tasks of one month keyed by day of month, in the zone of `tz`.
pub fn calendar_month<Tz: TimeZone>(
    tasks: &[Task],
    year: i32,
    month: u32,
    tz: &Tz,
) -> BTreeMap<u32, Vec<Task>> {
    let mut days: BTreeMap<u32, Vec<Task>> = BTreeMap::new();
    for task in tasks {
        let Some(due) = task.due_date else { continue };
        let local = due.with_timezone(tz);
        if local.year() == year && local.month() == month {
            days.entry(local.day()).or_default().push(task.clone());
        }
    }
    days
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total: usize,
    pub completed: usize,
    pub active: usize,
    pub overdue: usize,
    pub due_today: usize,
    pub high_priority: usize,
    pub medium_priority: usize,
    pub low_priority: usize,
    /// Completed share in `0.0..=1.0`; zero for an empty collection.
    pub completion_rate: f64,
}

pub fn dashboard_stats<Tz: TimeZone>(tasks: &[Task], now: &DateTime<Tz>) -> DashboardStats {
    let mut stats = DashboardStats {
        total: tasks.len(),
        ..DashboardStats::default()
    };
    for task in tasks {
        if task.completed {
            stats.completed += 1;
        } else {
            stats.active += 1;
            match due_bucket(task, now) {
                DueBucket::Overdue => stats.overdue += 1,
                DueBucket::Today => stats.due_today += 1,
                _ => {}
            }
        }
        match task.priority {
            Priority::High => stats.high_priority += 1,
            Priority::Medium => stats.medium_priority += 1,
            Priority::Low => stats.low_priority += 1,
        }
    }
    if stats.total > 0 {
        stats.completion_rate = stats.completed as f64 / stats.total as f64;
    }
    stats
}
