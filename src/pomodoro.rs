use chrono::Duration;
use serde::Serialize;

use crate::models::{PomodoroSettings, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Work,
    ShortBreak,
    LongBreak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TimerState {
    Idle,
    Running { ends_at: Timestamp },
    Paused { remaining_secs: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseCompleted {
    pub finished: Phase,
    pub next: Phase,
    pub completed_work_sessions: u32,
    pub task_id: Option<String>,
}

/// Pomodoro cycle driven by caller-supplied timestamps.
#[derive(Debug, Clone)]
pub struct Pomodoro {
    settings: PomodoroSettings,
    phase: Phase,
    state: TimerState,
    completed_work_sessions: u32,
    task_id: Option<String>,
}

impl Pomodoro {
    pub fn new(settings: PomodoroSettings) -> Self {
        Self {
            settings,
            phase: Phase::Work,
            state: TimerState::Idle,
            completed_work_sessions: 0,
            task_id: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn completed_work_sessions(&self) -> u32 {
        self.completed_work_sessions
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn focus_on(&mut self, task_id: Option<String>) {
        self.task_id = task_id;
    }

    pub fn phase_duration(&self, phase: Phase) -> Duration {
        let minutes = match phase {
            Phase::Work => self.settings.work_minutes,
            Phase::ShortBreak => self.settings.short_break_minutes,
            Phase::LongBreak => self.settings.long_break_minutes,
        };
        Duration::minutes(i64::from(minutes.max(1)))
    }

    /// Starts the current phase from its full length. No-op unless idle.
    pub fn start(&mut self, now: Timestamp) {
        if self.state == TimerState::Idle {
            self.state = TimerState::Running {
                ends_at: now + self.phase_duration(self.phase),
            };
        }
    }

    pub fn pause(&mut self, now: Timestamp) {
        if let TimerState::Running { ends_at } = self.state {
            let remaining = (ends_at - now).num_seconds().max(0);
            self.state = TimerState::Paused {
                remaining_secs: remaining,
            };
        }
    }

    pub fn resume(&mut self, now: Timestamp) {
        if let TimerState::Paused { remaining_secs } = self.state {
            self.state = TimerState::Running {
                ends_at: now + Duration::seconds(remaining_secs),
            };
        }
    }

    pub fn remaining(&self, now: Timestamp) -> Duration {
        match self.state {
            TimerState::Idle => self.phase_duration(self.phase),
            TimerState::Running { ends_at } => (ends_at - now).max(Duration::zero()),
            TimerState::Paused { remaining_secs } => Duration::seconds(remaining_secs),
        }
    }

    /// Advances the phase when the running timer has elapsed. The next phase is left idle.
    pub fn tick(&mut self, now: Timestamp) -> Option<PhaseCompleted> {
        match self.state {
            TimerState::Running { ends_at } if now >= ends_at => Some(self.advance()),
            _ => None,
        }
    }

    /// Ends the current phase early without counting it as a completed work session.
    pub fn skip(&mut self, _now: Timestamp) -> Phase {
        self.phase = self.next_phase(false);
        self.state = TimerState::Idle;
        self.phase
    }

    pub fn reset(&mut self) {
        self.phase = Phase::Work;
        self.state = TimerState::Idle;
        self.completed_work_sessions = 0;
    }

    fn advance(&mut self) -> PhaseCompleted {
        let finished = self.phase;
        if finished == Phase::Work {
            self.completed_work_sessions += 1;
        }
        self.phase = self.next_phase(finished == Phase::Work);
        self.state = TimerState::Idle;
        log::debug!(
            "pomodoro phase finished={finished:?} next={:?} sessions={}",
            self.phase,
            self.completed_work_sessions
        );
        PhaseCompleted {
            finished,
            next: self.phase,
            completed_work_sessions: self.completed_work_sessions,
            task_id: self.task_id.clone(),
        }
    }

    fn next_phase(&self, counted: bool) -> Phase {
        match self.phase {
            Phase::Work => {
                let interval = self.settings.long_break_interval.max(1);
                if counted && self.completed_work_sessions % interval == 0 {
                    Phase::LongBreak
                } else {
                    Phase::ShortBreak
                }
            }
            Phase::ShortBreak | Phase::LongBreak => Phase::Work,
        }
    }
}
