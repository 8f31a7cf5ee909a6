use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ONE_TASK_KEY: &str = "oneTask";

/// A list-valued slot in the key-value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    Tasks,
    Today,
    Tomorrow,
    Others,
    Subtasks,
}

impl Slot {
    pub const ALL: [Slot; 5] = [
        Slot::Tasks,
        Slot::Today,
        Slot::Tomorrow,
        Slot::Others,
        Slot::Subtasks,
    ];

    /// Slots whose entries carry a stopwatch.
    pub const TIMED: [Slot; 2] = [Slot::Tasks, Slot::Subtasks];

    pub fn key(self) -> &'static str {
        match self {
            Slot::Tasks => "tasks",
            Slot::Today => "today",
            Slot::Tomorrow => "tomorrow",
            Slot::Others => "others",
            Slot::Subtasks => "subtasks",
        }
    }

    pub fn has_timers(self) -> bool {
        matches!(self, Slot::Tasks | Slot::Subtasks)
    }

    pub fn allows_pin(self) -> bool {
        self == Slot::Tasks
    }

    /// Whether the first uncompleted entry is treated as the active item.
    pub fn has_active_item(self) -> bool {
        self.has_timers()
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Slot {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Slot::ALL
            .into_iter()
            .find(|slot| slot.key() == s)
            .ok_or_else(|| anyhow!("unknown slot: {s}"))
    }
}

/// Stopwatch embedded in queue tasks and subtasks.
///
/// `is_running` and `start_time` move together: a running timer always has
/// a start time and a stopped one never does.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timer {
    pub is_running: bool,
    /// Epoch milliseconds.
    pub start_time: Option<i64>,
    /// Whole seconds accumulated by previous runs.
    pub total_elapsed: u64,
}

impl Timer {
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.is_running = true;
        self.start_time = Some(now.timestamp_millis());
    }

    /// Folds the live run into `total_elapsed` and returns the folded seconds.
    pub fn stop(&mut self, now: DateTime<Utc>) -> u64 {
        let folded = self.live_secs(now);
        self.total_elapsed += folded;
        self.is_running = false;
        self.start_time = None;
        folded
    }

    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> u64 {
        self.total_elapsed + self.live_secs(now)
    }

    fn live_secs(&self, now: DateTime<Utc>) -> u64 {
        match (self.is_running, self.start_time) {
            (true, Some(start)) => {
                let millis = now.timestamp_millis().saturating_sub(start).max(0);
                (millis / 1000) as u64
            }
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<Timer>,
}

impl Task {
    pub fn new(id: String, text: String, now: DateTime<Utc>, timed: bool) -> Self {
        Self {
            id,
            text,
            completed: false,
            created_at: now,
            timer: timed.then(Timer::default),
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer.as_ref().is_some_and(|t| t.is_running)
    }

    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> u64 {
        self.timer.as_ref().map_or(0, |t| t.elapsed_secs(now))
    }

    pub fn timer_mut(&mut self) -> &mut Timer {
        self.timer.get_or_insert_with(Timer::default)
    }

    /// Stops a running timer, returning the folded seconds.
    pub fn stop_timer(&mut self, now: DateTime<Utc>) -> Option<u64> {
        match self.timer.as_mut() {
            Some(timer) if timer.is_running => Some(timer.stop(now)),
            _ => None,
        }
    }

    /// Marks the task done, folding a running timer first.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Option<u64> {
        let folded = self.stop_timer(now);
        self.completed = true;
        folded
    }
}

/// The singleton focus task. Its subtasks live in [`Slot::Subtasks`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTask {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Splits a list into its uncompleted and completed parts, preserving order.
pub fn partition(tasks: &[Task]) -> (Vec<&Task>, Vec<&Task>) {
    tasks.iter().partition(|t| !t.completed)
}

pub fn active_task(tasks: &[Task]) -> Option<&Task> {
    tasks.iter().find(|t| !t.completed)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use super::{Slot, Task, Timer, active_task};

    #[test]
    fn stop_folds_whole_seconds() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let mut timer = Timer::default();
        timer.start(t0);
        assert!(timer.is_running);
        assert_eq!(timer.start_time, Some(t0.timestamp_millis()));

        let folded = timer.stop(t0 + Duration::milliseconds(5_999));
        assert_eq!(folded, 5);
        assert_eq!(timer.total_elapsed, 5);
        assert!(!timer.is_running);
        assert_eq!(timer.start_time, None);
    }

    #[test]
    fn elapsed_adds_live_run_to_total() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let timer = Timer {
            is_running: true,
            start_time: Some(t0.timestamp_millis()),
            total_elapsed: 60,
        };
        assert_eq!(timer.elapsed_secs(t0 + Duration::seconds(30)), 90);
        // clock went backwards
        assert_eq!(timer.elapsed_secs(t0 - Duration::seconds(30)), 60);
    }

    #[test]
    fn complete_stops_running_timer() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let mut task = Task::new("1".to_string(), "x".to_string(), t0, true);
        task.timer_mut().start(t0);

        let folded = task.complete(t0 + Duration::seconds(12));
        assert_eq!(folded, Some(12));
        assert!(task.completed);
        assert!(!task.is_running());
    }

    #[test]
    fn serializes_with_storage_field_names() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let task = Task::new("42".to_string(), "Buy milk".to_string(), t0, true);
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(
            value["timer"],
            json!({"isRunning": false, "startTime": null, "totalElapsed": 0})
        );
        assert_eq!(value["completed"], json!(false));
        assert!(value.get("createdAt").is_some());

        let plain = Task::new("43".to_string(), "Call mom".to_string(), t0, false);
        let value = serde_json::to_value(&plain).unwrap();
        assert!(value.get("timer").is_none());
    }

    #[test]
    fn active_is_first_uncompleted() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let mut a = Task::new("a".to_string(), "a".to_string(), t0, true);
        a.completed = true;
        let b = Task::new("b".to_string(), "b".to_string(), t0, true);
        let tasks = vec![a, b];
        assert_eq!(active_task(&tasks).map(|t| t.id.as_str()), Some("b"));
    }

    #[test]
    fn slot_keys_round_trip() {
        for slot in Slot::ALL {
            assert_eq!(slot.key().parse::<Slot>().unwrap(), slot);
        }
        assert!("nope".parse::<Slot>().is_err());
    }
}
