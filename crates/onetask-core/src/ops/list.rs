//! Pure transforms over one slot's task list.
//!
//! Nothing here touches storage; [`crate::datastore::DataStore::update_list`]
//! feeds these the freshly read list and writes it back when they report a
//! change.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{Outcome, Rejection};
use crate::task::{Task, active_task};

/// Creation-time id, bumped by a millisecond until it is unique in the list.
pub fn next_id(tasks: &[Task], now: DateTime<Utc>) -> String {
    let mut millis = now.timestamp_millis();
    loop {
        let candidate = millis.to_string();
        if !tasks.iter().any(|t| t.id == candidate) {
            return candidate;
        }
        millis += 1;
    }
}

pub fn push_new(tasks: &mut Vec<Task>, text: &str, now: DateTime<Utc>, timed: bool) -> Outcome {
    let text = text.trim();
    if text.is_empty() {
        return Outcome::Unchanged;
    }
    let id = next_id(tasks, now);
    tasks.push(Task::new(id.clone(), text.to_string(), now, timed));
    Outcome::Created(id)
}

/// Removes the task, folding a running timer so the final tally is known.
pub fn remove(tasks: &mut Vec<Task>, id: &str, now: DateTime<Utc>) -> Option<Task> {
    let idx = tasks.iter().position(|t| t.id == id)?;
    let mut task = tasks.remove(idx);
    if let Some(folded) = task.stop_timer(now) {
        debug!(id, folded, total = task.elapsed_secs(now), "stopped timer of deleted task");
    }
    Some(task)
}

/// Completes or reopens a task. Reopening while a timer runs is refused,
/// since the reopened row could take over as the active item.
pub fn toggle(tasks: &mut [Task], id: &str, now: DateTime<Utc>) -> Outcome {
    let running = tasks.iter().any(Task::is_running);
    let Some(task) = tasks.iter_mut().find(|t| t.id == id) else {
        return Outcome::Unchanged;
    };
    if task.completed {
        if running {
            return Outcome::Rejected(Rejection::TimerRunning);
        }
        task.completed = false;
    } else if let Some(folded) = task.complete(now) {
        debug!(id, folded, "stopped timer of completed task");
    }
    Outcome::Changed
}

pub fn edit_text(tasks: &mut [Task], id: &str, new_text: &str) -> Outcome {
    let new_text = new_text.trim();
    let Some(task) = tasks.iter_mut().find(|t| t.id == id) else {
        return Outcome::Unchanged;
    };
    if new_text.is_empty() || new_text == task.text {
        return Outcome::Unchanged;
    }
    task.text = new_text.to_string();
    Outcome::Changed
}

/// `Ok(true)` when `id` is the active item and not already running.
pub fn check_startable(tasks: &[Task], id: &str) -> Result<bool, Rejection> {
    match active_task(tasks) {
        Some(active) if active.id == id => Ok(!active.is_running()),
        _ => Err(Rejection::NotActive),
    }
}

/// Starts the active item's timer after stopping every other one in the list.
pub fn start(tasks: &mut [Task], id: &str, now: DateTime<Utc>) -> Outcome {
    match check_startable(tasks, id) {
        Err(rejection) => return Outcome::Rejected(rejection),
        Ok(false) => return Outcome::Unchanged,
        Ok(true) => {}
    }
    stop_all(tasks, now);
    if let Some(task) = tasks.iter_mut().find(|t| t.id == id) {
        task.timer_mut().start(now);
    }
    Outcome::Changed
}

pub fn stop_all(tasks: &mut [Task], now: DateTime<Utc>) -> Outcome {
    let mut stopped = 0_usize;
    for task in tasks.iter_mut() {
        if let Some(folded) = task.stop_timer(now) {
            debug!(id = %task.id, folded, "stopped competing timer");
            stopped += 1;
        }
    }
    if stopped > 0 {
        Outcome::Changed
    } else {
        Outcome::Unchanged
    }
}

/// Stops a running timer; with `complete` the task is also marked done.
pub fn stop(tasks: &mut [Task], id: &str, now: DateTime<Utc>, complete: bool) -> Outcome {
    let Some(task) = tasks.iter_mut().find(|t| t.id == id) else {
        return Outcome::Unchanged;
    };
    let Some(folded) = task.stop_timer(now) else {
        return Outcome::Unchanged;
    };
    if complete {
        task.completed = true;
    }
    debug!(id, folded, complete, "timer stopped");
    Outcome::Changed
}

/// Moves an item within the uncompleted sub-list and rewrites the list as
/// uncompleted followed by completed.
pub fn reorder(tasks: &mut Vec<Task>, from: usize, to: usize) -> Outcome {
    let (mut open, done): (Vec<Task>, Vec<Task>) =
        std::mem::take(tasks).into_iter().partition(|t| !t.completed);

    let outcome = if from == to || from >= open.len() {
        Outcome::Unchanged
    } else {
        let moved = open.remove(from);
        let to = to.min(open.len());
        open.insert(to, moved);
        Outcome::Changed
    };

    open.extend(done);
    *tasks = open;
    outcome
}

/// Makes an uncompleted task the active one, unless a timer is running.
pub fn pin(tasks: &mut Vec<Task>, id: &str) -> Outcome {
    if tasks.iter().any(Task::is_running) {
        return Outcome::Rejected(Rejection::TimerRunning);
    }
    let Some(idx) = tasks.iter().position(|t| t.id == id && !t.completed) else {
        return Outcome::Unchanged;
    };
    let first_open = tasks.iter().position(|t| !t.completed);
    if first_open == Some(idx) {
        return Outcome::Unchanged;
    }

    let task = tasks.remove(idx);
    match tasks.iter().position(|t| !t.completed) {
        Some(first) => tasks.insert(first, task),
        None => tasks.push(task),
    }
    Outcome::Changed
}
