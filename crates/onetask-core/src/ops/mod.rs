//! Mutation operations. Each one is a read-modify-write of a single slot
//! (two for the one-task cascade and for stopping a competing timer).

pub mod list;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, instrument};

use crate::datastore::DataStore;
use crate::storage::StorageArea;
use crate::task::{OneTask, Slot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A new entry was appended under this id.
    Created(String),
    Changed,
    Unchanged,
    Rejected(Rejection),
}

impl Outcome {
    /// Whether the slot must be written back.
    pub fn is_write(&self) -> bool {
        matches!(self, Outcome::Created(_) | Outcome::Changed)
    }
}

/// A guard that refused an operation. The message is user-facing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Only the active task can be timed.")]
    NotActive,
    #[error("Please end the current task timer before switching to another task.")]
    TimerRunning,
    #[error("Finish or delete the current task before adding another one.")]
    OneTaskExists,
    #[error("Add a task before adding subtasks.")]
    NoOneTask,
    #[error("The {0} list has no timers.")]
    TimersUnsupported(Slot),
    #[error("Only queue tasks can be pinned, not {0}.")]
    PinUnsupported(Slot),
}

impl Rejection {
    /// Text for a blocking alert; `None` when the refusal should be silent.
    pub fn alert(&self) -> Option<String> {
        match self {
            Rejection::NotActive => None,
            other => Some(other.to_string()),
        }
    }
}

#[instrument(skip(store, text, now))]
pub fn add_task<S: StorageArea>(
    store: &mut DataStore<S>,
    slot: Slot,
    text: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<Outcome> {
    if slot == Slot::Subtasks && text.trim().is_empty() {
        return Ok(Outcome::Unchanged);
    }
    if slot == Slot::Subtasks && store.load_one_task()?.is_none() {
        return Ok(Outcome::Rejected(Rejection::NoOneTask));
    }
    let outcome = store.update_list(slot, |tasks| {
        list::push_new(tasks, text, now, slot.has_timers())
    })?;
    if let Outcome::Created(id) = &outcome {
        info!(%slot, id = %id, "task added");
    }
    Ok(outcome)
}

#[instrument(skip(store, now))]
pub fn delete_task<S: StorageArea>(
    store: &mut DataStore<S>,
    slot: Slot,
    id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<Outcome> {
    store.update_list(slot, |tasks| match list::remove(tasks, id, now) {
        Some(removed) => {
            info!(%slot, id, elapsed = removed.elapsed_secs(now), "task deleted");
            Outcome::Changed
        }
        None => Outcome::Unchanged,
    })
}

#[instrument(skip(store, now))]
pub fn toggle_complete<S: StorageArea>(
    store: &mut DataStore<S>,
    slot: Slot,
    id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<Outcome> {
    store.update_list(slot, |tasks| list::toggle(tasks, id, now))
}

#[instrument(skip(store, text))]
pub fn edit_text<S: StorageArea>(
    store: &mut DataStore<S>,
    slot: Slot,
    id: &str,
    text: &str,
) -> anyhow::Result<Outcome> {
    store.update_list(slot, |tasks| list::edit_text(tasks, id, text))
}

/// Starts the active item's timer. Any other running timer in the store is
/// stopped first so that at most one runs at a time.
#[instrument(skip(store, now))]
pub fn start_timer<S: StorageArea>(
    store: &mut DataStore<S>,
    slot: Slot,
    id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<Outcome> {
    if !slot.has_timers() {
        return Ok(Outcome::Rejected(Rejection::TimersUnsupported(slot)));
    }

    let tasks = store.load_list(slot)?;
    match list::check_startable(&tasks, id) {
        Err(rejection) => return Ok(Outcome::Rejected(rejection)),
        Ok(false) => return Ok(Outcome::Unchanged),
        Ok(true) => {}
    }

    for other in Slot::TIMED.into_iter().filter(|s| *s != slot) {
        store.update_list(other, |tasks| list::stop_all(tasks, now))?;
    }

    let outcome = store.update_list(slot, |tasks| list::start(tasks, id, now))?;
    if outcome == Outcome::Changed {
        info!(%slot, id, "timer started");
    }
    Ok(outcome)
}

/// Ends a queue task's timer and completes the task.
#[instrument(skip(store, now))]
pub fn end_task_timer<S: StorageArea>(
    store: &mut DataStore<S>,
    id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<Outcome> {
    store.update_list(Slot::Tasks, |tasks| list::stop(tasks, id, now, true))
}

/// Stops a subtask's timer. The subtask stays open.
#[instrument(skip(store, now))]
pub fn stop_subtask_timer<S: StorageArea>(
    store: &mut DataStore<S>,
    id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<Outcome> {
    store.update_list(Slot::Subtasks, |tasks| list::stop(tasks, id, now, false))
}

/// The end button: completes in the queue, only stops in subtasks.
#[instrument(skip(store, now))]
pub fn end_timer<S: StorageArea>(
    store: &mut DataStore<S>,
    slot: Slot,
    id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<Outcome> {
    match slot {
        Slot::Tasks => end_task_timer(store, id, now),
        Slot::Subtasks => stop_subtask_timer(store, id, now),
        other => Ok(Outcome::Rejected(Rejection::TimersUnsupported(other))),
    }
}

#[instrument(skip(store))]
pub fn reorder<S: StorageArea>(
    store: &mut DataStore<S>,
    slot: Slot,
    from: usize,
    to: usize,
) -> anyhow::Result<Outcome> {
    store.update_list(slot, |tasks| list::reorder(tasks, from, to))
}

#[instrument(skip(store))]
pub fn pin_task<S: StorageArea>(
    store: &mut DataStore<S>,
    slot: Slot,
    id: &str,
) -> anyhow::Result<Outcome> {
    if !slot.allows_pin() {
        return Ok(Outcome::Rejected(Rejection::PinUnsupported(slot)));
    }
    store.update_list(slot, |tasks| list::pin(tasks, id))
}

#[instrument(skip(store, text, now))]
pub fn set_one_task<S: StorageArea>(
    store: &mut DataStore<S>,
    text: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<Outcome> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Outcome::Unchanged);
    }
    if store.load_one_task()?.is_some() {
        return Ok(Outcome::Rejected(Rejection::OneTaskExists));
    }
    store.save_one_task(Some(&OneTask {
        text: text.to_string(),
        created_at: now,
    }))?;
    info!("one task set");
    Ok(Outcome::Changed)
}

#[instrument(skip(store, text))]
pub fn edit_one_task<S: StorageArea>(
    store: &mut DataStore<S>,
    text: &str,
) -> anyhow::Result<Outcome> {
    let text = text.trim();
    let Some(mut record) = store.load_one_task()? else {
        return Ok(Outcome::Unchanged);
    };
    if text.is_empty() || text == record.text {
        return Ok(Outcome::Unchanged);
    }
    record.text = text.to_string();
    store.save_one_task(Some(&record))?;
    Ok(Outcome::Changed)
}

/// Removes the one task and, since nothing links them, clears its subtasks.
#[instrument(skip(store, now))]
pub fn delete_one_task<S: StorageArea>(
    store: &mut DataStore<S>,
    now: DateTime<Utc>,
) -> anyhow::Result<Outcome> {
    let record = store.load_one_task()?;
    let mut subtasks = store.load_list(Slot::Subtasks)?;
    if record.is_none() && subtasks.is_empty() {
        return Ok(Outcome::Unchanged);
    }

    list::stop_all(&mut subtasks, now);
    let tracked: u64 = subtasks.iter().map(|t| t.elapsed_secs(now)).sum();

    store.save_one_task(None)?;
    store.save_list(Slot::Subtasks, &[])?;
    info!(subtasks = subtasks.len(), tracked, "one task deleted");
    Ok(Outcome::Changed)
}
