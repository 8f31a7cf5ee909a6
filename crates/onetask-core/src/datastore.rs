use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;

use anyhow::Context;
use serde_json::Value;
use tracing::{debug, info};

use crate::ops::Outcome;
use crate::storage::{StorageArea, StorageChange};
use crate::task::{ONE_TASK_KEY, OneTask, Slot, Task};

/// Every stored slot, read in one `get`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub one_task: Option<OneTask>,
    lists: BTreeMap<Slot, Vec<Task>>,
}

impl Snapshot {
    pub fn list(&self, slot: Slot) -> &[Task] {
        self.lists.get(&slot).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn with_list(mut self, slot: Slot, tasks: Vec<Task>) -> Self {
        self.lists.insert(slot, tasks);
        self
    }

    /// The running timer, if any, as `(slot, id)`.
    pub fn running_timer(&self) -> Option<(Slot, &Task)> {
        Slot::TIMED.into_iter().find_map(|slot| {
            self.list(slot)
                .iter()
                .find(|t| t.is_running())
                .map(|t| (slot, t))
        })
    }
}

/// Typed access to the slots of a [`StorageArea`].
#[derive(Debug)]
pub struct DataStore<S> {
    area: S,
}

impl<S: StorageArea> DataStore<S> {
    pub fn new(area: S) -> Self {
        Self { area }
    }

    pub fn area(&self) -> &S {
        &self.area
    }

    pub fn subscribe(&mut self) -> Receiver<StorageChange> {
        self.area.subscribe()
    }

    #[tracing::instrument(skip(self))]
    pub fn load_list(&self, slot: Slot) -> anyhow::Result<Vec<Task>> {
        let mut values = self.area.get(&[slot.key()])?;
        decode_list(slot, values.remove(slot.key()))
    }

    #[tracing::instrument(skip(self, tasks), fields(count = tasks.len()))]
    pub fn save_list(&mut self, slot: Slot, tasks: &[Task]) -> anyhow::Result<()> {
        let value = serde_json::to_value(tasks)?;
        self.area
            .set(slot.key(), value)
            .with_context(|| format!("failed to save {slot}"))
    }

    #[tracing::instrument(skip(self))]
    pub fn load_one_task(&self) -> anyhow::Result<Option<OneTask>> {
        let mut values = self.area.get(&[ONE_TASK_KEY])?;
        decode_one_task(values.remove(ONE_TASK_KEY))
    }

    #[tracing::instrument(skip(self, one_task))]
    pub fn save_one_task(&mut self, one_task: Option<&OneTask>) -> anyhow::Result<()> {
        let result = match one_task {
            Some(record) => {
                let value = serde_json::to_value(record)?;
                self.area.set(ONE_TASK_KEY, value)
            }
            None => self.area.remove(ONE_TASK_KEY),
        };
        result.context("failed to save oneTask")
    }

    #[tracing::instrument(skip(self))]
    pub fn load_snapshot(&self) -> anyhow::Result<Snapshot> {
        let mut keys: Vec<&str> = Slot::ALL.iter().map(|slot| slot.key()).collect();
        keys.push(ONE_TASK_KEY);
        let mut values = self.area.get(&keys)?;

        let mut snapshot = Snapshot {
            one_task: decode_one_task(values.remove(ONE_TASK_KEY))?,
            lists: BTreeMap::new(),
        };
        for slot in Slot::ALL {
            let tasks = decode_list(slot, values.remove(slot.key()))?;
            snapshot.lists.insert(slot, tasks);
        }
        debug!(
            has_one_task = snapshot.one_task.is_some(),
            "loaded snapshot"
        );
        Ok(snapshot)
    }

    /// Reads the whole slot, applies `transform`, and writes the whole slot
    /// back when the outcome calls for a write.
    #[tracing::instrument(skip(self, transform))]
    pub fn update_list<F>(&mut self, slot: Slot, transform: F) -> anyhow::Result<Outcome>
    where
        F: FnOnce(&mut Vec<Task>) -> Outcome,
    {
        let mut tasks = self.load_list(slot)?;
        let outcome = transform(&mut tasks);
        if outcome.is_write() {
            self.save_list(slot, &tasks)?;
            info!(%slot, count = tasks.len(), "slot updated");
        } else {
            debug!(%slot, ?outcome, "slot left untouched");
        }
        Ok(outcome)
    }
}

fn decode_list(slot: Slot, value: Option<Value>) -> anyhow::Result<Vec<Task>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => {
            serde_json::from_value(value).with_context(|| format!("failed parsing slot {slot}"))
        }
    }
}

fn decode_one_task(value: Option<Value>) -> anyhow::Result<Option<OneTask>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .context("failed parsing oneTask"),
    }
}
