//! Popup controller: turns UI events into operations and storage changes
//! into fresh markup.

use std::sync::mpsc::Receiver;

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument};

use crate::datastore::{DataStore, Snapshot};
use crate::ops::{self, Outcome};
use crate::render::{Renderer, TimerAction, format_elapsed};
use crate::storage::{StorageArea, StorageChange};
use crate::task::{Slot, active_task};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddTarget {
    List(Slot),
    OneTask,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditTarget {
    Item { slot: Slot, id: String },
    OneTask,
}

/// An open inline text input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineInput {
    Add {
        target: AddTarget,
        buffer: String,
    },
    Edit {
        target: EditTarget,
        original: String,
        buffer: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Escape,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickTarget {
    Checkbox { slot: Slot, id: String },
    Delete { slot: Slot, id: String },
    Timer {
        slot: Slot,
        id: String,
        action: TimerAction,
    },
    Pin { id: String },
    DeleteOneTask,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopupEvent {
    Loaded,
    Click(ClickTarget),
    DoubleClick(EditTarget),
    Drop { slot: Slot, from: usize, to: usize },
    BeginAdd(AddTarget),
    Input(String),
    Key(Key),
    Blur,
    StorageChanged,
    Tick,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Replace the whole popup body.
    Render(String),
    /// Update one elapsed label in place.
    RepaintTimer { id: String, label: String },
    Alert(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DisplayTick {
    slot: Slot,
    id: String,
    next_due: DateTime<Utc>,
}

pub struct Popup<S> {
    store: DataStore<S>,
    renderer: Renderer,
    changes: Receiver<StorageChange>,
    tick_interval: Duration,
    tick: Option<DisplayTick>,
    input: Option<InlineInput>,
}

impl<S: StorageArea> Popup<S> {
    pub fn new(
        mut store: DataStore<S>,
        renderer: Renderer,
        tick_interval: Duration,
    ) -> anyhow::Result<Self> {
        if tick_interval.num_milliseconds() < 1 {
            return Err(anyhow!(
                "tick interval must be at least 1ms, got {}ms",
                tick_interval.num_milliseconds()
            ));
        }
        let changes = store.subscribe();
        Ok(Self {
            store,
            renderer,
            changes,
            tick_interval,
            tick: None,
            input: None,
        })
    }

    pub fn store(&self) -> &DataStore<S> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut DataStore<S> {
        &mut self.store
    }

    pub fn input(&self) -> Option<&InlineInput> {
        self.input.as_ref()
    }

    /// The timer whose label the tick currently repaints.
    pub fn ticking(&self) -> Option<(Slot, &str)> {
        self.tick.as_ref().map(|t| (t.slot, t.id.as_str()))
    }

    #[instrument(skip(self, now))]
    pub fn handle(&mut self, event: PopupEvent, now: DateTime<Utc>) -> anyhow::Result<Vec<Effect>> {
        let mut effects = Vec::new();
        let mut force_render = false;

        match event {
            PopupEvent::Loaded | PopupEvent::StorageChanged => force_render = true,
            PopupEvent::Tick => return self.on_tick(now),
            PopupEvent::Click(target) => self.on_click(target, now, &mut effects)?,
            PopupEvent::DoubleClick(target) => self.begin_edit(target)?,
            PopupEvent::Drop { slot, from, to } => {
                let outcome = ops::reorder(&mut self.store, slot, from, to)?;
                report(outcome, &mut effects);
            }
            PopupEvent::BeginAdd(target) => {
                self.input = Some(InlineInput::Add {
                    target,
                    buffer: String::new(),
                });
            }
            PopupEvent::Input(text) => match self.input.as_mut() {
                Some(InlineInput::Add { buffer, .. }) | Some(InlineInput::Edit { buffer, .. }) => {
                    *buffer = text;
                }
                None => debug!("input without an open editor"),
            },
            PopupEvent::Key(Key::Enter) => {
                force_render = self.commit(now, &mut effects)?;
            }
            PopupEvent::Key(Key::Escape) => {
                force_render = matches!(self.input.take(), Some(InlineInput::Edit { .. }));
            }
            PopupEvent::Blur => {
                if matches!(self.input, Some(InlineInput::Edit { .. })) {
                    force_render = self.commit(now, &mut effects)?;
                } else {
                    self.input = None;
                }
            }
        }

        let drained = self.changes.try_iter().count();
        if force_render || drained > 0 {
            debug!(drained, force_render, "re-rendering popup");
            effects.push(self.render(now)?);
        }
        Ok(effects)
    }

    fn render(&mut self, now: DateTime<Utc>) -> anyhow::Result<Effect> {
        let snapshot = self.store.load_snapshot()?;
        let markup = self.renderer.render_popup(&snapshot, now);
        self.reconcile_tick(&snapshot, now);
        Ok(Effect::Render(markup))
    }

    /// Keeps exactly one tick, keyed by the persisted running timer.
    fn reconcile_tick(&mut self, snapshot: &Snapshot, now: DateTime<Utc>) {
        match snapshot.running_timer() {
            None => {
                if let Some(old) = self.tick.take() {
                    info!(id = %old.id, "display tick cleared");
                }
            }
            Some((slot, task)) => {
                let same = self
                    .tick
                    .as_ref()
                    .is_some_and(|t| t.slot == slot && t.id == task.id);
                if !same {
                    info!(%slot, id = %task.id, "display tick started");
                    self.tick = Some(DisplayTick {
                        slot,
                        id: task.id.clone(),
                        next_due: now + self.tick_interval,
                    });
                }
            }
        }
    }

    /// Repaints the running timer's label. Reads storage, never writes it.
    fn on_tick(&mut self, now: DateTime<Utc>) -> anyhow::Result<Vec<Effect>> {
        let Some(tick) = self.tick.as_mut() else {
            return Ok(Vec::new());
        };
        if now < tick.next_due {
            return Ok(Vec::new());
        }
        // skip every slot missed while asleep
        let interval_ms = self.tick_interval.num_milliseconds();
        let missed = (now - tick.next_due).num_milliseconds() / interval_ms;
        tick.next_due += Duration::milliseconds((missed + 1) * interval_ms);

        let tasks = self.store.load_list(tick.slot)?;
        let Some(task) = tasks.iter().find(|t| t.id == tick.id && t.is_running()) else {
            debug!(id = %tick.id, "ticking timer no longer running");
            return Ok(Vec::new());
        };
        Ok(vec![Effect::RepaintTimer {
            id: task.id.clone(),
            label: format_elapsed(task.elapsed_secs(now)),
        }])
    }

    fn on_click(
        &mut self,
        target: ClickTarget,
        now: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) -> anyhow::Result<()> {
        let outcome = match target {
            ClickTarget::Checkbox { slot, id } => {
                if !self.checkbox_enabled(slot, &id)? {
                    debug!(%slot, id = %id, "checkbox disabled for non-active item");
                    return Ok(());
                }
                ops::toggle_complete(&mut self.store, slot, &id, now)?
            }
            ClickTarget::Delete { slot, id } => ops::delete_task(&mut self.store, slot, &id, now)?,
            ClickTarget::Timer { slot, id, action } => match action {
                TimerAction::Start | TimerAction::Restart => {
                    ops::start_timer(&mut self.store, slot, &id, now)?
                }
                TimerAction::End => ops::end_timer(&mut self.store, slot, &id, now)?,
            },
            ClickTarget::Pin { id } => ops::pin_task(&mut self.store, Slot::Tasks, &id)?,
            ClickTarget::DeleteOneTask => ops::delete_one_task(&mut self.store, now)?,
        };
        report(outcome, effects);
        Ok(())
    }

    /// On lists with an active item only that item (or a completed one, to
    /// reopen it) can be checked.
    fn checkbox_enabled(&self, slot: Slot, id: &str) -> anyhow::Result<bool> {
        if !slot.has_active_item() {
            return Ok(true);
        }
        let tasks = self.store.load_list(slot)?;
        let completed = tasks.iter().any(|t| t.id == id && t.completed);
        let active = active_task(&tasks).is_some_and(|t| t.id == id);
        Ok(completed || active)
    }

    fn begin_edit(&mut self, target: EditTarget) -> anyhow::Result<()> {
        let original = match &target {
            EditTarget::Item { slot, id } => self
                .store
                .load_list(*slot)?
                .into_iter()
                .find(|t| t.id == *id && !t.completed)
                .map(|t| t.text),
            EditTarget::OneTask => self.store.load_one_task()?.map(|r| r.text),
        };
        match original {
            Some(original) => {
                self.input = Some(InlineInput::Edit {
                    target,
                    buffer: original.clone(),
                    original,
                });
            }
            None => debug!(?target, "nothing editable under double-click"),
        }
        Ok(())
    }

    /// Saves the open input. Returns whether a render is owed regardless of
    /// storage changes.
    fn commit(&mut self, now: DateTime<Utc>, effects: &mut Vec<Effect>) -> anyhow::Result<bool> {
        let Some(input) = self.input.take() else {
            return Ok(false);
        };
        match input {
            InlineInput::Add { target, buffer } => {
                let outcome = match target {
                    AddTarget::List(slot) => ops::add_task(&mut self.store, slot, &buffer, now)?,
                    AddTarget::OneTask => ops::set_one_task(&mut self.store, &buffer, now)?,
                };
                report(outcome, effects);
                Ok(false)
            }
            InlineInput::Edit {
                target,
                original,
                buffer,
            } => {
                if buffer.trim() != original {
                    let outcome = match target {
                        EditTarget::Item { slot, id } => {
                            ops::edit_text(&mut self.store, slot, &id, &buffer)?
                        }
                        EditTarget::OneTask => ops::edit_one_task(&mut self.store, &buffer)?,
                    };
                    report(outcome, effects);
                }
                Ok(true)
            }
        }
    }
}

fn report(outcome: Outcome, effects: &mut Vec<Effect>) {
    match outcome {
        Outcome::Rejected(rejection) => match rejection.alert() {
            Some(message) => {
                info!(%rejection, "operation rejected");
                effects.push(Effect::Alert(message));
            }
            None => debug!(%rejection, "operation rejected silently"),
        },
        other => debug!(?other, "operation finished"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::mpsc::{self, Receiver};

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::Value;

    use super::*;
    use crate::config::Config;
    use crate::storage::MemoryStorage;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn popup() -> Popup<MemoryStorage> {
        let renderer = Renderer::new(&Config::default()).unwrap();
        Popup::new(
            DataStore::new(MemoryStorage::new()),
            renderer,
            Duration::seconds(1),
        )
        .unwrap()
    }

    fn add(popup: &mut Popup<MemoryStorage>, target: AddTarget, text: &str, now: DateTime<Utc>) {
        popup.handle(PopupEvent::BeginAdd(target), now).unwrap();
        popup
            .handle(PopupEvent::Input(text.to_string()), now)
            .unwrap();
        popup.handle(PopupEvent::Key(Key::Enter), now).unwrap();
    }

    fn queue_ids(popup: &Popup<MemoryStorage>) -> Vec<String> {
        popup
            .store()
            .load_list(Slot::Tasks)
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect()
    }

    fn renders(effects: &[Effect]) -> usize {
        effects
            .iter()
            .filter(|e| matches!(e, Effect::Render(_)))
            .count()
    }

    #[test]
    fn add_commits_on_enter_and_renders() {
        let mut popup = popup();
        popup
            .handle(PopupEvent::BeginAdd(AddTarget::List(Slot::Tasks)), at())
            .unwrap();
        popup
            .handle(PopupEvent::Input("Buy milk".to_string()), at())
            .unwrap();
        let effects = popup.handle(PopupEvent::Key(Key::Enter), at()).unwrap();

        assert_eq!(renders(&effects), 1);
        let Some(Effect::Render(markup)) = effects.last() else {
            panic!("expected a render");
        };
        assert!(markup.contains("Buy milk"));
        assert!(popup.input().is_none());
    }

    #[test]
    fn escape_and_blur_discard_new_text() {
        let mut popup = popup();
        popup
            .handle(PopupEvent::BeginAdd(AddTarget::List(Slot::Today)), at())
            .unwrap();
        popup.handle(PopupEvent::Input("x".to_string()), at()).unwrap();
        let effects = popup.handle(PopupEvent::Key(Key::Escape), at()).unwrap();
        assert!(effects.is_empty());

        popup
            .handle(PopupEvent::BeginAdd(AddTarget::List(Slot::Today)), at())
            .unwrap();
        popup.handle(PopupEvent::Input("y".to_string()), at()).unwrap();
        popup.handle(PopupEvent::Blur, at()).unwrap();

        assert!(popup.input().is_none());
        assert!(popup.store().load_list(Slot::Today).unwrap().is_empty());
    }

    #[test]
    fn empty_edit_still_renders_without_change() {
        let mut popup = popup();
        add(&mut popup, AddTarget::List(Slot::Tasks), "Buy milk", at());
        let id = queue_ids(&popup).remove(0);

        popup
            .handle(
                PopupEvent::DoubleClick(EditTarget::Item {
                    slot: Slot::Tasks,
                    id,
                }),
                at(),
            )
            .unwrap();
        popup.handle(PopupEvent::Input("   ".to_string()), at()).unwrap();
        let effects = popup.handle(PopupEvent::Blur, at()).unwrap();

        assert_eq!(renders(&effects), 1);
        assert_eq!(
            popup.store().load_list(Slot::Tasks).unwrap()[0].text,
            "Buy milk"
        );
    }

    #[test]
    fn completed_items_are_not_editable() {
        let mut popup = popup();
        add(&mut popup, AddTarget::List(Slot::Today), "milk", at());
        let id = popup.store().load_list(Slot::Today).unwrap()[0].id.clone();
        popup
            .handle(
                PopupEvent::Click(ClickTarget::Checkbox {
                    slot: Slot::Today,
                    id: id.clone(),
                }),
                at(),
            )
            .unwrap();
        popup
            .handle(
                PopupEvent::DoubleClick(EditTarget::Item {
                    slot: Slot::Today,
                    id,
                }),
                at(),
            )
            .unwrap();
        assert!(popup.input().is_none());
    }

    #[test]
    fn loaded_resumes_tick_for_persisted_timer() {
        let mut popup = popup();
        add(&mut popup, AddTarget::List(Slot::Tasks), "a", at());
        let id = queue_ids(&popup).remove(0);
        ops::start_timer(popup.store_mut(), Slot::Tasks, &id, at()).unwrap();

        let mut reopened = Popup::new(
            DataStore::new(MemoryStorage::new()),
            Renderer::new(&Config::default()).unwrap(),
            Duration::seconds(1),
        )
        .unwrap();
        let tasks = popup.store().load_list(Slot::Tasks).unwrap();
        reopened
            .store_mut()
            .save_list(Slot::Tasks, &tasks)
            .unwrap();
        assert!(reopened.ticking().is_none());

        let later = at() + Duration::minutes(2);
        let effects = reopened.handle(PopupEvent::Loaded, later).unwrap();
        assert_eq!(renders(&effects), 1);
        assert_eq!(reopened.ticking(), Some((Slot::Tasks, id.as_str())));

        let effects = reopened
            .handle(PopupEvent::Tick, later + Duration::seconds(1))
            .unwrap();
        assert_eq!(
            effects,
            vec![Effect::RepaintTimer {
                id,
                label: "2m".to_string()
            }]
        );
    }

    #[test]
    fn tick_never_writes() {
        let mut popup = popup();
        add(&mut popup, AddTarget::List(Slot::Tasks), "a", at());
        let id = queue_ids(&popup).remove(0);
        popup
            .handle(
                PopupEvent::Click(ClickTarget::Timer {
                    slot: Slot::Tasks,
                    id,
                    action: TimerAction::Start,
                }),
                at(),
            )
            .unwrap();

        let writes = popup.store_mut().subscribe();
        for second in 1..=5 {
            let effects = popup
                .handle(PopupEvent::Tick, at() + Duration::seconds(second))
                .unwrap();
            assert_eq!(effects.len(), 1);
            assert!(matches!(effects[0], Effect::RepaintTimer { .. }));
        }
        // not due yet
        let effects = popup
            .handle(PopupEvent::Tick, at() + Duration::milliseconds(5_500))
            .unwrap();
        assert!(effects.is_empty());
        assert_eq!(writes.try_iter().count(), 0);
    }

    #[test]
    fn tick_follows_the_running_timer() {
        let mut popup = popup();
        add(&mut popup, AddTarget::List(Slot::Tasks), "a", at());
        add(
            &mut popup,
            AddTarget::List(Slot::Tasks),
            "b",
            at() + Duration::milliseconds(1),
        );
        let ids = queue_ids(&popup);
        let start = |id: &str| {
            PopupEvent::Click(ClickTarget::Timer {
                slot: Slot::Tasks,
                id: id.to_string(),
                action: TimerAction::Start,
            })
        };

        popup.handle(start(&ids[0]), at()).unwrap();
        assert_eq!(popup.ticking(), Some((Slot::Tasks, ids[0].as_str())));

        popup
            .handle(
                PopupEvent::Click(ClickTarget::Timer {
                    slot: Slot::Tasks,
                    id: ids[0].clone(),
                    action: TimerAction::End,
                }),
                at() + Duration::seconds(5),
            )
            .unwrap();
        assert!(popup.ticking().is_none());

        // the ended task completed, so b is active now
        popup.handle(start(&ids[1]), at()).unwrap();
        assert_eq!(popup.ticking(), Some((Slot::Tasks, ids[1].as_str())));
    }

    #[test]
    fn pin_while_running_alerts() {
        let mut popup = popup();
        add(&mut popup, AddTarget::List(Slot::Tasks), "a", at());
        add(
            &mut popup,
            AddTarget::List(Slot::Tasks),
            "b",
            at() + Duration::milliseconds(1),
        );
        let ids = queue_ids(&popup);
        popup
            .handle(
                PopupEvent::Click(ClickTarget::Timer {
                    slot: Slot::Tasks,
                    id: ids[0].clone(),
                    action: TimerAction::Start,
                }),
                at(),
            )
            .unwrap();

        let effects = popup
            .handle(PopupEvent::Click(ClickTarget::Pin { id: ids[1].clone() }), at())
            .unwrap();
        assert_eq!(
            effects,
            vec![Effect::Alert(
                "Please end the current task timer before switching to another task.".to_string()
            )]
        );
        assert_eq!(queue_ids(&popup), ids);
    }

    #[test]
    fn non_active_start_is_silent_and_inert() {
        let mut popup = popup();
        add(&mut popup, AddTarget::List(Slot::Tasks), "a", at());
        add(
            &mut popup,
            AddTarget::List(Slot::Tasks),
            "b",
            at() + Duration::milliseconds(1),
        );
        let ids = queue_ids(&popup);
        let effects = popup
            .handle(
                PopupEvent::Click(ClickTarget::Timer {
                    slot: Slot::Tasks,
                    id: ids[1].clone(),
                    action: TimerAction::Start,
                }),
                at(),
            )
            .unwrap();
        assert!(effects.is_empty());
        assert!(popup.ticking().is_none());

        let effects = popup
            .handle(
                PopupEvent::Click(ClickTarget::Checkbox {
                    slot: Slot::Tasks,
                    id: ids[1].clone(),
                }),
                at(),
            )
            .unwrap();
        assert!(effects.is_empty());
        assert!(!popup.store().load_list(Slot::Tasks).unwrap()[1].completed);
    }

    #[test]
    fn second_one_task_alerts() {
        let mut popup = popup();
        add(&mut popup, AddTarget::OneTask, "Write report", at());
        popup
            .handle(PopupEvent::BeginAdd(AddTarget::OneTask), at())
            .unwrap();
        popup
            .handle(PopupEvent::Input("Another".to_string()), at())
            .unwrap();
        let effects = popup.handle(PopupEvent::Key(Key::Enter), at()).unwrap();
        assert!(matches!(effects.as_slice(), [Effect::Alert(_)]));
    }

    #[test]
    fn drop_reorders_subtasks() {
        let mut popup = popup();
        add(&mut popup, AddTarget::OneTask, "Write report", at());
        for (n, text) in ["a", "b", "c"].into_iter().enumerate() {
            add(
                &mut popup,
                AddTarget::List(Slot::Subtasks),
                text,
                at() + Duration::milliseconds(n as i64),
            );
        }
        let effects = popup
            .handle(
                PopupEvent::Drop {
                    slot: Slot::Subtasks,
                    from: 2,
                    to: 0,
                },
                at(),
            )
            .unwrap();
        assert_eq!(renders(&effects), 1);
        let texts: Vec<String> = popup
            .store()
            .load_list(Slot::Subtasks)
            .unwrap()
            .into_iter()
            .map(|t| t.text)
            .collect();
        assert_eq!(texts, vec!["c", "a", "b"]);
    }

    #[test]
    fn end_click_on_a_day_list_alerts_and_spares_subtasks() {
        let mut popup = popup();
        add(&mut popup, AddTarget::OneTask, "Write report", at());
        add(&mut popup, AddTarget::List(Slot::Subtasks), "outline", at());
        add(&mut popup, AddTarget::List(Slot::Today), "milk", at());
        let sub = popup.store().load_list(Slot::Subtasks).unwrap()[0].id.clone();
        let day = popup.store().load_list(Slot::Today).unwrap()[0].id.clone();
        assert_eq!(sub, day);
        popup
            .handle(
                PopupEvent::Click(ClickTarget::Timer {
                    slot: Slot::Subtasks,
                    id: sub,
                    action: TimerAction::Start,
                }),
                at(),
            )
            .unwrap();

        let effects = popup
            .handle(
                PopupEvent::Click(ClickTarget::Timer {
                    slot: Slot::Today,
                    id: day,
                    action: TimerAction::End,
                }),
                at() + Duration::seconds(3),
            )
            .unwrap();
        assert_eq!(
            effects,
            vec![Effect::Alert("The today list has no timers.".to_string())]
        );
        assert!(popup.store().load_list(Slot::Subtasks).unwrap()[0].is_running());
    }

    #[test]
    fn reopening_while_a_timer_runs_alerts() {
        let mut popup = popup();
        add(&mut popup, AddTarget::List(Slot::Tasks), "a", at());
        add(
            &mut popup,
            AddTarget::List(Slot::Tasks),
            "b",
            at() + Duration::milliseconds(1),
        );
        let ids = queue_ids(&popup);
        let checkbox = |id: &str| {
            PopupEvent::Click(ClickTarget::Checkbox {
                slot: Slot::Tasks,
                id: id.to_string(),
            })
        };
        popup.handle(checkbox(&ids[0]), at()).unwrap();
        popup
            .handle(
                PopupEvent::Click(ClickTarget::Timer {
                    slot: Slot::Tasks,
                    id: ids[1].clone(),
                    action: TimerAction::Start,
                }),
                at(),
            )
            .unwrap();

        let effects = popup.handle(checkbox(&ids[0]), at()).unwrap();
        assert!(matches!(effects.as_slice(), [Effect::Alert(_)]));
        let tasks = popup.store().load_list(Slot::Tasks).unwrap();
        assert!(tasks[0].completed);
        assert!(tasks[1].is_running());
    }

    #[test]
    fn non_positive_tick_interval_is_rejected() {
        for interval in [Duration::zero(), Duration::milliseconds(-5)] {
            let built = Popup::new(
                DataStore::new(MemoryStorage::new()),
                Renderer::new(&Config::default()).unwrap(),
                interval,
            );
            assert!(built.is_err());
        }
    }

    #[test]
    fn tick_catches_up_after_a_long_gap() {
        let mut popup = popup();
        add(&mut popup, AddTarget::List(Slot::Tasks), "a", at());
        let id = queue_ids(&popup).remove(0);
        popup
            .handle(
                PopupEvent::Click(ClickTarget::Timer {
                    slot: Slot::Tasks,
                    id,
                    action: TimerAction::Start,
                }),
                at(),
            )
            .unwrap();

        let woke = at() + Duration::hours(1) + Duration::milliseconds(500);
        assert_eq!(popup.handle(PopupEvent::Tick, woke).unwrap().len(), 1);
        let early = at() + Duration::hours(1) + Duration::milliseconds(900);
        assert!(popup.handle(PopupEvent::Tick, early).unwrap().is_empty());
        let due = at() + Duration::hours(1) + Duration::seconds(1);
        assert_eq!(popup.handle(PopupEvent::Tick, due).unwrap().len(), 1);
    }

    struct Unavailable;

    impl StorageArea for Unavailable {
        fn get(&self, _keys: &[&str]) -> anyhow::Result<BTreeMap<String, Value>> {
            Err(anyhow::anyhow!("storage unavailable"))
        }

        fn set(&mut self, _key: &str, _value: Value) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("storage unavailable"))
        }

        fn remove(&mut self, _key: &str) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("storage unavailable"))
        }

        fn subscribe(&mut self) -> Receiver<StorageChange> {
            mpsc::channel().1
        }
    }

    #[test]
    fn storage_failure_propagates() {
        let mut popup = Popup::new(
            DataStore::new(Unavailable),
            Renderer::new(&Config::default()).unwrap(),
            Duration::seconds(1),
        )
        .unwrap();
        assert!(popup.handle(PopupEvent::Loaded, at()).is_err());
        assert!(
            popup
                .handle(
                    PopupEvent::Click(ClickTarget::Delete {
                        slot: Slot::Today,
                        id: "1".to_string()
                    }),
                    at()
                )
                .is_err()
        );
    }
}
