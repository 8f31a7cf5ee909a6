use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};

use crate::cli::{Invocation, View};
use crate::config::Config;
use crate::controller::{Effect, Popup, PopupEvent};
use crate::datastore::DataStore;
use crate::ops::{self, Outcome};
use crate::render::Renderer;
use crate::storage::{FileStorage, StorageArea};
use crate::task::{ONE_TASK_KEY, Slot, Task, partition};
use crate::watcher::StoreWatcher;

pub const POPUP_FILE_NAME: &str = "popup.html";

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add", "set", "clear", "delete", "toggle", "edit", "start", "end", "pin", "move", "list",
        "render", "export", "watch", "show", "help", "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(store, cfg, renderer, inv))]
pub fn dispatch(
    store: &mut DataStore<FileStorage>,
    cfg: &Config,
    renderer: &Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let command = inv.command.as_str();
    let view = inv.view;
    let args = &inv.command_args;

    debug!(command, %view, ?args, "dispatching command");

    match command {
        "add" => cmd_add(store, view, args, now),
        "set" => cmd_set(store, view, args, now),
        "clear" => cmd_clear(store, view, now),
        "delete" => cmd_delete(store, view, args, now),
        "toggle" => cmd_toggle(store, view, args, now),
        "edit" => cmd_edit(store, view, args),
        "start" => cmd_start(store, view, args, now),
        "end" => cmd_end(store, view, args, now),
        "pin" => cmd_pin(store, view, args),
        "move" => cmd_move(store, view, args),
        "list" => cmd_list(store, renderer, view, now),
        "render" => cmd_render(store, renderer, args, now),
        "export" => cmd_export(store),
        "watch" => cmd_watch(store, cfg, renderer, args),
        "show" => cmd_show(cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

#[instrument(skip(store, args, now))]
fn cmd_add(
    store: &mut DataStore<FileStorage>,
    view: View,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command add");
    let text = join_text(args)?;
    let outcome = ops::add_task(store, view.slot(), &text, now)?;
    if let Outcome::Created(id) = &outcome {
        println!("Added {id} to {view}.");
    }
    report(outcome)
}

#[instrument(skip(store, args, now))]
fn cmd_set(
    store: &mut DataStore<FileStorage>,
    view: View,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command set");
    require_view(view, View::Focus, "set")?;
    let text = join_text(args)?;
    let outcome = ops::set_one_task(store, &text, now)?;
    if outcome == Outcome::Changed {
        println!("Focus task set.");
    }
    report(outcome)
}

#[instrument(skip(store, now))]
fn cmd_clear(
    store: &mut DataStore<FileStorage>,
    view: View,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command clear");
    require_view(view, View::Focus, "clear")?;
    let outcome = ops::delete_one_task(store, now)?;
    match outcome {
        Outcome::Changed => println!("Focus task and subtasks cleared."),
        _ => println!("No focus task."),
    }
    report(outcome)
}

#[instrument(skip(store, args, now))]
fn cmd_delete(
    store: &mut DataStore<FileStorage>,
    view: View,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command delete");
    let slot = view.slot();
    let id = resolve_item(store, slot, first_arg(args, "delete")?)?;
    let outcome = ops::delete_task(store, slot, &id, now)?;
    if outcome == Outcome::Changed {
        println!("Deleted {id}.");
    }
    report(outcome)
}

#[instrument(skip(store, args, now))]
fn cmd_toggle(
    store: &mut DataStore<FileStorage>,
    view: View,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command toggle");
    let slot = view.slot();
    let id = resolve_item(store, slot, first_arg(args, "toggle")?)?;
    let outcome = ops::toggle_complete(store, slot, &id, now)?;
    if outcome == Outcome::Changed {
        let done = store.load_list(slot)?.iter().any(|t| t.id == id && t.completed);
        println!("{id} is now {}.", if done { "done" } else { "open" });
    }
    report(outcome)
}

/// `edit ITEM TEXT..`; in the focus view `edit focus TEXT..` renames the
/// focus task itself.
#[instrument(skip(store, args))]
fn cmd_edit(
    store: &mut DataStore<FileStorage>,
    view: View,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command edit");
    let item = first_arg(args, "edit")?;
    let text = args[1..].join(" ");

    let outcome = if view == View::Focus && item == "focus" {
        ops::edit_one_task(store, &text)?
    } else {
        let slot = view.slot();
        let id = resolve_item(store, slot, item)?;
        ops::edit_text(store, slot, &id, &text)?
    };
    match outcome {
        Outcome::Changed => println!("Edited."),
        _ => println!("Nothing changed."),
    }
    report(outcome)
}

#[instrument(skip(store, args, now))]
fn cmd_start(
    store: &mut DataStore<FileStorage>,
    view: View,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command start");
    let slot = view.slot();
    let id = match args.first() {
        Some(item) => resolve_item(store, slot, item)?,
        None => active_id(store, slot)?,
    };
    let outcome = ops::start_timer(store, slot, &id, now)?;
    match &outcome {
        Outcome::Changed => println!("Started {id}."),
        Outcome::Unchanged => println!("{id} is already running."),
        _ => {}
    }
    report(outcome)
}

#[instrument(skip(store, args, now))]
fn cmd_end(
    store: &mut DataStore<FileStorage>,
    view: View,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command end");
    let slot = view.slot();
    let id = match args.first() {
        Some(item) => resolve_item(store, slot, item)?,
        None => active_id(store, slot)?,
    };
    let outcome = ops::end_timer(store, slot, &id, now)?;
    if outcome == Outcome::Changed {
        let tasks = store.load_list(slot)?;
        let elapsed = tasks
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.elapsed_secs(now))
            .unwrap_or_default();
        println!("Ended {id} after {}.", crate::render::format_elapsed(elapsed));
    } else if outcome == Outcome::Unchanged {
        println!("{id} is not running.");
    }
    report(outcome)
}

#[instrument(skip(store, args))]
fn cmd_pin(store: &mut DataStore<FileStorage>, view: View, args: &[String]) -> anyhow::Result<()> {
    info!("command pin");
    let slot = view.slot();
    let id = resolve_item(store, slot, first_arg(args, "pin")?)?;
    let outcome = ops::pin_task(store, slot, &id)?;
    if outcome == Outcome::Changed {
        println!("Pinned {id}.");
    }
    report(outcome)
}

/// `move FROM TO`, both 1-based positions among the open rows.
#[instrument(skip(store, args))]
fn cmd_move(store: &mut DataStore<FileStorage>, view: View, args: &[String]) -> anyhow::Result<()> {
    info!("command move");
    let [from, to] = args else {
        return Err(anyhow!("usage: onetask [VIEW] move FROM TO"));
    };
    let from = parse_position(from)?;
    let to = parse_position(to)?;
    let outcome = ops::reorder(store, view.slot(), from - 1, to - 1)?;
    if outcome == Outcome::Changed {
        println!("Moved @{from} to @{to}.");
    }
    report(outcome)
}

#[instrument(skip(store, renderer, now))]
fn cmd_list(
    store: &mut DataStore<FileStorage>,
    renderer: &Renderer,
    view: View,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command list");
    if view == View::Focus {
        match store.load_one_task()? {
            Some(record) => println!("Focus: {}", record.text),
            None => println!("Focus: (none)"),
        }
    }
    let tasks = store.load_list(view.slot())?;
    renderer.print_list(view.slot(), &tasks, now)
}

#[instrument(skip(store, renderer, args, now))]
fn cmd_render(
    store: &mut DataStore<FileStorage>,
    renderer: &Renderer,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command render");
    let snapshot = store.load_snapshot()?;
    let markup = renderer.render_popup(&snapshot, now);
    match args.first() {
        Some(path) => write_markup(Path::new(path), &markup),
        None => {
            let mut out = std::io::stdout().lock();
            writeln!(out, "{markup}")?;
            Ok(())
        }
    }
}

fn cmd_export(store: &mut DataStore<FileStorage>) -> anyhow::Result<()> {
    info!("command export");
    let mut keys: Vec<&str> = Slot::ALL.iter().map(|slot| slot.key()).collect();
    keys.push(ONE_TASK_KEY);
    let values = store.area().get(&keys)?;
    println!("{}", serde_json::to_string_pretty(&values)?);
    Ok(())
}

/// Drives a popup against the store file: re-renders on every change made
/// by any process and repaints the running timer each tick.
#[instrument(skip(store, cfg, renderer, args))]
fn cmd_watch(
    store: &mut DataStore<FileStorage>,
    cfg: &Config,
    renderer: &Renderer,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command watch");
    let data_dir = store.area().data_dir.clone();
    let out_path = args
        .first()
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir.join(POPUP_FILE_NAME));
    let tick_ms = cfg.get_u64("popup.tick.ms")?.unwrap_or(1000).max(1);
    let tick_ms_i64 = i64::try_from(tick_ms).context("popup.tick.ms is too large")?;

    let area = FileStorage::open(&data_dir)?;
    let mut popup = Popup::new(
        DataStore::new(area),
        renderer.clone(),
        Duration::milliseconds(tick_ms_i64),
    )?;
    let watcher = StoreWatcher::start(&data_dir)?;

    println!("Writing {} (Ctrl-C to stop).", out_path.display());
    emit(&out_path, popup.handle(PopupEvent::Loaded, Utc::now())?)?;

    loop {
        thread::sleep(std::time::Duration::from_millis(tick_ms));
        if watcher.poll() {
            emit(&out_path, popup.handle(PopupEvent::StorageChanged, Utc::now())?)?;
        }
        emit(&out_path, popup.handle(PopupEvent::Tick, Utc::now())?)?;
    }
}

fn emit(out_path: &Path, effects: Vec<Effect>) -> anyhow::Result<()> {
    for effect in effects {
        match effect {
            Effect::Render(markup) => write_markup(out_path, &markup)?,
            Effect::RepaintTimer { id, label } => println!("{id} {label}"),
            Effect::Alert(message) => eprintln!("{message}"),
        }
    }
    Ok(())
}

fn write_markup(path: &Path, markup: &str) -> anyhow::Result<()> {
    fs::write(path, markup).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), bytes = markup.len(), "popup markup written");
    Ok(())
}

fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    let mut entries: Vec<_> = cfg.iter().collect();
    entries.sort();
    for (k, v) in entries {
        println!("{k}={v}");
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!("usage: onetask [OPTIONS] [VIEW] [COMMAND] [ARGS..]");
    println!("views: queue (default), focus, today, tomorrow, others");
    println!(
        "commands: add, set, clear, delete, toggle, edit, start, end, pin, move, list, render, export, watch, show, help, version"
    );
    println!("items are ids or @N positions as shown by list");
    Ok(())
}

/// Prints a rejection's message. Rejections are refusals, not failures.
fn report(outcome: Outcome) -> anyhow::Result<()> {
    if let Outcome::Rejected(rejection) = outcome {
        warn!(%rejection, "operation rejected");
        println!("{rejection}");
    }
    Ok(())
}

fn require_view(view: View, expected: View, command: &str) -> anyhow::Result<()> {
    if view != expected {
        return Err(anyhow!("{command} only applies to the {expected} view"));
    }
    Ok(())
}

fn join_text(args: &[String]) -> anyhow::Result<String> {
    let text = args.join(" ");
    if text.trim().is_empty() {
        return Err(anyhow!("missing task text"));
    }
    Ok(text)
}

fn first_arg<'a>(args: &'a [String], command: &str) -> anyhow::Result<&'a str> {
    args.first()
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{command} needs an item (id or @N)"))
}

fn parse_position(token: &str) -> anyhow::Result<usize> {
    let digits = token.strip_prefix('@').unwrap_or(token);
    match digits.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(anyhow!("invalid position: {token}")),
    }
}

fn active_id(store: &DataStore<FileStorage>, slot: Slot) -> anyhow::Result<String> {
    let tasks = store.load_list(slot)?;
    crate::task::active_task(&tasks)
        .map(|t| t.id.clone())
        .ok_or_else(|| anyhow!("no open item in {slot}"))
}

fn resolve_item(store: &DataStore<FileStorage>, slot: Slot, token: &str) -> anyhow::Result<String> {
    let tasks = store.load_list(slot)?;
    find_item(&tasks, token).ok_or_else(|| anyhow!("no item {token} in {slot}"))
}

/// Looks up an id, or an `@N` position in list order (open rows first).
fn find_item(tasks: &[Task], token: &str) -> Option<String> {
    if let Some(pos) = token.strip_prefix('@') {
        let n = pos.parse::<usize>().ok()?.checked_sub(1)?;
        let (open, done) = partition(tasks);
        return open.into_iter().chain(done).nth(n).map(|t| t.id.clone());
    }
    tasks.iter().find(|t| t.id == token).map(|t| t.id.clone())
}
