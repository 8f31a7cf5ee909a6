use std::fmt;
use std::io::{self, IsTerminal, Write};
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datastore::Snapshot;
use crate::task::{OneTask, Slot, Task, Timer, partition};

/// Which labels the timer button of the active item cycles through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerControls {
    /// `start` / `end`
    TwoState,
    /// `start` / `restart` / `end`
    ThreeState,
}

impl FromStr for TimerControls {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "two-state" | "2" => Ok(TimerControls::TwoState),
            "three-state" | "3" => Ok(TimerControls::ThreeState),
            other => Err(anyhow!("invalid timer controls setting: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    Start,
    Restart,
    End,
}

impl TimerAction {
    pub fn for_timer(controls: TimerControls, timer: Option<&Timer>) -> Self {
        match timer {
            Some(t) if t.is_running => TimerAction::End,
            Some(t) if controls == TimerControls::ThreeState && t.total_elapsed > 0 => {
                TimerAction::Restart
            }
            _ => TimerAction::Start,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimerAction::Start => "start",
            TimerAction::Restart => "restart",
            TimerAction::End => "end",
        }
    }
}

impl fmt::Display for TimerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    queue_controls: TimerControls,
    focus_controls: TimerControls,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };
        let queue_controls = cfg
            .get("render.timer.queue")
            .unwrap_or_else(|| "two-state".to_string())
            .parse()?;
        let focus_controls = cfg
            .get("render.timer.focus")
            .unwrap_or_else(|| "three-state".to_string())
            .parse()?;

        Ok(Self {
            color,
            queue_controls,
            focus_controls,
        })
    }

    /// Button policy for a timed slot: three-state on subtasks, two-state on
    /// the queue unless configured otherwise.
    pub fn controls_for(&self, slot: Slot) -> TimerControls {
        match slot {
            Slot::Subtasks => self.focus_controls,
            _ => self.queue_controls,
        }
    }

    /// The whole popup: queue, focus task and the three day lists.
    #[tracing::instrument(skip_all)]
    pub fn render_popup(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> String {
        let mut html = String::new();
        html.push_str(&section(
            "queue",
            "task-list",
            &self.render_queue(snapshot.list(Slot::Tasks), now),
        ));
        html.push_str(&section(
            "focus",
            "one-task-list",
            &self.render_focus(
                snapshot.one_task.as_ref(),
                snapshot.list(Slot::Subtasks),
                now,
            ),
        ));
        for slot in [Slot::Today, Slot::Tomorrow, Slot::Others] {
            html.push_str(&section(
                slot.key(),
                &format!("{}-list", slot.key()),
                &self.render_day_list(slot, snapshot.list(slot)),
            ));
        }
        html
    }

    pub fn render_queue(&self, tasks: &[Task], now: DateTime<Utc>) -> String {
        let (open, done) = partition(tasks);
        let mut html = String::new();

        for (index, task) in open.iter().enumerate() {
            let active = index == 0;
            let id = escape_html(&task.id);
            let disabled = if active { "" } else { " disabled" };
            let action =
                TimerAction::for_timer(self.controls_for(Slot::Tasks), task.timer.as_ref());
            let running = if task.is_running() { " running" } else { "" };
            let pin = if active {
                String::new()
            } else {
                format!(
                    r#"<span class="pin-icon" data-pin-id="{id}" title="Set as active task">&#128204;</span>"#
                )
            };

            html.push_str(&format!(
                concat!(
                    r#"<div class="task-item{active}" draggable="true" data-index="{index}" data-type="tasks">"#,
                    r#"<button class="task-checkbox" data-id="{id}"{disabled}></button>"#,
                    r#"<span class="task-text">{text}</span>"#,
                    r#"<div class="task-timer-controls">{label}"#,
                    r#"<button class="task-timer-btn{running}" data-id="{id}" data-action="{action}"{disabled}>{action}</button>"#,
                    r#"</div>{pin}<button class="delete-btn" data-id="{id}">Delete</button></div>"#,
                ),
                active = if active { " active" } else { "" },
                index = index,
                id = id,
                disabled = disabled,
                text = escape_html(&task.text),
                label = timer_label("task-timer-display", task, now),
                running = running,
                action = action,
                pin = pin,
            ));
        }

        if !done.is_empty() {
            html.push_str(COMPLETED_OPEN);
            for task in done {
                let id = escape_html(&task.id);
                html.push_str(&format!(
                    concat!(
                        r#"<div class="task-item completed">"#,
                        r#"<button class="task-checkbox completed" data-id="{id}"></button>"#,
                        r#"<span class="task-text completed">{text}</span>{label}"#,
                        r#"<button class="delete-btn" data-id="{id}">Delete</button></div>"#,
                    ),
                    id = id,
                    text = escape_html(&task.text),
                    label = timer_label("task-timer-display", task, now),
                ));
            }
            html.push_str("</div>");
        }

        html
    }

    pub fn render_focus(
        &self,
        one_task: Option<&OneTask>,
        subtasks: &[Task],
        now: DateTime<Utc>,
    ) -> String {
        let Some(one_task) = one_task else {
            return concat!(
                r#"<div class="add-task-inline" id="add-task-inline" data-add="oneTask">"#,
                r#"<span class="plus-icon">+</span><span id="add-task-text">Add task</span></div>"#,
            )
            .to_string();
        };

        let (open, done) = partition(subtasks);
        let mut html = format!(
            concat!(
                r#"<div class="todo-item"><span class="todo-text">{text}</span>"#,
                r#"<button class="delete-btn" data-one-task="true">Delete</button></div>"#,
                r#"<div class="add-subtask"><input type="text" id="subtask-input" placeholder="Add a subtask..." />"#,
                r#"<button id="add-subtask-btn">Add</button></div>"#,
            ),
            text = escape_html(&one_task.text),
        );

        if let Some((focus, rest)) = open.split_first() {
            html.push_str(&self.subtask_row(focus, true, 0, now));
            if !rest.is_empty() {
                html.push_str(r#"<div class="subtask-list" id="remaining-subtasks">"#);
                for (offset, subtask) in rest.iter().enumerate() {
                    html.push_str(&self.subtask_row(subtask, false, offset + 1, now));
                }
                html.push_str("</div>");
            }
        }

        if !done.is_empty() {
            html.push_str(COMPLETED_OPEN);
            html.push_str(r#"<div class="subtask-list">"#);
            for subtask in done {
                let id = escape_html(&subtask.id);
                html.push_str(&format!(
                    concat!(
                        r#"<div class="subtask-item">"#,
                        r#"<button class="subtask-checkbox completed" data-id="{id}"></button>"#,
                        r#"<span class="subtask-text completed">{text}</span>{label}"#,
                        r#"<button class="subtask-delete-btn" data-id="{id}">&#8855;</button></div>"#,
                    ),
                    id = id,
                    text = escape_html(&subtask.text),
                    label = timer_label("subtask-timer-display", subtask, now),
                ));
            }
            html.push_str("</div></div>");
        }

        html
    }

    fn subtask_row(&self, subtask: &Task, focus: bool, index: usize, now: DateTime<Utc>) -> String {
        let id = escape_html(&subtask.id);
        let disabled = if focus { "" } else { " disabled" };
        let action =
            TimerAction::for_timer(self.controls_for(Slot::Subtasks), subtask.timer.as_ref());
        format!(
            concat!(
                r#"<div class="{class}" draggable="true" data-index="{index}" data-type="subtasks">"#,
                r#"<button class="subtask-checkbox" data-id="{id}"{disabled}></button>"#,
                r#"<span class="subtask-text">{text}</span>"#,
                r#"<div class="subtask-timer-controls">{label}"#,
                r#"<button class="subtask-timer-btn{running}" data-id="{id}" data-action="{action}"{disabled}>{action}</button>"#,
                r#"</div><button class="subtask-delete-btn" data-id="{id}">&#8855;</button></div>"#,
            ),
            class = if focus { "focus-subtask" } else { "subtask-item" },
            index = index,
            id = id,
            disabled = disabled,
            text = escape_html(&subtask.text),
            label = timer_label("subtask-timer-display", subtask, now),
            running = if subtask.is_running() { " running" } else { "" },
            action = action,
        )
    }

    pub fn render_day_list(&self, slot: Slot, tasks: &[Task]) -> String {
        let (open, done) = partition(tasks);
        let mut html = String::new();

        for (index, task) in open.iter().enumerate() {
            html.push_str(&format!(
                concat!(
                    r#"<div class="todo-item" draggable="true" data-index="{index}" data-type="{slot}">"#,
                    r#"<div class="todo-item-content"><button class="task-checkbox" data-id="{id}"></button>"#,
                    r#"<span class="todo-text">{text}</span></div>"#,
                    r#"<button class="delete-btn" data-id="{id}">Delete</button></div>"#,
                ),
                index = index,
                slot = slot.key(),
                id = escape_html(&task.id),
                text = escape_html(&task.text),
            ));
        }

        if !done.is_empty() {
            html.push_str(COMPLETED_OPEN);
            for task in done {
                html.push_str(&format!(
                    concat!(
                        r#"<div class="todo-item">"#,
                        r#"<div class="todo-item-content"><button class="task-checkbox completed" data-id="{id}"></button>"#,
                        r#"<span class="todo-text completed">{text}</span></div>"#,
                        r#"<button class="delete-btn" data-id="{id}">Delete</button></div>"#,
                    ),
                    id = escape_html(&task.id),
                    text = escape_html(&task.text),
                ));
            }
            html.push_str("</div>");
        }

        html
    }

    #[tracing::instrument(skip(self, tasks, now))]
    pub fn print_list(&self, slot: Slot, tasks: &[Task], now: DateTime<Utc>) -> anyhow::Result<()> {
        let out = io::stdout().lock();
        let paint = self.color && io::stdout().is_terminal();
        self.write_list(out, slot, tasks, now, paint)
    }

    pub fn write_list<W: Write>(
        &self,
        out: W,
        slot: Slot,
        tasks: &[Task],
        now: DateTime<Utc>,
        paint: bool,
    ) -> anyhow::Result<()> {
        let headers = vec![
            "#".to_string(),
            "ID".to_string(),
            "State".to_string(),
            "Elapsed".to_string(),
            "Text".to_string(),
        ];

        let (open, done) = partition(tasks);
        let mut rows = Vec::with_capacity(tasks.len());

        for (position, task) in open.iter().chain(done.iter()).enumerate() {
            let state = if task.completed {
                "done"
            } else if task.is_running() {
                "running"
            } else if position == 0 && slot.has_active_item() {
                "active"
            } else {
                ""
            };
            let state = match state {
                "running" => paint_if(paint, state, "32"),
                "active" => paint_if(paint, state, "33"),
                other => other.to_string(),
            };
            let elapsed = if slot.has_timers() {
                format_elapsed(task.elapsed_secs(now))
            } else {
                String::new()
            };

            rows.push(vec![
                format!("@{}", position + 1),
                task.id.clone(),
                state,
                elapsed,
                task.text.clone(),
            ]);
        }

        write_table(out, headers, rows)
    }
}

const COMPLETED_OPEN: &str =
    r#"<div class="completed-section"><div class="completed-label">Completed</div>"#;

fn section(name: &str, list_id: &str, body: &str) -> String {
    format!(r#"<section class="{name}"><div id="{list_id}">{body}</div></section>"#)
}

/// Elapsed label, shown once a timer has run or while it runs.
fn timer_label(class: &str, task: &Task, now: DateTime<Utc>) -> String {
    let elapsed = task.elapsed_secs(now);
    if elapsed == 0 && !task.is_running() {
        return String::new();
    }
    format!(
        r#"<span class="{class}" data-timer-id="{id}">{label}</span>"#,
        id = escape_html(&task.id),
        label = format_elapsed(elapsed),
    )
}

/// `1h 5m`, or `5m` under an hour.
pub fn format_elapsed(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn paint_if(paint: bool, text: &str, code: &str) -> String {
    if !paint {
        return text.to_string();
    }
    format!("\x1b[{code}m{text}\x1b[0m")
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
