use std::ffi::OsString;
use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::anyhow;
use clap::{ArgAction, Parser};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::task::Slot;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "onetask",
    version,
    about = "onetask: a task queue, a focus task and three day lists",
    disable_help_subcommand = true,
    arg_required_else_help = false
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub rest: Vec<OsString>,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.KEY=VALUE` / `rc.KEY:VALUE` overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest.split_once('=').or_else(|| rest.split_once(':'));
            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((format!("rc.{k}"), v.to_string()));
                continue;
            }
        }
        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

/// The list a command works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Queue,
    Focus,
    Today,
    Tomorrow,
    Others,
}

impl View {
    pub const ALL: [View; 5] = [
        View::Queue,
        View::Focus,
        View::Today,
        View::Tomorrow,
        View::Others,
    ];

    pub fn name(self) -> &'static str {
        match self {
            View::Queue => "queue",
            View::Focus => "focus",
            View::Today => "today",
            View::Tomorrow => "tomorrow",
            View::Others => "others",
        }
    }

    /// The slot holding this view's rows. The focus view lists subtasks.
    pub fn slot(self) -> Slot {
        match self {
            View::Queue => Slot::Tasks,
            View::Focus => Slot::Subtasks,
            View::Today => Slot::Today,
            View::Tomorrow => Slot::Tomorrow,
            View::Others => Slot::Others,
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for View {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        View::ALL
            .into_iter()
            .find(|v| v.name() == s)
            .ok_or_else(|| anyhow!("unknown view: {s}"))
    }
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub view: View,
    pub command: String,
    pub command_args: Vec<String>,
}

impl Invocation {
    #[tracing::instrument(skip(cfg, rest))]
    pub fn parse(cfg: &Config, rest: Vec<OsString>) -> anyhow::Result<Self> {
        let mut tokens: Vec<String> = rest
            .into_iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();

        let view = match tokens.first().map(|t| t.parse::<View>()) {
            Some(Ok(view)) => {
                tokens.remove(0);
                view
            }
            _ => View::Queue,
        };

        if tokens.is_empty() {
            let cmd = cfg
                .get("default.command")
                .unwrap_or_else(|| "list".to_string());
            debug!(%view, command = %cmd, "no explicit command, using default");
            return Ok(Self {
                view,
                command: cmd,
                command_args: vec![],
            });
        }

        let token = tokens.remove(0);
        let known = crate::commands::known_command_names();
        let command = crate::commands::expand_command_abbrev(&token, &known)
            .ok_or_else(|| anyhow!("unknown or ambiguous command: {token}"))?;
        debug!(%view, token = %token, expanded = %command, "resolved command token");

        Ok(Self {
            view,
            command: command.to_string(),
            command_args: tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use super::{Invocation, View, preprocess_args};
    use crate::config::Config;

    fn args(items: &[&str]) -> Vec<OsString> {
        items.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&args(&["onetask", "rc.color=off", "list", "rc.popup.tick.ms:250"]))
            .expect("preprocess");
        assert_eq!(pre.cleaned_args, args(&["onetask", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.popup.tick.ms".to_string(), "250".to_string()),
            ]
        );
    }

    #[test]
    fn view_and_abbreviated_command() {
        let inv = Invocation::parse(&Config::default(), args(&["focus", "st", "@1"])).expect("parse");
        assert_eq!(inv.view, View::Focus);
        assert_eq!(inv.command, "start");
        assert_eq!(inv.command_args, vec!["@1".to_string()]);
    }

    #[test]
    fn empty_invocation_uses_default_command() {
        let mut cfg = Config::default();
        cfg.apply_overrides(vec![("default.command".to_string(), "render".to_string())]);
        let inv = Invocation::parse(&cfg, vec![]).expect("parse");
        assert_eq!(inv.view, View::Queue);
        assert_eq!(inv.command, "render");

        let inv = Invocation::parse(&cfg, args(&["today"])).expect("parse");
        assert_eq!(inv.view, View::Today);
        assert_eq!(inv.command, "render");
    }

    #[test]
    fn ambiguous_or_unknown_command_is_an_error() {
        // "e" matches edit, end and export
        assert!(Invocation::parse(&Config::default(), args(&["e"])).is_err());
        assert!(Invocation::parse(&Config::default(), args(&["frobnicate"])).is_err());
    }
}
