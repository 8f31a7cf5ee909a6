use std::path::{Path, PathBuf};
use std::sync::mpsc;

use anyhow::Context;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::storage::STORE_FILE_NAME;

/// Watches the data directory for writes to the store file made by other
/// processes.
pub struct StoreWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<PathBuf>,
}

impl StoreWatcher {
    #[tracing::instrument]
    pub fn start(data_dir: &Path) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel();
        // events carry absolute paths
        let dir = watch_dir(data_dir)?;
        let filter_dir = dir.clone();

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                let event = match result {
                    Ok(e) => e,
                    Err(err) => {
                        warn!(error = %err, "store watcher error");
                        return;
                    }
                };
                match event.kind {
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
                    _ => return,
                }
                for path in event.paths {
                    if is_store_file(&filter_dir, &path) {
                        let _ = tx.send(path);
                    }
                }
            },
            Config::default(),
        )
        .context("failed to create store watcher")?;

        // Atomic saves replace the file, so watch the directory rather than
        // the file itself.
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", dir.display()))?;
        info!(dir = %dir.display(), "watching store");

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Non-blocking. True when the store file changed since the last poll.
    pub fn poll(&self) -> bool {
        let seen = self.rx.try_iter().count();
        if seen > 0 {
            debug!(events = seen, "store file changed on disk");
        }
        seen > 0
    }
}

fn watch_dir(data_dir: &Path) -> anyhow::Result<PathBuf> {
    data_dir
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", data_dir.display()))
}

fn is_store_file(dir: &Path, path: &Path) -> bool {
    path.starts_with(dir)
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n == STORE_FILE_NAME)
}
