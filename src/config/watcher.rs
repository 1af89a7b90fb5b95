//! Node config file watcher.
//!
//! Watches the directory holding the config file so editors that replace the
//! file (write to a temp file, then rename) are still seen. Only events that
//! touch the config file itself and change its content trigger a reload.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::NodeConfig;

/// Sends a freshly loaded [`NodeConfig`] whenever the file's content changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<NodeConfig>,
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<NodeConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            update_tx,
        };
        (watcher, update_rx)
    }

    /// Start watching. Dropping the returned watcher stops it.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self.path.file_name().map(|name| name.to_os_string());
        let path = self.path.clone();
        let tx = self.update_tx;

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if touches_config(&event, file_name.as_ref()) => reload(&path, &tx),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %self.path.display(), "Watching node config");
        Ok(watcher)
    }
}

fn reload(path: &Path, tx: &mpsc::UnboundedSender<NodeConfig>) {
    match load_config(path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "Node config changed, reloading");
            if tx.send(config).is_err() {
                tracing::debug!("Config update dropped, receiver gone");
            }
        }
        Err(e) => tracing::error!(error = %e, "Config reload failed, keeping the running config"),
    }
}

/// Content changes, creations and renames of the config file. Metadata-only
/// changes (permissions, timestamps) and other files are ignored.
fn touches_config(event: &Event, file_name: Option<&OsString>) -> bool {
    let relevant_kind = match &event.kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    };
    relevant_kind
        && event
            .paths
            .iter()
            .any(|p| p.file_name().map(|n| n.to_os_string()).as_ref() == file_name)
}
