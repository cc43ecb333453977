//! Debounced filesystem watching for inotify-mode autoscans.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, FileIdMap};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};

/// Events that can occur below a watched autoscan directory.
#[derive(Debug, Clone)]
pub enum FilesystemEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
}

/// Subtree watcher feeding the content manager's inotify autoscans.
pub struct SubtreeWatcher {
    debouncer: Mutex<Option<Debouncer<RecommendedWatcher, FileIdMap>>>,
    event_sender: mpsc::Sender<FilesystemEvent>,
    event_receiver: Mutex<Option<mpsc::Receiver<FilesystemEvent>>>,
    watched_paths: Mutex<HashSet<PathBuf>>,
    debounce_duration: Duration,
}

impl SubtreeWatcher {
    pub fn new() -> Arc<Self> {
        let (event_sender, event_receiver) = mpsc::channel(1000);
        Arc::new(Self {
            debouncer: Mutex::new(None),
            event_sender,
            event_receiver: Mutex::new(Some(event_receiver)),
            watched_paths: Mutex::new(HashSet::new()),
            debounce_duration: Duration::from_millis(500),
        })
    }

    /// Take the receiving end; valid once, at startup.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<FilesystemEvent>> {
        self.event_receiver.lock().unwrap().take()
    }

    fn initialize(&self) -> Result<()> {
        let mut guard = self.debouncer.lock().unwrap();
        if guard.is_some() {
            return Ok(());
        }
        let sender = self.event_sender.clone();
        let debouncer = new_debouncer(
            self.debounce_duration,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in events {
                        let converted: Option<fn(PathBuf) -> FilesystemEvent> =
                            match event.event.kind {
                                notify::EventKind::Create(_) => Some(FilesystemEvent::Created),
                                notify::EventKind::Modify(_) => Some(FilesystemEvent::Modified),
                                notify::EventKind::Remove(_) => Some(FilesystemEvent::Deleted),
                                _ => None,
                            };
                        if let Some(make) = converted {
                            for path in &event.event.paths {
                                if let Err(e) = sender.try_send(make(path.clone())) {
                                    error!("failed to queue filesystem event: {}", e);
                                }
                            }
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        error!("file watcher error: {:?}", error);
                    }
                }
            },
        )
        .map_err(|e| Error::other(format!("failed to initialize file watcher: {}", e)))?;
        *guard = Some(debouncer);
        Ok(())
    }

    /// Start watching an autoscan subtree.
    pub fn monitor(&self, path: &Path) -> Result<()> {
        self.initialize()?;
        let mut guard = self.debouncer.lock().unwrap();
        let debouncer = guard.as_mut().unwrap();
        if !path.is_dir() {
            warn!("not watching {}: not a directory", path.display());
            return Ok(());
        }
        debouncer
            .watcher()
            .watch(path, RecursiveMode::Recursive)
            .map_err(|e| Error::other(format!("failed to watch {}: {}", path.display(), e)))?;
        self.watched_paths.lock().unwrap().insert(path.to_path_buf());
        debug!("watching subtree {}", path.display());
        Ok(())
    }

    pub fn unmonitor(&self, path: &Path) {
        let mut guard = self.debouncer.lock().unwrap();
        if let Some(debouncer) = guard.as_mut() {
            if let Err(e) = debouncer.watcher().unwatch(path) {
                debug!("unwatch {}: {}", path.display(), e);
            }
        }
        self.watched_paths.lock().unwrap().remove(path);
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.watched_paths.lock().unwrap().contains(path)
    }

    pub fn stop(&self) {
        if let Some(debouncer) = self.debouncer.lock().unwrap().take() {
            drop(debouncer);
        }
        self.watched_paths.lock().unwrap().clear();
    }
}
