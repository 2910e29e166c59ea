// SPDX-License-Identifier: MIT OR Apache-2.0
//! File system watcher for shader hot reload.
//!
//! Debounced so a save that touches a file several times in quick
//! succession triggers one recompile, not one per write.

use notify_debouncer_full::{
    new_debouncer,
    notify::{self, RecommendedWatcher, RecursiveMode},
    DebounceEventResult, Debouncer, RecommendedCache,
};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Configuration for the shader watcher.
#[derive(Debug, Clone)]
pub struct ShaderWatcherConfig {
    /// Debounce duration for events
    pub debounce_duration: Duration,
    /// File extensions treated as shader sources
    pub extensions: HashSet<String>,
}

impl Default for ShaderWatcherConfig {
    fn default() -> Self {
        let mut extensions = HashSet::new();
        for ext in ["glsl", "wgsl", "comp", "vert", "frag"] {
            extensions.insert(ext.to_string());
        }
        Self {
            debounce_duration: Duration::from_millis(250),
            extensions,
        }
    }
}

/// Watches shader directories and collects changed files.
pub struct ShaderWatcher {
    _watcher: Debouncer<RecommendedWatcher, RecommendedCache>,
    event_rx: Receiver<PathBuf>,
    watched_dirs: Arc<RwLock<HashSet<PathBuf>>>,
    config: ShaderWatcherConfig,
}

impl ShaderWatcher {
    /// Create a watcher with the given configuration.
    pub fn new(config: ShaderWatcherConfig) -> Result<Self, notify::Error> {
        let (event_tx, event_rx) = mpsc::channel();
        let extensions = config.extensions.clone();

        let watcher = new_debouncer(
            config.debounce_duration,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    use notify::EventKind;
                    for event in events {
                        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                            continue;
                        }
                        for path in &event.paths {
                            let is_shader = path
                                .extension()
                                .and_then(|e| e.to_str())
                                .is_some_and(|e| extensions.contains(&e.to_lowercase()));
                            if is_shader {
                                let _ = event_tx.send(path.clone());
                            }
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        warn!(error = %error, "file watcher error");
                    }
                }
            },
        )?;

        Ok(Self {
            _watcher: watcher,
            event_rx,
            watched_dirs: Arc::new(RwLock::new(HashSet::new())),
            config,
        })
    }

    /// Watch a directory recursively.
    pub fn watch(&mut self, path: impl AsRef<Path>) -> Result<(), notify::Error> {
        let path = path.as_ref().to_path_buf();
        self._watcher.watch(&path, RecursiveMode::Recursive)?;
        self.watched_dirs.write().insert(path.clone());
        info!("watching shader directory: {:?}", path);
        Ok(())
    }

    /// Stop watching a directory.
    pub fn unwatch(&mut self, path: impl AsRef<Path>) -> Result<(), notify::Error> {
        let path = path.as_ref();
        self._watcher.unwatch(path)?;
        self.watched_dirs.write().remove(path);
        info!("stopped watching shader directory: {:?}", path);
        Ok(())
    }

    /// Whether a directory is being watched.
    pub fn is_watching(&self, path: &Path) -> bool {
        self.watched_dirs.read().contains(path)
    }

    /// Drain pending changed shader paths (non-blocking). Duplicates within
    /// one drain collapse into a single entry.
    pub fn take_changed(&self) -> HashSet<PathBuf> {
        let mut changed = HashSet::new();
        loop {
            match self.event_rx.try_recv() {
                Ok(path) => {
                    changed.insert(path);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warn!("file watcher channel disconnected");
                    break;
                }
            }
        }
        changed
    }

    /// Configuration in effect.
    pub fn config(&self) -> &ShaderWatcherConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_extensions() {
        let config = ShaderWatcherConfig::default();
        assert!(config.extensions.contains("glsl"));
        assert!(config.extensions.contains("wgsl"));
        assert!(!config.extensions.contains("png"));
    }

    #[test]
    fn test_configured_debounce_applies() {
        let config = ShaderWatcherConfig {
            debounce_duration: Duration::from_millis(50),
            ..ShaderWatcherConfig::default()
        };
        let watcher = ShaderWatcher::new(config).unwrap();
        assert_eq!(watcher.config().debounce_duration, Duration::from_millis(50));
    }
}
