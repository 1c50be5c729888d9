//! Change watching for directory sources
//!
//! The server polls an [`AssetWatcher`] and hot reloads the registry when
//! any asset file under a directory source changes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[cfg(feature = "file-watcher")]
use notify::{Event, EventKind, RecursiveMode, Watcher};

use crate::error::{AssetError, AssetResult};

/// A changed asset file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetChange {
    /// Directory source the file belongs to
    pub source: PathBuf,
    /// Virtual path, `/`-separated and absolute
    pub asset_path: String,
    pub kind: AssetChangeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetChangeKind {
    Created,
    Modified,
    Deleted,
}

/// Watches directory sources for changed files
pub struct AssetWatcher {
    #[cfg(feature = "file-watcher")]
    watcher: notify::RecommendedWatcher,
    #[cfg(feature = "file-watcher")]
    rx: crossbeam_channel::Receiver<notify::Result<Event>>,

    /// Last report per file, to fold bursts of events into one
    debounce: HashMap<PathBuf, Instant>,
    debounce_duration: Duration,
    sources: Vec<PathBuf>,
}

/// Virtual path of `file` inside `source`, if it is inside
fn asset_path_in(source: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(source).ok()?;
    let mut out = String::new();
    for part in relative.components() {
        out.push('/');
        out.push_str(part.as_os_str().to_str()?);
    }
    (!out.is_empty()).then_some(out)
}

impl AssetWatcher {
    #[cfg(feature = "file-watcher")]
    pub fn new() -> AssetResult<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();

        let watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .map_err(|e| AssetError::Io(format!("failed to create file watcher: {}", e)))?;

        Ok(Self {
            watcher,
            rx,
            debounce: HashMap::new(),
            debounce_duration: Duration::from_millis(250),
            sources: Vec::new(),
        })
    }

    /// Without the `file-watcher` feature nothing is ever reported
    #[cfg(not(feature = "file-watcher"))]
    pub fn new() -> AssetResult<Self> {
        Ok(Self {
            debounce: HashMap::new(),
            debounce_duration: Duration::from_millis(250),
            sources: Vec::new(),
        })
    }

    /// Watch a directory source recursively
    #[cfg(feature = "file-watcher")]
    pub fn watch(&mut self, source: impl AsRef<Path>) -> AssetResult<()> {
        let path = source.as_ref().to_path_buf();
        self.watcher
            .watch(&path, RecursiveMode::Recursive)
            .map_err(|e| AssetError::Io(format!("failed to watch {:?}: {}", path, e)))?;
        log::info!("Watching asset source {:?}", path);
        self.sources.push(path);
        Ok(())
    }

    #[cfg(not(feature = "file-watcher"))]
    pub fn watch(&mut self, source: impl AsRef<Path>) -> AssetResult<()> {
        self.sources.push(source.as_ref().to_path_buf());
        Ok(())
    }

    /// Drain pending events
    #[cfg(feature = "file-watcher")]
    pub fn poll(&mut self) -> Vec<AssetChange> {
        let mut changes = Vec::new();
        let now = Instant::now();

        while let Ok(result) = self.rx.try_recv() {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("File watcher error: {}", e);
                    continue;
                }
            };
            let kind = match event.kind {
                EventKind::Create(_) => AssetChangeKind::Created,
                EventKind::Modify(_) => AssetChangeKind::Modified,
                EventKind::Remove(_) => AssetChangeKind::Deleted,
                _ => continue,
            };
            for path in event.paths {
                if path.is_dir() {
                    continue;
                }
                if let Some(last) = self.debounce.get(&path) {
                    if now.duration_since(*last) < self.debounce_duration {
                        continue;
                    }
                }
                let Some((source, asset_path)) = self
                    .sources
                    .iter()
                    .find_map(|s| asset_path_in(s, &path).map(|a| (s.clone(), a)))
                else {
                    continue;
                };
                self.debounce.insert(path, now);
                changes.push(AssetChange {
                    source,
                    asset_path,
                    kind,
                });
            }
        }

        self.debounce.retain(|_, time| now.duration_since(*time) < Duration::from_secs(5));
        changes
    }

    #[cfg(not(feature = "file-watcher"))]
    pub fn poll(&mut self) -> Vec<AssetChange> {
        Vec::new()
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn set_debounce(&mut self, duration: Duration) {
        self.debounce_duration = duration;
    }
}
