//! File watcher for continuous evaluation
//!
//! Watches source roots and feeds changes into an [`EvaluationSession`]:
//! changed files are re-read and re-evaluated, deleted files are forgotten.

use crate::report::Report;
use crate::session::{EvaluationSession, SourceFile};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

/// Debounced file watcher
pub struct Watcher {
    _debouncer: Debouncer<RecommendedWatcher>,
    receiver: Receiver<Result<Vec<DebouncedEvent>, notify::Error>>,
    /// Watched paths
    paths: Vec<PathBuf>,
    /// File extensions to watch
    extensions: Vec<String>,
}

/// A batch of file changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchEvent {
    /// Files created or modified
    pub changed: Vec<PathBuf>,
    /// Files that no longer exist
    pub removed: Vec<PathBuf>,
}

impl WatchEvent {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

impl Watcher {
    /// Create a new watcher for the given paths
    pub fn new(paths: &[PathBuf], extensions: &[String]) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::channel();

        let mut debouncer = new_debouncer(Duration::from_millis(300), tx)?;

        for path in paths {
            let watch_path = if path.is_file() {
                path.parent().unwrap_or(Path::new("."))
            } else {
                path.as_path()
            };

            debouncer
                .watcher()
                .watch(watch_path, RecursiveMode::Recursive)?;
        }

        Ok(Self {
            _debouncer: debouncer,
            receiver: rx,
            paths: paths.to_vec(),
            extensions: extensions.iter().map(|e| e.to_lowercase()).collect(),
        })
    }

    /// Wait for the next batch of relevant changes
    ///
    /// Returns `None` when the watcher has shut down.
    pub fn wait(&self) -> Option<WatchEvent> {
        loop {
            match self.receiver.recv() {
                Ok(Ok(events)) => {
                    let event = self.classify(events.into_iter().map(|e| e.path));
                    if !event.is_empty() {
                        return Some(event);
                    }
                }
                Ok(Err(e)) => log::warn!("Watch error: {}", e),
                Err(_) => return None,
            }
        }
    }

    /// Sort raw event paths into changed and removed files
    fn classify(&self, paths: impl Iterator<Item = PathBuf>) -> WatchEvent {
        let mut event = WatchEvent::default();
        for path in paths {
            if !self.matches_extension(&path) || !self.matches_watched_path(&path) {
                continue;
            }
            let bucket = if path.exists() {
                &mut event.changed
            } else {
                &mut event.removed
            };
            if !bucket.contains(&path) {
                bucket.push(path);
            }
        }
        event
    }

    /// Check if a path matches our watched paths
    fn matches_watched_path(&self, path: &Path) -> bool {
        self.paths.iter().any(|watched| {
            if watched.is_file() {
                path == watched
            } else {
                path.starts_with(watched)
            }
        })
    }

    /// Check if path has a watched extension
    fn matches_extension(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        match path.extension() {
            Some(ext) => {
                let ext = ext.to_string_lossy().to_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            }
            None => false,
        }
    }

    /// Get the watched paths
    pub fn watched_paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

/// Feed one batch of changes into a session
pub fn apply(session: &mut EvaluationSession, event: &WatchEvent) -> Report {
    for path in &event.removed {
        if session.forget(path) {
            log::info!("Stopped tracking {}", path.display());
        }
    }

    let mut changed = Vec::new();
    for path in &event.changed {
        // Keep the declared language of files already tracked
        let declared = session
            .tracked()
            .iter()
            .find(|f| f.path == *path)
            .and_then(|f| f.language.clone());
        match SourceFile::read(path) {
            Ok(mut file) => {
                file.language = declared;
                changed.push(file);
            }
            Err(e) => log::warn!("Could not read {}: {}", path.display(), e),
        }
    }

    session.reevaluate(changed)
}

/// Evaluate `files`, then re-evaluate on every change under `roots`
///
/// `on_report` receives the initial report and one report per batch of
/// changes. Runs until the watcher shuts down.
pub fn watch_and_run<F>(
    session: &mut EvaluationSession,
    files: Vec<SourceFile>,
    roots: &[PathBuf],
    extensions: &[String],
    mut on_report: F,
) -> Result<(), notify::Error>
where
    F: FnMut(&Report),
{
    let watcher = Watcher::new(roots, extensions)?;

    on_report(&session.evaluate(files));

    while let Some(event) = watcher.wait() {
        log::debug!(
            "{} changed, {} removed",
            event.changed.len(),
            event.removed.len()
        );
        on_report(&apply(session, &event));
    }
    Ok(())
}
