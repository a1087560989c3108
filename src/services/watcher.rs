// Filesystem watcher feeding cache eviction.
//
// Debounced notify events for the install roots are turned into `evict_paths` calls. The
// watcher never writes validation results; the next request recomputes them.

use crate::cache::ValidationCache;
use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, DebouncedEvent, Debouncer, RecommendedCache, new_debouncer};
use std::sync::Arc;
use std::time::Duration;

/// Watches the install roots for as long as it is alive
pub struct RootWatcher {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    roots: Vec<Utf8PathBuf>,
}

impl RootWatcher {
    /// Start watching `roots` recursively.
    ///
    /// # Arguments
    /// * `roots` - Directories to watch; ones that do not exist are skipped with a warning
    /// * `debounce` - Quiet period before a batch of events is delivered
    /// * `cache` - Receives an eviction for every changed path
    pub fn start(roots: &[Utf8PathBuf], debounce: Duration, cache: Arc<ValidationCache>) -> Result<Self> {
        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| match result {
            Ok(events) => {
                let paths = changed_paths(&events);
                if !paths.is_empty() {
                    tracing::debug!("Filesystem changed: {} path(s)", paths.len());
                    cache.evict_paths(&paths);
                }
            }
            Err(errors) => {
                for error in errors {
                    tracing::warn!("Watcher error: {:?}", error);
                }
            }
        })
        .context("Failed to create filesystem watcher")?;

        let mut watched = Vec::new();
        for root in roots {
            if !root.is_dir() {
                tracing::warn!("Not watching {}: not a directory", root);
                continue;
            }
            debouncer
                .watch(root.as_std_path(), RecursiveMode::Recursive)
                .with_context(|| format!("Failed to watch {}", root))?;
            tracing::info!("Watching {} for changes", root);
            watched.push(root.clone());
        }

        Ok(Self {
            _debouncer: debouncer,
            roots: watched,
        })
    }

    pub fn roots(&self) -> &[Utf8PathBuf] {
        &self.roots
    }
}

/// Paths touched by add, remove, rename or modify events
fn changed_paths(events: &[DebouncedEvent]) -> Vec<String> {
    let mut paths: Vec<String> = events
        .iter()
        .filter(|event| {
            matches!(
                event.event.kind,
                EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(_) | EventKind::Any
            )
        })
        .flat_map(|event| event.event.paths.iter())
        .filter_map(|path| match Utf8PathBuf::try_from(path.clone()) {
            Ok(path) => Some(path.into_string()),
            Err(e) => {
                tracing::debug!("Ignoring non UTF-8 path: {}", e);
                None
            }
        })
        .collect();

    paths.sort();
    paths.dedup();
    paths
}
