//! Memoized validation results.
//!
//! [`ValidationCache`] sits between callers and the [`DryRunValidator`]:
//! - Results are kept per component in a [`DashMap`] bucket, so invalidating one component
//!   never blocks lookups for another
//! - Concurrent identical requests share one `tokio::sync::OnceCell`, so only one replay runs
//! - Every bucket carries a generation; a result computed against an older generation is
//!   returned to its caller but never stored
//! - Completions and evictions are announced on a broadcast channel ([`CacheEvent`])
//!
//! Invalidation comes from three places: explicit calls, [`StateChange`] events from the
//! [`StateManager`](crate::state::StateManager) (see [`ValidationCache::watch_state`]), and
//! filesystem events from the watcher, which may only evict.

use crate::metrics::Metrics;
use crate::models::Component;
use crate::services::archive::ArchiveIntrospector;
use crate::services::cancel::{CancelSource, CancelToken};
use crate::services::fs::FileSystemProvider;
use crate::services::paths::{PathResolver, WildcardPattern, is_descendant, is_wildcard, path_key};
use crate::services::validation::{DryRunValidator, ValidationResult, ValidationStatus};
use crate::state::StateChange;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{OnceCell, broadcast};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Identity of one validation query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Path as written in the instruction, placeholders intact
    pub path: String,
    pub instruction_id: Uuid,
    pub component_id: Uuid,
}

impl CacheKey {
    pub fn new(path: impl Into<String>, instruction_id: Uuid, component_id: Uuid) -> Self {
        Self {
            path: path.into(),
            instruction_id,
            component_id,
        }
    }
}

/// Notifications published by the cache
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// A freshly computed result was stored
    ResultReady { key: CacheKey, result: ValidationResult },
    /// Everything cached for a component was dropped
    Evicted { component_id: Uuid },
    /// The whole cache was dropped (directories changed or a full reload)
    Cleared,
}

#[derive(Debug, Default)]
struct Bucket {
    generation: u64,
    results: HashMap<CacheKey, ValidationResult>,
    /// Resolved path keys the cached results depend on
    watched: HashSet<String>,
}

type InFlight = Arc<OnceCell<ValidationResult>>;

pub struct ValidationCache {
    validator: RwLock<Arc<DryRunValidator>>,
    introspector: Arc<ArchiveIntrospector>,
    buckets: DashMap<Uuid, Bucket>,
    in_flight: DashMap<(CacheKey, u64), InFlight>,
    cancel: Mutex<CancelSource>,
    metrics: Arc<Metrics>,
    events: broadcast::Sender<CacheEvent>,
}

impl ValidationCache {
    pub fn new(resolver: PathResolver, provider: Arc<dyn FileSystemProvider>, metrics: Arc<Metrics>) -> Self {
        let introspector = Arc::new(ArchiveIntrospector::new(provider, Arc::clone(&metrics)));
        let validator = DryRunValidator::new(resolver, Arc::clone(&introspector), Arc::clone(&metrics));
        let (events, _) = broadcast::channel(256);

        Self {
            validator: RwLock::new(Arc::new(validator)),
            introspector,
            buckets: DashMap::new(),
            in_flight: DashMap::new(),
            cancel: Mutex::new(CancelSource::new()),
            metrics,
            events,
        }
    }

    /// The validator currently in use
    pub fn validator(&self) -> Arc<DryRunValidator> {
        let guard = self.validator.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    pub fn introspector(&self) -> &Arc<ArchiveIntrospector> {
        &self.introspector
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Number of stored results across all components
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.results.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored result for `key`, counted as a hit or a miss
    pub fn get_cached(&self, key: &CacheKey) -> Option<ValidationResult> {
        let found = self.lookup(key);
        if found.is_some() {
            self.metrics.record_cache_hit();
        } else {
            self.metrics.record_cache_miss();
        }
        found
    }

    /// Stored result, or a verdict that needs no replay.
    ///
    /// Never blocks on a computation: an unconfigured placeholder is reported directly and
    /// anything else comes back `Pending` until a real result is available.
    pub fn get_or_placeholder(&self, key: &CacheKey) -> ValidationResult {
        if let Some(cached) = self.get_cached(key) {
            return cached;
        }
        self.validator()
            .placeholder_check(&key.path)
            .unwrap_or_else(|| ValidationResult::new(ValidationStatus::Pending, "validation in progress"))
    }

    /// Validate on the blocking pool and store the result.
    ///
    /// Identical concurrent calls join one computation. A component invalidated while its
    /// result was being computed gets the result back but the cache does not keep it.
    pub async fn validate_and_cache(&self, path: &str, instruction_id: Uuid, component: &Component) -> ValidationResult {
        let key = CacheKey::new(path, instruction_id, component.id);
        if let Some(hit) = self.get_cached(&key) {
            return hit;
        }

        let generation = self.generation(component.id);
        let flight_key = (key.clone(), generation);
        let cell: InFlight = {
            let entry = self.in_flight.entry(flight_key.clone()).or_insert_with(|| Arc::new(OnceCell::new()));
            if Arc::strong_count(entry.value()) > 1 {
                self.metrics.record_in_flight_join();
            }
            Arc::clone(entry.value())
        };

        let key_ref = &key;
        let result = cell
            .get_or_init(|| async move {
                // Another caller may have stored the result since our lookup.
                if let Some(hit) = self.lookup(key_ref) {
                    return hit;
                }
                self.compute(key_ref, generation, component).await
            })
            .await
            .clone();

        self.in_flight
            .remove_if(&flight_key, |_, existing| Arc::ptr_eq(existing, &cell));
        result
    }

    /// Fire-and-forget validation.
    ///
    /// Returns what [`get_or_placeholder`](Self::get_or_placeholder) would and, when nothing
    /// was cached, schedules the computation on `handle`. Completion is announced as
    /// [`CacheEvent::ResultReady`].
    pub fn request(
        self: &Arc<Self>,
        handle: &tokio::runtime::Handle,
        path: &str,
        instruction_id: Uuid,
        component: &Component,
    ) -> ValidationResult {
        let key = CacheKey::new(path, instruction_id, component.id);
        if let Some(cached) = self.get_cached(&key) {
            return cached;
        }
        if let Some(incomplete) = self.validator().placeholder_check(path) {
            return incomplete;
        }
        let placeholder = ValidationResult::new(ValidationStatus::Pending, "validation in progress");

        let cache = Arc::clone(self);
        let path = path.to_string();
        let component = component.clone();
        handle.spawn(async move {
            cache.validate_and_cache(&path, instruction_id, &component).await;
        });

        placeholder
    }

    /// Drop everything cached for one component
    pub fn invalidate_component(&self, component_id: Uuid) {
        let had_results = match self.buckets.get_mut(&component_id) {
            Some(mut bucket) => {
                bucket.generation += 1;
                bucket.watched.clear();
                let had = !bucket.results.is_empty();
                bucket.results.clear();
                had
            }
            None => false,
        };

        if had_results {
            self.metrics.record_eviction();
            tracing::debug!("Evicted cached results for component {}", component_id);
        }
        let _ = self.events.send(CacheEvent::Evicted { component_id });
    }

    /// Drop every cached result and archive listing. Running validations are cancelled.
    pub fn clear(&self) {
        self.cancel_in_flight();
        for mut bucket in self.buckets.iter_mut() {
            bucket.generation += 1;
            bucket.watched.clear();
            bucket.results.clear();
        }
        self.introspector.clear();
        let _ = self.events.send(CacheEvent::Cleared);
    }

    /// Switch to new install roots. Rebuilds the validator and clears everything.
    pub fn set_directories(&self, mod_directory: Option<&str>, kotor_directory: Option<&str>) {
        let validator = DryRunValidator::new(
            PathResolver::new(mod_directory, kotor_directory),
            Arc::clone(&self.introspector),
            Arc::clone(&self.metrics),
        );
        {
            let mut guard = self.validator.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            *guard = Arc::new(validator);
        }

        tracing::info!(
            "Validation roots changed (mod={}, kotor={}), clearing cache",
            mod_directory.unwrap_or("<unset>"),
            kotor_directory.unwrap_or("<unset>")
        );
        self.clear();
    }

    /// React to real filesystem changes.
    ///
    /// Every component whose cached results depend on one of `paths` (the same path, an
    /// ancestor or a descendant) is evicted, and archive listings at those paths are dropped.
    pub fn evict_paths<S: AsRef<str>>(&self, paths: &[S]) {
        let keys: Vec<String> = paths.iter().map(|p| path_key(p.as_ref())).collect();
        for path in paths {
            self.introspector.invalidate(path.as_ref());
        }

        let related = |watched: &str| {
            keys.iter()
                .any(|key| watched == key || is_descendant(watched, key) || is_descendant(key, watched))
        };

        let affected: Vec<Uuid> = self
            .buckets
            .iter()
            .filter(|bucket| bucket.watched.iter().any(|w| related(w)))
            .map(|bucket| *bucket.key())
            .collect();

        for component_id in affected {
            self.invalidate_component(component_id);
        }
    }

    /// Cancel every validation currently running. Their callers get `Undetermined`.
    pub fn cancel_in_flight(&self) {
        let mut source = self.cancel.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        source.cancel();
        *source = CancelSource::new();
    }

    /// Follow working set changes and invalidate accordingly.
    ///
    /// Dependency edits do not affect path validation and are ignored. A lagging receiver
    /// clears the whole cache since it can no longer tell what changed.
    pub fn watch_state(self: &Arc<Self>, mut receiver: broadcast::Receiver<StateChange>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(change) => cache.apply_state_change(&change),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("Cache missed {} state change(s), clearing", missed);
                        cache.clear();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn apply_state_change(&self, change: &StateChange) {
        match change {
            StateChange::DirectoriesChanged {
                mod_directory,
                kotor_directory,
            } => self.set_directories(mod_directory.as_deref(), kotor_directory.as_deref()),
            StateChange::ComponentRemoved { component_id }
            | StateChange::InstructionsChanged { component_id }
            | StateChange::SelectionChanged { component_id } => self.invalidate_component(*component_id),
            StateChange::WorkingSetLoaded { .. } => self.clear(),
            StateChange::ComponentAdded { .. } | StateChange::DependenciesChanged { .. } => {}
        }
    }

    fn cancel_token(&self) -> CancelToken {
        self.cancel.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).token()
    }

    fn generation(&self, component_id: Uuid) -> u64 {
        self.buckets.entry(component_id).or_default().generation
    }

    fn lookup(&self, key: &CacheKey) -> Option<ValidationResult> {
        self.buckets
            .get(&key.component_id)
            .and_then(|bucket| bucket.results.get(key).cloned())
    }

    async fn compute(&self, key: &CacheKey, generation: u64, component: &Component) -> ValidationResult {
        let validator = self.validator();
        let cancel = self.cancel_token();

        // Watch before reading the disk so a change reported mid-replay bumps the generation.
        self.watch(key.component_id, generation, watched_paths(validator.resolver(), &key.path, component));

        let path = key.path.clone();
        let instruction_id = key.instruction_id;
        let owned = component.clone();
        let task_cancel = cancel.clone();
        let joined = tokio::task::spawn_blocking(move || validator.validate(&path, instruction_id, &owned, &task_cancel)).await;

        let result = match joined {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Validation task for {} failed: {}", key.path, e);
                return ValidationResult::new(ValidationStatus::Undetermined, "validation task failed");
            }
        };

        if cancel.is_cancelled() {
            tracing::debug!("Validation of {} cancelled, not caching", key.path);
            return ValidationResult::cancelled();
        }
        self.store(key, generation, result.clone());
        result
    }

    fn watch(&self, component_id: Uuid, generation: u64, watched: HashSet<String>) {
        let mut bucket = self.buckets.entry(component_id).or_default();
        if bucket.generation == generation {
            bucket.watched.extend(watched);
        }
    }

    fn store(&self, key: &CacheKey, generation: u64, result: ValidationResult) {
        {
            let mut bucket = self.buckets.entry(key.component_id).or_default();
            if bucket.generation != generation {
                tracing::debug!("Discarding stale result for {} ({})", key.path, key.component_id);
                return;
            }
            bucket.results.insert(key.clone(), result.clone());
        }

        let _ = self.events.send(CacheEvent::ResultReady {
            key: key.clone(),
            result,
        });
    }
}

/// Path keys a component's results depend on: the queried path plus every resolved
/// source and destination of its instructions (wildcards reduced to their fixed directory)
fn watched_paths(resolver: &PathResolver, path: &str, component: &Component) -> HashSet<String> {
    let instructions = component
        .instructions
        .iter()
        .chain(component.options.iter().flat_map(|o| o.instructions.iter()));

    let raw_paths = std::iter::once(path).chain(instructions.flat_map(|instruction| {
        instruction
            .source_paths()
            .iter()
            .map(String::as_str)
            .chain(instruction.destination_path())
    }));

    raw_paths
        .filter_map(|raw| {
            let resolved = resolver.resolve(raw);
            if !resolved.complete {
                return None;
            }
            if is_wildcard(&resolved.path) {
                WildcardPattern::new(&resolved.path)
                    .ok()
                    .map(|pattern| path_key(&pattern.fixed_prefix()))
            } else {
                Some(path_key(&resolved.path))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionKind, Instruction};
    use crate::services::fs::MemoryFileSystem;
    use std::sync::atomic::Ordering;

    fn cache_with(fs: Arc<MemoryFileSystem>) -> (Arc<ValidationCache>, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let cache = ValidationCache::new(PathResolver::new(Some("/mods"), Some("/game")), fs, Arc::clone(&metrics));
        (Arc::new(cache), metrics)
    }

    fn copy_component() -> Component {
        let mut component = Component::new("Copier");
        component.instructions = vec![
            Instruction::new(ActionKind::Copy)
                .with_source(["<<modDirectory>>/tex/a.tga"])
                .with_destination("<<kotorDirectory>>/Override"),
        ];
        component
    }

    #[tokio::test]
    async fn test_second_lookup_is_a_hit() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.add_file("/mods/tex/a.tga", Vec::new());
        let (cache, metrics) = cache_with(fs);
        let component = copy_component();
        let id = component.instructions[0].id;

        let first = cache.validate_and_cache("<<modDirectory>>/tex/a.tga", id, &component).await;
        let second = cache.validate_and_cache("<<modDirectory>>/tex/a.tga", id, &component).await;

        assert_eq!(first.status, ValidationStatus::WillExist);
        assert_eq!(first, second);
        assert_eq!(metrics.validations_computed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.cache_hits.load(Ordering::Relaxed), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_evict_paths_drops_dependent_components() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.add_file("/mods/tex/a.tga", Vec::new());
        let (cache, _) = cache_with(fs);
        let component = copy_component();
        let id = component.instructions[0].id;
        let mut events = cache.subscribe();

        cache.validate_and_cache("<<modDirectory>>/tex/a.tga", id, &component).await;
        assert!(matches!(events.try_recv(), Ok(CacheEvent::ResultReady { .. })));

        cache.evict_paths(&["/elsewhere/file.txt"]);
        assert_eq!(cache.len(), 1);

        cache.evict_paths(&["/mods/tex"]);
        assert!(cache.is_empty());
        assert_eq!(
            events.try_recv(),
            Ok(CacheEvent::Evicted {
                component_id: component.id
            })
        );
    }

    #[tokio::test]
    async fn test_placeholder_does_not_replay() {
        let (cache, metrics) = cache_with(Arc::new(MemoryFileSystem::new()));
        cache.set_directories(Some("/mods"), None);

        let key = CacheKey::new("<<kotorDirectory>>/Override", Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(
            cache.get_or_placeholder(&key).status,
            ValidationStatus::ConfigurationIncomplete
        );

        let other = CacheKey::new("<<modDirectory>>/x", Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(cache.get_or_placeholder(&other).status, ValidationStatus::Pending);
        assert_eq!(metrics.simulations_run.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_state_changes_invalidate() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.add_file("/mods/tex/a.tga", Vec::new());
        let (cache, _) = cache_with(fs);
        let component = copy_component();
        let id = component.instructions[0].id;

        cache.validate_and_cache("<<modDirectory>>/tex/a.tga", id, &component).await;
        cache.apply_state_change(&StateChange::DependenciesChanged {
            component_id: component.id,
        });
        assert_eq!(cache.len(), 1);

        cache.apply_state_change(&StateChange::InstructionsChanged {
            component_id: component.id,
        });
        assert!(cache.is_empty());
    }

    #[test]
    fn test_watched_paths_reduce_wildcards() {
        let mut component = Component::new("W");
        component.instructions = vec![
            Instruction::new(ActionKind::Extract).with_source(["<<modDirectory>>/Pack*.zip"]),
            Instruction::new(ActionKind::Choose).with_source([Uuid::new_v4().to_string()]),
        ];

        let watched = watched_paths(
            &PathResolver::new(Some("/Mods"), Some("/game")),
            "<<kotorDirectory>>/Override/x.tga",
            &component,
        );

        assert_eq!(
            watched,
            HashSet::from(["/mods".to_string(), "/game/override/x.tga".to_string()])
        );
    }
}
