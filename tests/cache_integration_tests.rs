//! Integration tests for ValidationCache
//!
//! These tests verify that the cache:
//! - Collapses concurrent identical requests into one computation
//! - Answers fire-and-forget requests with a placeholder and announces the real result
//! - Follows StateManager events (component edits, root changes)
//! - Recomputes after real filesystem changes are reported

mod common;

use camino::Utf8PathBuf;
use common::{GAME_DIR, MOD_DIR, zip_bytes};
use modsync::metrics::Metrics;
use modsync::models::{ActionKind, Component, Instruction};
use modsync::services::fs::ReadSeek;
use modsync::services::paths::path_key;
use modsync::services::{
    FileSystemProvider, MemoryFileSystem, PathResolver, RealFileSystem, ValidationResult, ValidationStatus,
};
use modsync::{CacheEvent, CacheKey, StateChange, StateManager, ValidationCache};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tempfile::TempDir;
use tokio::task::JoinSet;
use tokio::time::{Duration, timeout};

fn robes_mod() -> Component {
    let mut component = Component::new("Jedi Robes");
    component.is_selected = true;
    component.instructions = vec![
        Instruction::new(ActionKind::Extract).with_source(["<<modDirectory>>/robes.zip"]),
        Instruction::new(ActionKind::Move)
            .with_source(["<<modDirectory>>/robes/Override/*"])
            .with_destination("<<kotorDirectory>>/Override"),
    ];
    component
}

fn robes_disk() -> Arc<MemoryFileSystem> {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.add_file(
        &format!("{}/robes.zip", MOD_DIR),
        zip_bytes(&[("robes/Override/PFBI01.tga", "tga"), ("robes/Override/PMBI01.tga", "tga")]),
    );
    fs
}

/// In-memory disk that stalls the first `exists` check of one path until released
struct GatedDisk {
    inner: Arc<MemoryFileSystem>,
    gated: String,
    armed: AtomicBool,
    entered: UnboundedSender<()>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl GatedDisk {
    fn new(inner: Arc<MemoryFileSystem>, gated: &str) -> (Arc<Self>, UnboundedReceiver<()>, mpsc::Sender<()>) {
        let (entered, entered_rx) = unbounded_channel();
        let (release_tx, release) = mpsc::channel();
        let disk = Arc::new(Self {
            inner,
            gated: path_key(gated),
            armed: AtomicBool::new(true),
            entered,
            release: Mutex::new(release),
        });
        (disk, entered_rx, release_tx)
    }
}

impl FileSystemProvider for GatedDisk {
    fn exists(&self, path: &str) -> bool {
        let present = self.inner.exists(path);
        if path_key(path) == self.gated && self.armed.swap(false, Ordering::SeqCst) {
            self.entered.send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
        present
    }

    fn is_dir(&self, path: &str) -> bool {
        self.inner.is_dir(path)
    }

    fn list_recursive(&self, directory: &str) -> io::Result<Vec<String>> {
        self.inner.list_recursive(directory)
    }

    fn open(&self, path: &str) -> io::Result<Box<dyn ReadSeek>> {
        self.inner.open(path)
    }
}

const GATED_TEXTURE: &str = "/games/kotor/Override/a.tga";

/// A component whose only instruction leaves the disk alone, so the sole disk read is the
/// check of the validated path itself
fn texture_check() -> (Arc<MemoryFileSystem>, Component) {
    let disk = Arc::new(MemoryFileSystem::new());
    disk.add_file(GATED_TEXTURE, Vec::new());
    let mut component = Component::new("Texture Check");
    component.instructions = vec![Instruction::new(ActionKind::Run)];
    (disk, component)
}

async fn next_event(events: &mut tokio::sync::broadcast::Receiver<CacheEvent>) -> CacheEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("Timeout waiting for cache event")
        .expect("Cache event channel closed")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_requests_compute_once() {
    let metrics = Arc::new(Metrics::new());
    let cache = Arc::new(ValidationCache::new(common::resolver(), robes_disk(), Arc::clone(&metrics)));
    let component = Arc::new(robes_mod());
    let move_id = component.instructions[1].id;

    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let cache = Arc::clone(&cache);
        let component = Arc::clone(&component);
        tasks.spawn(async move {
            cache
                .validate_and_cache("<<modDirectory>>/robes/Override/*", move_id, &component)
                .await
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        results.push(joined.unwrap());
    }

    assert_eq!(results.len(), 16);
    assert!(results.iter().all(|r| r.status == ValidationStatus::WillExist));
    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(metrics.validations_computed.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.simulations_run.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.archives_read.load(Ordering::Relaxed), 1);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_fire_and_forget_request_announces_result() {
    let cache = Arc::new(ValidationCache::new(
        common::resolver(),
        robes_disk(),
        Arc::new(Metrics::new()),
    ));
    let component = robes_mod();
    let extract_id = component.instructions[0].id;
    let mut events = cache.subscribe();

    let first = cache.request(
        &tokio::runtime::Handle::current(),
        "<<modDirectory>>/robes.zip",
        extract_id,
        &component,
    );
    assert_eq!(first.status, ValidationStatus::Pending);

    let key = CacheKey::new("<<modDirectory>>/robes.zip", extract_id, component.id);
    match next_event(&mut events).await {
        CacheEvent::ResultReady { key: ready, result } => {
            assert_eq!(ready, key);
            assert_eq!(result.status, ValidationStatus::WillExist);
        }
        other => panic!("Expected ResultReady, got {:?}", other),
    }

    let again = cache.request(
        &tokio::runtime::Handle::current(),
        "<<modDirectory>>/robes.zip",
        extract_id,
        &component,
    );
    assert_eq!(again.status, ValidationStatus::WillExist);
    assert_eq!(cache.get_or_placeholder(&key), again);
}

#[tokio::test]
async fn test_component_edit_through_state_evicts() {
    let state = StateManager::new();
    state.set_directories(Some(Utf8PathBuf::from(MOD_DIR)), Some(Utf8PathBuf::from(GAME_DIR)));
    let component = robes_mod();
    let component_id = component.id;
    state.load_components(vec![component.clone()]);

    let metrics = Arc::new(Metrics::new());
    let cache = Arc::new(ValidationCache::new(state.resolver(), robes_disk(), Arc::clone(&metrics)));
    let listener = cache.watch_state(state.subscribe());
    let mut events = cache.subscribe();

    let move_id = component.instructions[1].id;
    cache
        .validate_and_cache("<<modDirectory>>/robes/Override/*", move_id, &component)
        .await;
    assert!(matches!(next_event(&mut events).await, CacheEvent::ResultReady { .. }));
    assert_eq!(cache.len(), 1);

    // Dependency edits leave path results alone
    let other = Component::new("Other");
    let other_id = other.id;
    state.add_component(other);
    state.add_dependency(component_id, other_id).unwrap();

    let changes = state.update_component(component_id, |c| c.instructions.truncate(1));
    assert_eq!(changes, vec![StateChange::InstructionsChanged { component_id }]);

    assert_eq!(
        next_event(&mut events).await,
        CacheEvent::Evicted { component_id }
    );
    assert!(cache.is_empty());
    assert_eq!(metrics.evictions.load(Ordering::Relaxed), 1);

    listener.abort();
}

#[tokio::test]
async fn test_root_change_through_state_clears_and_reresolves() {
    let state = StateManager::new();
    let component = robes_mod();
    state.load_components(vec![component.clone()]);

    let cache = Arc::new(ValidationCache::new(state.resolver(), robes_disk(), Arc::new(Metrics::new())));
    let listener = cache.watch_state(state.subscribe());
    let mut events = cache.subscribe();

    let extract_id = component.instructions[0].id;
    let before = cache
        .validate_and_cache("<<modDirectory>>/robes.zip", extract_id, &component)
        .await;
    assert_eq!(before.status, ValidationStatus::ConfigurationIncomplete);
    assert!(matches!(next_event(&mut events).await, CacheEvent::ResultReady { .. }));

    state.set_directories(Some(Utf8PathBuf::from(MOD_DIR)), Some(Utf8PathBuf::from(GAME_DIR)));
    assert_eq!(next_event(&mut events).await, CacheEvent::Cleared);
    assert_eq!(cache.validator().resolver(), &PathResolver::new(Some(MOD_DIR), Some(GAME_DIR)));

    let after = cache
        .validate_and_cache("<<modDirectory>>/robes.zip", extract_id, &component)
        .await;
    assert_eq!(after.status, ValidationStatus::WillExist);

    listener.abort();
}

#[tokio::test]
async fn test_disk_change_recomputes_after_eviction() {
    let temp_dir = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    let mod_dir = root.join("mods");
    let game_dir = root.join("game");
    std::fs::create_dir_all(&mod_dir).unwrap();
    std::fs::create_dir_all(game_dir.join("Override")).unwrap();
    let archive = mod_dir.join("robes.zip");
    std::fs::write(&archive, zip_bytes(&[("robes/Override/PFBI01.tga", "tga")])).unwrap();

    let metrics = Arc::new(Metrics::new());
    let cache = ValidationCache::new(
        PathResolver::new(Some(mod_dir.as_str()), Some(game_dir.as_str())),
        Arc::new(RealFileSystem),
        Arc::clone(&metrics),
    );
    let component = robes_mod();
    let extract_id = component.instructions[0].id;

    let present = cache
        .validate_and_cache("<<modDirectory>>/robes.zip", extract_id, &component)
        .await;
    assert_eq!(present.status, ValidationStatus::WillExist);

    std::fs::remove_file(&archive).unwrap();

    // Still cached until the change is reported
    let stale = cache
        .validate_and_cache("<<modDirectory>>/robes.zip", extract_id, &component)
        .await;
    assert_eq!(stale.status, ValidationStatus::WillExist);

    cache.evict_paths(&[archive.as_str()]);
    let fresh = cache
        .validate_and_cache("<<modDirectory>>/robes.zip", extract_id, &component)
        .await;
    assert_eq!(fresh.status, ValidationStatus::MissingArtifact);
    assert_eq!(metrics.validations_computed.load(Ordering::Relaxed), 2);
}

#[test]
fn test_blocking_callers_can_drive_the_cache() {
    let cache = ValidationCache::new(common::resolver(), robes_disk(), Arc::new(Metrics::new()));
    let component = robes_mod();
    let extract_id = component.instructions[0].id;

    // spawn_blocking needs a runtime; tokio-test provides a current-thread one
    let result = tokio_test::block_on(cache.validate_and_cache("<<modDirectory>>/robes.zip", extract_id, &component));
    assert_eq!(result.status, ValidationStatus::WillExist);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disk_change_during_first_computation_is_not_cached() {
    let (disk, component) = texture_check();
    let (gated, mut entered, release) = GatedDisk::new(Arc::clone(&disk), GATED_TEXTURE);
    let cache = Arc::new(ValidationCache::new(common::resolver(), gated, Arc::new(Metrics::new())));
    let run_id = component.instructions[0].id;
    let path = "<<kotorDirectory>>/Override/a.tga";
    let key = CacheKey::new(path, run_id, component.id);

    let task = {
        let cache = Arc::clone(&cache);
        let component = component.clone();
        tokio::spawn(async move { cache.validate_and_cache(path, run_id, &component).await })
    };

    // The replay has read the old disk and is stalled; the file goes away meanwhile
    entered.recv().await.unwrap();
    disk.remove(GATED_TEXTURE);
    cache.evict_paths(&[GATED_TEXTURE]);
    release.send(()).unwrap();

    let first = task.await.unwrap();
    assert_eq!(first.status, ValidationStatus::WillExist);
    assert_eq!(cache.get_cached(&key), None);

    let fresh = cache.validate_and_cache(path, run_id, &component).await;
    assert_eq!(fresh.status, ValidationStatus::Pending);
    assert_eq!(cache.get_cached(&key), Some(fresh));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_root_change_cancels_running_validation() {
    let (disk, component) = texture_check();
    let (gated, mut entered, release) = GatedDisk::new(disk, GATED_TEXTURE);
    let cache = Arc::new(ValidationCache::new(common::resolver(), gated, Arc::new(Metrics::new())));
    let run_id = component.instructions[0].id;
    let path = "<<kotorDirectory>>/Override/a.tga";

    let task = {
        let cache = Arc::clone(&cache);
        let component = component.clone();
        tokio::spawn(async move { cache.validate_and_cache(path, run_id, &component).await })
    };

    entered.recv().await.unwrap();
    cache.set_directories(Some(MOD_DIR), Some(GAME_DIR));
    release.send(()).unwrap();

    let cancelled = task.await.unwrap();
    assert_eq!(cancelled, ValidationResult::cancelled());
    assert_eq!(cancelled.status, ValidationStatus::Undetermined);
    assert!(cache.is_empty());

    // New work after the change runs with a live token
    let after = cache.validate_and_cache(path, run_id, &component).await;
    assert_eq!(after.status, ValidationStatus::WillExist);
    assert_eq!(cache.len(), 1);
}
