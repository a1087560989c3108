//! Dry-run replay of an instruction list.
//!
//! [`Simulator::replay`] walks a component's flattened instructions once and records, per
//! path, when it was produced or removed. The resulting [`VirtualFileSystem`] answers
//! "what is the state of this path just before instruction N" for every N without replaying
//! again.
//!
//! Path state is three-valued on purpose. Anything the replay cannot see into (an archive
//! that failed to open, a cleanlist that could not be read) becomes an opaque root and
//! queries beneath it answer [`UnknownReason::Indeterminate`], never "absent".

use crate::metrics::Metrics;
use crate::models::{ActionKind, Instruction, PlacedInstruction};
use crate::services::archive::{ArchiveError, ArchiveIntrospector};
use crate::services::cancel::CancelToken;
use crate::services::fs::FileSystemProvider;
use crate::services::paths::{
    PathResolver, WildcardPattern, ancestor_keys, file_name, has_placeholder, is_descendant,
    is_wildcard, join, normalize_path, parent_key, parent_path, path_key,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Texture formats `DelDuplicate` treats as interchangeable
pub const COMPATIBLE_TEXTURE_EXTENSIONS: &[&str] =
    &[".dds", ".jpg", ".png", ".tga", ".tpc", ".txi", ".bmp"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimulationError {
    #[error("Simulation cancelled")]
    Cancelled,
}

/// Why the replay cannot say whether a path exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownReason {
    /// Nothing so far produces the path and it is not on disk
    Pending,
    /// The path lies under an opaque root created by this instruction
    Indeterminate { instruction: usize },
}

/// Predicted state of a path at a point in the install
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathState {
    /// `produced_by` is `None` when the path is already on disk
    Exists { produced_by: Option<usize> },
    Absent { removed_by: usize },
    Unknown { reason: UnknownReason },
}

impl PathState {
    pub fn is_exists(&self) -> bool {
        matches!(self, PathState::Exists { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Produced(usize),
    Removed(usize),
}

impl Event {
    fn index(&self) -> usize {
        match self {
            Event::Produced(i) | Event::Removed(i) => *i,
        }
    }
}

/// A directory whose contents the replay could not predict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueRoot {
    pub path: String,
    pub instruction: usize,
    pub reason: String,
}

/// A source that did not exist when its instruction ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedSource {
    pub instruction: usize,
    pub path: String,
}

/// Result of one replay: a timeline of predicted changes over the real filesystem
pub struct VirtualFileSystem {
    provider: Arc<dyn FileSystemProvider>,
    timelines: HashMap<String, Vec<Event>>,
    display: HashMap<String, String>,
    opaque: Vec<OpaqueRoot>,
    unresolved: Vec<UnresolvedSource>,
    instruction_count: usize,
}

impl VirtualFileSystem {
    pub(crate) fn new(provider: Arc<dyn FileSystemProvider>) -> Self {
        Self {
            provider,
            timelines: HashMap::new(),
            display: HashMap::new(),
            opaque: Vec::new(),
            unresolved: Vec::new(),
            instruction_count: 0,
        }
    }

    /// State of `path` after instructions `0..before_index` have run.
    ///
    /// Recorded events win over the disk, the latest event wins among recorded ones, and
    /// an opaque root hides everything recorded before it.
    pub fn query(&self, path: &str, before_index: usize) -> PathState {
        let normalized = normalize_path(path);
        let key = normalized.to_lowercase();

        let mut verdict = self.tracked(&key, before_index);
        if !matches!(verdict, Some(Event::Produced(_))) {
            // A directory exists again once something is produced beneath it.
            match self.latest_child_production(&key, before_index) {
                Some(child) if verdict.is_none_or(|v| child > v.index()) => {
                    verdict = Some(Event::Produced(child));
                }
                _ => {}
            }
        }

        match self.covering_opaque(&key, before_index) {
            Some(instruction) if verdict.is_none_or(|v| instruction > v.index()) => {
                return PathState::Unknown {
                    reason: UnknownReason::Indeterminate { instruction },
                };
            }
            _ => {}
        }

        match verdict {
            Some(Event::Produced(i)) => PathState::Exists { produced_by: Some(i) },
            Some(Event::Removed(i)) => PathState::Absent { removed_by: i },
            None if self.provider.exists(&normalized) => PathState::Exists { produced_by: None },
            None => PathState::Unknown {
                reason: UnknownReason::Pending,
            },
        }
    }

    /// Earliest instruction at or after `index` that produces `path` (or something beneath it)
    pub fn first_production_at_or_after(&self, path: &str, index: usize) -> Option<usize> {
        let key = path_key(path);
        self.timelines
            .iter()
            .filter(|(candidate, _)| **candidate == key || is_descendant(candidate, &key))
            .flat_map(|(_, events)| events.iter())
            .filter_map(|event| match event {
                Event::Produced(i) if *i >= index => Some(*i),
                _ => None,
            })
            .min()
    }

    /// Earliest instruction at or after `index` that produces a path matching `pattern`
    pub fn first_production_matching(&self, pattern: &WildcardPattern, index: usize) -> Option<usize> {
        self.display
            .iter()
            .filter(|(_, display)| pattern.matches(display))
            .filter_map(|(key, _)| self.timelines.get(key))
            .flat_map(|events| events.iter())
            .filter_map(|event| match event {
                Event::Produced(i) if *i >= index => Some(*i),
                _ => None,
            })
            .min()
    }

    /// Description of the opaque root created by `instruction`, if any
    pub fn opaque_reason(&self, instruction: usize) -> Option<&str> {
        self.opaque
            .iter()
            .find(|root| root.instruction == instruction)
            .map(|root| root.reason.as_str())
    }

    /// Whether `path` is a directory at that point, on disk or by virtue of tracked children
    pub fn is_directory(&self, path: &str, before_index: usize) -> bool {
        let key = path_key(path);
        self.latest_child_production(&key, before_index).is_some()
            || (self.provider.is_dir(path)
                && !matches!(self.tracked(&key, before_index), Some(Event::Removed(_))))
    }

    /// Every path beneath `directory` that exists at that point, sorted
    pub fn existing_under(&self, directory: &str, before_index: usize) -> Vec<String> {
        self.list_under(directory, before_index).existing
    }

    /// Paths beneath `directory` at that point, split by whether an opaque root hides them.
    ///
    /// A tracked path is hidden when the covering opaque root is newer than the instruction
    /// that produced it; a disk path is hidden by any covering opaque root.
    pub fn list_under(&self, directory: &str, before_index: usize) -> Listing {
        let dir_key = path_key(directory);
        let mut existing: HashMap<String, String> = HashMap::new();
        let mut hidden: HashMap<String, (String, usize)> = HashMap::new();

        for key in self.timelines.keys() {
            if !is_descendant(key, &dir_key) {
                continue;
            }
            let Some(Event::Produced(produced)) = self.tracked(key, before_index) else {
                continue;
            };
            // Directories implied by a produced file are reported too.
            for implied in std::iter::once(key.as_str()).chain(ancestor_keys(key)) {
                if !is_descendant(implied, &dir_key) {
                    break;
                }
                if existing.contains_key(implied) {
                    continue;
                }
                match self.covering_opaque(implied, before_index) {
                    Some(opaque) if opaque > produced => {
                        hidden
                            .entry(implied.to_string())
                            .or_insert_with(|| (self.display_for(implied), opaque));
                    }
                    _ => {
                        hidden.remove(implied);
                        existing.insert(implied.to_string(), self.display_for(implied));
                    }
                }
            }
        }

        if let Ok(listed) = self.provider.list_recursive(directory) {
            for path in listed {
                let key = path_key(&path);
                if existing.contains_key(&key) || hidden.contains_key(&key) || self.tracked(&key, before_index).is_some() {
                    continue;
                }
                match self.covering_opaque(&key, before_index) {
                    Some(opaque) => {
                        hidden.insert(key, (path, opaque));
                    }
                    None => {
                        existing.insert(key, path);
                    }
                }
            }
        }

        let beneath = self
            .opaque
            .iter()
            .filter(|root| root.instruction < before_index)
            .filter(|root| {
                let root_key = path_key(&root.path);
                root_key == dir_key || is_descendant(&root_key, &dir_key)
            })
            .map(|root| root.instruction)
            .max();
        let covering = match self.query(directory, before_index) {
            PathState::Unknown {
                reason: UnknownReason::Indeterminate { instruction },
            } => Some(instruction),
            _ => None,
        };

        let mut existing: Vec<String> = existing.into_values().collect();
        existing.sort();
        let mut hidden: Vec<(String, usize)> = hidden.into_values().collect();
        hidden.sort();

        Listing {
            existing,
            hidden,
            opaque: beneath.max(covering),
        }
    }

    pub fn opaque_roots(&self) -> &[OpaqueRoot] {
        &self.opaque
    }

    pub fn unresolved_sources(&self) -> &[UnresolvedSource] {
        &self.unresolved
    }

    /// Number of instructions replayed
    pub fn instruction_count(&self) -> usize {
        self.instruction_count
    }

    pub(crate) fn produce(&mut self, path: &str, index: usize) {
        self.record(path, Event::Produced(index));
    }

    pub(crate) fn remove(&mut self, path: &str, index: usize) {
        self.record(path, Event::Removed(index));
    }

    pub(crate) fn mark_opaque(&mut self, path: &str, index: usize, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::debug!("Instruction #{} makes {} opaque: {}", index, path, reason);
        self.opaque.push(OpaqueRoot {
            path: normalize_path(path),
            instruction: index,
            reason,
        });
    }

    pub(crate) fn record_unresolved(&mut self, index: usize, path: &str) {
        tracing::debug!("Instruction #{} source {} does not exist yet", index, path);
        self.unresolved.push(UnresolvedSource {
            instruction: index,
            path: normalize_path(path),
        });
    }

    fn record(&mut self, path: &str, event: Event) {
        let normalized = normalize_path(path);
        let key = normalized.to_lowercase();
        self.display.entry(key.clone()).or_insert(normalized);
        self.timelines.entry(key).or_default().push(event);
    }

    fn display_for(&self, key: &str) -> String {
        if let Some(display) = self.display.get(key) {
            return display.clone();
        }
        // Implied directory: borrow the casing of any tracked path beneath it.
        self.display
            .iter()
            .find(|(tracked, _)| is_descendant(tracked, key))
            .map(|(_, display)| {
                let depth = key.split('/').count();
                display.split('/').take(depth).collect::<Vec<_>>().join("/")
            })
            .unwrap_or_else(|| key.to_string())
    }

    /// Latest opaque root created before the index that contains `key`
    fn covering_opaque(&self, key: &str, before_index: usize) -> Option<usize> {
        self.opaque
            .iter()
            .filter(|root| root.instruction < before_index)
            .filter(|root| {
                let root_key = path_key(&root.path);
                key == root_key || is_descendant(key, &root_key)
            })
            .map(|root| root.instruction)
            .max()
    }

    /// Latest event affecting `key` before the index: its own, or a removal of an ancestor
    fn tracked(&self, key: &str, before_index: usize) -> Option<Event> {
        let own = self.timelines.get(key).and_then(|events| {
            events
                .iter()
                .rev()
                .find(|event| event.index() < before_index)
                .copied()
        });

        let ancestor_removal = ancestor_keys(key)
            .into_iter()
            .filter_map(|ancestor| self.timelines.get(ancestor))
            .filter_map(|events| {
                events
                    .iter()
                    .rev()
                    .find(|event| matches!(event, Event::Removed(i) if *i < before_index))
                    .copied()
            })
            .max_by_key(Event::index);

        match (own, ancestor_removal) {
            (Some(own), Some(removal)) if removal.index() > own.index() => Some(removal),
            (Some(own), _) => Some(own),
            (None, removal) => removal,
        }
    }

    fn latest_child_production(&self, key: &str, before_index: usize) -> Option<usize> {
        self.timelines
            .keys()
            .filter(|candidate| is_descendant(candidate, key))
            .filter_map(|candidate| match self.tracked(candidate, before_index) {
                Some(Event::Produced(i)) => Some(i),
                _ => None,
            })
            .max()
    }
}

/// Paths beneath a directory at one point of the install
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Paths known to exist, sorted
    pub existing: Vec<String>,
    /// Paths an opaque root may have changed, with the instruction that made it opaque
    pub hidden: Vec<(String, usize)>,
    /// Latest opaque root at, above or beneath the directory
    pub opaque: Option<usize>,
}

/// A source after wildcard expansion
#[derive(Debug, Clone, PartialEq, Eq)]
enum SourceMatch {
    Found(String),
    Indeterminate(usize),
    Missing(String),
}

/// Replays instruction lists against the real filesystem plus archive contents
pub struct Simulator {
    resolver: PathResolver,
    introspector: Arc<ArchiveIntrospector>,
    metrics: Arc<Metrics>,
}

impl Simulator {
    pub fn new(resolver: PathResolver, introspector: Arc<ArchiveIntrospector>, metrics: Arc<Metrics>) -> Self {
        Self {
            resolver,
            introspector,
            metrics,
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn introspector(&self) -> &Arc<ArchiveIntrospector> {
        &self.introspector
    }

    /// Replay the whole list once.
    ///
    /// # Arguments
    /// * `instructions` - Flattened instructions in install order
    /// * `cancel` - Checked before every instruction and during archive enumeration
    ///
    /// # Returns
    /// The recorded timeline, or `SimulationError::Cancelled`
    pub fn replay(
        &self,
        instructions: &[PlacedInstruction<'_>],
        cancel: &CancelToken,
    ) -> Result<VirtualFileSystem, SimulationError> {
        let mut vfs = VirtualFileSystem::new(Arc::clone(self.introspector.provider()));

        for placed in instructions {
            if cancel.is_cancelled() {
                return Err(SimulationError::Cancelled);
            }

            let index = placed.index;
            let instruction = placed.instruction;
            tracing::debug!("Replaying #{} {}", index, instruction.action);

            match instruction.action {
                ActionKind::Extract => self.apply_extract(&mut vfs, instruction, index, cancel)?,
                ActionKind::Move => self.apply_transfer(&mut vfs, instruction, index, false),
                ActionKind::Copy => self.apply_transfer(&mut vfs, instruction, index, true),
                ActionKind::Rename => self.apply_rename(&mut vfs, instruction, index),
                ActionKind::Delete => self.apply_delete(&mut vfs, instruction, index),
                ActionKind::DelDuplicate => self.apply_del_duplicate(&mut vfs, instruction, index),
                ActionKind::CleanList => self.apply_clean_list(&mut vfs, instruction, index),
                ActionKind::Patcher | ActionKind::Execute | ActionKind::Run | ActionKind::Choose => {}
            }

            vfs.instruction_count = index + 1;
        }

        self.metrics.record_simulation();
        Ok(vfs)
    }

    fn resolve(&self, raw: &str) -> Option<String> {
        let resolved = self.resolver.resolve(raw);
        resolved.complete.then(|| normalize_path(&resolved.path))
    }

    /// Resolved destination and whether it was written as a directory (trailing separator)
    fn destination(&self, vfs: &mut VirtualFileSystem, instruction: &Instruction, index: usize) -> Option<(String, bool)> {
        let raw = instruction.destination_path()?;
        match self.resolve(raw) {
            Some(path) => Some((path, raw.ends_with(['/', '\\']))),
            None => {
                vfs.record_unresolved(index, raw);
                None
            }
        }
    }

    fn expand(&self, vfs: &VirtualFileSystem, path: &str, index: usize) -> Vec<SourceMatch> {
        if !is_wildcard(path) {
            let found = match vfs.query(path, index) {
                PathState::Exists { .. } => SourceMatch::Found(path.to_string()),
                PathState::Unknown {
                    reason: UnknownReason::Indeterminate { instruction },
                } => SourceMatch::Indeterminate(instruction),
                _ => SourceMatch::Missing(path.to_string()),
            };
            return vec![found];
        }

        let pattern = match WildcardPattern::new(path) {
            Ok(pattern) => pattern,
            Err(e) => {
                tracing::warn!("Unusable wildcard {}: {}", path, e);
                return vec![SourceMatch::Missing(path.to_string())];
            }
        };

        let listing = vfs.list_under(&pattern.fixed_prefix(), index);
        let mut matches: Vec<SourceMatch> = listing
            .existing
            .into_iter()
            .filter(|candidate| pattern.matches(candidate))
            .map(SourceMatch::Found)
            .collect();

        let mut origins: Vec<usize> = listing
            .hidden
            .iter()
            .filter(|(candidate, _)| pattern.matches(candidate))
            .map(|(_, origin)| *origin)
            .collect();
        if matches.is_empty() && origins.is_empty() {
            origins.extend(listing.opaque);
        }
        origins.sort_unstable();
        origins.dedup();
        matches.extend(origins.into_iter().map(SourceMatch::Indeterminate));

        if matches.is_empty() {
            matches.push(SourceMatch::Missing(path.to_string()));
        }
        matches
    }

    /// Resolve and expand every source path of an instruction
    fn sources(&self, vfs: &mut VirtualFileSystem, instruction: &Instruction, index: usize) -> Vec<SourceMatch> {
        let mut expanded = Vec::new();
        for raw in instruction.source_paths() {
            match self.resolve(raw) {
                Some(path) => expanded.extend(self.expand(vfs, &path, index)),
                None => vfs.record_unresolved(index, raw),
            }
        }
        expanded
    }

    fn apply_extract(
        &self,
        vfs: &mut VirtualFileSystem,
        instruction: &Instruction,
        index: usize,
        cancel: &CancelToken,
    ) -> Result<(), SimulationError> {
        let destination = self.destination(vfs, instruction, index).map(|(path, _)| path);

        for source in self.sources(vfs, instruction, index) {
            match source {
                SourceMatch::Found(archive) => {
                    let target = destination
                        .clone()
                        .or_else(|| parent_path(&archive))
                        .unwrap_or_default();

                    match self.introspector.entries(&archive, cancel) {
                        Ok(entries) => {
                            vfs.produce(&target, index);
                            for entry in entries.iter() {
                                vfs.produce(&join(&target, entry), index);
                            }
                        }
                        Err(ArchiveError::Cancelled) => return Err(SimulationError::Cancelled),
                        Err(e) => vfs.mark_opaque(&target, index, e.to_string()),
                    }
                }
                SourceMatch::Indeterminate(origin) => {
                    if let Some(target) = &destination {
                        vfs.mark_opaque(target, index, format!("archive comes from opaque output of #{}", origin));
                    }
                }
                SourceMatch::Missing(path) => vfs.record_unresolved(index, &path),
            }
        }

        Ok(())
    }

    fn apply_transfer(&self, vfs: &mut VirtualFileSystem, instruction: &Instruction, index: usize, keep_source: bool) {
        let Some((destination, as_directory)) = self.destination(vfs, instruction, index) else {
            tracing::warn!("{} #{} has no usable destination", instruction.action, index);
            return;
        };

        for source in self.sources(vfs, instruction, index) {
            match source {
                SourceMatch::Found(path) => {
                    let target = transfer_target(&path, &destination, as_directory);
                    self.transfer(vfs, &path, &target, index, instruction.overwrite, keep_source);
                }
                SourceMatch::Indeterminate(origin) => {
                    vfs.mark_opaque(&destination, index, format!("source comes from opaque output of #{}", origin));
                }
                SourceMatch::Missing(path) => vfs.record_unresolved(index, &path),
            }
        }
    }

    fn apply_rename(&self, vfs: &mut VirtualFileSystem, instruction: &Instruction, index: usize) {
        let Some(raw) = instruction.destination_path() else {
            tracing::warn!("Rename #{} has no new name", index);
            return;
        };

        let is_bare_name = !raw.contains(['/', '\\']) && !has_placeholder(raw);
        let resolved = if is_bare_name {
            None
        } else {
            match self.resolve(raw) {
                Some(path) => Some(path),
                None => {
                    vfs.record_unresolved(index, raw);
                    return;
                }
            }
        };

        for source in self.sources(vfs, instruction, index) {
            match source {
                SourceMatch::Found(path) => {
                    let target = match &resolved {
                        Some(target) => target.clone(),
                        None => parent_path(&path)
                            .map(|parent| join(&parent, raw))
                            .unwrap_or_else(|| raw.to_string()),
                    };
                    self.transfer(vfs, &path, &target, index, instruction.overwrite, false);
                }
                SourceMatch::Indeterminate(_) => {}
                SourceMatch::Missing(path) => vfs.record_unresolved(index, &path),
            }
        }
    }

    fn apply_delete(&self, vfs: &mut VirtualFileSystem, instruction: &Instruction, index: usize) {
        for raw in instruction.source_paths() {
            let Some(path) = self.resolve(raw) else {
                vfs.record_unresolved(index, raw);
                continue;
            };

            if !is_wildcard(&path) {
                vfs.remove(&path, index);
                continue;
            }

            for source in self.expand(vfs, &path, index) {
                if let SourceMatch::Found(found) = source {
                    vfs.remove(&found, index);
                }
            }
        }
    }

    fn apply_del_duplicate(&self, vfs: &mut VirtualFileSystem, instruction: &Instruction, index: usize) {
        let extensions = parse_extensions(&instruction.arguments);
        if extensions.is_empty() {
            tracing::warn!("DelDuplicate #{} names no extensions", index);
            return;
        }

        let directories: Vec<String> = match self.destination(vfs, instruction, index) {
            Some((destination, _)) => vec![destination],
            None => instruction
                .source_paths()
                .iter()
                .filter_map(|raw| self.resolve(raw))
                .collect(),
        };

        for directory in directories {
            if let PathState::Unknown {
                reason: UnknownReason::Indeterminate { .. },
            } = vfs.query(&directory, index)
            {
                tracing::debug!("DelDuplicate #{} skips opaque {}", index, directory);
                continue;
            }

            let dir_key = path_key(&directory);
            let mut by_stem: HashMap<String, Vec<(String, String)>> = HashMap::new();
            for path in vfs.existing_under(&directory, index) {
                if parent_key(&path_key(&path)) != Some(dir_key.as_str()) {
                    continue;
                }
                let name = file_name(&path).to_lowercase();
                if let Some((stem, ext)) = name.rsplit_once('.') {
                    by_stem
                        .entry(stem.to_string())
                        .or_default()
                        .push((path.clone(), format!(".{}", ext)));
                }
            }

            for files in by_stem.values() {
                for (path, ext) in files {
                    if !extensions.contains(ext) {
                        continue;
                    }
                    let has_twin = files.iter().any(|(_, other)| {
                        other != ext && COMPATIBLE_TEXTURE_EXTENSIONS.contains(&other.as_str())
                    });
                    if has_twin {
                        vfs.remove(path, index);
                    }
                }
            }
        }
    }

    fn apply_clean_list(&self, vfs: &mut VirtualFileSystem, instruction: &Instruction, index: usize) {
        let Some((destination, _)) = self.destination(vfs, instruction, index) else {
            tracing::warn!("CleanList #{} has no destination", index);
            return;
        };

        let Some(cleanlist) = instruction.source_paths().first().and_then(|raw| self.resolve(raw)) else {
            vfs.mark_opaque(&destination, index, "cleanlist path is not resolvable");
            return;
        };

        let text = match self.introspector.provider().read_to_string(&cleanlist) {
            Ok(text) => text,
            Err(e) => {
                vfs.mark_opaque(&destination, index, format!("cannot read cleanlist {}: {}", cleanlist, e));
                return;
            }
        };

        let extra = instruction
            .arguments
            .split([',', ';'])
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        for name in parse_cleanlist(&text).into_iter().chain(extra) {
            vfs.remove(&join(&destination, &name), index);
        }
    }

    /// Produce `target` (and a directory source's children beneath it), then drop the source
    fn transfer(
        &self,
        vfs: &mut VirtualFileSystem,
        source: &str,
        target: &str,
        index: usize,
        overwrite: bool,
        keep_source: bool,
    ) {
        if path_key(source) == path_key(target) {
            return;
        }

        let Listing {
            existing: children,
            hidden,
            opaque,
        } = if vfs.is_directory(source, index) {
            vfs.list_under(source, index)
        } else {
            Listing::default()
        };

        if children.is_empty() && !overwrite && vfs.query(target, index).is_exists() {
            tracing::debug!("#{} keeps existing {} (overwrite disabled)", index, target);
            return;
        }

        vfs.produce(target, index);
        for child in children {
            let relative: Vec<&str> = child.split('/').skip(source.split('/').count()).collect();
            let child_target = join(target, &relative.join("/"));
            if overwrite || !vfs.query(&child_target, index).is_exists() {
                vfs.produce(&child_target, index);
            }
        }

        if let Some(origin) = hidden.iter().map(|(_, origin)| *origin).max().or(opaque) {
            vfs.mark_opaque(target, index, format!("source carries opaque output of #{}", origin));
        }

        if !keep_source {
            vfs.remove(source, index);
        }
    }
}

/// Where a Move or Copy puts `source`
fn transfer_target(source: &str, destination: &str, as_directory: bool) -> String {
    let name = file_name(source);
    if !as_directory && file_name(destination).eq_ignore_ascii_case(name) {
        destination.to_string()
    } else {
        join(destination, name)
    }
}

/// Extensions from a DelDuplicate argument string, lower-cased with a leading dot
fn parse_extensions(arguments: &str) -> Vec<String> {
    arguments
        .split([',', ';', ' '])
        .map(str::trim)
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{}", ext.trim_start_matches('.').to_lowercase()))
        .collect()
}

/// File names from a cleanlist, one `Mod Name,file1,file2` line per mod
pub fn parse_cleanlist(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .flat_map(|line| line.split(',').skip(1))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
