// State management module
//
// This module provides the StateManager which wraps the WorkingSet with thread-safe access
// using Arc<RwLock<T>> and emits change events so the validation cache can invalidate.

use crate::models::{Component, UserConfig, WorkingSet};
use crate::services::dependencies::{self, DependencyError, SelectionIssue};
use crate::services::paths::PathResolver;
use camino::Utf8PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Change events emitted when the working set is modified
///
/// These are the typed invalidation hooks: the validation cache subscribes to them instead
/// of polling or inspecting components.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// One or both install roots changed
    DirectoriesChanged {
        mod_directory: Option<String>,
        kotor_directory: Option<String>,
    },

    ComponentAdded {
        component_id: Uuid,
    },

    ComponentRemoved {
        component_id: Uuid,
    },

    /// Instructions or options of a component were added, removed, reordered or edited
    InstructionsChanged {
        component_id: Uuid,
    },

    /// A component or one of its options was selected or deselected
    SelectionChanged {
        component_id: Uuid,
    },

    /// Dependency or restriction sets changed
    DependenciesChanged {
        component_id: Uuid,
    },

    /// The whole working set was replaced
    WorkingSetLoaded {
        component_count: usize,
    },
}

/// Thread-safe state manager with event emission
///
/// This is the central state management component that:
/// - Provides thread-safe access to [`WorkingSet`] via `Arc<RwLock<T>>`
/// - Detects changes and emits [`StateChange`] events
/// - Routes dependency edits through [`crate::services::dependencies`] so they are checked
///
/// # Related Types
///
/// - [`crate::models::WorkingSet`]: The underlying component graph
/// - [`crate::cache::ValidationCache`]: Primary consumer of state events
/// - [`crate::config::ConfigManager`]: Loads instruction files and settings into state
pub struct StateManager {
    state: Arc<RwLock<WorkingSet>>,

    /// Broadcast channel for emitting state change events
    state_tx: broadcast::Sender<StateChange>,
}

impl StateManager {
    /// Create a new StateManager with an empty working set
    ///
    /// # Returns
    /// A new StateManager with a broadcast channel buffer of 100 events
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(WorkingSet::default())),
            state_tx,
        }
    }

    /// Clone of the whole working set, safe to use without holding locks
    pub fn snapshot(&self) -> WorkingSet {
        self.read_state().clone()
    }

    /// Execute a function with read access to the state
    ///
    /// # Example
    /// ```ignore
    /// let count = state_manager.read(|set| set.components.len());
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&WorkingSet) -> R,
    {
        let state = self.read_state();
        f(&state)
    }

    /// Update the state and emit change events
    ///
    /// # Arguments
    /// * `update_fn` - A function that mutates the working set
    ///
    /// # Returns
    /// The StateChange events that were emitted
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut WorkingSet),
    {
        let changes = {
            let mut state = self.write_state();
            let old_state = state.clone();
            update_fn(&mut state);
            detect_changes(&old_state, &state)
        };

        self.emit(&changes);
        changes
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    /// Replace the whole working set, keeping the configured directories
    pub fn load_components(&self, components: Vec<Component>) -> Vec<StateChange> {
        let component_count = components.len();
        {
            let mut state = self.write_state();
            state.components = components;
        }

        tracing::info!("Loaded working set with {} component(s)", component_count);
        let changes = vec![StateChange::WorkingSetLoaded { component_count }];
        self.emit(&changes);
        changes
    }

    pub fn set_directories(&self, mod_directory: Option<Utf8PathBuf>, kotor_directory: Option<Utf8PathBuf>) -> Vec<StateChange> {
        self.update(|state| {
            state.mod_directory = mod_directory;
            state.kotor_directory = kotor_directory;
        })
    }

    /// Load the install roots from the user configuration
    pub fn load_from_user_config(&self, user_config: &UserConfig) -> Vec<StateChange> {
        let settings = &user_config.settings;
        let changes = self.set_directories(
            settings.mod_directory().map(Utf8PathBuf::from),
            settings.kotor_directory().map(Utf8PathBuf::from),
        );

        tracing::info!(
            "Loaded user config: mod_directory={}, kotor_directory={}",
            settings.mod_directory().unwrap_or("<unset>"),
            settings.kotor_directory().unwrap_or("<unset>")
        );
        changes
    }

    pub fn add_component(&self, component: Component) -> Vec<StateChange> {
        self.update(|state| state.components.push(component))
    }

    pub fn remove_component(&self, component_id: Uuid) -> Vec<StateChange> {
        self.update(|state| state.components.retain(|c| c.id != component_id))
    }

    /// Apply `f` to one component. Returns no events when the id is unknown.
    pub fn update_component<F>(&self, component_id: Uuid, f: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut Component),
    {
        self.update(|state| {
            if let Some(component) = state.find_component_mut(component_id) {
                f(component);
            }
        })
    }

    pub fn set_selected(&self, component_id: Uuid, selected: bool) -> Vec<StateChange> {
        self.update_component(component_id, |component| component.is_selected = selected)
    }

    pub fn set_option_selected(&self, component_id: Uuid, option_id: Uuid, selected: bool) -> Vec<StateChange> {
        self.update_component(component_id, |component| {
            if let Some(option) = component.options.iter_mut().find(|o| o.id == option_id) {
                option.is_selected = selected;
            }
        })
    }

    pub fn add_dependency(&self, component_id: Uuid, dependency: Uuid) -> Result<Vec<StateChange>, DependencyError> {
        self.edit_references(component_id, |c| dependencies::add_dependency(c, dependency))
    }

    pub fn remove_dependency(&self, component_id: Uuid, dependency: Uuid) -> Result<Vec<StateChange>, DependencyError> {
        self.edit_references(component_id, |c| dependencies::remove_dependency(c, dependency))
    }

    pub fn add_restriction(&self, component_id: Uuid, restriction: Uuid) -> Result<Vec<StateChange>, DependencyError> {
        self.edit_references(component_id, |c| dependencies::add_restriction(c, restriction))
    }

    pub fn remove_restriction(&self, component_id: Uuid, restriction: Uuid) -> Result<Vec<StateChange>, DependencyError> {
        self.edit_references(component_id, |c| dependencies::remove_restriction(c, restriction))
    }

    /// Every selection, reference and integrity issue in the current working set
    pub fn selection_issues(&self) -> Vec<SelectionIssue> {
        self.read(|state| dependencies::all_issues(&state.components))
    }

    pub fn resolver(&self) -> PathResolver {
        self.read(WorkingSet::resolver)
    }

    fn edit_references<F>(&self, component_id: Uuid, edit: F) -> Result<Vec<StateChange>, DependencyError>
    where
        F: FnOnce(&mut Component) -> Result<(), DependencyError>,
    {
        let mut outcome = Err(DependencyError::NotPresent(component_id));
        let changes = self.update(|state| {
            if let Some(component) = state.find_component_mut(component_id) {
                outcome = edit(component);
            }
        });
        outcome.map(|()| changes)
    }

    fn emit(&self, changes: &[StateChange]) {
        for change in changes {
            // Ignore send errors - it's OK if no one is listening
            let _ = self.state_tx.send(change.clone());
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, WorkingSet> {
        self.state.read().unwrap_or_else(|poisoned| {
            tracing::error!("Working set lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, WorkingSet> {
        self.state.write().unwrap_or_else(|poisoned| {
            tracing::error!("Working set lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

// Make StateManager cloneable for sharing across threads
impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
        }
    }
}

/// Detect what changed between two working sets and generate events
fn detect_changes(old: &WorkingSet, new: &WorkingSet) -> Vec<StateChange> {
    let mut changes = Vec::new();

    if old.mod_directory != new.mod_directory || old.kotor_directory != new.kotor_directory {
        changes.push(StateChange::DirectoriesChanged {
            mod_directory: new.mod_directory.as_ref().map(|p| p.to_string()),
            kotor_directory: new.kotor_directory.as_ref().map(|p| p.to_string()),
        });
    }

    for before in &old.components {
        if new.find_component(before.id).is_none() {
            changes.push(StateChange::ComponentRemoved {
                component_id: before.id,
            });
        }
    }

    for after in &new.components {
        let Some(before) = old.find_component(after.id) else {
            changes.push(StateChange::ComponentAdded { component_id: after.id });
            continue;
        };
        let component_id = after.id;

        let options_shape = |c: &Component| {
            c.options
                .iter()
                .map(|o| (o.id, o.instructions.clone()))
                .collect::<Vec<_>>()
        };
        if before.instructions != after.instructions || options_shape(before) != options_shape(after) {
            changes.push(StateChange::InstructionsChanged { component_id });
        }

        let selection = |c: &Component| {
            (
                c.is_selected,
                c.options.iter().map(|o| (o.id, o.is_selected)).collect::<Vec<_>>(),
            )
        };
        if selection(before) != selection(after) {
            changes.push(StateChange::SelectionChanged { component_id });
        }

        if before.dependencies != after.dependencies || before.restrictions != after.restrictions {
            changes.push(StateChange::DependenciesChanged { component_id });
        }
    }

    changes
}
