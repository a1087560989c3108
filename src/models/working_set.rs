use crate::models::Component;
use crate::services::paths::PathResolver;
use camino::Utf8PathBuf;
use uuid::Uuid;

/// The in-memory component graph plus the two install roots.
///
/// # Thread Safety
///
/// `WorkingSet` is wrapped in `Arc<RwLock<WorkingSet>>` by [`crate::state::StateManager`].
/// Mutate it through the manager so the cache hears about every change:
/// - [`read()`](crate::state::StateManager::read) for read-only access
/// - [`update()`](crate::state::StateManager::update) for mutations with change events
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkingSet {
    pub components: Vec<Component>,
    pub mod_directory: Option<Utf8PathBuf>,
    pub kotor_directory: Option<Utf8PathBuf>,
}

impl WorkingSet {
    pub fn new(components: Vec<Component>) -> Self {
        Self {
            components,
            ..Self::default()
        }
    }

    pub fn find_component(&self, id: Uuid) -> Option<&Component> {
        self.components.iter().find(|c| c.id == id)
    }

    pub fn find_component_mut(&mut self, id: Uuid) -> Option<&mut Component> {
        self.components.iter_mut().find(|c| c.id == id)
    }

    pub fn selected(&self) -> impl Iterator<Item = &Component> {
        self.components.iter().filter(|c| c.is_selected)
    }

    /// Placeholder resolver for the current roots
    pub fn resolver(&self) -> PathResolver {
        PathResolver::new(
            self.mod_directory.as_ref().map(|p| p.as_str()),
            self.kotor_directory.as_ref().map(|p| p.as_str()),
        )
    }

    pub fn is_fully_configured(&self) -> bool {
        self.mod_directory.is_some() && self.kotor_directory.is_some()
    }
}
