//! Dependency and restriction consistency.
//!
//! Components list the ids of components (or options) they need and the ones they cannot be
//! installed alongside. The mutators here keep those lists sane; the `*_issues` functions
//! check a whole working set and report problems without changing anything.

use crate::models::{ActionKind, ChoiceReference, Component, ModOption};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DependencyError {
    #[error("A component cannot reference itself")]
    SelfReference,

    #[error("{0} is already listed")]
    AlreadyPresent(Uuid),

    #[error("{0} is not listed")]
    NotPresent(Uuid),
}

/// Make `component` require `id`.
///
/// # Returns
/// `SelfReference` for the component's own id, `AlreadyPresent` when listed already. An id
/// that is also a restriction is accepted with a warning.
pub fn add_dependency(component: &mut Component, id: Uuid) -> Result<(), DependencyError> {
    if id == component.id {
        return Err(DependencyError::SelfReference);
    }
    if component.restrictions.contains(&id) {
        tracing::warn!("'{}' now both depends on and is restricted by {}", component.name, id);
    }
    if !component.dependencies.insert(id) {
        return Err(DependencyError::AlreadyPresent(id));
    }
    Ok(())
}

pub fn remove_dependency(component: &mut Component, id: Uuid) -> Result<(), DependencyError> {
    if component.dependencies.shift_remove(&id) {
        Ok(())
    } else {
        Err(DependencyError::NotPresent(id))
    }
}

/// Make `component` incompatible with `id`. Same rules as [`add_dependency`].
pub fn add_restriction(component: &mut Component, id: Uuid) -> Result<(), DependencyError> {
    if id == component.id {
        return Err(DependencyError::SelfReference);
    }
    if component.dependencies.contains(&id) {
        tracing::warn!("'{}' now both depends on and is restricted by {}", component.name, id);
    }
    if !component.restrictions.insert(id) {
        return Err(DependencyError::AlreadyPresent(id));
    }
    Ok(())
}

pub fn remove_restriction(component: &mut Component, id: Uuid) -> Result<(), DependencyError> {
    if component.restrictions.shift_remove(&id) {
        Ok(())
    } else {
        Err(DependencyError::NotPresent(id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueKind {
    /// A selected component needs something that is not selected
    Requires,
    /// A selected component is incompatible with something selected
    ConflictsWith,
    /// A dependency or restriction id names nothing in the working set
    DanglingReference,
    /// A `Choose` source, dependency or restriction entry is not an id, or a `Choose` names nothing
    MalformedReference,
    /// A `Choose` instruction with no sources
    EmptyChoice,
    /// Self references, overlaps and duplicate ids
    Integrity,
}

impl IssueKind {
    /// Warnings are reported but do not stop an install
    pub fn is_warning(&self) -> bool {
        matches!(self, IssueKind::EmptyChoice | IssueKind::Integrity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionIssue {
    pub kind: IssueKind,
    pub component_id: Uuid,
    pub component_name: String,
    pub referenced_id: Option<Uuid>,
    /// Display name of the referenced component or option, when it resolves
    pub referenced_name: Option<String>,
    pub message: String,
}

/// A component or option an id can point at
#[derive(Debug, Clone, Copy)]
enum Referent<'a> {
    Component(&'a Component),
    Option {
        parent: &'a Component,
        option: &'a ModOption,
    },
}

impl Referent<'_> {
    fn name(&self) -> &str {
        match self {
            Referent::Component(component) => &component.name,
            Referent::Option { option, .. } => &option.name,
        }
    }

    /// An option only counts as selected when its component is selected too
    fn is_selected(&self) -> bool {
        match self {
            Referent::Component(component) => component.is_selected,
            Referent::Option { parent, option } => parent.is_selected && option.is_selected,
        }
    }
}

fn index_referents(components: &[Component]) -> HashMap<Uuid, Referent<'_>> {
    let mut index = HashMap::new();
    for component in components {
        index.insert(component.id, Referent::Component(component));
        for option in &component.options {
            index.entry(option.id).or_insert(Referent::Option {
                parent: component,
                option,
            });
        }
    }
    index
}

/// Check every selected component's dependencies and restrictions.
///
/// Two selected components that restrict each other produce two issues, one from each side.
pub fn compute_selection_issues(components: &[Component]) -> Vec<SelectionIssue> {
    let index = index_referents(components);
    let mut issues = Vec::new();

    for component in components.iter().filter(|c| c.is_selected) {
        let issue = |kind, id: Uuid, referenced_name: Option<String>, message: String| SelectionIssue {
            kind,
            component_id: component.id,
            component_name: component.name.clone(),
            referenced_id: Some(id),
            referenced_name,
            message,
        };

        for &id in component.dependencies.iter().filter(|id| **id != component.id) {
            match index.get(&id) {
                None => issues.push(issue(
                    IssueKind::DanglingReference,
                    id,
                    None,
                    format!("'{}' depends on {}, which is not in the list", component.name, id),
                )),
                Some(referent) if !referent.is_selected() => issues.push(issue(
                    IssueKind::Requires,
                    id,
                    Some(referent.name().to_string()),
                    format!("'{}' requires '{}'", component.name, referent.name()),
                )),
                Some(_) => {}
            }
        }

        for &id in component.restrictions.iter().filter(|id| **id != component.id) {
            match index.get(&id) {
                None => issues.push(issue(
                    IssueKind::DanglingReference,
                    id,
                    None,
                    format!("'{}' is restricted by {}, which is not in the list", component.name, id),
                )),
                Some(referent) if referent.is_selected() => issues.push(issue(
                    IssueKind::ConflictsWith,
                    id,
                    Some(referent.name().to_string()),
                    format!("'{}' conflicts with '{}'", component.name, referent.name()),
                )),
                Some(_) => {}
            }
        }
    }

    issues
}

/// Check every `Choose` instruction's references across the working set
pub fn choose_reference_issues(components: &[Component]) -> Vec<SelectionIssue> {
    let index = index_referents(components);
    let mut issues = Vec::new();

    for component in components {
        let chooses = component
            .instructions
            .iter()
            .chain(component.options.iter().flat_map(|o| o.instructions.iter()))
            .filter(|i| i.action == ActionKind::Choose);

        for choose in chooses {
            let references = choose.choice_references();
            if references.is_empty() {
                issues.push(SelectionIssue {
                    kind: IssueKind::EmptyChoice,
                    component_id: component.id,
                    component_name: component.name.clone(),
                    referenced_id: None,
                    referenced_name: None,
                    message: format!("'{}' has a Choose instruction with no options", component.name),
                });
                continue;
            }

            for reference in references {
                let (referenced_id, message) = match reference {
                    ChoiceReference::Malformed(raw) => (
                        None,
                        format!("'{}' chooses '{}', which is not an identifier", component.name, raw),
                    ),
                    ChoiceReference::Id(id) if !index.contains_key(&id) => (
                        Some(id),
                        format!("'{}' chooses {}, which resolves to nothing", component.name, id),
                    ),
                    ChoiceReference::Id(_) => continue,
                };
                issues.push(SelectionIssue {
                    kind: IssueKind::MalformedReference,
                    component_id: component.id,
                    component_name: component.name.clone(),
                    referenced_id,
                    referenced_name: None,
                    message,
                });
            }
        }
    }

    issues
}

/// Dependency and restriction entries that are not identifiers
pub fn unparseable_reference_issues(components: &[Component]) -> Vec<SelectionIssue> {
    let mut issues = Vec::new();

    for component in components {
        let entries = component
            .dependencies
            .malformed()
            .iter()
            .map(|raw| ("dependency", raw))
            .chain(component.restrictions.malformed().iter().map(|raw| ("restriction", raw)));

        for (list, raw) in entries {
            issues.push(SelectionIssue {
                kind: IssueKind::MalformedReference,
                component_id: component.id,
                component_name: component.name.clone(),
                referenced_id: None,
                referenced_name: None,
                message: format!("'{}' lists {} '{}', which is not an identifier", component.name, list, raw),
            });
        }
    }

    issues
}

/// Structural problems inside components, plus ids shared by more than one component
pub fn integrity_issues(components: &[Component]) -> Vec<SelectionIssue> {
    let mut issues = Vec::new();
    let mut seen: HashMap<Uuid, &str> = HashMap::new();

    for component in components {
        for warning in component.integrity_warnings() {
            issues.push(SelectionIssue {
                kind: IssueKind::Integrity,
                component_id: component.id,
                component_name: component.name.clone(),
                referenced_id: None,
                referenced_name: None,
                message: warning,
            });
        }

        if let Some(first) = seen.insert(component.id, &component.name) {
            issues.push(SelectionIssue {
                kind: IssueKind::Integrity,
                component_id: component.id,
                component_name: component.name.clone(),
                referenced_id: Some(component.id),
                referenced_name: Some(first.to_string()),
                message: format!("'{}' shares its id with '{}'", component.name, first),
            });
        }
    }

    issues
}

/// Every issue in the working set: selection, references, then integrity
pub fn all_issues(components: &[Component]) -> Vec<SelectionIssue> {
    let mut issues = compute_selection_issues(components);
    issues.extend(choose_reference_issues(components));
    issues.extend(unparseable_reference_issues(components));
    issues.extend(integrity_issues(components));
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Instruction;

    fn selected(name: &str) -> Component {
        let mut component = Component::new(name);
        component.is_selected = true;
        component
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut component = Component::new("Loner");
        let own_id = component.id;

        assert_eq!(add_dependency(&mut component, own_id), Err(DependencyError::SelfReference));
        assert_eq!(add_restriction(&mut component, own_id), Err(DependencyError::SelfReference));
        assert!(component.dependencies.is_empty());
    }

    #[test]
    fn test_add_remove_round() {
        let mut component = Component::new("A");
        let other = Uuid::new_v4();

        add_dependency(&mut component, other).unwrap();
        assert_eq!(add_dependency(&mut component, other), Err(DependencyError::AlreadyPresent(other)));
        // Overlap with the opposite set is tolerated.
        add_restriction(&mut component, other).unwrap();

        remove_dependency(&mut component, other).unwrap();
        assert_eq!(remove_dependency(&mut component, other), Err(DependencyError::NotPresent(other)));
        remove_restriction(&mut component, other).unwrap();
        assert!(component.restrictions.is_empty());
    }

    #[test]
    fn test_symmetric_conflicts() {
        let mut a = selected("Alpha");
        let mut b = selected("Beta");
        a.restrictions.insert(b.id);
        b.restrictions.insert(a.id);

        let issues = compute_selection_issues(&[a.clone(), b.clone()]);

        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.kind == IssueKind::ConflictsWith));
        assert_eq!(issues[0].component_id, a.id);
        assert_eq!(issues[0].referenced_name.as_deref(), Some("Beta"));
        assert_eq!(issues[1].component_id, b.id);
        assert_eq!(issues[1].referenced_name.as_deref(), Some("Alpha"));
    }

    #[test]
    fn test_requires_and_dangling() {
        let mut a = selected("Alpha");
        let b = Component::new("Beta");
        a.dependencies.insert(b.id);
        a.dependencies.insert(Uuid::new_v4());

        let issues = compute_selection_issues(&[a, b]);
        let kinds: Vec<IssueKind> = issues.iter().map(|i| i.kind).collect();

        assert_eq!(kinds, vec![IssueKind::Requires, IssueKind::DanglingReference]);
        assert_eq!(issues[0].message, "'Alpha' requires 'Beta'");
    }

    #[test]
    fn test_option_referent_needs_parent_selected() {
        let mut parent = Component::new("Parent");
        let mut option = ModOption::new("Variant");
        option.is_selected = true;
        let option_id = option.id;
        parent.options.push(option);

        let mut dependent = selected("Dependent");
        dependent.dependencies.insert(option_id);

        let issues = compute_selection_issues(&[dependent.clone(), parent.clone()]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].referenced_name.as_deref(), Some("Variant"));

        parent.is_selected = true;
        assert!(compute_selection_issues(&[dependent, parent]).is_empty());
    }

    #[test]
    fn test_unselected_components_are_not_checked() {
        let mut a = Component::new("Alpha");
        a.dependencies.insert(Uuid::new_v4());
        assert!(compute_selection_issues(&[a]).is_empty());
    }

    #[test]
    fn test_choose_reference_issues() {
        let mut target = Component::new("Target");
        let option = ModOption::new("Opt");
        let option_id = option.id;
        target.options.push(option);

        let mut chooser = Component::new("Chooser");
        chooser.instructions = vec![
            Instruction::new(ActionKind::Choose).with_source([
                option_id.to_string(),
                "{garbage}".to_string(),
                Uuid::new_v4().to_string(),
            ]),
            Instruction::new(ActionKind::Choose),
        ];

        let issues = choose_reference_issues(&[target, chooser]);
        let kinds: Vec<IssueKind> = issues.iter().map(|i| i.kind).collect();

        assert_eq!(
            kinds,
            vec![IssueKind::MalformedReference, IssueKind::MalformedReference, IssueKind::EmptyChoice]
        );
        assert!(kinds[2].is_warning());
    }

    #[test]
    fn test_integrity_issues_include_duplicate_ids() {
        let a = Component::new("First");
        let mut b = Component::new("Second");
        b.id = a.id;

        let issues = integrity_issues(&[a, b]);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("shares its id"));
    }
}
