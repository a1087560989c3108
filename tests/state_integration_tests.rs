//! Integration tests for StateManager with state change events
//!
//! These tests verify that the StateManager correctly:
//! - Emits typed change events for every kind of working-set edit
//! - Supports multiple subscribers
//! - Handles concurrent access from multiple threads
//! - Keeps the resolver in step with the configured roots

use camino::Utf8PathBuf;
use modsync::models::{ActionKind, Component, Instruction, ModOption};
use modsync::{StateChange, StateManager, UserConfig};
use std::sync::Arc;
use tokio::time::{Duration, timeout};

async fn recv(rx: &mut tokio::sync::broadcast::Receiver<StateChange>) -> StateChange {
    timeout(Duration::from_millis(100), rx.recv())
        .await
        .expect("Timeout waiting for event")
        .expect("Channel closed")
}

#[tokio::test]
async fn test_load_then_edit_emits_events_in_order() {
    let state = StateManager::new();
    let mut rx = state.subscribe();

    let mut component = Component::new("Sith Armor");
    let mut option = ModOption::new("Red");
    option.instructions = vec![Instruction::new(ActionKind::Copy)];
    component.options.push(option);
    let component_id = component.id;
    let option_id = component.options[0].id;

    state.load_components(vec![component]);
    state.set_option_selected(component_id, option_id, true);
    state.update_component(component_id, |c| {
        c.options[0].instructions.push(Instruction::new(ActionKind::Delete));
    });
    state.remove_component(component_id);

    assert_eq!(recv(&mut rx).await, StateChange::WorkingSetLoaded { component_count: 1 });
    assert_eq!(recv(&mut rx).await, StateChange::SelectionChanged { component_id });
    assert_eq!(recv(&mut rx).await, StateChange::InstructionsChanged { component_id });
    assert_eq!(recv(&mut rx).await, StateChange::ComponentRemoved { component_id });
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_multiple_subscribers_receive_events() {
    let state = Arc::new(StateManager::new());
    let mut rx1 = state.subscribe();
    let mut rx2 = state.subscribe();

    let component = Component::new("Party Swap");
    let component_id = component.id;
    state.add_component(component);

    for rx in [&mut rx1, &mut rx2] {
        assert_eq!(recv(rx).await, StateChange::ComponentAdded { component_id });
    }
}

#[tokio::test]
async fn test_noop_update_emits_nothing() {
    let state = StateManager::new();
    let component = Component::new("Untouched");
    let component_id = component.id;
    state.add_component(component);
    let mut rx = state.subscribe();

    let changes = state.update_component(component_id, |c| c.description = "Edited text".to_string());
    assert!(changes.is_empty());
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_user_config_sets_roots_and_resolver() {
    let state = StateManager::new();
    let mut config = UserConfig::default();
    config.settings.mod_directory = "/mods/".to_string();
    config.settings.kotor_directory = "  ".to_string();

    let changes = state.load_from_user_config(&config);
    assert_eq!(
        changes,
        vec![StateChange::DirectoriesChanged {
            mod_directory: Some("/mods/".to_string()),
            kotor_directory: None,
        }]
    );

    let resolver = state.resolver();
    assert_eq!(resolver.mod_directory(), Some(&Utf8PathBuf::from("/mods")));
    assert!(!resolver.resolve("<<kotorDirectory>>/Override").complete);
    assert!(!state.read(|s| s.is_fully_configured()));
}

#[test]
fn test_concurrent_selection_updates() {
    let state = StateManager::new();
    let components: Vec<Component> = (0..8).map(|i| Component::new(format!("Mod {}", i))).collect();
    let ids: Vec<_> = components.iter().map(|c| c.id).collect();
    state.load_components(components);

    let handles: Vec<_> = ids
        .iter()
        .map(|&id| {
            let state = state.clone();
            std::thread::spawn(move || {
                for round in 0..50 {
                    state.set_selected(id, round % 2 == 0);
                }
                state.set_selected(id, true);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let snapshot = state.snapshot();
    assert_eq!(snapshot.components.len(), 8);
    assert_eq!(snapshot.selected().count(), 8);
}
