//! Integration tests for ConfigManager
//!
//! These tests verify:
//! - User config persistence and defaults
//! - Loading hand-written instruction files with tolerant GUIDs and legacy flags
//! - Writing an instruction file back and reading the same graph, malformed ids included

use camino::Utf8PathBuf;
use modsync::models::{ActionKind, DownloadFlag, InstructionFile};
use modsync::services::IssueKind;
use modsync::services::dependencies::all_issues;
use modsync::{ConfigManager, UserConfig};
use tempfile::TempDir;
use uuid::Uuid;

fn manager() -> (ConfigManager, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config_dir = Utf8PathBuf::try_from(temp_dir.path().join("ModSync Data")).unwrap();
    let manager = ConfigManager::new(&config_dir).unwrap();
    (manager, temp_dir)
}

fn write(temp_dir: &TempDir, name: &str, contents: &str) -> Utf8PathBuf {
    let path = Utf8PathBuf::try_from(temp_dir.path().join(name)).unwrap();
    std::fs::write(&path, contents).unwrap();
    path
}

const INSTRUCTIONS: &str = r#"
components:
  - Guid: "{6B8C1E8A-3F0E-4C44-9E55-0E5C4B1F2A10}"
    Name: Ultimate Character Overhaul
    Author: Community
    Category: Graphics Improvement
    ModLink: https://deadlystream.com/files/file/1
    IsSelected: true
    Dependencies:
      - "2f1d6c0a-1b2c-4d3e-8f90-a1b2c3d4e5f6"
      - "not a guid"
    DownloadFilenames:
      "https://deadlystream.com/files/file/1":
        UCO.zip: true
        UCO-readme.txt: false
        UCO-extras.zip: null
    Instructions:
      - Guid: "0b1c2d3e4f5a4b6c8d7e9f0a1b2c3d4e"
        Action: unzip
        Source: "<<modDirectory>>/UCO.zip"
      - Action: Move
        Source:
          - "<<modDirectory>>/UCO/Override/*.tga"
        Destination: "<<kotorDirectory>>/Override"
        Overwrite: false
    Options:
      - Guid: "(11111111-2222-4333-8444-555555555555)"
        Name: Alternate Heads
        Instructions:
          - Action: TSLPatcher
            Source: "<<modDirectory>>/UCO/tslpatchdata"
            Arguments: "0"
  - Guid: "2f1d6c0a-1b2c-4d3e-8f90-a1b2c3d4e5f6"
    Name: Base Fixes
"#;

#[test]
fn test_user_config_survives_reload() {
    let (manager, _temp_dir) = manager();

    let mut config = UserConfig::default();
    config.settings.mod_directory = "D:/Mods/KOTOR".to_string();
    config.settings.kotor_directory = "C:/Games/KOTOR".to_string();
    config.settings.watch_filesystem = false;
    manager.save_user_config(&config).unwrap();

    let loaded = manager.load_user_config().unwrap();
    assert_eq!(loaded.settings.mod_directory(), Some("D:/Mods/KOTOR"));
    assert!(!loaded.settings.watch_filesystem);

    // Without environment overrides the layered view matches the file
    let effective = manager.load_effective_config().unwrap();
    assert!(effective.settings.is_fully_configured());
}

#[test]
fn test_hand_written_instruction_file_loads() {
    let (manager, temp_dir) = manager();
    let path = write(&temp_dir, "build.yaml", INSTRUCTIONS);

    let file = manager.load_instruction_file(&path).unwrap();
    assert_eq!(file.components.len(), 2);

    let uco = &file.components[0];
    assert_eq!(
        uco.id,
        Uuid::parse_str("6b8c1e8a-3f0e-4c44-9e55-0e5c4b1f2a10").unwrap()
    );
    assert!(uco.is_selected);
    assert_eq!(uco.category, vec!["Graphics Improvement".to_string()]);
    assert_eq!(uco.mod_links.len(), 1);

    // The unparseable dependency is set aside verbatim, the valid one kept
    assert_eq!(uco.dependencies.len(), 1);
    assert!(uco.dependencies.contains(&file.components[1].id));
    assert_eq!(uco.dependencies.malformed(), ["not a guid".to_string()]);

    let malformed: Vec<String> = all_issues(&file.components)
        .into_iter()
        .filter(|issue| issue.kind == IssueKind::MalformedReference)
        .map(|issue| issue.message)
        .collect();
    assert_eq!(malformed.len(), 1);
    assert!(malformed[0].contains("not a guid"));

    assert_eq!(uco.instructions[0].action, ActionKind::Extract);
    assert_eq!(
        uco.instructions[0].id,
        Uuid::parse_str("0b1c2d3e-4f5a-4b6c-8d7e-9f0a1b2c3d4e").unwrap()
    );
    assert!(!uco.instructions[1].overwrite);
    assert!(uco.instructions[0].overwrite);
    assert_eq!(uco.options[0].instructions[0].action, ActionKind::Patcher);

    let flags = &uco.download_filenames["https://deadlystream.com/files/file/1"];
    assert_eq!(flags["UCO.zip"], DownloadFlag::Download);
    assert_eq!(flags["UCO-readme.txt"], DownloadFlag::Skip);
    assert_eq!(flags["UCO-extras.zip"], DownloadFlag::AutoDetect);
}

#[test]
fn test_instruction_file_save_then_load_keeps_graph() {
    let (manager, temp_dir) = manager();
    let source = write(&temp_dir, "build.yaml", INSTRUCTIONS);
    let original = manager.load_instruction_file(&source).unwrap();

    let target = Utf8PathBuf::try_from(temp_dir.path().join("saved.yaml")).unwrap();
    manager.save_instruction_file(&target, &original).unwrap();
    let reloaded: InstructionFile = manager.load_instruction_file(&target).unwrap();

    assert_eq!(reloaded, original);
    assert!(std::fs::read_to_string(&target).unwrap().contains("not a guid"));
    assert_eq!(reloaded.components[0].dependencies.malformed(), ["not a guid".to_string()]);
}

#[test]
fn test_unknown_action_is_rejected() {
    let (manager, temp_dir) = manager();
    let path = write(
        &temp_dir,
        "bad.yaml",
        "components:\n  - Name: Broken\n    Instructions:\n      - Action: Teleport\n",
    );

    let error = manager.load_instruction_file(&path).unwrap_err();
    assert!(format!("{:#}", error).contains("Failed to parse instruction file"));
}
