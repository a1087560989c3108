//! ModSync - dry-run validation for KOTOR mod install instructions
//!
//! Command-line entry point.
//!
//! # Usage
//!
//! ```text
//! modsync <instruction-file> [config-dir]
//! ```
//!
//! `config-dir` defaults to `ModSync Data/` and holds `ModSync Config.yaml`. Settings can be
//! overridden with `MODSYNC_SETTINGS__<FIELD>` environment variables.
//!
//! # Execution Flow
//!
//! 1. Load the effective user config (file plus environment overrides)
//! 2. Initialize logging → `<log_directory>/modsync.<date>`
//! 3. Create the tokio runtime
//! 4. Load the instruction file into a [`StateManager`]
//! 5. Create the [`ValidationCache`] and subscribe it to state changes
//! 6. Optionally watch both install roots for changes
//! 7. Print selection issues and every source path of a selected component that will not
//!    exist when its instruction runs
//! 8. Log metrics, exit with 1 if anything blocks the install

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use modsync::metrics::Metrics;
use modsync::services::{RealFileSystem, RootWatcher, ValidationResult, ValidationStatus};
use modsync::{APP_NAME, ConfigManager, StateManager, VERSION, ValidationCache};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use uuid::Uuid;

const DEFAULT_CONFIG_DIR: &str = "ModSync Data";

/// One line of the validation report
struct Finding {
    component: String,
    action: String,
    path: String,
    result: ValidationResult,
}

impl Finding {
    /// One report line; the instruction pointer may be a producer, a remover or an opaque step
    fn describe(&self) -> String {
        let mut line = format!(
            "  [{}] {} / {} {}: {}",
            self.result.status, self.component, self.action, self.path, self.result.message
        );
        if let Some(index) = self.result.blocking_instruction_index {
            line.push_str(&format!(" (see instruction #{})", index + 1));
        }
        if self.result.needs_download_link {
            line.push_str(" (needs a download link)");
        }
        line
    }
}

fn main() -> Result<ExitCode> {
    let mut args = std::env::args().skip(1);
    let Some(instruction_path) = args.next().map(Utf8PathBuf::from) else {
        eprintln!("usage: {} <instruction-file> [config-dir]", APP_NAME);
        return Ok(ExitCode::from(2));
    };
    let config_dir = args.next().unwrap_or_else(|| DEFAULT_CONFIG_DIR.to_string());

    let config_manager = ConfigManager::new(&config_dir)?;
    let user_config = config_manager.load_effective_config()?;
    let settings = &user_config.settings;

    let _log_guard = modsync::logging::setup_logging_with_console(
        &settings.log_directory,
        APP_NAME,
        settings.debug_mode,
        true,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("modsync-worker")
        .build()
        .context("Failed to build tokio runtime")?;

    let instruction_file = config_manager.load_instruction_file(&instruction_path)?;

    let state_manager = StateManager::new();
    state_manager.load_from_user_config(&user_config);
    state_manager.load_components(instruction_file.components);

    let metrics = Arc::new(Metrics::new());
    let cache = Arc::new(ValidationCache::new(
        state_manager.resolver(),
        Arc::new(RealFileSystem),
        Arc::clone(&metrics),
    ));

    let state_listener = runtime.block_on(async { cache.watch_state(state_manager.subscribe()) });

    let watcher = if settings.watch_filesystem {
        let roots: Vec<Utf8PathBuf> = [settings.mod_directory(), settings.kotor_directory()]
            .into_iter()
            .flatten()
            .map(Utf8PathBuf::from)
            .collect();
        match RootWatcher::start(
            &roots,
            Duration::from_millis(settings.watch_debounce_ms),
            Arc::clone(&cache),
        ) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!("Filesystem watching disabled: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    let mut blocked = false;

    let issues = state_manager.selection_issues();
    if !issues.is_empty() {
        println!("Selection issues:");
    }
    for issue in &issues {
        let severity = if issue.kind.is_warning() { "warning" } else { "error" };
        blocked |= !issue.kind.is_warning();
        println!("  [{}] {}: {}", severity, issue.component_name, issue.message);
    }

    let findings = runtime.block_on(validate_selected(&state_manager, &cache));
    if !findings.is_empty() {
        println!("Validation:");
    }
    for finding in &findings {
        blocked |= finding.result.status.is_blocking();
        println!("{}", finding.describe());
    }

    if issues.is_empty() && findings.is_empty() {
        println!("No problems found.");
    }

    metrics.log_summary();

    state_listener.abort();
    drop(watcher);
    runtime.shutdown_timeout(Duration::from_secs(5));

    tracing::info!("Shutdown complete");

    Ok(if blocked { ExitCode::from(1) } else { ExitCode::SUCCESS })
}

/// Validate every source path of every selected component concurrently.
///
/// # Returns
/// Findings for paths whose verdict is anything but `WillExist`, in install order
async fn validate_selected(state_manager: &StateManager, cache: &Arc<ValidationCache>) -> Vec<Finding> {
    let working_set = state_manager.snapshot();
    let mut tasks = JoinSet::new();
    let mut order = 0usize;

    for component in working_set.selected() {
        let component = Arc::new(component.clone());
        for placed in component.flattened_instructions(None) {
            let instruction_id: Uuid = placed.instruction.id;
            let action = placed.instruction.action.to_string();
            for path in placed.instruction.source_paths() {
                let cache = Arc::clone(cache);
                let component = Arc::clone(&component);
                let path = path.clone();
                let action = action.clone();
                let position = order;
                order += 1;
                tasks.spawn(async move {
                    let result = cache.validate_and_cache(&path, instruction_id, &component).await;
                    (
                        position,
                        Finding {
                            component: component.name.clone(),
                            action,
                            path,
                            result,
                        },
                    )
                });
            }
        }
    }

    let mut findings = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((position, finding)) if finding.result.status != ValidationStatus::WillExist => {
                findings.push((position, finding));
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Validation task failed: {}", e),
        }
    }

    findings.sort_by_key(|(position, _)| *position);
    findings.into_iter().map(|(_, finding)| finding).collect()
}
