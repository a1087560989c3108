//! Dry-run path validation.
//!
//! Answers "will this path be there when instruction N runs" by replaying the component once
//! and reading the predicted state. Missing files are ordinary results, not errors: the
//! validator always returns a [`ValidationResult`], with a pointer to the instruction that
//! blocks the path or produces it too late wherever one exists.

use crate::metrics::Metrics;
use crate::models::{ActionKind, ChoiceReference, Component, PlacedInstruction};
use crate::services::archive::{ArchiveError, ArchiveFormat, ArchiveIntrospector, OptionDescriptor, is_archive_path};
use crate::services::cancel::CancelToken;
use crate::services::paths::{PathResolver, WildcardPattern, file_name, is_wildcard, normalize_path};
use crate::services::simulator::{PathState, SimulationError, Simulator, UnknownReason, VirtualFileSystem};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Verdict for one path at one point of the install
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationStatus {
    /// The path exists on disk or is produced earlier in the install
    WillExist,
    /// An earlier instruction removes the path
    WillBeAbsent,
    /// Nothing produces the path yet and nothing says it is missing
    Pending,
    /// A placeholder root is not configured
    ConfigurationIncomplete,
    /// The path is only produced too late, or is a download that is not present
    MissingArtifact,
    /// Depends on an archive or list that could not be read, or the check was interrupted
    Undetermined,
    /// A `Choose` or patcher reference names nothing
    MalformedReference,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::WillExist => "will exist",
            ValidationStatus::WillBeAbsent => "will be absent",
            ValidationStatus::Pending => "pending",
            ValidationStatus::ConfigurationIncomplete => "configuration incomplete",
            ValidationStatus::MissingArtifact => "missing artifact",
            ValidationStatus::Undetermined => "undetermined",
            ValidationStatus::MalformedReference => "malformed reference",
        }
    }

    /// Whether an install would fail on this path as things stand
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            ValidationStatus::WillBeAbsent
                | ValidationStatus::ConfigurationIncomplete
                | ValidationStatus::MissingArtifact
                | ValidationStatus::MalformedReference
        )
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub status: ValidationStatus,
    pub message: String,
    /// Flattened index of the instruction that removes, hides or produces the path too late
    pub blocking_instruction_index: Option<usize>,
    /// The path is a download and the component has a link to fetch it from
    pub needs_download_link: bool,
}

impl ValidationResult {
    pub fn new(status: ValidationStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            blocking_instruction_index: None,
            needs_download_link: false,
        }
    }

    pub fn with_blocking_instruction(mut self, index: usize) -> Self {
        self.blocking_instruction_index = Some(index);
        self
    }

    pub fn with_download_link(mut self, needs_link: bool) -> Self {
        self.needs_download_link = needs_link;
        self
    }

    pub fn cancelled() -> Self {
        Self::new(ValidationStatus::Undetermined, "validation cancelled")
    }
}

/// Validates instruction paths against a dry-run replay
pub struct DryRunValidator {
    simulator: Simulator,
    metrics: Arc<Metrics>,
}

impl DryRunValidator {
    pub fn new(resolver: PathResolver, introspector: Arc<ArchiveIntrospector>, metrics: Arc<Metrics>) -> Self {
        Self {
            simulator: Simulator::new(resolver, introspector, Arc::clone(&metrics)),
            metrics,
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        self.simulator.resolver()
    }

    pub fn introspector(&self) -> &Arc<ArchiveIntrospector> {
        self.simulator.introspector()
    }

    /// The verdict available without a replay: only an unconfigured placeholder is decided
    pub fn placeholder_check(&self, path: &str) -> Option<ValidationResult> {
        let resolved = self.resolver().resolve(path);
        (!resolved.complete).then(|| {
            ValidationResult::new(
                ValidationStatus::ConfigurationIncomplete,
                format!("{} uses a directory that is not configured", path),
            )
        })
    }

    /// Validate `path` as of just before the instruction `instruction_id` runs.
    ///
    /// An instruction inside an unselected option is validated as if that option were
    /// selected. An unknown instruction id validates at the end of the list.
    pub fn validate(
        &self,
        path: &str,
        instruction_id: Uuid,
        component: &Component,
        cancel: &CancelToken,
    ) -> ValidationResult {
        if let Some(incomplete) = self.placeholder_check(path) {
            return incomplete;
        }

        let owner = component.option_containing(instruction_id).map(|o| o.id);
        let flattened = component.flattened_instructions(owner);
        let index = match flattened.iter().position(|p| p.instruction.id == instruction_id) {
            Some(index) => index,
            None => {
                tracing::debug!(
                    "Instruction {} not in '{}', validating at end of list",
                    instruction_id,
                    component.name
                );
                flattened.len()
            }
        };

        self.run(path, index, &flattened, component, cancel)
    }

    /// Validate `path` as of just before flattened position `index`
    pub fn validate_at(&self, path: &str, index: usize, component: &Component, cancel: &CancelToken) -> ValidationResult {
        if let Some(incomplete) = self.placeholder_check(path) {
            return incomplete;
        }

        let flattened = component.flattened_instructions(None);
        self.run(path, index, &flattened, component, cancel)
    }

    /// Validate every source of one instruction against a single replay.
    ///
    /// # Returns
    /// `(source as written, verdict)` pairs. `Choose` sources are checked as option
    /// references; a patcher's option argument is checked against the archive manifests.
    pub fn validate_instruction(
        &self,
        instruction_id: Uuid,
        component: &Component,
        cancel: &CancelToken,
    ) -> Vec<(String, ValidationResult)> {
        let owner = component.option_containing(instruction_id).map(|o| o.id);
        let flattened = component.flattened_instructions(owner);
        let Some(index) = flattened.iter().position(|p| p.instruction.id == instruction_id) else {
            tracing::warn!("Instruction {} not found in '{}'", instruction_id, component.name);
            return Vec::new();
        };
        let instruction = flattened[index].instruction;

        if instruction.action == ActionKind::Choose {
            return instruction
                .choice_references()
                .into_iter()
                .zip(instruction.source.iter())
                .map(|(reference, raw)| (raw.clone(), check_choice(&reference, component)))
                .collect();
        }

        let started = Instant::now();
        let vfs = match self.simulator.replay(&flattened, cancel) {
            Ok(vfs) => vfs,
            Err(SimulationError::Cancelled) => {
                return instruction
                    .source_paths()
                    .iter()
                    .map(|raw| (raw.clone(), ValidationResult::cancelled()))
                    .collect();
            }
        };

        let mut results: Vec<(String, ValidationResult)> = instruction
            .source_paths()
            .iter()
            .map(|raw| {
                let verdict = match self.placeholder_check(raw) {
                    Some(incomplete) => incomplete,
                    None => self.interpret(&vfs, raw, index, component),
                };
                (raw.clone(), verdict)
            })
            .collect();
        self.metrics.record_validation(started.elapsed());

        if instruction.action == ActionKind::Patcher && !instruction.arguments.trim().is_empty() {
            if let Some(verdict) = self.check_patcher_argument(instruction_id, component, cancel) {
                results.push((instruction.arguments.clone(), verdict));
            }
        }

        results
    }

    /// Install options offered to a `Patcher` instruction.
    ///
    /// Gathers the namespace manifests of every archive extracted earlier in the install
    /// order, plus any archive the patcher names directly. Archives that cannot be read are
    /// logged and skipped.
    pub fn patcher_options(
        &self,
        instruction_id: Uuid,
        component: &Component,
        cancel: &CancelToken,
    ) -> Result<Vec<OptionDescriptor>, ArchiveError> {
        let owner = component.option_containing(instruction_id).map(|o| o.id);
        let flattened = component.flattened_instructions(owner);
        let Some(index) = flattened.iter().position(|p| p.instruction.id == instruction_id) else {
            return Ok(Vec::new());
        };
        let patcher = flattened[index].instruction;
        if patcher.action != ActionKind::Patcher {
            return Ok(Vec::new());
        }

        let mut archives: Vec<String> = Vec::new();
        for placed in flattened[..index].iter().filter(|p| p.instruction.action == ActionKind::Extract) {
            for raw in placed.instruction.source_paths() {
                archives.extend(self.archives_matching(raw));
            }
        }
        for raw in patcher.source_paths() {
            archives.extend(
                self.archives_matching(raw)
                    .into_iter()
                    .filter(|path| ArchiveFormat::from_path(path).is_some()),
            );
        }

        let mut options: Vec<OptionDescriptor> = Vec::new();
        for archive in archives {
            match self.introspector().read_option_metadata(&archive, cancel) {
                Ok(found) => {
                    for option in found.iter() {
                        if !options.iter().any(|o| o.section_id == option.section_id) {
                            options.push(option.clone());
                        }
                    }
                }
                Err(ArchiveError::Cancelled) => return Err(ArchiveError::Cancelled),
                Err(e) => tracing::warn!("Skipping options of {}: {}", archive, e),
            }
        }

        Ok(options)
    }

    fn run(
        &self,
        path: &str,
        index: usize,
        flattened: &[PlacedInstruction<'_>],
        component: &Component,
        cancel: &CancelToken,
    ) -> ValidationResult {
        let started = Instant::now();
        let vfs = match self.simulator.replay(flattened, cancel) {
            Ok(vfs) => vfs,
            Err(SimulationError::Cancelled) => return ValidationResult::cancelled(),
        };

        let result = self.interpret(&vfs, path, index, component);
        self.metrics.record_validation(started.elapsed());
        result
    }

    /// Map predicted state to a verdict
    fn interpret(&self, vfs: &VirtualFileSystem, raw: &str, index: usize, component: &Component) -> ValidationResult {
        let resolved = normalize_path(&self.resolver().resolve(raw).path);

        if is_wildcard(&resolved) {
            return self.interpret_wildcard(vfs, raw, &resolved, index);
        }

        match vfs.query(&resolved, index) {
            PathState::Exists { produced_by: None } => {
                ValidationResult::new(ValidationStatus::WillExist, format!("{} is already present", raw))
            }
            PathState::Exists {
                produced_by: Some(producer),
            } => ValidationResult::new(
                ValidationStatus::WillExist,
                format!("{} is created by instruction #{}", raw, producer + 1),
            ),
            PathState::Absent { removed_by } => ValidationResult::new(
                ValidationStatus::WillBeAbsent,
                format!("{} is removed by instruction #{}", raw, removed_by + 1),
            )
            .with_blocking_instruction(removed_by),
            PathState::Unknown {
                reason: UnknownReason::Indeterminate { instruction },
            } => ValidationResult::new(
                ValidationStatus::Undetermined,
                format!(
                    "{} depends on instruction #{} whose output cannot be predicted ({})",
                    raw,
                    instruction + 1,
                    vfs.opaque_reason(instruction).unwrap_or("unknown contents")
                ),
            )
            .with_blocking_instruction(instruction),
            PathState::Unknown {
                reason: UnknownReason::Pending,
            } => self.interpret_pending(vfs, raw, &resolved, index, component),
        }
    }

    fn interpret_pending(
        &self,
        vfs: &VirtualFileSystem,
        raw: &str,
        resolved: &str,
        index: usize,
        component: &Component,
    ) -> ValidationResult {
        if let Some(late) = vfs.first_production_at_or_after(resolved, index) {
            return ValidationResult::new(
                ValidationStatus::MissingArtifact,
                format!(
                    "{} is only created by instruction #{}, after it is needed",
                    raw,
                    late + 1
                ),
            )
            .with_blocking_instruction(late);
        }

        if self.resolver().is_mod_root_entry(resolved) {
            let name = file_name(resolved);
            let needs_link = is_archive_path(resolved) && component.link_for_file(name).is_some();
            return ValidationResult::new(
                ValidationStatus::MissingArtifact,
                format!("{} has not been downloaded to the mod directory", name),
            )
            .with_download_link(needs_link);
        }

        ValidationResult::new(
            ValidationStatus::Pending,
            format!("Nothing creates {} before it is needed", raw),
        )
    }

    fn interpret_wildcard(&self, vfs: &VirtualFileSystem, raw: &str, resolved: &str, index: usize) -> ValidationResult {
        let pattern = match WildcardPattern::new(resolved) {
            Ok(pattern) => pattern,
            Err(e) => {
                return ValidationResult::new(
                    ValidationStatus::MalformedReference,
                    format!("{} is not a usable wildcard: {}", raw, e),
                );
            }
        };

        let listing = vfs.list_under(&pattern.fixed_prefix(), index);
        let matched = listing
            .existing
            .iter()
            .filter(|candidate| pattern.matches(candidate))
            .count();
        if matched > 0 {
            return ValidationResult::new(
                ValidationStatus::WillExist,
                format!("{} matches {} path(s)", raw, matched),
            );
        }

        let hidden_by = listing
            .hidden
            .iter()
            .filter(|(candidate, _)| pattern.matches(candidate))
            .map(|(_, origin)| *origin)
            .max()
            .or(listing.opaque);
        if let Some(instruction) = hidden_by {
            return ValidationResult::new(
                ValidationStatus::Undetermined,
                format!(
                    "{} looks inside output of instruction #{} that cannot be predicted ({})",
                    raw,
                    instruction + 1,
                    vfs.opaque_reason(instruction).unwrap_or("unknown contents")
                ),
            )
            .with_blocking_instruction(instruction);
        }

        match vfs.first_production_matching(&pattern, index) {
            Some(late) => ValidationResult::new(
                ValidationStatus::MissingArtifact,
                format!("{} only matches files created by instruction #{}", raw, late + 1),
            )
            .with_blocking_instruction(late),
            None => ValidationResult::new(ValidationStatus::Pending, format!("{} matches nothing yet", raw)),
        }
    }

    /// Archive paths a source resolves to, wildcards expanded against the disk
    fn archives_matching(&self, raw: &str) -> Vec<String> {
        let resolved = self.resolver().resolve(raw);
        if !resolved.complete {
            return Vec::new();
        }
        let path = normalize_path(&resolved.path);
        if !is_wildcard(&path) {
            return vec![path];
        }

        let Ok(pattern) = WildcardPattern::new(&path) else {
            return Vec::new();
        };
        self.introspector()
            .provider()
            .list_recursive(&pattern.fixed_prefix())
            .unwrap_or_default()
            .into_iter()
            .filter(|candidate| pattern.matches(candidate) && ArchiveFormat::from_path(candidate).is_some())
            .collect()
    }

    fn check_patcher_argument(
        &self,
        instruction_id: Uuid,
        component: &Component,
        cancel: &CancelToken,
    ) -> Option<ValidationResult> {
        let instruction = component.find_instruction(instruction_id)?;
        let wanted = instruction.arguments.trim();

        match self.patcher_options(instruction_id, component, cancel) {
            Ok(options) if options.is_empty() => None,
            Ok(options) => {
                let known = options.iter().any(|o| {
                    o.section_id.eq_ignore_ascii_case(wanted) || o.display_name.eq_ignore_ascii_case(wanted)
                });
                Some(if known {
                    ValidationResult::new(ValidationStatus::WillExist, format!("Patcher option '{}' is available", wanted))
                } else {
                    ValidationResult::new(
                        ValidationStatus::MalformedReference,
                        format!("No namespace manifest offers patcher option '{}'", wanted),
                    )
                })
            }
            Err(ArchiveError::Cancelled) => Some(ValidationResult::cancelled()),
            Err(e) => Some(ValidationResult::new(ValidationStatus::Undetermined, e.to_string())),
        }
    }
}

fn check_choice(reference: &ChoiceReference, component: &Component) -> ValidationResult {
    match reference {
        ChoiceReference::Malformed(raw) => ValidationResult::new(
            ValidationStatus::MalformedReference,
            format!("'{}' is not an option identifier", raw),
        ),
        ChoiceReference::Id(id) => match component.find_option(*id) {
            Some(option) => {
                ValidationResult::new(ValidationStatus::WillExist, format!("Chooses option '{}'", option.name))
            }
            None => ValidationResult::new(
                ValidationStatus::MalformedReference,
                format!("{} is not an option of '{}'", id, component.name),
            ),
        },
    }
}
