//! Services module - the dry-run install engine.
//!
//! Everything here works on an in-memory component graph and a read-only view of the disk.
//! Nothing is extracted, copied or deleted for real.
//!
//! # Components
//!
//! - [`PathResolver`](paths::PathResolver): Expands `<<modDirectory>>` and `<<kotorDirectory>>`
//!   and normalizes paths for case-insensitive comparison
//! - [`FileSystemProvider`](fs::FileSystemProvider): The read-only disk seam, with a real and
//!   an in-memory implementation
//! - [`ArchiveIntrospector`](archive::ArchiveIntrospector): Lists `.zip`/`.7z` contents and
//!   reads `namespaces.ini` option manifests without extracting
//! - [`Simulator`](simulator::Simulator): Replays an instruction list once into a
//!   [`VirtualFileSystem`](simulator::VirtualFileSystem) timeline
//! - [`DryRunValidator`](validation::DryRunValidator): Turns predicted path state into
//!   [`ValidationResult`](validation::ValidationResult)s
//! - [`dependencies`]: Dependency/restriction edits and working-set consistency checks
//! - [`DownloadPlanner`](downloads::DownloadPlanner): Which files still need fetching
//! - [`RootWatcher`](watcher::RootWatcher): Evicts cached results when the roots change
//!
//! # Design Philosophy
//!
//! - **Three-valued**: a path is present, absent or unknown; unknown is never folded into
//!   either of the others
//! - **Results, not errors**: missing files and bad references are verdicts; `Err` is kept
//!   for cancellation and unreadable archives
//! - **Blocking core**: replay and introspection are synchronous and run on tokio's blocking
//!   pool when called from [`ValidationCache`](crate::cache::ValidationCache)

pub mod archive;
pub mod cancel;
pub mod dependencies;
pub mod downloads;
pub mod fs;
pub mod paths;
pub mod simulator;
pub mod validation;
pub mod watcher;

#[cfg(test)]
pub(crate) mod fixtures;

pub use archive::{ArchiveError, ArchiveIntrospector, OptionDescriptor};
pub use cancel::{CancelSource, CancelToken};
pub use dependencies::{DependencyError, IssueKind, SelectionIssue};
pub use downloads::{DownloadPlanner, DownloadResolver, PlannedDownload};
pub use fs::{FileSystemProvider, MemoryFileSystem, RealFileSystem};
pub use paths::{PathResolver, ResolvedPath};
pub use simulator::{Listing, PathState, SimulationError, Simulator, UnknownReason, VirtualFileSystem};
pub use validation::{DryRunValidator, ValidationResult, ValidationStatus};
pub use watcher::RootWatcher;
