//! Data models for the ModSync engine.
//!
//! This module contains the component graph that instruction files deserialize into:
//! - [`Component`]: A selectable mod with its ordered instructions, dependency and
//!   restriction id sets, options, download links and per-file download flags
//! - [`ModOption`]: A sub-selectable variant with its own instruction list
//! - [`Instruction`]: One install step ([`ActionKind`] plus sources, destination, arguments)
//! - [`UserConfig`]: Install roots and engine preferences loaded from `ModSync Config.yaml`
//! - [`InstructionFile`]: The on-disk document wrapping the component list
//! - [`WorkingSet`]: The loaded components plus the two install roots
//!
//! # Architecture Note
//!
//! The engine never owns persistence. Components are handed to it in memory, mutated through
//! [`StateManager`](crate::state::StateManager), and written back by the caller through
//! [`ConfigManager`](crate::config::ConfigManager).

pub mod component;
pub mod config;
pub mod guid;
pub mod instruction;
pub mod working_set;

pub use component::{Component, DownloadFlag, ModOption, PlacedInstruction};
pub use config::{InstructionFile, ModSyncSettings, UserConfig};
pub use guid::ReferenceSet;
pub use instruction::{ActionKind, ChoiceReference, Instruction};
pub use working_set::WorkingSet;
