//! Shared fixtures for integration tests

#![allow(dead_code)]

use modsync::metrics::Metrics;
use modsync::services::{ArchiveIntrospector, DryRunValidator, MemoryFileSystem, PathResolver};
use std::io::{Cursor, Write};
use std::sync::Arc;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

pub const MOD_DIR: &str = "/mods";
pub const GAME_DIR: &str = "/games/kotor";

/// Build an in-memory zip holding the given `(entry name, contents)` pairs
pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    for (name, contents) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }

    writer.finish().unwrap().into_inner()
}

pub fn resolver() -> PathResolver {
    PathResolver::new(Some(MOD_DIR), Some(GAME_DIR))
}

/// A validator over an in-memory disk with both roots configured
pub fn validator(fs: Arc<MemoryFileSystem>) -> (DryRunValidator, Arc<Metrics>) {
    let metrics = Arc::new(Metrics::new());
    let introspector = Arc::new(ArchiveIntrospector::new(fs, Arc::clone(&metrics)));
    let validator = DryRunValidator::new(resolver(), introspector, Arc::clone(&metrics));
    (validator, metrics)
}
