//! Archive introspection without extraction.
//!
//! The dry run needs to know what an `Extract` step will put on disk and which install
//! options a TSLPatcher-style mod offers, without unpacking anything. [`ArchiveIntrospector`]
//! lists entry names and reads the `namespaces.ini` manifest straight out of `.zip` and `.7z`
//! archives through a [`FileSystemProvider`].
//!
//! Results are cached per archive path for the session. The cache is read-through and
//! last-writer-wins: two threads listing the same archive at once both do the work and the
//! second insert simply replaces the first with an identical value. Filesystem events call
//! [`ArchiveIntrospector::invalidate`] when an archive is added, removed or renamed.

use crate::metrics::Metrics;
use crate::services::cancel::CancelToken;
use crate::services::fs::{FileSystemProvider, ReadSeek};
use crate::services::paths::{WildcardPattern, file_name, is_descendant, normalize_path, path_key};
use dashmap::DashMap;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use thiserror::Error;

/// File name of the TSLPatcher namespace manifest
pub const NAMESPACE_MANIFEST: &str = "namespaces.ini";

/// Extensions treated as downloadable mod archives
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "7z", "rar", "exe"];

/// Errors that can occur while introspecting an archive
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("Archive not found: {0}")]
    NotFound(String),

    #[error("Cannot read archive format of {0}")]
    UnsupportedFormat(String),

    #[error("Archive {path} is unreadable: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Archive enumeration cancelled")]
    Cancelled,

    #[error("Invalid wildcard pattern '{0}'")]
    InvalidPattern(String),
}

/// Archive container formats that can be listed in place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    SevenZip,
}

impl ArchiveFormat {
    pub fn from_path(path: &str) -> Option<Self> {
        match extension(path).as_deref() {
            Some("zip") => Some(ArchiveFormat::Zip),
            Some("7z") => Some(ArchiveFormat::SevenZip),
            _ => None,
        }
    }
}

fn extension(path: &str) -> Option<String> {
    let name = file_name(path);
    name.rsplit_once('.')
        .filter(|(stem, _)| !stem.is_empty())
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

/// Whether a path names a mod archive (by extension)
pub fn is_archive_path(path: &str) -> bool {
    extension(path).is_some_and(|ext| ARCHIVE_EXTENSIONS.contains(&ext.as_str()))
}

/// One installable option declared by a namespace manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionDescriptor {
    /// INI section name, what a `Patcher` instruction's arguments refer to
    pub section_id: String,
    pub display_name: String,
    pub description: Option<String>,
}

/// Lists and reads archive contents through a filesystem provider, with a session cache
pub struct ArchiveIntrospector {
    provider: Arc<dyn FileSystemProvider>,
    metrics: Arc<Metrics>,
    listings: DashMap<String, Arc<Vec<String>>>,
    options: DashMap<String, Arc<Vec<OptionDescriptor>>>,
}

impl ArchiveIntrospector {
    pub fn new(provider: Arc<dyn FileSystemProvider>, metrics: Arc<Metrics>) -> Self {
        Self {
            provider,
            metrics,
            listings: DashMap::new(),
            options: DashMap::new(),
        }
    }

    pub fn provider(&self) -> &Arc<dyn FileSystemProvider> {
        &self.provider
    }

    /// Every entry name inside the archive, normalized, directories without trailing `/`.
    pub fn entries(&self, archive: &str, cancel: &CancelToken) -> Result<Arc<Vec<String>>, ArchiveError> {
        let key = path_key(archive);
        if let Some(cached) = self.listings.get(&key) {
            return Ok(Arc::clone(cached.value()));
        }

        let format = self.format_of(archive)?;
        let reader = self.open(archive)?;

        let listed = match format {
            ArchiveFormat::Zip => list_zip(archive, reader, cancel),
            ArchiveFormat::SevenZip => list_7z(archive, reader, cancel),
        };

        match listed {
            Ok(names) => {
                self.metrics.record_archive_read();
                tracing::debug!("Listed {} entries in {}", names.len(), archive);
                let names = Arc::new(names);
                self.listings.insert(key, Arc::clone(&names));
                Ok(names)
            }
            Err(e) => {
                if matches!(e, ArchiveError::Corrupt { .. }) {
                    self.metrics.record_introspection_failure();
                    tracing::warn!("{}", e);
                }
                Err(e)
            }
        }
    }

    /// Entries matching any of the wildcard patterns (`*` and `?`, case-insensitive).
    pub fn find_matching(
        &self,
        archive: &str,
        patterns: &[&str],
        cancel: &CancelToken,
    ) -> Result<Vec<String>, ArchiveError> {
        let compiled = patterns
            .iter()
            .map(|p| WildcardPattern::new(p).map_err(|_| ArchiveError::InvalidPattern(p.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        let entries = self.entries(archive, cancel)?;
        Ok(entries
            .iter()
            .filter(|entry| compiled.iter().any(|pattern| pattern.matches(entry)))
            .cloned()
            .collect())
    }

    /// Install options declared in the archive's `namespaces.ini`.
    ///
    /// An archive without a manifest has no options, which is not an error.
    pub fn read_option_metadata(
        &self,
        archive: &str,
        cancel: &CancelToken,
    ) -> Result<Arc<Vec<OptionDescriptor>>, ArchiveError> {
        let key = path_key(archive);
        if let Some(cached) = self.options.get(&key) {
            return Ok(Arc::clone(cached.value()));
        }

        let entries = self.entries(archive, cancel)?;
        let manifest = entries
            .iter()
            .filter(|entry| file_name(entry).eq_ignore_ascii_case(NAMESPACE_MANIFEST))
            .min_by_key(|entry| entry.matches('/').count())
            .cloned();

        let descriptors = match manifest {
            None => Vec::new(),
            Some(entry) => {
                let format = self.format_of(archive)?;
                let reader = self.open(archive)?;
                let text = match format {
                    ArchiveFormat::Zip => read_zip_entry(archive, reader, &entry)?,
                    ArchiveFormat::SevenZip => read_7z_entry(archive, reader, &entry)?,
                };
                parse_namespaces(&text)
            }
        };

        let descriptors = Arc::new(descriptors);
        self.options.insert(key, Arc::clone(&descriptors));
        Ok(descriptors)
    }

    /// Forget everything cached for `path`, or for archives beneath it when it is a directory
    pub fn invalidate(&self, path: &str) {
        let key = path_key(path);
        let related = |cached: &String| cached == &key || is_descendant(cached, &key);

        self.listings.retain(|cached, _| !related(cached));
        self.options.retain(|cached, _| !related(cached));
    }

    pub fn clear(&self) {
        self.listings.clear();
        self.options.clear();
    }

    pub fn cached_archive_count(&self) -> usize {
        self.listings.len()
    }

    fn format_of(&self, archive: &str) -> Result<ArchiveFormat, ArchiveError> {
        ArchiveFormat::from_path(archive)
            .ok_or_else(|| ArchiveError::UnsupportedFormat(archive.to_string()))
    }

    fn open(&self, archive: &str) -> Result<Box<dyn ReadSeek>, ArchiveError> {
        self.provider.open(archive).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ArchiveError::NotFound(archive.to_string())
            } else {
                corrupt(archive, e)
            }
        })
    }
}

fn corrupt(path: &str, reason: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::Corrupt {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn list_zip(path: &str, reader: Box<dyn ReadSeek>, cancel: &CancelToken) -> Result<Vec<String>, ArchiveError> {
    let archive = zip::ZipArchive::new(reader).map_err(|e| corrupt(path, e))?;
    let mut names = Vec::with_capacity(archive.len());

    for name in archive.file_names() {
        if cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }
        let normalized = normalize_path(name);
        if !normalized.is_empty() {
            names.push(normalized);
        }
    }

    Ok(names)
}

fn list_7z(path: &str, mut reader: Box<dyn ReadSeek>, cancel: &CancelToken) -> Result<Vec<String>, ArchiveError> {
    let len = reader.seek(SeekFrom::End(0)).map_err(|e| corrupt(path, e))?;
    reader.seek(SeekFrom::Start(0)).map_err(|e| corrupt(path, e))?;

    let archive = sevenz_rust::SevenZReader::new(reader, len, sevenz_rust::Password::empty())
        .map_err(|e| corrupt(path, e))?;

    let mut names = Vec::with_capacity(archive.archive().files.len());
    for entry in &archive.archive().files {
        if cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }
        let normalized = normalize_path(entry.name());
        if !normalized.is_empty() {
            names.push(normalized);
        }
    }

    Ok(names)
}

fn read_zip_entry(path: &str, reader: Box<dyn ReadSeek>, entry: &str) -> Result<String, ArchiveError> {
    let mut archive = zip::ZipArchive::new(reader).map_err(|e| corrupt(path, e))?;

    let Some(raw_name) = archive
        .file_names()
        .find(|name| normalize_path(name).eq_ignore_ascii_case(entry))
        .map(str::to_string)
    else {
        return Err(corrupt(path, format!("entry {} disappeared", entry)));
    };

    let mut file = archive.by_name(&raw_name).map_err(|e| corrupt(path, e))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(|e| corrupt(path, e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn read_7z_entry(path: &str, mut reader: Box<dyn ReadSeek>, entry: &str) -> Result<String, ArchiveError> {
    let len = reader.seek(SeekFrom::End(0)).map_err(|e| corrupt(path, e))?;
    reader.seek(SeekFrom::Start(0)).map_err(|e| corrupt(path, e))?;

    let mut archive = sevenz_rust::SevenZReader::new(reader, len, sevenz_rust::Password::empty())
        .map_err(|e| corrupt(path, e))?;

    let mut contents: Option<Vec<u8>> = None;
    let mut failure: Option<String> = None;

    archive
        .for_each_entries(|archive_entry, entry_reader| {
            if !normalize_path(archive_entry.name()).eq_ignore_ascii_case(entry) {
                return Ok(true);
            }
            let mut bytes = Vec::new();
            match entry_reader.read_to_end(&mut bytes) {
                Ok(_) => contents = Some(bytes),
                Err(e) => failure = Some(e.to_string()),
            }
            Ok(false)
        })
        .map_err(|e| corrupt(path, e))?;

    if let Some(reason) = failure {
        return Err(corrupt(path, reason));
    }

    contents
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .ok_or_else(|| corrupt(path, format!("entry {} disappeared", entry)))
}

/// Parse an INI-style namespace manifest.
///
/// Every section carrying a non-empty `Name` key becomes an option, in file order. Sections
/// without one (such as TSLPatcher's `[Namespaces]` index) are ignored.
pub fn parse_namespaces(text: &str) -> Vec<OptionDescriptor> {
    let mut descriptors = Vec::new();
    let mut section: Option<String> = None;
    let mut name: Option<String> = None;
    let mut description: Option<String> = None;

    let mut flush = |section: &mut Option<String>, name: &mut Option<String>, description: &mut Option<String>| {
        if let (Some(id), Some(display)) = (section.take(), name.take()) {
            descriptors.push(OptionDescriptor {
                section_id: id,
                display_name: display,
                description: description.take(),
            });
        }
        *description = None;
    };

    for raw_line in text.trim_start_matches('\u{feff}').lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            flush(&mut section, &mut name, &mut description);
            section = Some(header.trim().to_string());
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if section.is_none() {
            continue;
        }

        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "name" if !value.is_empty() => name = Some(value.to_string()),
            "description" if !value.is_empty() => description = Some(value.to_string()),
            _ => {}
        }
    }
    flush(&mut section, &mut name, &mut description);

    descriptors
}
