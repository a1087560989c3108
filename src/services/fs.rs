//! Filesystem provider abstraction.
//!
//! The simulator and archive introspector only ever look at the disk through
//! [`FileSystemProvider`], so the same logic runs against the real install roots
//! ([`RealFileSystem`]) or an in-memory fixture ([`MemoryFileSystem`]).

use crate::services::paths::{is_descendant, normalize_path, path_key};
use camino::Utf8Path;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Cursor, Read, Seek};
use std::sync::RwLock;

/// Readable, seekable handle returned by [`FileSystemProvider::open`]
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Read-only view of a filesystem
pub trait FileSystemProvider: Send + Sync {
    /// Whether a file or directory exists at `path`
    fn exists(&self, path: &str) -> bool;

    fn is_dir(&self, path: &str) -> bool;

    /// Every file and directory beneath `directory`, recursively, as normalized paths
    fn list_recursive(&self, directory: &str) -> io::Result<Vec<String>>;

    fn open(&self, path: &str) -> io::Result<Box<dyn ReadSeek>>;

    fn read_to_string(&self, path: &str) -> io::Result<String> {
        let mut contents = String::new();
        self.open(path)?.read_to_string(&mut contents)?;
        Ok(contents)
    }
}

/// The real disk
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFileSystem;

impl FileSystemProvider for RealFileSystem {
    fn exists(&self, path: &str) -> bool {
        Utf8Path::new(path).exists()
    }

    fn is_dir(&self, path: &str) -> bool {
        Utf8Path::new(path).is_dir()
    }

    fn list_recursive(&self, directory: &str) -> io::Result<Vec<String>> {
        let mut found = Vec::new();
        let mut pending = vec![Utf8Path::new(directory).to_path_buf()];

        while let Some(current) = pending.pop() {
            for entry in fs::read_dir(&current)? {
                let entry = entry?;
                let Ok(path) = camino::Utf8PathBuf::try_from(entry.path()) else {
                    tracing::debug!("Skipping non UTF-8 path under {}", current);
                    continue;
                };

                if entry.file_type()?.is_dir() {
                    pending.push(path.clone());
                }
                found.push(normalize_path(path.as_str()));
            }
        }

        Ok(found)
    }

    fn open(&self, path: &str) -> io::Result<Box<dyn ReadSeek>> {
        Ok(Box::new(fs::File::open(path)?))
    }
}

/// In-memory filesystem for tests and previews.
///
/// Lookups are case-insensitive. Directories are implied by the files beneath them.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    /// path key -> (display path, contents)
    files: RwLock<BTreeMap<String, (String, Vec<u8>)>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: &str, contents: impl Into<Vec<u8>>) {
        let display = normalize_path(path);
        self.write_files()
            .insert(path_key(path), (display, contents.into()));
    }

    /// Remove a file, or everything beneath a directory. Returns how many files went away.
    pub fn remove(&self, path: &str) -> usize {
        let key = path_key(path);
        let mut files = self.write_files();
        let before = files.len();
        files.retain(|existing, _| existing != &key && !is_descendant(existing, &key));
        before - files.len()
    }

    pub fn len(&self) -> usize {
        self.read_files().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_files().is_empty()
    }

    fn read_files(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, (String, Vec<u8>)>> {
        self.files.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_files(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, (String, Vec<u8>)>> {
        self.files.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FileSystemProvider for MemoryFileSystem {
    fn exists(&self, path: &str) -> bool {
        let key = path_key(path);
        let files = self.read_files();
        files.contains_key(&key) || files.keys().any(|existing| is_descendant(existing, &key))
    }

    fn is_dir(&self, path: &str) -> bool {
        let key = path_key(path);
        self.read_files()
            .keys()
            .any(|existing| is_descendant(existing, &key))
    }

    fn list_recursive(&self, directory: &str) -> io::Result<Vec<String>> {
        let key = path_key(directory);
        let files = self.read_files();
        let mut found = Vec::new();
        let mut seen_dirs = std::collections::HashSet::new();

        for (existing, (display, _)) in files.iter() {
            if !is_descendant(existing, &key) {
                continue;
            }

            // Emit the implied directories between the listing root and the file.
            let mut dir = String::new();
            let segments: Vec<&str> = display.split('/').collect();
            for (position, segment) in segments[..segments.len().saturating_sub(1)].iter().enumerate() {
                if position > 0 {
                    dir.push('/');
                }
                dir.push_str(segment);
                let dir_key = dir.to_lowercase();
                if is_descendant(&dir_key, &key) && seen_dirs.insert(dir_key) {
                    found.push(dir.clone());
                }
            }
            found.push(display.clone());
        }

        if found.is_empty() && !files.contains_key(&key) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", directory),
            ));
        }

        Ok(found)
    }

    fn open(&self, path: &str) -> io::Result<Box<dyn ReadSeek>> {
        let files = self.read_files();
        match files.get(&path_key(path)) {
            Some((_, contents)) => Ok(Box::new(Cursor::new(contents.clone()))),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", path),
            )),
        }
    }
}
