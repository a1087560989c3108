//! Placeholder resolution and path normalization.
//!
//! Instruction paths are written against two placeholder roots, `<<modDirectory>>` (where
//! downloaded archives live) and `<<kotorDirectory>>` (the game install). [`PathResolver`]
//! substitutes them in a single left-to-right pass; it never re-scans its own output, so a
//! root whose text happens to contain a token cannot trigger a second expansion.
//!
//! Everything downstream (simulator, cache keys, watcher) compares paths through
//! [`path_key`], which normalizes separators and case the way the game's filesystem does.

use crate::models::ModSyncSettings;
use camino::Utf8PathBuf;
use regex::Regex;

pub const MOD_DIRECTORY_TOKEN: &str = "<<modDirectory>>";
pub const KOTOR_DIRECTORY_TOKEN: &str = "<<kotorDirectory>>";

/// Result of placeholder substitution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub path: String,
    /// False when a token was left in place because its root is unset
    pub complete: bool,
}

/// Expands `<<modDirectory>>` and `<<kotorDirectory>>` to the configured roots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathResolver {
    mod_directory: Option<Utf8PathBuf>,
    kotor_directory: Option<Utf8PathBuf>,
}

impl PathResolver {
    pub fn new(mod_directory: Option<&str>, kotor_directory: Option<&str>) -> Self {
        Self {
            mod_directory: mod_directory.and_then(clean_root),
            kotor_directory: kotor_directory.and_then(clean_root),
        }
    }

    pub fn from_settings(settings: &ModSyncSettings) -> Self {
        Self::new(settings.mod_directory(), settings.kotor_directory())
    }

    pub fn mod_directory(&self) -> Option<&Utf8PathBuf> {
        self.mod_directory.as_ref()
    }

    pub fn kotor_directory(&self) -> Option<&Utf8PathBuf> {
        self.kotor_directory.as_ref()
    }

    /// Substitute both placeholder tokens in one pass.
    ///
    /// Unset roots leave their token untouched and mark the result incomplete. Paths with no
    /// tokens come back unchanged.
    pub fn resolve(&self, path: &str) -> ResolvedPath {
        let mut output = String::with_capacity(path.len());
        let mut rest = path;
        let mut complete = true;

        while let Some(start) = rest.find("<<") {
            output.push_str(&rest[..start]);
            let tail = &rest[start..];

            if let Some(after) = tail.strip_prefix(MOD_DIRECTORY_TOKEN) {
                match &self.mod_directory {
                    Some(root) => output.push_str(root.as_str()),
                    None => {
                        output.push_str(MOD_DIRECTORY_TOKEN);
                        complete = false;
                    }
                }
                rest = after;
            } else if let Some(after) = tail.strip_prefix(KOTOR_DIRECTORY_TOKEN) {
                match &self.kotor_directory {
                    Some(root) => output.push_str(root.as_str()),
                    None => {
                        output.push_str(KOTOR_DIRECTORY_TOKEN);
                        complete = false;
                    }
                }
                rest = after;
            } else {
                output.push_str("<<");
                rest = &tail[2..];
            }
        }
        output.push_str(rest);

        ResolvedPath {
            path: output,
            complete,
        }
    }

    /// Replace a leading root with its placeholder token.
    ///
    /// The longer root is tried first so a game directory nested inside the mod directory
    /// (or the reverse) maps to the more specific token.
    pub fn unresolve(&self, path: &str) -> String {
        let normalized = normalize_path(path);
        let mut roots: Vec<(&Utf8PathBuf, &str)> = Vec::new();
        if let Some(root) = &self.mod_directory {
            roots.push((root, MOD_DIRECTORY_TOKEN));
        }
        if let Some(root) = &self.kotor_directory {
            roots.push((root, KOTOR_DIRECTORY_TOKEN));
        }
        roots.sort_by_key(|(root, _)| std::cmp::Reverse(root.as_str().len()));

        for (root, token) in roots {
            let root = normalize_path(root.as_str());
            if normalized.len() < root.len() || !normalized.is_char_boundary(root.len()) {
                continue;
            }
            let (head, tail) = normalized.split_at(root.len());
            if head.eq_ignore_ascii_case(&root) && (tail.is_empty() || tail.starts_with('/')) {
                return format!("{}{}", token, tail);
            }
        }

        normalized
    }

    /// Whether `path` (already resolved) sits directly under the mod directory
    pub fn is_mod_root_entry(&self, resolved: &str) -> bool {
        let Some(root) = &self.mod_directory else {
            return false;
        };
        parent_key(&path_key(resolved)) == Some(path_key(root.as_str()).as_str())
    }
}

fn clean_root(root: &str) -> Option<Utf8PathBuf> {
    let trimmed = root.trim();
    if trimmed.is_empty() {
        return None;
    }
    let stripped = trimmed.trim_end_matches(['/', '\\']);
    Some(Utf8PathBuf::from(if stripped.is_empty() { trimmed } else { stripped }))
}

/// Whether the path still contains a placeholder token
pub fn has_placeholder(path: &str) -> bool {
    path.contains(MOD_DIRECTORY_TOKEN) || path.contains(KOTOR_DIRECTORY_TOKEN)
}

/// Normalize separators and collapse `.`, `..` and repeated separators.
pub fn normalize_path(raw: &str) -> String {
    let replaced = raw.trim().replace('\\', "/");
    let absolute = replaced.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for segment in replaced.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Case-insensitive comparison key for a path
pub fn path_key(raw: &str) -> String {
    normalize_path(raw).to_lowercase()
}

/// Parent of a normalized path, `None` at the top
pub fn parent_key(key: &str) -> Option<&str> {
    match key.rfind('/') {
        Some(0) if key.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(index) => Some(&key[..index]),
    }
}

/// Parent directory of a path, normalized but keeping its case
pub fn parent_path(path: &str) -> Option<String> {
    let normalized = normalize_path(path);
    parent_key(&normalized).map(str::to_string)
}

/// Every proper ancestor of a normalized path, nearest first
pub fn ancestor_keys(key: &str) -> Vec<&str> {
    let mut ancestors = Vec::new();
    let mut current = key;
    while let Some(parent) = parent_key(current) {
        ancestors.push(parent);
        current = parent;
    }
    ancestors
}

/// Whether `key` lies strictly beneath `ancestor`
pub fn is_descendant(key: &str, ancestor: &str) -> bool {
    if ancestor == "/" {
        return key.len() > 1 && key.starts_with('/');
    }
    key.len() > ancestor.len() && key.starts_with(ancestor) && key.as_bytes()[ancestor.len()] == b'/'
}

/// Final path segment
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches(['/', '\\']);
    trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed)
}

/// Join a normalized directory and a relative path
pub fn join(directory: &str, relative: &str) -> String {
    normalize_path(&format!("{}/{}", directory, relative))
}

/// Whether a path segment contains wildcard characters
pub fn is_wildcard(path: &str) -> bool {
    path.contains('*') || path.contains('?')
}

/// A `*`/`?` pattern matched case-insensitively against normalized paths.
///
/// `*` and `?` never cross a `/`, matching how installers expand per-directory wildcards.
#[derive(Debug, Clone)]
pub struct WildcardPattern {
    pattern: String,
    regex: Regex,
}

impl WildcardPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let normalized = normalize_path(pattern);
        let mut expression = String::from("(?i)^");

        for c in normalized.chars() {
            match c {
                '*' => expression.push_str("[^/]*"),
                '?' => expression.push_str("[^/]"),
                c => expression.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
            }
        }

        expression.push('$');
        Ok(Self {
            pattern: normalized,
            regex: Regex::new(&expression)?,
        })
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.regex.is_match(&normalize_path(candidate))
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Longest leading directory without wildcards, the place to start listing from
    pub fn fixed_prefix(&self) -> String {
        let mut prefix: Vec<&str> = Vec::new();
        for segment in self.pattern.split('/') {
            if is_wildcard(segment) {
                break;
            }
            prefix.push(segment);
        }

        // A pattern without wildcards names a file; its directory is the listing root.
        if prefix.len() == self.pattern.split('/').count() {
            prefix.pop();
        }

        let joined = prefix.join("/");
        if joined.is_empty() && self.pattern.starts_with('/') {
            "/".to_string()
        } else {
            joined
        }
    }
}
