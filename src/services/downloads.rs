//! Download planning.
//!
//! Fetching is someone else's job. The engine only needs to know which file names a mod
//! link serves, which is what [`DownloadResolver`] provides, and which of those files still
//! have to be fetched, which is what [`DownloadPlanner::plan`] works out from each
//! component's per-file [`DownloadFlag`]s.

use crate::models::{Component, DownloadFlag};
use crate::services::fs::FileSystemProvider;
use crate::services::paths::join;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps mod page URLs to the file names they serve
#[async_trait]
pub trait DownloadResolver: Send + Sync {
    async fn resolve_urls_to_filenames(&self, urls: &[String]) -> anyhow::Result<HashMap<String, Vec<String>>>;
}

/// One file that should be fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDownload {
    pub url: String,
    pub filename: String,
    pub flag: DownloadFlag,
}

pub struct DownloadPlanner {
    resolver: Arc<dyn DownloadResolver>,
}

impl DownloadPlanner {
    pub fn new(resolver: Arc<dyn DownloadResolver>) -> Self {
        Self { resolver }
    }

    /// Ask the resolver about the component's links and merge the answer.
    ///
    /// # Returns
    /// Number of file names added. Resolver failures are logged and leave the map as it was.
    pub async fn refresh(&self, component: &mut Component) -> usize {
        if component.mod_links.is_empty() {
            return 0;
        }

        match self.resolver.resolve_urls_to_filenames(&component.mod_links).await {
            Ok(resolved) => {
                let added = Self::merge_resolved(component, &resolved);
                tracing::info!("Resolved {} new file name(s) for '{}'", added, component.name);
                added
            }
            Err(e) => {
                tracing::warn!("Could not resolve downloads for '{}': {:#}", component.name, e);
                0
            }
        }
    }

    /// Add newly discovered file names as `AutoDetect`.
    ///
    /// Names already in the map (compared case-insensitively) keep their flag.
    pub fn merge_resolved(component: &mut Component, resolved: &HashMap<String, Vec<String>>) -> usize {
        let mut urls: Vec<&String> = resolved.keys().collect();
        urls.sort();

        let mut added = 0;
        for url in urls {
            let files = component.download_filenames.entry(url.clone()).or_default();
            for name in &resolved[url] {
                let name = name.trim();
                if name.is_empty() || files.keys().any(|known| known.eq_ignore_ascii_case(name)) {
                    continue;
                }
                files.insert(name.to_string(), DownloadFlag::AutoDetect);
                added += 1;
            }
        }
        added
    }

    /// Files to fetch: every `Download`, and `AutoDetect` files missing from the mod directory
    pub fn plan(component: &Component, provider: &dyn FileSystemProvider, mod_directory: &str) -> Vec<PlannedDownload> {
        let mut planned = Vec::new();

        for (url, files) in &component.download_filenames {
            for (filename, flag) in files {
                let wanted = match flag {
                    DownloadFlag::Download => true,
                    DownloadFlag::AutoDetect => !provider.exists(&join(mod_directory, filename)),
                    DownloadFlag::Skip => false,
                };
                if wanted {
                    planned.push(PlannedDownload {
                        url: url.clone(),
                        filename: filename.clone(),
                        flag: *flag,
                    });
                }
            }
        }

        planned
    }
}
