use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobMatcher};
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::report::SyncSummary;

/// Remote folder reference
#[derive(Debug, Clone)]
pub struct RemoteFolder {
    pub id: String,
    pub name: String,
}

/// Remote file reference, as reported by the store
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub md5: Option<String>,
    pub size: Option<u64>,
}

/// The remote storage operations the sync walker depends on
///
/// `DriveClient` is the production implementation; tests substitute an
/// in-memory store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Find a non-trashed folder by name under the given parent
    async fn find_folder(&self, name: &str, parent: Option<&str>)
        -> Result<Option<RemoteFolder>>;

    /// Create a folder under the given parent
    async fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<RemoteFolder>;

    /// List non-trashed entries with the given name within a folder
    async fn files_named(&self, name: &str, folder: Option<&str>) -> Result<Vec<RemoteFile>>;

    /// Upload a new file into a folder
    async fn create_file(&self, path: &Path, name: &str, folder: Option<&str>)
        -> Result<RemoteFile>;

    /// Replace the content of an existing entry
    async fn update_file(&self, path: &Path, file_id: &str) -> Result<RemoteFile>;
}

/// Outcome of the duplicate check for one local file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateCheck {
    /// A remote entry with identical content exists (or same name, when
    /// checksum comparison is disabled)
    Match { id: String },
    /// Entries with the same name exist but none matches the local content;
    /// carries the first candidate's id so it can be updated in place
    Stale { id: String },
    /// No remote entry with this name
    Absent,
}

/// What happened to one local file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Created { id: String },
    Updated { id: String },
    Skipped { id: String },
}

/// Walks a local tree and mirrors it into the remote store
///
/// Folder ids are memoized per run, keyed by the relative directory path, so
/// a folder chain is resolved at most once no matter how many files live in
/// it. The cache is never persisted.
pub struct Uploader<S> {
    store: S,
    force: bool,
    check_md5: bool,
    folder_cache: HashMap<String, String>,
}

impl<S: RemoteStore> Uploader<S> {
    pub fn new(store: S, force: bool, check_md5: bool) -> Self {
        Self {
            store,
            force,
            check_md5,
            folder_cache: HashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Return the id of the folder with this name under `parent`, creating it
    /// when absent. Lookup-before-create, so repeated calls within a run are
    /// idempotent; concurrent runs can still race and create duplicates.
    pub async fn resolve_folder(&self, name: &str, parent: Option<&str>) -> Result<String> {
        if let Some(folder) = self.store.find_folder(name, parent).await? {
            info!("Found existing folder: {} ({})", folder.name, folder.id);
            return Ok(folder.id);
        }

        let folder = self.store.create_folder(name, parent).await?;
        info!("Created folder: {} ({})", folder.name, folder.id);
        Ok(folder.id)
    }

    /// Decide whether `local_path` already exists remotely under this name
    pub async fn check_duplicate(
        &self,
        name: &str,
        folder_id: Option<&str>,
        local_path: &Path,
    ) -> Result<DuplicateCheck> {
        let candidates = self.store.files_named(name, folder_id).await?;
        let Some(first) = candidates.first() else {
            return Ok(DuplicateCheck::Absent);
        };

        if !self.check_md5 {
            // Name-only matching
            return Ok(DuplicateCheck::Match {
                id: first.id.clone(),
            });
        }

        let local_md5 = calculate_md5(local_path).await?;
        for candidate in &candidates {
            // Drive omits the checksum for native document types
            if candidate.md5.as_deref() == Some(local_md5.as_str()) {
                return Ok(DuplicateCheck::Match {
                    id: candidate.id.clone(),
                });
            }
        }

        Ok(DuplicateCheck::Stale {
            id: first.id.clone(),
        })
    }

    /// Upload one file into the given remote folder
    ///
    /// Without `force`: an exact duplicate is skipped, a same-named entry
    /// with differing content is updated in place, and anything else is
    /// created. With `force`: the first same-named entry is updated, or a
    /// new entry is created.
    pub async fn upload_file(
        &self,
        path: &Path,
        folder_id: Option<&str>,
    ) -> Result<UploadOutcome> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("Path has no file name: {}", path.display()))?;

        if self.force {
            let existing = self.store.files_named(&name, folder_id).await?;
            return match existing.first() {
                Some(file) => {
                    let updated = self.store.update_file(path, &file.id).await?;
                    Ok(UploadOutcome::Updated { id: updated.id })
                }
                None => {
                    let created = self.store.create_file(path, &name, folder_id).await?;
                    Ok(UploadOutcome::Created { id: created.id })
                }
            };
        }

        match self.check_duplicate(&name, folder_id, path).await? {
            DuplicateCheck::Match { id } => Ok(UploadOutcome::Skipped { id }),
            DuplicateCheck::Stale { id } => {
                let updated = self.store.update_file(path, &id).await?;
                Ok(UploadOutcome::Updated { id: updated.id })
            }
            DuplicateCheck::Absent => {
                let created = self.store.create_file(path, &name, folder_id).await?;
                Ok(UploadOutcome::Created { id: created.id })
            }
        }
    }

    /// Resolve (and create where needed) the remote folder chain mirroring a
    /// relative directory, memoized across the run
    async fn resolve_folder_chain(
        &mut self,
        rel_dir: &Path,
        root_folder: Option<&str>,
    ) -> Result<Option<String>> {
        let mut parent = root_folder.map(str::to_string);
        let mut cache_key = String::new();

        for part in rel_dir.iter() {
            let name = part.to_string_lossy().into_owned();
            if !cache_key.is_empty() {
                cache_key.push('/');
            }
            cache_key.push_str(&name);

            let id = if let Some(id) = self.folder_cache.get(&cache_key).cloned() {
                id
            } else {
                let id = self.resolve_folder(&name, parent.as_deref()).await?;
                self.folder_cache.insert(cache_key.clone(), id.clone());
                id
            };
            parent = Some(id);
        }

        Ok(parent)
    }

    /// Upload all files matching `pattern` under `root`
    ///
    /// Remote failures are logged per file and the walk continues; only a
    /// missing root directory aborts the run.
    pub async fn upload_directory(
        &mut self,
        root: &Path,
        folder_id: Option<&str>,
        pattern: &str,
        recursive: bool,
    ) -> Result<SyncSummary> {
        if !root.is_dir() {
            return Err(anyhow!("Directory {} does not exist", root.display()));
        }

        let matcher = Glob::new(pattern)
            .with_context(|| format!("Invalid file pattern: {pattern}"))?
            .compile_matcher();

        let files = list_local_files(root, recursive, &matcher);
        info!(
            "Found {} files to process{}",
            files.len(),
            if recursive { " (recursive)" } else { "" }
        );

        let mut summary = SyncSummary::new(files.len());

        for path in files {
            let rel_path = path
                .strip_prefix(root)
                .context("Failed to strip prefix from local path")?;

            // Mirror the relative directory structure into remote folders
            let rel_dir = rel_path.parent().filter(|p| !p.as_os_str().is_empty());
            let target = match rel_dir {
                Some(dir) => match self.resolve_folder_chain(dir, folder_id).await {
                    Ok(id) => id,
                    Err(e) => {
                        error!(
                            "Failed to resolve remote folder for {}: {}",
                            path.display(),
                            e
                        );
                        summary.record_failed();
                        continue;
                    }
                },
                None => folder_id.map(str::to_string),
            };

            let size = match tokio::fs::metadata(&path).await {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    warn!("Failed to get metadata for {}: {}", path.display(), e);
                    0
                }
            };

            match self.upload_file(&path, target.as_deref()).await {
                Ok(UploadOutcome::Created { id }) => {
                    info!("Uploaded: {} ({})", rel_path.display(), id);
                    summary.record_uploaded(size);
                }
                Ok(UploadOutcome::Updated { id }) => {
                    info!("Updated: {} ({})", rel_path.display(), id);
                    summary.record_updated(size);
                }
                Ok(UploadOutcome::Skipped { id }) => {
                    info!("Skipped: {} (already exists, {})", rel_path.display(), id);
                    summary.record_skipped();
                }
                Err(e) => {
                    error!("Failed to upload {}: {}", path.display(), e);
                    summary.record_failed();
                }
            }
        }

        summary.finish();
        Ok(summary)
    }
}

/// Enumerate regular files under a root, in deterministic file-name order
fn list_local_files(root: &Path, recursive: bool, matcher: &GlobMatcher) -> Vec<PathBuf> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
    {
        match entry {
            Ok(entry) if entry.file_type().is_file() => {
                if matcher.is_match(Path::new(entry.file_name())) {
                    files.push(entry.into_path());
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Failed to read directory entry: {}", e);
            }
        }
    }

    files
}

/// Calculate the MD5 hash of a file to match the Drive-reported checksum
pub async fn calculate_md5(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn md5_matches_known_digest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        fs::write(&path, "hello world").unwrap();

        let digest = calculate_md5(&path).await.unwrap();
        assert_eq!(digest, "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[tokio::test]
    async fn md5_of_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty");
        fs::write(&path, "").unwrap();

        let digest = calculate_md5(&path).await.unwrap();
        assert_eq!(digest, "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn listing_filters_by_pattern_and_sorts() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("notes.log"), "log").unwrap();

        let matcher = Glob::new("*.txt").unwrap().compile_matcher();
        let files = list_local_files(dir.path(), true, &matcher);

        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn non_recursive_listing_stays_at_top_level() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("top.txt"), "top").unwrap();
        fs::write(dir.path().join("nested").join("deep.txt"), "deep").unwrap();

        let matcher = Glob::new("*").unwrap().compile_matcher();
        let files = list_local_files(dir.path(), false, &matcher);

        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("top.txt"));
    }
}
