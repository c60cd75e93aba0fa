//! On-disk project layout for thesiskit.
//!
//! The [`FileManager`] maps a [`ProjectId`] to a fixed directory tree:
//!
//! ```text
//! <projects_dir>/<project_id>/
//! ├── project.json
//! ├── sources/        (logo, reference documents)
//! ├── attachments/    (image and file payloads)
//! └── output/
//!     ├── <project_id>.pdf
//!     └── build.json
//! ```
//!
//! Every write goes through a temp file in the destination directory followed
//! by a rename, so readers never observe a partially written file.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thesiskit_shared::{
    AssetRef, AssetResolver, Attachment, ProjectDocument, ProjectId, Result, StorageConfig,
    ThesisError,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const PROJECT_FILE: &str = "project.json";
const SOURCES_DIR: &str = "sources";
const ATTACHMENTS_DIR: &str = "attachments";
const OUTPUT_DIR: &str = "output";
const BUILD_MANIFEST_FILE: &str = "build.json";
const LOCK_FILE: &str = ".build.lock";

/// Checksum and size of a written output artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputMeta {
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: usize,
}

/// Record of the last successful build, written next to the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub build_id: Uuid,
    pub project_id: ProjectId,
    pub file_name: String,
    pub sha256: String,
    pub size_bytes: usize,
    pub pages: usize,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub built_at: DateTime<Utc>,
}

/// Owns the directory layout of every project under one root.
#[derive(Debug, Clone)]
pub struct FileManager {
    root: PathBuf,
}

impl FileManager {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            root: config.projects_dir.clone(),
        }
    }

    /// Directory holding all projects.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, id: &ProjectId) -> PathBuf {
        self.root.join(id.as_str())
    }

    pub fn sources_dir(&self, id: &ProjectId) -> PathBuf {
        self.project_dir(id).join(SOURCES_DIR)
    }

    pub fn attachments_dir(&self, id: &ProjectId) -> PathBuf {
        self.project_dir(id).join(ATTACHMENTS_DIR)
    }

    pub fn output_dir(&self, id: &ProjectId) -> PathBuf {
        self.project_dir(id).join(OUTPUT_DIR)
    }

    /// Stable location of the rendered document: `output/<project_id>.pdf`.
    pub fn output_path(&self, id: &ProjectId) -> PathBuf {
        self.output_dir(id).join(format!("{id}.pdf"))
    }

    pub fn project_exists(&self, id: &ProjectId) -> bool {
        self.project_dir(id).join(PROJECT_FILE).is_file()
    }

    /// Create the project's directory tree. Idempotent.
    #[instrument(skip_all, fields(project_id = %id))]
    pub fn ensure_layout(&self, id: &ProjectId) -> Result<PathBuf> {
        let project_dir = self.project_dir(id);
        for dir in [
            project_dir.clone(),
            self.sources_dir(id),
            self.attachments_dir(id),
            self.output_dir(id),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| ThesisError::io(&dir, e))?;
        }
        debug!(path = %project_dir.display(), "project layout ready");
        Ok(project_dir)
    }

    // -----------------------------------------------------------------------
    // Sources and attachments
    // -----------------------------------------------------------------------

    /// Store an attachment payload under `attachments/<file_name>`.
    #[instrument(
        skip_all,
        fields(project_id = %id, attachment = %attachment.id, size = bytes.len())
    )]
    pub fn store_attachment(
        &self,
        id: &ProjectId,
        attachment: &Attachment,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let name = checked_file_name(&attachment.file_name)?;
        let path = self.attachments_dir(id).join(name);
        write_atomic(&path, bytes)?;
        debug!(path = %path.display(), "stored attachment");
        Ok(path)
    }

    /// Store a file under `sources/<key>`.
    #[instrument(skip_all, fields(project_id = %id, key = %key, size = bytes.len()))]
    pub fn store_source(&self, id: &ProjectId, key: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.sources_dir(id).join(checked_file_name(key)?);
        write_atomic(&path, bytes)?;
        Ok(path)
    }

    /// Read `sources/<key>`. Absent files are reported as `NotFound`.
    pub fn read_source(&self, id: &ProjectId, key: &str) -> Result<Vec<u8>> {
        let path = self.sources_dir(id).join(checked_file_name(key)?);
        read_existing(&path, || format!("source '{key}' of project '{id}'"))
    }

    /// Read the payload of an attachment stored as `file_name`.
    pub fn read_attachment(&self, id: &ProjectId, file_name: &str) -> Result<Vec<u8>> {
        let path = self.attachments_dir(id).join(checked_file_name(file_name)?);
        read_existing(&path, || {
            format!("attachment file '{file_name}' of project '{id}'")
        })
    }

    /// Asset resolver over this project's sources and the given attachments.
    pub fn assets(&self, id: &ProjectId, attachments: &[Attachment]) -> ProjectAssets {
        ProjectAssets {
            files: self.clone(),
            project_id: id.clone(),
            attachment_files: attachments
                .iter()
                .map(|a| (a.id.clone(), a.file_name.clone()))
                .collect(),
        }
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    /// Write the rendered document to `output/<project_id>.pdf`.
    #[instrument(skip_all, fields(project_id = %id, size = bytes.len()))]
    pub fn write_output(&self, id: &ProjectId, bytes: &[u8]) -> Result<OutputMeta> {
        let path = self.output_path(id);
        write_atomic(&path, bytes)?;

        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let sha256 = format!("{:x}", hasher.finalize());

        info!(path = %path.display(), size = bytes.len(), "wrote output document");
        Ok(OutputMeta {
            path,
            sha256,
            size_bytes: bytes.len(),
        })
    }

    /// Write `output/build.json`.
    pub fn write_build_manifest(&self, manifest: &BuildManifest) -> Result<PathBuf> {
        let path = self
            .output_dir(&manifest.project_id)
            .join(BUILD_MANIFEST_FILE);
        write_json(&path, manifest)?;
        Ok(path)
    }

    pub fn read_build_manifest(&self, id: &ProjectId) -> Result<BuildManifest> {
        let path = self.output_dir(id).join(BUILD_MANIFEST_FILE);
        let bytes = read_existing(&path, || format!("build manifest of project '{id}'"))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ThesisError::Serialization(format!("invalid {}: {e}", path.display())))
    }

    // -----------------------------------------------------------------------
    // Project documents
    // -----------------------------------------------------------------------

    /// Persist `project.json`, creating the layout if needed.
    #[instrument(skip_all, fields(project_id = %doc.id))]
    pub fn save_project(&self, doc: &ProjectDocument) -> Result<PathBuf> {
        let dir = self.ensure_layout(&doc.id)?;
        let path = dir.join(PROJECT_FILE);
        write_json(&path, doc)?;
        Ok(path)
    }

    #[instrument(skip_all, fields(project_id = %id))]
    pub fn load_project_document(&self, id: &ProjectId) -> Result<ProjectDocument> {
        let path = self.project_dir(id).join(PROJECT_FILE);
        let bytes = read_existing(&path, || format!("project '{id}'"))?;
        let doc: ProjectDocument = serde_json::from_slice(&bytes)
            .map_err(|e| ThesisError::Serialization(format!("invalid {}: {e}", path.display())))?;

        if &doc.id != id {
            return Err(ThesisError::structure(format!(
                "{} declares id '{}' but lives in directory '{id}'",
                path.display(),
                doc.id
            )));
        }
        Ok(doc)
    }

    /// All project ids under the root, sorted. A missing root yields none.
    pub fn list_projects(&self) -> Result<Vec<ProjectId>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ThesisError::io(&self.root, e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ThesisError::io(&self.root, e))?;
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            let Ok(id) = ProjectId::new(name) else {
                continue;
            };
            if self.project_exists(&id) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    // -----------------------------------------------------------------------
    // Build lock
    // -----------------------------------------------------------------------

    /// Take the per-project build lock. A second concurrent build of the same
    /// project fails with `BuildInProgress` until the guard is dropped.
    ///
    /// The lock file records the holder's PID. A lock left behind by a
    /// process that no longer exists is removed and taken over.
    pub fn acquire_build_lock(&self, id: &ProjectId) -> Result<BuildLock> {
        let dir = self.ensure_layout(id)?;
        let path = dir.join(LOCK_FILE);
        let mut file = match create_lock_file(&path)? {
            Some(file) => file,
            None => match lock_holder(&path) {
                Some(pid) if !process_alive(pid) => {
                    warn!(path = %path.display(), pid, "removing stale build lock");
                    remove_if_present(&path)?;
                    create_lock_file(&path)?.ok_or_else(|| ThesisError::BuildInProgress {
                        project_id: id.to_string(),
                    })?
                }
                _ => {
                    return Err(ThesisError::BuildInProgress {
                        project_id: id.to_string(),
                    });
                }
            },
        };
        writeln!(file, "{}", std::process::id()).map_err(|e| ThesisError::io(&path, e))?;
        debug!(path = %path.display(), "acquired build lock");
        Ok(BuildLock { path })
    }

    /// Remove the build lock whoever holds it. Returns whether a lock existed.
    pub fn break_build_lock(&self, id: &ProjectId) -> Result<bool> {
        let path = self.project_dir(id).join(LOCK_FILE);
        let removed = remove_if_present(&path)?;
        if removed {
            info!(project_id = %id, "build lock removed");
        }
        Ok(removed)
    }
}

fn create_lock_file(path: &Path) -> Result<Option<File>> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(ThesisError::io(path, e)),
    }
}

/// PID recorded in a lock file. `None` while the holder has not written it yet.
fn lock_holder(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// No portable liveness check; locks are only broken explicitly.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

fn remove_if_present(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ThesisError::io(path, e)),
    }
}

/// Held for the duration of a build; removes the lock file on drop.
#[derive(Debug)]
pub struct BuildLock {
    path: PathBuf,
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release build lock");
        }
    }
}

/// Lazily reads asset payloads of one project for the renderer.
#[derive(Debug, Clone)]
pub struct ProjectAssets {
    files: FileManager,
    project_id: ProjectId,
    attachment_files: HashMap<String, String>,
}

impl AssetResolver for ProjectAssets {
    fn open(&self, asset: &AssetRef) -> Result<Vec<u8>> {
        match asset {
            AssetRef::Source(key) => self.files.read_source(&self.project_id, key),
            AssetRef::Attachment(id) => {
                let file_name =
                    self.attachment_files
                        .get(id)
                        .ok_or_else(|| ThesisError::NotFound {
                            query: format!("attachment '{id}' of project '{}'", self.project_id),
                        })?;
                self.files.read_attachment(&self.project_id, file_name)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Reject names that would escape their directory.
fn checked_file_name(name: &str) -> Result<&str> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.starts_with('.');
    if bad {
        return Err(ThesisError::structure(format!("invalid file name '{name}'")));
    }
    Ok(name)
}

fn read_existing(path: &Path, what: impl FnOnce() -> String) -> Result<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ThesisError::NotFound { query: what() })
        }
        Err(e) => Err(ThesisError::io(path, e)),
    }
}

/// Write `bytes` to a temp file next to `path`, fsync, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| ThesisError::structure(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(dir).map_err(|e| ThesisError::io(dir, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = dir.join(format!(".{file_name}.{}.tmp", Uuid::now_v7()));

    let written = File::create(&temp).and_then(|mut f| {
        f.write_all(bytes)?;
        f.sync_all()
    });
    if let Err(e) = written {
        let _ = std::fs::remove_file(&temp);
        return Err(ThesisError::io(&temp, e));
    }

    if let Err(e) = std::fs::rename(&temp, path) {
        let _ = std::fs::remove_file(&temp);
        return Err(ThesisError::io(path, e));
    }
    debug!(path = %path.display(), size = bytes.len(), "atomic write complete");
    Ok(())
}

/// Write a JSON file (pretty-printed) atomically.
fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(data)
        .map_err(|e| ThesisError::Serialization(format!("JSON serialization failed: {e}")))?;
    write_atomic(path, &json)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
