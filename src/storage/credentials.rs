//! On-disk credential artifacts, one file per user.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::StoreError;

const ARTIFACT_EXTENSION: &str = "json";

/// A persisted session string belonging to one user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialArtifact {
    pub user_id: i64,
    pub session_string: String,
    pub created_at: DateTime<Utc>,
}

impl CredentialArtifact {
    /// Creates an artifact stamped with the current time.
    #[must_use]
    pub fn new(user_id: i64, session_string: String) -> Self {
        Self {
            user_id,
            session_string,
            created_at: Utc::now(),
        }
    }
}

impl std::fmt::Debug for CredentialArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialArtifact")
            .field("user_id", &self.user_id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Directory-backed store of [`CredentialArtifact`]s.
///
/// Files are written to a dot-prefixed temporary name and renamed into place,
/// so readers and [`sweep`](Self::sweep) only ever see complete artifacts.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    /// Opens the store, creating the directory with owner-only access.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        create_private_dir(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        debug!("Credential store ready at {}", dir.display());
        Ok(Self { dir })
    }

    /// Directory backing this store.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, user_id: i64) -> PathBuf {
        self.dir.join(format!("{user_id}.{ARTIFACT_EXTENSION}"))
    }

    /// Writes (or replaces) the artifact for `artifact.user_id`.
    pub fn put(&self, artifact: &CredentialArtifact) -> Result<(), StoreError> {
        let path = self.path_for(artifact.user_id);
        let tmp = self.dir.join(format!(
            ".{}.{ARTIFACT_EXTENSION}.tmp",
            artifact.user_id
        ));
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        let json = serde_json::to_vec_pretty(artifact)?;
        {
            let mut file = private_file(&tmp).map_err(io_err)?;
            file.write_all(&json).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        if let Err(source) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(io_err(source));
        }

        info!("Stored credential artifact for user {}", artifact.user_id);
        Ok(())
    }

    /// Reads the artifact for `user_id`, if any.
    pub fn get(&self, user_id: i64) -> Result<Option<CredentialArtifact>, StoreError> {
        let path = self.path_for(user_id);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Removes the artifact for `user_id`. Returns whether one existed.
    pub fn delete(&self, user_id: i64) -> Result<bool, StoreError> {
        let path = self.path_for(user_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted credential artifact for user {}", user_id);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Deletes every artifact whose modification time is at least `max_age` old.
    ///
    /// Keeps going past individual failures; if any occurred, they are all
    /// returned together in [`StoreError::SweepPartial`]. Returns the number of
    /// removed artifacts otherwise.
    pub fn sweep(&self, max_age: Duration) -> Result<usize, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let now = SystemTime::now();
        let mut removed = 0;
        let mut failures = Vec::new();

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    failures.push(format!("{}: {e}", self.dir.display()));
                    continue;
                }
            };
            let path = entry.path();
            if !is_artifact(&path) {
                continue;
            }

            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    failures.push(format!("{}: {e}", path.display()));
                    continue;
                }
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age < max_age {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Swept {} (age {}s)", path.display(), age.as_secs());
                    removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Could not remove {}: {}", path.display(), e);
                    failures.push(format!("{}: {e}", path.display()));
                }
            }
        }

        if failures.is_empty() {
            Ok(removed)
        } else {
            Err(StoreError::SweepPartial { removed, failures })
        }
    }
}

/// Published artifacts only: temporary files start with a dot.
fn is_artifact(path: &Path) -> bool {
    let visible = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| !n.starts_with('.'));
    visible && path.extension().is_some_and(|ext| ext == ARTIFACT_EXTENSION)
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::{DirBuilderExt, PermissionsExt};

    if dir.is_dir() {
        return fs::set_permissions(dir, fs::Permissions::from_mode(0o700));
    }
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(unix)]
fn private_file(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;

    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn private_file(path: &Path) -> std::io::Result<fs::File> {
    fs::File::create(path)
}
