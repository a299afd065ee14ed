//! Local-directory board.
//!
//! Layout:
//!
//! ```text
//! <root>/<name>/<version:020>/payload
//! <root>/<name>/<version:020>/meta.json
//! ```
//!
//! A version is written into a staging directory next to its final location
//! and then renamed into place. `rename` of a directory onto an existing,
//! non-empty directory fails, so two writers racing for the same version
//! cannot clobber each other: the loser retries with the next number.

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{AppError, ErrorKind};
use crate::store::{ArtifactVersion, Board, StoredArtifact};

const PAYLOAD_FILE: &str = "payload";
const META_FILE: &str = "meta.json";
const STAGING_PREFIX: &str = ".staging-";

/// How many successive version numbers a publish tries before giving up.
const MAX_PUBLISH_ATTEMPTS: u64 = 64;

#[derive(Debug, Clone)]
pub struct FolderBoard {
    root: PathBuf,
}

impl FolderBoard {
    pub fn new(root: &Path) -> Result<Self, AppError> {
        fs::create_dir_all(root).map_err(|e| {
            AppError::new(
                ErrorKind::Unavailable,
                format!("Cannot create board directory '{}': {e}", root.display()),
            )
        })?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn name_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn version_numbers(&self, name: &str) -> Result<Vec<u64>, AppError> {
        let dir = self.name_dir(name);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir, e)),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&dir, e))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Ok(v) = file_name.parse::<u64>() {
                versions.push(v);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    fn read_meta(&self, name: &str, version: u64) -> Result<ArtifactVersion, AppError> {
        let path = self.name_dir(name).join(version_dir(version)).join(META_FILE);
        let bytes = fs::read(&path).map_err(|e| match e.kind() {
            IoErrorKind::NotFound => not_found(name, Some(version)),
            _ => io_error(&path, e),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            AppError::new(
                ErrorKind::CorruptArtifact,
                format!("Unreadable metadata '{}': {e}", path.display()),
            )
        })
    }

    fn try_publish(
        &self,
        name_dir: &Path,
        name: &str,
        version: u64,
        payload: &[u8],
        hash: &str,
    ) -> Result<Option<ArtifactVersion>, AppError> {
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(name_dir)
            .map_err(|e| io_error(name_dir, e))?;

        let meta = ArtifactVersion {
            name: name.to_string(),
            version,
            created_at: Utc::now(),
            hash: hash.to_string(),
            size: payload.len() as u64,
        };
        let meta_json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| AppError::new(ErrorKind::InvalidInput, format!("Failed to encode metadata: {e}")))?;

        write_synced(&staging.path().join(PAYLOAD_FILE), payload)?;
        write_synced(&staging.path().join(META_FILE), &meta_json)?;

        let target = name_dir.join(version_dir(version));
        match fs::rename(staging.path(), &target) {
            // The staging directory no longer exists; dropping the handle is a no-op.
            Ok(()) => Ok(Some(meta)),
            Err(_) if target.exists() => Ok(None),
            Err(e) => Err(io_error(&target, e)),
        }
    }
}

impl Board for FolderBoard {
    fn put(&self, name: &str, payload: &[u8], hash: &str) -> Result<ArtifactVersion, AppError> {
        let name_dir = self.name_dir(name);
        fs::create_dir_all(&name_dir).map_err(|e| io_error(&name_dir, e))?;

        let first = self.version_numbers(name)?.last().map_or(1, |v| v + 1);
        for version in first..first + MAX_PUBLISH_ATTEMPTS {
            if let Some(meta) = self.try_publish(&name_dir, name, version, payload, hash)? {
                return Ok(meta);
            }
            log::debug!("{name} v{version} taken by a concurrent publish, retrying");
        }
        Err(AppError::new(
            ErrorKind::Unavailable,
            format!("Could not claim a new version of '{name}' after {MAX_PUBLISH_ATTEMPTS} attempts."),
        ))
    }

    fn get(&self, name: &str, version: Option<u64>) -> Result<StoredArtifact, AppError> {
        let version = match version {
            Some(v) => v,
            None => *self
                .version_numbers(name)?
                .last()
                .ok_or_else(|| not_found(name, None))?,
        };
        let meta = self.read_meta(name, version)?;
        let path = self.name_dir(name).join(version_dir(version)).join(PAYLOAD_FILE);
        let payload = fs::read(&path).map_err(|e| io_error(&path, e))?;
        Ok(StoredArtifact { meta, payload })
    }

    fn list(&self, name: &str) -> Result<Vec<ArtifactVersion>, AppError> {
        self.version_numbers(name)?
            .into_iter()
            .map(|v| self.read_meta(name, v))
            .collect()
    }

    fn location(&self) -> String {
        format!("folder {}", self.root.display())
    }
}

fn version_dir(version: u64) -> String {
    format!("{version:020}")
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let file = fs::File::create(path).map_err(|e| io_error(path, e))?;
    let mut writer = std::io::BufWriter::new(file);
    std::io::Write::write_all(&mut writer, bytes).map_err(|e| io_error(path, e))?;
    let file = writer.into_inner().map_err(|e| io_error(path, e.into_error()))?;
    file.sync_all().map_err(|e| io_error(path, e))
}

fn not_found(name: &str, version: Option<u64>) -> AppError {
    match version {
        Some(v) => AppError::new(ErrorKind::NotFound, format!("Artifact '{name}' has no version {v}.")),
        None => AppError::new(ErrorKind::NotFound, format!("No artifact named '{name}'.")),
    }
}

fn io_error(path: &Path, e: std::io::Error) -> AppError {
    AppError::new(ErrorKind::Unavailable, format!("I/O error at '{}': {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_start_at_one_and_increase() {
        let tmp = tempfile::tempdir().unwrap();
        let board = FolderBoard::new(tmp.path()).unwrap();
        let a = board.put("m", b"one", "h1").unwrap();
        let b = board.put("m", b"two", "h2").unwrap();
        assert_eq!(a.version, 1);
        assert_eq!(b.version, 2);
        assert_eq!(board.get("m", None).unwrap().payload, b"two");
        assert_eq!(board.get("m", Some(1)).unwrap().payload, b"one");
        assert_eq!(board.list("m").unwrap().len(), 2);
    }

    #[test]
    fn missing_names_and_versions_are_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let board = FolderBoard::new(tmp.path()).unwrap();
        assert_eq!(board.get("missing_model", None).unwrap_err().kind(), ErrorKind::NotFound);
        board.put("m", b"x", "h").unwrap();
        assert_eq!(board.get("m", Some(9)).unwrap_err().kind(), ErrorKind::NotFound);
        assert!(board.list("missing_model").unwrap().is_empty());
    }

    #[test]
    fn staging_leftovers_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let board = FolderBoard::new(tmp.path()).unwrap();
        board.put("m", b"x", "h").unwrap();
        fs::create_dir_all(tmp.path().join("m").join(".staging-abandoned")).unwrap();
        assert_eq!(board.list("m").unwrap().len(), 1);
        assert_eq!(board.put("m", b"y", "h").unwrap().version, 2);
    }

    #[test]
    fn taken_version_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let board = FolderBoard::new(tmp.path()).unwrap();
        board.put("m", b"x", "h").unwrap();
        let name_dir = tmp.path().join("m");
        // Simulate a concurrent writer that has just claimed version 2.
        let claimed = board.try_publish(&name_dir, "m", 2, b"other", "h").unwrap();
        assert!(claimed.is_some());
        let lost = board.try_publish(&name_dir, "m", 2, b"mine", "h").unwrap();
        assert!(lost.is_none());
        assert_eq!(board.get("m", Some(2)).unwrap().payload, b"other");
        assert_eq!(board.put("m", b"mine", "h").unwrap().version, 3);
    }

    #[test]
    fn concurrent_publishes_get_distinct_versions() {
        let tmp = tempfile::tempdir().unwrap();
        let board = FolderBoard::new(tmp.path()).unwrap();
        let versions: Vec<u64> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let board = &board;
                    s.spawn(move || board.put("m", format!("p{i}").as_bytes(), "h").unwrap().version)
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted, (1..=8).collect::<Vec<u64>>());
    }
}
