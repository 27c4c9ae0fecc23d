use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

mod path;

pub use path::chunk_relative_path;

const TMP_SUFFIX: &str = ".tmp";

/// Write a chunk file below `base_dir` at `relative_path`.
///
/// The payload goes to a sibling temp file first, is flushed and fsynced,
/// then renamed into place, so a reader never observes a partial chunk and a
/// crash after return cannot lose the bytes. Returns the stored size.
pub async fn save_chunk(base_dir: &Path, relative_path: &str, content: &[u8]) -> io::Result<u64> {
    let full_path = base_dir.join(relative_path);
    let dir = full_path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(dir).await?;

    let tmp_path = tmp_sibling(&full_path);
    let result = write_synced(&tmp_path, content).await;
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    fs::rename(&tmp_path, &full_path).await?;
    Ok(content.len() as u64)
}

async fn write_synced(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(content).await?;
    file.sync_all().await?;
    Ok(())
}

fn tmp_sibling(full_path: &Path) -> PathBuf {
    let mut name = full_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(TMP_SUFFIX);
    full_path.with_file_name(name)
}

/// Read a stored chunk back. The caller resolves missing files into its own
/// error policy.
pub async fn read_chunk(base_dir: &Path, relative_path: &str) -> io::Result<Vec<u8>> {
    fs::read(base_dir.join(relative_path)).await
}

/// Probe whether the storage root is writable by round-tripping a marker file.
pub async fn check_writable(base_dir: &Path) -> bool {
    let probe = base_dir.join(".write_test");
    let result = async {
        fs::create_dir_all(base_dir).await?;
        fs::write(&probe, b"test").await?;
        fs::remove_file(&probe).await
    }
    .await;
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("storage write probe failed at {:?}: {}", base_dir, e);
            false
        }
    }
}

/// A file found below `audio/` during an orphan sweep.
#[derive(Debug, Clone)]
pub struct SweptFile {
    /// Path relative to the storage root, matching `audio_chunks.file_path`.
    pub relative_path: String,
    /// Leftover temp file from an interrupted upload.
    pub is_tmp: bool,
}

/// List files under `<base_dir>/audio` whose mtime is older than `older_than`.
/// Unreadable entries are skipped with a warning; the sweep is best-effort.
pub async fn stale_files(base_dir: &Path, older_than: SystemTime) -> io::Result<Vec<SweptFile>> {
    let root = base_dir.join("audio");
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    let mut pending = vec![root];
    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("sweep cannot read {:?}: {}", dir, e);
                continue;
            }
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!("sweep cannot stat {:?}: {}", path, e);
                    continue;
                }
            };
            if modified >= older_than {
                continue;
            }
            let relative = match path.strip_prefix(base_dir) {
                Ok(rel) => rel.to_string_lossy().into_owned(),
                Err(_) => continue,
            };
            let is_tmp = relative.ends_with(TMP_SUFFIX);
            found.push(SweptFile {
                relative_path: relative,
                is_tmp,
            });
        }
    }
    Ok(found)
}

/// Delete a swept file; missing files count as already deleted.
pub async fn remove_file(base_dir: &Path, relative_path: &str) -> io::Result<()> {
    match fs::remove_file(base_dir.join(relative_path)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn save_chunk_writes_bytes_and_cleans_temp() {
        let tmp = TempDir::new().unwrap();
        let rel = "audio/p/r/2026-07-09/14/chunk_x.ogg";

        let size = save_chunk(tmp.path(), rel, b"OggS-payload").await.unwrap();
        assert_eq!(size, 12);

        let stored = fs::read(tmp.path().join(rel)).await.unwrap();
        assert_eq!(stored, b"OggS-payload");

        let dir = tmp.path().join("audio/p/r/2026-07-09/14");
        let mut entries = fs::read_dir(&dir).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["chunk_x.ogg".to_string()]);
    }

    #[tokio::test]
    async fn check_writable_true_on_tempdir() {
        let tmp = TempDir::new().unwrap();
        assert!(check_writable(tmp.path()).await);
        assert!(!tmp.path().join(".write_test").exists());
    }

    #[tokio::test]
    async fn stale_files_respects_age_cutoff() {
        let tmp = TempDir::new().unwrap();
        save_chunk(tmp.path(), "audio/a/old.ogg", b"x").await.unwrap();

        let future = SystemTime::now() + Duration::from_secs(60);
        let past = SystemTime::now() - Duration::from_secs(60);

        let old = stale_files(tmp.path(), future).await.unwrap();
        assert_eq!(old.len(), 1);
        assert_eq!(old[0].relative_path, "audio/a/old.ogg");
        assert!(!old[0].is_tmp);

        let fresh = stale_files(tmp.path(), past).await.unwrap();
        assert!(fresh.is_empty());
    }

    #[tokio::test]
    async fn remove_file_tolerates_missing() {
        let tmp = TempDir::new().unwrap();
        remove_file(tmp.path(), "audio/none.ogg").await.unwrap();
    }
}
