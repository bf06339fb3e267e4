use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use sha1::{Digest, Sha1};
use tokio::fs::{create_dir_all, read_dir, read_to_string, remove_dir_all, remove_file, rename, try_exists, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::cache::lock_file::{is_stale, LOCK_FILE_NAME};
use crate::maven::coordinates::{ArtifactIdentification, Coordinate, PartRef};
use crate::maven::paths::{as_maven_path, cached_metadata_file_name, parse_maven_path, version_directory};
use crate::repo::repository::FetchError;
use crate::util::blob::Blob;
use crate::util::checksum::{Checksum, ChecksumAlgorithm, ChecksumFailure};
use crate::util::validating_body::{validator_for, ValidatingBody};

const DOWNLOADING_SUFFIX: &str = ".downloading";
const DELETING_SUFFIX: &str = ".deleting";
pub const BOOKKEEPING_DIR: &str = ".mc";

/// The state of a cached part with regard to its checksum file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Valid,
    /// there is a part, but no checksum file to check it against
    Unverified,
    Missing,
    Corrupt(ChecksumFailure),
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub temp_files_removed: usize,
    pub stale_locks_removed: usize,
    pub deleting_dirs_removed: usize,
    pub corrupt_parts_removed: Vec<String>,
}

/// The on-disk artifact cache in Maven layout:
///  `<root>/<group path>/<artifact>/<version>/<artifact>-<version>[-<classifier>].<ext>`, with a
///  `.sha1` sibling for every part.
///
/// Files are written to a temporary name and renamed into place, so a part is either complete or
///  absent. Directories are renamed with a `.deleting` suffix before they are removed, so partial
///  deletes do not leave inconsistent state.
pub struct LocalCache {
    root: PathBuf,
}

impl LocalCache {
    pub fn new(root: impl Into<PathBuf>) -> LocalCache {
        LocalCache { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn part_path(&self, part: &PartRef) -> PathBuf {
        self.root.join(as_maven_path(part))
    }

    pub fn version_dir(&self, coordinate: &Coordinate) -> PathBuf {
        self.root.join(version_directory(coordinate))
    }

    pub fn artifact_dir(&self, ident: &ArtifactIdentification) -> PathBuf {
        self.root.join(ident.as_path())
    }

    /// Where a repository's `maven-metadata.xml` for the directory `relative_dir` is cached
    pub fn metadata_path(&self, relative_dir: &str, repository_id: &str) -> PathBuf {
        self.root.join(relative_dir).join(cached_metadata_file_name(repository_id))
    }

    fn checksum_path(path: &Path, algorithm: ChecksumAlgorithm) -> PathBuf {
        let mut result = path.as_os_str().to_owned();
        result.push(".");
        result.push(algorithm.extension());
        PathBuf::from(result)
    }

    pub async fn contains(&self, part: &PartRef) -> bool {
        try_exists(self.part_path(part)).await.unwrap_or(false)
    }

    /// When the part was written to the cache, if it is there
    pub async fn modified(&self, part: &PartRef) -> Option<DateTime<Utc>> {
        let metadata = tokio::fs::metadata(self.part_path(part)).await.ok()?;
        metadata.modified().ok().map(DateTime::<Utc>::from)
    }

    async fn stored_checksum(path: &Path) -> Option<Checksum> {
        for algorithm in ChecksumAlgorithm::ALL {
            if let Ok(text) = read_to_string(Self::checksum_path(path, algorithm)).await {
                match Checksum::parse(algorithm, &text) {
                    Ok(checksum) => return Some(checksum),
                    Err(e) => warn!("malformed checksum file for {}: {}", path.display(), e),
                }
            }
        }
        None
    }

    /// Re-reads a cached part and compares it to its checksum file
    pub async fn verify(&self, part: &PartRef) -> Result<Verification, FetchError> {
        Self::verify_file(&self.part_path(part)).await
    }

    async fn verify_file(path: &Path) -> Result<Verification, FetchError> {
        if !try_exists(path).await? {
            return Ok(Verification::Missing);
        }
        let Some(checksum) = Self::stored_checksum(path).await else {
            return Ok(Verification::Unverified);
        };

        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .await?;
        let stream = ReaderStream::new(file);
        let mut body = ValidatingBody::new(stream, vec![validator_for(&checksum)]);
        while let Some(chunk) = body.next().await {
            if let Err(e) = chunk {
                return match FetchError::from_stream_error(e) {
                    FetchError::ChecksumMismatch(failure) => Ok(Verification::Corrupt(failure)),
                    other => Err(other),
                };
            }
        }
        Ok(Verification::Valid)
    }

    /// Streams a blob into the cache. The part only becomes visible once it was received
    ///  completely and passed validation.
    pub async fn insert(&self, part: &PartRef, blob: Blob) -> Result<PathBuf, FetchError> {
        let target = self.part_path(part);
        let Some(directory) = target.parent() else {
            return Err(FetchError::Io(format!("invalid cache path {}", target.display())));
        };
        create_dir_all(directory).await?;

        let mut temp_path = target.as_os_str().to_owned();
        temp_path.push(format!(".{}{}", Uuid::new_v4().as_hyphenated(), DOWNLOADING_SUFFIX));
        let temp_path = PathBuf::from(temp_path);

        trace!("inserting {} into the cache, temp file is {}", part, temp_path.display());

        match Self::do_insert(&temp_path, blob).await {
            Ok(sha1) => {
                rename(&temp_path, &target).await?;
                // the checksum file is written after the part, so a part with a checksum file is complete
                Self::write_atomically(&Self::checksum_path(&target, ChecksumAlgorithm::Sha1), sha1.as_bytes()).await?;
                Ok(target)
            }
            Err(e) => {
                if let Err(cleanup) = remove_file(&temp_path).await {
                    error!("error cleaning up {} after failed attempt to insert: {}", temp_path.display(), cleanup);
                }
                Err(e)
            }
        }
    }

    /// returns the hex SHA-1 of what was written
    async fn do_insert(temp_path: &Path, mut blob: Blob) -> Result<String, FetchError> {
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(temp_path)
            .await?;

        let mut sha1_hasher: Sha1 = Default::default();
        while let Some(chunk) = blob.data.next().await {
            let bytes = chunk.map_err(FetchError::from_stream_error)?;
            sha1_hasher.update(&bytes);
            file.write_all(&bytes).await?;
        }
        file.flush().await?;
        file.sync_all().await?;

        Ok(hex::encode(sha1_hasher.finalize()))
    }

    /// Replaces a (small) file through a temp file and rename
    pub async fn write_atomically(path: &Path, data: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            create_dir_all(parent).await?;
        }
        let mut temp_path = path.as_os_str().to_owned();
        temp_path.push(format!(".{}{}", Uuid::new_v4().as_hyphenated(), DOWNLOADING_SUFFIX));
        let temp_path = PathBuf::from(temp_path);

        let result = async {
            let mut file = OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&temp_path)
                .await?;
            file.write_all(data).await?;
            file.flush().await?;
            rename(&temp_path, path).await
        }.await;

        if let Err(e) = result {
            let _ = remove_file(&temp_path).await;
            return Err(e);
        }
        Ok(())
    }

    pub async fn read_metadata(path: &Path) -> Option<(Bytes, DateTime<Utc>)> {
        let data = tokio::fs::read(path).await.ok()?;
        let modified = tokio::fs::metadata(path).await.ok()?.modified().ok()?;
        Some((Bytes::from(data), DateTime::<Utc>::from(modified)))
    }

    /// Removes the cached metadata of one repository for an artifact, on artifact and on version level
    pub async fn invalidate_metadata(&self, ident: &ArtifactIdentification, repository_id: &str) -> std::io::Result<()> {
        let artifact_dir = self.artifact_dir(ident);
        let file_name = cached_metadata_file_name(repository_id);

        Self::remove_if_present(&artifact_dir.join(&file_name)).await?;

        let mut entries = match read_dir(&artifact_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                Self::remove_if_present(&entry.path().join(&file_name)).await?;
            }
        }
        Ok(())
    }

    async fn remove_if_present(path: &Path) -> std::io::Result<()> {
        match remove_file(path).await {
            Ok(_) => {
                debug!("removed {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Removes a part and its checksum files, e.g. after it was found to be corrupt
    pub async fn remove_part(&self, part: &PartRef) -> std::io::Result<()> {
        Self::remove_with_checksums(&self.part_path(part)).await
    }

    async fn remove_with_checksums(path: &Path) -> std::io::Result<()> {
        Self::remove_if_present(path).await?;
        for algorithm in ChecksumAlgorithm::ALL {
            Self::remove_if_present(&Self::checksum_path(path, algorithm)).await?;
        }
        Ok(())
    }

    /// Deletes everything cached for a coordinate. Returns `false` if nothing was cached.
    pub async fn purge(&self, coordinate: &Coordinate) -> std::io::Result<bool> {
        let directory_path = self.version_dir(coordinate);
        trace!("purging {} from directory {}", coordinate, directory_path.display());
        if !try_exists(&directory_path).await? {
            return Ok(false);
        }

        let mut temp_path = directory_path.as_os_str().to_owned();
        temp_path.push(format!(".{}{}", Uuid::new_v4().as_hyphenated(), DELETING_SUFFIX));
        let temp_path = PathBuf::from(temp_path);

        // NB: This is racy with concurrent reads and can cause spurious failure in them
        rename(&directory_path, &temp_path).await?;
        remove_dir_all(&temp_path).await?;
        info!("purged {}", coordinate);
        Ok(true)
    }

    /// Scans the whole cache, removing leftovers of interrupted operations and parts that do not
    ///  match their checksum file
    pub async fn repair(&self, stale_lock_age: Duration) -> std::io::Result<RepairReport> {
        let mut report = RepairReport::default();
        if !try_exists(&self.root).await? {
            return Ok(report);
        }

        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().to_string();

                if entry.file_type().await?.is_dir() {
                    if name.ends_with(DELETING_SUFFIX) {
                        debug!("removing leftover {}", path.display());
                        remove_dir_all(&path).await?;
                        report.deleting_dirs_removed += 1;
                    }
                    else if !(dir == self.root && name == BOOKKEEPING_DIR) {
                        pending.push(path);
                    }
                    continue;
                }

                if name.ends_with(DOWNLOADING_SUFFIX) {
                    debug!("removing leftover {}", path.display());
                    Self::remove_if_present(&path).await?;
                    report.temp_files_removed += 1;
                }
                else if name == LOCK_FILE_NAME {
                    if is_stale(&path, stale_lock_age).await {
                        debug!("removing stale lock {}", path.display());
                        Self::remove_if_present(&path).await?;
                        report.stale_locks_removed += 1;
                    }
                }
                else if Self::is_bookkeeping_file(&name) {
                    continue;
                }
                else if let Ok(Verification::Corrupt(failure)) = Self::verify_file(&path).await {
                    warn!("removing corrupt {}: {}", path.display(), failure);
                    Self::remove_with_checksums(&path).await?;
                    report.corrupt_parts_removed.push(self.describe(&path));
                }
            }
        }

        report.corrupt_parts_removed.sort();
        Ok(report)
    }

    fn is_bookkeeping_file(name: &str) -> bool {
        name.starts_with("maven-metadata")
            || ChecksumAlgorithm::ALL.iter().any(|a| name.ends_with(&format!(".{}", a.extension())))
    }

    fn describe(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|_| path.display().to_string());
        match parse_maven_path(&relative) {
            Ok(part) => part.to_string(),
            Err(_) => relative,
        }
    }
}
