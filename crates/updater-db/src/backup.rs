use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use updater_domain::{Backup, BackupFormat, DbConfig, RestoreResult};

use crate::error::DbError;
use crate::tool::DbBackupTool;

/// A freshly created backup: parsed metadata, the on-disk path, and the
/// SHA-256 of the file contents.
#[derive(Debug, Clone)]
pub struct CreatedBackup {
    pub backup: Backup,
    pub path: PathBuf,
    pub sha256: String,
}

/// Creates, lists, prunes, verifies, and restores database backups in a
/// single directory. Filenames are the only metadata store: listing is
/// always a directory scan, never an index lookup.
pub struct BackupManager {
    tool: Arc<dyn DbBackupTool>,
    backup_dir: PathBuf,
    timeout: Duration,
}

impl BackupManager {
    pub fn new(tool: Arc<dyn DbBackupTool>, backup_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        BackupManager { tool, backup_dir: backup_dir.into(), timeout }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Take a backup in pg_dump custom format. The file is named from the
    /// UTC creation time and the sanitized version pair; a partial file left
    /// by a failed or empty dump is deleted before the error surfaces.
    pub async fn create(
        &self,
        cfg: &DbConfig,
        container: Option<&str>,
        from_version: &str,
        to_version: &str,
    ) -> Result<CreatedBackup, DbError> {
        tokio::fs::create_dir_all(&self.backup_dir).await?;

        let now = Utc::now();
        let format = BackupFormat::Dump;
        let file_name = Backup::build_file_name(now, from_version, to_version, format);
        let path = self.backup_dir.join(&file_name);

        info!(file = %file_name, container = ?container, "creating database backup");
        if let Err(e) = self
            .tool
            .dump(cfg, &path, format, container, self.timeout)
            .await
        {
            remove_partial(&path).await;
            return Err(e);
        }

        let size = tokio::fs::metadata(&path).await?.len();
        if size == 0 {
            remove_partial(&path).await;
            return Err(DbError::EmptyBackup(path.display().to_string()));
        }

        let sha256 = sha256_file(&path).await?;
        let mut backup = Backup::parse_file_name(&file_name)
            .map_err(|e| DbError::InvalidOutput(e.to_string()))?;
        backup.size_bytes = size;

        info!(file = %file_name, size, "backup created");
        Ok(CreatedBackup { backup, path, sha256 })
    }

    /// Scan the backup directory, newest first. Only files matching the
    /// backup naming convention are returned; anything else in the directory
    /// is ignored.
    pub async fn list(&self) -> Result<Vec<Backup>, DbError> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&self.backup_dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(mut backup) = Backup::parse_file_name(&name) else { continue };
            let meta = entry.metadata().await?;
            backup.size_bytes = meta.len();
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push((backup, modified));
        }

        // Newest first: parsed timestamp, then modtime, then filename.
        entries.sort_by(|(a, am), (b, bm)| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| bm.cmp(am))
                .then_with(|| b.file_name.cmp(&a.file_name))
        });
        Ok(entries.into_iter().map(|(b, _)| b).collect())
    }

    /// Delete all but the `retention` newest backups. Returns the deleted
    /// filenames; retaining at least one backup is mandatory.
    pub async fn prune(&self, retention: u32) -> Result<Vec<String>, DbError> {
        if retention < 1 {
            return Err(DbError::InvalidRetention(retention));
        }

        let backups = self.list().await?;
        if backups.len() <= retention as usize {
            return Ok(Vec::new());
        }

        let mut deleted = Vec::new();
        for backup in &backups[retention as usize..] {
            let path = self.backup_dir.join(&backup.file_name);
            tokio::fs::remove_file(&path).await?;
            info!(file = %backup.file_name, "pruned old backup");
            deleted.push(backup.file_name.clone());
        }
        Ok(deleted)
    }

    /// Restore a backup file. Requires the explicit confirmation flag; the
    /// format comes from the file extension.
    pub async fn restore(
        &self,
        path: &Path,
        cfg: &DbConfig,
        container: Option<&str>,
        confirmed: bool,
    ) -> Result<RestoreResult, DbError> {
        if !confirmed {
            return Err(DbError::ConfirmationRequired);
        }

        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(BackupFormat::from_extension)
            .ok_or_else(|| DbError::InvalidFormat(path.display().to_string()))?;

        verify_file(path)?;

        info!(file = %path.display(), ?format, "restoring database backup");
        self.tool
            .restore(cfg, path, format, container, self.timeout)
            .await?;

        let (from_version, to_version) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| Backup::parse_file_name(n).ok())
            .map(|b| (b.from_version, b.to_version))
            .unwrap_or_else(|| ("unknown".to_string(), "unknown".to_string()));
        let needs_recovery = from_version != "unknown" && to_version != "unknown";

        Ok(RestoreResult { db_restored: true, from_version, to_version, needs_recovery })
    }
}

/// A usable backup file exists and is non-empty. Returns its size.
pub fn verify_file(path: &Path) -> Result<u64, DbError> {
    let meta = std::fs::metadata(path)?;
    if meta.len() == 0 {
        return Err(DbError::EmptyBackup(path.display().to_string()));
    }
    Ok(meta.len())
}

/// SHA-256 hex digest of a file's contents.
pub async fn sha256_file(path: &Path) -> Result<String, DbError> {
    let content = tokio::fs::read(path).await?;
    Ok(format!("{:x}", Sha256::digest(&content)))
}

async fn remove_partial(path: &Path) {
    if tokio::fs::metadata(path).await.is_ok() {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(file = %path.display(), error = %e, "could not remove partial backup");
        }
    }
}
