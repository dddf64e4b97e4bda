use std::{
    fs, io,
    path::{Component, Path, PathBuf},
};

use chrono::{DateTime, Local, Utc};
use core_model::{Error, RepairPlan, Result};
use serde::{Deserialize, Serialize};
use store_fs::FsStore;
use tracing::info;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub message_ids: Vec<String>,
    pub files: Vec<BackupEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEntry {
    /// Path relative to the storage root, mirrored under the backup dir.
    pub path: PathBuf,
    pub checksum: String,
}

#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub backup_dir: PathBuf,
    pub session_id: String,
    pub files: Vec<PathBuf>,
    pub dry_run: bool,
}

/// Creates `session_{id}_{YYYYMMDD_HHMMSS}` under `root`, appending `-N`
/// until the name is unused.
pub fn create_backup_dir(root: &Path, session_id: &str, now: DateTime<Local>) -> Result<PathBuf> {
    fs::create_dir_all(root).map_err(|e| Error::io(root, e))?;
    let base = format!("session_{session_id}_{}", now.format("%Y%m%d_%H%M%S"));
    for attempt in 0..1000 {
        let dir = if attempt == 0 {
            root.join(&base)
        } else {
            root.join(format!("{base}-{attempt}"))
        };
        match fs::create_dir(&dir) {
            Ok(()) => return Ok(dir),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(Error::io(&dir, e)),
        }
    }
    Err(Error::Io {
        path: root.join(base),
        source: io::Error::new(io::ErrorKind::AlreadyExists, "no free backup directory name"),
    })
}

/// Copies every planned file into `backup_dir`, verifies each copy, then
/// writes the manifest. Nothing under the storage root is modified.
pub fn write_backup(store: &FsStore, plan: &RepairPlan, backup_dir: &Path) -> Result<BackupManifest> {
    let mut files = Vec::new();
    for file in plan.files() {
        let rel = store.relative(&file.path).ok_or_else(|| Error::Io {
            path: file.path.clone(),
            source: io::Error::other("file lies outside the storage root"),
        })?;
        let original = store.read_raw(&file.path)?;
        let dest = backup_dir.join(rel);
        store.copy_tree(&file.path, &dest)?;
        let copied = fs::read(&dest).map_err(|e| Error::io(&dest, e))?;
        let checksum = blake3::hash(&original);
        if blake3::hash(&copied) != checksum {
            return Err(Error::Io {
                path: dest,
                source: io::Error::other("backup copy does not match the original"),
            });
        }
        files.push(BackupEntry {
            path: rel.to_path_buf(),
            checksum: checksum.to_hex().to_string(),
        });
    }

    let manifest = BackupManifest {
        session_id: plan.session_id.clone(),
        created_at: Utc::now(),
        message_ids: plan.message_ids(),
        files,
    };
    let path = backup_dir.join(MANIFEST_FILE);
    let bytes = serde_json::to_vec_pretty(&manifest).map_err(|e| Error::Io {
        path: path.clone(),
        source: io::Error::other(e),
    })?;
    fs::write(&path, bytes).map_err(|e| Error::io(&path, e))?;
    Ok(manifest)
}

pub fn read_manifest(backup_dir: &Path) -> Result<BackupManifest> {
    let path = backup_dir.join(MANIFEST_FILE);
    let bytes = fs::read(&path).map_err(|e| Error::io(&path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::malformed(&path, e))
}

/// Puts the files recorded in a backup back under the storage root.
///
/// Every entry is checked first (safe relative path, checksum, destination
/// free); any problem aborts before a single file is copied.
pub fn restore(store: &FsStore, backup_dir: &Path, dry_run: bool) -> Result<RestoreReport> {
    let manifest = read_manifest(backup_dir)?;
    let mut pending = Vec::with_capacity(manifest.files.len());
    for entry in &manifest.files {
        if entry.path.as_os_str().is_empty()
            || !entry
                .path
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(Error::malformed(
                backup_dir.join(MANIFEST_FILE),
                format!("unsafe path {}", entry.path.display()),
            ));
        }
        let src = backup_dir.join(&entry.path);
        let bytes = fs::read(&src).map_err(|e| Error::io(&src, e))?;
        if blake3::hash(&bytes).to_hex().to_string() != entry.checksum {
            return Err(Error::malformed(&src, "checksum does not match the manifest"));
        }
        let dst = store.root().join(&entry.path);
        if dst.exists() {
            return Err(Error::Io {
                path: dst,
                source: io::Error::new(io::ErrorKind::AlreadyExists, "refusing to overwrite"),
            });
        }
        pending.push((src, dst));
    }

    if !dry_run {
        for (src, dst) in &pending {
            store.copy_tree(src, dst)?;
        }
        info!(backup = %backup_dir.display(), files = pending.len(), "restored");
    }
    Ok(RestoreReport {
        backup_dir: backup_dir.to_path_buf(),
        session_id: manifest.session_id,
        files: pending.into_iter().map(|(_, dst)| dst).collect(),
        dry_run,
    })
}
