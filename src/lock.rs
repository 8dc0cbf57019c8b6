//! File-based locking: one server process per backing file.
//!
//! Cross-platform (fs2) advisory lock:
//! - Exclusive: taken by the Coordinator at startup, held until it is dropped.
//!
//! Lock file path: <store_file>.lock (sibling of the backing file).
//! Lock is released on Drop.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

pub struct LockGuard {
    file: std::fs::File,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // fs2 unlock errors on drop are ignored deliberately.
        let _ = self.file.unlock();
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("path", &self.path).finish()
    }
}

pub fn lock_file_path(store_file: &Path) -> PathBuf {
    let mut name = store_file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "store".into());
    name.push(".lock");
    store_file.with_file_name(name)
}

/// Try to take the exclusive lock for `store_file`. Fails if another process holds it.
pub fn try_lock_store_file(store_file: &Path) -> Result<LockGuard> {
    let path = lock_file_path(store_file);
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&path)
        .with_context(|| format!("open lock file {}", path.display()))?;
    file.try_lock_exclusive().with_context(|| {
        format!(
            "store file {} is locked by another process ({})",
            store_file.display(),
            path.display()
        )
    })?;
    Ok(LockGuard { file, path })
}
