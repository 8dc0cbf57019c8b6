//! store/persist — формат файла снапшота и протокол атомарной записи.
//!
//! Формат: один JSON-объект
//!   {"bookmarks": {"<id>": {...}, ...}, "idx_counter": <u64>}
//!
//! Запись (вызывается под write-lock хранилища):
//! 1) состояние уже сериализовано в буфер;
//! 2) буфер пишется в свежий tmp-файл в том же каталоге (create_new);
//! 3) fsync + close tmp;
//! 4) rename tmp -> target (+ fsync каталога best-effort).
//!
//! Windows не умеет rename поверх существующего файла: там target сначала
//! удаляется. Между remove и rename файла нет — это известное ограничение.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use log::warn;

use super::{Collection, MAX_ID_COUNTER};
use crate::error::{StoreError, StoreResult};

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Прочитать коллекцию из backing-файла.
/// Нет файла или файл пуст -> пустая коллекция со счётчиком 0.
pub(crate) fn load_collection(path: &Path) -> StoreResult<Collection> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Collection::default()),
        Err(e) => {
            return Err(StoreError::persistence(
                format!("read snapshot {}", path.display()),
                e,
            ))
        }
    };
    decode_collection(path, &bytes)
}

pub(crate) fn decode_collection(path: &Path, bytes: &[u8]) -> StoreResult<Collection> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Collection::default());
    }

    let coll: Collection =
        serde_json::from_slice(bytes).map_err(|e| StoreError::MalformedSnapshot {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if coll.id_counter > MAX_ID_COUNTER {
        return Err(StoreError::MalformedSnapshot {
            path: path.to_path_buf(),
            reason: format!(
                "idx_counter {} exceeds {}",
                coll.id_counter, MAX_ID_COUNTER
            ),
        });
    }

    // Счётчик обязан покрывать все выданные id, иначе add() выдаст повтор.
    if let Some((&max_id, _)) = coll.records.iter().next_back() {
        if max_id > coll.id_counter {
            return Err(StoreError::MalformedSnapshot {
                path: path.to_path_buf(),
                reason: format!(
                    "record id {} exceeds idx_counter {}",
                    max_id, coll.id_counter
                ),
            });
        }
    }
    Ok(coll)
}

pub(crate) fn encode_collection(coll: &Collection) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(coll)
        .map_err(|e| StoreError::persistence("serialize snapshot", io::Error::other(e)))
}

/// Атомарно заменить `path` содержимым `bytes`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let tmp = tmp_path_for(path);

    if let Err(e) = write_tmp(&tmp, bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    if let Err(e) = replace_target(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    if let Err(e) = fsync_parent_dir(path) {
        warn!("snapshot: fsync parent of {} failed: {}", path.display(), e);
    }
    Ok(())
}

fn write_tmp(tmp: &Path, bytes: &[u8]) -> StoreResult<()> {
    let mut f = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(tmp)
        .map_err(|e| StoreError::persistence(format!("create {}", tmp.display()), e))?;
    f.write_all(bytes)
        .map_err(|e| StoreError::persistence(format!("write {}", tmp.display()), e))?;
    f.sync_all()
        .map_err(|e| StoreError::persistence(format!("fsync {}", tmp.display()), e))?;
    // close
    drop(f);
    Ok(())
}

#[cfg(not(windows))]
fn replace_target(tmp: &Path, path: &Path) -> StoreResult<()> {
    fs::rename(tmp, path).map_err(|e| {
        StoreError::persistence(
            format!("rename {} -> {}", tmp.display(), path.display()),
            e,
        )
    })
}

#[cfg(windows)]
fn replace_target(tmp: &Path, path: &Path) -> StoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(StoreError::persistence(
                format!("remove {}", path.display()),
                e,
            ))
        }
    }
    fs::rename(tmp, path).map_err(|e| {
        StoreError::persistence(
            format!("rename {} -> {}", tmp.display(), path.display()),
            e,
        )
    })
}

/// `.<file>.<pid>.<nanos>-<seq>.tmp` рядом с target.
fn tmp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(".{}.{}.{}-{}.tmp", name, std::process::id(), nanos, seq);
    path.with_file_name(tmp_name)
}

pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

// Best-effort fsync parent directory after rename (Unix only).
#[cfg(unix)]
fn fsync_parent_dir(p: &Path) -> io::Result<()> {
    let dir = fs::File::open(parent_dir(p))?;
    dir.sync_all()
}
#[cfg(not(unix))]
fn fsync_parent_dir(_p: &Path) -> io::Result<()> {
    Ok(())
}
