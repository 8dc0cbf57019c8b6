//! store/core — операции над коллекцией.
//!
//! Один RwLock на всё состояние:
//! - get/list — read-lock, читатели идут параллельно;
//! - add/update/delete/snapshot — write-lock, исключают всех.
//!
//! snapshot() держит write-lock и на время файлового I/O: это короткая
//! пауза для остальных операций, зато два снапшота никогда не пишут
//! одновременно и файл всегда отражает одно состояние.

use log::{debug, error, info};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::persist::{encode_collection, load_collection, write_atomic};
use super::Collection;
use crate::error::{StoreError, StoreResult};
use crate::metrics;
use crate::record::{Bookmark, BookmarkId};

pub struct Store {
    path: PathBuf,
    state: RwLock<Collection>,
    snapshots_written: AtomicU64,
}

impl Store {
    /// Построить Store из backing-файла (синхронная загрузка).
    ///
    /// Файла нет или он пуст — пустая коллекция, счётчик 0.
    /// Непарсящийся файл — `MalformedSnapshot`, дальше стартовать нельзя.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let coll = load_collection(&path)?;
        info!(
            "store loaded: file={}, records={}, idx_counter={}",
            path.display(),
            coll.records.len(),
            coll.id_counter
        );
        Ok(Self {
            path,
            state: RwLock::new(coll),
            snapshots_written: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, id: BookmarkId) -> StoreResult<Bookmark> {
        self.read()
            .records
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    /// Копия всей коллекции. Изменения после возврата в неё не попадут,
    /// а её изменения не трогают хранилище.
    pub fn list(&self) -> BTreeMap<BookmarkId, Bookmark> {
        self.read().records.clone()
    }

    /// Выдать следующий id (`idx_counter + 1`), вставить запись, вернуть id.
    /// Проверка записи — забота вызывающего.
    pub fn add(&self, bookmark: Bookmark) -> BookmarkId {
        let mut st = self.write();
        // загруженный счётчик <= MAX_ID_COUNTER, до u64::MAX не дойти
        st.id_counter += 1;
        let id = st.id_counter;
        st.records.insert(id, bookmark);
        id
    }

    /// Заменить запись по id. id и счётчик не меняются.
    pub fn update(&self, id: BookmarkId, bookmark: Bookmark) -> StoreResult<()> {
        let mut st = self.write();
        match st.records.get_mut(&id) {
            Some(slot) => {
                *slot = bookmark;
                Ok(())
            }
            None => Err(StoreError::NotFound(id)),
        }
    }

    /// Удалить запись. id больше никогда не будет выдан.
    pub fn delete(&self, id: BookmarkId) -> StoreResult<()> {
        let mut st = self.write();
        if st.records.remove(&id).is_none() {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// Записать всю коллекцию и счётчик в backing-файл. Возвращает размер снапшота.
    ///
    /// При ошибке состояние в памяти не меняется, а файл на диске остаётся прежним.
    pub fn snapshot(&self) -> StoreResult<usize> {
        let st = self.write();
        let res = encode_collection(&st).and_then(|bytes| {
            write_atomic(&self.path, &bytes)?;
            Ok(bytes.len())
        });
        let records = st.records.len();
        drop(st);

        match &res {
            Ok(n) => {
                self.snapshots_written.fetch_add(1, Ordering::Relaxed);
                metrics::record_snapshot(*n as u64);
                debug!(
                    "snapshot saved: file={}, records={}, bytes={}",
                    self.path.display(),
                    records,
                    n
                );
            }
            Err(e) => {
                metrics::record_snapshot_failure();
                error!("snapshot failed: file={}: {}", self.path.display(), e);
            }
        }
        res
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn id_counter(&self) -> BookmarkId {
        self.read().id_counter
    }

    /// Сколько снапшотов этот экземпляр успешно записал.
    pub fn snapshots_written(&self) -> u64 {
        self.snapshots_written.load(Ordering::Relaxed)
    }

    // Секции под локом никогда не оставляют коллекцию наполовину изменённой,
    // поэтому poisoned-лок безопасно подхватывать.
    fn read(&self) -> RwLockReadGuard<'_, Collection> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Collection> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.read();
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("records", &st.records.len())
            .field("id_counter", &st.id_counter)
            .finish()
    }
}
