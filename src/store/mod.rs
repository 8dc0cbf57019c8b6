//! store — единственный владелец коллекции закладок.
//!
//! core    — Store: get/list/add/update/delete/snapshot под одним RwLock.
//! persist — формат backing-файла и атомарная запись tmp+rename.

mod core;
mod persist;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::record::{Bookmark, BookmarkId};

pub use self::core::Store;

/// Верхняя граница `idx_counter` в файле (int64 исходного формата).
/// Выше неё файл считается битым, поэтому `add` не может переполнить u64.
pub const MAX_ID_COUNTER: BookmarkId = i64::MAX as BookmarkId;

/// Полное состояние хранилища: записи + счётчик выданных id.
/// Именно эта структура сериализуется в снапшот.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    #[serde(rename = "bookmarks", default)]
    pub records: BTreeMap<BookmarkId, Bookmark>,

    /// Наибольший когда-либо выданный id; только растёт.
    #[serde(rename = "idx_counter", default)]
    pub id_counter: BookmarkId,
}

/// Прочитать снапшот без открытия Store (для `quivermarks inspect`).
pub fn read_snapshot(path: &std::path::Path) -> crate::error::StoreResult<Collection> {
    persist::load_collection(path)
}
