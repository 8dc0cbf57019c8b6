//! error — типизированные ошибки хранилища закладок.
//!
//! NotFound — штатный исход get/update/delete по неизвестному id, его нужно
//! отличать от ошибок ввода-вывода. Остальной код (CLI, конфиг, старт) живёт на anyhow.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::record::BookmarkId;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Запрошенного id нет в коллекции.
    #[error("bookmark {0} not found")]
    NotFound(BookmarkId),

    /// Запись не прошла проверку на стороне вызывающего слоя.
    #[error("invalid bookmark: {0}")]
    Validation(String),

    /// Сбой файловой системы при записи снапшота или при первичной загрузке.
    #[error("{context}: {source}")]
    Persistence {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Файл снапшота есть и не пуст, но не декодируется в коллекцию.
    #[error("malformed snapshot {}: {reason}", path.display())]
    MalformedSnapshot { path: PathBuf, reason: String },
}

impl StoreError {
    pub(crate) fn persistence(context: impl Into<String>, source: io::Error) -> Self {
        StoreError::Persistence {
            context: context.into(),
            source,
        }
    }

    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
