//! Bookmark record — the unit held by the store.
//!
//! The store itself never validates or timestamps records: the layer that
//! builds a record (HTTP routes, tests) calls `validate()` and sets the
//! timestamps before `Store::add` / `Store::update`.
//!
//! JSON keys follow the on-disk format: `url`, `name`, `description`, `tags`,
//! `created_at`, `updated_at`. `location` / `title` are accepted on input.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;

use crate::error::{StoreError, StoreResult};
use crate::util::now_secs;

/// Identifier assigned by the store. Starts at 1, never reused.
pub type BookmarkId = u64;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    /// URI of the bookmarked resource.
    #[serde(rename = "url", alias = "location", default, deserialize_with = "null_as_default")]
    pub location: String,

    /// Required, non-empty on creation.
    #[serde(rename = "name", alias = "title", default, deserialize_with = "null_as_default")]
    pub title: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,

    /// `null` в файле (пустой срез у старых записей) читается как [].
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,

    /// Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,

    /// Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
}

impl Bookmark {
    /// Build a fresh record: tags de-duplicated, both timestamps set to now.
    pub fn new(
        location: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        tags: Vec<String>,
    ) -> Self {
        let now = now_secs();
        Self {
            location: location.into(),
            title: title.into(),
            description: description.into(),
            tags: dedup_tags(tags),
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// Caller-side check before `add`/`update`.
    pub fn validate(&self) -> StoreResult<()> {
        if self.title.trim().is_empty() {
            return Err(StoreError::Validation("bookmark name is required".into()));
        }
        if self.location.chars().any(char::is_whitespace) {
            return Err(StoreError::Validation(format!(
                "bookmark url must not contain whitespace: {:?}",
                self.location
            )));
        }
        Ok(())
    }

    /// Normalise an incoming record: drop duplicate tags, fill missing timestamps.
    pub fn prepare_for_insert(&mut self) {
        self.tags = dedup_tags(std::mem::take(&mut self.tags));
        let now = now_secs();
        self.created_at.get_or_insert(now);
        self.updated_at.get_or_insert(now);
    }

    /// Normalise a replacement record; `created_at` is inherited from the
    /// stored version when the body omits it.
    pub fn prepare_for_update(&mut self, previous: &Bookmark) {
        self.tags = dedup_tags(std::mem::take(&mut self.tags));
        if self.created_at.is_none() {
            self.created_at = previous.created_at;
        }
        self.updated_at = Some(now_secs());
    }
}

fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Option::unwrap_or_default)
}

/// Remove duplicate tags keeping the first occurrence, order preserved.
pub fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(tags.len());
    let mut out = Vec::with_capacity(tags.len());
    for t in tags {
        if seen.insert(t.clone()) {
            out.push(t);
        }
    }
    out
}
