// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    marker::PhantomData,
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use crate::{
    config::{CollectionConfig, StoreConfig},
    error::StoreError,
    feed::ChangeFeed,
};

pub type Revision = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvOperation {
    Put,
    Delete,
}

/// One stored value, or one mutation when it travels through a watch.
#[derive(Debug, Clone)]
pub struct KvEntry {
    pub key: String,
    pub value: Arc<Vec<u8>>,
    pub revision: Revision,
    pub operation: KvOperation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFilter {
    All,
    Key(String),
}

impl KeyFilter {
    pub fn key(key: impl Into<String>) -> Self {
        KeyFilter::Key(key.into())
    }

    /// `"*"` subscribes to the whole collection.
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            KeyFilter::All
        } else {
            KeyFilter::Key(pattern.to_string())
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyFilter::All => true,
            KeyFilter::Key(expected) => expected == key,
        }
    }
}

#[derive(Debug, Clone)]
pub enum WatchItem {
    Entry(KvEntry),
    EndOfHistory,
}

/// Raw watch over one bucket: the entries that existed when it was opened,
/// one `EndOfHistory` marker, then every later matching mutation.
pub struct RawWatch {
    collection: String,
    filter: KeyFilter,
    history: VecDeque<KvEntry>,
    history_pending: bool,
    live: broadcast::Receiver<KvEntry>,
}

impl RawWatch {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Cancel safe: an item is only consumed when this returns.
    pub async fn next(&mut self) -> Result<Option<WatchItem>, StoreError> {
        if let Some(entry) = self.history.pop_front() {
            return Ok(Some(WatchItem::Entry(entry)));
        }

        if self.history_pending {
            self.history_pending = false;
            return Ok(Some(WatchItem::EndOfHistory));
        }

        loop {
            match self.live.recv().await {
                Ok(entry) if self.filter.matches(&entry.key) => {
                    return Ok(Some(WatchItem::Entry(entry)));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Err(StoreError::Lagged {
                        collection: self.collection.clone(),
                        skipped,
                    });
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}

/// Versioned key-value medium behind a single collection.
#[async_trait]
pub trait KvBucket: Send + Sync {
    fn name(&self) -> &str;
    async fn get(&self, key: &str) -> Result<KvEntry, StoreError>;
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<Revision, StoreError>;
    async fn update(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: Revision,
    ) -> Result<Revision, StoreError>;
    async fn delete(&self, key: &str) -> Result<Revision, StoreError>;
    async fn keys(&self) -> Result<Vec<String>, StoreError>;
    async fn watch(&self, filter: KeyFilter) -> Result<RawWatch, StoreError>;
}

#[derive(Default)]
struct BucketState {
    entries: BTreeMap<String, StoredValue>,
    last_revision: Revision,
}

struct StoredValue {
    value: Arc<Vec<u8>>,
    revision: Revision,
}

/// In-process bucket. Writes take the lock, bump the revision and publish
/// the mutation before releasing it, so watchers see revision order.
pub struct MemoryBucket {
    name: String,
    config: CollectionConfig,
    state: RwLock<BucketState>,
    events: broadcast::Sender<KvEntry>,
}

impl MemoryBucket {
    pub fn new(name: impl Into<String>, config: CollectionConfig, feed_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(feed_capacity.max(1));
        Self {
            name: name.into(),
            config,
            state: RwLock::new(BucketState::default()),
            events,
        }
    }

    fn not_found(&self, key: &str) -> StoreError {
        StoreError::NotFound {
            collection: self.name.clone(),
            key: key.to_string(),
        }
    }

    fn store_locked(
        &self,
        state: &mut BucketState,
        key: &str,
        value: Vec<u8>,
    ) -> Result<Revision, StoreError> {
        if let Some(max_entries) = self.config.max_entries
            && !state.entries.contains_key(key)
            && state.entries.len() >= max_entries
        {
            return Err(StoreError::CapacityExceeded {
                collection: self.name.clone(),
                max_entries,
            });
        }

        state.last_revision += 1;
        let revision = state.last_revision;
        let value = Arc::new(value);
        state.entries.insert(
            key.to_string(),
            StoredValue {
                value: value.clone(),
                revision,
            },
        );

        // No receivers is fine; nobody is watching yet.
        let _ = self.events.send(KvEntry {
            key: key.to_string(),
            value,
            revision,
            operation: KvOperation::Put,
        });
        Ok(revision)
    }
}

#[async_trait]
impl KvBucket for MemoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<KvEntry, StoreError> {
        let state = self.state.read().await;
        state
            .entries
            .get(key)
            .map(|stored| KvEntry {
                key: key.to_string(),
                value: stored.value.clone(),
                revision: stored.revision,
                operation: KvOperation::Put,
            })
            .ok_or_else(|| self.not_found(key))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<Revision, StoreError> {
        let mut state = self.state.write().await;
        self.store_locked(&mut state, key, value)
    }

    async fn update(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: Revision,
    ) -> Result<Revision, StoreError> {
        let mut state = self.state.write().await;
        let actual = state
            .entries
            .get(key)
            .map(|stored| stored.revision)
            .ok_or_else(|| self.not_found(key))?;

        if actual != expected {
            debug!(
                collection = %self.name,
                key = %key,
                expected,
                actual,
                "rejected update with stale revision"
            );
            return Err(StoreError::Conflict {
                collection: self.name.clone(),
                key: key.to_string(),
                expected,
                actual,
            });
        }

        self.store_locked(&mut state, key, value)
    }

    async fn delete(&self, key: &str) -> Result<Revision, StoreError> {
        let mut state = self.state.write().await;
        if state.entries.remove(key).is_none() {
            return Err(self.not_found(key));
        }

        state.last_revision += 1;
        let revision = state.last_revision;
        let _ = self.events.send(KvEntry {
            key: key.to_string(),
            value: Arc::new(Vec::new()),
            revision,
            operation: KvOperation::Delete,
        });
        Ok(revision)
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let state = self.state.read().await;
        Ok(state.entries.keys().cloned().collect())
    }

    async fn watch(&self, filter: KeyFilter) -> Result<RawWatch, StoreError> {
        // Writers need the write lock, so snapshot and subscription line up
        // exactly: nothing is missed or repeated at the boundary.
        let state = self.state.read().await;
        let live = self.events.subscribe();
        let mut history: Vec<KvEntry> = state
            .entries
            .iter()
            .filter(|(key, _)| filter.matches(key))
            .map(|(key, stored)| KvEntry {
                key: key.clone(),
                value: stored.value.clone(),
                revision: stored.revision,
                operation: KvOperation::Put,
            })
            .collect();
        history.sort_by_key(|entry| entry.revision);

        Ok(RawWatch {
            collection: self.name.clone(),
            filter,
            history: history.into(),
            history_pending: true,
            live,
        })
    }
}

/// A decoded record together with the revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry<T> {
    pub key: String,
    pub value: T,
    pub revision: Revision,
}

/// Typed view over one bucket; records travel as JSON.
pub struct Collection<T> {
    bucket: Arc<dyn KvBucket>,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            bucket: self.bucket.clone(),
            _record: PhantomData,
        }
    }
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new(bucket: Arc<dyn KvBucket>) -> Self {
        Self {
            bucket,
            _record: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        self.bucket.name()
    }

    pub async fn get(&self, key: &str) -> Result<Entry<T>, StoreError> {
        let entry = self.bucket.get(key).await?;
        let value = decode_record(self.name(), key, &entry.value)?;
        Ok(Entry {
            key: entry.key,
            value,
            revision: entry.revision,
        })
    }

    /// Unconditional write.
    pub async fn put(&self, key: &str, value: &T) -> Result<Revision, StoreError> {
        let bytes = self.encode(key, value)?;
        self.bucket.put(key, bytes).await
    }

    /// Writes only if `key` is still at `expected`; otherwise `Conflict`.
    pub async fn update_if_revision(
        &self,
        key: &str,
        value: &T,
        expected: Revision,
    ) -> Result<Revision, StoreError> {
        let bytes = self.encode(key, value)?;
        self.bucket.update(key, bytes, expected).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.bucket.delete(key).await.map(|_| ())
    }

    pub async fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.bucket.keys().await
    }

    pub async fn subscribe(&self, filter: KeyFilter) -> Result<ChangeFeed<T>, StoreError> {
        let watch = self.bucket.watch(filter).await?;
        Ok(ChangeFeed::new(watch))
    }

    fn encode(&self, key: &str, value: &T) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(value).map_err(|source| StoreError::Encode {
            collection: self.name().to_string(),
            key: key.to_string(),
            source,
        })
    }
}

pub(crate) fn decode_record<T: DeserializeOwned>(
    collection: &str,
    key: &str,
    bytes: &[u8],
) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|source| StoreError::Decode {
        collection: collection.to_string(),
        key: key.to_string(),
        source,
    })
}

/// Owns one bucket per logical collection.
#[derive(Clone)]
pub struct RecordStore {
    buckets: HashMap<String, Arc<dyn KvBucket>>,
}

impl RecordStore {
    pub fn in_memory(config: &StoreConfig) -> Self {
        let buckets = StoreConfig::collection_names()
            .into_iter()
            .map(|name| {
                let bucket: Arc<dyn KvBucket> = Arc::new(MemoryBucket::new(
                    name,
                    config.collection(name),
                    config.feed_capacity,
                ));
                (name.to_string(), bucket)
            })
            .collect();
        Self { buckets }
    }

    pub fn with_buckets(buckets: impl IntoIterator<Item = Arc<dyn KvBucket>>) -> Self {
        Self {
            buckets: buckets
                .into_iter()
                .map(|bucket| (bucket.name().to_string(), bucket))
                .collect(),
        }
    }

    pub fn collection<T>(&self, name: &str) -> Result<Collection<T>, StoreError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        self.buckets
            .get(name)
            .cloned()
            .map(Collection::new)
            .ok_or_else(|| StoreError::UnknownCollection(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    fn note(text: &str) -> Note {
        Note {
            text: text.to_string(),
        }
    }

    fn notes() -> Collection<Note> {
        Collection::new(Arc::new(MemoryBucket::new(
            "notes",
            CollectionConfig::default(),
            16,
        )))
    }

    #[tokio::test]
    async fn put_then_get_returns_value_and_revision() {
        let notes = notes();
        let revision = notes.put("a", &note("hello")).await.unwrap();

        let entry = notes.get("a").await.unwrap();
        assert_eq!(entry.value, note("hello"));
        assert_eq!(entry.revision, revision);
        assert_eq!(entry.key, "a");
    }

    #[tokio::test]
    async fn revisions_increase_across_keys() {
        let notes = notes();
        let first = notes.put("a", &note("1")).await.unwrap();
        let second = notes.put("b", &note("2")).await.unwrap();
        let third = notes.put("a", &note("3")).await.unwrap();
        assert!(first < second && second < third);
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let error = notes().get("missing").await.unwrap_err();
        assert!(matches!(error, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn update_with_stale_revision_conflicts() {
        let notes = notes();
        let first = notes.put("a", &note("v1")).await.unwrap();
        let second = notes.update_if_revision("a", &note("v2"), first).await.unwrap();

        let error = notes
            .update_if_revision("a", &note("v3"), first)
            .await
            .unwrap_err();
        match error {
            StoreError::Conflict {
                expected, actual, ..
            } => {
                assert_eq!(expected, first);
                assert_eq!(actual, second);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(notes.get("a").await.unwrap().value, note("v2"));
    }

    #[tokio::test]
    async fn update_of_deleted_key_is_not_found() {
        let notes = notes();
        let revision = notes.put("a", &note("v1")).await.unwrap();
        notes.delete("a").await.unwrap();

        let error = notes
            .update_if_revision("a", &note("v2"), revision)
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_missing_key_is_not_found() {
        let error = notes().delete("missing").await.unwrap_err();
        assert!(matches!(error, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn max_entries_limits_new_keys_only() {
        let limited: Collection<Note> = Collection::new(Arc::new(MemoryBucket::new(
            "limited",
            CollectionConfig {
                max_entries: Some(1),
                ..CollectionConfig::default()
            },
            16,
        )));
        limited.put("a", &note("1")).await.unwrap();
        limited.put("a", &note("2")).await.unwrap();

        let error = limited.put("b", &note("3")).await.unwrap_err();
        assert!(matches!(error, StoreError::CapacityExceeded { max_entries: 1, .. }));
    }

    #[tokio::test]
    async fn raw_watch_replays_then_marks_end_then_goes_live() {
        let bucket = MemoryBucket::new("notes", CollectionConfig::default(), 16);
        bucket.put("a", b"1".to_vec()).await.unwrap();
        bucket.put("b", b"2".to_vec()).await.unwrap();

        let mut watch = bucket.watch(KeyFilter::key("b")).await.unwrap();
        bucket.put("a", b"3".to_vec()).await.unwrap();
        bucket.put("b", b"4".to_vec()).await.unwrap();

        match watch.next().await.unwrap() {
            Some(WatchItem::Entry(entry)) => assert_eq!(entry.value.as_slice(), b"2"),
            other => panic!("expected history entry, got {other:?}"),
        }
        assert!(matches!(
            watch.next().await.unwrap(),
            Some(WatchItem::EndOfHistory)
        ));
        match watch.next().await.unwrap() {
            Some(WatchItem::Entry(entry)) => {
                assert_eq!(entry.key, "b");
                assert_eq!(entry.value.as_slice(), b"4");
            }
            other => panic!("expected live entry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_watcher_lags_without_blocking_writers() {
        let bucket = MemoryBucket::new("notes", CollectionConfig::default(), 2);
        let mut watch = bucket.watch(KeyFilter::All).await.unwrap();

        for i in 0..10 {
            bucket.put("a", vec![i]).await.unwrap();
        }

        assert!(matches!(
            watch.next().await.unwrap(),
            Some(WatchItem::EndOfHistory)
        ));
        match watch.next().await.unwrap_err() {
            StoreError::Lagged { skipped, .. } => assert!(skipped > 0),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn record_store_rejects_unknown_collection() {
        let store = RecordStore::in_memory(&StoreConfig::default());
        assert!(store.collection::<Note>("lobbies").is_ok());
        let error = store.collection::<Note>("scores").err().unwrap();
        assert!(matches!(error, StoreError::UnknownCollection(_)));
    }

    #[test]
    fn key_filter_star_means_all() {
        assert_eq!(KeyFilter::parse("*"), KeyFilter::All);
        assert!(KeyFilter::parse("abc").matches("abc"));
        assert!(!KeyFilter::parse("abc").matches("abd"));
    }
}
