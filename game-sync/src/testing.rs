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

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;

use crate::{
    GameSync,
    config::StoreConfig,
    error::StoreError,
    store::{KeyFilter, KvBucket, KvEntry, MemoryBucket, RawWatch, RecordStore, Revision},
};

/// Bucket whose next `get` of an armed key returns the value it read, but
/// only after a competing write to that key has landed.
pub(crate) struct InterleavingBucket {
    inner: MemoryBucket,
    competing: Mutex<Option<(String, Vec<u8>)>>,
}

impl InterleavingBucket {
    fn new(name: &str, config: &StoreConfig) -> Self {
        Self {
            inner: MemoryBucket::new(name, config.collection(name), config.feed_capacity),
            competing: Mutex::new(None),
        }
    }

    pub(crate) fn arm<T: Serialize>(&self, key: &str, value: &T) {
        let bytes = serde_json::to_vec(value).unwrap();
        *self.competing.lock().unwrap() = Some((key.to_string(), bytes));
    }

    fn take_competing(&self, key: &str) -> Option<Vec<u8>> {
        let mut competing = self.competing.lock().unwrap();
        match competing.take() {
            Some((armed, bytes)) if armed == key => Some(bytes),
            other => {
                *competing = other;
                None
            }
        }
    }
}

#[async_trait]
impl KvBucket for InterleavingBucket {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, key: &str) -> Result<KvEntry, StoreError> {
        let entry = self.inner.get(key).await?;
        if let Some(bytes) = self.take_competing(key) {
            self.inner.put(key, bytes).await?;
        }
        Ok(entry)
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<Revision, StoreError> {
        self.inner.put(key, value).await
    }

    async fn update(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: Revision,
    ) -> Result<Revision, StoreError> {
        self.inner.update(key, value, expected).await
    }

    async fn delete(&self, key: &str) -> Result<Revision, StoreError> {
        self.inner.delete(key).await
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.inner.keys().await
    }

    async fn watch(&self, filter: KeyFilter) -> Result<RawWatch, StoreError> {
        self.inner.watch(filter).await
    }
}

/// In-memory game state where the collection named `interleaved` goes
/// through an [`InterleavingBucket`].
pub(crate) fn interleaved_sync(interleaved: &str) -> (GameSync, Arc<InterleavingBucket>) {
    let config = StoreConfig::default();
    let racing = Arc::new(InterleavingBucket::new(interleaved, &config));
    let buckets = StoreConfig::collection_names().into_iter().map(|name| {
        if name == interleaved {
            racing.clone() as Arc<dyn KvBucket>
        } else {
            Arc::new(MemoryBucket::new(name, config.collection(name), config.feed_capacity))
                as Arc<dyn KvBucket>
        }
    });
    let sync = GameSync::new(RecordStore::with_buckets(buckets)).unwrap();
    (sync, racing)
}
