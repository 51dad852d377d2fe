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

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::{
    error::StoreError,
    store::{KvEntry, KvOperation, RawWatch, Revision, WatchItem, decode_record},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Change<T> {
    Put {
        key: String,
        value: T,
        revision: Revision,
    },
    Remove {
        key: String,
        revision: Revision,
    },
}

impl<T> Change<T> {
    pub fn key(&self) -> &str {
        match self {
            Change::Put { key, .. } | Change::Remove { key, .. } => key,
        }
    }

    pub fn revision(&self) -> Revision {
        match self {
            Change::Put { revision, .. } | Change::Remove { revision, .. } => *revision,
        }
    }
}

/// What a consumer hands out: the whole history once, then single changes.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate<T> {
    Replayed(Vec<Change<T>>),
    Live(Change<T>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedPhase {
    Replaying,
    Live,
    Closed,
}

/// Typed consumer over a raw watch.
///
/// Everything read before the end-of-history marker is held back and handed
/// out as one `Replayed` batch; everything after it comes out one `Live`
/// change at a time, in arrival order. A lagging or undecodable watch closes
/// the feed with an error instead of skipping ahead.
pub struct ChangeFeed<T> {
    collection: String,
    watch: Option<RawWatch>,
    phase: FeedPhase,
    backlog: Vec<Change<T>>,
    _record: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> ChangeFeed<T> {
    pub fn new(watch: RawWatch) -> Self {
        Self {
            collection: watch.collection().to_string(),
            watch: Some(watch),
            phase: FeedPhase::Replaying,
            backlog: Vec::new(),
            _record: PhantomData,
        }
    }

    pub fn phase(&self) -> FeedPhase {
        self.phase
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Releases the underlying subscription. Idempotent.
    pub fn stop(&mut self) {
        if self.phase != FeedPhase::Closed {
            debug!(collection = %self.collection, "change feed stopped");
        }
        self.close();
    }

    /// `Ok(None)` once the feed is closed, forever after.
    pub async fn next(&mut self) -> Result<Option<FeedUpdate<T>>, StoreError> {
        loop {
            let Some(watch) = self.watch.as_mut() else {
                return Ok(None);
            };

            let item = match watch.next().await {
                Ok(Some(item)) => item,
                Ok(None) => {
                    debug!(collection = %self.collection, "change feed source ended");
                    self.close();
                    return Ok(None);
                }
                Err(error) => {
                    warn!(
                        collection = %self.collection,
                        error = %error,
                        "change feed terminated"
                    );
                    self.close();
                    return Err(error);
                }
            };

            match item {
                WatchItem::EndOfHistory => {
                    if self.phase != FeedPhase::Replaying {
                        continue;
                    }
                    self.phase = FeedPhase::Live;
                    let batch = std::mem::take(&mut self.backlog);
                    debug!(
                        collection = %self.collection,
                        historical = batch.len(),
                        "end of historical updates, now receiving live updates"
                    );
                    return Ok(Some(FeedUpdate::Replayed(batch)));
                }
                WatchItem::Entry(entry) => {
                    let change = match self.decode(entry) {
                        Ok(change) => change,
                        Err(error) => {
                            warn!(
                                collection = %self.collection,
                                error = %error,
                                "change feed terminated on undecodable record"
                            );
                            self.close();
                            return Err(error);
                        }
                    };

                    match self.phase {
                        FeedPhase::Replaying => self.backlog.push(change),
                        FeedPhase::Live => return Ok(Some(FeedUpdate::Live(change))),
                        FeedPhase::Closed => return Ok(None),
                    }
                }
            }
        }
    }

    fn decode(&self, entry: KvEntry) -> Result<Change<T>, StoreError> {
        match entry.operation {
            KvOperation::Put => Ok(Change::Put {
                value: decode_record(&self.collection, &entry.key, &entry.value)?,
                key: entry.key,
                revision: entry.revision,
            }),
            KvOperation::Delete => Ok(Change::Remove {
                key: entry.key,
                revision: entry.revision,
            }),
        }
    }

    fn close(&mut self) {
        self.phase = FeedPhase::Closed;
        self.backlog.clear();
        self.watch = None;
    }
}

/// Latest value for one key out of a replayed batch, if it still exists.
pub fn latest_value<T>(batch: Vec<Change<T>>) -> Option<T> {
    batch
        .into_iter()
        .fold(None, |latest, change| match change {
            Change::Put { value, .. } => Some(value),
            Change::Remove { .. } => None,
        })
}
