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

use crate::store::Revision;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{collection}/{key} not found")]
    NotFound { collection: String, key: String },

    #[error("{collection}/{key} changed: expected revision {expected}, found {actual}")]
    Conflict {
        collection: String,
        key: String,
        expected: Revision,
        actual: Revision,
    },

    #[error("{collection} is at its limit of {max_entries} entries")]
    CapacityExceeded {
        collection: String,
        max_entries: usize,
    },

    #[error("unknown collection {0}")]
    UnknownCollection(String),

    #[error("failed to encode {collection}/{key}")]
    Encode {
        collection: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode {collection}/{key}")]
    Decode {
        collection: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("watch on {collection} fell behind and lost {skipped} events")]
    Lagged { collection: String, skipped: u64 },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of a rejected lobby, board or user operation.
///
/// `Conflict` is the only variant that asks the caller to re-read and try
/// again; every other variant is final for the request that produced it.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("{collection}/{key} not found")]
    NotFound { collection: String, key: String },

    #[error("someone else got there first, reload and try again")]
    Conflict,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cell {0} is not on the board")]
    InvalidCell(usize),

    #[error("cell {0} is already taken")]
    CellOccupied(usize),

    #[error("not your turn")]
    NotYourTurn,

    #[error("game is already over")]
    GameOver,

    #[error("lobby is now full")]
    AlreadyFull,

    #[error("only the host can do that")]
    NotHost,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for GameError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { collection, key } => GameError::NotFound { collection, key },
            StoreError::Conflict { .. } => GameError::Conflict,
            other => GameError::StoreUnavailable(format!("{other:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflict_maps_to_retryable_conflict() {
        let error = GameError::from(StoreError::Conflict {
            collection: "boards".to_string(),
            key: "g1".to_string(),
            expected: 3,
            actual: 4,
        });
        assert!(matches!(error, GameError::Conflict));
    }

    #[test]
    fn infrastructure_errors_map_to_store_unavailable() {
        let error = GameError::from(StoreError::Lagged {
            collection: "lobbies".to_string(),
            skipped: 7,
        });
        match error {
            GameError::StoreUnavailable(message) => assert!(message.contains("lost 7 events")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn not_found_keeps_collection_and_key() {
        let error = GameError::from(StoreError::NotFound {
            collection: "users".to_string(),
            key: "s1".to_string(),
        });
        assert_eq!(error.to_string(), "users/s1 not found");
    }
}
