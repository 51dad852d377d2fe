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

pub mod board;
pub mod config;
pub mod error;
pub mod feed;
pub mod lobby;
pub mod mux;
pub mod store;
pub mod users;

#[cfg(test)]
mod testing;

pub use board::BoardManager;
pub use config::{StoreConfig, load_store_config};
pub use error::{GameError, StoreError};
pub use feed::{Change, ChangeFeed, FeedPhase, FeedUpdate};
pub use lobby::{JoinOutcome, LobbyManager};
pub use mux::{
    BoardView, ClientUpdate, ConnectionEnd, DashboardUpdate, Delivery, FeedMux, LobbyListItem,
    LobbyView, StateUpdate,
};
pub use store::{Collection, Entry, KeyFilter, RecordStore, Revision};
pub use users::UserDirectory;

use tictactoe_common::{BOARDS_COLLECTION, LOBBIES_COLLECTION, USERS_COLLECTION};

/// Every manager wired to the same record store.
#[derive(Clone)]
pub struct GameSync {
    pub store: RecordStore,
    pub lobbies: LobbyManager,
    pub boards: BoardManager,
    pub users: UserDirectory,
    pub feeds: FeedMux,
}

impl GameSync {
    pub fn new(store: RecordStore) -> Result<Self, StoreError> {
        let lobbies = store.collection(LOBBIES_COLLECTION)?;
        let boards = store.collection(BOARDS_COLLECTION)?;
        let users = store.collection(USERS_COLLECTION)?;

        let lobby_manager = LobbyManager::new(lobbies.clone(), boards.clone());
        Ok(Self {
            boards: BoardManager::new(boards.clone(), lobbies.clone()),
            users: UserDirectory::new(users, lobby_manager.clone()),
            feeds: FeedMux::new(lobbies, boards),
            lobbies: lobby_manager,
            store,
        })
    }

    pub fn in_memory(config: &StoreConfig) -> Result<Self, StoreError> {
        Self::new(RecordStore::in_memory(config))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::KvBucket;

    #[test]
    fn store_without_game_collections_is_rejected() {
        let error = GameSync::new(RecordStore::with_buckets(Vec::<Arc<dyn KvBucket>>::new()))
            .err()
            .unwrap();
        assert!(matches!(error, StoreError::UnknownCollection(name) if name == LOBBIES_COLLECTION));
    }
}
