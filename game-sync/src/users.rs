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

use tictactoe_common::User;
use tracing::info;

use crate::{
    error::{GameError, StoreError},
    lobby::LobbyManager,
    store::Collection,
};

/// Users keyed by session id.
#[derive(Clone)]
pub struct UserDirectory {
    users: Collection<User>,
    lobbies: LobbyManager,
}

impl UserDirectory {
    pub fn new(users: Collection<User>, lobbies: LobbyManager) -> Self {
        Self { users, lobbies }
    }

    pub async fn login(&self, session_id: &str, name: &str) -> Result<User, GameError> {
        let name = name.trim();
        if session_id.is_empty() {
            return Err(GameError::InvalidInput("session id is empty".to_string()));
        }
        if name.is_empty() {
            return Err(GameError::InvalidInput("name is required".to_string()));
        }

        let user = User {
            session_id: session_id.to_string(),
            name: name.to_string(),
        };
        self.users.put(session_id, &user).await?;
        info!(session_id = %session_id, name = %user.name, "user logged in");
        Ok(user)
    }

    pub async fn get(&self, session_id: &str) -> Result<User, GameError> {
        if session_id.is_empty() {
            return Err(GameError::InvalidInput("session id is empty".to_string()));
        }
        Ok(self.users.get(session_id).await?.value)
    }

    /// Deletes every lobby the session hosts, then the user itself.
    /// Returns the number of lobbies removed.
    pub async fn logout(&self, session_id: &str) -> Result<usize, GameError> {
        if session_id.is_empty() {
            return Ok(0);
        }

        let swept = self.lobbies.delete_hosted_by(session_id).await?;
        match self.users.delete(session_id).await {
            Ok(()) | Err(StoreError::NotFound { .. }) => {}
            Err(error) => return Err(error.into()),
        }
        info!(session_id = %session_id, swept, "user logged out");
        Ok(swept)
    }
}
