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

use tictactoe_common::{GameBoard, GameLobby, User, new_game_id};
use tracing::{debug, info, warn};

use crate::{
    error::{GameError, StoreError},
    store::{Collection, Entry},
};

/// How a successful join was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The caller took the free challenger seat.
    Joined(GameLobby),
    /// The host opened their own lobby; nothing was written.
    Host(GameLobby),
    /// The caller already holds the challenger seat; nothing was written.
    AlreadySeated(GameLobby),
}

impl JoinOutcome {
    pub fn lobby(&self) -> &GameLobby {
        match self {
            JoinOutcome::Joined(lobby)
            | JoinOutcome::Host(lobby)
            | JoinOutcome::AlreadySeated(lobby) => lobby,
        }
    }
}

#[derive(Clone)]
pub struct LobbyManager {
    lobbies: Collection<GameLobby>,
    boards: Collection<GameBoard>,
}

impl LobbyManager {
    pub fn new(lobbies: Collection<GameLobby>, boards: Collection<GameBoard>) -> Self {
        Self { lobbies, boards }
    }

    pub async fn get(&self, lobby_id: &str) -> Result<GameLobby, GameError> {
        Ok(self.lobbies.get(non_empty_id(lobby_id)?).await?.value)
    }

    pub async fn list(&self) -> Result<Vec<GameLobby>, GameError> {
        let mut lobbies = Vec::new();
        for key in self.lobbies.keys().await? {
            match self.lobbies.get(&key).await {
                Ok(entry) => lobbies.push(entry.value),
                // Deleted between listing and reading.
                Err(StoreError::NotFound { .. }) => continue,
                Err(error) => return Err(error.into()),
            }
        }
        Ok(lobbies)
    }

    /// Writes a new lobby and its empty board under one fresh id.
    pub async fn create(&self, host: &User) -> Result<GameLobby, GameError> {
        if host.session_id.is_empty() {
            return Err(GameError::InvalidInput("host session id is empty".to_string()));
        }

        let game_id = new_game_id();
        let lobby = GameLobby::new(game_id.clone(), host);
        self.lobbies.put(&game_id, &lobby).await?;

        if let Err(error) = self.boards.put(&game_id, &GameBoard::new(game_id.clone())).await {
            if let Err(cleanup_error) = self.lobbies.delete(&game_id).await {
                warn!(
                    game_id = %game_id,
                    error = %cleanup_error,
                    "failed to roll back lobby after board write error"
                );
            }
            return Err(error.into());
        }

        info!(game_id = %game_id, host_id = %host.session_id, "created game lobby");
        Ok(lobby)
    }

    /// Claims the challenger seat with a revision-checked write. Losing the
    /// race to another challenger surfaces as `AlreadyFull`, never a retry.
    pub async fn join(&self, lobby_id: &str, challenger: &User) -> Result<JoinOutcome, GameError> {
        let lobby_id = non_empty_id(lobby_id)?;
        if challenger.session_id.is_empty() {
            return Err(GameError::InvalidInput("challenger session id is empty".to_string()));
        }

        let Entry {
            value: mut lobby,
            revision,
            ..
        } = self.lobbies.get(lobby_id).await?;

        if lobby.host_id == challenger.session_id {
            debug!(game_id = %lobby_id, "host opened own lobby");
            return Ok(JoinOutcome::Host(lobby));
        }

        if lobby.challenger_id == challenger.session_id {
            return Ok(JoinOutcome::AlreadySeated(lobby));
        }

        if lobby.has_challenger() {
            info!(
                game_id = %lobby_id,
                session_id = %challenger.session_id,
                "join rejected, lobby already full"
            );
            return Err(GameError::AlreadyFull);
        }

        lobby.seat_challenger(challenger);
        match self
            .lobbies
            .update_if_revision(lobby_id, &lobby, revision)
            .await
        {
            Ok(_) => {
                info!(
                    game_id = %lobby_id,
                    challenger_id = %challenger.session_id,
                    "challenger joined lobby"
                );
                Ok(JoinOutcome::Joined(lobby))
            }
            Err(StoreError::Conflict { .. }) => {
                info!(
                    game_id = %lobby_id,
                    session_id = %challenger.session_id,
                    "join lost the race for the challenger seat"
                );
                Err(GameError::AlreadyFull)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Frees the challenger seat and reopens the lobby.
    pub async fn leave(&self, lobby_id: &str) -> Result<GameLobby, GameError> {
        let lobby_id = non_empty_id(lobby_id)?;
        let mut lobby = self.lobbies.get(lobby_id).await?.value;
        lobby.clear_challenger();
        self.lobbies.put(lobby_id, &lobby).await?;
        info!(game_id = %lobby_id, "challenger left lobby");
        Ok(lobby)
    }

    /// Removes the lobby and its board. A board that is already gone is fine.
    pub async fn delete(&self, lobby_id: &str) -> Result<(), GameError> {
        let lobby_id = non_empty_id(lobby_id)?;
        self.lobbies.delete(lobby_id).await?;
        match self.boards.delete(lobby_id).await {
            Ok(()) | Err(StoreError::NotFound { .. }) => {}
            Err(error) => return Err(error.into()),
        }
        info!(game_id = %lobby_id, "deleted game lobby");
        Ok(())
    }

    /// Deletes every lobby and board; returns how many lobbies went away.
    pub async fn purge_all(&self) -> Result<usize, GameError> {
        let mut purged = 0;
        for key in self.lobbies.keys().await? {
            match self.delete(&key).await {
                Ok(()) => purged += 1,
                Err(GameError::NotFound { .. }) => continue,
                Err(error) => {
                    warn!(game_id = %key, error = %error, "failed to purge game lobby");
                    return Err(error);
                }
            }
        }
        info!(purged, "purged all game lobbies");
        Ok(purged)
    }

    /// Deletes every lobby hosted by `session_id`, leaving the rest alone.
    pub async fn delete_hosted_by(&self, session_id: &str) -> Result<usize, GameError> {
        if session_id.is_empty() {
            return Ok(0);
        }

        let mut deleted = 0;
        for lobby in self.list().await? {
            if lobby.host_id != session_id {
                continue;
            }
            match self.delete(&lobby.id).await {
                Ok(()) => deleted += 1,
                Err(GameError::NotFound { .. }) => continue,
                Err(error) => return Err(error),
            }
        }
        debug!(session_id = %session_id, deleted, "deleted lobbies hosted by session");
        Ok(deleted)
    }
}

pub(crate) fn non_empty_id(id: &str) -> Result<&str, GameError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(GameError::InvalidInput("missing game id".to_string()));
    }
    Ok(id)
}
