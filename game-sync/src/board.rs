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

use tictactoe_common::{BOARD_CELLS, GameBoard, GameLobby, SeatRole, check_winner};
use tracing::{debug, info};

use crate::{
    error::{GameError, StoreError},
    lobby::non_empty_id,
    store::{Collection, Entry},
};

#[derive(Clone)]
pub struct BoardManager {
    boards: Collection<GameBoard>,
    lobbies: Collection<GameLobby>,
}

impl BoardManager {
    pub fn new(boards: Collection<GameBoard>, lobbies: Collection<GameLobby>) -> Self {
        Self { boards, lobbies }
    }

    pub async fn get(&self, board_id: &str) -> Result<GameBoard, GameError> {
        Ok(self.boards.get(non_empty_id(board_id)?).await?.value)
    }

    pub async fn list_ids(&self) -> Result<Vec<String>, GameError> {
        Ok(self.boards.keys().await?)
    }

    /// Places the next mark at `cell` for `mover`.
    ///
    /// Checks run against freshly read state in this order: cell range,
    /// finished game, occupied cell, turn ownership. The write carries the
    /// revision the board was read at, so a move or reset that landed in
    /// between turns this call into `GameError::Conflict`.
    pub async fn move_mark(
        &self,
        board_id: &str,
        mover: &str,
        cell: usize,
    ) -> Result<GameBoard, GameError> {
        let board_id = non_empty_id(board_id)?;
        if cell >= BOARD_CELLS {
            return Err(GameError::InvalidCell(cell));
        }

        let Entry {
            value: mut board,
            revision,
            ..
        } = self.boards.get(board_id).await?;
        let lobby = self.lobbies.get(board_id).await?.value;

        if board.is_finished() {
            return Err(GameError::GameOver);
        }
        if !board.board[cell].is_empty() {
            return Err(GameError::CellOccupied(cell));
        }

        let mark = board.next_mark();
        if mover.is_empty() || lobby.player_for(mark) != Some(mover) {
            debug!(game_id = %board_id, mover = %mover, ?mark, "move out of turn");
            return Err(GameError::NotYourTurn);
        }

        board.board[cell] = mark;
        board.x_is_next = !board.x_is_next;
        board.winner = check_winner(&board.board);

        match self
            .boards
            .update_if_revision(board_id, &board, revision)
            .await
        {
            Ok(_) => {
                info!(
                    game_id = %board_id,
                    cell,
                    ?mark,
                    winner = ?board.winner,
                    "move accepted"
                );
                Ok(board)
            }
            Err(StoreError::Conflict { .. }) => {
                info!(game_id = %board_id, cell, "move lost to a concurrent write");
                Err(GameError::Conflict)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Restores the initial board. Only the lobby host may reset.
    pub async fn reset(&self, board_id: &str, requester: &str) -> Result<GameBoard, GameError> {
        let board_id = non_empty_id(board_id)?;
        let lobby = self.lobbies.get(board_id).await?.value;
        if lobby.role_of(requester) != SeatRole::Host {
            return Err(GameError::NotHost);
        }

        let mut board = self.boards.get(board_id).await?.value;
        board.reset();
        self.boards.put(board_id, &board).await?;
        info!(game_id = %board_id, "board reset");
        Ok(board)
    }
}
