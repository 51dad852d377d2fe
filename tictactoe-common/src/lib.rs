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

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const BOARD_CELLS: usize = 9;
pub const GAME_ID_LEN: usize = 10;

pub const LOBBIES_COLLECTION: &str = "lobbies";
pub const BOARDS_COLLECTION: &str = "boards";
pub const USERS_COLLECTION: &str = "users";

/// Every row, column and diagonal, in the order they are checked.
pub const WINNING_LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

const GAME_ID_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

pub type SessionId = String;
pub type GameId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub session_id: SessionId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LobbyStatus {
    #[default]
    Created,
    Open,
    Full,
}

/// Which seat a session occupies relative to one lobby.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SeatRole {
    Host,
    Challenger,
    Spectator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameLobby {
    pub id: GameId,
    pub host_id: SessionId,
    pub host_name: String,
    #[serde(default)]
    pub challenger_id: SessionId,
    #[serde(default)]
    pub challenger_name: String,
    #[serde(default)]
    pub status: LobbyStatus,
}

impl GameLobby {
    pub fn new(id: impl Into<GameId>, host: &User) -> Self {
        Self {
            id: id.into(),
            host_id: host.session_id.clone(),
            host_name: host.name.clone(),
            challenger_id: String::new(),
            challenger_name: String::new(),
            status: LobbyStatus::Created,
        }
    }

    pub fn has_challenger(&self) -> bool {
        !self.challenger_id.is_empty()
    }

    pub fn role_of(&self, session_id: &str) -> SeatRole {
        if !session_id.is_empty() && session_id == self.host_id {
            SeatRole::Host
        } else if !session_id.is_empty() && session_id == self.challenger_id {
            SeatRole::Challenger
        } else {
            SeatRole::Spectator
        }
    }

    pub fn seat_challenger(&mut self, challenger: &User) {
        self.challenger_id = challenger.session_id.clone();
        self.challenger_name = challenger.name.clone();
        self.status = LobbyStatus::Full;
    }

    pub fn clear_challenger(&mut self) {
        self.challenger_id.clear();
        self.challenger_name.clear();
        self.status = LobbyStatus::Open;
    }

    /// Session expected to place the next mark, or `None` while the challenger
    /// seat is empty and it is O's turn.
    pub fn player_for(&self, mark: Mark) -> Option<&str> {
        match mark {
            Mark::X => Some(self.host_id.as_str()),
            Mark::O if self.has_challenger() => Some(self.challenger_id.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Mark {
    #[default]
    #[serde(rename = "")]
    Empty,
    X,
    O,
}

impl Mark {
    pub fn is_empty(self) -> bool {
        self == Mark::Empty
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Winner {
    #[default]
    #[serde(rename = "")]
    None,
    X,
    O,
    #[serde(rename = "TIE")]
    Tie,
}

impl Winner {
    pub fn is_decided(self) -> bool {
        self != Winner::None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameBoard {
    pub id: GameId,
    pub board: [Mark; BOARD_CELLS],
    #[serde(rename = "turn")]
    pub x_is_next: bool,
    #[serde(default)]
    pub winner: Winner,
}

impl GameBoard {
    pub fn new(id: impl Into<GameId>) -> Self {
        Self {
            id: id.into(),
            board: [Mark::Empty; BOARD_CELLS],
            x_is_next: true,
            winner: Winner::None,
        }
    }

    pub fn next_mark(&self) -> Mark {
        if self.x_is_next { Mark::X } else { Mark::O }
    }

    pub fn is_finished(&self) -> bool {
        self.winner.is_decided()
    }

    pub fn reset(&mut self) {
        self.board = [Mark::Empty; BOARD_CELLS];
        self.x_is_next = true;
        self.winner = Winner::None;
    }
}

/// Scores a board: the first line holding three equal marks wins, a full
/// board without such a line is a tie, anything else is still in play.
pub fn check_winner(board: &[Mark; BOARD_CELLS]) -> Winner {
    for [a, b, c] in WINNING_LINES {
        let mark = board[a];
        if !mark.is_empty() && board[b] == mark && board[c] == mark {
            return match mark {
                Mark::X => Winner::X,
                Mark::O => Winner::O,
                Mark::Empty => Winner::None,
            };
        }
    }

    if board.iter().all(|cell| !cell.is_empty()) {
        Winner::Tie
    } else {
        Winner::None
    }
}

pub fn new_game_id() -> GameId {
    let mut rng = rand::rng();
    (0..GAME_ID_LEN)
        .map(|_| GAME_ID_ALPHABET[rng.random_range(0..GAME_ID_ALPHABET.len())] as char)
        .collect()
}

pub fn new_session_id() -> SessionId {
    Uuid::new_v4().simple().to_string()
}

/// Replace `${VAR_NAME}` patterns in a string with values from environment variables.
/// Unknown or unset variables are replaced with an empty string.
pub fn expand_env_vars(input: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}
