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

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use tictactoe_common::{GameBoard, GameId, GameLobby, Mark, SeatRole, Winner};
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    error::GameError,
    feed::{Change, ChangeFeed, FeedUpdate, latest_value},
    lobby::non_empty_id,
    store::{Collection, KeyFilter},
};

const LISTENER_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Part of the state that existed when the connection subscribed.
    Historical,
    Live,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientUpdate<U> {
    pub delivery: Delivery,
    pub update: U,
    pub emitted_at: DateTime<Utc>,
}

impl<U> ClientUpdate<U> {
    fn new(delivery: Delivery, update: U) -> Self {
        Self {
            delivery,
            update,
            emitted_at: Utc::now(),
        }
    }
}

/// A lobby as seen by one session, with the controls that session may use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LobbyView {
    pub lobby: GameLobby,
    pub viewer_role: SeatRole,
    pub can_join: bool,
    pub can_leave: bool,
    pub can_delete: bool,
    pub can_reset: bool,
}

impl LobbyView {
    pub fn for_viewer(lobby: GameLobby, viewer: &str) -> Self {
        let viewer_role = lobby.role_of(viewer);
        let is_host = viewer_role == SeatRole::Host;
        Self {
            can_join: viewer_role == SeatRole::Spectator
                && !viewer.is_empty()
                && !lobby.has_challenger(),
            can_leave: lobby.has_challenger() && viewer_role != SeatRole::Spectator,
            can_delete: is_host,
            can_reset: is_host,
            viewer_role,
            lobby,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardView {
    pub board: GameBoard,
    /// `None` once the game is decided.
    pub next_mark: Option<Mark>,
    pub banner: String,
}

impl From<GameBoard> for BoardView {
    fn from(board: GameBoard) -> Self {
        let banner = match board.winner {
            Winner::X => "Winner: X".to_string(),
            Winner::O => "Winner: O".to_string(),
            Winner::Tie => "Tie game".to_string(),
            Winner::None => format!("Next player: {}", mark_label(board.next_mark())),
        };
        Self {
            next_mark: (!board.is_finished()).then(|| board.next_mark()),
            banner,
            board,
        }
    }
}

fn mark_label(mark: Mark) -> &'static str {
    match mark {
        Mark::X => "X",
        Mark::O => "O",
        Mark::Empty => "",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateUpdate {
    Lobby(LobbyView),
    Board(BoardView),
    /// The lobby or board no longer exists; the client should leave the page.
    GameRemoved { game_id: GameId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LobbyListItem {
    pub lobby: GameLobby,
    pub viewer_role: SeatRole,
    pub can_join: bool,
    pub can_delete: bool,
}

impl LobbyListItem {
    pub fn for_viewer(lobby: GameLobby, viewer: &str) -> Self {
        let view = LobbyView::for_viewer(lobby, viewer);
        Self {
            lobby: view.lobby,
            viewer_role: view.viewer_role,
            can_join: view.can_join,
            can_delete: view.can_delete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DashboardUpdate {
    Snapshot { lobbies: Vec<LobbyListItem> },
    Added { lobby: LobbyListItem },
    Updated { lobby: LobbyListItem },
    Removed { game_id: GameId },
}

/// Why a connection stopped streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEnd {
    Cancelled,
    ClientGone,
    GameRemoved,
    FeedClosed,
}

/// Turns store change feeds into per-connection streams of client updates.
#[derive(Clone)]
pub struct FeedMux {
    lobbies: Collection<GameLobby>,
    boards: Collection<GameBoard>,
}

impl FeedMux {
    pub fn new(lobbies: Collection<GameLobby>, boards: Collection<GameBoard>) -> Self {
        Self { lobbies, boards }
    }

    /// Streams one game page to `out` until the connection is cancelled, the
    /// receiver goes away, the game is removed or either feed closes.
    ///
    /// The lobby and board feeds are drained by separate listener tasks so a
    /// busy board never holds back a lobby change. Both tasks are stopped and
    /// their subscriptions released before this returns.
    pub async fn stream_game(
        &self,
        game_id: &str,
        viewer: &str,
        out: mpsc::Sender<ClientUpdate<StateUpdate>>,
        cancel: CancellationToken,
    ) -> Result<ConnectionEnd, GameError> {
        let game_id = non_empty_id(game_id)?.to_string();
        let lobby_feed = self.lobbies.subscribe(KeyFilter::key(&game_id)).await?;
        let board_feed = self.boards.subscribe(KeyFilter::key(&game_id)).await?;

        let stop = cancel.child_token();
        let (lobby_tx, mut lobby_rx) = mpsc::channel(LISTENER_BUFFER);
        let (board_tx, mut board_rx) = mpsc::channel(LISTENER_BUFFER);
        let mut listeners = JoinSet::new();
        listeners.spawn(listen(lobby_feed, lobby_tx, stop.clone()));
        listeners.spawn(listen(board_feed, board_tx, stop.clone()));

        debug!(game_id = %game_id, viewer = %viewer, "game stream connected");

        let end = loop {
            let update = tokio::select! {
                _ = cancel.cancelled() => break ConnectionEnd::Cancelled,
                _ = out.closed() => break ConnectionEnd::ClientGone,
                update = lobby_rx.recv() => match update {
                    Some(update) => game_update(&game_id, update, |lobby| {
                        StateUpdate::Lobby(LobbyView::for_viewer(lobby, viewer))
                    }),
                    None => break ConnectionEnd::FeedClosed,
                },
                update = board_rx.recv() => match update {
                    Some(update) => game_update(&game_id, update, |board| {
                        StateUpdate::Board(BoardView::from(board))
                    }),
                    None => break ConnectionEnd::FeedClosed,
                },
            };

            let removed = matches!(update.update, StateUpdate::GameRemoved { .. });
            if let Some(end) = deliver(&out, update, &cancel).await {
                break end;
            }
            if removed {
                break ConnectionEnd::GameRemoved;
            }
        };

        stop.cancel();
        drop(lobby_rx);
        drop(board_rx);
        while listeners.join_next().await.is_some() {}

        info!(game_id = %game_id, viewer = %viewer, end = ?end, "game stream ended");
        Ok(end)
    }

    /// Streams the lobby list: one snapshot, then added/updated/removed
    /// lobbies as they change.
    pub async fn stream_dashboard(
        &self,
        viewer: &str,
        out: mpsc::Sender<ClientUpdate<DashboardUpdate>>,
        cancel: CancellationToken,
    ) -> Result<ConnectionEnd, GameError> {
        let mut feed = self.lobbies.subscribe(KeyFilter::All).await?;
        let mut known = HashSet::new();
        debug!(viewer = %viewer, "dashboard stream connected");

        let end = loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break ConnectionEnd::Cancelled,
                _ = out.closed() => break ConnectionEnd::ClientGone,
                next = feed.next() => next,
            };

            let update = match next {
                Ok(Some(FeedUpdate::Replayed(batch))) => {
                    let lobbies = fold_snapshot(batch);
                    known.extend(lobbies.keys().cloned());
                    let lobbies = lobbies
                        .into_values()
                        .map(|lobby| LobbyListItem::for_viewer(lobby, viewer))
                        .collect();
                    ClientUpdate::new(Delivery::Historical, DashboardUpdate::Snapshot { lobbies })
                }
                Ok(Some(FeedUpdate::Live(Change::Put { key, value, .. }))) => {
                    let lobby = LobbyListItem::for_viewer(value, viewer);
                    let update = if known.insert(key) {
                        DashboardUpdate::Added { lobby }
                    } else {
                        DashboardUpdate::Updated { lobby }
                    };
                    ClientUpdate::new(Delivery::Live, update)
                }
                Ok(Some(FeedUpdate::Live(Change::Remove { key, .. }))) => {
                    known.remove(&key);
                    ClientUpdate::new(Delivery::Live, DashboardUpdate::Removed { game_id: key })
                }
                Ok(None) | Err(_) => break ConnectionEnd::FeedClosed,
            };

            if let Some(end) = deliver(&out, update, &cancel).await {
                break end;
            }
        };

        feed.stop();
        info!(viewer = %viewer, end = ?end, "dashboard stream ended");
        Ok(end)
    }
}

/// Sends one update unless the connection is cancelled first. A full channel
/// with a live receiver must not outlast cancellation.
async fn deliver<U>(
    out: &mpsc::Sender<ClientUpdate<U>>,
    update: ClientUpdate<U>,
    cancel: &CancellationToken,
) -> Option<ConnectionEnd> {
    tokio::select! {
        _ = cancel.cancelled() => Some(ConnectionEnd::Cancelled),
        sent = out.send(update) => sent.err().map(|_| ConnectionEnd::ClientGone),
    }
}

async fn listen<T>(
    mut feed: ChangeFeed<T>,
    tx: mpsc::Sender<FeedUpdate<T>>,
    stop: CancellationToken,
) where
    T: DeserializeOwned + Send + 'static,
{
    loop {
        let next = tokio::select! {
            _ = stop.cancelled() => break,
            next = feed.next() => next,
        };
        match next {
            Ok(Some(update)) => {
                if tx.send(update).await.is_err() {
                    break;
                }
            }
            // Errors were logged by the feed; dropping `tx` ends the connection.
            Ok(None) | Err(_) => break,
        }
    }
    feed.stop();
}

/// One update per feed event: the newest record, or a removal notice when the
/// record is gone.
fn game_update<T>(
    game_id: &str,
    update: FeedUpdate<T>,
    view: impl FnOnce(T) -> StateUpdate,
) -> ClientUpdate<StateUpdate> {
    let (delivery, latest) = match update {
        FeedUpdate::Replayed(batch) => (Delivery::Historical, latest_value(batch)),
        FeedUpdate::Live(Change::Put { value, .. }) => (Delivery::Live, Some(value)),
        FeedUpdate::Live(Change::Remove { .. }) => (Delivery::Live, None),
    };
    let update = match latest {
        Some(record) => view(record),
        None => StateUpdate::GameRemoved {
            game_id: game_id.to_string(),
        },
    };
    ClientUpdate::new(delivery, update)
}

/// Final state of every key in a replayed batch; historical removals only
/// drop keys.
fn fold_snapshot(batch: Vec<Change<GameLobby>>) -> BTreeMap<String, GameLobby> {
    let mut lobbies = BTreeMap::new();
    for change in batch {
        match change {
            Change::Put { key, value, .. } => {
                lobbies.insert(key, value);
            }
            Change::Remove { key, .. } => {
                lobbies.remove(&key);
            }
        }
    }
    lobbies
}
