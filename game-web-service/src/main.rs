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

use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::Utc;
use game_sync::{
    BoardView, ClientUpdate, ConnectionEnd, GameError, GameSync, JoinOutcome, LobbyView,
    load_store_config,
};
use serde::{Deserialize, Serialize};
use tictactoe_common::{GameLobby, SeatRole, User, new_session_id};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

const SESSION_HEADER: &str = "x-session-id";
const DASHBOARD_PATH: &str = "/dashboard";
const WS_BUFFER: usize = 64;

#[derive(Clone)]
struct AppState {
    sync: GameSync,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "game_web_service=debug,game_sync=debug,tower_http=info".to_string()
        }))
        .init();

    let config = load_store_config();
    let sync = GameSync::in_memory(&config).context("failed to open record store")?;
    let app = build_router(AppState { sync });

    let bind_addr = parse_bind_addr("GAME_WEB_SERVICE_BIND", "0.0.0.0:8080")?;
    info!(%bind_addr, feed_capacity = config.feed_capacity, "game-web-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/login", post(login_handler))
        .route("/api/dashboard/create", post(create_handler))
        .route("/api/dashboard/logout", post(logout_handler))
        .route("/api/dashboard/purge", delete(purge_handler))
        .route("/api/dashboard/updates", get(dashboard_updates_handler))
        .route("/api/dashboard/{game_id}/join", post(join_handler))
        .route("/api/dashboard/{game_id}/delete", delete(delete_handler))
        .route("/api/game/{game_id}", get(game_handler))
        .route("/api/game/{game_id}/updates", get(game_updates_handler))
        .route("/api/game/{game_id}/toggle/{cell}", post(toggle_handler))
        .route("/api/game/{game_id}/reset", post(reset_handler))
        .route("/api/game/{game_id}/leave", post(leave_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "game-web-service"}))
}

/// Session id carried by the request, or an empty string.
fn current_session_id(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

/// Reuses the caller's session id when it has one.
fn issue_session_id(headers: &HeaderMap) -> String {
    let current = current_session_id(headers);
    if current.is_empty() {
        new_session_id()
    } else {
        current
    }
}

async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let session_id = current_session_id(headers);
    if session_id.is_empty() {
        return Err(ApiError::unauthorized("login required"));
    }
    match state.sync.users.get(&session_id).await {
        Ok(user) => Ok(user),
        Err(GameError::NotFound { .. }) => Err(ApiError::unauthorized("login required")),
        Err(error) => Err(error.into()),
    }
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    name: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    session_id: String,
    user: User,
}

async fn login_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let session_id = issue_session_id(&headers);
    let user = state.sync.users.login(&session_id, &request.name).await?;
    Ok(Json(LoginResponse { session_id, user }))
}

async fn logout_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session_id = current_session_id(&headers);
    let swept = state.sync.users.logout(&session_id).await?;
    Ok(Json(serde_json::json!({"ok": true, "lobbies_removed": swept})))
}

async fn create_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<GameLobby>), ApiError> {
    let host = require_user(&state, &headers).await?;
    let lobby = state.sync.lobbies.create(&host).await?;
    Ok((StatusCode::CREATED, Json(lobby)))
}

async fn purge_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let purged = state.sync.lobbies.purge_all().await?;
    Ok(Json(serde_json::json!({"ok": true, "purged": purged})))
}

#[derive(Debug, Serialize)]
struct JoinResponse {
    outcome: &'static str,
    lobby: GameLobby,
    redirect: String,
}

async fn join_handler(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<JoinResponse>, ApiError> {
    let challenger = require_user(&state, &headers).await?;
    let outcome = state.sync.lobbies.join(&game_id, &challenger).await?;
    let label = match &outcome {
        JoinOutcome::Joined(_) => "joined",
        JoinOutcome::Host(_) => "host",
        JoinOutcome::AlreadySeated(_) => "already_seated",
    };
    Ok(Json(JoinResponse {
        outcome: label,
        redirect: format!("/game/{game_id}"),
        lobby: outcome.lobby().clone(),
    }))
}

async fn delete_handler(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let session_id = current_session_id(&headers);
    let lobby = state.sync.lobbies.get(&game_id).await?;
    if lobby.role_of(&session_id) != SeatRole::Host {
        return Err(GameError::NotHost.into());
    }
    state.sync.lobbies.delete(&game_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct GameResponse {
    lobby: LobbyView,
    board: BoardView,
}

async fn game_handler(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<GameResponse>, ApiError> {
    let viewer = current_session_id(&headers);
    let lobby = state.sync.lobbies.get(&game_id).await?;
    let board = state.sync.boards.get(&game_id).await?;
    Ok(Json(GameResponse {
        lobby: LobbyView::for_viewer(lobby, &viewer),
        board: BoardView::from(board),
    }))
}

async fn toggle_handler(
    State(state): State<AppState>,
    Path((game_id, cell)): Path<(String, usize)>,
    headers: HeaderMap,
) -> Result<Json<BoardView>, ApiError> {
    let mover = current_session_id(&headers);
    let board = state.sync.boards.move_mark(&game_id, &mover, cell).await?;
    Ok(Json(BoardView::from(board)))
}

async fn reset_handler(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<BoardView>, ApiError> {
    let requester = current_session_id(&headers);
    let board = state.sync.boards.reset(&game_id, &requester).await?;
    Ok(Json(BoardView::from(board)))
}

async fn leave_handler(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<LobbyView>, ApiError> {
    let viewer = current_session_id(&headers);
    let lobby = state.sync.lobbies.leave(&game_id).await?;
    Ok(Json(LobbyView::for_viewer(lobby, &viewer)))
}

/// Browsers cannot set headers on a WebSocket upgrade, so the session id may
/// also come as `?session=`.
#[derive(Debug, Default, Deserialize)]
struct StreamQuery {
    session: Option<String>,
}

fn stream_viewer(headers: &HeaderMap, query: StreamQuery) -> String {
    let from_header = current_session_id(headers);
    if !from_header.is_empty() {
        return from_header;
    }
    query.session.unwrap_or_default().trim().to_string()
}

async fn game_updates_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    Path(game_id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let viewer = stream_viewer(&headers, query);
    ws.on_upgrade(move |socket| handle_game_socket(socket, state, game_id, viewer))
}

async fn handle_game_socket(socket: WebSocket, state: AppState, game_id: String, viewer: String) {
    let (tx, rx) = mpsc::channel(WS_BUFFER);
    let cancel = CancellationToken::new();
    let feeds = state.sync.feeds.clone();
    let stream_cancel = cancel.clone();
    let stream_game_id = game_id.clone();
    let stream = tokio::spawn(async move {
        feeds
            .stream_game(&stream_game_id, &viewer, tx, stream_cancel)
            .await
    });

    forward_updates(socket, rx, cancel, &game_id).await;
    log_stream_end(&game_id, stream.await);
}

async fn dashboard_updates_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let viewer = stream_viewer(&headers, query);
    ws.on_upgrade(move |socket| handle_dashboard_socket(socket, state, viewer))
}

async fn handle_dashboard_socket(socket: WebSocket, state: AppState, viewer: String) {
    let (tx, rx) = mpsc::channel(WS_BUFFER);
    let cancel = CancellationToken::new();
    let feeds = state.sync.feeds.clone();
    let stream_cancel = cancel.clone();
    let stream =
        tokio::spawn(async move { feeds.stream_dashboard(&viewer, tx, stream_cancel).await });

    forward_updates(socket, rx, cancel, "dashboard").await;
    log_stream_end("dashboard", stream.await);
}

/// Pushes every update to the socket until either side is done, then cancels
/// the stream feeding `rx`.
async fn forward_updates<U: Serialize>(
    mut socket: WebSocket,
    mut rx: mpsc::Receiver<ClientUpdate<U>>,
    cancel: CancellationToken,
    stream: &str,
) {
    loop {
        tokio::select! {
            update = rx.recv() => {
                let Some(update) = update else {
                    break;
                };
                let payload = match serde_json::to_string(&update) {
                    Ok(payload) => payload,
                    Err(error) => {
                        warn!(stream = stream, error = %error, "failed to encode client update");
                        break;
                    }
                };
                if let Err(error) = socket.send(Message::Text(payload.into())).await {
                    warn!(stream = stream, error = ?error, "failed to push websocket update");
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        debug!(stream = stream, error = ?error, "websocket receive failed");
                        break;
                    }
                }
            }
        }
    }

    cancel.cancel();
    if let Err(error) = socket.send(Message::Close(None)).await {
        debug!(stream = stream, error = ?error, "close frame not sent");
    }
}

fn log_stream_end(
    stream: &str,
    result: Result<Result<ConnectionEnd, GameError>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(end)) => debug!(stream = stream, end = ?end, at = %Utc::now(), "stream closed"),
        Ok(Err(error)) => warn!(stream = stream, error = %error, "stream failed to start"),
        Err(error) => warn!(stream = stream, error = %error, "stream task failed"),
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    redirect: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            redirect: None,
        }
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message).redirect_to("/")
    }

    fn redirect_to(mut self, path: impl Into<String>) -> Self {
        self.redirect = Some(path.into());
        self
    }
}

impl From<GameError> for ApiError {
    fn from(error: GameError) -> Self {
        let status = match &error {
            GameError::NotFound { .. } => StatusCode::NOT_FOUND,
            GameError::InvalidInput(_) | GameError::InvalidCell(_) => StatusCode::BAD_REQUEST,
            GameError::NotHost => StatusCode::FORBIDDEN,
            GameError::Conflict | GameError::AlreadyFull => StatusCode::CONFLICT,
            GameError::CellOccupied(_) | GameError::NotYourTurn | GameError::GameOver => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            GameError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let api_error = Self::new(status, error.to_string());
        match error {
            GameError::AlreadyFull | GameError::NotFound { .. } => {
                api_error.redirect_to(DASHBOARD_PATH)
            }
            _ => api_error,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, message = %self.message, "request failed");
        let body = match &self.redirect {
            Some(redirect) => serde_json::json!({"error": self.message, "redirect": redirect}),
            None => serde_json::json!({"error": self.message}),
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use game_sync::StoreConfig;
    use tictactoe_common::{LobbyStatus, Mark, Winner};

    fn state() -> AppState {
        AppState {
            sync: GameSync::in_memory(&StoreConfig::default()).unwrap(),
        }
    }

    fn session(id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_str(id).unwrap());
        headers
    }

    async fn login(state: &AppState, name: &str) -> HeaderMap {
        let response = login_handler(
            State(state.clone()),
            HeaderMap::new(),
            Json(LoginRequest {
                name: name.to_string(),
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(response.user.name, name);
        session(&response.session_id)
    }

    async fn create_game(state: &AppState, host: &HeaderMap) -> GameLobby {
        let (status, Json(lobby)) = create_handler(State(state.clone()), host.clone())
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        lobby
    }

    #[test]
    fn current_session_id_reads_header_or_empty() {
        assert_eq!(current_session_id(&session(" abc ")), "abc");
        assert_eq!(current_session_id(&HeaderMap::new()), "");
    }

    #[test]
    fn issue_session_id_keeps_existing_session() {
        assert_eq!(issue_session_id(&session("abc")), "abc");
        assert_eq!(issue_session_id(&HeaderMap::new()).len(), 32);
    }

    #[test]
    fn stream_viewer_prefers_header_over_query() {
        let query = StreamQuery {
            session: Some("from-query".to_string()),
        };
        assert_eq!(stream_viewer(&session("from-header"), query), "from-header");

        let query = StreamQuery {
            session: Some("from-query".to_string()),
        };
        assert_eq!(stream_viewer(&HeaderMap::new(), query), "from-query");
        assert_eq!(stream_viewer(&HeaderMap::new(), StreamQuery::default()), "");
    }

    #[test]
    fn game_errors_map_to_http_statuses() {
        let cases = [
            (GameError::InvalidCell(9), StatusCode::BAD_REQUEST),
            (GameError::NotHost, StatusCode::FORBIDDEN),
            (GameError::Conflict, StatusCode::CONFLICT),
            (GameError::NotYourTurn, StatusCode::UNPROCESSABLE_ENTITY),
            (
                GameError::StoreUnavailable("down".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status, status);
        }

        let full = ApiError::from(GameError::AlreadyFull);
        assert_eq!(full.status, StatusCode::CONFLICT);
        assert_eq!(full.message, "lobby is now full");
        assert_eq!(full.redirect.as_deref(), Some(DASHBOARD_PATH));
    }

    #[tokio::test]
    async fn health_reports_service_name() {
        let Json(body) = health().await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["service"], "game-web-service");
    }

    #[tokio::test]
    async fn create_requires_login() {
        let err = create_handler(State(state()), session("stranger"))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn full_game_flow_through_handlers() {
        let state = state();
        let host = login(&state, "Alice").await;
        let guest = login(&state, "Bob").await;
        let late = login(&state, "Carol").await;
        let lobby = create_game(&state, &host).await;
        assert_eq!(lobby.status, LobbyStatus::Created);

        let joined = join_handler(State(state.clone()), Path(lobby.id.clone()), guest.clone())
            .await
            .unwrap()
            .0;
        assert_eq!(joined.outcome, "joined");
        assert_eq!(joined.redirect, format!("/game/{}", lobby.id));

        let own = join_handler(State(state.clone()), Path(lobby.id.clone()), host.clone())
            .await
            .unwrap()
            .0;
        assert_eq!(own.outcome, "host");

        let err = join_handler(State(state.clone()), Path(lobby.id.clone()), late.clone())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.redirect.as_deref(), Some(DASHBOARD_PATH));

        let board = toggle_handler(
            State(state.clone()),
            Path((lobby.id.clone(), 0)),
            host.clone(),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(board.board.board[0], Mark::X);

        let err = toggle_handler(
            State(state.clone()),
            Path((lobby.id.clone(), 1)),
            host.clone(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);

        let err = toggle_handler(
            State(state.clone()),
            Path((lobby.id.clone(), 9)),
            guest.clone(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = reset_handler(State(state.clone()), Path(lobby.id.clone()), guest.clone())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        let board = reset_handler(State(state.clone()), Path(lobby.id.clone()), host.clone())
            .await
            .unwrap()
            .0;
        assert_eq!(board.board.board, [Mark::Empty; 9]);
        assert_eq!(board.board.winner, Winner::None);

        let view = game_handler(State(state.clone()), Path(lobby.id.clone()), guest.clone())
            .await
            .unwrap()
            .0;
        assert_eq!(view.lobby.viewer_role, SeatRole::Challenger);
        assert!(view.lobby.can_leave);

        let left = leave_handler(State(state.clone()), Path(lobby.id.clone()), guest)
            .await
            .unwrap()
            .0;
        assert_eq!(left.lobby.status, LobbyStatus::Open);
        assert!(left.can_join);
    }

    #[tokio::test]
    async fn only_host_can_delete_a_lobby() {
        let state = state();
        let host = login(&state, "Alice").await;
        let other = login(&state, "Bob").await;
        let lobby = create_game(&state, &host).await;

        let err = delete_handler(State(state.clone()), Path(lobby.id.clone()), other)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        let status = delete_handler(State(state.clone()), Path(lobby.id.clone()), host)
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let err = game_handler(State(state), Path(lobby.id), HeaderMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn logout_removes_hosted_lobbies_and_purge_clears_the_rest() {
        let state = state();
        let host = login(&state, "Alice").await;
        let other = login(&state, "Bob").await;
        create_game(&state, &host).await;
        create_game(&state, &host).await;
        create_game(&state, &other).await;

        let Json(body) = logout_handler(State(state.clone()), host.clone())
            .await
            .unwrap();
        assert_eq!(body["lobbies_removed"], 2);
        assert_eq!(state.sync.lobbies.list().await.unwrap().len(), 1);

        let err = create_handler(State(state.clone()), host).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);

        let Json(body) = purge_handler(State(state.clone())).await.unwrap();
        assert_eq!(body["purged"], 1);
        assert!(state.sync.lobbies.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn login_rejects_blank_name() {
        let err = login_handler(
            State(state()),
            HeaderMap::new(),
            Json(LoginRequest {
                name: "  ".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
