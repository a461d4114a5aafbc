use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use minesweep_common::models::{BoardParams, GameResult, LobbyStatus};
use minesweep_common::protocol::{ClientMessage, ServerMessage};

use crate::board::Board;
use crate::error::LobbyError;
use crate::store::{MAX_PLAYERS, SessionStore, normalize_code, now_millis};

/// One live real-time connection: the unit of join, disconnect and
/// broadcast targeting.
pub struct Connection {
    pub id: Uuid,
    tx: UnboundedSender<ServerMessage>,
}

impl Connection {
    pub fn new(tx: UnboundedSender<ServerMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    pub fn sender(&self) -> UnboundedSender<ServerMessage> {
        self.tx.clone()
    }

    pub fn send(&self, message: ServerMessage) {
        let _ = self.tx.send(message);
    }

    /// Errors go to the offending connection only, never to the group.
    pub fn reject(&self, err: LobbyError) {
        self.send(ServerMessage::Error {
            message: err.to_string(),
        });
    }
}

pub async fn handle_message(store: &SessionStore, conn: &Connection, message: ClientMessage) {
    match message {
        ClientMessage::Join { code, name } => join(store, conn, &code, &name).await,
        ClientMessage::Start { code } => start(store, conn, &code).await,
        ClientMessage::Reveal { code, row, col } => reveal(store, conn, &code, row, col).await,
        ClientMessage::Flag { code, row, col } => flag(store, conn, &code, row, col).await,
        ClientMessage::CursorMove { code, x, y } => cursor_move(store, conn, &code, x, y).await,
    }
}

/// Join a lobby's broadcast group, claiming the pending creator slot when
/// this is the first real-time connection for a REST-created lobby.
#[instrument(level = "trace", skip(store, conn))]
pub async fn join(store: &SessionStore, conn: &Connection, code: &str, name: &str) {
    let name = name.trim();
    if name.is_empty() {
        return;
    }

    let code = normalize_code(code);
    let Some(shared) = store.get(&code) else {
        conn.reject(LobbyError::NotFound);
        return;
    };
    let mut lobby = shared.lock().await;

    if lobby.board_missing() {
        error!("lobby {} is playing without a board, discarding", code);
        drop(lobby);
        store.delete(&code);
        conn.reject(LobbyError::NotFound);
        return;
    }
    if lobby.status == LobbyStatus::Finished {
        conn.reject(LobbyError::AlreadyFinished);
        return;
    }
    if lobby.players.len() >= MAX_PLAYERS && !lobby.is_member(conn.id) {
        conn.reject(LobbyError::Full);
        return;
    }

    if !lobby.is_member(conn.id) && !lobby.claim_placeholder(conn.id) {
        lobby.add_player(conn.id, name);
    }

    lobby.attach(conn.id, conn.sender());
    store.track_connection(conn.id, &code);
    info!("{} joined lobby {} ({} connected)", name, code, lobby.connection_count());

    lobby.send_to(
        conn.id,
        ServerMessage::State {
            code: code.clone(),
            players: lobby.roster(),
            status: lobby.status,
            is_host: lobby.host_id == conn.id,
        },
    );

    // A late joiner to a running game needs the current board to render.
    if lobby.status == LobbyStatus::Playing
        && let Some(board) = &lobby.board
    {
        lobby.send_to(
            conn.id,
            ServerMessage::BoardUpdate {
                board: board.mask(),
                started_at: lobby.started_at,
            },
        );
    }

    lobby.broadcast(&ServerMessage::PlayerJoined {
        players: lobby.roster(),
    });
}

/// Host-only. Generates the board and flips the lobby to playing; the clock
/// stays unset until the first reveal.
#[instrument(level = "trace", skip(store, conn))]
pub async fn start(store: &SessionStore, conn: &Connection, code: &str) {
    let code = normalize_code(code);
    let Some(shared) = store.get(&code) else {
        conn.reject(LobbyError::NotFound);
        return;
    };
    let mut lobby = shared.lock().await;

    if lobby.host_id != conn.id {
        conn.reject(LobbyError::NotHost);
        return;
    }
    if lobby.players.len() < 2 {
        conn.reject(LobbyError::NotEnoughPlayers);
        return;
    }
    if lobby.status != LobbyStatus::Waiting {
        conn.reject(LobbyError::AlreadyStarted);
        return;
    }

    let params = BoardParams::default();
    let board = Board::generate(params.rows, params.cols, params.mines);
    info!(
        "lobby {} started: {}x{} with {} mines",
        code, params.rows, params.cols, params.mines
    );

    let masked = board.mask();
    lobby.board = Some(board);
    lobby.status = LobbyStatus::Playing;
    lobby.started_at = None;

    lobby.broadcast(&ServerMessage::GameStart {
        board: masked,
        started_at: None,
        players: lobby.roster(),
    });
}

pub async fn reveal(store: &SessionStore, _conn: &Connection, code: &str, row: usize, col: usize) {
    let code = normalize_code(code);
    let Some(shared) = store.get(&code) else {
        return;
    };
    let mut lobby = shared.lock().await;

    if lobby.status != LobbyStatus::Playing {
        return;
    }
    let Some(board) = &lobby.board else {
        error!("lobby {} is playing without a board, discarding", code);
        drop(lobby);
        store.delete(&code);
        return;
    };

    let (next, hit) = board.reveal(row, col);

    // The shared clock starts on the lobby's first reveal.
    if lobby.started_at.is_none() {
        lobby.started_at = Some(now_millis());
    }

    let masked = next.mask();
    let won = !hit && next.check_win();
    lobby.board = Some(next);

    lobby.broadcast(&ServerMessage::BoardUpdate {
        board: masked,
        started_at: lobby.started_at,
    });

    if hit || won {
        let finished = now_millis();
        lobby.status = LobbyStatus::Finished;
        lobby.finished_at = Some(finished);

        let result = if hit { GameResult::Loss } else { GameResult::Win };
        let elapsed = finished.saturating_sub(lobby.started_at.unwrap_or(finished));
        info!("lobby {} finished: {:?} after {}ms", code, result, elapsed);

        lobby.broadcast(&ServerMessage::GameOver {
            result,
            time: elapsed,
        });
    } else {
        debug!("lobby {} reveal at ({}, {})", code, row, col);
    }
}

pub async fn flag(store: &SessionStore, _conn: &Connection, code: &str, row: usize, col: usize) {
    let code = normalize_code(code);
    let Some(shared) = store.get(&code) else {
        return;
    };
    let mut lobby = shared.lock().await;

    if lobby.status != LobbyStatus::Playing {
        return;
    }
    let Some(board) = &lobby.board else {
        error!("lobby {} is playing without a board, discarding", code);
        drop(lobby);
        store.delete(&code);
        return;
    };

    let next = board.toggle_flag(row, col);
    let masked = next.mask();
    lobby.board = Some(next);

    lobby.broadcast(&ServerMessage::BoardUpdate {
        board: masked,
        started_at: lobby.started_at,
    });
}

/// Relay a cursor frame to everyone else in the lobby. Lossy by design:
/// non-members and unknown codes are silently dropped.
pub async fn cursor_move(store: &SessionStore, conn: &Connection, code: &str, x: f64, y: f64) {
    let code = normalize_code(code);
    let Some(shared) = store.get(&code) else {
        return;
    };
    let lobby = shared.lock().await;

    let Some(player) = lobby.player(conn.id) else {
        return;
    };

    lobby.broadcast_except(
        conn.id,
        &ServerMessage::CursorBroadcast {
            connection_id: conn.id,
            name: player.name.clone(),
            color: player.color.clone(),
            x,
            y,
        },
    );
}

/// Transport-level disconnect. The lobby, if it survives, hears about the
/// smaller roster; a deleted lobby broadcasts nothing.
pub async fn disconnect(store: &SessionStore, connection_id: Uuid) {
    let Some(removed) = store.remove_player(connection_id).await else {
        return;
    };
    let Some(shared) = removed.lobby else {
        debug!("lobby {} deleted with its last player", removed.code);
        return;
    };

    let lobby = shared.lock().await;
    lobby.broadcast(&ServerMessage::PlayerLeft {
        players: lobby.roster(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use minesweep_common::models::PlayerInfo;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn connection() -> (Connection, UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Connection::new(tx), rx)
    }

    /// Sends are synchronous enqueues, so everything already delivered can
    /// be drained without waiting.
    fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    fn names(players: &[PlayerInfo]) -> Vec<&str> {
        players.iter().map(|p| p.name.as_str()).collect()
    }

    /// REST create for "Ana" plus her claimed real-time connection.
    async fn created_lobby(
        store: &SessionStore,
    ) -> (String, Connection, UnboundedReceiver<ServerMessage>) {
        let (code, _) = store.create_lobby(Uuid::nil(), "Ana");
        let (conn, mut rx) = connection();
        join(store, &conn, &code, "Ana").await;
        drain(&mut rx);
        (code, conn, rx)
    }

    async fn find_cell(store: &SessionStore, code: &str, mine: bool) -> (usize, usize) {
        let lobby = store.get(code).unwrap();
        let lobby = lobby.lock().await;
        let board = lobby.board.as_ref().unwrap();
        for r in 0..board.rows() {
            for c in 0..board.cols() {
                if board.cell(r, c).unwrap().mine == mine {
                    return (r, c);
                }
            }
        }
        unreachable!("board has both kinds of cells");
    }

    #[tokio::test]
    async fn join_unknown_code_reports_not_found() {
        let store = SessionStore::new();
        let (conn, mut rx) = connection();

        join(&store, &conn, "ZZZZ", "Ana").await;

        let messages = drain(&mut rx);
        assert!(matches!(
            &messages[..],
            [ServerMessage::Error { message }] if message == "Lobby not found"
        ));
    }

    #[tokio::test]
    async fn first_connection_claims_the_creator_slot() {
        let store = SessionStore::new();
        let (code, _) = store.create_lobby(Uuid::nil(), "Ana");
        let (conn, mut rx) = connection();

        // Codes are case-insensitive on input.
        join(&store, &conn, &code.to_lowercase(), "Ana").await;

        let messages = drain(&mut rx);
        assert!(matches!(
            &messages[0],
            ServerMessage::State { code: c, players, status: LobbyStatus::Waiting, is_host: true }
                if *c == code && names(players) == ["Ana"]
        ));
        assert!(matches!(
            &messages[1],
            ServerMessage::PlayerJoined { players } if players.len() == 1
        ));

        let lobby = store.get(&code).unwrap();
        assert_eq!(lobby.lock().await.host_id, conn.id);
    }

    #[tokio::test]
    async fn second_join_appends_and_notifies_everyone() {
        let store = SessionStore::new();
        let (code, _ana, mut ana_rx) = created_lobby(&store).await;
        let (ben, mut ben_rx) = connection();

        join(&store, &ben, &code, "Ben").await;

        let to_ben = drain(&mut ben_rx);
        assert!(matches!(
            &to_ben[0],
            ServerMessage::State { is_host: false, players, .. } if names(players) == ["Ana", "Ben"]
        ));

        let to_ana = drain(&mut ana_rx);
        assert!(matches!(
            &to_ana[..],
            [ServerMessage::PlayerJoined { players }] if names(players) == ["Ana", "Ben"]
        ));
    }

    #[tokio::test]
    async fn join_rejects_a_fifth_player() {
        let store = SessionStore::new();
        let (code, _ana, _ana_rx) = created_lobby(&store).await;
        for name in ["Ben", "Cho", "Dia"] {
            let (conn, _rx) = connection();
            join(&store, &conn, &code, name).await;
        }

        let (fifth, mut rx) = connection();
        join(&store, &fifth, &code, "Eve").await;

        let messages = drain(&mut rx);
        assert!(matches!(
            &messages[..],
            [ServerMessage::Error { message }] if message == "Lobby is full"
        ));
        assert_eq!(store.get(&code).unwrap().lock().await.players.len(), 4);
    }

    #[tokio::test]
    async fn start_requires_the_host() {
        let store = SessionStore::new();
        let (code, _ana, _ana_rx) = created_lobby(&store).await;
        let (ben, mut ben_rx) = connection();
        join(&store, &ben, &code, "Ben").await;
        drain(&mut ben_rx);

        start(&store, &ben, &code).await;

        let messages = drain(&mut ben_rx);
        assert!(matches!(
            &messages[..],
            [ServerMessage::Error { message }] if message == "Only the host can start the game"
        ));
        assert_eq!(
            store.get(&code).unwrap().lock().await.status,
            LobbyStatus::Waiting
        );
    }

    #[tokio::test]
    async fn start_requires_two_players() {
        let store = SessionStore::new();
        let (code, ana, mut ana_rx) = created_lobby(&store).await;

        start(&store, &ana, &code).await;

        let messages = drain(&mut ana_rx);
        assert!(matches!(
            &messages[..],
            [ServerMessage::Error { message }] if message == "Need at least 2 players to start"
        ));
    }

    #[tokio::test]
    async fn start_deals_a_default_board_to_the_group() {
        let store = SessionStore::new();
        let (code, ana, mut ana_rx) = created_lobby(&store).await;
        let (ben, mut ben_rx) = connection();
        join(&store, &ben, &code, "Ben").await;
        drain(&mut ana_rx);
        drain(&mut ben_rx);

        start(&store, &ana, &code).await;

        for rx in [&mut ana_rx, &mut ben_rx] {
            let messages = drain(rx);
            assert!(matches!(
                &messages[..],
                [ServerMessage::GameStart { board, started_at: None, players }]
                    if board.len() == 16 && board[0].len() == 16 && players.len() == 2
            ));
        }

        let lobby = store.get(&code).unwrap();
        let lobby = lobby.lock().await;
        assert_eq!(lobby.status, LobbyStatus::Playing);
        assert!(lobby.started_at.is_none());
        let board = lobby.board.as_ref().unwrap();
        assert_eq!(board.cells().filter(|c| c.mine).count(), 40);

        // A second start must not regenerate the board.
        drop(lobby);
        start(&store, &ana, &code).await;
        let messages = drain(&mut ana_rx);
        assert!(matches!(
            &messages[..],
            [ServerMessage::Error { message }] if message == "Game already started"
        ));
    }

    #[tokio::test]
    async fn revealing_a_mine_ends_the_game_as_a_loss() {
        let store = SessionStore::new();
        let (code, ana, mut ana_rx) = created_lobby(&store).await;
        let (ben, mut ben_rx) = connection();
        join(&store, &ben, &code, "Ben").await;
        start(&store, &ana, &code).await;
        drain(&mut ana_rx);
        drain(&mut ben_rx);

        let (row, col) = find_cell(&store, &code, true).await;
        reveal(&store, &ben, &code, row, col).await;

        for rx in [&mut ana_rx, &mut ben_rx] {
            let messages = drain(rx);
            assert!(matches!(
                &messages[0],
                ServerMessage::BoardUpdate { started_at: Some(_), .. }
            ));
            assert!(matches!(
                &messages[1],
                ServerMessage::GameOver { result: GameResult::Loss, .. }
            ));
        }

        let lobby = store.get(&code).unwrap();
        let lobby = lobby.lock().await;
        assert_eq!(lobby.status, LobbyStatus::Finished);
        assert!(lobby.finished_at.is_some());
    }

    #[tokio::test]
    async fn safe_reveal_broadcasts_the_masked_board() {
        let store = SessionStore::new();
        let (code, ana, mut ana_rx) = created_lobby(&store).await;
        let (ben, mut ben_rx) = connection();
        join(&store, &ben, &code, "Ben").await;
        start(&store, &ana, &code).await;
        drain(&mut ana_rx);
        drain(&mut ben_rx);

        let (row, col) = find_cell(&store, &code, false).await;
        reveal(&store, &ana, &code, row, col).await;

        let messages = drain(&mut ben_rx);
        let [ServerMessage::BoardUpdate { board, started_at }] = &messages[..] else {
            panic!("expected a single board_update, got {messages:?}");
        };
        assert!(started_at.is_some());
        assert!(board[row][col].revealed);
        // The masked view must not leak any unrevealed mine.
        for row in board {
            for cell in row {
                assert!(cell.mine.is_none() || cell.revealed);
            }
        }
    }

    #[tokio::test]
    async fn reveal_is_ignored_while_waiting() {
        let store = SessionStore::new();
        let (code, ana, mut ana_rx) = created_lobby(&store).await;

        reveal(&store, &ana, &code, 0, 0).await;

        assert!(drain(&mut ana_rx).is_empty());
        let lobby = store.get(&code).unwrap();
        let lobby = lobby.lock().await;
        assert_eq!(lobby.status, LobbyStatus::Waiting);
        assert!(lobby.board.is_none());
    }

    #[tokio::test]
    async fn reveal_after_finish_changes_nothing() {
        let store = SessionStore::new();
        let (code, ana, mut ana_rx) = created_lobby(&store).await;
        let (ben, mut ben_rx) = connection();
        join(&store, &ben, &code, "Ben").await;
        start(&store, &ana, &code).await;

        let (row, col) = find_cell(&store, &code, true).await;
        reveal(&store, &ana, &code, row, col).await;
        drain(&mut ana_rx);
        drain(&mut ben_rx);

        let (safe_row, safe_col) = find_cell(&store, &code, false).await;
        reveal(&store, &ana, &code, safe_row, safe_col).await;

        assert!(drain(&mut ana_rx).is_empty());
        assert!(drain(&mut ben_rx).is_empty());
    }

    #[tokio::test]
    async fn flag_toggles_and_never_finishes_the_game() {
        let store = SessionStore::new();
        let (code, ana, mut ana_rx) = created_lobby(&store).await;
        let (ben, mut ben_rx) = connection();
        join(&store, &ben, &code, "Ben").await;
        start(&store, &ana, &code).await;
        drain(&mut ana_rx);
        drain(&mut ben_rx);

        let (row, col) = find_cell(&store, &code, true).await;
        flag(&store, &ben, &code, row, col).await;

        let messages = drain(&mut ana_rx);
        assert!(matches!(
            &messages[..],
            [ServerMessage::BoardUpdate { board, .. }] if board[row][col].flagged
        ));
        assert_eq!(
            store.get(&code).unwrap().lock().await.status,
            LobbyStatus::Playing
        );
    }

    #[tokio::test]
    async fn cursor_frames_reach_everyone_but_the_sender() {
        let store = SessionStore::new();
        let (code, ana, mut ana_rx) = created_lobby(&store).await;
        let (ben, mut ben_rx) = connection();
        join(&store, &ben, &code, "Ben").await;
        drain(&mut ana_rx);
        drain(&mut ben_rx);

        cursor_move(&store, &ana, &code, 120.5, 64.0).await;

        let to_ben = drain(&mut ben_rx);
        assert!(matches!(
            &to_ben[..],
            [ServerMessage::CursorBroadcast { connection_id, name, x, y, .. }]
                if *connection_id == ana.id && name == "Ana" && *x == 120.5 && *y == 64.0
        ));
        assert!(drain(&mut ana_rx).is_empty());
    }

    #[tokio::test]
    async fn cursor_from_non_member_is_dropped() {
        let store = SessionStore::new();
        let (code, _ana, mut ana_rx) = created_lobby(&store).await;
        let (stranger, mut stranger_rx) = connection();

        cursor_move(&store, &stranger, &code, 1.0, 1.0).await;

        assert!(drain(&mut ana_rx).is_empty());
        assert!(drain(&mut stranger_rx).is_empty());
    }

    #[tokio::test]
    async fn host_disconnect_mid_game_promotes_the_survivor() {
        let store = SessionStore::new();
        let (code, ana, mut ana_rx) = created_lobby(&store).await;
        let (ben, mut ben_rx) = connection();
        join(&store, &ben, &code, "Ben").await;
        start(&store, &ana, &code).await;
        drain(&mut ana_rx);
        drain(&mut ben_rx);

        disconnect(&store, ana.id).await;

        let lobby = store.get(&code).expect("playing lobby must survive");
        let lobby = lobby.lock().await;
        assert_eq!(lobby.status, LobbyStatus::Playing);
        assert_eq!(lobby.host_id, ben.id);
        assert_eq!(names(&lobby.roster()), ["Ben"]);
        drop(lobby);

        let to_ben = drain(&mut ben_rx);
        assert!(matches!(
            &to_ben[..],
            [ServerMessage::PlayerLeft { players }] if names(players) == ["Ben"]
        ));
    }

    #[tokio::test]
    async fn last_player_leaving_a_waiting_lobby_deletes_it() {
        let store = SessionStore::new();
        let (code, ana, _ana_rx) = created_lobby(&store).await;

        disconnect(&store, ana.id).await;

        assert!(store.get(&code).is_none());
    }

    #[tokio::test]
    async fn join_after_finish_is_a_conflict() {
        let store = SessionStore::new();
        let (code, ana, _ana_rx) = created_lobby(&store).await;
        let (ben, _ben_rx) = connection();
        join(&store, &ben, &code, "Ben").await;
        start(&store, &ana, &code).await;
        let (row, col) = find_cell(&store, &code, true).await;
        reveal(&store, &ana, &code, row, col).await;

        let (late, mut late_rx) = connection();
        join(&store, &late, &code, "Cho").await;

        let messages = drain(&mut late_rx);
        assert!(matches!(
            &messages[..],
            [ServerMessage::Error { message }] if message == "Game already finished"
        ));
    }

    #[tokio::test]
    async fn late_joiner_to_a_running_game_gets_the_board() {
        let store = SessionStore::new();
        let (code, ana, _ana_rx) = created_lobby(&store).await;
        let (ben, _ben_rx) = connection();
        join(&store, &ben, &code, "Ben").await;
        start(&store, &ana, &code).await;
        let (row, col) = find_cell(&store, &code, false).await;
        reveal(&store, &ana, &code, row, col).await;

        let (cho, mut cho_rx) = connection();
        join(&store, &cho, &code, "Cho").await;

        let messages = drain(&mut cho_rx);
        assert!(matches!(
            &messages[0],
            ServerMessage::State { status: LobbyStatus::Playing, is_host: false, .. }
        ));
        assert!(matches!(
            &messages[1],
            ServerMessage::BoardUpdate { started_at: Some(_), .. }
        ));
        assert!(matches!(
            &messages[2],
            ServerMessage::PlayerJoined { players } if players.len() == 3
        ));
    }

    #[tokio::test]
    async fn playing_lobby_without_a_board_is_discarded() {
        let store = SessionStore::new();
        let (code, ana, mut ana_rx) = created_lobby(&store).await;
        store.get(&code).unwrap().lock().await.status = LobbyStatus::Playing;

        reveal(&store, &ana, &code, 0, 0).await;

        assert!(store.get(&code).is_none());
        assert!(drain(&mut ana_rx).is_empty());
    }
}
