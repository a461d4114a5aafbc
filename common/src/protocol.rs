use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{GameResult, LobbyStatus, MaskedBoard, PlayerInfo};

/// Events a client may send over the real-time channel.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "action")]
pub enum ClientMessage {
    #[serde(rename = "join")]
    Join { code: String, name: String },
    #[serde(rename = "start")]
    Start { code: String },
    #[serde(rename = "reveal")]
    Reveal { code: String, row: usize, col: usize },
    #[serde(rename = "flag")]
    Flag { code: String, row: usize, col: usize },
    #[serde(rename = "cursorMove")]
    CursorMove { code: String, x: f64, y: f64 },
}

/// Events the server sends back, either to one connection or a whole lobby.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Full session snapshot, sent to a connection right after it joins.
    #[serde(rename = "state")]
    State {
        code: String,
        players: Vec<PlayerInfo>,
        status: LobbyStatus,
        #[serde(rename = "isHost")]
        is_host: bool,
    },
    #[serde(rename = "player_joined")]
    PlayerJoined { players: Vec<PlayerInfo> },
    #[serde(rename = "player_left")]
    PlayerLeft { players: Vec<PlayerInfo> },
    #[serde(rename = "game_start")]
    GameStart {
        board: MaskedBoard,
        #[serde(rename = "startedAt")]
        started_at: Option<u64>,
        players: Vec<PlayerInfo>,
    },
    #[serde(rename = "board_update")]
    BoardUpdate {
        board: MaskedBoard,
        #[serde(rename = "startedAt")]
        started_at: Option<u64>,
    },
    /// Terminal result; `time` is milliseconds from first reveal to the end.
    #[serde(rename = "game_over")]
    GameOver { result: GameResult, time: u64 },
    #[serde(rename = "cursor_broadcast")]
    CursorBroadcast {
        #[serde(rename = "connectionId")]
        connection_id: Uuid,
        name: String,
        color: String,
        x: f64,
        y: f64,
    },
    #[serde(rename = "error")]
    Error { message: String },
}
