use serde::{Deserialize, Serialize};

/// One cell as a client is allowed to see it.
///
/// For an unrevealed cell the `mine` key is absent and `adjacentMines` is
/// forced to zero, whatever the authoritative board says. A revealed mine
/// carries `mine: true` so clients can render the explosion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskedCell {
    pub revealed: bool,
    pub flagged: bool,
    pub adjacent_mines: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mine: Option<bool>,
}

/// Row-major grid of masked cells, the only board shape that crosses the wire.
pub type MaskedBoard = Vec<Vec<MaskedCell>>;

/// Roster entry as broadcast to clients. Connection ids stay server-side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub name: String,
    pub color: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LobbyStatus {
    Waiting,
    Playing,
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameResult {
    Win,
    Loss,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct BoardParams {
    pub rows: usize,
    pub cols: usize,
    pub mines: usize,
}

impl Default for BoardParams {
    fn default() -> Self {
        Self {
            rows: 16,
            cols: 16,
            mines: 40,
        }
    }
}
