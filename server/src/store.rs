use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::{DashMap, Entry};
use nanoid::nanoid;
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};
use uuid::Uuid;

use minesweep_common::models::{LobbyStatus, PlayerInfo};
use minesweep_common::protocol::ServerMessage;

use crate::board::Board;

/// Color palette assigned strictly by join order; a fifth player would fall
/// back to the neutral gray.
pub const PLAYER_COLORS: [&str; 4] = ["#EF4444", "#3B82F6", "#10B981", "#F59E0B"];
pub const OVERFLOW_COLOR: &str = "#6B7280";

pub const MAX_PLAYERS: usize = 4;
pub const CODE_LENGTH: usize = 4;

const CODE_ALPHABET: [char; 36] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R',
    'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

/// Outbound half of one connection. Sends are plain enqueues; a writer task
/// per connection drains into the socket.
pub type OutboundSender = UnboundedSender<ServerMessage>;

pub type SharedLobby = Arc<Mutex<Lobby>>;
pub type SharedStore = Arc<SessionStore>;

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Codes are case-insensitive on the way in, uppercase everywhere else.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

#[derive(Clone, Debug)]
pub struct Player {
    pub connection_id: Uuid,
    pub name: String,
    pub color: String,
}

impl Player {
    fn new(connection_id: Uuid, name: String, slot: usize) -> Self {
        let color = PLAYER_COLORS
            .get(slot)
            .copied()
            .unwrap_or(OVERFLOW_COLOR)
            .to_string();
        Self {
            connection_id,
            name,
            color,
        }
    }

    /// A lobby created over REST holds its creator as a placeholder until
    /// the first real-time connection claims the slot.
    pub fn is_placeholder(&self) -> bool {
        self.connection_id.is_nil()
    }

    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            name: self.name.clone(),
            color: self.color.clone(),
        }
    }
}

/// One shared game session. All mutation happens under the session mutex;
/// broadcast enqueues happen under the same lock, so group delivery order
/// matches the serialization order of accepted events.
pub struct Lobby {
    pub code: String,
    pub status: LobbyStatus,
    pub players: Vec<Player>,
    pub board: Option<Board>,
    /// Epoch millis of the first reveal, not of game start.
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
    pub created_at: u64,
    pub host_id: Uuid,
    streams: HashMap<Uuid, OutboundSender>,
}

impl Lobby {
    fn new(code: String, creator: Player) -> Self {
        let host_id = creator.connection_id;
        Self {
            code,
            status: LobbyStatus::Waiting,
            players: vec![creator],
            board: None,
            started_at: None,
            finished_at: None,
            created_at: now_millis(),
            host_id,
            streams: HashMap::new(),
        }
    }

    pub fn is_member(&self, connection_id: Uuid) -> bool {
        self.players
            .iter()
            .any(|p| p.connection_id == connection_id)
    }

    pub fn player(&self, connection_id: Uuid) -> Option<&Player> {
        self.players
            .iter()
            .find(|p| p.connection_id == connection_id)
    }

    pub fn roster(&self) -> Vec<PlayerInfo> {
        self.players.iter().map(Player::info).collect()
    }

    /// Append a player at the next color slot. Capacity is the controller's
    /// call, not enforced here.
    pub fn add_player(&mut self, connection_id: Uuid, name: &str) {
        let slot = self.players.len();
        self.players
            .push(Player::new(connection_id, name.to_string(), slot));
    }

    /// Hand the pending creator slot to its first real-time connection.
    /// Roster size and color are unchanged; the host role moves with it.
    pub fn claim_placeholder(&mut self, connection_id: Uuid) -> bool {
        if let Some(slot) = self.players.iter_mut().find(|p| p.is_placeholder()) {
            slot.connection_id = connection_id;
            self.host_id = connection_id;
            return true;
        }
        false
    }

    /// Drop a roster entry and its stream. Promotes the first remaining
    /// player when the host leaves. Returns false if the connection was not
    /// a member.
    pub fn remove_player(&mut self, connection_id: Uuid) -> bool {
        self.detach(connection_id);
        let Some(idx) = self
            .players
            .iter()
            .position(|p| p.connection_id == connection_id)
        else {
            return false;
        };
        self.players.remove(idx);

        if self.host_id == connection_id
            && let Some(next) = self.players.first()
        {
            self.host_id = next.connection_id;
            debug!("host left lobby {}, promoted {}", self.code, next.name);
        }
        true
    }

    /// The playing-without-a-board state is unreachable through the normal
    /// transitions; observing it means the lobby is corrupt.
    pub fn board_missing(&self) -> bool {
        self.status == LobbyStatus::Playing && self.board.is_none()
    }

    pub fn attach(&mut self, connection_id: Uuid, sender: OutboundSender) {
        self.streams.insert(connection_id, sender);
    }

    pub fn detach(&mut self, connection_id: Uuid) {
        self.streams.remove(&connection_id);
    }

    pub fn connection_count(&self) -> usize {
        self.streams.len()
    }

    pub fn send_to(&self, connection_id: Uuid, message: ServerMessage) {
        if let Some(sender) = self.streams.get(&connection_id) {
            let _ = sender.send(message);
        }
    }

    pub fn broadcast(&self, message: &ServerMessage) {
        for sender in self.streams.values() {
            let _ = sender.send(message.clone());
        }
    }

    pub fn broadcast_except(&self, skip: Uuid, message: &ServerMessage) {
        for (id, sender) in &self.streams {
            if *id != skip {
                let _ = sender.send(message.clone());
            }
        }
    }
}

/// Outcome of removing a connection from whatever lobby held it.
pub struct RemovedPlayer {
    pub code: String,
    /// `None` when the lobby was deleted along with its last player.
    pub lobby: Option<SharedLobby>,
}

/// In-memory session repository. The map layer only allocates and resolves
/// codes; per-session serialization lives in each entry's mutex. A second
/// map indexes connection id to session code so disconnects resolve in O(1).
#[derive(Default)]
pub struct SessionStore {
    lobbies: DashMap<String, SharedLobby>,
    connections: DashMap<Uuid, String>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh code and create a lobby with its creator in slot 0.
    /// A nil connection id creates the REST placeholder variant.
    pub fn create_lobby(&self, connection_id: Uuid, name: &str) -> (String, SharedLobby) {
        loop {
            let code = nanoid!(CODE_LENGTH, &CODE_ALPHABET);
            match self.lobbies.entry(code.clone()) {
                Entry::Occupied(_) => {
                    debug!("lobby code collision, retrying: {}", code);
                    continue;
                }
                Entry::Vacant(entry) => {
                    let creator = Player::new(connection_id, name.to_string(), 0);
                    let lobby = Arc::new(Mutex::new(Lobby::new(code.clone(), creator)));
                    entry.insert(lobby.clone());
                    if !connection_id.is_nil() {
                        self.connections.insert(connection_id, code.clone());
                    }
                    info!("created lobby {}", code);
                    return (code, lobby);
                }
            }
        }
    }

    pub fn get(&self, code: &str) -> Option<SharedLobby> {
        self.lobbies.get(code).map(|entry| entry.value().clone())
    }

    pub fn delete(&self, code: &str) {
        self.lobbies.remove(code);
        self.connections.retain(|_, c| c != code);
        info!("deleted lobby {}", code);
    }

    /// Record which lobby a live connection belongs to.
    pub fn track_connection(&self, connection_id: Uuid, code: &str) {
        self.connections.insert(connection_id, code.to_string());
    }

    /// Remove a connection from the lobby holding it. An empty roster
    /// deletes the lobby only while it is still waiting; a playing or
    /// finished lobby is kept alive for reconnect races and left to the
    /// sweeper.
    pub async fn remove_player(&self, connection_id: Uuid) -> Option<RemovedPlayer> {
        let (_, code) = self.connections.remove(&connection_id)?;
        let lobby = self.get(&code)?;

        let mut guard = lobby.lock().await;
        if !guard.remove_player(connection_id) {
            return None;
        }

        if guard.players.is_empty() && guard.status == LobbyStatus::Waiting {
            drop(guard);
            self.delete(&code);
            return Some(RemovedPlayer { code, lobby: None });
        }
        drop(guard);

        Some(RemovedPlayer {
            code,
            lobby: Some(lobby),
        })
    }

    pub fn lobby_count(&self) -> usize {
        self.lobbies.len()
    }

    /// One sweep pass: delete lobbies past the maximum lifetime or finished
    /// longer than the finished-age limit. Busy lobbies are skipped this
    /// round and picked up on the next one.
    pub fn sweep(&self, now: u64, max_age_ms: u64, max_finished_ms: u64) -> usize {
        let mut stale = Vec::new();

        for entry in self.lobbies.iter() {
            if let Ok(lobby) = entry.value().try_lock() {
                let too_old = now.saturating_sub(lobby.created_at) > max_age_ms;
                let finished_too_long = lobby.status == LobbyStatus::Finished
                    && lobby
                        .finished_at
                        .is_some_and(|t| now.saturating_sub(t) > max_finished_ms);

                if too_old || finished_too_long {
                    stale.push(entry.key().clone());
                }
            }
        }

        let removed = stale.len();
        for code in stale {
            self.delete(&code);
            debug!("swept stale lobby {}", code);
        }
        removed
    }
}
