use rocket::http::Status;
use thiserror::Error;

/// Everything a lobby operation can refuse. The display string is exactly
/// what reaches the offending client, either as an `error{message}` frame or
/// as the REST error body; none of these ever mutate session state.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum LobbyError {
    #[error("Lobby not found")]
    NotFound,
    #[error("Only the host can start the game")]
    NotHost,
    #[error("Game already finished")]
    AlreadyFinished,
    #[error("Game already started")]
    AlreadyStarted,
    #[error("Lobby is full")]
    Full,
    #[error("Need at least 2 players to start")]
    NotEnoughPlayers,
    #[error("name is required")]
    MissingName,
    #[error("code and name are required")]
    MissingFields,
    #[error("Invalid message format")]
    Invalid,
}

impl LobbyError {
    /// HTTP status for the pre-flight routes. The real-time channel ignores
    /// this and delivers the message text alone.
    pub fn status(&self) -> Status {
        match self {
            Self::NotFound => Status::NotFound,
            Self::NotHost => Status::Forbidden,
            Self::AlreadyFinished
            | Self::AlreadyStarted
            | Self::Full
            | Self::NotEnoughPlayers => Status::Conflict,
            Self::MissingName | Self::MissingFields | Self::Invalid => Status::BadRequest,
        }
    }
}
