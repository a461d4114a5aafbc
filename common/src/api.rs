use serde::{Deserialize, Serialize};

use crate::models::LobbyStatus;

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateRequest {
    pub name: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateResponse {
    pub code: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct JoinRequest {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct JoinResponse {
    pub ok: bool,
    pub status: LobbyStatus,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}
