use rocket::{
    State,
    futures::{SinkExt, StreamExt},
    get,
    http::Status,
    post,
    serde::json::Json,
};
use rocket_ws::{Channel, Message, WebSocket};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use minesweep_common::api::{
    CreateRequest, CreateResponse, ErrorResponse, HealthResponse, JoinRequest, JoinResponse,
};
use minesweep_common::models::LobbyStatus;
use minesweep_common::protocol::{ClientMessage, ServerMessage};

use crate::error::LobbyError;
use crate::rate_limit::{ClientIp, RateLimiter, check_rate_limit};
use crate::session::{self, Connection};
use crate::store::{MAX_PLAYERS, SharedStore, normalize_code};

type ApiError = (Status, Json<ErrorResponse>);

fn api_error(err: LobbyError) -> ApiError {
    (
        err.status(),
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

#[get("/")]
pub fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "MineSweep Together API",
    })
}

/// Pre-flight create. The creator is seated as a placeholder and claims the
/// slot with their first real-time join.
#[post("/lobby/create", data = "<request>")]
pub fn create_lobby(
    request: Json<CreateRequest>,
    store: &State<SharedStore>,
    rate_limiter: &State<RateLimiter>,
    client_ip: ClientIp,
) -> Result<(Status, Json<CreateResponse>), ApiError> {
    if let Err(status) = check_rate_limit(rate_limiter, &client_ip) {
        warn!("rate limit exceeded for {}", client_ip.0);
        return Err((
            status,
            Json(ErrorResponse {
                error: "Too many lobbies created, slow down".to_string(),
            }),
        ));
    }

    let name = request.name.trim();
    if name.is_empty() {
        return Err(api_error(LobbyError::MissingName));
    }

    let (code, _) = store.create_lobby(Uuid::nil(), name);
    Ok((Status::Created, Json(CreateResponse { code })))
}

/// Pre-flight join check; not authoritative, the real join happens over the
/// websocket.
#[post("/lobby/join", data = "<request>")]
pub async fn join_lobby(
    request: Json<JoinRequest>,
    store: &State<SharedStore>,
) -> Result<Json<JoinResponse>, ApiError> {
    if request.code.trim().is_empty() || request.name.trim().is_empty() {
        return Err(api_error(LobbyError::MissingFields));
    }

    let code = normalize_code(&request.code);
    let Some(shared) = store.get(&code) else {
        return Err(api_error(LobbyError::NotFound));
    };
    let lobby = shared.lock().await;

    if lobby.status == LobbyStatus::Finished {
        return Err(api_error(LobbyError::AlreadyFinished));
    }
    if lobby.players.len() >= MAX_PLAYERS {
        return Err(api_error(LobbyError::Full));
    }

    Ok(Json(JoinResponse {
        ok: true,
        status: lobby.status,
    }))
}

#[get("/ws")]
pub fn websocket(ws: WebSocket, store: &State<SharedStore>) -> Channel<'static> {
    let store = store.inner().clone();
    ws.channel(move |stream| {
        Box::pin(async move {
            let (mut sink, mut read) = stream.split();
            let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

            // One writer task per connection; event handlers only enqueue.
            let writer = tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    let Ok(text) = serde_json::to_string(&message) else {
                        continue;
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            let conn = Connection::new(tx);
            info!("connection {} established", conn.id);

            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text)
                    {
                        Ok(message) => session::handle_message(&store, &conn, message).await,
                        Err(e) => {
                            warn!("invalid frame from {}: {}", conn.id, e);
                            conn.reject(LobbyError::Invalid);
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {} // pings and binary frames carry no events
                    Err(e) => {
                        error!("websocket error on {}: {}", conn.id, e);
                        break;
                    }
                }
            }

            session::disconnect(&store, conn.id).await;
            writer.abort();
            info!("connection {} closed", conn.id);
            Ok(())
        })
    })
}
