//! WebSocket handler: task relay transport.
//!
//! DESIGN
//! ======
//! On upgrade, registers the client in its scope, pushes the scope's task
//! list, and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by event name
//! - Frames queued on the client channel (loads, broadcasts) → forward
//!
//! Load and update pushes always travel through the client channel so they
//! keep the order the relay produced them in. Only error frames are
//! returned directly to the sender.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade with `?userId=..&orgId=..` → join scope → push load event
//! 2. Client sends mutations → relay writes, reloads, broadcasts
//! 3. `rejoin` → part old scope, join new one, push load event
//! 4. Close → part scope (last client evicts it)

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{EVENT_ERROR, FRAME_CODE, FRAME_MESSAGE, Frame, error_frame};
use crate::services::relay::{self, EVENT_REJOIN, RelayError, TaskMutation};
use crate::state::AppState;
use crate::store::Scope;

/// Outbound queue depth per connection.
const CLIENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// UPGRADE
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub user_id: Option<String>,
    pub org_id: Option<String>,
}

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let (user_id, org_id) = match resolve_identity(&params) {
        Ok(identity) => identity,
        Err(message) => return (StatusCode::BAD_REQUEST, message).into_response(),
    };
    ws.on_upgrade(move |socket| run_ws(socket, state, user_id, org_id))
}

/// Validate connect parameters: `userId` required, `orgId` optional.
fn resolve_identity(params: &ConnectParams) -> Result<(Uuid, Option<Uuid>), &'static str> {
    let user_id = params
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or("userId required")?
        .parse::<Uuid>()
        .map_err(|_| "userId must be a uuid")?;
    let org_id = match params
        .org_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        Some(raw) => Some(raw.parse::<Uuid>().map_err(|_| "orgId must be a uuid")?),
        None => None,
    };
    Ok((user_id, org_id))
}

// =============================================================================
// CONNECTION
// =============================================================================

/// Per-connection identity and subscription.
struct Connection {
    client_id: Uuid,
    user_id: Uuid,
    scope: Scope,
    tx: mpsc::Sender<Frame>,
}

async fn run_ws(mut socket: WebSocket, state: AppState, user_id: Uuid, org_id: Option<Uuid>) {
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(CLIENT_CHANNEL_CAPACITY);
    let mut conn = Connection {
        client_id: Uuid::new_v4(),
        user_id,
        scope: Scope::for_identity(user_id, org_id),
        tx: client_tx,
    };
    info!(client_id = %conn.client_id, %user_id, scope = %conn.scope, "ws: client connected");

    for frame in subscribe(&state, &conn).await {
        if send_frame(&mut socket, &frame).await.is_err() {
            relay::part_scope(&state, conn.scope, conn.client_id).await;
            return;
        }
    }

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        for frame in process_inbound_text(&state, &mut conn, text.as_str()).await {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    relay::part_scope(&state, conn.scope, conn.client_id).await;
    info!(client_id = %conn.client_id, "ws: client disconnected");
}

/// Join the connection's scope and queue its load event. A failed load
/// leaves the client subscribed and yields an error frame instead.
async fn subscribe(state: &AppState, conn: &Connection) -> Vec<Frame> {
    relay::join_scope(state, conn.scope, conn.client_id, conn.tx.clone()).await;
    match relay::send_load(state, conn.scope, conn.client_id).await {
        Ok(_) => Vec::new(),
        Err(e) => {
            warn!(client_id = %conn.client_id, scope = %conn.scope, error = %e, "ws: initial load failed");
            vec![error_frame(conn.scope.load_event(), &e)]
        }
    }
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
///
/// Keeps the websocket transport separate from frame handling, so tests can
/// drive dispatch with a plain channel.
async fn process_inbound_text(state: &AppState, conn: &mut Connection, text: &str) -> Vec<Frame> {
    let req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(client_id = %conn.client_id, error = %e, "ws: invalid inbound frame");
            return vec![error_frame("", &RelayError::Malformed(e.to_string()))];
        }
    };
    info!(client_id = %conn.client_id, id = %req.id, event = %req.event, "ws: recv frame");

    if req.event == EVENT_REJOIN {
        return handle_rejoin(state, conn, &req).await;
    }

    let result = match TaskMutation::from_frame(&req) {
        Ok(mutation) => relay::apply_mutation(state, conn.scope, conn.user_id, mutation)
            .await
            .map(|_| ()),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => Vec::new(),
        Err(e) => vec![req.error_from(&e)],
    }
}

async fn handle_rejoin(state: &AppState, conn: &mut Connection, req: &Frame) -> Vec<Frame> {
    let (user_id, org_id) = match relay::parse_rejoin(req) {
        Ok(identity) => identity,
        Err(e) => return vec![req.error_from(&e)],
    };
    let scope = Scope::for_identity(user_id, org_id);

    if scope != conn.scope {
        relay::part_scope(state, conn.scope, conn.client_id).await;
        conn.scope = scope;
    }
    conn.user_id = user_id;
    info!(client_id = %conn.client_id, %scope, "ws: rejoin");

    relay::join_scope(state, conn.scope, conn.client_id, conn.tx.clone()).await;
    match relay::send_load(state, conn.scope, conn.client_id).await {
        Ok(_) => Vec::new(),
        Err(e) => vec![req.error_from(&e)],
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.event == EVENT_ERROR {
        let code = frame.str_field(FRAME_CODE).unwrap_or("-");
        let message = frame.str_field(FRAME_MESSAGE).unwrap_or("-");
        warn!(id = %frame.id, code, message, "ws: send error frame");
    } else {
        info!(id = %frame.id, event = %frame.event, "ws: send frame");
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
