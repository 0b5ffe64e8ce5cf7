//! Task WebSocket endpoints: live log streaming and interactive terminal
//! sessions, plus workspace upload.
//!
//! WS auth uses a `token` query parameter validated against the same API
//! token as HTTP.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use swb_domain::protocol::{LogStreamFrame, TerminalClientFrame, TerminalServerFrame};

use crate::state::AppState;

use super::{api_error, bearer_token, token_authorized};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/tasks/:id/logs/ws
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct LogsWsQuery {
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub token: Option<String>,
}

/// Upgrade to a log stream: replay from the requested offset, then live
/// `log_lines` and `status_change` frames.
pub async fn logs_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Query(query): Query<LogsWsQuery>,
) -> Response {
    if !token_authorized(&state, query.token.as_deref()) {
        return api_error(StatusCode::UNAUTHORIZED, "invalid or missing token");
    }
    if state.tasks.get(&task_id).is_none() {
        return api_error(StatusCode::NOT_FOUND, "task not found");
    }
    ws.on_upgrade(move |socket| stream_logs(socket, state, task_id, query.offset))
}

async fn stream_logs(mut socket: WebSocket, state: AppState, task_id: Uuid, offset: u64) {
    // Subscribe before replaying so no line falls between the two.
    let mut live = state.logs.subscribe(&task_id);

    const REPLAY_BATCH: usize = 500;
    let mut replayed_until = offset;
    loop {
        let batch = state.logs.tail(&task_id, replayed_until, REPLAY_BATCH);
        if batch.is_empty() {
            break;
        }
        let frame = LogStreamFrame::LogLines {
            offset: replayed_until,
            lines: batch.clone(),
        };
        replayed_until += batch.len() as u64;
        if send_frame(&mut socket, &frame).await.is_err() {
            return;
        }
        if batch.len() < REPLAY_BATCH {
            break;
        }
    }

    loop {
        tokio::select! {
            frame = live.recv() => match frame {
                Ok(LogStreamFrame::LogLines { offset, lines }) => {
                    // Lines already replayed are skipped; frames carry their
                    // starting offset so the filter is exact.
                    if offset < replayed_until {
                        continue;
                    }
                    replayed_until = offset + lines.len() as u64;
                    if send_frame(&mut socket, &LogStreamFrame::LogLines { offset, lines })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Ok(status_frame @ LogStreamFrame::StatusChange { .. }) => {
                    if send_frame(&mut socket, &status_frame).await.is_err() {
                        return;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    state.logs.record_dropped(n);
                    tracing::warn!(task_id = %task_id, dropped = n, "log subscriber lagged");
                }
                Err(RecvError::Closed) => return,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Close(_))) | None => return,
                Some(Ok(_)) => {} // log stream is one-way
                Some(Err(_)) => return,
            },
        }
    }
}

async fn send_frame<T: serde::Serialize>(socket: &mut WebSocket, frame: &T) -> Result<(), ()> {
    let json = serde_json::to_string(frame).map_err(|_| ())?;
    socket.send(Message::Text(json)).await.map_err(|_| ())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/tasks/:id/terminal/ws
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_rows() -> u16 {
    24
}

fn d_cols() -> u16 {
    80
}

#[derive(Debug, Deserialize)]
pub struct TerminalWsQuery {
    pub session_id: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "d_rows")]
    pub rows: u16,
    #[serde(default = "d_cols")]
    pub cols: u16,
}

/// Create (or rejoin by `session_id`) an interactive PTY attached to the
/// task's container.
pub async fn terminal_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Query(query): Query<TerminalWsQuery>,
) -> Response {
    if !token_authorized(&state, query.token.as_deref()) {
        return api_error(StatusCode::UNAUTHORIZED, "invalid or missing token");
    }
    let Some(task) = state.tasks.get(&task_id) else {
        return api_error(StatusCode::NOT_FOUND, "task not found");
    };
    let Some(container_ref) = task.container_ref else {
        return api_error(StatusCode::CONFLICT, "task has no running container");
    };

    ws.on_upgrade(move |socket| {
        drive_terminal(socket, state, task_id, query, container_ref)
    })
}

async fn drive_terminal(
    mut socket: WebSocket,
    state: AppState,
    task_id: Uuid,
    query: TerminalWsQuery,
    container_ref: String,
) {
    let session = match state
        .terminals
        .open_or_join(
            state.containers.as_ref(),
            task_id,
            &query.session_id,
            &container_ref,
            query.rows,
            query.cols,
        )
        .await
    {
        Ok(session) => session,
        Err(e) => {
            // A terminal failure never touches the task itself.
            let _ = send_frame(
                &mut socket,
                &TerminalServerFrame::Error {
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    };

    let mut output = session.subscribe();
    if send_frame(&mut socket, &TerminalServerFrame::Ready).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            chunk = output.recv() => match chunk {
                Ok(data) => {
                    if send_frame(&mut socket, &TerminalServerFrame::Output { data })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    let _ = send_frame(
                        &mut socket,
                        &TerminalServerFrame::Error {
                            message: format!("{n} output chunks dropped"),
                        },
                    )
                    .await;
                }
                Err(RecvError::Closed) => {
                    let _ = send_frame(
                        &mut socket,
                        &TerminalServerFrame::Error {
                            message: "terminal closed".into(),
                        },
                    )
                    .await;
                    return;
                }
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<TerminalClientFrame>(&text) {
                        Ok(TerminalClientFrame::Input { data }) => {
                            if let Err(e) = session.send_input(data).await {
                                let _ = send_frame(
                                    &mut socket,
                                    &TerminalServerFrame::Error { message: e.to_string() },
                                )
                                .await;
                                return;
                            }
                        }
                        Ok(TerminalClientFrame::Resize { rows, cols }) => {
                            let _ = session.send_resize(rows, cols).await;
                        }
                        Err(_) => {
                            tracing::debug!(task_id = %task_id, "ignoring unparseable terminal frame");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => return,
                Some(Ok(_)) => {}
                Some(Err(_)) => return,
            },
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/tasks/:id/workspace/upload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct UploadBody {
    /// Path relative to the workspace root.
    pub path: String,
    pub content: String,
}

pub async fn upload(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<UploadBody>,
) -> Response {
    if !token_authorized(&state, bearer_token(&headers).as_deref()) {
        return api_error(StatusCode::UNAUTHORIZED, "invalid or missing API token");
    }
    let Some(task) = state.tasks.get(&task_id) else {
        return api_error(StatusCode::NOT_FOUND, "task not found");
    };

    let relative = body.path.trim_start_matches('/');
    if relative.split('/').any(|part| part == "..") {
        return api_error(StatusCode::FORBIDDEN, "path escapes the task workspace");
    }
    let target = task.workspace_path.join(relative);
    if let Some(parent) = target.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    }
    if let Err(e) = std::fs::write(&target, body.content.as_bytes()) {
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    tracing::info!(task_id = %task_id, path = %relative, "workspace file uploaded");
    Json(serde_json::json!({"path": relative, "bytes": body.content.len()})).into_response()
}
