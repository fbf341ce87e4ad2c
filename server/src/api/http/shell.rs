//! Interactive shell websockets
//!
//! Text frames are typed into the remote pty verbatim, except a frame that
//! is exactly `{"type":"resize","cols":N,"rows":M}`, which resizes it. Pty
//! output goes back as text frames. Failures are written into the terminal
//! as a bracketed status line before the socket closes.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::domain::types::TerminalSize;
use crate::infra::ssh::{ShellChannels, ShellInput};
use crate::service::output::Utf8Decoder;
use crate::service::shell::{OpenShell, ShellService, ShellTarget};
use crate::{AppState, Error, Result};

#[derive(Debug, Deserialize)]
pub struct PermanentSshQuery {
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JailShellQuery {
    pub username: Option<String>,
    pub jail_path: Option<String>,
    pub sandbox_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResizeFrame {
    #[serde(rename = "type")]
    kind: String,
    cols: u16,
    rows: u16,
}

/// A resize control frame, or `None` for keystroke data
fn parse_resize(text: &str) -> Option<TerminalSize> {
    let frame: ResizeFrame = serde_json::from_str(text).ok()?;
    (frame.kind == "resize").then(|| TerminalSize::new(frame.cols, frame.rows))
}

fn status_line(text: &str) -> Message {
    Message::Text(format!("\r\n[{}]\r\n", text).into())
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::MissingParameter(name.to_string()))
}

/// `/ws/permanentSsh?username=`
pub async fn permanent_ssh(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<PermanentSshQuery>,
) -> Response {
    let request = required(query.username, "username").map(|u| (u, ShellTarget::Host));
    let service = state.shell_service.clone();
    ws.on_upgrade(move |socket: WebSocket| async move {
        let (sink, stream) = socket.split();
        serve_shell(sink, stream, service, request).await;
    })
}

/// `/ws/jailShell?username=&jailPath=&sandboxName=`
pub async fn jail_shell(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<JailShellQuery>,
) -> Response {
    let request = jail_target(query);
    let service = state.shell_service.clone();
    ws.on_upgrade(move |socket: WebSocket| async move {
        let (sink, stream) = socket.split();
        serve_shell(sink, stream, service, request).await;
    })
}

fn jail_target(query: JailShellQuery) -> Result<(String, ShellTarget)> {
    let username = required(query.username, "username")?;
    let path = required(query.jail_path, "jailPath")?;
    let name = required(query.sandbox_name, "sandboxName")?;
    Ok((username, ShellTarget::Jail { path, name }))
}

/// Connecting and authenticating, then the relay
async fn serve_shell<Si, St, E>(
    mut sink: Si,
    stream: St,
    service: Arc<ShellService>,
    request: Result<(String, ShellTarget)>,
) where
    Si: Sink<Message> + Unpin,
    St: Stream<Item = std::result::Result<Message, E>> + Unpin,
{
    let (username, target) = match request {
        Ok(request) => request,
        Err(e) => {
            let _ = sink.send(status_line(&format!("Error: {}", e))).await;
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };

    let shell = match service.open(&username, &target).await {
        Ok(shell) => shell,
        Err(e) => {
            warn!(user = %username, "Shell setup failed: {}", e);
            let _ = sink.send(status_line(&format!("SSH error: {}", e))).await;
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };

    info!(user = %username, target = ?target, "Shell relay started");
    relay_shell(sink, stream, shell).await;
    info!(user = %username, "Shell relay ended");
}

/// Bridge an open shell and a websocket until either side closes
pub(crate) async fn relay_shell<Si, St, E>(mut sink: Si, mut stream: St, shell: OpenShell)
where
    Si: Sink<Message> + Unpin,
    St: Stream<Item = std::result::Result<Message, E>> + Unpin,
{
    let OpenShell {
        channels: ShellChannels { input, mut output },
        mut registration,
    } = shell;
    let mut decoder = Utf8Decoder::default();
    // Input waiting for room in the shell channel; output keeps draining meanwhile
    let mut pending: Option<ShellInput> = None;

    loop {
        tokio::select! {
            chunk = output.recv() => match chunk {
                Some(bytes) => {
                    let text = decoder.decode(&bytes);
                    if !text.is_empty() && sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = sink.send(status_line("Connection closed")).await;
                    break;
                }
            },
            permit = input.reserve(), if pending.is_some() => match permit {
                Ok(permit) => {
                    if let Some(shell_input) = pending.take() {
                        permit.send(shell_input);
                    }
                }
                Err(_) => {
                    let _ = sink.send(status_line("Connection closed")).await;
                    break;
                }
            },
            frame = stream.next(), if pending.is_none() => {
                pending = match frame {
                    Some(Ok(Message::Text(text))) => match parse_resize(text.as_str()) {
                        Some(size) => {
                            debug!(cols = size.cols, rows = size.rows, "Resizing shell");
                            Some(ShellInput::Resize(size))
                        }
                        None => Some(ShellInput::Data(text.as_str().as_bytes().to_vec())),
                    },
                    Some(Ok(Message::Binary(bytes))) => Some(ShellInput::Data(bytes.to_vec())),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => None,
                };
            }
            _ = registration.disconnected() => {
                let _ = sink.send(status_line("Disconnected")).await;
                break;
            }
        }
    }

    let _ = input.send(ShellInput::Close).await;
    let _ = sink.send(Message::Close(None)).await;
}
