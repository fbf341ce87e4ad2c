//! Action log websocket
//!
//! Data events go out as raw text frames; completion and errors as JSON
//! frames the browser tells apart by their `type` field.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, warn};

use crate::domain::action::ActionId;
use crate::domain::types::ActionEvent;
use crate::service::registry::StreamRegistry;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionLogsQuery {
    pub action_id: Option<String>,
}

/// Control frame on the action log socket
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Done { success: bool },
    Error { message: String },
}

impl StreamFrame {
    fn to_message(&self) -> Message {
        let json = serde_json::to_string(self).unwrap_or_default();
        Message::Text(json.into())
    }
}

/// `/ws/actionLogs?actionId=`
pub async fn action_logs(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<ActionLogsQuery>,
) -> Response {
    ws.on_upgrade(move |socket: WebSocket| async move {
        let (sink, stream) = socket.split();
        let id = query.action_id.as_deref().unwrap_or_default();
        follow_action(sink, stream, state.registry.clone(), id).await;
    })
}

/// Forward one action channel to a websocket until `done` or disconnect
pub(crate) async fn follow_action<Si, St, E>(mut sink: Si, mut stream: St, registry: StreamRegistry, raw_id: &str)
where
    Si: Sink<Message> + Unpin,
    St: Stream<Item = Result<Message, E>> + Unpin,
{
    let id = match ActionId::parse(raw_id) {
        Ok(id) => id,
        Err(e) => {
            let frame = StreamFrame::Error {
                message: e.to_string(),
            };
            let _ = sink.send(frame.to_message()).await;
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };

    let existing = registry.contains(&id);
    let mut events = BroadcastStream::new(registry.subscribe(&id));
    debug!(action_id = %id, existing, "Action log viewer attached");

    loop {
        tokio::select! {
            event = events.next() => {
                let message = match event {
                    Some(Ok(ActionEvent::Data(text))) => Message::Text(text.into()),
                    Some(Ok(ActionEvent::Error { message })) => {
                        StreamFrame::Error { message }.to_message()
                    }
                    Some(Ok(ActionEvent::Done { success })) => {
                        let _ = sink.send(StreamFrame::Done { success }.to_message()).await;
                        break;
                    }
                    Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                        warn!(action_id = %id, skipped, "Action log viewer lagged");
                        StreamFrame::Error {
                            message: format!("skipped {} events", skipped),
                        }
                        .to_message()
                    }
                    // Channel expired
                    None => break,
                };
                if sink.send(message).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    drop(events);
    registry.release(&id);
    debug!(action_id = %id, open_channels = registry.len(), "Action log viewer detached");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use std::convert::Infallible;
    use std::time::Duration;

    fn text(message: &Message) -> &str {
        match message {
            Message::Text(text) => text.as_str(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_streams_data_then_done_frame() {
        let registry = StreamRegistry::new(Duration::from_secs(60));
        let (sink, mut sent) = mpsc::unbounded::<Message>();
        let (_incoming, stream) = mpsc::unbounded::<Result<Message, Infallible>>();

        let viewer = tokio::spawn(follow_action(sink, stream, registry.clone(), "abc123"));
        // Wait until the viewer has subscribed
        while registry.get_or_create(&ActionId::parse("abc123").unwrap()).subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }

        let publisher = registry
            .attach_producer(&ActionId::parse("abc123").unwrap())
            .unwrap();
        publisher.data("Starting web1\r\n");
        publisher.done(true);
        viewer.await.unwrap();

        assert_eq!(text(&sent.next().await.unwrap()), "Starting web1\r\n");
        let done: serde_json::Value =
            serde_json::from_str(text(&sent.next().await.unwrap())).unwrap();
        assert_eq!(done, serde_json::json!({"type": "done", "success": true}));
        assert!(matches!(sent.next().await, Some(Message::Close(_))));
    }

    #[tokio::test]
    async fn test_lagged_viewer_is_told_about_the_gap() {
        let registry = StreamRegistry::new(Duration::from_secs(60));
        let (sink, mut sent) = mpsc::unbounded::<Message>();
        let (_incoming, stream) = mpsc::unbounded::<Result<Message, Infallible>>();

        let viewer = tokio::spawn(follow_action(sink, stream, registry.clone(), "flood"));
        while registry.get_or_create(&ActionId::parse("flood").unwrap()).subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }

        let publisher = registry
            .attach_producer(&ActionId::parse("flood").unwrap())
            .unwrap();
        for i in 0..1100 {
            publisher.data(format!("line {}\r\n", i));
        }
        publisher.done(true);
        viewer.await.unwrap();

        let gap: serde_json::Value =
            serde_json::from_str(text(&sent.next().await.unwrap())).unwrap();
        assert_eq!(gap["type"], "error");
        assert!(gap["message"].as_str().unwrap().starts_with("skipped "));

        let mut last = None;
        while let Some(Message::Text(frame)) = sent.next().await {
            last = Some(frame.as_str().to_string());
        }
        assert_eq!(last.as_deref(), Some(r#"{"type":"done","success":true}"#));
    }

    #[tokio::test]
    async fn test_missing_action_id_sends_error() {
        let registry = StreamRegistry::new(Duration::from_secs(60));
        let (sink, mut sent) = mpsc::unbounded::<Message>();
        let (_incoming, stream) = mpsc::unbounded::<Result<Message, Infallible>>();

        follow_action(sink, stream, registry.clone(), "").await;

        let frame: serde_json::Value =
            serde_json::from_str(text(&sent.next().await.unwrap())).unwrap();
        assert_eq!(frame["type"], "error");
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_viewer_disconnect_releases_channel() {
        let registry = StreamRegistry::new(Duration::from_secs(60));
        let (sink, _sent) = mpsc::unbounded::<Message>();
        let (incoming, stream) = mpsc::unbounded::<Result<Message, Infallible>>();

        let viewer = tokio::spawn(follow_action(sink, stream, registry.clone(), "gone"));
        while !registry.contains(&ActionId::parse("gone").unwrap()) {
            tokio::task::yield_now().await;
        }
        drop(incoming);
        viewer.await.unwrap();

        assert_eq!(registry.len(), 0);
    }
}
