// ABOUTME: WebSocket client speaking the platform's Phoenix-style channel
// ABOUTME: protocol: V2 array frames, topic joins, and heartbeats.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use parley_core::event::{
    MessageCreatedPayload, ParticipantAddedPayload, ParticipantRemovedPayload, PlatformEvent,
    RoomAddedPayload, RoomRemovedPayload,
};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub fn agent_rooms_topic(agent_id: &str) -> String {
    format!("agent_rooms:{agent_id}")
}

pub fn chat_room_topic(room_id: &str) -> String {
    format!("chat_room:{room_id}")
}

pub fn room_participants_topic(room_id: &str) -> String {
    format!("room_participants:{room_id}")
}

/// One channel frame in the V2 array serialization:
/// `[join_ref, ref, topic, event, payload]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub join_ref: Option<String>,
    pub msg_ref: Option<String>,
    pub topic: String,
    pub event: String,
    pub payload: Value,
}

impl Frame {
    pub fn encode(&self) -> Result<String> {
        let array = json!([
            self.join_ref,
            self.msg_ref,
            self.topic,
            self.event,
            self.payload,
        ]);
        Ok(serde_json::to_string(&array)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        let array: Vec<Value> = serde_json::from_str(text).context("frame is not a JSON array")?;
        if array.len() != 5 {
            anyhow::bail!("frame has {} elements, expected 5", array.len());
        }
        let mut array = array.into_iter();
        let join_ref = take_ref(array.next());
        let msg_ref = take_ref(array.next());
        let topic = array
            .next()
            .and_then(|v| v.as_str().map(str::to_string))
            .context("frame topic is not a string")?;
        let event = array
            .next()
            .and_then(|v| v.as_str().map(str::to_string))
            .context("frame event is not a string")?;
        let payload = array.next().unwrap_or(Value::Null);
        Ok(Self {
            join_ref,
            msg_ref,
            topic,
            event,
            payload,
        })
    }
}

// Refs come back as strings or numbers depending on the peer.
fn take_ref(value: Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Map a decoded frame to a [`PlatformEvent`], or `None` for protocol
/// traffic (replies, heartbeats) and unknown events.
pub fn decode_event(frame: &Frame) -> Option<PlatformEvent> {
    let room_from_topic = |prefix: &str| {
        frame
            .topic
            .strip_prefix(prefix)
            .map(str::to_string)
    };

    match frame.event.as_str() {
        "message_created" => {
            let room_id = room_from_topic("chat_room:")?;
            match serde_json::from_value::<MessageCreatedPayload>(frame.payload.clone()) {
                Ok(payload) => Some(PlatformEvent::MessageCreated { room_id, payload }),
                Err(e) => {
                    tracing::warn!(topic = %frame.topic, error = %e, "Bad message_created payload");
                    None
                }
            }
        }
        "room_added" => match serde_json::from_value::<RoomAddedPayload>(frame.payload.clone()) {
            Ok(payload) => Some(PlatformEvent::RoomAdded {
                room_id: payload.id.clone(),
                payload,
            }),
            Err(e) => {
                tracing::warn!(topic = %frame.topic, error = %e, "Bad room_added payload");
                None
            }
        },
        "room_removed" => match serde_json::from_value::<RoomRemovedPayload>(frame.payload.clone())
        {
            Ok(payload) => Some(PlatformEvent::RoomRemoved {
                room_id: payload.id.clone(),
                payload,
            }),
            Err(e) => {
                tracing::warn!(topic = %frame.topic, error = %e, "Bad room_removed payload");
                None
            }
        },
        "participant_added" => {
            let room_id = room_from_topic("room_participants:")?;
            match serde_json::from_value::<ParticipantAddedPayload>(frame.payload.clone()) {
                Ok(payload) => Some(PlatformEvent::ParticipantAdded { room_id, payload }),
                Err(e) => {
                    tracing::warn!(topic = %frame.topic, error = %e, "Bad participant_added payload");
                    None
                }
            }
        }
        "participant_removed" => {
            let room_id = room_from_topic("room_participants:")?;
            match serde_json::from_value::<ParticipantRemovedPayload>(frame.payload.clone()) {
                Ok(payload) => Some(PlatformEvent::ParticipantRemoved { room_id, payload }),
                Err(e) => {
                    tracing::warn!(topic = %frame.topic, error = %e, "Bad participant_removed payload");
                    None
                }
            }
        }
        "phx_reply" | "phx_close" | "phx_error" | "presence_state" | "presence_diff" => None,
        other => {
            tracing::debug!(topic = %frame.topic, event = %other, "Unhandled channel event");
            None
        }
    }
}

enum Command {
    Join(String),
    Leave(String),
    Close,
}

/// Handle to a connected socket task. Joins and leaves are fire-and-forget
/// commands; the task confirms them via `phx_reply` log lines.
pub struct SocketHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
    alive: Arc<AtomicBool>,
}

impl SocketHandle {
    pub fn join(&self, topic: &str) -> Result<()> {
        self.cmd_tx
            .send(Command::Join(topic.to_string()))
            .map_err(|_| anyhow::anyhow!("socket task has exited"))
    }

    pub fn leave(&self, topic: &str) -> Result<()> {
        self.cmd_tx
            .send(Command::Leave(topic.to_string()))
            .map_err(|_| anyhow::anyhow!("socket task has exited"))
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Connect the socket and spawn its task. Returns the handle plus the
/// receiver of decoded platform events.
pub async fn connect(
    ws_url: &str,
    api_key: &str,
    agent_id: &str,
) -> Result<(SocketHandle, mpsc::UnboundedReceiver<PlatformEvent>)> {
    let mut url = Url::parse(ws_url).context("invalid websocket url")?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("websocket url cannot be a base"))?
        .push("websocket");
    url.query_pairs_mut()
        .append_pair("vsn", "2.0.0")
        .append_pair("api_key", api_key)
        .append_pair("agent_id", agent_id);

    tracing::info!(url = %url.host_str().unwrap_or("?"), "Connecting websocket");
    let (ws, _response) = connect_async(url.as_str()).await.context("websocket connect failed")?;

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let alive = Arc::new(AtomicBool::new(true));

    let task = tokio::spawn(run(ws, cmd_rx, event_tx, alive.clone()));
    Ok((
        SocketHandle {
            cmd_tx,
            task,
            alive,
        },
        event_rx,
    ))
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn run(
    mut ws: Socket,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::UnboundedSender<PlatformEvent>,
    alive: Arc<AtomicBool>,
) {
    let mut next_ref: u64 = 0;
    let mut joins: HashMap<String, String> = HashMap::new();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    Command::Join(topic) => {
                        next_ref += 1;
                        let join_ref = next_ref.to_string();
                        let frame = Frame {
                            join_ref: Some(join_ref.clone()),
                            msg_ref: Some(join_ref.clone()),
                            topic: topic.clone(),
                            event: "phx_join".to_string(),
                            payload: json!({}),
                        };
                        joins.insert(topic.clone(), join_ref);
                        tracing::debug!(topic = %topic, "Joining channel");
                        if send_frame(&mut ws, &frame).await.is_err() {
                            break;
                        }
                    }
                    Command::Leave(topic) => {
                        next_ref += 1;
                        let frame = Frame {
                            join_ref: joins.remove(&topic),
                            msg_ref: Some(next_ref.to_string()),
                            topic: topic.clone(),
                            event: "phx_leave".to_string(),
                            payload: json!({}),
                        };
                        tracing::debug!(topic = %topic, "Leaving channel");
                        if send_frame(&mut ws, &frame).await.is_err() {
                            break;
                        }
                    }
                    Command::Close => {
                        let _ = ws.close(None).await;
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                next_ref += 1;
                let frame = Frame {
                    join_ref: None,
                    msg_ref: Some(next_ref.to_string()),
                    topic: "phoenix".to_string(),
                    event: "heartbeat".to_string(),
                    payload: json!({}),
                };
                if send_frame(&mut ws, &frame).await.is_err() {
                    break;
                }
            }
            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match Frame::decode(text.as_str()) {
                            Ok(frame) => {
                                if frame.event == "phx_reply" {
                                    tracing::debug!(topic = %frame.topic, payload = %frame.payload, "Channel reply");
                                } else if let Some(event) = decode_event(&frame) {
                                    if event_tx.send(event).is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Undecodable frame");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if ws.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("Websocket closed by peer");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Websocket error");
                        break;
                    }
                }
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    tracing::info!("Socket task exited");
}

async fn send_frame(ws: &mut Socket, frame: &Frame) -> Result<()> {
    let text = frame.encode()?;
    ws.send(Message::Text(text.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let frame = Frame {
            join_ref: Some("1".to_string()),
            msg_ref: Some("2".to_string()),
            topic: "chat_room:r1".to_string(),
            event: "phx_join".to_string(),
            payload: json!({}),
        };
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded, r#"["1","2","chat_room:r1","phx_join",{}]"#);
        assert_eq!(Frame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn decode_accepts_numeric_refs_and_nulls() {
        let frame = Frame::decode(r#"[null,3,"phoenix","phx_reply",{"status":"ok"}]"#).unwrap();
        assert_eq!(frame.join_ref, None);
        assert_eq!(frame.msg_ref, Some("3".to_string()));
        assert_eq!(frame.event, "phx_reply");
    }

    #[test]
    fn decode_rejects_short_arrays() {
        assert!(Frame::decode(r#"["1","2","topic"]"#).is_err());
        assert!(Frame::decode("not json").is_err());
    }

    #[test]
    fn message_created_maps_to_platform_event() {
        let frame = Frame {
            join_ref: None,
            msg_ref: None,
            topic: "chat_room:room-9".to_string(),
            event: "message_created".to_string(),
            payload: json!({
                "id": "m1",
                "content": "hi",
                "sender_id": "u1",
                "sender_type": "User",
                "chat_room_id": "room-9",
                "inserted_at": "2024-05-01T12:00:00Z",
                "updated_at": "2024-05-01T12:00:00Z"
            }),
        };
        let event = decode_event(&frame).expect("event");
        assert_eq!(event.room_id(), "room-9");
        assert_eq!(event.message_id(), Some("m1"));
    }

    #[test]
    fn room_events_take_room_id_from_payload() {
        let frame = Frame {
            join_ref: None,
            msg_ref: None,
            topic: "agent_rooms:agent-1".to_string(),
            event: "room_added".to_string(),
            payload: json!({"id": "r7", "title": "Planning"}),
        };
        let event = decode_event(&frame).expect("event");
        assert_eq!(event.room_id(), "r7");
    }

    #[test]
    fn participant_events_take_room_id_from_topic() {
        let frame = Frame {
            join_ref: None,
            msg_ref: None,
            topic: "room_participants:r4".to_string(),
            event: "participant_added".to_string(),
            payload: json!({"id": "p1", "name": "Weather Agent", "type": "Agent"}),
        };
        let event = decode_event(&frame).expect("event");
        assert_eq!(event.room_id(), "r4");
    }

    #[test]
    fn protocol_frames_produce_no_events() {
        for event in ["phx_reply", "phx_close", "phx_error", "presence_diff"] {
            let frame = Frame {
                join_ref: None,
                msg_ref: None,
                topic: "chat_room:r1".to_string(),
                event: event.to_string(),
                payload: json!({}),
            };
            assert!(decode_event(&frame).is_none());
        }
    }

    #[test]
    fn malformed_payload_is_dropped_not_fatal() {
        let frame = Frame {
            join_ref: None,
            msg_ref: None,
            topic: "chat_room:r1".to_string(),
            event: "message_created".to_string(),
            payload: json!({"id": "m1"}),
        };
        assert!(decode_event(&frame).is_none());
    }

    #[test]
    fn topic_builders() {
        assert_eq!(agent_rooms_topic("a1"), "agent_rooms:a1");
        assert_eq!(chat_room_topic("r1"), "chat_room:r1");
        assert_eq!(room_participants_topic("r1"), "room_participants:r1");
    }
}
