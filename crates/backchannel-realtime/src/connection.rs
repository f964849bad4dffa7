use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use backchannel_types::events::ChangeFilter;

use crate::protocol::{self, Frame};
use crate::{ChangeFeed, RealtimeError, Subscription};

/// Heartbeat interval. Two unanswered heartbeats close the socket.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

type JoinAck = oneshot::Sender<Result<(), String>>;

enum Command {
    Join {
        topic: String,
        filter: ChangeFilter,
        events: mpsc::UnboundedSender<backchannel_types::events::ChangeEvent>,
        ack: JoinAck,
    },
    Leave {
        topic: String,
    },
}

struct TopicState {
    join_ref: String,
    events: mpsc::UnboundedSender<backchannel_types::events::ChangeEvent>,
    ack: Option<JoinAck>,
}

/// Client for the provider's realtime websocket. One socket is shared by all
/// subscriptions; each subscription joins its own topic.
pub struct RealtimeClient {
    commands: mpsc::UnboundedSender<Command>,
    next_topic: AtomicU64,
}

impl RealtimeClient {
    /// Websocket endpoint for a provider base URL (`https://…` → `wss://…`).
    pub fn socket_url(base_url: &str, api_key: &str) -> Result<Url, RealtimeError> {
        let mut url = Url::parse(base_url).map_err(|e| RealtimeError::InvalidUrl(e.to_string()))?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => return Err(RealtimeError::InvalidUrl(format!("unsupported scheme {}", other))),
        };
        url.set_scheme(scheme)
            .map_err(|_| RealtimeError::InvalidUrl(base_url.to_string()))?;
        url.set_path("/realtime/v1/websocket");
        url.query_pairs_mut()
            .clear()
            .append_pair("apikey", api_key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }

    pub async fn connect(base_url: &str, api_key: &str) -> Result<Self, RealtimeError> {
        let url = Self::socket_url(base_url, api_key)?;
        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        info!("Realtime socket connected to {}", url.host_str().unwrap_or("provider"));

        let (commands, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_connection_loop(socket, command_rx, api_key.to_string()));

        Ok(Self {
            commands,
            next_topic: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl ChangeFeed for RealtimeClient {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, RealtimeError> {
        let n = self.next_topic.fetch_add(1, Ordering::Relaxed);
        let topic = format!("realtime:{}:{}", filter.table, n);
        let (events, rx) = mpsc::unbounded_channel();
        let (ack, ack_rx) = oneshot::channel();

        self.commands
            .send(Command::Join {
                topic: topic.clone(),
                filter: filter.clone(),
                events,
                ack,
            })
            .map_err(|_| RealtimeError::Closed)?;

        match ack_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return Err(RealtimeError::Rejected { topic, reason }),
            Err(_) => return Err(RealtimeError::Closed),
        }

        info!("Subscribed to {} ({})", topic, filter.filter_expr().unwrap_or_else(|| "all rows".into()));
        let commands = self.commands.clone();
        Ok(Subscription::new(filter, rx, move || {
            let _ = commands.send(Command::Leave { topic });
        }))
    }
}

async fn run_connection_loop<S>(
    socket: tokio_tungstenite::WebSocketStream<S>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    access_token: String,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sender, mut receiver) = socket.split();
    let mut topics: HashMap<String, TopicState> = HashMap::new();
    let mut next_ref: u64 = 1;
    let mut pending_heartbeat: Option<String> = None;
    let mut missed_heartbeats: u8 = 0;

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        let outgoing = tokio::select! {
            _ = heartbeat.tick() => {
                if pending_heartbeat.take().is_some() {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Realtime heartbeat timeout (missed {}), closing socket", missed_heartbeats);
                        break;
                    }
                }
                let reference = take_ref(&mut next_ref);
                pending_heartbeat = Some(reference.clone());
                Some(Frame::heartbeat(reference))
            }
            command = commands.recv() => {
                match command {
                    Some(Command::Join { topic, filter, events, ack }) => {
                        let reference = take_ref(&mut next_ref);
                        let frame = Frame::join(&topic, &filter, &access_token, reference.clone());
                        topics.insert(topic, TopicState { join_ref: reference, events, ack: Some(ack) });
                        Some(frame)
                    }
                    Some(Command::Leave { topic }) => {
                        if topics.remove(&topic).is_some() {
                            debug!("Leaving {}", topic);
                            Some(Frame::leave(&topic, take_ref(&mut next_ref)))
                        } else {
                            None
                        }
                    }
                    None => break,
                }
            }
            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Realtime socket closed by provider");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("Realtime socket error: {}", e);
                        break;
                    }
                };

                let frame: Frame = match serde_json::from_str(text.as_str()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Malformed realtime frame: {}", e);
                        continue;
                    }
                };
                handle_frame(frame, &mut topics, &mut pending_heartbeat, &mut missed_heartbeats);
                None
            }
        };

        if let Some(frame) = outgoing {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode realtime frame: {}", e);
                    continue;
                }
            };
            trace!("-> {}", text);
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    }

    // Dropping the topic senders ends every open subscription.
    topics.clear();
    let _ = sender.close().await;
}

fn handle_frame(
    frame: Frame,
    topics: &mut HashMap<String, TopicState>,
    pending_heartbeat: &mut Option<String>,
    missed_heartbeats: &mut u8,
) {
    trace!("<- {} {}", frame.topic, frame.event);

    if frame.topic == protocol::PHOENIX_TOPIC {
        if frame.event == protocol::EVENT_REPLY && frame.reference.is_some() && frame.reference == *pending_heartbeat {
            *pending_heartbeat = None;
            *missed_heartbeats = 0;
        }
        return;
    }

    match frame.event.as_str() {
        protocol::EVENT_REPLY => {
            let Some(state) = topics.get_mut(&frame.topic) else {
                return;
            };
            if frame.reference.as_deref() != Some(state.join_ref.as_str()) {
                return;
            }
            let Some(ack) = state.ack.take() else {
                return;
            };
            if frame.reply_status() == Some("ok") {
                let _ = ack.send(Ok(()));
            } else {
                let reason = frame.reply_reason();
                warn!("Join of {} rejected: {}", frame.topic, reason);
                let _ = ack.send(Err(reason));
                topics.remove(&frame.topic);
            }
        }
        protocol::EVENT_POSTGRES_CHANGES => {
            let Some(state) = topics.get(&frame.topic) else {
                return;
            };
            match protocol::decode_change(&frame.payload) {
                Ok(Some(event)) => {
                    let _ = state.events.send(event);
                }
                Ok(None) => {}
                Err(e) => warn!("Undecodable change on {}: {}", frame.topic, e),
            }
        }
        protocol::EVENT_ERROR | protocol::EVENT_CLOSE => {
            if topics.remove(&frame.topic).is_some() {
                warn!("Topic {} closed by provider ({})", frame.topic, frame.event);
            }
        }
        _ => {}
    }
}

fn take_ref(next_ref: &mut u64) -> String {
    let reference = next_ref.to_string();
    *next_ref += 1;
    reference
}

#[cfg(test)]
mod tests {
    use super::*;
    use backchannel_types::models::Table;
    use serde_json::json;

    #[test]
    fn socket_url_switches_scheme_and_path() {
        let url = RealtimeClient::socket_url("https://demo.example.co", "anon").unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/realtime/v1/websocket");
        assert_eq!(url.query(), Some("apikey=anon&vsn=1.0.0"));

        let local = RealtimeClient::socket_url("http://127.0.0.1:54321", "k").unwrap();
        assert_eq!(local.scheme(), "ws");
        assert!(RealtimeClient::socket_url("ftp://nope", "k").is_err());
    }

    fn topic_state() -> (TopicState, mpsc::UnboundedReceiver<backchannel_types::events::ChangeEvent>, oneshot::Receiver<Result<(), String>>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (ack, ack_rx) = oneshot::channel();
        (
            TopicState { join_ref: "7".into(), events, ack: Some(ack) },
            rx,
            ack_rx,
        )
    }

    #[test]
    fn join_reply_acks_and_changes_route_to_topic() {
        let mut topics = HashMap::new();
        let (state, mut rx, mut ack_rx) = topic_state();
        topics.insert("realtime:messages:1".to_string(), state);
        let mut pending = None;
        let mut missed = 0;

        let reply: Frame = serde_json::from_value(json!({
            "topic": "realtime:messages:1", "event": "phx_reply", "ref": "7",
            "payload": { "status": "ok", "response": { "postgres_changes": [] } }
        }))
        .unwrap();
        handle_frame(reply, &mut topics, &mut pending, &mut missed);
        assert_eq!(ack_rx.try_recv().unwrap(), Ok(()));

        let change: Frame = serde_json::from_value(json!({
            "topic": "realtime:messages:1", "event": "postgres_changes", "ref": null,
            "payload": { "data": { "table": "messages", "type": "INSERT", "commit_timestamp": null,
                "record": { "id": "m1", "channel_id": "c1" } } }
        }))
        .unwrap();
        handle_frame(change, &mut topics, &mut pending, &mut missed);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.table, Table::Messages);
    }

    #[test]
    fn rejected_join_drops_topic() {
        let mut topics = HashMap::new();
        let (state, _rx, mut ack_rx) = topic_state();
        topics.insert("realtime:reactions:2".to_string(), state);
        let mut pending = None;
        let mut missed = 0;

        let reply: Frame = serde_json::from_value(json!({
            "topic": "realtime:reactions:2", "event": "phx_reply", "ref": "7",
            "payload": { "status": "error", "response": { "reason": "table missing" } }
        }))
        .unwrap();
        handle_frame(reply, &mut topics, &mut pending, &mut missed);
        assert_eq!(ack_rx.try_recv().unwrap(), Err("table missing".to_string()));
        assert!(topics.is_empty());
    }

    #[test]
    fn heartbeat_reply_resets_missed_count() {
        let mut topics = HashMap::new();
        let mut pending = Some("3".to_string());
        let mut missed = 1;
        let reply = Frame {
            topic: "phoenix".into(),
            event: "phx_reply".into(),
            payload: json!({ "status": "ok", "response": {} }),
            reference: Some("3".into()),
            join_ref: None,
        };
        handle_frame(reply, &mut topics, &mut pending, &mut missed);
        assert!(pending.is_none());
        assert_eq!(missed, 0);
    }
}
