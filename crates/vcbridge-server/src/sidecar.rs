//! WebSocket link to the platform sidecar.
//!
//! The sidecar owns the gateway session and the voice transport. It
//! connects to `/ws` and exchanges JSON frames tagged by `type`: the bridge
//! sends [`SidecarCommand`]s, the sidecar answers with [`SidecarFrame`]s.
//! Requests that need an answer (`join`, `play`) carry a `request_id` that
//! the matching `joined` / `play_finished` frame echoes. Decoded audio
//! arrives base64 encoded. One sidecar may be attached at a time.

use crate::platform::{
    AudioEvent, CallConnection, ChatPlatform, IncomingMessage, JoinedCall, PlatformError,
    PlatformEvent, VoiceStateChange,
};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use vcbridge_types::{ChannelId, LinkState, UserId};

/// How long the sidecar has to answer a join.
const JOIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Bridge to sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarCommand {
    Join {
        request_id: u64,
        channel_id: ChannelId,
    },
    Subscribe {
        channel_id: ChannelId,
        user_id: UserId,
        silence_ms: u64,
    },
    Play {
        request_id: u64,
        channel_id: ChannelId,
        path: String,
    },
    Destroy {
        channel_id: ChannelId,
    },
    SendMessage {
        channel_id: ChannelId,
        content: String,
    },
    Reply {
        channel_id: ChannelId,
        message_id: String,
        content: String,
    },
}

/// Sidecar to bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarFrame {
    Ready {
        self_id: UserId,
    },
    MessageCreated(IncomingMessage),
    VoiceStateUpdate(VoiceStateChange),
    Joined {
        request_id: u64,
        #[serde(default)]
        error: Option<String>,
    },
    LinkState {
        channel_id: ChannelId,
        state: LinkState,
    },
    SpeakingStarted {
        channel_id: ChannelId,
        user_id: UserId,
    },
    Audio {
        channel_id: ChannelId,
        user_id: UserId,
        /// Base64 of 48 kHz stereo s16le PCM.
        data: String,
    },
    AudioEnd {
        channel_id: ChannelId,
        user_id: UserId,
    },
    AudioError {
        channel_id: ChannelId,
        user_id: UserId,
        error: String,
    },
    PlayFinished {
        request_id: u64,
        #[serde(default)]
        error: Option<String>,
    },
}

struct CallRoute {
    id: u64,
    state: watch::Sender<LinkState>,
    speaking: mpsc::Sender<UserId>,
    streams: HashMap<UserId, mpsc::Sender<AudioEvent>>,
}

type Pending = HashMap<u64, oneshot::Sender<Result<(), String>>>;

#[derive(Default)]
struct HubState {
    /// Attached sidecar: (link id, outbound frame sender).
    link: Option<(u64, mpsc::Sender<String>)>,
    next_id: u64,
    pending: Pending,
    calls: HashMap<ChannelId, CallRoute>,
}

impl HubState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Shared state between the WebSocket task and the platform handles.
pub struct SidecarHub {
    state: Mutex<HubState>,
    events: mpsc::Sender<PlatformEvent>,
}

impl SidecarHub {
    pub fn new(events: mpsc::Sender<PlatformEvent>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HubState::default()),
            events,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_attached(&self) -> bool {
        self.lock().link.is_some()
    }

    fn attach(&self) -> Option<(u64, mpsc::Receiver<String>)> {
        let mut state = self.lock();
        if state.link.is_some() {
            return None;
        }
        let id = state.next_id();
        let (tx, rx) = mpsc::channel(256);
        state.link = Some((id, tx));
        Some((id, rx))
    }

    /// Forgets the sidecar. Waiting requests fail and every call reports
    /// `Disconnected` so the supervisor can decide what to do.
    fn detach(&self, link_id: u64) {
        let mut state = self.lock();
        if !matches!(state.link, Some((id, _)) if id == link_id) {
            return;
        }
        state.link = None;
        state.pending.clear();
        for route in state.calls.values_mut() {
            route.streams.clear();
            route.state.send_replace(LinkState::Disconnected);
        }
    }

    async fn send(&self, command: &SidecarCommand) -> Result<(), PlatformError> {
        let frame = serde_json::to_string(command)
            .map_err(|e| PlatformError::Rejected(format!("unserializable command: {e}")))?;
        let tx = self
            .lock()
            .link
            .as_ref()
            .map(|(_, tx)| tx.clone())
            .ok_or(PlatformError::NotConnected)?;
        tx.send(frame).await.map_err(|_| PlatformError::Disconnected)
    }

    /// Sends a command built around a fresh request id and waits for its answer.
    async fn request<F>(&self, build: F) -> Result<(), PlatformError>
    where
        F: FnOnce(u64) -> SidecarCommand,
    {
        let (tx, rx) = oneshot::channel();
        let request_id = {
            let mut state = self.lock();
            let id = state.next_id();
            state.pending.insert(id, tx);
            id
        };
        if let Err(e) = self.send(&build(request_id)).await {
            self.lock().pending.remove(&request_id);
            return Err(e);
        }
        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(PlatformError::Rejected(reason)),
            Err(_) => Err(PlatformError::Disconnected),
        }
    }

    fn resolve(&self, request_id: u64, error: Option<String>) {
        let waiter = self.lock().pending.remove(&request_id);
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(error.map_or(Ok(()), Err));
            }
            None => tracing::debug!(request_id, "answer for unknown request"),
        }
    }

    async fn emit(&self, event: PlatformEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("bridge stopped, dropping platform event");
        }
    }

    fn stream_sender(&self, channel: &str, user: &str, finished: bool) -> Option<mpsc::Sender<AudioEvent>> {
        let mut state = self.lock();
        let route = state.calls.get_mut(channel)?;
        if finished {
            route.streams.remove(user)
        } else {
            route.streams.get(user).cloned()
        }
    }

    pub async fn handle_frame(&self, frame: SidecarFrame) {
        match frame {
            SidecarFrame::Ready { self_id } => self.emit(PlatformEvent::Ready { self_id }).await,
            SidecarFrame::MessageCreated(message) => {
                self.emit(PlatformEvent::MessageCreated(message)).await
            }
            SidecarFrame::VoiceStateUpdate(change) => {
                self.emit(PlatformEvent::VoiceStateUpdate(change)).await
            }
            SidecarFrame::Joined { request_id, error }
            | SidecarFrame::PlayFinished { request_id, error } => self.resolve(request_id, error),
            SidecarFrame::LinkState { channel_id, state } => {
                let hub = self.lock();
                match hub.calls.get(&channel_id) {
                    Some(route) => {
                        route.state.send_replace(state);
                    }
                    None => tracing::debug!(channel = %channel_id, %state, "link state for unknown call"),
                }
            }
            SidecarFrame::SpeakingStarted {
                channel_id,
                user_id,
            } => {
                let speaking = self
                    .lock()
                    .calls
                    .get(&channel_id)
                    .map(|route| route.speaking.clone());
                if let Some(speaking) = speaking {
                    let _ = speaking.send(user_id).await;
                }
            }
            SidecarFrame::Audio {
                channel_id,
                user_id,
                data,
            } => {
                let Some(stream) = self.stream_sender(&channel_id, &user_id, false) else {
                    return;
                };
                match base64::engine::general_purpose::STANDARD.decode(data.as_bytes()) {
                    Ok(pcm) => {
                        let _ = stream.send(AudioEvent::Data(pcm)).await;
                    }
                    Err(e) => {
                        self.stream_sender(&channel_id, &user_id, true);
                        let _ = stream
                            .send(AudioEvent::Error(format!("bad audio payload: {e}")))
                            .await;
                    }
                }
            }
            SidecarFrame::AudioEnd {
                channel_id,
                user_id,
            } => {
                if let Some(stream) = self.stream_sender(&channel_id, &user_id, true) {
                    let _ = stream.send(AudioEvent::End).await;
                }
            }
            SidecarFrame::AudioError {
                channel_id,
                user_id,
                error,
            } => {
                if let Some(stream) = self.stream_sender(&channel_id, &user_id, true) {
                    let _ = stream.send(AudioEvent::Error(error)).await;
                }
            }
        }
    }

    /// Runs one attached sidecar until its socket closes.
    pub async fn serve(self: Arc<Self>, socket: WebSocket) {
        let Some((link_id, mut outbound)) = self.attach() else {
            tracing::warn!("second sidecar refused");
            return;
        };
        tracing::info!(link_id, "sidecar attached");

        let (mut sender, mut receiver) = socket.split();
        let send_task = tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                if sender.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
        });

        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<SidecarFrame>(text.as_str()) {
                    Ok(frame) => self.handle_frame(frame).await,
                    Err(e) => tracing::warn!(error = %e, "failed to parse sidecar frame"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }

        self.detach(link_id);
        send_task.abort();
        tracing::info!(link_id, "sidecar detached");
    }
}

/// [`ChatPlatform`] backed by the attached sidecar.
#[derive(Clone)]
pub struct SidecarPlatform {
    hub: Arc<SidecarHub>,
}

impl SidecarPlatform {
    pub fn new(hub: Arc<SidecarHub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl ChatPlatform for SidecarPlatform {
    async fn join(&self, channel: &str) -> Result<JoinedCall, PlatformError> {
        let (state_tx, state_rx) = watch::channel(LinkState::Connecting);
        let (speaking_tx, speaking_rx) = mpsc::channel(64);
        let route_id = {
            let mut hub = self.hub.lock();
            let id = hub.next_id();
            hub.calls.insert(
                channel.to_string(),
                CallRoute {
                    id,
                    state: state_tx,
                    speaking: speaking_tx,
                    streams: HashMap::new(),
                },
            );
            id
        };

        let joined = tokio::time::timeout(
            JOIN_TIMEOUT,
            self.hub.request(|request_id| SidecarCommand::Join {
                request_id,
                channel_id: channel.to_string(),
            }),
        )
        .await
        .unwrap_or_else(|_| Err(PlatformError::Rejected("join timed out".to_string())));

        if let Err(e) = joined {
            remove_route(&self.hub, channel, route_id);
            return Err(e);
        }

        Ok(JoinedCall {
            connection: Arc::new(SidecarConnection {
                hub: Arc::clone(&self.hub),
                channel: channel.to_string(),
                route_id,
                state: state_rx,
            }),
            speaking: speaking_rx,
        })
    }

    async fn send_message(&self, channel: &str, content: &str) -> Result<(), PlatformError> {
        self.hub
            .send(&SidecarCommand::SendMessage {
                channel_id: channel.to_string(),
                content: content.to_string(),
            })
            .await
    }

    async fn reply(&self, message: &IncomingMessage, content: &str) -> Result<(), PlatformError> {
        self.hub
            .send(&SidecarCommand::Reply {
                channel_id: message.channel_id.clone(),
                message_id: message.id.clone(),
                content: content.to_string(),
            })
            .await
    }
}

/// Removes the route for `channel` if it is still the one with `route_id`.
fn remove_route(hub: &SidecarHub, channel: &str, route_id: u64) -> bool {
    let mut state = hub.lock();
    match state.calls.get(channel) {
        Some(route) if route.id == route_id => {
            if let Some(route) = state.calls.remove(channel) {
                route.state.send_replace(LinkState::Destroyed);
            }
            true
        }
        _ => false,
    }
}

/// One joined call on the sidecar.
pub struct SidecarConnection {
    hub: Arc<SidecarHub>,
    channel: ChannelId,
    route_id: u64,
    state: watch::Receiver<LinkState>,
}

#[async_trait]
impl CallConnection for SidecarConnection {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn state(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    async fn subscribe(
        &self,
        speaker: &str,
        silence: Duration,
    ) -> Result<mpsc::Receiver<AudioEvent>, PlatformError> {
        let (tx, rx) = mpsc::channel(256);
        {
            let mut hub = self.hub.lock();
            let route = hub
                .calls
                .get_mut(&self.channel)
                .filter(|route| route.id == self.route_id)
                .ok_or(PlatformError::NotConnected)?;
            route.streams.insert(speaker.to_string(), tx);
        }
        self.hub
            .send(&SidecarCommand::Subscribe {
                channel_id: self.channel.clone(),
                user_id: speaker.to_string(),
                silence_ms: silence.as_millis() as u64,
            })
            .await?;
        Ok(rx)
    }

    async fn play(&self, path: &Path) -> Result<(), PlatformError> {
        self.hub
            .request(|request_id| SidecarCommand::Play {
                request_id,
                channel_id: self.channel.clone(),
                path: path.to_string_lossy().into_owned(),
            })
            .await
    }

    async fn destroy(&self) {
        if !remove_route(&self.hub, &self.channel, self.route_id) {
            return;
        }
        let destroy = SidecarCommand::Destroy {
            channel_id: self.channel.clone(),
        };
        if let Err(e) = self.hub.send(&destroy).await {
            tracing::debug!(channel = %self.channel, error = %e, "destroy not delivered");
        }
    }
}

/// Health check handler.
async fn health(State(hub): State<Arc<SidecarHub>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sidecar": hub.is_attached(),
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<SidecarHub>>) -> Response {
    if hub.is_attached() {
        return (StatusCode::CONFLICT, "a sidecar is already attached").into_response();
    }
    ws.on_upgrade(move |socket| hub.serve(socket))
}

/// Builds the router with the health check and the sidecar socket.
pub fn router(hub: Arc<SidecarHub>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .with_state(hub)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_check_returns_ok() {
        let (events, _rx) = mpsc::channel(8);
        let app = router(SidecarHub::new(events));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["sidecar"], false);
    }

    #[test]
    fn frames_use_snake_case_tags() {
        let frame: SidecarFrame = serde_json::from_str(
            r#"{"type":"link_state","channel_id":"9","state":{"state":"failed","reason":"udp"}}"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            SidecarFrame::LinkState {
                channel_id: "9".to_string(),
                state: LinkState::Failed("udp".to_string()),
            }
        );

        let frame: SidecarFrame = serde_json::from_str(
            r#"{"type":"voice_state_update","user_id":"u","old_channel":null,"new_channel":"9"}"#,
        )
        .unwrap();
        assert!(matches!(frame, SidecarFrame::VoiceStateUpdate(c) if c.new_channel.as_deref() == Some("9")));

        let command = serde_json::to_value(SidecarCommand::Subscribe {
            channel_id: "9".to_string(),
            user_id: "u".to_string(),
            silence_ms: 800,
        })
        .unwrap();
        assert_eq!(command["type"], "subscribe");
        assert_eq!(command["silence_ms"], 800);
    }

    #[tokio::test]
    async fn requests_fail_without_sidecar() {
        let (events, _rx) = mpsc::channel(8);
        let platform = SidecarPlatform::new(SidecarHub::new(events));
        assert!(matches!(
            platform.send_message("1", "hi").await,
            Err(PlatformError::NotConnected)
        ));
        assert!(matches!(
            platform.join("1").await,
            Err(PlatformError::NotConnected)
        ));
    }
}
