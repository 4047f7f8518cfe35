//! The chat platform boundary.
//!
//! Gateway connection, voice transport and opus decoding live outside this
//! process. The bridge only sees the operations and events below; the
//! sidecar adapter implements them over a WebSocket and tests implement
//! them in memory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use vcbridge_types::{ChannelId, LinkState, UserId};

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("platform is not connected")]
    NotConnected,

    #[error("platform connection went away before answering")]
    Disconnected,

    #[error("platform rejected request: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A text message seen in the guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: String,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    #[serde(default)]
    pub author_is_bot: bool,
    pub content: String,
    /// Voice channel the author is currently in, if any.
    #[serde(default)]
    pub author_voice_channel: Option<ChannelId>,
    #[serde(default)]
    pub author_voice_channel_name: Option<String>,
}

/// A user joined, left or moved between voice channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceStateChange {
    pub user_id: UserId,
    #[serde(default)]
    pub is_bot: bool,
    pub old_channel: Option<ChannelId>,
    pub new_channel: Option<ChannelId>,
}

/// Inbound platform events, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    Ready { self_id: UserId },
    MessageCreated(IncomingMessage),
    VoiceStateUpdate(VoiceStateChange),
}

/// One item of a speaker's decoded audio stream.
///
/// Data is 48 kHz stereo s16le PCM. The stream ends with `End` (silence or
/// close) or `Error`; a closed channel counts as `End`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioEvent {
    Data(Vec<u8>),
    End,
    Error(String),
}

/// An established call connection.
#[async_trait]
pub trait CallConnection: Send + Sync {
    fn channel(&self) -> &str;

    /// Link state updates. The sender is dropped when the connection is gone.
    fn state(&self) -> watch::Receiver<LinkState>;

    /// Opens the decoded audio stream of `speaker`, ended after `silence`.
    async fn subscribe(
        &self,
        speaker: &str,
        silence: Duration,
    ) -> Result<mpsc::Receiver<AudioEvent>, PlatformError>;

    /// Plays an audio file into the call. Resolves when the player goes idle.
    async fn play(&self, path: &Path) -> Result<(), PlatformError>;

    /// Tears the connection down. Idempotent.
    async fn destroy(&self);
}

/// Result of joining a voice channel.
pub struct JoinedCall {
    pub connection: Arc<dyn CallConnection>,
    /// "Speaker started" events for this call.
    pub speaking: mpsc::Receiver<UserId>,
}

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn join(&self, channel: &str) -> Result<JoinedCall, PlatformError>;

    async fn send_message(&self, channel: &str, content: &str) -> Result<(), PlatformError>;

    async fn reply(&self, message: &IncomingMessage, content: &str) -> Result<(), PlatformError>;
}
