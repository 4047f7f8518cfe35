//! vcbridge: a bridge between a group voice call and a text channel.
//!
//! Speech in the call is captured per speaker, transcribed, passed through
//! the spoken start/stop gate and posted as text. Text in the speak channel
//! is synthesized and played back into the call through a single playback
//! queue. A supervisor keeps the call connection alive and follows or leaves
//! according to who is present.
//!
//! The chat platform itself is reached through the traits in [`platform`];
//! the binary implements them with the WebSocket sidecar in [`sidecar`].

pub mod bridge;
pub mod capture;
pub mod commands;
pub mod config;
pub mod connection;
pub mod pipeline;
pub mod platform;
pub mod playback;
pub mod presence;
pub mod relay;
pub mod session;
pub mod sidecar;

pub use bridge::{Bridge, Services};
pub use config::{load_config, Config, ConfigError};
pub use connection::{CallSupervisor, ConnectError, LinkSnapshot};
pub use platform::{
    AudioEvent, CallConnection, ChatPlatform, IncomingMessage, JoinedCall, PlatformError,
    PlatformEvent, VoiceStateChange,
};
pub use playback::{AudioRenderer, PlaybackItem, PlaybackQueue, RenderedAudio};
pub use session::{CallSession, SessionFactory};
