//! Shared types for the vcbridge crates.
//!
//! Identifiers, the allow/deny list used for speakers and message authors,
//! alert tone kinds, and the call link state reported by the platform.
//! Crates in the workspace depend on `vcbridge-types` for anything that
//! crosses a crate boundary, which keeps the dependency graph acyclic.

pub mod voice;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Platform user identifier (speakers, message authors, followed users).
pub type UserId = String;

/// Platform channel identifier (voice and text channels).
pub type ChannelId = String;

/// Alert tones played into the call when the gate changes state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneKind {
    /// Gate opened (or restarted).
    Open,
    /// Gate closed.
    Close,
}

impl ToneKind {
    /// Sine frequency of the tone in Hz.
    pub fn frequency_hz(self) -> u32 {
        match self {
            Self::Open => 880,
            Self::Close => 660,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
        }
    }
}

/// State of the call connection as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum LinkState {
    Connecting,
    Signalling,
    Ready,
    /// Dropped; the platform may still recover through `Signalling`/`Connecting`.
    Disconnected,
    /// Unrecoverable error reported by the platform.
    Failed(String),
    /// Torn down locally. Terminal.
    Destroyed,
}

impl LinkState {
    /// True for the states that mean the platform is renegotiating on its own.
    pub fn is_self_healing(&self) -> bool {
        matches!(self, Self::Signalling | Self::Connecting | Self::Ready)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Signalling => f.write_str("signalling"),
            Self::Ready => f.write_str("ready"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Destroyed => f.write_str("destroyed"),
        }
    }
}

/// Allow/deny list over user ids.
///
/// An empty allow list permits everyone not denied. The deny list always wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdFilter {
    allow: HashSet<UserId>,
    deny: HashSet<UserId>,
}

impl IdFilter {
    pub fn new<A, D>(allow: A, deny: D) -> Self
    where
        A: IntoIterator,
        A::Item: Into<UserId>,
        D: IntoIterator,
        D::Item: Into<UserId>,
    {
        Self {
            allow: collect_ids(allow),
            deny: collect_ids(deny),
        }
    }

    /// A filter that only consults the allow list.
    pub fn allow_only<A>(allow: A) -> Self
    where
        A: IntoIterator,
        A::Item: Into<UserId>,
    {
        Self::new(allow, Vec::<UserId>::new())
    }

    pub fn permits(&self, id: &str) -> bool {
        if self.deny.contains(id) {
            return false;
        }
        self.allow.is_empty() || self.allow.contains(id)
    }

    /// True when `id` is explicitly on the allow list.
    pub fn lists(&self, id: &str) -> bool {
        self.allow.contains(id)
    }

    pub fn has_allow_list(&self) -> bool {
        !self.allow.is_empty()
    }
}

fn collect_ids<I>(ids: I) -> HashSet<UserId>
where
    I: IntoIterator,
    I::Item: Into<UserId>,
{
    ids.into_iter()
        .map(Into::into)
        .map(|id: UserId| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect()
}
