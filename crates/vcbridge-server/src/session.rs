//! The call session aggregate.
//!
//! Everything tied to one joined call lives here and is rebuilt on every
//! join: the connection, the gate and its buffer, the playback queue and
//! the set of speakers being captured. Nothing carries over from a previous
//! session.

use crate::capture::SpeakerRegistry;
use crate::pipeline::Pipeline;
use crate::platform::{CallConnection, JoinedCall};
use crate::playback::{AudioRenderer, PlaybackQueue};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use vcbridge_gate::{Gate, GateOutcome, GatePolicy};

pub struct CallSession {
    id: Uuid,
    connection: Arc<dyn CallConnection>,
    gate: Mutex<Gate>,
    playback: PlaybackQueue,
    speakers: SpeakerRegistry,
    joined_at: DateTime<Utc>,
    ended: AtomicBool,
}

impl CallSession {
    pub fn new(
        connection: Arc<dyn CallConnection>,
        policy: Arc<GatePolicy>,
        renderer: Arc<dyn AudioRenderer>,
        max_chunk: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            playback: PlaybackQueue::new(renderer, Arc::clone(&connection), max_chunk),
            connection,
            gate: Mutex::new(Gate::new(policy)),
            speakers: SpeakerRegistry::new(),
            joined_at: Utc::now(),
            ended: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel(&self) -> &str {
        self.connection.channel()
    }

    pub fn connection(&self) -> &Arc<dyn CallConnection> {
        &self.connection
    }

    pub fn playback(&self) -> &PlaybackQueue {
        &self.playback
    }

    pub fn speakers(&self) -> &SpeakerRegistry {
        &self.speakers
    }

    pub fn joined_at(&self) -> DateTime<Utc> {
        self.joined_at
    }

    /// Runs one utterance through this session's gate.
    pub fn gate_utterance(&self, text: &str) -> GateOutcome {
        self.gate
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .on_utterance(text)
    }

    /// Snapshot of the gate for inspection.
    pub fn gate(&self) -> Gate {
        self.gate.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// True once the session was shut down. Late work for it is dropped.
    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Clears the gate, stops playback and destroys the connection.
    ///
    /// In-flight transcriptions keep running but find the session ended.
    pub async fn shutdown(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        self.gate.lock().unwrap_or_else(|e| e.into_inner()).reset();
        self.playback.close();
        self.connection.destroy().await;
        tracing::info!(session = %self.id, channel = self.channel(), "call session ended");
    }
}

impl fmt::Debug for CallSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSession")
            .field("id", &self.id)
            .field("channel", &self.channel())
            .field("ended", &self.has_ended())
            .finish_non_exhaustive()
    }
}

/// Builds a fresh [`CallSession`] for each joined call and starts capture.
#[derive(Clone)]
pub struct SessionFactory {
    pub policy: Arc<GatePolicy>,
    pub renderer: Arc<dyn AudioRenderer>,
    pub max_chunk: usize,
    /// `None` when capture is disabled.
    pub pipeline: Option<Arc<Pipeline>>,
}

impl SessionFactory {
    pub fn start(&self, joined: JoinedCall) -> Arc<CallSession> {
        let session = Arc::new(CallSession::new(
            joined.connection,
            Arc::clone(&self.policy),
            Arc::clone(&self.renderer),
            self.max_chunk,
        ));
        if let Some(pipeline) = &self.pipeline {
            tokio::spawn(Arc::clone(pipeline).listen(Arc::clone(&session), joined.speaking));
        }
        tracing::info!(session = %session.id(), channel = session.channel(), "call session started");
        session
    }
}
