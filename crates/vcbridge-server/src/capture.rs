//! Segment capture: one speaker, one voice-activity window.

use crate::platform::{AudioEvent, CallConnection, PlatformError};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;
use vcbridge_types::UserId;
use vcbridge_voice::audio::pcm_duration;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("audio stream error: {0}")]
    Stream(String),

    #[error("could not open audio stream: {0}")]
    Platform(#[from] PlatformError),
}

/// Speakers with a capture in flight.
///
/// At most one session exists per speaker; [`SpeakerRegistry::try_begin`]
/// refuses a second one until the first guard is dropped.
#[derive(Debug, Clone, Default)]
pub struct SpeakerRegistry {
    active: Arc<Mutex<HashSet<UserId>>>,
}

impl SpeakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `speaker`, or returns `None` if a session is already active.
    pub fn try_begin(&self, speaker: &str) -> Option<SpeakerSession> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(speaker.to_string()) {
            return None;
        }
        Some(SpeakerSession {
            registry: self.clone(),
            speaker: speaker.to_string(),
            segment_id: Uuid::new_v4(),
            started_at: Utc::now(),
        })
    }

    pub fn is_active(&self, speaker: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(speaker)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// An active capture for one speaker. Unregisters on drop.
#[derive(Debug)]
pub struct SpeakerSession {
    registry: SpeakerRegistry,
    speaker: UserId,
    segment_id: Uuid,
    started_at: DateTime<Utc>,
}

impl SpeakerSession {
    pub fn speaker(&self) -> &str {
        &self.speaker
    }

    pub fn segment_id(&self) -> Uuid {
        self.segment_id
    }

    /// Subscribes to the speaker's stream and buffers it until the stream
    /// ends. Consumes the session, so the speaker is free again on return.
    pub async fn capture(
        self,
        connection: &dyn CallConnection,
        silence: Duration,
    ) -> Result<Segment, CaptureError> {
        let begun = Instant::now();
        let stream = connection.subscribe(&self.speaker, silence).await?;
        let pcm = collect_stream(stream).await?;
        Ok(Segment {
            speaker: self.speaker.clone(),
            segment_id: self.segment_id,
            started_at: self.started_at,
            pcm,
            capture_elapsed: begun.elapsed(),
        })
    }
}

impl Drop for SpeakerSession {
    fn drop(&mut self) {
        self.registry
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.speaker);
    }
}

/// Buffers a decoded audio stream until `End` or channel close.
pub async fn collect_stream(mut stream: mpsc::Receiver<AudioEvent>) -> Result<Vec<u8>, CaptureError> {
    let mut pcm = Vec::new();
    while let Some(event) = stream.recv().await {
        match event {
            AudioEvent::Data(bytes) => pcm.extend_from_slice(&bytes),
            AudioEvent::End => break,
            AudioEvent::Error(e) => return Err(CaptureError::Stream(e)),
        }
    }
    Ok(pcm)
}

/// A finished capture window.
#[derive(Debug, Clone)]
pub struct Segment {
    pub speaker: UserId,
    pub segment_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// 48 kHz stereo s16le.
    pub pcm: Vec<u8>,
    /// Wall time spent capturing, for timing logs only.
    pub capture_elapsed: Duration,
}

impl Segment {
    /// Speech duration derived from the buffered byte count.
    pub fn duration(&self) -> Duration {
        pcm_duration(self.pcm.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_session_for_speaker_is_refused() {
        let registry = SpeakerRegistry::new();
        let first = registry.try_begin("alice").unwrap();
        assert!(registry.try_begin("alice").is_none());
        assert!(registry.try_begin("bob").is_some());
        assert!(registry.is_active("alice"));

        drop(first);
        assert!(!registry.is_active("alice"));
        assert!(registry.try_begin("alice").is_some());
    }

    #[tokio::test]
    async fn stream_is_buffered_until_end() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(AudioEvent::Data(vec![1, 2])).await.unwrap();
        tx.send(AudioEvent::Data(vec![3])).await.unwrap();
        tx.send(AudioEvent::End).await.unwrap();
        tx.send(AudioEvent::Data(vec![9])).await.unwrap();

        assert_eq!(collect_stream(rx).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn closed_stream_finalizes() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(AudioEvent::Data(vec![7; 4])).await.unwrap();
        drop(tx);
        assert_eq!(collect_stream(rx).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn stream_error_discards_buffer() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(AudioEvent::Data(vec![1; 64])).await.unwrap();
        tx.send(AudioEvent::Error("decoder crashed".to_string()))
            .await
            .unwrap();
        assert!(matches!(
            collect_stream(rx).await,
            Err(CaptureError::Stream(msg)) if msg == "decoder crashed"
        ));
    }
}
