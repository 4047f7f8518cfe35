//! The per-utterance chain: capture, duration gate, ASR, phrase gate.
//!
//! Each finished segment runs as its own task. A failure anywhere in a
//! chain is logged there and drops that utterance only.

use crate::capture::{Segment, SpeakerSession};
use crate::platform::ChatPlatform;
use crate::session::CallSession;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use vcbridge_gate::{GateAction, Transition};
use vcbridge_types::{ChannelId, IdFilter, UserId};
use vcbridge_voice::audio::write_asr_wav;
use vcbridge_voice::text::split_message;
use vcbridge_voice::{Transcriber, VoiceError};

pub struct PipelineSettings {
    pub text_channel: ChannelId,
    pub silence: Duration,
    pub min_speech: Duration,
    pub speakers: IdFilter,
    /// Where segment WAV files are written while being transcribed.
    pub scratch_dir: PathBuf,
    pub max_message_len: usize,
}

/// What became of one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// Shorter than the minimum speech duration; never transcribed.
    TooShort(Duration),
    /// The ASR heard nothing.
    NoSpeech,
    /// The session ended while the segment was being transcribed.
    Stale,
    Gated(Transition),
}

pub struct Pipeline {
    platform: Arc<dyn ChatPlatform>,
    transcriber: Arc<dyn Transcriber>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        transcriber: Arc<dyn Transcriber>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            platform,
            transcriber,
            settings,
        }
    }

    /// Starts a capture chain for every "speaker started" event of a session.
    pub async fn listen(self: Arc<Self>, session: Arc<CallSession>, mut speaking: mpsc::Receiver<UserId>) {
        while let Some(speaker) = speaking.recv().await {
            if session.has_ended() {
                break;
            }
            if !self.settings.speakers.permits(&speaker) {
                tracing::debug!(speaker = %speaker, "speaker filtered");
                continue;
            }
            let Some(capture) = session.speakers().try_begin(&speaker) else {
                continue;
            };
            tracing::debug!(speaker = %speaker, segment_id = %capture.segment_id(), "receiver start");
            tokio::spawn(Arc::clone(&self).run_chain(Arc::clone(&session), capture));
        }
        tracing::debug!(session = %session.id(), "speaker listener stopped");
    }

    async fn run_chain(self: Arc<Self>, session: Arc<CallSession>, capture: SpeakerSession) {
        let speaker = capture.speaker().to_string();
        let segment_id = capture.segment_id();

        let segment = match capture
            .capture(session.connection().as_ref(), self.settings.silence)
            .await
        {
            Ok(segment) => segment,
            Err(e) => {
                tracing::warn!(speaker = %speaker, %segment_id, error = %e, "capture failed, dropping segment");
                return;
            }
        };

        match self.process_segment(&session, &segment).await {
            Ok(outcome) => {
                tracing::debug!(speaker = %speaker, %segment_id, ?outcome, "segment done");
            }
            Err(e) => {
                tracing::warn!(speaker = %speaker, %segment_id, error = %e, "transcription failed, dropping utterance");
            }
        }
    }

    /// Duration gate, ASR and phrase gate for one finished segment.
    pub async fn process_segment(
        &self,
        session: &CallSession,
        segment: &Segment,
    ) -> Result<SegmentOutcome, VoiceError> {
        let duration = segment.duration();
        if duration < self.settings.min_speech {
            tracing::debug!(
                speaker = %segment.speaker,
                segment_id = %segment.segment_id,
                duration_ms = duration.as_millis() as u64,
                "segment too short, skipping"
            );
            return Ok(SegmentOutcome::TooShort(duration));
        }

        let started = Instant::now();
        // removed when dropped, on every return path
        let wav = tempfile::Builder::new()
            .prefix("vc-seg-")
            .suffix(".wav")
            .tempfile_in(&self.settings.scratch_dir)?
            .into_temp_path();
        write_asr_wav(&wav, &segment.pcm)?;
        let converted = Instant::now();

        let transcript = self.transcriber.transcribe(&wav).await?;
        let transcribed = Instant::now();
        drop(wav);

        let Some(text) = transcript else {
            return Ok(SegmentOutcome::NoSpeech);
        };
        if session.has_ended() {
            return Ok(SegmentOutcome::Stale);
        }
        tracing::debug!(speaker = %segment.speaker, transcript = %text, "transcribed");

        let outcome = session.gate_utterance(&text);
        for action in outcome.actions {
            match action {
                GateAction::PlayTone(kind) => session.playback().enqueue_tone(kind),
                GateAction::Emit(message) => self.post(&message).await,
            }
        }
        let sent = Instant::now();

        tracing::debug!(
            target: "timing",
            speaker = %segment.speaker,
            segment_id = %segment.segment_id,
            capture_ms = segment.capture_elapsed.as_millis() as u64,
            convert_ms = (converted - started).as_millis() as u64,
            asr_ms = (transcribed - converted).as_millis() as u64,
            send_ms = (sent - transcribed).as_millis() as u64,
            total_ms = (segment.capture_elapsed + (sent - started)).as_millis() as u64,
            "utterance timing"
        );

        Ok(SegmentOutcome::Gated(outcome.transition))
    }

    /// Sends `message` to the transcript channel, split at the length limit.
    pub async fn post(&self, message: &str) {
        for part in split_message(message, self.settings.max_message_len) {
            if let Err(e) = self
                .platform
                .send_message(&self.settings.text_channel, &part)
                .await
            {
                tracing::error!(channel = %self.settings.text_channel, error = %e, "failed to post transcript");
                return;
            }
        }
    }
}
