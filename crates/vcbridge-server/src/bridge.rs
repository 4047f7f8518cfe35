//! Event routing for one guild.
//!
//! The [`Bridge`] receives platform events in order and hands each one to
//! the component that owns it: presence updates to the follow/leave rules,
//! messages to the command handler, the speech route or the relay.

use crate::commands::{joined_reply, Command, BEEP_REPLY, NOT_IN_VOICE};
use crate::config::Config;
use crate::connection::CallSupervisor;
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::platform::{ChatPlatform, IncomingMessage, PlatformEvent, VoiceStateChange};
use crate::playback::{AudioRenderer, VoiceRenderer};
use crate::presence::{PresenceDecision, PresenceRules, PresenceTracker};
use crate::relay::{RelayDebouncer, RelayFilter};
use crate::session::SessionFactory;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use vcbridge_types::{ChannelId, IdFilter, ToneKind, UserId};
use vcbridge_voice::text::sanitize_for_speech;
use vcbridge_voice::{SttService, Synthesizer, ToneCache, Transcriber, TtsService, VoiceError};

/// External services the bridge drives.
pub struct Services {
    pub transcriber: Arc<dyn Transcriber>,
    pub renderer: Arc<dyn AudioRenderer>,
    /// Scratch space for segment and speech files.
    pub scratch_dir: PathBuf,
}

impl Services {
    pub fn from_config(config: &Config) -> Result<Self, VoiceError> {
        let scratch_dir = std::env::temp_dir();
        let synthesizer: Option<Arc<dyn Synthesizer>> = if config.speech.enabled {
            Some(Arc::new(TtsService::new(config.speech.synthesis.clone())?))
        } else {
            None
        };
        let tones = Arc::new(ToneCache::from_config(config.tone.clone()));
        Ok(Self {
            transcriber: Arc::new(SttService::new(config.transcription.clone())),
            renderer: Arc::new(VoiceRenderer::new(synthesizer, tones, scratch_dir.clone())),
            scratch_dir,
        })
    }
}

struct SpeechRoute {
    channel: ChannelId,
    allow_bot_messages: bool,
    authors: IdFilter,
}

pub struct Bridge {
    platform: Arc<dyn ChatPlatform>,
    supervisor: Arc<CallSupervisor>,
    presence: Mutex<PresenceTracker>,
    rules: PresenceRules,
    speech: Option<SpeechRoute>,
    relay: Option<(RelayFilter, RelayDebouncer)>,
    self_id: Mutex<Option<UserId>>,
}

impl Bridge {
    /// Wires the components selected in `config`. Must run inside a runtime.
    pub fn new(config: &Config, platform: Arc<dyn ChatPlatform>, services: Services) -> Arc<Self> {
        let pipeline = config.capture.enabled.then(|| {
            Arc::new(Pipeline::new(
                Arc::clone(&platform),
                services.transcriber,
                PipelineSettings {
                    text_channel: config.channels.text.clone(),
                    silence: config.capture.silence(),
                    min_speech: config.capture.min_speech(),
                    speakers: config.capture.speaker_filter(),
                    scratch_dir: services.scratch_dir,
                    max_message_len: config.capture.max_message_len,
                },
            ))
        });
        let factory = SessionFactory {
            policy: config.gate.policy(),
            renderer: services.renderer,
            max_chunk: config.speech.max_chunk,
            pipeline,
        };
        let supervisor = CallSupervisor::new(
            Arc::clone(&platform),
            factory,
            config.connection.clone(),
            Some(config.channels.voice.clone()),
        );

        let speech = config.speech.enabled.then(|| SpeechRoute {
            channel: config.channels.speak_channel().to_string(),
            allow_bot_messages: config.speech.allow_bot_messages,
            authors: config.speech.author_filter(),
        });

        let relay = match (&config.channels.relay_source, config.relay.enabled) {
            (Some(source), true) => {
                let target = config.channels.relay_target().to_string();
                let filter = RelayFilter::new(source.clone(), target.clone(), &config.relay);
                let (debouncer, _worker) =
                    RelayDebouncer::spawn(Arc::clone(&platform), target, &config.relay);
                Some((filter, debouncer))
            }
            (None, true) => {
                tracing::warn!("relay enabled without channels.relay_source; relay is off");
                None
            }
            _ => None,
        };

        Arc::new(Self {
            platform,
            supervisor,
            presence: Mutex::new(PresenceTracker::new()),
            rules: PresenceRules {
                follow: IdFilter::allow_only(config.presence.follow_user_ids.clone()),
                leave_when_empty: config.presence.leave_when_empty,
            },
            speech,
            relay,
            self_id: Mutex::new(None),
        })
    }

    pub fn supervisor(&self) -> &Arc<CallSupervisor> {
        &self.supervisor
    }

    /// Consumes platform events until the sender goes away.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<PlatformEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event);
        }
        tracing::info!("platform event stream ended");
    }

    /// Routes one event. Presence bookkeeping happens inline so updates are
    /// applied in order; everything slow runs on its own task.
    pub fn dispatch(self: &Arc<Self>, event: PlatformEvent) {
        match event {
            PlatformEvent::Ready { self_id } => {
                tracing::info!(self_id = %self_id, "platform ready");
                *self.self_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(self_id);
                let supervisor = Arc::clone(&self.supervisor);
                tokio::spawn(async move {
                    if let Err(e) = supervisor.connect().await {
                        tracing::error!(error = %e, "initial voice connect failed");
                    }
                });
            }
            PlatformEvent::MessageCreated(message) => {
                tokio::spawn(Arc::clone(self).handle_message(message));
            }
            PlatformEvent::VoiceStateUpdate(change) => {
                let decision = self.observe_voice_state(&change);
                if decision != PresenceDecision::Stay {
                    tokio::spawn(Arc::clone(self).apply_presence(decision));
                }
            }
        }
    }

    /// Records a voice-state update and decides what it means.
    pub fn observe_voice_state(&self, change: &VoiceStateChange) -> PresenceDecision {
        let mut tracker = self.presence.lock().unwrap_or_else(|e| e.into_inner());
        tracker.apply(change);
        let decision = self
            .rules
            .decide(change, &self.supervisor.snapshot(), &tracker);
        tracing::debug!(user = %change.user_id, ?decision, "voice state update");
        decision
    }

    pub async fn apply_presence(self: Arc<Self>, decision: PresenceDecision) {
        match decision {
            PresenceDecision::Follow(channel) => {
                tracing::info!(channel = %channel, "following user");
                if let Err(e) = self.supervisor.switch_to(&channel).await {
                    tracing::error!(channel = %channel, error = %e, "auto-join failed");
                }
            }
            PresenceDecision::Leave(reason) => self.supervisor.leave(reason.as_str()).await,
            PresenceDecision::Stay => {}
        }
    }

    fn is_self(&self, user: &str) -> bool {
        self.self_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_deref()
            == Some(user)
    }

    pub async fn handle_message(self: Arc<Self>, message: IncomingMessage) {
        if message.content.trim().is_empty() {
            return;
        }
        if let Some(command) = Command::parse(&message.content) {
            if !message.author_is_bot {
                self.run_command(command, &message).await;
            }
            return;
        }
        if self.is_self(&message.author_id) {
            return;
        }

        if let Some(speech) = &self.speech {
            if message.channel_id == speech.channel {
                self.speak(speech, &message).await;
                return;
            }
        }

        if let Some((filter, debouncer)) = &self.relay {
            if let Some(text) = filter.accept(&message) {
                debouncer.push(text);
            }
        }
    }

    async fn speak(&self, route: &SpeechRoute, message: &IncomingMessage) {
        if message.author_is_bot && !route.allow_bot_messages {
            return;
        }
        if !route.authors.permits(&message.author_id) {
            return;
        }
        let spoken = sanitize_for_speech(&message.content);
        if spoken.is_empty() {
            return;
        }
        match self.supervisor.session_if_wanted().await {
            Some(session) => {
                let chunks = session.playback().enqueue_speech(&spoken);
                tracing::debug!(author = %message.author_id, chunks, "queued speech");
            }
            None => tracing::debug!(author = %message.author_id, "not connected, dropping speech"),
        }
    }

    async fn run_command(&self, command: Command, message: &IncomingMessage) {
        let Some(channel) = message.author_voice_channel.as_deref() else {
            self.reply(message, NOT_IN_VOICE).await;
            return;
        };
        let name = message
            .author_voice_channel_name
            .as_deref()
            .unwrap_or(channel);

        match command {
            Command::Join => match self.supervisor.switch_to(channel).await {
                Ok(_) => self.reply(message, &joined_reply(name)).await,
                Err(e) => tracing::error!(channel, error = %e, "join command failed"),
            },
            Command::Beep => match self.supervisor.ensure_in(channel).await {
                Ok(session) => {
                    session.playback().enqueue_tone(ToneKind::Open);
                    session.playback().enqueue_tone(ToneKind::Close);
                    self.reply(message, BEEP_REPLY).await;
                }
                Err(e) => tracing::error!(channel, error = %e, "beep command failed"),
            },
        }
    }

    async fn reply(&self, message: &IncomingMessage, content: &str) {
        if let Err(e) = self.platform.reply(message, content).await {
            tracing::warn!(message_id = %message.id, error = %e, "reply failed");
        }
    }

    /// Leaves the call.
    pub async fn shutdown(&self) {
        self.supervisor.leave("shutdown").await;
    }
}
