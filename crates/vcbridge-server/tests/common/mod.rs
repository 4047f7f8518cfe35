#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use vcbridge_server::{
    AudioEvent, AudioRenderer, CallConnection, ChatPlatform, IncomingMessage, JoinedCall,
    PlatformError, PlaybackItem, RenderedAudio,
};
use vcbridge_types::{LinkState, UserId};
use vcbridge_voice::{Transcriber, VoiceError};

/// In-memory chat platform.
#[derive(Default)]
pub struct MockPlatform {
    /// Number of upcoming joins that fail.
    pub failing_joins: AtomicUsize,
    pub joins: Mutex<Vec<String>>,
    pub connections: Mutex<Vec<Arc<MockConnection>>>,
    pub sent: Mutex<Vec<(String, String)>>,
    pub replies: Mutex<Vec<(String, String)>>,
}

impl MockPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn join_count(&self) -> usize {
        self.joins.lock().unwrap().len()
    }

    pub fn last_connection(&self) -> Arc<MockConnection> {
        self.connections.lock().unwrap().last().cloned().unwrap()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn replies(&self) -> Vec<String> {
        self.replies
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl ChatPlatform for MockPlatform {
    async fn join(&self, channel: &str) -> Result<JoinedCall, PlatformError> {
        self.joins.lock().unwrap().push(channel.to_string());
        let failing = self.failing_joins.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_joins.store(failing - 1, Ordering::SeqCst);
            return Err(PlatformError::Rejected("voice server unavailable".to_string()));
        }
        let (connection, speaking) = MockConnection::new(channel);
        self.connections.lock().unwrap().push(Arc::clone(&connection));
        Ok(JoinedCall {
            connection,
            speaking,
        })
    }

    async fn send_message(&self, channel: &str, content: &str) -> Result<(), PlatformError> {
        self.sent
            .lock()
            .unwrap()
            .push((channel.to_string(), content.to_string()));
        Ok(())
    }

    async fn reply(&self, message: &IncomingMessage, content: &str) -> Result<(), PlatformError> {
        self.replies
            .lock()
            .unwrap()
            .push((message.id.clone(), content.to_string()));
        Ok(())
    }
}

/// In-memory call connection. Playing a path containing "broken" fails.
pub struct MockConnection {
    channel: String,
    pub state: watch::Sender<LinkState>,
    pub destroyed: AtomicBool,
    pub played: Mutex<Vec<PathBuf>>,
    pub subscriptions: Mutex<Vec<String>>,
    streams: Mutex<HashMap<UserId, mpsc::Sender<AudioEvent>>>,
    speaking: mpsc::Sender<UserId>,
}

impl MockConnection {
    pub fn new(channel: &str) -> (Arc<Self>, mpsc::Receiver<UserId>) {
        let (speaking, speaking_rx) = mpsc::channel(64);
        let connection = Arc::new(Self {
            channel: channel.to_string(),
            state: watch::channel(LinkState::Ready).0,
            destroyed: AtomicBool::new(false),
            played: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            streams: Mutex::new(HashMap::new()),
            speaking,
        });
        (connection, speaking_rx)
    }

    pub fn set_state(&self, state: LinkState) {
        self.state.send_replace(state);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn played(&self) -> Vec<String> {
        self.played
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }

    pub async fn start_speaking(&self, user: &str) {
        self.speaking.send(user.to_string()).await.unwrap();
    }

    /// Sends audio to the subscribed stream of `user`, if any.
    pub async fn feed(&self, user: &str, event: AudioEvent) -> bool {
        let stream = self.streams.lock().unwrap().get(user).cloned();
        match stream {
            Some(stream) => stream.send(event).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl CallConnection for MockConnection {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    async fn subscribe(
        &self,
        speaker: &str,
        _silence: Duration,
    ) -> Result<mpsc::Receiver<AudioEvent>, PlatformError> {
        let (tx, rx) = mpsc::channel(64);
        self.subscriptions.lock().unwrap().push(speaker.to_string());
        self.streams.lock().unwrap().insert(speaker.to_string(), tx);
        Ok(rx)
    }

    async fn play(&self, path: &Path) -> Result<(), PlatformError> {
        tokio::task::yield_now().await;
        self.played.lock().unwrap().push(path.to_path_buf());
        if path.to_string_lossy().contains("broken") {
            return Err(PlatformError::Rejected("player error".to_string()));
        }
        Ok(())
    }

    async fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.state.send_replace(LinkState::Destroyed);
    }
}

/// Renders tones as their label and speech as its text, without files.
/// Speech containing "unsayable" fails.
pub struct LabelRenderer;

#[async_trait]
impl AudioRenderer for LabelRenderer {
    async fn render(&self, item: &PlaybackItem) -> Result<RenderedAudio, VoiceError> {
        match item {
            PlaybackItem::Tone(kind) => Ok(RenderedAudio::shared(PathBuf::from(kind.label()))),
            PlaybackItem::Speech(text) if text.contains("unsayable") => {
                Err(VoiceError::Tts("provider crashed".to_string()))
            }
            PlaybackItem::Speech(text) => Ok(RenderedAudio::shared(PathBuf::from(text))),
        }
    }
}

/// Returns queued transcripts in order, then nothing.
#[derive(Default)]
pub struct ScriptedTranscriber {
    pub replies: Mutex<VecDeque<Result<Option<String>, String>>>,
    pub calls: AtomicUsize,
    pub seen_files: Mutex<Vec<PathBuf>>,
}

impl ScriptedTranscriber {
    pub fn with<I, S>(transcripts: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let t = Self::default();
        t.replies
            .lock()
            .unwrap()
            .extend(transcripts.into_iter().map(|s| Ok(Some(s.into()))));
        Arc::new(t)
    }

    pub fn push_error(&self, error: &str) {
        self.replies.lock().unwrap().push_back(Err(error.to_string()));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, wav: &Path) -> Result<Option<String>, VoiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(wav.exists(), "segment wav missing during transcription");
        self.seen_files.lock().unwrap().push(wav.to_path_buf());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(e)) => Err(VoiceError::Stt(e)),
            None => Ok(None),
        }
    }
}

/// Capture PCM of the given length in milliseconds (48 kHz stereo s16le).
pub fn pcm_ms(ms: usize) -> Vec<u8> {
    vec![0u8; ms * 192]
}

pub fn message(channel: &str, author: &str, content: &str) -> IncomingMessage {
    IncomingMessage {
        id: format!("m-{content}"),
        channel_id: channel.to_string(),
        author_id: author.to_string(),
        author_is_bot: false,
        content: content.to_string(),
        author_voice_channel: None,
        author_voice_channel_name: None,
    }
}

/// Polls `check` until it holds, yielding to other tasks in between.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
