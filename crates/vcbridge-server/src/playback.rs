//! Outbound playback queue.
//!
//! A FIFO of tones and speech chunks with one consumer per session. The
//! `playing` flag, guarded together with the queue, is the only thing that
//! decides whether a drain task starts, so concurrent enqueues never start
//! two players. A failed item is logged and skipped; the queue always moves
//! on to the next one.

use crate::platform::CallConnection;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempPath;
use tokio::sync::watch;
use vcbridge_types::ToneKind;
use vcbridge_voice::text::split_chunks;
use vcbridge_voice::{Synthesizer, ToneCache, VoiceError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackItem {
    Tone(ToneKind),
    /// One pre-split chunk of text to synthesize.
    Speech(String),
}

impl PlaybackItem {
    fn label(&self) -> &'static str {
        match self {
            Self::Tone(kind) => kind.label(),
            Self::Speech(_) => "speech",
        }
    }
}

/// Audio ready to play. A synthesized file is deleted when this is dropped.
#[derive(Debug)]
pub struct RenderedAudio {
    path: PathBuf,
    _scratch: Option<TempPath>,
}

impl RenderedAudio {
    /// A file owned elsewhere (cached tones).
    pub fn shared(path: PathBuf) -> Self {
        Self {
            path,
            _scratch: None,
        }
    }

    /// A scratch file removed on drop.
    pub fn scratch(path: TempPath) -> Self {
        Self {
            path: path.to_path_buf(),
            _scratch: Some(path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Turns a queue item into a playable file.
#[async_trait]
pub trait AudioRenderer: Send + Sync {
    async fn render(&self, item: &PlaybackItem) -> Result<RenderedAudio, VoiceError>;
}

/// Renders speech through a [`Synthesizer`] and tones through a [`ToneCache`].
pub struct VoiceRenderer {
    synthesizer: Option<Arc<dyn Synthesizer>>,
    tones: Arc<ToneCache>,
    scratch_dir: PathBuf,
}

impl VoiceRenderer {
    pub fn new(
        synthesizer: Option<Arc<dyn Synthesizer>>,
        tones: Arc<ToneCache>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            synthesizer,
            tones,
            scratch_dir: scratch_dir.into(),
        }
    }
}

#[async_trait]
impl AudioRenderer for VoiceRenderer {
    async fn render(&self, item: &PlaybackItem) -> Result<RenderedAudio, VoiceError> {
        match item {
            PlaybackItem::Tone(kind) => Ok(RenderedAudio::shared(self.tones.get(*kind).await?)),
            PlaybackItem::Speech(text) => {
                let synthesizer = self
                    .synthesizer
                    .as_ref()
                    .ok_or_else(|| VoiceError::Config("speech is disabled".to_string()))?;
                let scratch = tempfile::Builder::new()
                    .prefix("vc-tts-")
                    .suffix(&format!(".{}", synthesizer.file_extension()))
                    .tempfile_in(&self.scratch_dir)?
                    .into_temp_path();
                synthesizer.synthesize(text, &scratch).await?;
                Ok(RenderedAudio::scratch(scratch))
            }
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<PlaybackItem>,
    playing: bool,
    closed: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    /// `true` while nothing is pending or playing.
    idle: watch::Sender<bool>,
    renderer: Arc<dyn AudioRenderer>,
    sink: Arc<dyn CallConnection>,
}

/// Serializes audio output for one call.
#[derive(Clone)]
pub struct PlaybackQueue {
    shared: Arc<Shared>,
    max_chunk: usize,
}

impl PlaybackQueue {
    pub fn new(
        renderer: Arc<dyn AudioRenderer>,
        sink: Arc<dyn CallConnection>,
        max_chunk: usize,
    ) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                idle,
                renderer,
                sink,
            }),
            max_chunk,
        }
    }

    /// Splits `text` into chunks and queues them back to back.
    ///
    /// Returns the number of chunks queued.
    pub fn enqueue_speech(&self, text: &str) -> usize {
        let items: Vec<PlaybackItem> = split_chunks(text, self.max_chunk)
            .into_iter()
            .map(PlaybackItem::Speech)
            .collect();
        let count = items.len();
        self.enqueue_all(items);
        count
    }

    pub fn enqueue_tone(&self, kind: ToneKind) {
        self.enqueue_all(vec![PlaybackItem::Tone(kind)]);
    }

    /// Queues `items` contiguously and starts the drain task if idle.
    pub fn enqueue_all(&self, items: Vec<PlaybackItem>) {
        if items.is_empty() {
            return;
        }
        let start = {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.closed {
                tracing::debug!(items = items.len(), "playback queue closed, dropping items");
                return;
            }
            state.pending.extend(items);
            let start = !state.playing;
            state.playing = true;
            self.shared.idle.send_replace(false);
            start
        };
        if start {
            tokio::spawn(drain(Arc::clone(&self.shared)));
        }
    }

    /// Items waiting, not counting the one playing.
    pub fn len(&self) -> usize {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_playing(&self) -> bool {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .playing
    }

    /// Resolves once nothing is pending or playing.
    pub async fn wait_idle(&self) {
        let mut idle = self.shared.idle.subscribe();
        // the sender lives in `shared`, which we hold
        let _ = idle.wait_for(|idle| *idle).await;
    }

    /// Drops pending items and refuses new ones. The item playing finishes.
    pub fn close(&self) {
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        state.closed = true;
        state.pending.clear();
        if !state.playing {
            self.shared.idle.send_replace(true);
        }
    }
}

async fn drain(shared: Arc<Shared>) {
    loop {
        let item = {
            let mut state = shared.state.lock().unwrap_or_else(|e| e.into_inner());
            match state.pending.pop_front() {
                Some(item) => item,
                None => {
                    state.playing = false;
                    shared.idle.send_replace(true);
                    return;
                }
            }
        };
        play_one(&shared, &item).await;
    }
}

async fn play_one(shared: &Shared, item: &PlaybackItem) {
    let audio = match shared.renderer.render(item).await {
        Ok(audio) => audio,
        Err(e) => {
            tracing::warn!(item = item.label(), error = %e, "playback item failed to render, skipping");
            return;
        }
    };
    if let Err(e) = shared.sink.play(audio.path()).await {
        tracing::warn!(item = item.label(), error = %e, "playback failed, skipping");
    }
    // `audio` drops here, removing any scratch file
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{AudioEvent, PlatformError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use vcbridge_types::LinkState;

    struct LoggingSink {
        played: Mutex<Vec<PathBuf>>,
        concurrent: AtomicUsize,
        max_concurrent: AtomicUsize,
        state: watch::Sender<LinkState>,
    }

    impl LoggingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                played: Mutex::new(Vec::new()),
                concurrent: AtomicUsize::new(0),
                max_concurrent: AtomicUsize::new(0),
                state: watch::channel(LinkState::Ready).0,
            })
        }
    }

    #[async_trait]
    impl CallConnection for LoggingSink {
        fn channel(&self) -> &str {
            "voice"
        }

        fn state(&self) -> watch::Receiver<LinkState> {
            self.state.subscribe()
        }

        async fn subscribe(
            &self,
            _speaker: &str,
            _silence: Duration,
        ) -> Result<mpsc::Receiver<AudioEvent>, PlatformError> {
            Err(PlatformError::NotConnected)
        }

        async fn play(&self, path: &Path) -> Result<(), PlatformError> {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.played.lock().unwrap().push(path.to_path_buf());
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        async fn destroy(&self) {}
    }

    /// Speech containing "fail" fails to render.
    struct NameRenderer;

    #[async_trait]
    impl AudioRenderer for NameRenderer {
        async fn render(&self, item: &PlaybackItem) -> Result<RenderedAudio, VoiceError> {
            tokio::task::yield_now().await;
            match item {
                PlaybackItem::Tone(kind) => Ok(RenderedAudio::shared(PathBuf::from(kind.label()))),
                PlaybackItem::Speech(text) if text.contains("fail") => {
                    Err(VoiceError::Tts(format!("cannot say {text}")))
                }
                PlaybackItem::Speech(text) => Ok(RenderedAudio::shared(PathBuf::from(text))),
            }
        }
    }

    fn played(sink: &LoggingSink) -> Vec<String> {
        sink.played
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn mixed_failures_drain_completely_in_order() {
        let sink = LoggingSink::new();
        let queue = PlaybackQueue::new(Arc::new(NameRenderer), sink.clone(), 400);

        for text in ["one", "fail two", "three", "fail four", "five"] {
            queue.enqueue_speech(text);
        }
        queue.enqueue_tone(ToneKind::Close);
        queue.wait_idle().await;

        assert_eq!(played(&sink), vec!["one", "three", "five", "close"]);
        assert!(queue.is_empty());
        assert!(!queue.is_playing());
        assert_eq!(sink.max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn long_text_is_chunked_in_order() {
        let sink = LoggingSink::new();
        let queue = PlaybackQueue::new(Arc::new(NameRenderer), sink.clone(), 5);

        assert_eq!(queue.enqueue_speech("aa bb cc dd"), 3);
        queue.wait_idle().await;
        assert_eq!(played(&sink), vec!["aa bb", "cc d", "d"]);
    }

    #[tokio::test]
    async fn concurrent_enqueues_never_overlap() {
        let sink = LoggingSink::new();
        let queue = PlaybackQueue::new(Arc::new(NameRenderer), sink.clone(), 400);

        let mut tasks = Vec::new();
        for n in 0..16 {
            let queue = queue.clone();
            tasks.push(tokio::spawn(async move {
                queue.enqueue_speech(&format!("item{n}"));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        queue.wait_idle().await;

        assert_eq!(played(&sink).len(), 16);
        assert_eq!(sink.max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_queue_drops_new_items() {
        let sink = LoggingSink::new();
        let queue = PlaybackQueue::new(Arc::new(NameRenderer), sink.clone(), 400);
        queue.close();
        queue.enqueue_tone(ToneKind::Open);
        queue.wait_idle().await;
        assert!(played(&sink).is_empty());
    }

    #[tokio::test]
    async fn renderer_removes_scratch_speech_files() {
        struct EchoSynth;

        #[async_trait]
        impl Synthesizer for EchoSynth {
            fn file_extension(&self) -> &'static str {
                "wav"
            }

            async fn synthesize(&self, text: &str, out: &Path) -> Result<(), VoiceError> {
                tokio::fs::write(out, text).await?;
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let tones = Arc::new(ToneCache::from_config(vcbridge_voice::ToneConfig::default()));
        let renderer = VoiceRenderer::new(Some(Arc::new(EchoSynth)), tones, dir.path());

        let audio = renderer
            .render(&PlaybackItem::Speech("hi".to_string()))
            .await
            .unwrap();
        let path = audio.path().to_path_buf();
        assert_eq!(path.extension().unwrap(), "wav");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hi");

        drop(audio);
        assert!(!path.exists());
    }
}
