//! Audio and speech boundaries for vcbridge.
//!
//! Every piece of work that leaves the process lives here: speech-to-text
//! through an external ASR script (`stt`), text-to-speech through one of two
//! interchangeable providers (`tts`), and alert tones through a
//! content-addressed cache in front of a tone generator (`tone`). Each
//! external call is one-shot and exit-code gated; a failure is reported as
//! a [`VoiceError`] and the caller decides to drop the work.
//!
//! `audio` holds the PCM format helpers used to turn captured call audio
//! into the canonical ASR input, and `text` the speech text helpers.

pub mod audio;
pub mod config;
pub mod error;
pub mod stt;
pub mod text;
pub mod tone;
pub mod tts;

pub use config::{SynthesisConfig, ToneConfig, ToneGeneratorKind, TranscriptionConfig};
pub use error::VoiceError;
pub use stt::{SttService, Transcriber};
pub use tone::{FfmpegToneGenerator, SineToneGenerator, ToneCache, ToneGenerator, ToneSpec};
pub use tts::{Synthesizer, TtsService};
