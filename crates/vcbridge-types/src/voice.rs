//! Speech synthesis provider and voice parameter definitions.
//!
//! A deployment selects one provider by name; each provider carries its own
//! voice parameters, which are passed through verbatim to the external tool.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported speech synthesis providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsProvider {
    /// Edge TTS (`python -m edge_tts`), writes mp3.
    #[default]
    Edge,
    /// Piper (`python -m piper`), local ONNX voices, writes wav.
    Piper,
}

impl TtsProvider {
    /// File extension of the audio the provider writes.
    pub fn file_extension(self) -> &'static str {
        match self {
            Self::Edge => "mp3",
            Self::Piper => "wav",
        }
    }
}

impl fmt::Display for TtsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Edge => f.write_str("edge"),
            Self::Piper => f.write_str("piper"),
        }
    }
}

/// Unknown provider name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProvider(pub String);

impl fmt::Display for UnknownProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown tts provider: {}", self.0)
    }
}

impl std::error::Error for UnknownProvider {}

impl FromStr for TtsProvider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "edge" => Ok(Self::Edge),
            "piper" => Ok(Self::Piper),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// Voice parameters for the edge provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeVoice {
    pub voice: String,
    /// Relative rate, e.g. `+0%`.
    pub rate: String,
    /// Relative pitch, e.g. `+0Hz`.
    pub pitch: String,
    /// Relative volume, e.g. `+0%`.
    pub volume: String,
}

impl Default for EdgeVoice {
    fn default() -> Self {
        Self {
            voice: "en-GB-RyanNeural".to_string(),
            rate: "+0%".to_string(),
            pitch: "+0Hz".to_string(),
            volume: "+0%".to_string(),
        }
    }
}

/// Voice parameters for the piper provider.
///
/// Optional tuning values are only passed to piper when set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PiperVoice {
    /// Path to the `.onnx` voice. Required when piper is the selected provider.
    pub model: String,
    pub data_dir: String,
    pub speaker: Option<u32>,
    pub length_scale: Option<f32>,
    pub noise_scale: Option<f32>,
    pub noise_w_scale: Option<f32>,
    pub sentence_silence: Option<f32>,
}

impl Default for PiperVoice {
    fn default() -> Self {
        Self {
            model: String::new(),
            data_dir: "voices".to_string(),
            speaker: None,
            length_scale: None,
            noise_scale: None,
            noise_w_scale: None,
            sentence_silence: None,
        }
    }
}
