use serde::Deserialize;
use std::path::PathBuf;
use vcbridge_types::voice::{EdgeVoice, PiperVoice, TtsProvider};

fn default_python() -> String {
    "./.venv/bin/python".to_string()
}

/// Settings for the external ASR script.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Interpreter used to run `script`.
    pub python: String,
    pub script: String,
    pub model: String,
    pub language: String,
    pub device: String,
    pub compute_type: String,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            script: "scripts/transcribe.py".to_string(),
            model: "tiny".to_string(),
            language: "en".to_string(),
            device: "cpu".to_string(),
            compute_type: "int8".to_string(),
        }
    }
}

/// Provider selection and voice parameters for speech synthesis.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub provider: TtsProvider,
    /// Interpreter used to run the provider module (`-m edge_tts`, `-m piper`).
    pub python: String,
    pub edge: EdgeVoice,
    pub piper: PiperVoice,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            provider: TtsProvider::default(),
            python: default_python(),
            edge: EdgeVoice::default(),
            piper: PiperVoice::default(),
        }
    }
}

/// Which tone generator fills the tone cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneGeneratorKind {
    /// `ffmpeg -f lavfi sine=...`
    #[default]
    Ffmpeg,
    /// In-process sine synthesis.
    Sine,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ToneConfig {
    pub generator: ToneGeneratorKind,
    /// ffmpeg binary, used by the ffmpeg generator.
    pub ffmpeg: String,
    pub duration_secs: f32,
    /// Linear gain in `0.0..=1.0`.
    pub amplitude: f32,
    pub sample_rate: u32,
    /// Where generated tones are kept. Defaults to the system temp dir.
    pub cache_dir: Option<PathBuf>,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            generator: ToneGeneratorKind::default(),
            ffmpeg: "ffmpeg".to_string(),
            duration_secs: 0.35,
            amplitude: 0.9,
            sample_rate: 48_000,
            cache_dir: None,
        }
    }
}

impl ToneConfig {
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesis_config_from_toml() {
        let config: SynthesisConfig = toml::from_str(
            r#"
            provider = "piper"
            [piper]
            model = "voices/en_GB.onnx"
            length_scale = 0.95
            "#,
        )
        .unwrap();
        assert_eq!(config.provider, TtsProvider::Piper);
        assert_eq!(config.piper.length_scale, Some(0.95));
        assert_eq!(config.edge, EdgeVoice::default());
        assert_eq!(config.python, "./.venv/bin/python");
    }

    #[test]
    fn tone_config_defaults() {
        let config: ToneConfig = toml::from_str(r#"generator = "sine""#).unwrap();
        assert_eq!(config.generator, ToneGeneratorKind::Sine);
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.cache_dir(), std::env::temp_dir());
    }
}
