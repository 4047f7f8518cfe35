use crate::config::SynthesisConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use vcbridge_types::voice::{EdgeVoice, PiperVoice, TtsProvider};

/// Maximum text input size for one synthesis call (64 KiB).
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Text-to-speech boundary. Writes the synthesized audio to `out`.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Extension the written file should carry (`mp3`, `wav`).
    fn file_extension(&self) -> &'static str;

    async fn synthesize(&self, text: &str, out: &Path) -> Result<(), VoiceError>;
}

/// Synthesizes speech through the configured provider module.
#[derive(Debug, Clone)]
pub struct TtsService {
    config: SynthesisConfig,
}

impl TtsService {
    /// Creates the service, rejecting a piper selection without a model.
    pub fn new(config: SynthesisConfig) -> Result<Self, VoiceError> {
        if config.provider == TtsProvider::Piper && config.piper.model.trim().is_empty() {
            return Err(VoiceError::Config(
                "piper provider selected but no piper model is configured".to_string(),
            ));
        }
        Ok(Self { config })
    }

    pub fn provider(&self) -> TtsProvider {
        self.config.provider
    }

    fn args(&self, text: &str, out: &Path) -> Vec<OsString> {
        match self.config.provider {
            TtsProvider::Edge => edge_args(&self.config.edge, text, out),
            TtsProvider::Piper => piper_args(&self.config.piper, text, out),
        }
    }
}

/// `-m edge_tts --voice .. --rate .. --pitch .. --volume .. --text .. --write-media out`
pub fn edge_args(voice: &EdgeVoice, text: &str, out: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-m".into(), "edge_tts".into()];
    args.push("--voice".into());
    args.push(voice.voice.clone().into());
    // attached with `=` so a negative value such as `-10%` is not read as a flag
    args.push(format!("--rate={}", voice.rate).into());
    args.push(format!("--pitch={}", voice.pitch).into());
    args.push(format!("--volume={}", voice.volume).into());
    args.push("--text".into());
    args.push(text.into());
    args.push("--write-media".into());
    args.push(out.as_os_str().to_owned());
    args
}

/// `-m piper -m model --data-dir .. [tuning] -f out -- text`
pub fn piper_args(voice: &PiperVoice, text: &str, out: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-m".into(), "piper".into()];
    args.push("-m".into());
    args.push(voice.model.clone().into());
    args.push("--data-dir".into());
    args.push(voice.data_dir.clone().into());
    if let Some(speaker) = voice.speaker {
        args.push("--speaker".into());
        args.push(speaker.to_string().into());
    }
    let tuning = [
        ("--length-scale", voice.length_scale),
        ("--noise-scale", voice.noise_scale),
        ("--noise-w-scale", voice.noise_w_scale),
        ("--sentence-silence", voice.sentence_silence),
    ];
    for (flag, value) in tuning {
        if let Some(value) = value {
            args.push(flag.into());
            args.push(value.to_string().into());
        }
    }
    args.push("-f".into());
    args.push(out.as_os_str().to_owned());
    args.push("--".into());
    args.push(text.into());
    args
}

#[async_trait]
impl Synthesizer for TtsService {
    fn file_extension(&self) -> &'static str {
        self.config.provider.file_extension()
    }

    async fn synthesize(&self, text: &str, out: &Path) -> Result<(), VoiceError> {
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::Tts(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }

        let provider = self.config.provider;
        let output = Command::new(&self.config.python)
            .args(self.args(text, out))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| VoiceError::Tts(format!("Failed to spawn {}: {}", provider, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Tts(format!(
                "{} failed ({}): {}",
                provider,
                output.status,
                stderr.trim()
            )));
        }

        match tokio::fs::metadata(out).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(VoiceError::Tts(format!(
                "{} exited cleanly but wrote no audio to {:?}",
                provider, out
            ))),
        }
    }
}
