use crate::config::TranscriptionConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Speech-to-text boundary.
///
/// Returns `Ok(None)` when the engine ran but heard nothing.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, wav: &Path) -> Result<Option<String>, VoiceError>;
}

/// Runs the ASR script once per segment:
/// `python script --file <wav> --model .. --language .. --device .. --compute-type ..`.
///
/// The transcript is read from stdout. There is no timeout; a script that
/// never exits stalls the calling chain only.
#[derive(Debug, Clone)]
pub struct SttService {
    config: TranscriptionConfig,
}

impl SttService {
    pub fn new(config: TranscriptionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TranscriptionConfig {
        &self.config
    }

    fn command(&self, wav: &Path) -> Command {
        let mut command = Command::new(&self.config.python);
        command
            .arg(&self.config.script)
            .arg("--file")
            .arg(wav)
            .arg("--model")
            .arg(&self.config.model)
            .arg("--language")
            .arg(&self.config.language)
            .arg("--device")
            .arg(&self.config.device)
            .arg("--compute-type")
            .arg(&self.config.compute_type)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

#[async_trait]
impl Transcriber for SttService {
    async fn transcribe(&self, wav: &Path) -> Result<Option<String>, VoiceError> {
        let output = self
            .command(wav)
            .output()
            .await
            .map_err(|e| VoiceError::Stt(format!("Failed to spawn ASR script: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Stt(format!(
                "ASR script failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }

        let text = crate::text::normalize_whitespace(&String::from_utf8_lossy(&output.stdout));
        if text.is_empty() {
            Ok(None)
        } else {
            Ok(Some(text))
        }
    }
}
