//! Alert tones and the content-addressed tone cache.
//!
//! A tone is identified by its [`ToneSpec`]. The cache maps each spec to a
//! file whose name embeds the frequency, duration and amplitude plus a hash
//! of the full parameter set and a format version, so a file is generated at
//! most once per parameter set and survives restarts.

use crate::audio::write_wav;
use crate::config::{ToneConfig, ToneGeneratorKind};
use crate::error::VoiceError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tokio::sync::OnceCell;
use vcbridge_types::ToneKind;

/// Bumped whenever generated tone audio changes shape.
const TONE_VERSION: &str = "v2";

/// Parameters that fully determine a tone file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ToneSpec {
    pub frequency_hz: u32,
    pub duration_ms: u32,
    /// Amplitude as a percentage of full scale.
    pub amplitude_pct: u32,
    pub sample_rate: u32,
}

impl ToneSpec {
    pub fn for_kind(kind: ToneKind, config: &ToneConfig) -> Self {
        Self {
            frequency_hz: kind.frequency_hz(),
            duration_ms: (config.duration_secs * 1000.0).round().max(0.0) as u32,
            amplitude_pct: (config.amplitude * 100.0).round().clamp(0.0, 100.0) as u32,
            sample_rate: config.sample_rate,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_ms as f64 / 1000.0
    }

    pub fn amplitude(&self) -> f64 {
        self.amplitude_pct as f64 / 100.0
    }

    /// Cache file name for this spec.
    pub fn file_name(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.frequency_hz.to_le_bytes());
        hasher.update(self.duration_ms.to_le_bytes());
        hasher.update(self.amplitude_pct.to_le_bytes());
        hasher.update(self.sample_rate.to_le_bytes());
        hasher.update(TONE_VERSION.as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!(
            "vc-beep-{}-{}-{}-{}-{}.wav",
            self.frequency_hz,
            self.duration_ms,
            self.amplitude_pct,
            TONE_VERSION,
            &digest[..12]
        )
    }
}

/// Writes a tone matching `spec` to `out` as WAV.
#[async_trait]
pub trait ToneGenerator: Send + Sync {
    async fn generate(&self, spec: &ToneSpec, out: &Path) -> Result<(), VoiceError>;
}

/// Generates tones with `ffmpeg -f lavfi -i sine=...`.
#[derive(Debug, Clone)]
pub struct FfmpegToneGenerator {
    binary: PathBuf,
}

impl FfmpegToneGenerator {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl ToneGenerator for FfmpegToneGenerator {
    async fn generate(&self, spec: &ToneSpec, out: &Path) -> Result<(), VoiceError> {
        let source = format!(
            "sine=frequency={}:duration={}:sample_rate={}",
            spec.frequency_hz,
            spec.duration_secs(),
            spec.sample_rate
        );
        let output = Command::new(&self.binary)
            .args(["-y", "-f", "lavfi", "-i"])
            .arg(source)
            .arg("-filter:a")
            .arg(format!("volume={}", spec.amplitude()))
            .args(["-ac", "1", "-ar"])
            .arg(spec.sample_rate.to_string())
            .arg(out)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| VoiceError::Tone(format!("Failed to spawn ffmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Tone(format!(
                "ffmpeg failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Synthesizes tones in-process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SineToneGenerator;

impl SineToneGenerator {
    pub fn samples(spec: &ToneSpec) -> Vec<i16> {
        let count = (spec.sample_rate as u64 * spec.duration_ms as u64 / 1000) as usize;
        let peak = spec.amplitude() * i16::MAX as f64;
        let step = 2.0 * std::f64::consts::PI * spec.frequency_hz as f64 / spec.sample_rate as f64;
        (0..count)
            .map(|n| (peak * (step * n as f64).sin()).round() as i16)
            .collect()
    }
}

#[async_trait]
impl ToneGenerator for SineToneGenerator {
    async fn generate(&self, spec: &ToneSpec, out: &Path) -> Result<(), VoiceError> {
        write_wav(out, &Self::samples(spec), spec.sample_rate)
    }
}

/// Builds the generator selected in `config`.
pub fn generator_from_config(config: &ToneConfig) -> Arc<dyn ToneGenerator> {
    match config.generator {
        ToneGeneratorKind::Ffmpeg => Arc::new(FfmpegToneGenerator::new(&config.ffmpeg)),
        ToneGeneratorKind::Sine => Arc::new(SineToneGenerator),
    }
}

/// Cache of generated tone files keyed by `(kind, spec)`.
///
/// Concurrent requests for the same key share one generation. A failed
/// generation leaves the entry empty so the next request retries.
pub struct ToneCache {
    dir: PathBuf,
    config: ToneConfig,
    generator: Arc<dyn ToneGenerator>,
    entries: Mutex<HashMap<(ToneKind, ToneSpec), Arc<OnceCell<PathBuf>>>>,
}

impl ToneCache {
    pub fn new(config: ToneConfig, generator: Arc<dyn ToneGenerator>) -> Self {
        Self {
            dir: config.cache_dir(),
            config,
            generator,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: ToneConfig) -> Self {
        let generator = generator_from_config(&config);
        Self::new(config, generator)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the tone for `kind`, generating it on a cache miss.
    pub async fn get(&self, kind: ToneKind) -> Result<PathBuf, VoiceError> {
        let spec = ToneSpec::for_kind(kind, &self.config);
        let cell = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.entry((kind, spec)).or_default().clone()
        };
        cell.get_or_try_init(|| self.materialize(kind, spec))
            .await
            .cloned()
    }

    async fn materialize(&self, kind: ToneKind, spec: ToneSpec) -> Result<PathBuf, VoiceError> {
        let path = self.dir.join(spec.file_name());
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!(tone = kind.label(), path = %path.display(), "tone cache hit on disk");
            return Ok(path);
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        // write beside the final path so the rename is atomic
        let scratch = tempfile::Builder::new()
            .prefix(".vc-beep-")
            .suffix(".wav")
            .tempfile_in(&self.dir)?
            .into_temp_path();
        self.generator.generate(&spec, &scratch).await?;
        scratch.persist(&path).map_err(|e| VoiceError::Io(e.error))?;

        tracing::info!(tone = kind.label(), path = %path.display(), "generated tone");
        Ok(path)
    }
}
