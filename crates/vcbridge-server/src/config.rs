//! Bridge configuration loading from file and environment variables.
//!
//! Every option has a default. `channels.voice` and `channels.text` have no
//! usable default and are checked by [`Config::validate`].

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use vcbridge_gate::{GatePolicy, MatchMode, PhraseSet};
use vcbridge_types::voice::TtsProvider;
use vcbridge_types::IdFilter;
use vcbridge_voice::{SynthesisConfig, ToneConfig, TranscriptionConfig};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub channels: ChannelConfig,
    pub capture: CaptureConfig,
    pub transcription: TranscriptionConfig,
    pub gate: GateConfig,
    pub speech: SpeechConfig,
    pub tone: ToneConfig,
    pub relay: RelayConfig,
    pub presence: PresenceConfig,
    pub connection: ConnectionConfig,
}

/// Listener for the sidecar link.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 7411,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log filter, e.g. `info,vcbridge_server=debug,timing=debug`.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Voice channel joined at startup.
    pub voice: String,
    /// Where gated transcripts are posted.
    pub text: String,
    /// Messages here are spoken into the call. Defaults to `text`.
    pub speak: Option<String>,
    pub relay_source: Option<String>,
    /// Defaults to `text`.
    pub relay_target: Option<String>,
}

impl ChannelConfig {
    pub fn speak_channel(&self) -> &str {
        self.speak.as_deref().unwrap_or(&self.text)
    }

    pub fn relay_target(&self) -> &str {
        self.relay_target.as_deref().unwrap_or(&self.text)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub enabled: bool,
    /// Silence that ends a speaker's segment.
    pub silence_duration_ms: u64,
    /// Segments shorter than this never reach transcription.
    pub min_speech_ms: u64,
    pub speaker_ids: Vec<String>,
    pub ignore_speaker_ids: Vec<String>,
    /// Gated transcripts longer than this are posted in several messages.
    pub max_message_len: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            silence_duration_ms: 800,
            min_speech_ms: 600,
            speaker_ids: Vec::new(),
            ignore_speaker_ids: Vec::new(),
            max_message_len: 1900,
        }
    }
}

impl CaptureConfig {
    pub fn silence(&self) -> Duration {
        Duration::from_millis(self.silence_duration_ms)
    }

    pub fn min_speech(&self) -> Duration {
        Duration::from_millis(self.min_speech_ms)
    }

    pub fn speaker_filter(&self) -> IdFilter {
        IdFilter::new(self.speaker_ids.clone(), self.ignore_speaker_ids.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// When false every transcript is posted on its own.
    pub enabled: bool,
    pub exact_match: bool,
    pub filter_filler: bool,
    pub start_phrases: Vec<String>,
    pub stop_phrases: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exact_match: false,
            filter_filler: true,
            start_phrases: vec!["start message".to_string()],
            stop_phrases: vec!["stop message".to_string(), "end message".to_string()],
        }
    }
}

impl GateConfig {
    pub fn policy(&self) -> Arc<GatePolicy> {
        Arc::new(GatePolicy {
            gating: self.enabled,
            filter_filler: self.filter_filler,
            match_mode: if self.exact_match {
                MatchMode::Exact
            } else {
                MatchMode::WordBoundary
            },
            start: PhraseSet::new(&self.start_phrases),
            stop: PhraseSet::new(&self.stop_phrases),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    #[serde(flatten)]
    pub synthesis: SynthesisConfig,
    /// Characters per synthesized chunk.
    pub max_chunk: usize,
    pub allow_bot_messages: bool,
    pub author_ids: Vec<String>,
    pub ignore_author_ids: Vec<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            synthesis: SynthesisConfig::default(),
            max_chunk: 400,
            allow_bot_messages: true,
            author_ids: Vec::new(),
            ignore_author_ids: Vec::new(),
        }
    }
}

impl SpeechConfig {
    pub fn author_filter(&self) -> IdFilter {
        IdFilter::new(self.author_ids.clone(), self.ignore_author_ids.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub enabled: bool,
    /// Only these authors are relayed. Empty refuses every message.
    pub author_ids: Vec<String>,
    pub ignore_filler: bool,
    /// Quiet period before a burst is sent. 0 sends each message at once.
    pub debounce_ms: u64,
    pub max_message_len: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            author_ids: Vec::new(),
            ignore_filler: true,
            debounce_ms: 5000,
            max_message_len: 1900,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Users the bridge follows between voice channels.
    pub follow_user_ids: Vec<String>,
    pub leave_when_empty: bool,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            follow_user_ids: Vec::new(),
            leave_when_empty: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// How long a dropped link may take to start renegotiating.
    pub self_heal_timeout_ms: u64,
    pub max_connect_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            self_heal_timeout_ms: 5000,
            max_connect_attempts: 5,
            retry_backoff_ms: 1000,
        }
    }
}

impl ConnectionConfig {
    pub fn self_heal_timeout(&self) -> Duration {
        Duration::from_millis(self.self_heal_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

impl Config {
    /// Checks the settings the bridge cannot start without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.voice.trim().is_empty() {
            return Err(ConfigError::Missing("channels.voice"));
        }
        if self.channels.text.trim().is_empty() {
            return Err(ConfigError::Missing("channels.text"));
        }
        if self.speech.enabled
            && self.speech.synthesis.provider == TtsProvider::Piper
            && self.speech.synthesis.piper.model.trim().is_empty()
        {
            return Err(ConfigError::Missing("speech.piper.model"));
        }
        if self.gate.enabled {
            let policy = self.gate.policy();
            if policy.start.is_empty() {
                return Err(ConfigError::Invalid(
                    "gate.start_phrases has no usable phrase".to_string(),
                ));
            }
            if policy.stop.is_empty() {
                return Err(ConfigError::Invalid(
                    "gate.stop_phrases has no usable phrase".to_string(),
                ));
            }
        }
        if self.speech.max_chunk == 0 {
            return Err(ConfigError::Invalid("speech.max_chunk must be > 0".to_string()));
        }
        if self.capture.max_message_len == 0 {
            return Err(ConfigError::Invalid(
                "capture.max_message_len must be > 0".to_string(),
            ));
        }
        if self.relay.max_message_len == 0 {
            return Err(ConfigError::Invalid(
                "relay.max_message_len must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies `VCBRIDGE_*` environment overrides and validates.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if the resulting configuration is missing a required setting.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Applies environment overrides read through `lookup`.
///
/// List values are comma separated. Values that fail to parse are ignored.
pub fn apply_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(&format!("VCBRIDGE_{name}"));

    set_parsed(&mut config.server.host, var("HOST"));
    set_parsed(&mut config.server.port, var("PORT"));
    set_string(&mut config.logging.level, var("LOG_LEVEL"));
    set_bool(&mut config.logging.json, var("LOG_JSON"));

    set_string(&mut config.channels.voice, var("VOICE_CHANNEL_ID"));
    set_string(&mut config.channels.text, var("TEXT_CHANNEL_ID"));
    set_optional(&mut config.channels.speak, var("SPEAK_CHANNEL_ID"));
    set_optional(&mut config.channels.relay_source, var("RELAY_SOURCE_CHANNEL_ID"));
    set_optional(&mut config.channels.relay_target, var("RELAY_TARGET_CHANNEL_ID"));

    let capture = &mut config.capture;
    set_bool(&mut capture.enabled, var("CAPTURE_ENABLED"));
    set_parsed(&mut capture.silence_duration_ms, var("SILENCE_DURATION_MS"));
    set_parsed(&mut capture.min_speech_ms, var("MIN_SPEECH_MS"));
    set_list(&mut capture.speaker_ids, var("SPEAKER_IDS"));
    set_list(&mut capture.ignore_speaker_ids, var("IGNORE_SPEAKER_IDS"));
    set_parsed(&mut capture.max_message_len, var("CAPTURE_MAX_MESSAGE_LEN"));

    let asr = &mut config.transcription;
    set_string(&mut asr.python, var("ASR_PYTHON"));
    set_string(&mut asr.script, var("ASR_SCRIPT"));
    set_string(&mut asr.model, var("ASR_MODEL"));
    set_string(&mut asr.language, var("ASR_LANGUAGE"));
    set_string(&mut asr.device, var("ASR_DEVICE"));
    set_string(&mut asr.compute_type, var("ASR_COMPUTE_TYPE"));

    let gate = &mut config.gate;
    set_bool(&mut gate.enabled, var("GATE_ENABLED"));
    set_bool(&mut gate.exact_match, var("GATE_EXACT_MATCH"));
    set_bool(&mut gate.filter_filler, var("FILTER_FILLER"));
    set_list(&mut gate.start_phrases, var("START_PHRASES"));
    set_list(&mut gate.stop_phrases, var("STOP_PHRASES"));

    let speech = &mut config.speech;
    set_bool(&mut speech.enabled, var("SPEECH_ENABLED"));
    set_parsed(&mut speech.synthesis.provider, var("TTS_PROVIDER"));
    set_string(&mut speech.synthesis.python, var("TTS_PYTHON"));
    set_parsed(&mut speech.max_chunk, var("TTS_MAX_CHUNK"));
    set_bool(&mut speech.allow_bot_messages, var("ALLOW_BOT_MESSAGES"));
    set_list(&mut speech.author_ids, var("SPEAK_AUTHOR_IDS"));
    set_list(&mut speech.ignore_author_ids, var("IGNORE_AUTHOR_IDS"));
    let edge = &mut speech.synthesis.edge;
    set_string(&mut edge.voice, var("EDGE_VOICE"));
    set_string(&mut edge.rate, var("EDGE_RATE"));
    set_string(&mut edge.pitch, var("EDGE_PITCH"));
    set_string(&mut edge.volume, var("EDGE_VOLUME"));
    let piper = &mut speech.synthesis.piper;
    set_string(&mut piper.model, var("PIPER_MODEL"));
    set_string(&mut piper.data_dir, var("PIPER_DATA_DIR"));
    set_optional_parsed(&mut piper.speaker, var("PIPER_SPEAKER"));
    set_optional_parsed(&mut piper.length_scale, var("PIPER_LENGTH_SCALE"));
    set_optional_parsed(&mut piper.noise_scale, var("PIPER_NOISE_SCALE"));
    set_optional_parsed(&mut piper.noise_w_scale, var("PIPER_NOISE_W_SCALE"));
    set_optional_parsed(&mut piper.sentence_silence, var("PIPER_SENTENCE_SILENCE"));

    set_string(&mut config.tone.ffmpeg, var("FFMPEG"));
    set_parsed(&mut config.tone.duration_secs, var("TONE_DURATION_SECS"));
    set_parsed(&mut config.tone.amplitude, var("TONE_AMPLITUDE"));

    let relay = &mut config.relay;
    set_bool(&mut relay.enabled, var("RELAY_ENABLED"));
    set_list(&mut relay.author_ids, var("RELAY_AUTHOR_IDS"));
    set_bool(&mut relay.ignore_filler, var("RELAY_IGNORE_FILLER"));
    set_parsed(&mut relay.debounce_ms, var("RELAY_DEBOUNCE_MS"));

    set_list(&mut config.presence.follow_user_ids, var("FOLLOW_USER_IDS"));
    set_bool(&mut config.presence.leave_when_empty, var("LEAVE_WHEN_EMPTY"));
}

fn set_string(field: &mut String, value: Option<String>) {
    if let Some(value) = value {
        *field = value.trim().to_string();
    }
}

fn set_optional(field: &mut Option<String>, value: Option<String>) {
    if let Some(value) = value {
        let value = value.trim();
        *field = (!value.is_empty()).then(|| value.to_string());
    }
}

fn set_parsed<T: FromStr>(field: &mut T, value: Option<String>) {
    if let Some(parsed) = value.and_then(|v| v.trim().parse().ok()) {
        *field = parsed;
    }
}

fn set_optional_parsed<T: FromStr>(field: &mut Option<T>, value: Option<String>) {
    if let Some(value) = value {
        *field = value.trim().parse().ok();
    }
}

fn set_bool(field: &mut bool, value: Option<String>) {
    if let Some(value) = value {
        *field = matches!(value.trim(), "true" | "1" | "yes");
    }
}

fn set_list(field: &mut Vec<String>, value: Option<String>) {
    if let Some(value) = value {
        *field = value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn minimal() -> Config {
        let mut config = Config::default();
        config.channels.voice = "100".to_string();
        config.channels.text = "200".to_string();
        config
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.port, 7411);
        assert_eq!(config.capture.silence_duration_ms, 800);
        assert_eq!(config.capture.min_speech_ms, 600);
        assert_eq!(config.speech.max_chunk, 400);
        assert_eq!(config.relay.debounce_ms, 5000);
        assert_eq!(config.relay.max_message_len, 1900);
        assert_eq!(config.capture.max_message_len, 1900);
        assert_eq!(config.connection.self_heal_timeout_ms, 5000);
        assert!(config.gate.enabled);
        assert!(!config.relay.enabled);
    }

    #[test]
    fn parses_nested_sections() {
        let config: Config = toml::from_str(
            r#"
            [channels]
            voice = "1"
            text = "2"
            relay_source = "3"

            [gate]
            exact_match = true
            stop_phrases = ["end"]

            [speech]
            provider = "piper"
            max_chunk = 200
            [speech.piper]
            model = "voices/en.onnx"
            "#,
        )
        .unwrap();
        assert_eq!(config.channels.speak_channel(), "2");
        assert_eq!(config.channels.relay_target(), "2");
        assert_eq!(config.channels.relay_source.as_deref(), Some("3"));
        assert_eq!(config.speech.synthesis.provider, TtsProvider::Piper);
        assert_eq!(config.speech.max_chunk, 200);
        assert_eq!(config.gate.policy().match_mode, MatchMode::Exact);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn transcript_and_relay_limits_are_separate() {
        let mut config: Config = toml::from_str(
            r#"
            [channels]
            voice = "1"
            text = "2"

            [capture]
            max_message_len = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.capture.max_message_len, 500);
        assert_eq!(config.relay.max_message_len, 1900);
        assert!(config.validate().is_ok());

        config.capture.max_message_len = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid(msg)) if msg.starts_with("capture.max_message_len")
        ));
    }

    #[test]
    fn missing_channels_are_fatal() {
        assert!(matches!(
            Config::default().validate(),
            Err(ConfigError::Missing("channels.voice"))
        ));
        let mut config = minimal();
        config.channels.text.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("channels.text"))
        ));
    }

    #[test]
    fn piper_requires_model() {
        let mut config = minimal();
        config.speech.synthesis.provider = TtsProvider::Piper;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("speech.piper.model"))
        ));
        config.speech.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn gating_requires_phrases() {
        let mut config = minimal();
        config.gate.start_phrases = vec!["  ".to_string(), "!!".to_string()];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.gate.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("VCBRIDGE_VOICE_CHANNEL_ID", "10"),
            ("VCBRIDGE_TEXT_CHANNEL_ID", " 20 "),
            ("VCBRIDGE_START_PHRASES", "begin note, start message"),
            ("VCBRIDGE_SPEAKER_IDS", "1, ,2"),
            ("VCBRIDGE_TTS_PROVIDER", "Piper"),
            ("VCBRIDGE_PIPER_LENGTH_SCALE", "0.9"),
            ("VCBRIDGE_RELAY_DEBOUNCE_MS", "0"),
            ("VCBRIDGE_PORT", "not-a-port"),
            ("VCBRIDGE_LEAVE_WHEN_EMPTY", "false"),
        ]);
        let mut config = Config::default();
        apply_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.channels.voice, "10");
        assert_eq!(config.channels.text, "20");
        assert_eq!(config.gate.start_phrases, vec!["begin note", "start message"]);
        assert_eq!(config.capture.speaker_ids, vec!["1", "2"]);
        assert_eq!(config.speech.synthesis.provider, TtsProvider::Piper);
        assert_eq!(config.speech.synthesis.piper.length_scale, Some(0.9));
        assert_eq!(config.relay.debounce_ms, 0);
        assert_eq!(config.server.port, 7411);
        assert!(!config.presence.leave_when_empty);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        // defaults lack channel ids, so validation is what fails
        assert!(matches!(
            load_config(path.to_str()),
            Err(ConfigError::Missing(_))
        ));
    }
}
