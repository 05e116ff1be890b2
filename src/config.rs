//! Configuration management
//!
//! Numeric pipeline thresholds live in a TOML file with documented defaults;
//! secrets (API keys) come from the environment. Validation happens at load
//! time, before any audio capture starts.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Assistant configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Wake word gate settings
    pub wake: WakeConfig,

    /// Voice activity detection settings
    pub vad: VadConfig,

    /// Recording session settings
    pub recording: RecordingConfig,

    /// Conversation context settings
    pub conversation: ConversationConfig,

    /// LLM backend settings
    pub llm: LlmConfig,

    /// Speech-to-text settings
    pub stt: SttConfig,

    /// Text-to-speech settings
    pub tts: TtsConfig,

    /// External tool server (MCP) settings
    pub mcp: McpConfig,

    /// Message bus settings
    pub bus: BusConfig,

    /// Spoken once startup completes and capture is about to be enabled
    pub greeting: Greeting,

    /// API keys, loaded from the environment (never from the TOML file)
    #[serde(skip)]
    pub api_keys: ApiKeys,
}

/// Wake word gate configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WakeConfig {
    /// Detection threshold on the scorer output (0.0 - 1.0)
    pub threshold: f32,

    /// Warm-up after the feature buffer first fills, during which
    /// detections are ignored (milliseconds)
    pub warmup_ms: u64,

    /// Allow the wake word to interrupt in-flight speech playback
    pub barge_in: bool,

    /// Threshold raise applied while speech playback is busy, so the
    /// assistant's own output cannot self-trigger
    pub barge_in_margin: f32,

    /// Label reported with detections
    pub label: String,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            warmup_ms: 2500,
            barge_in: true,
            barge_in_margin: 0.2,
            label: "wake".to_string(),
        }
    }
}

/// Voice activity detection configuration
///
/// Thresholds are compared against RMS of normalized float samples in
/// [-1, 1]; time windows are converted to sample counts at session start.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VadConfig {
    /// RMS energy below which a chunk counts as silence
    pub silence_threshold: f32,

    /// Initial window during which silence never ends the recording
    pub grace_ms: u64,

    /// Trailing silence required to end the recording
    pub trailing_silence_ms: u64,

    /// Minimum total recording length before a silence stop is honored
    pub min_speech_ms: u64,

    /// Hard cap on recording length
    pub max_utterance_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 0.006,
            grace_ms: 1200,
            trailing_silence_ms: 1500,
            min_speech_ms: 700,
            max_utterance_ms: 10_000,
        }
    }
}

/// Recording session configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecordingConfig {
    /// Pre-roll audio kept before the wake word fires (milliseconds)
    pub preroll_ms: u64,

    /// Pause between finishing a reply and re-arming the wake gate
    pub cooldown_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            preroll_ms: 1000,
            cooldown_ms: 600,
        }
    }
}

/// Conversation context configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConversationConfig {
    /// Inactivity window after which the rolling history is cleared
    pub timeout_secs: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self { timeout_secs: 300 }
    }
}

/// LLM backend configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Provider switch: "openai" or "anthropic"
    pub provider: String,

    /// Model identifier for chat completions
    pub model: String,

    /// Max tokens per reply
    pub max_tokens: u32,

    /// Base system prompt prepended to every conversation
    pub base_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 1024,
            base_prompt: "You are a helpful voice assistant. Keep responses \
                          short and conversational; they will be spoken aloud."
                .to_string(),
        }
    }
}

/// Speech-to-text configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SttConfig {
    /// Provider switch: "whisper-api" or "whisper-local"
    pub provider: String,

    /// Model name (API) or binary path (local)
    pub model: String,

    /// Hard timeout for a transcription call; timed-out subprocesses are
    /// killed, not abandoned
    pub timeout_secs: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: "whisper-api".to_string(),
            model: "whisper-1".to_string(),
            timeout_secs: 45,
        }
    }
}

/// Text-to-speech configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TtsConfig {
    /// Provider switch: "openai" or "elevenlabs"
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Voice identifier
    pub voice: String,

    /// Speed multiplier (`OpenAI` only)
    pub speed: f64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            speed: 1.0,
        }
    }
}

/// External tool server (MCP) configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct McpConfig {
    /// Tool server URL; empty disables discovery entirely
    pub url: String,

    /// Discovery attempts before degrading to local tools only
    pub retry_attempts: u32,

    /// Base delay for the exponential backoff between attempts (seconds);
    /// the first attempt has no delay
    pub retry_base_delay_secs: u64,

    /// Round-trip timeout for a single tool call
    pub call_timeout_secs: u64,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            retry_attempts: 3,
            retry_base_delay_secs: 2,
            call_timeout_secs: 10,
        }
    }
}

/// Message bus configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusConfig {
    /// Enable the MQTT bus; publishing is always best-effort
    pub enabled: bool,

    /// Broker host
    pub host: String,

    /// Broker port
    pub port: u16,

    /// Topic for transcription events
    pub transcription_topic: String,

    /// Topic for session status events
    pub status_topic: String,

    /// Topic for assistant response events
    pub response_topic: String,

    /// Topic this daemon subscribes to for externally-produced responses
    pub external_response_topic: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 1883,
            transcription_topic: "assistant/transcription".to_string(),
            status_topic: "assistant/status".to_string(),
            response_topic: "assistant/response".to_string(),
            external_response_topic: "assistant/response/external".to_string(),
        }
    }
}

/// Spoken ready greeting
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Greeting {
    /// Text spoken once startup completes; empty skips the greeting
    pub text: String,
}

impl Default for Greeting {
    fn default() -> Self {
        Self {
            text: "Ready.".to_string(),
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper, TTS, chat)
    pub openai: Option<String>,

    /// `Anthropic` API key (chat)
    pub anthropic: Option<String>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<String>,
}

impl ApiKeys {
    /// Load API keys from the environment
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            openai: std::env::var("OPENAI_API_KEY").ok(),
            anthropic: std::env::var("ANTHROPIC_API_KEY").ok(),
            elevenlabs: std::env::var("ELEVENLABS_API_KEY").ok(),
        }
    }
}

/// Default config file path (`~/.config/murmur/murmur.toml` on Linux)
#[must_use]
pub fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "murmur", "murmur").map_or_else(
        || PathBuf::from("murmur.toml"),
        |d| d.config_dir().join("murmur.toml"),
    )
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be parsed, or if
    /// validation fails
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map_or_else(default_config_path, Path::to_path_buf);

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Self = toml::from_str(&content)?;
            tracing::info!(path = %path.display(), "loaded configuration");
            config
        } else {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };

        config.api_keys = ApiKeys::from_env();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// Programming/config errors fail here, before capture is enabled.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid field
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.wake.threshold) {
            return Err(Error::Config(format!(
                "wake.threshold must be in [0, 1], got {}",
                self.wake.threshold
            )));
        }

        if self.vad.silence_threshold <= 0.0 {
            return Err(Error::Config(
                "vad.silence_threshold must be positive".to_string(),
            ));
        }

        if self.vad.min_speech_ms >= self.vad.max_utterance_ms {
            return Err(Error::Config(format!(
                "vad.min_speech_ms ({}) must be below vad.max_utterance_ms ({})",
                self.vad.min_speech_ms, self.vad.max_utterance_ms
            )));
        }

        match self.llm.provider.as_str() {
            "openai" => {
                if self.api_keys.openai.is_none() {
                    return Err(Error::Config(
                        "OPENAI_API_KEY required for llm.provider = \"openai\"".to_string(),
                    ));
                }
            }
            "anthropic" => {
                if self.api_keys.anthropic.is_none() {
                    return Err(Error::Config(
                        "ANTHROPIC_API_KEY required for llm.provider = \"anthropic\"".to_string(),
                    ));
                }
            }
            other => {
                return Err(Error::Config(format!(
                    "unknown llm.provider: {other} (expected \"openai\" or \"anthropic\")"
                )));
            }
        }

        match self.stt.provider.as_str() {
            "whisper-api" => {
                if self.api_keys.openai.is_none() {
                    return Err(Error::Config(
                        "OPENAI_API_KEY required for stt.provider = \"whisper-api\"".to_string(),
                    ));
                }
            }
            "whisper-local" => {
                if self.stt.model.is_empty() {
                    return Err(Error::Config(
                        "stt.model must name the whisper binary for whisper-local".to_string(),
                    ));
                }
            }
            other => {
                return Err(Error::Config(format!(
                    "unknown stt.provider: {other} (expected \"whisper-api\" or \"whisper-local\")"
                )));
            }
        }

        match self.tts.provider.as_str() {
            "openai" => {
                if self.api_keys.openai.is_none() {
                    return Err(Error::Config(
                        "OPENAI_API_KEY required for tts.provider = \"openai\"".to_string(),
                    ));
                }
            }
            "elevenlabs" => {
                if self.api_keys.elevenlabs.is_none() {
                    return Err(Error::Config(
                        "ELEVENLABS_API_KEY required for tts.provider = \"elevenlabs\"".to_string(),
                    ));
                }
            }
            other => {
                return Err(Error::Config(format!(
                    "unknown tts.provider: {other} (expected \"openai\" or \"elevenlabs\")"
                )));
            }
        }

        if self.mcp.retry_attempts == 0 {
            return Err(Error::Config(
                "mcp.retry_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_keys() -> Config {
        Config {
            api_keys: ApiKeys {
                openai: Some("sk-test".to_string()),
                ..ApiKeys::default()
            },
            ..Config::default()
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert!((config.vad.silence_threshold - 0.006).abs() < f32::EPSILON);
        assert_eq!(config.vad.grace_ms, 1200);
        assert_eq!(config.vad.trailing_silence_ms, 1500);
        assert_eq!(config.vad.min_speech_ms, 700);
        assert_eq!(config.vad.max_utterance_ms, 10_000);
        assert_eq!(config.mcp.retry_attempts, 3);
        assert_eq!(config.mcp.retry_base_delay_secs, 2);
        assert_eq!(config.conversation.timeout_secs, 300);
        assert_eq!(config.recording.preroll_ms, 1000);
    }

    #[test]
    fn validation_passes_with_keys() {
        assert!(config_with_keys().validate().is_ok());
    }

    #[test]
    fn validation_rejects_missing_llm_key() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_unknown_provider() {
        let mut config = config_with_keys();
        config.llm.provider = "mystery".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_inverted_vad_windows() {
        let mut config = config_with_keys();
        config.vad.min_speech_ms = 20_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_overrides_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [vad]
            silence_threshold = 0.01
            trailing_silence_ms = 2000

            [mcp]
            url = "http://localhost:9090"
            retry_attempts = 5
            "#,
        )
        .unwrap();

        assert!((parsed.vad.silence_threshold - 0.01).abs() < f32::EPSILON);
        assert_eq!(parsed.vad.trailing_silence_ms, 2000);
        assert_eq!(parsed.vad.grace_ms, 1200);
        assert_eq!(parsed.mcp.retry_attempts, 5);
        assert_eq!(parsed.mcp.url, "http://localhost:9090");
    }
}
