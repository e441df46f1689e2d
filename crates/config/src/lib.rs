//! Process configuration: environment variables, with an optional TOML
//! file underneath, plus the timeout and threshold defaults the engine
//! runs with.
//!
//! Small hand-rolled structs with `Default` impls and a manual layering
//! function, rather than a configuration framework.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Every field an env var can also supply, for the optional file layer
/// underneath it. `CALLCORE_CONFIG` picks the file explicitly; otherwise
/// `dirs::config_dir()/callcore/config.toml` is tried and silently skipped
/// if absent, so the file is opt-in only.
#[derive(Debug, Default, serde::Deserialize)]
struct FileLayer {
    openai_api_key: Option<String>,
    rut_webhook_url: Option<String>,
    ari_app: Option<String>,
    ari_base_url: Option<String>,
    ari_username: Option<String>,
    ari_password: Option<String>,
    tenant_id: Option<String>,
    sounds_root: Option<String>,
    recordings_root: Option<String>,
    redis_url: Option<String>,
}

fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CALLCORE_CONFIG") {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("callcore").join("config.toml"))
}

fn load_file_layer() -> Result<FileLayer, ConfigError> {
    let Some(path) = config_file_path() else {
        return Ok(FileLayer::default());
    };
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(_) => return Ok(FileLayer::default()),
    };
    toml::from_str(&contents).map_err(|err| ConfigError::InvalidValue {
        name: "config file",
        value: err.to_string(),
    })
}

/// Timeouts and thresholds governing the per-turn algorithm. All are
/// configurable; these are the documented defaults.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub audio_ready_contract: Duration,
    pub audio_ready_event: Duration,
    pub voice_start: Duration,
    pub post_playback_guard: Duration,
    pub min_silence: Duration,
    pub max_utterance: Duration,
    pub max_recording_per_turn: Duration,
    pub transcript_wait: Duration,
    pub webhook_background_audio: Duration,
    pub stream_stable_threshold: Duration,
    pub webhook_debounce: Duration,
    pub min_audio_input: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            audio_ready_contract: Duration::from_secs(2),
            audio_ready_event: Duration::from_secs(5),
            voice_start: Duration::from_secs(4),
            post_playback_guard: Duration::from_millis(400),
            min_silence: Duration::from_millis(800),
            max_utterance: Duration::from_secs(5),
            max_recording_per_turn: Duration::from_secs(15),
            transcript_wait: Duration::from_secs(3),
            webhook_background_audio: Duration::from_secs(10),
            stream_stable_threshold: Duration::from_millis(300),
            webhook_debounce: Duration::from_millis(900),
            min_audio_input: Duration::from_millis(180),
        }
    }
}

/// Call-level counters governing when a turn loop ends.
#[derive(Debug, Clone, Copy)]
pub struct Caps {
    pub max_turns: u32,
    pub max_silent_turns: u32,
    /// N consecutive empty deltas for the "early-stable-state" trigger.
    /// Speculative, so kept configurable rather than hardcoded.
    pub early_stable_state_deltas: u32,
    pub ari_addchannel_max_retries: u32,
}

impl Default for Caps {
    fn default() -> Self {
        Self {
            max_turns: 15,
            max_silent_turns: 3,
            early_stable_state_deltas: 2,
            ari_addchannel_max_retries: 15,
        }
    }
}

/// Top-level process configuration, assembled from environment variables
/// plus the defaults above.
#[derive(Debug, Clone)]
pub struct CallcoreConfig {
    pub openai_api_key: String,
    pub rut_webhook_url: Option<String>,
    pub ari_app: String,
    pub ari_base_url: String,
    pub ari_username: String,
    pub ari_password: String,
    pub tenant_id: Option<String>,
    pub sounds_root: String,
    pub recordings_root: String,
    pub redis_url: String,
    pub timeouts: Timeouts,
    pub caps: Caps,
}

impl CallcoreConfig {
    /// Load from the process environment, with an optional TOML file layered
    /// underneath (env wins on conflict). Returns `Err` for the one fatal
    /// startup condition: `OPENAI_API_KEY` missing from both layers.
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = load_file_layer()?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .or(file.openai_api_key)
            .ok_or(ConfigError::MissingEnvVar("OPENAI_API_KEY"))?;

        let rut_webhook_url = std::env::var("RUT_WEBHOOK_URL").ok().or(file.rut_webhook_url);
        if rut_webhook_url.is_none() {
            tracing::warn!("RUT_WEBHOOK_URL not set; required in production deployments");
        }

        Ok(Self {
            openai_api_key,
            rut_webhook_url,
            ari_app: std::env::var("ARI_APP").ok().or(file.ari_app).unwrap_or_else(|| "crm_app".to_string()),
            ari_base_url: std::env::var("ARI_BASE_URL")
                .ok()
                .or(file.ari_base_url)
                .unwrap_or_else(|| "http://127.0.0.1:8088/ari".to_string()),
            ari_username: std::env::var("ARI_USERNAME").ok().or(file.ari_username).unwrap_or_default(),
            ari_password: std::env::var("ARI_PASSWORD").ok().or(file.ari_password).unwrap_or_default(),
            tenant_id: std::env::var("TENANT_ID").ok().or(file.tenant_id),
            sounds_root: std::env::var("SOUNDS_ROOT")
                .ok()
                .or(file.sounds_root)
                .unwrap_or_else(|| "/var/lib/asterisk/sounds".to_string()),
            recordings_root: std::env::var("RECORDINGS_ROOT")
                .ok()
                .or(file.recordings_root)
                .unwrap_or_else(|| "/var/spool/asterisk/recording".to_string()),
            redis_url: std::env::var("REDIS_URL")
                .ok()
                .or(file.redis_url)
                .unwrap_or_else(|| "redis://127.0.0.1/".to_string()),
            timeouts: Timeouts::default(),
            caps: Caps::default(),
        })
    }

    pub fn sound_path(&self, name: &str) -> String {
        format!("{}/voicebot/{name}.wav", self.sounds_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_requires_api_key() {
        std::env::remove_var("OPENAI_API_KEY");
        let err = CallcoreConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar("OPENAI_API_KEY")));
    }

    #[test]
    fn from_env_defaults_ari_app() {
        std::env::set_var("OPENAI_API_KEY", "test-key");
        std::env::remove_var("ARI_APP");
        let cfg = CallcoreConfig::from_env().unwrap();
        assert_eq!(cfg.ari_app, "crm_app");
        std::env::remove_var("OPENAI_API_KEY");
    }

    #[test]
    fn file_layer_fills_gaps_env_still_wins() {
        let dir = std::env::temp_dir().join("callcore-config-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("layer_test.toml");
        std::fs::write(&path, "ari_app = \"from_file\"\nredis_url = \"redis://from-file/\"\n").unwrap();

        std::env::set_var("CALLCORE_CONFIG", &path);
        std::env::set_var("OPENAI_API_KEY", "test-key");
        std::env::remove_var("ARI_APP");
        std::env::set_var("REDIS_URL", "redis://from-env/");

        let cfg = CallcoreConfig::from_env().unwrap();
        assert_eq!(cfg.ari_app, "from_file");
        assert_eq!(cfg.redis_url, "redis://from-env/");

        std::env::remove_var("CALLCORE_CONFIG");
        std::env::remove_var("OPENAI_API_KEY");
        std::env::remove_var("REDIS_URL");
    }

    #[test]
    fn sound_path_matches_convention() {
        std::env::set_var("OPENAI_API_KEY", "test-key");
        let mut cfg = CallcoreConfig::from_env().unwrap();
        cfg.sounds_root = "/sounds".to_string();
        assert_eq!(cfg.sound_path("greeting"), "/sounds/voicebot/greeting.wav");
        std::env::remove_var("OPENAI_API_KEY");
    }
}
