//! Configuration loading.
//!
//! Three layers, ascending precedence: built-in defaults, an optional JSON
//! options file (the shape a controller add-on's supervisor drops at a
//! fixed path), then environment variables with a common `MIMIR_` prefix.
//! Each layer only overrides keys it actually sets — an options file that
//! omits `model` leaves the default or env value in place.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Selects which [`crate::llm`] adapter `create_provider` constructs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProviderKind {
    Anthropic,
    OpenAi,
    Azure,
    Gemini,
    Ollama,
    VLlm,
}

impl FromStr for LlmProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            "azure" => Ok(Self::Azure),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            "vllm" => Ok(Self::VLlm),
            other => Err(format!("unknown LLM provider: {other}")),
        }
    }
}

impl LlmProviderKind {
    /// Default base URL for providers that run as local/self-hosted servers
    /// reached over the OpenAI-compatible surface. Hosted providers
    /// (Anthropic, OpenAI, Gemini) return `None` — their adapters carry
    /// their own fixed endpoint.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            LlmProviderKind::Ollama => Some("http://localhost:11434/v1"),
            LlmProviderKind::VLlm => Some("http://localhost:8000/v1"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProviderKind,
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Chat,
    Normal,
    Yolo,
}

impl FromStr for OperatingMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "normal" => Ok(Self::Normal),
            "yolo" => Ok(Self::Yolo),
            other => Err(format!("unknown operating mode: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SafetyConfig {
    pub default_mode: OperatingMode,
    pub yolo_duration_minutes: i64,
    pub deletions_per_hour: usize,
    pub modifications_per_hour: usize,
    pub rate_limiting_enabled: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            default_mode: OperatingMode::Normal,
            yolo_duration_minutes: 10,
            deletions_per_hour: 5,
            modifications_per_hour: 20,
            rate_limiting_enabled: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessagingConfig {
    /// The only user whose inbound events are processed; all others are
    /// dropped with a warning log (§6).
    pub owner_user_id: i64,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Explicit base URL for direct mode. `None` selects supervisor-proxy
    /// mode when a supervisor token is present in the environment.
    pub base_url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MimirConfig {
    pub llm: LlmConfig,
    pub safety: SafetyConfig,
    pub messaging: MessagingConfig,
    pub controller: ControllerConfig,
    pub max_history: usize,
    pub max_tool_iterations: usize,
    pub database_path: PathBuf,
    pub debug: bool,
}

/// Raw shape of the JSON options file a controller add-on's supervisor
/// writes to disk; every field optional so the file may set only a subset.
#[derive(Debug, Default, Deserialize)]
struct AddonOptions {
    llm_provider: Option<String>,
    llm_api_key: Option<String>,
    llm_model: Option<String>,
    llm_base_url: Option<String>,
    owner_user_id: Option<i64>,
    operating_mode: Option<String>,
    yolo_duration_minutes: Option<i64>,
    deletions_per_hour: Option<usize>,
    modifications_per_hour: Option<usize>,
    debug: Option<bool>,
}

fn load_addon_options(path: &std::path::Path) -> Option<AddonOptions> {
    let text = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(opts) => Some(opts),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to parse addon options file, ignoring");
            None
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(format!("MIMIR_{name}")).ok()
}

/// Load configuration from defaults, then the options file at `options_path`
/// (if present), then environment variables — each layer only overriding
/// keys it actually provides.
pub fn load_config(options_path: Option<PathBuf>) -> Result<MimirConfig> {
    let options_path = options_path.unwrap_or_else(default_options_path);
    let addon = load_addon_options(&options_path).unwrap_or_default();

    let provider_str = env_var("LLM_PROVIDER")
        .or(addon.llm_provider)
        .unwrap_or_else(|| "anthropic".to_string());
    let provider = LlmProviderKind::from_str(&provider_str).map_err(Error::config)?;

    let api_key = env_var("LLM_API_KEY")
        .or(addon.llm_api_key)
        .ok_or_else(|| Error::config("LLM API key not configured"))?;

    let model = env_var("LLM_MODEL")
        .or(addon.llm_model)
        .unwrap_or_else(|| "claude-sonnet-4-5".to_string());

    let base_url = env_var("LLM_BASE_URL")
        .or(addon.llm_base_url)
        .or_else(|| provider.default_base_url().map(str::to_string));

    let owner_user_id = env_var("OWNER_USER_ID")
        .and_then(|s| s.parse().ok())
        .or(addon.owner_user_id)
        .ok_or_else(|| Error::config("messaging owner user id not configured"))?;
    if owner_user_id == 0 {
        return Err(Error::config("messaging owner user id must be nonzero"));
    }

    let default_mode = env_var("OPERATING_MODE")
        .or(addon.operating_mode)
        .map(|s| OperatingMode::from_str(&s))
        .transpose()
        .map_err(Error::config)?
        .unwrap_or(OperatingMode::Normal);

    let yolo_duration_minutes = env_var("YOLO_DURATION_MINUTES")
        .and_then(|s| s.parse().ok())
        .or(addon.yolo_duration_minutes)
        .unwrap_or(10);

    let deletions_per_hour = env_var("DELETIONS_PER_HOUR")
        .and_then(|s| s.parse().ok())
        .or(addon.deletions_per_hour)
        .unwrap_or(5);

    let modifications_per_hour = env_var("MODIFICATIONS_PER_HOUR")
        .and_then(|s| s.parse().ok())
        .or(addon.modifications_per_hour)
        .unwrap_or(20);

    let debug = env_var("DEBUG")
        .and_then(|s| s.parse().ok())
        .or(addon.debug)
        .unwrap_or(false);

    let controller_base_url = env_var("CONTROLLER_URL");
    let controller_token = env_var("CONTROLLER_TOKEN").or_else(|| env::var("SUPERVISOR_TOKEN").ok());

    Ok(MimirConfig {
        llm: LlmConfig {
            provider,
            api_key,
            model,
            base_url,
            max_tokens: env_var("LLM_MAX_TOKENS").and_then(|s| s.parse().ok()).unwrap_or(4096),
            temperature: env_var("LLM_TEMPERATURE").and_then(|s| s.parse().ok()).unwrap_or(0.7),
        },
        safety: SafetyConfig {
            default_mode,
            yolo_duration_minutes,
            deletions_per_hour,
            modifications_per_hour,
            rate_limiting_enabled: true,
        },
        messaging: MessagingConfig { owner_user_id },
        controller: ControllerConfig {
            base_url: controller_base_url,
            token: controller_token,
        },
        max_history: env_var("MAX_HISTORY").and_then(|s| s.parse().ok()).unwrap_or(50),
        max_tool_iterations: env_var("MAX_TOOL_ITERATIONS").and_then(|s| s.parse().ok()).unwrap_or(10),
        database_path: env_var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(default_database_path),
        debug,
    })
}

fn default_options_path() -> PathBuf {
    let supervisor_path = PathBuf::from("/data/options.json");
    if supervisor_path.exists() {
        return supervisor_path;
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mimir-agent")
        .join("options.json")
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mimir-agent")
        .join("mimir.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_from_str() {
        assert_eq!(LlmProviderKind::from_str("anthropic"), Ok(LlmProviderKind::Anthropic));
        assert_eq!(LlmProviderKind::from_str("OpenAI"), Ok(LlmProviderKind::OpenAi));
        assert!(LlmProviderKind::from_str("unknown").is_err());
    }

    #[test]
    fn mode_from_str() {
        assert_eq!(OperatingMode::from_str("chat"), Ok(OperatingMode::Chat));
        assert_eq!(OperatingMode::from_str("YOLO"), Ok(OperatingMode::Yolo));
        assert!(OperatingMode::from_str("bogus").is_err());
    }

    #[test]
    fn ollama_has_default_base_url_anthropic_does_not() {
        assert!(LlmProviderKind::Ollama.default_base_url().is_some());
        assert!(LlmProviderKind::Anthropic.default_base_url().is_none());
    }

    #[test]
    fn addon_options_parses_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        std::fs::write(&path, r#"{"llm_model": "claude-sonnet-4-5"}"#).unwrap();
        let opts = load_addon_options(&path).unwrap();
        assert_eq!(opts.llm_model.as_deref(), Some("claude-sonnet-4-5"));
        assert!(opts.owner_user_id.is_none());
    }
}
