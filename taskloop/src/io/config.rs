//! Agent configuration stored in `.taskloop/config.toml`.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::completion::CompletionError;

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".taskloop/config.toml";

/// Agent configuration (TOML).
///
/// Missing fields default to the values used by `taskloop init`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Iteration budget for one session.
    pub max_iterations: u32,

    /// Maximum bytes per rendered prompt before sections are dropped.
    pub prompt_budget_bytes: usize,

    pub completion: CompletionConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            prompt_budget_bytes: 40_000,
            completion: CompletionConfig::default(),
        }
    }
}

/// Completion service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompletionConfig {
    /// Provider preset that picks the credential variable, endpoint and model.
    pub provider: Provider,

    /// Override the preset model id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Override the preset endpoint (OpenAI-compatible base URL).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Override the environment variable holding the API key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Temperature for planning and control decisions.
    pub planning_temperature: f32,

    /// Temperature for task execution and reflection.
    pub execution_temperature: f32,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Retries after a transient failure (network, 429, 5xx).
    pub max_retries: u32,

    /// Initial backoff between retries; doubled after each attempt.
    pub retry_backoff_ms: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Deepseek,
            model: None,
            base_url: None,
            api_key_env: None,
            planning_temperature: 0.0,
            execution_temperature: 0.3,
            request_timeout_secs: 120,
            max_retries: 2,
            retry_backoff_ms: 1_000,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        let completion = &self.completion;
        if completion.request_timeout_secs == 0 {
            return Err(anyhow!("completion.request_timeout_secs must be > 0"));
        }
        for (name, value) in [
            ("planning_temperature", completion.planning_temperature),
            ("execution_temperature", completion.execution_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(anyhow!("completion.{name} must be within [0, 2]"));
            }
        }
        Ok(())
    }
}

/// Completion provider presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Deepseek,
    Qwen,
    OpenaiCompat,
}

/// Credential variable, endpoint and model a provider uses by default.
#[derive(Debug, Clone, Copy)]
struct ProviderPreset {
    key_env: Option<&'static str>,
    base_url: Option<&'static str>,
    base_url_env: Option<&'static str>,
    model: Option<&'static str>,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deepseek => "deepseek",
            Self::Qwen => "qwen",
            Self::OpenaiCompat => "openai_compat",
        }
    }

    fn preset(self) -> ProviderPreset {
        match self {
            Self::Deepseek => ProviderPreset {
                key_env: Some("DS_API_KEY"),
                base_url: None,
                base_url_env: Some("DS_BASE_URL"),
                model: Some("DeepSeek-V3-0324"),
            },
            Self::Qwen => ProviderPreset {
                key_env: Some("DASHSCOPE_API_KEY"),
                base_url: Some("https://dashscope.aliyuncs.com/compatible-mode/v1"),
                base_url_env: None,
                model: Some("qwen3-30b-a3b"),
            },
            Self::OpenaiCompat => ProviderPreset {
                key_env: None,
                base_url: None,
                base_url_env: None,
                model: None,
            },
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "deepseek" => Ok(Self::Deepseek),
            "qwen" => Ok(Self::Qwen),
            "openai_compat" => Ok(Self::OpenaiCompat),
            other => Err(anyhow!(
                "unknown provider '{other}' (expected deepseek, qwen or openai_compat)"
            )),
        }
    }
}

/// Fully resolved completion endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub provider: Provider,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

/// Resolve credentials, endpoint and model for the configured provider.
///
/// `env` looks up environment variables; callers pass `std::env::var` in
/// production and a map in tests.
pub fn resolve_endpoint<F>(config: &CompletionConfig, env: F) -> Result<Endpoint, CompletionError>
where
    F: Fn(&str) -> Option<String>,
{
    let provider = config.provider;
    let preset = provider.preset();
    let lookup = |key: &str| env(key).filter(|value| !value.trim().is_empty());

    let key_env = config
        .api_key_env
        .clone()
        .or_else(|| preset.key_env.map(str::to_string))
        .ok_or_else(|| CompletionError::MissingEndpoint {
            provider: provider.to_string(),
            setting: "api_key_env".to_string(),
        })?;
    let api_key = lookup(&key_env).ok_or_else(|| CompletionError::MissingCredential {
        provider: provider.to_string(),
        env_var: key_env.clone(),
    })?;

    let base_url = config
        .base_url
        .clone()
        .or_else(|| preset.base_url_env.and_then(lookup))
        .or_else(|| preset.base_url.map(str::to_string))
        .ok_or_else(|| CompletionError::MissingEndpoint {
            provider: provider.to_string(),
            setting: match preset.base_url_env {
                Some(var) => format!("base_url (or {var})"),
                None => "base_url".to_string(),
            },
        })?;

    let model = config
        .model
        .clone()
        .or_else(|| preset.model.map(str::to_string))
        .ok_or_else(|| CompletionError::MissingEndpoint {
            provider: provider.to_string(),
            setting: "model".to_string(),
        })?;

    Ok(Endpoint {
        provider,
        base_url: base_url.trim_end_matches('/').to_string(),
        api_key,
        model,
    })
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AgentConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/config.toml");
        let cfg = AgentConfig {
            max_iterations: 8,
            completion: CompletionConfig {
                provider: Provider::Qwen,
                model: Some("qwen-plus".to_string()),
                ..CompletionConfig::default()
            },
            ..AgentConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_iterations = 5\n[completion]\nprovider = \"qwen\"\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_iterations, 5);
        assert_eq!(cfg.completion.provider, Provider::Qwen);
        assert_eq!(cfg.completion.execution_temperature, 0.3);
        assert_eq!(cfg.prompt_budget_bytes, 40_000);
    }

    #[test]
    fn validate_rejects_zero_iterations() {
        let cfg = AgentConfig {
            max_iterations: 0,
            ..AgentConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_iterations"));
    }

    #[test]
    fn provider_parses_cli_spellings() {
        assert_eq!("openai-compat".parse::<Provider>().expect("parse"), Provider::OpenaiCompat);
        assert_eq!("Qwen".parse::<Provider>().expect("parse"), Provider::Qwen);
        assert!("llama".parse::<Provider>().is_err());
    }

    #[test]
    fn qwen_preset_needs_only_the_key() {
        let cfg = CompletionConfig {
            provider: Provider::Qwen,
            ..CompletionConfig::default()
        };
        let endpoint =
            resolve_endpoint(&cfg, env_from(&[("DASHSCOPE_API_KEY", "sk-test")])).expect("resolve");
        assert_eq!(
            endpoint.base_url,
            "https://dashscope.aliyuncs.com/compatible-mode/v1"
        );
        assert_eq!(endpoint.model, "qwen3-30b-a3b");
        assert_eq!(endpoint.api_key, "sk-test");
        assert!(!format!("{endpoint:?}").contains("sk-test"));
    }

    #[test]
    fn deepseek_reads_endpoint_from_env() {
        let endpoint = resolve_endpoint(
            &CompletionConfig::default(),
            env_from(&[("DS_API_KEY", "k"), ("DS_BASE_URL", "https://ds.example/v1/")]),
        )
        .expect("resolve");
        assert_eq!(endpoint.base_url, "https://ds.example/v1");
        assert_eq!(endpoint.model, "DeepSeek-V3-0324");
    }

    #[test]
    fn missing_credential_is_reported() {
        let err = resolve_endpoint(
            &CompletionConfig::default(),
            env_from(&[("DS_API_KEY", "  "), ("DS_BASE_URL", "https://ds.example")]),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CompletionError::MissingCredential { ref env_var, .. } if env_var == "DS_API_KEY"
        ));
    }

    #[test]
    fn openai_compat_requires_explicit_settings() {
        let mut cfg = CompletionConfig {
            provider: Provider::OpenaiCompat,
            ..CompletionConfig::default()
        };
        let err = resolve_endpoint(&cfg, env_from(&[])).unwrap_err();
        assert!(err.to_string().contains("api_key_env"));

        cfg.api_key_env = Some("MY_KEY".to_string());
        cfg.base_url = Some("http://localhost:11434/v1".to_string());
        cfg.model = Some("llama3".to_string());
        let endpoint = resolve_endpoint(&cfg, env_from(&[("MY_KEY", "x")])).expect("resolve");
        assert_eq!(endpoint.model, "llama3");
    }
}
