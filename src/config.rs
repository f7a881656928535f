//! Configuration for the serving process and its model providers.
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Embedded defaults (`config/default.toml`)
//! 2. User-specified configuration file (`--config`)
//! 3. Environment variables prefixed with `LORASERVE_`
//! 4. Command-line arguments
//!
//! The per-slot [`RuntimeConfig`] handed to the factory is a closed, tagged
//! enum: exactly one provider variant per logical slot, and the factory
//! rejects any config whose tag does not match the requested runtime kind.

use std::fmt;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};

/// Command-line arguments
#[derive(Debug, Parser)]
#[clap(version, about)]
pub struct Args {
    /// Configuration file path
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Bind address for the HTTP server
    #[clap(long)]
    pub host: Option<String>,

    /// Bind port for the HTTP server
    #[clap(long)]
    pub port: Option<u16>,

    /// Chat provider selection (remote, local)
    #[clap(long)]
    pub provider: Option<String>,
}

/// Provider variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Hosted LLM reached over HTTP
    Remote,
    /// Locally-hosted quantized model
    Local,
    /// Quantized base model with a trainable low-rank adapter
    Adapter,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Remote => write!(f, "remote"),
            ProviderKind::Local => write!(f, "local"),
            ProviderKind::Adapter => write!(f, "adapter"),
        }
    }
}

/// Compute device selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// CUDA when available, otherwise CPU
    #[default]
    Auto,
    Cpu,
    Cuda,
}

/// Default sampling parameters, overridable per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationDefaults {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,
    #[serde(default = "default_repeat_last_n")]
    pub repeat_last_n: usize,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            repeat_penalty: default_repeat_penalty(),
            repeat_last_n: default_repeat_last_n(),
        }
    }
}

/// Low-rank adapter hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoraHyperparams {
    /// Low-rank dimension (r in the paper)
    #[serde(default = "default_lora_rank")]
    pub rank: usize,
    /// Scaling factor (alpha in the paper)
    #[serde(default = "default_lora_alpha")]
    pub alpha: f64,
    /// Dropout probability applied to the delta path during training
    #[serde(default = "default_lora_dropout")]
    pub dropout: f32,
    /// Module names the adapter covers
    #[serde(default = "default_target_modules")]
    pub target_modules: Vec<String>,
}

impl Default for LoraHyperparams {
    fn default() -> Self {
        Self {
            rank: default_lora_rank(),
            alpha: default_lora_alpha(),
            dropout: default_lora_dropout(),
            target_modules: default_target_modules(),
        }
    }
}

/// Settings for a hosted, OpenAI-compatible chat backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the chat-completions API
    pub endpoint: String,
    /// Bearer credential
    pub api_key: String,
    /// Model identifier passed through to the backend
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

/// Settings for a locally-hosted quantized model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// GGUF weights file
    pub weights: PathBuf,
    /// tokenizer.json path
    pub tokenizer: PathBuf,
    #[serde(default)]
    pub device: DeviceKind,
    #[serde(default)]
    pub generation: GenerationDefaults,
}

/// Settings for the quantized base + trainable low-rank adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// GGUF weights file for the frozen base model
    pub base_weights: PathBuf,
    /// tokenizer.json path
    pub tokenizer: PathBuf,
    /// Existing adapter snapshot to resume from; absent means start fresh
    #[serde(default)]
    pub adapter_path: Option<PathBuf>,
    #[serde(default)]
    pub device: DeviceKind,
    /// Bound on tokenized prompt length
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
    #[serde(default)]
    pub lora: LoraHyperparams,
    #[serde(default)]
    pub generation: GenerationDefaults,
}

/// Per-slot provider configuration, dispatched by the factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum RuntimeConfig {
    Remote(RemoteConfig),
    Local(LocalConfig),
    Adapter(AdapterConfig),
}

impl RuntimeConfig {
    /// The variant tag of this config.
    pub fn kind(&self) -> ProviderKind {
        match self {
            RuntimeConfig::Remote(_) => ProviderKind::Remote,
            RuntimeConfig::Local(_) => ProviderKind::Local,
            RuntimeConfig::Adapter(_) => ProviderKind::Adapter,
        }
    }
}

/// HTTP server binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Chat slot provider selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSettings {
    pub provider: String,
}

/// Adapter slot settings as they appear in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterSettings {
    /// Whether the adapter slot (and with it the training capability) exists
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_weights: PathBuf,
    #[serde(default)]
    pub tokenizer: PathBuf,
    #[serde(default)]
    pub adapter_path: Option<PathBuf>,
    #[serde(default)]
    pub device: DeviceKind,
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
    #[serde(default)]
    pub lora: LoraHyperparams,
}

/// Fully-loaded process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub chat: ChatSettings,
    pub remote: RemoteConfig,
    pub local: LocalConfig,
    pub adapter: AdapterSettings,
    #[serde(default)]
    pub generation: GenerationDefaults,
}

impl Settings {
    /// Load settings from all sources.
    pub fn load(args: &Args) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder().add_source(config::File::from_str(
            include_str!("../config/default.toml"),
            config::FileFormat::Toml,
        ));

        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("LORASERVE").separator("__"),
        );

        let mut settings: Settings = builder.build()?.try_deserialize()?;

        if let Some(host) = &args.host {
            settings.server.host = host.clone();
        }
        if let Some(port) = args.port {
            settings.server.port = port;
        }
        if let Some(provider) = &args.provider {
            settings.chat.provider = provider.clone();
        }

        Ok(settings)
    }

    /// Provider config for the chat slot.
    pub fn chat_runtime_config(&self) -> Result<RuntimeConfig> {
        match self.chat.provider.as_str() {
            "remote" => Ok(RuntimeConfig::Remote(self.remote.clone())),
            "local" => {
                let mut local = self.local.clone();
                local.generation = self.generation.clone();
                Ok(RuntimeConfig::Local(local))
            }
            other => Err(RuntimeError::UnsupportedProvider(other.to_string())),
        }
    }

    /// Provider config for the adapter slot, when the capability is enabled.
    pub fn adapter_runtime_config(&self) -> Option<RuntimeConfig> {
        if !self.adapter.enabled {
            return None;
        }
        Some(RuntimeConfig::Adapter(AdapterConfig {
            base_weights: self.adapter.base_weights.clone(),
            tokenizer: self.adapter.tokenizer.clone(),
            adapter_path: self.adapter.adapter_path.clone(),
            device: self.adapter.device,
            max_input_tokens: self.adapter.max_input_tokens,
            lora: self.adapter.lora.clone(),
            generation: self.generation.clone(),
        }))
    }
}

fn default_max_tokens() -> usize {
    512
}

fn default_temperature() -> f64 {
    0.7
}

fn default_top_p() -> f64 {
    0.9
}

fn default_repeat_penalty() -> f32 {
    1.1
}

fn default_repeat_last_n() -> usize {
    64
}

fn default_max_input_tokens() -> usize {
    2048
}

fn default_lora_rank() -> usize {
    16
}

fn default_lora_alpha() -> f64 {
    32.0
}

fn default_lora_dropout() -> f32 {
    0.05
}

fn default_target_modules() -> Vec<String> {
    vec![
        "q_proj".to_string(),
        "k_proj".to_string(),
        "v_proj".to_string(),
        "o_proj".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_args() -> Args {
        Args {
            config: None,
            host: None,
            port: None,
            provider: None,
        }
    }

    #[test]
    fn defaults_load() {
        let settings = Settings::load(&no_args()).unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.chat.provider, "remote");
        assert_eq!(settings.generation.max_tokens, 512);
        assert!(!settings.adapter.enabled);
        assert!(settings.adapter_runtime_config().is_none());
    }

    #[test]
    fn chat_config_follows_provider_selection() {
        let mut settings = Settings::load(&no_args()).unwrap();
        assert_eq!(
            settings.chat_runtime_config().unwrap().kind(),
            ProviderKind::Remote
        );

        settings.chat.provider = "local".into();
        assert_eq!(
            settings.chat_runtime_config().unwrap().kind(),
            ProviderKind::Local
        );

        settings.chat.provider = "ollama".into();
        assert!(matches!(
            settings.chat_runtime_config(),
            Err(RuntimeError::UnsupportedProvider(_))
        ));
    }

    #[test]
    fn lora_defaults_match_paper_conventions() {
        let lora = LoraHyperparams::default();
        assert_eq!(lora.rank, 16);
        assert_eq!(lora.alpha, 32.0);
        assert!(lora.target_modules.contains(&"q_proj".to_string()));
    }
}
