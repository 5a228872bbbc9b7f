//! Runtime configuration for llm-gateway.
//!
//! Configuration is loaded from a JSON file or constructed programmatically.
//! Every section and field falls back to its default when omitted.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::relay::Framing;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "llm-gateway", about = "HTTP gateway for an Ollama-compatible LLM backend")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Backend connection and models.
    pub backend: BackendConfig,

    /// Prompt texts.
    pub prompts: PromptConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,

    /// Path prefix for the gateway routes.
    pub api_prefix: String,

    /// Events buffered between the relay and a slow client.
    pub channel_capacity: usize,

    /// One event per line or one event per backend chunk.
    pub framing: Framing,

    /// Interval for SSE keep-alive comments (0 = disabled).
    pub sse_keep_alive_secs: u64,
}

impl ServerConfig {
    pub fn sse_keep_alive(&self) -> Option<Duration> {
        non_zero_secs(self.sse_keep_alive_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            api_prefix: "/api/v1".to_string(),
            channel_capacity: 32,
            framing: Framing::PerLine,
            sse_keep_alive_secs: 15,
        }
    }
}

/// Backend (Ollama) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the Ollama server.
    pub server_url: String,

    /// Model used by the translate endpoint.
    pub translate_model: String,

    /// Model used by the generate endpoint.
    pub generate_model: String,

    /// Model used by the streaming endpoint.
    pub stream_model: String,

    /// TCP connect timeout in seconds (0 = no limit).
    pub connect_timeout_secs: u64,

    /// Whole-request timeout for blocking calls in seconds (0 = no limit).
    pub request_timeout_secs: u64,

    /// Maximum wait for the response headers of a stream and between
    /// streamed records, in seconds (0 = no limit).
    pub stream_idle_timeout_secs: u64,
}

impl BackendConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.request_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.stream_idle_timeout_secs)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:11434".to_string(),
            translate_model: "qwen:72b".to_string(),
            generate_model: "llama3:70b".to_string(),
            stream_model: "qwen:72b".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 300,
            stream_idle_timeout_secs: 120,
        }
    }
}

/// Prompt texts. Templates use `{{name}}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// System instruction for translation.
    pub translate_system: String,

    /// Human template for translation; sees `outputLang` and `text`.
    pub translate_human: String,

    /// Optional system instruction prepended to streamed prompts.
    pub stream_system: Option<String>,

    /// Prompt streamed when the request does not supply one.
    pub stream_default_prompt: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            translate_system:
                "You are a translation engine that only translates text. Do not explain."
                    .to_string(),
            translate_human: "Translate this text to {{outputLang}}: {{text}}".to_string(),
            stream_system: None,
            stream_default_prompt: "Why don't jellyfish swim at night?".to_string(),
        }
    }
}

/// Zero means the limit is switched off.
fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.server.api_prefix, "/api/v1");
        assert_eq!(cfg.server.framing, Framing::PerLine);
        assert_eq!(cfg.backend.generate_model, "llama3:70b");
        assert!(cfg.prompts.translate_human.contains("{{outputLang}}"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"backend": {{"server_url": "http://10.0.0.5:11434"}}, "server": {{"framing": "per_chunk"}}}}"#
        )
        .unwrap();

        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.backend.server_url, "http://10.0.0.5:11434");
        assert_eq!(cfg.backend.stream_model, "qwen:72b");
        assert_eq!(cfg.server.framing, Framing::PerChunk);
        assert_eq!(cfg.server.listen, "0.0.0.0:8080");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(cfg.server.channel_capacity, 32);
    }

    #[test]
    fn test_zero_timeouts_are_disabled() {
        let backend = BackendConfig {
            connect_timeout_secs: 0,
            request_timeout_secs: 0,
            stream_idle_timeout_secs: 0,
            ..BackendConfig::default()
        };
        assert_eq!(backend.connect_timeout(), None);
        assert_eq!(backend.request_timeout(), None);
        assert_eq!(backend.stream_idle_timeout(), None);

        let defaults = BackendConfig::default();
        assert_eq!(defaults.stream_idle_timeout(), Some(Duration::from_secs(120)));

        let server = ServerConfig {
            sse_keep_alive_secs: 0,
            ..ServerConfig::default()
        };
        assert_eq!(server.sse_keep_alive(), None);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(Config::load(file.path()).is_err());
    }
}
