use std::fs;
use std::path::Path;
use serde::{Deserialize, Serialize};
use anyhow::{Result, Context};
use log::warn;

/// Main configuration structure for gift_suggester
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// AI provider configurations
    #[serde(default)]
    pub ai_providers: AIProvidersConfig,

    /// Outbound request behaviour
    #[serde(default)]
    pub request: RequestConfig,

    /// UI display configuration
    #[serde(default)]
    pub ui: UIConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIProvidersConfig {
    /// Gemini configuration
    pub gemini: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Whether this provider is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Model to use
    #[serde(default = "default_model")]
    pub model: String,

    /// Temperature setting
    pub temperature: Option<f32>,

    /// Upper bound on generated tokens
    pub max_output_tokens: Option<u32>,

    /// Override for the API root, mostly useful for proxies
    pub base_url: Option<String>,

    /// API key; `GEMINI_API_KEY` is used when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Seconds to wait for the model before giving up
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra attempts after a connectivity failure or timeout
    #[serde(default)]
    pub max_retries: u32,

    /// Pause between attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Largest image accepted for upload
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UIConfig {
    /// Enable colorful output
    #[serde(default = "default_colorful")]
    pub colorful: bool,

    /// Show a spinner while waiting on the model
    #[serde(default = "default_progress_bars")]
    pub progress_bars: bool,

    /// Output format ("terminal", "json", "plain")
    #[serde(default = "default_output_format")]
    pub output_format: String,
}

// Default value functions
fn default_enabled() -> bool { true }
fn default_model() -> String { "gemini-2.5-flash".to_string() }
fn default_timeout_secs() -> u64 { 60 }
fn default_retry_delay_ms() -> u64 { 1_000 }
fn default_max_image_bytes() -> usize { 20 * 1024 * 1024 }
fn default_colorful() -> bool { true }
fn default_progress_bars() -> bool { true }
fn default_output_format() -> String { "terminal".to_string() }

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            enabled: default_enabled(),
            model: default_model(),
            temperature: Some(0.7),
            max_output_tokens: Some(8192),
            base_url: None,
            api_key: None,
        }
    }
}

impl Default for AIProvidersConfig {
    fn default() -> Self {
        AIProvidersConfig {
            gemini: Some(ProviderConfig::default()),
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        RequestConfig {
            timeout_secs: default_timeout_secs(),
            max_retries: 0,
            retry_delay_ms: default_retry_delay_ms(),
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

impl Default for UIConfig {
    fn default() -> Self {
        UIConfig {
            colorful: default_colorful(),
            progress_bars: default_progress_bars(),
            output_format: default_output_format(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ai_providers: AIProvidersConfig::default(),
            request: RequestConfig::default(),
            ui: UIConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))
    }

    /// Load configuration from command line argument or default locations
    pub fn load(config_path: &Option<String>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::from_file(path);
        }

        // Try loading from default locations
        let default_paths = vec![
            "gift_suggester.toml",
            ".gift_suggester.toml",
            "~/.config/gift_suggester/config.toml",
        ];

        for path in default_paths {
            let expanded_path = shellexpand::tilde(path);
            if Path::new(expanded_path.as_ref()).exists() {
                match Self::from_file(expanded_path.as_ref()) {
                    Ok(config) => return Ok(config),
                    Err(e) => warn!("Failed to load config from {}: {}", path, e),
                }
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        fs::write(path.as_ref(), contents)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Gemini settings, falling back to defaults when the section is absent
    pub fn gemini(&self) -> ProviderConfig {
        self.ai_providers.gemini.clone().unwrap_or_default()
    }

    /// Merge with command-line arguments (CLI args take precedence)
    pub fn merge_with_args(&mut self, headless: bool, model: Option<&str>, format: Option<&str>) {
        if headless {
            self.ui.colorful = false;
            self.ui.progress_bars = false;
        }
        if let Some(model) = model {
            let mut gemini = self.gemini();
            gemini.model = model.to_string();
            self.ai_providers.gemini = Some(gemini);
        }
        if let Some(format) = format {
            self.ui.output_format = format.to_string();
        }
    }
}
