use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::ai::ApiProvider;
use crate::scheduler::{PageTranslateOptions, DEFAULT_BATCH_SIZE, DEFAULT_DEBOUNCE, DEFAULT_ROOT_MARGIN};

#[derive(Debug, Clone)]
pub struct Config {
    // Provider
    pub api_provider: ApiProvider,
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    pub proxy_url: Option<String>,
    pub request_timeout: Duration,

    // Translation
    pub target_language: String,

    // Page translation
    pub batch_size: usize,
    pub debounce: Duration,
    pub root_margin: f64,

    // Settings
    pub settings_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let provider = ApiProvider::OpenAi;
        Self {
            api_provider: provider,
            api_key: None,
            api_url: provider.default_url().to_string(),
            model: provider.default_model().to_string(),
            proxy_url: None,
            request_timeout: Duration::from_secs(15),
            target_language: "Chinese".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            debounce: DEFAULT_DEBOUNCE,
            root_margin: DEFAULT_ROOT_MARGIN,
            settings_path: PathBuf::from("wordie-settings.json"),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        // Provider
        let api_provider = match non_empty_var("WORDIE_API_PROVIDER") {
            Some(name) => ApiProvider::from_name(&name).context("Invalid WORDIE_API_PROVIDER")?,
            None => defaults.api_provider,
        };

        Ok(Self {
            api_provider,
            api_key: non_empty_var(api_provider.api_key_var()),
            api_url: non_empty_var("WORDIE_API_URL")
                .unwrap_or_else(|| api_provider.default_url().to_string()),
            model: non_empty_var("WORDIE_MODEL")
                .unwrap_or_else(|| api_provider.default_model().to_string()),
            proxy_url: non_empty_var("WORDIE_PROXY_URL"),
            request_timeout: std::env::var("WORDIE_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),

            // Translation
            target_language: non_empty_var("WORDIE_TARGET_LANGUAGE")
                .unwrap_or(defaults.target_language),

            // Page translation
            batch_size: std::env::var("WORDIE_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(defaults.batch_size)
                .max(1),
            debounce: std::env::var("WORDIE_DEBOUNCE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.debounce),
            root_margin: std::env::var("WORDIE_ROOT_MARGIN_PX")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|m| m.is_finite() && *m >= 0.0)
                .unwrap_or(defaults.root_margin),

            // Settings
            settings_path: non_empty_var("WORDIE_SETTINGS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.settings_path),
        })
    }

    pub fn page_translate_options(&self) -> PageTranslateOptions {
        PageTranslateOptions {
            batch_size: self.batch_size,
            debounce: self.debounce,
            root_margin: self.root_margin,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
