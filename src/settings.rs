//! Persisted user settings.
//!
//! Settings live in a small JSON file. Every write and every [`SettingsStore::reload`]
//! publishes the new value on a watch channel, which is how the page translator
//! and the selection popup learn about changes made elsewhere.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(rename = "enableTranslation")]
    pub enable_translation: bool,
    #[serde(rename = "isSelectionTranslateEnabled")]
    pub is_selection_translate_enabled: bool,
    #[serde(rename = "isPageTranslateEnabled")]
    pub is_page_translate_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enable_translation: true,
            is_selection_translate_enabled: true,
            is_page_translate_enabled: false,
        }
    }
}

impl Settings {
    /// Whether selections should be analyzed at all.
    pub fn selection_enabled(&self) -> bool {
        self.enable_translation && self.is_selection_translate_enabled
    }
}

struct StoreInner {
    path: PathBuf,
    tx: watch::Sender<Settings>,
    write_lock: tokio::sync::Mutex<()>,
}

/// File-backed settings with change notifications.
#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<StoreInner>,
}

impl SettingsStore {
    /// Open the store at `path`. A missing file means default settings.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings = read_settings(&path).await?;
        info!("Loaded settings from {}", path.display());
        let (tx, _rx) = watch::channel(settings);
        Ok(Self {
            inner: Arc::new(StoreInner {
                path,
                tx,
                write_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn get(&self) -> Settings {
        *self.inner.tx.borrow()
    }

    /// Apply `change`, persist the result and notify subscribers.
    pub async fn update<F>(&self, change: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let _write = self.inner.write_lock.lock().await;
        let mut settings = self.get();
        change(&mut settings);

        let json = serde_json::to_string_pretty(&settings)?;
        tokio::fs::write(&self.inner.path, json)
            .await
            .with_context(|| format!("Failed to write settings to {}", self.inner.path.display()))?;

        self.publish(settings);
        Ok(settings)
    }

    /// Re-read the file, picking up changes written by another process.
    pub async fn reload(&self) -> Result<Settings> {
        let _write = self.inner.write_lock.lock().await;
        let settings = read_settings(&self.inner.path).await?;
        self.publish(settings);
        Ok(settings)
    }

    /// Receiver that observes every published change.
    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.inner.tx.subscribe()
    }

    fn publish(&self, settings: Settings) {
        let changed = self.inner.tx.send_if_modified(|current| {
            if *current == settings {
                false
            } else {
                *current = settings;
                true
            }
        });
        if changed {
            debug!("Settings changed: {:?}", settings);
        }
    }
}

async fn read_settings(path: &Path) -> Result<Settings> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) if content.trim().is_empty() => Ok(Settings::default()),
        Ok(content) => serde_json::from_str(&content)
            .with_context(|| format!("Invalid settings file {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
        Err(e) => Err(e).with_context(|| format!("Failed to read settings from {}", path.display())),
    }
}
