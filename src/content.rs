//! Per-page entry point tying settings, page translation and the selection popup together.

use anyhow::Result;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::ai::{ChatClient, LlmBatchTranslator, LlmChunkSource, SelectionAnalyzer};
use crate::config::Config;
use crate::dom::SharedDocument;
use crate::parser::AnalysisRecord;
use crate::scheduler::PageTranslator;
use crate::selection::{SelectionInfo, SelectionState};
use crate::settings::{Settings, SettingsStore};

pub struct ContentScript {
    settings: SettingsStore,
    page: PageTranslator,
    analyzer: SelectionAnalyzer,
    selection: SelectionState,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ContentScript {
    pub fn new(settings: SettingsStore, page: PageTranslator, analyzer: SelectionAnalyzer) -> Self {
        Self {
            settings,
            page,
            analyzer,
            selection: SelectionState::new(),
            watcher: Mutex::new(None),
        }
    }

    /// Wire up the LLM-backed collaborators described by `config` for `document`.
    pub async fn from_config(config: &Config, document: SharedDocument) -> Result<Self> {
        let settings = SettingsStore::load(&config.settings_path).await?;

        let client = ChatClient::from_config(config)?;
        let translator = Arc::new(LlmBatchTranslator::new(client, config.target_language.clone()));
        let page = PageTranslator::new(document, translator, config.page_translate_options());

        let source = LlmChunkSource::from_config(config)?;
        if source.is_proxied() {
            source.preheat().await;
        }
        let analyzer = SelectionAnalyzer::new(Arc::new(source));

        Ok(Self::new(settings, page, analyzer))
    }

    pub fn page(&self) -> &PageTranslator {
        &self.page
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    /// Restore the persisted page translation state and follow later changes.
    pub fn start(&self) {
        let current = self.settings.get();
        if current.is_page_translate_enabled {
            info!("📖 Restoring page translation state: on");
        }
        apply_settings(&self.page, &self.selection, &current);

        let mut rx = self.settings.subscribe();
        let page = self.page.clone();
        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let settings = *rx.borrow_and_update();
                debug!("Applying settings change: {:?}", settings);
                apply_settings_to_page(&page, &settings);
            }
        });

        let mut watcher = self.watcher.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = watcher.replace(handle) {
            previous.abort();
        }
    }

    /// Stop following settings changes.
    pub fn stop(&self) {
        let mut watcher = self.watcher.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(handle) = watcher.take() {
            handle.abort();
        }
    }

    /// Flip page translation and persist the new state. Returns the new state.
    pub async fn toggle_page_translation(&self) -> Result<bool> {
        let enabled = self.page.toggle();
        self.settings
            .update(|s| s.is_page_translate_enabled = enabled)
            .await?;
        Ok(enabled)
    }

    pub async fn set_selection_translate(&self, enabled: bool) -> Result<()> {
        let settings = self
            .settings
            .update(|s| s.is_selection_translate_enabled = enabled)
            .await?;
        if !settings.selection_enabled() {
            self.selection.clear();
        }
        Ok(())
    }

    /// Record a new selection. Ignored (returns false) while selection translation is off.
    pub fn select(&self, selection: SelectionInfo) -> bool {
        if !self.settings.get().selection_enabled() {
            return false;
        }
        self.selection.set_selection(Some(selection));
        true
    }

    /// Open the popup for the current selection and stream its analysis.
    ///
    /// Returns `None` when there is no selection or the feature is off.
    pub async fn analyze_selection<F>(&self, on_update: F) -> Result<Option<AnalysisRecord>>
    where
        F: FnMut(&AnalysisRecord) + Send,
    {
        if !self.settings.get().selection_enabled() {
            return Ok(None);
        }
        let Some(selection) = self.selection.selection() else {
            return Ok(None);
        };

        self.selection.show_popup();
        let record = self
            .analyzer
            .analyze_stream(&selection.text, &selection.context, on_update)
            .await?;
        Ok(Some(record))
    }
}

impl Drop for ContentScript {
    fn drop(&mut self) {
        self.stop();
    }
}

fn apply_settings(page: &PageTranslator, selection: &SelectionState, settings: &Settings) {
    apply_settings_to_page(page, settings);
    if !settings.selection_enabled() {
        selection.clear();
    }
}

fn apply_settings_to_page(page: &PageTranslator, settings: &Settings) {
    page.set_enabled(settings.is_page_translate_enabled);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{BatchTranslator, ChunkSource, ChunkStream};
    use crate::dom::{lock_document, Document};
    use crate::error::AiError;
    use crate::scheduler::PageTranslateOptions;
    use crate::viewport::Rect;
    use async_trait::async_trait;
    use futures::StreamExt;
    use tempfile::TempDir;

    struct EchoTranslator;

    #[async_trait]
    impl BatchTranslator for EchoTranslator {
        async fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>, AiError> {
            Ok(texts.iter().map(|t| format!("译:{}", t)).collect())
        }
    }

    struct FixedSource;

    #[async_trait]
    impl ChunkSource for FixedSource {
        async fn open_stream(&self, _text: &str, _context: &str) -> Result<ChunkStream, AiError> {
            let chunks = vec![
                Ok(r#"{"correctedText": "apple", "#.to_string()),
                Ok(r#""translation": "n. 苹果"}"#.to_string()),
            ];
            Ok(futures::stream::iter(chunks).boxed())
        }
    }

    async fn script(dir: &TempDir) -> ContentScript {
        let settings = SettingsStore::load(dir.path().join("settings.json")).await.unwrap();
        let document = Document::parse("<body><p>Some page content here</p></body>").into_shared();
        let page = PageTranslator::new(document, Arc::new(EchoTranslator), PageTranslateOptions::default());
        let analyzer = SelectionAnalyzer::new(Arc::new(FixedSource));
        ContentScript::new(settings, page, analyzer)
    }

    fn apple_selection() -> SelectionInfo {
        SelectionInfo {
            text: "apple".to_string(),
            position: Rect::new(10.0, 10.0, 40.0, 16.0),
            context: "I ate an apple".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_persists_state() {
        let dir = TempDir::new().unwrap();
        let content = script(&dir).await;
        content.start();
        assert!(!content.page().is_enabled());

        assert!(content.toggle_page_translation().await.unwrap());
        assert!(content.settings().get().is_page_translate_enabled);

        let reopened = SettingsStore::load(content.settings().path()).await.unwrap();
        assert!(reopened.get().is_page_translate_enabled);

        assert!(!content.toggle_page_translation().await.unwrap());
        assert!(!content.page().is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_restores_persisted_page_translation() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("settings.json"), r#"{"isPageTranslateEnabled": true}"#).unwrap();
        let content = script(&dir).await;

        content.start();
        assert!(content.page().is_enabled());
        assert_eq!(content.page().observed_len(), 1);

        let p = lock_document(&content.page().document()).find_element("p").unwrap();
        content.page().reveal(p);
        content.page().settle().await;
        assert_eq!(
            lock_document(&content.page().document()).annotations(),
            vec!["译:Some page content here"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_settings_change_disables_page() {
        let dir = TempDir::new().unwrap();
        let content = script(&dir).await;
        content.start();
        content.toggle_page_translation().await.unwrap();
        assert!(content.page().is_enabled());

        std::fs::write(content.settings().path(), r#"{"isPageTranslateEnabled": false}"#).unwrap();
        content.settings().reload().await.unwrap();

        // Let the watcher task run
        for _ in 0..10 {
            if !content.page().is_enabled() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!content.page().is_enabled());
    }

    #[tokio::test]
    async fn test_analyze_selection_streams_record() {
        let dir = TempDir::new().unwrap();
        let content = script(&dir).await;
        assert!(content.select(apple_selection()));

        let mut updates = 0;
        let record = content
            .analyze_selection(|_| updates += 1)
            .await
            .unwrap()
            .expect("record");
        assert_eq!(updates, 2);
        assert_eq!(record.translation.as_deref(), Some("n. 苹果"));
        assert!(content.selection().snapshot().popup_visible);
    }

    #[tokio::test]
    async fn test_selection_disabled_is_ignored() {
        let dir = TempDir::new().unwrap();
        let content = script(&dir).await;
        assert!(content.select(apple_selection()));

        content.set_selection_translate(false).await.unwrap();
        assert!(content.selection().selection().is_none());
        assert!(!content.select(apple_selection()));
        assert!(content.analyze_selection(|_| {}).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_analyze_without_selection_is_none() {
        let dir = TempDir::new().unwrap();
        let content = script(&dir).await;
        assert!(content.analyze_selection(|_| {}).await.unwrap().is_none());
    }
}
