//! Wordie command line.
//!
//! Usage:
//!   wordie page <file.html>          # Translate a saved page, print the annotated HTML
//!   wordie analyze <text> [context]  # Analyze a word or sentence, print the record as JSON
//!
//! Configuration comes from the environment (see `Config::from_env`); a `.env`
//! file is loaded when present.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::info;
use wordie::ai::{ChatClient, LlmBatchTranslator, LlmChunkSource, SelectionAnalyzer};
use wordie::config::Config;
use wordie::dom::{lock_document, Document};
use wordie::scheduler::PageTranslator;
use wordie::viewport::{Rect, StackedLayout};

const PAGE_WIDTH: f64 = 1024.0;
const ROW_HEIGHT: f64 = 24.0;
const VIEWPORT_HEIGHT: f64 = 768.0;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored when absent)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wordie=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = Config::from_env()?;

    match args.first().map(String::as_str) {
        Some("page") => {
            let path = args.get(1).context("Usage: wordie page <file.html>")?;
            translate_page(&config, path).await
        }
        Some("analyze") => {
            let text = args.get(1).context("Usage: wordie analyze <text> [context]")?;
            let context = args.get(2).map(String::as_str).unwrap_or("");
            analyze(&config, text, context).await
        }
        Some(other) => bail!("Unknown command '{}'. Expected 'page' or 'analyze'", other),
        None => bail!("Usage: wordie <page|analyze> ..."),
    }
}

/// Enable page translation on a saved page and scroll through it top to bottom.
async fn translate_page(config: &Config, path: &str) -> Result<()> {
    let html = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path))?;
    let document = Document::parse(&html).into_shared();

    let client = ChatClient::from_config(config)?;
    let translator = Arc::new(LlmBatchTranslator::new(client, config.target_language.clone()));
    let page = PageTranslator::new(Arc::clone(&document), translator, config.page_translate_options());

    page.set_enabled(true);
    info!("Observing {} elements in {}", page.observed_len(), path);

    let layout = StackedLayout::from_document(&lock_document(&document), PAGE_WIDTH, ROW_HEIGHT);
    let mut top = 0.0;
    loop {
        let viewport = Rect::new(0.0, top, layout.width(), VIEWPORT_HEIGHT);
        let queued = page.on_viewport(viewport, &layout);
        if queued > 0 {
            info!("Scrolled to {}px, queued {} segments", top, queued);
        }
        page.settle().await;
        top += VIEWPORT_HEIGHT;
        if top > layout.height() {
            break;
        }
    }

    let document = lock_document(&document);
    info!("✓ Inserted {} translations", document.count_annotations());
    println!("{}", document.to_html());
    Ok(())
}

/// Stream an analysis, logging progress, and print the final record.
async fn analyze(config: &Config, text: &str, context: &str) -> Result<()> {
    let source = LlmChunkSource::from_config(config)?;
    if source.is_proxied() {
        source.preheat().await;
    }
    let analyzer = SelectionAnalyzer::new(Arc::new(source));

    let mut updates = 0usize;
    let record = analyzer
        .analyze_stream(text, context, |_| updates += 1)
        .await?;
    info!("✓ Analysis complete after {} updates", updates);

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
