//! Wordie: AI-assisted reading aid.
//!
//! Two features share this crate. Page translation discovers prose as it nears
//! the viewport and annotates it with batched translations
//! ([`scheduler::PageTranslator`]). Selection analysis streams a structured
//! explanation of a selected word or sentence ([`ai::SelectionAnalyzer`]).

pub mod ai;
pub mod config;
pub mod content;
pub mod discovery;
pub mod dom;
pub mod error;
pub mod parser;
pub mod retry;
pub mod scheduler;
pub mod selection;
pub mod settings;
pub mod text;
pub mod viewport;
