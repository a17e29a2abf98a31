use regex::Regex;
use std::sync::OnceLock;

/// Minimum length (exclusive, in characters) of a translatable text segment
pub const MIN_TEXT_LEN: usize = 5;

// Regex patterns (cached for performance)
static LATIN_LETTER_REGEX: OnceLock<Regex> = OnceLock::new();
static NUMERIC_PUNCT_REGEX: OnceLock<Regex> = OnceLock::new();
static SENTENCE_START_REGEX: OnceLock<Regex> = OnceLock::new();
static SENTENCE_END_REGEX: OnceLock<Regex> = OnceLock::new();

fn latin_letter_regex() -> &'static Regex {
    LATIN_LETTER_REGEX.get_or_init(|| Regex::new(r"[a-zA-Z]").expect("valid regex"))
}

fn numeric_punct_regex() -> &'static Regex {
    NUMERIC_PUNCT_REGEX.get_or_init(|| Regex::new(r"^[\d\s\p{P}]+$").expect("valid regex"))
}

/// Whether a trimmed text segment is worth sending for page translation.
///
/// Rules: longer than five characters, contains a Latin letter, and is not
/// made only of digits, whitespace and punctuation.
pub fn is_translatable(text: &str) -> bool {
    text.chars().count() > MIN_TEXT_LEN
        && latin_letter_regex().is_match(text)
        && !numeric_punct_regex().is_match(text)
}

/// Whether a user selection is a word/phrase or a full sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Word,
    Sentence,
}

/// Classify a selection.
///
/// A single token is a word. Capitalized text ending in `.`, `!` or `?` is a
/// sentence, as is anything with more than three words and over 20 characters.
pub fn detect_input_kind(text: &str) -> InputKind {
    let trimmed = text.trim();
    let words = trimmed.split_whitespace().count();

    if words <= 1 {
        return InputKind::Word;
    }

    let starts_upper = SENTENCE_START_REGEX
        .get_or_init(|| Regex::new(r"^[A-Z]").expect("valid regex"))
        .is_match(trimmed);
    let ends_terminal = SENTENCE_END_REGEX
        .get_or_init(|| Regex::new(r"[.!?]$").expect("valid regex"))
        .is_match(trimmed);
    if starts_upper && ends_terminal {
        return InputKind::Sentence;
    }

    if words > 3 && trimmed.chars().count() > 20 {
        return InputKind::Sentence;
    }

    InputKind::Word
}
