//! Incremental parsing of analysis responses.
//!
//! [`parse_partial`] is a pure function over the text received so far: callers
//! feed it the whole accumulated buffer after every chunk and render whatever
//! record comes back. It never fails; the worst case is a record holding only
//! the original selection as `corrected_text`.

use crate::text::InputKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Shown by the UI when a record has no translation yet.
pub const TRANSLATION_UNAVAILABLE: &str = "Translation unavailable";

/// Structured analysis of one selected span of text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub corrected_text: String,
    pub phonetic: Option<String>,
    pub context_meaning: Option<String>,
    pub translation: Option<String>,
    pub core_logic: Option<String>,
}

impl AnalysisRecord {
    /// Record with nothing but the original selection.
    pub fn fallback(original: &str) -> Self {
        Self {
            corrected_text: original.to_string(),
            phonetic: None,
            context_meaning: None,
            translation: None,
            core_logic: None,
        }
    }

    /// Drop the word-only fields for sentence selections.
    pub fn for_kind(mut self, kind: InputKind) -> Self {
        if kind == InputKind::Sentence {
            self.phonetic = None;
            self.context_meaning = None;
            self.core_logic = None;
        }
        self
    }

    pub fn translation_or_placeholder(&self) -> &str {
        self.translation.as_deref().unwrap_or(TRANSLATION_UNAVAILABLE)
    }
}

/// Best record currently knowable from `buffer`.
///
/// The span between the first `{` and the last `}` is tried as complete JSON
/// first. Otherwise each field is pulled out of the raw text, including a value
/// whose closing quote has not arrived yet.
pub fn parse_partial(buffer: &str, original: &str) -> AnalysisRecord {
    if let Some(record) = parse_complete(buffer, original) {
        return record;
    }

    AnalysisRecord {
        corrected_text: extract_field(buffer, "correctedText")
            .unwrap_or_else(|| original.to_string()),
        phonetic: extract_field(buffer, "phonetic"),
        context_meaning: extract_field(buffer, "contextMeaning"),
        translation: extract_field(buffer, "translation"),
        core_logic: extract_field(buffer, "coreLogic")
            .or_else(|| extract_field(buffer, "core_logic"))
            .filter(|s| s != "null"),
    }
}

fn parse_complete(buffer: &str, original: &str) -> Option<AnalysisRecord> {
    let start = buffer.find('{')?;
    let end = buffer.rfind('}')?;
    if end <= start {
        return None;
    }

    let value: Value = serde_json::from_str(&buffer[start..=end]).ok()?;
    let object = value.as_object()?;

    let core_logic = object
        .get("coreLogic")
        .filter(|v| !v.is_null())
        .or_else(|| object.get("core_logic").filter(|v| !v.is_null()))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty() && *s != "null")
        .map(str::to_string);

    Some(AnalysisRecord {
        corrected_text: string_field(object, "correctedText")
            .unwrap_or_else(|| original.to_string()),
        phonetic: string_field(object, "phonetic"),
        context_meaning: string_field(object, "contextMeaning"),
        translation: string_field(object, "translation"),
        core_logic,
    })
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Value of `"key": "...` in raw text, complete or still streaming.
///
/// Empty values count as absent.
fn extract_field(buffer: &str, key: &str) -> Option<String> {
    let needle = format!("\"{}\"", key);
    let mut from = 0;
    while let Some(found) = buffer[from..].find(&needle) {
        let after_key = from + found + needle.len();
        let rest = buffer[after_key..].trim_start();
        if let Some(rest) = rest.strip_prefix(':') {
            if let Some(value) = rest.trim_start().strip_prefix('"') {
                let decoded = scan_string(value);
                return if decoded.is_empty() { None } else { Some(decoded) };
            }
        }
        from = after_key;
    }
    None
}

/// Decode a JSON string body up to its closing quote or the end of input.
///
/// An escape sequence cut off by the end of input is dropped, so a partial
/// value is always a prefix of the final one.
fn scan_string(input: &str) -> String {
    let mut out = String::new();
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => break,
            '\\' => {
                let Some(escaped) = chars.next() else {
                    break;
                };
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'b' => out.push('\u{8}'),
                    'f' => out.push('\u{c}'),
                    'u' => match decode_unicode_escape(&mut chars) {
                        Some(decoded) => out.push(decoded),
                        None => break,
                    },
                    other => out.push(other),
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Decode the hex part of a `\u` escape, joining surrogate pairs.
///
/// Returns `None` when the input ends before the escape is complete.
fn decode_unicode_escape(chars: &mut std::str::Chars<'_>) -> Option<char> {
    let high = read_hex4(chars)?;
    if !(0xD800..0xDC00).contains(&high) {
        return Some(char::from_u32(high).unwrap_or(char::REPLACEMENT_CHARACTER));
    }

    // High surrogate: the low half must follow as another \u escape.
    let mut lookahead = chars.clone();
    if lookahead.next()? != '\\' || lookahead.next()? != 'u' {
        return Some(char::REPLACEMENT_CHARACTER);
    }
    let low = read_hex4(&mut lookahead)?;
    *chars = lookahead;
    if (0xDC00..0xE000).contains(&low) {
        let combined = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
        Some(char::from_u32(combined).unwrap_or(char::REPLACEMENT_CHARACTER))
    } else {
        Some(char::REPLACEMENT_CHARACTER)
    }
}

fn read_hex4(chars: &mut std::str::Chars<'_>) -> Option<u32> {
    let mut value = 0;
    for _ in 0..4 {
        let digit = chars.next()?.to_digit(16)?;
        value = value * 16 + digit;
    }
    Some(value)
}
