/// Maximum number of characters of surrounding context sent with a selection.
pub const CONTEXT_LIMIT: usize = 200;

/// Prompt asking for one translation per segment, as a JSON array of strings.
pub fn build_batch_prompt(texts: &[String], target_language: &str) -> String {
    let segments = serde_json::to_string(texts).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"You are a professional translator helper.
Translate the following English text segments into {lang}.
Requirements:
1. Maintain the original meaning but be concise.
2. The output will be displayed as a suffix to the original text, so keep it short and natural.
3. Do NOT translate code, technical terms (like variable names), or numbers unless necessary.
4. If a segment is not suitable for translation (e.g., pure code, navigation item), return an empty string for that segment.
5. Return ONLY a JSON array of strings, strictly matching the order of input.

Input Segments:
{segments}

Output JSON:"#,
        lang = target_language,
        segments = segments,
    )
}

/// First [`CONTEXT_LIMIT`] characters of `context`.
pub fn truncate_context(context: &str) -> &str {
    match context.char_indices().nth(CONTEXT_LIMIT) {
        Some((idx, _)) => &context[..idx],
        None => context,
    }
}

/// Prompt asking for a structured analysis of a selected word or sentence.
pub fn build_analysis_prompt(text: &str, context: &str, target_language: &str) -> String {
    let context = truncate_context(context.trim());
    let context_line = if context.is_empty() {
        String::new()
    } else {
        format!("Context: {}\n\n", context)
    };

    format!(
        r#"You are an expert in English semantics and cognitive linguistics. Analyze the user's text (a word, phrase or sentence) and reply with JSON following these rules.

First decide whether the input is a word/phrase or a complete sentence.
In both cases, interpret the selected text in its surrounding context.

For a word or phrase:
- correctedText: if "{text}" is an incomplete or misspelled word (e.g. "messag" for "message"), give the complete correct word; otherwise repeat the input unchanged
- phonetic: the standard IPA transcription (e.g. /ˈæpəl/)
- contextMeaning: the meaning in this context, formatted as "[in context] part-of-speech. meaning"
- translation: the main {lang} meanings grouped by part of speech (e.g. n. ...; adj. ...)
- coreLogic: the most fundamental English definition from the Oxford dictionary, then a blank line, then its {lang} translation (no part of speech)

For a complete sentence:
- correctedText: the grammatically corrected sentence, or the input unchanged if it is already correct
- phonetic: null
- contextMeaning: null
- translation: a direct {lang} translation of the whole sentence
- coreLogic: null

Text: "{text}"

{context_line}Reply with valid JSON only, shaped like:
{{
  "correctedText": "...",
  "phonetic": "/.../",
  "contextMeaning": "[in context] n. ...",
  "translation": "...",
  "coreLogic": "definition\n\ntranslation"
}}"#,
        text = text,
        lang = target_language,
        context_line = context_line,
    )
}
