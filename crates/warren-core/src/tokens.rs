//! Token estimation and budget-aware truncation.
//!
//! Prompts are budgeted with a character heuristic rather than a model
//! tokenizer: one token is taken to be four characters. The heuristic
//! over-counts for plain English prose, which keeps packed prompts on the
//! safe side of provider context limits.

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Marker appended to text that was cut to fit a budget.
pub const TRUNCATION_MARKER: &str = " …";

/// Estimate the token count of `text` as `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    chars.div_ceil(CHARS_PER_TOKEN)
}

/// Cut `text` so that its estimate, including [`TRUNCATION_MARKER`], is at
/// most `max_tokens`.
///
/// Text that already fits is returned unchanged. The cut prefers the last
/// whitespace inside the final fifth of the window so words stay whole.
/// Returns an empty string when not even the marker fits.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    if estimate_tokens(text) <= max_tokens {
        return text.to_string();
    }

    let marker_chars = TRUNCATION_MARKER.chars().count();
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    if max_chars <= marker_chars {
        return String::new();
    }
    let keep_chars = max_chars - marker_chars;

    let cut = text
        .char_indices()
        .nth(keep_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let window = &text[..cut];

    let floor = window.len() - window.len() / 5;
    let cut = match window.rfind(char::is_whitespace) {
        Some(pos) if pos >= floor && pos > 0 => pos,
        _ => cut,
    };

    let mut out = text[..cut].trim_end().to_string();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Lowercased, deduplicated alphanumeric terms of two or more characters.
pub fn query_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .collect();
    terms.sort();
    terms.dedup();
    terms
}
