//! Screening of generated drafts for prohibited marketing claims.
//!
//! A flagged draft is still returned to the advisor, marked for review by
//! the Chief Compliance Officer. Screening is a keyword pass and does not
//! replace that review.

use serde::Serialize;

/// Built-in prohibited phrases and why each is flagged.
pub const PROHIBITED_TERMS: &[(&str, &str)] = &[
    ("guaranteed return", "promises a guaranteed return"),
    ("guaranteed income", "promises guaranteed income"),
    ("guaranteed growth", "promises guaranteed growth"),
    ("risk-free", "describes an investment as free of risk"),
    ("risk free", "describes an investment as free of risk"),
    ("no risk", "describes an investment as free of risk"),
    ("zero risk", "describes an investment as free of risk"),
    ("can't lose", "implies losses are impossible"),
    ("cannot lose", "implies losses are impossible"),
    ("never lose", "implies losses are impossible"),
    ("outperform the market", "promises performance relative to the market"),
    ("beat the market", "promises performance relative to the market"),
    ("best performing", "makes an unsubstantiated superlative performance claim"),
    ("safe investment", "implies an investment is without risk"),
];

const CUSTOM_REASON: &str = "matches a firm-prohibited term";

/// One prohibited phrase found in a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComplianceFlag {
    /// The configured term that matched.
    pub term: String,
    /// Byte offset of the match in the screened text.
    pub offset: usize,
    pub reason: String,
}

/// Scan `text` for built-in and `extra_terms` phrases, case-insensitively.
///
/// Flags are ordered by offset. Overlapping matches of different terms are
/// all reported.
pub fn screen(text: &str, extra_terms: &[String]) -> Vec<ComplianceFlag> {
    let (haystack, map) = fold_with_offsets(text);

    let builtin = PROHIBITED_TERMS
        .iter()
        .map(|(t, r)| (t.to_string(), r.to_string()));
    let extra = extra_terms
        .iter()
        .filter(|t| !t.trim().is_empty())
        .map(|t| (t.trim().to_string(), CUSTOM_REASON.to_string()));

    let mut flags = Vec::new();
    for (term, reason) in builtin.chain(extra) {
        let (needle, _) = fold_with_offsets(&normalize_apostrophes(&term));
        for (pos, _) in haystack.match_indices(needle.as_str()) {
            flags.push(ComplianceFlag {
                term: term.clone(),
                offset: map[pos],
                reason: reason.clone(),
            });
        }
    }
    flags.sort_by(|a, b| a.offset.cmp(&b.offset).then(a.term.cmp(&b.term)));
    flags.dedup_by(|a, b| a.offset == b.offset && a.term.eq_ignore_ascii_case(&b.term));
    flags
}

fn normalize_apostrophes(s: &str) -> String {
    s.replace('\u{2019}', "'")
}

/// Lowercase `text` and map every byte of the result back to the byte
/// offset of the source char it came from.
fn fold_with_offsets(text: &str) -> (String, Vec<usize>) {
    let mut folded = String::with_capacity(text.len());
    let mut map = Vec::with_capacity(text.len());
    for (i, c) in text.char_indices() {
        let c = if c == '\u{2019}' { '\'' } else { c };
        for lc in c.to_lowercase() {
            let start = folded.len();
            folded.push(lc);
            map.extend(std::iter::repeat(i).take(folded.len() - start));
        }
    }
    (folded, map)
}
