//! Token-bounded context assembly.
//!
//! Packs the knowledge Warren needs for one request into a prompt that fits
//! the model window, in priority order:
//!
//! 1. **Compliance**: pinned rules and disclosures plus any compliance
//!    content retrieval surfaced. Packed first against the whole budget and
//!    never silently dropped: an item that does not fit is truncated, or as a
//!    last resort listed by title as a reference line.
//! 2. **Examples**: approved marketing examples and reference material, in
//!    retrieval score order.
//! 3. **Session documents**: ranked by query-term overlap.
//! 4. **History**: newest turns first, emitted chronologically.
//!
//! Sections 2 to 4 split the budget left after compliance by configurable
//! shares; whatever a section does not use rolls over to the next one.
//!
//! Sizes use the [`tokens`](crate::tokens) estimate. Because the estimate is
//! subadditive, summing per-block estimates bounds the estimate of the
//! concatenated prompt.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{ContentItem, ConversationTurn, SessionDocument};
use crate::prompt::PromptMessage;
use crate::retrieval::{RetrievalOutcome, RetrievalStrategy};
use crate::tokens::{estimate_tokens, query_terms, truncate_to_tokens};

/// Persona and standing instructions at the top of every prompt.
pub const WARREN_PREAMBLE: &str = "You are Warren, a marketing content assistant for registered \
financial advisors. Draft clear, engaging copy that complies with the SEC Marketing Rule \
(Rule 206(4)-1) and FINRA Rule 2210. Never promise or imply guaranteed returns, never \
describe an investment as risk-free, present benefits together with material risks, and \
include the disclosures supplied below. When a requirement below conflicts with a request, \
follow the requirement and explain the change.";

/// Compliance text used when no compliance content could be loaded.
pub const COMPLIANCE_BASELINE: &str = "### Baseline compliance requirements\n\
- Do not state or imply that returns are guaranteed or that an investment is without risk.\n\
- Past performance must be accompanied by: \"Past performance is not indicative of future results.\"\n\
- Do not use testimonials or endorsements without the required disclosures.\n\
- Present any benefit alongside its material risks and limitations.\n\
- Do not make exaggerated, promissory, or misleading claims.\n\
- Flag the draft for review by the Chief Compliance Officer before publication.";

const COMPLIANCE_HEADER: &str = "## Compliance requirements (mandatory)";
const EXAMPLES_HEADER: &str = "## Approved examples";
const DOCUMENTS_HEADER: &str = "## Session documents";

/// Budget settings for one assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextBudget {
    /// Model context window in tokens.
    pub max_context_tokens: usize,
    /// Tokens held back for the model's answer.
    pub reserved_response_tokens: usize,
    /// Upper bound on history turns considered.
    pub history_max_turns: usize,
    pub example_share: f64,
    pub document_share: f64,
    pub history_share: f64,
    /// Smallest remainder worth filling with a truncated item.
    pub min_partial_tokens: usize,
    /// Cap applied to each session document before packing.
    pub per_document_max_tokens: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            max_context_tokens: 8000,
            reserved_response_tokens: 1500,
            history_max_turns: 12,
            example_share: 0.35,
            document_share: 0.35,
            history_share: 0.30,
            min_partial_tokens: 48,
            per_document_max_tokens: 1200,
        }
    }
}

impl ContextBudget {
    /// Tokens available to the prompt itself.
    pub fn prompt_window(&self) -> usize {
        self.max_context_tokens
            .saturating_sub(self.reserved_response_tokens)
    }
}

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("context budget exhausted: preamble and query need {needed} tokens but the prompt window is {window}")]
    BudgetExhausted { needed: usize, window: usize },
}

/// Everything the assembler draws from for one request.
#[derive(Debug, Clone, Copy)]
pub struct AssemblyInput<'a> {
    pub query: &'a str,
    pub audience: Option<&'a str>,
    pub outcome: &'a RetrievalOutcome,
    /// Pinned compliance-critical items, always included.
    pub pinned: &'a [ContentItem],
    pub documents: &'a [SessionDocument],
    /// Chronological conversation history.
    pub history: &'a [ConversationTurn],
}

/// Token usage of one prompt section.
#[derive(Debug, Clone, Serialize)]
pub struct SectionUsage {
    pub name: String,
    pub budget_tokens: usize,
    pub used_tokens: usize,
    pub included: usize,
    pub truncated: usize,
    pub dropped: usize,
}

/// What the assembler did, for logging and API responses.
#[derive(Debug, Clone, Serialize)]
pub struct AssemblyReport {
    pub strategy: RetrievalStrategy,
    pub sections: Vec<SectionUsage>,
    /// Estimated tokens of system text, history, and query.
    pub total_tokens: usize,
    /// Tokens by which compliance reference lines exceeded the window.
    pub overflow_tokens: usize,
    pub used_compliance_baseline: bool,
    pub warnings: Vec<String>,
}

impl AssemblyReport {
    pub fn section(&self, name: &str) -> Option<&SectionUsage> {
        self.sections.iter().find(|s| s.name == name)
    }
}

/// A packed prompt ready to be turned into a provider payload.
#[derive(Debug, Clone, Serialize)]
pub struct AssembledContext {
    pub system: String,
    pub history: Vec<PromptMessage>,
    pub query: String,
    pub report: AssemblyReport,
}

enum Fit {
    Whole,
    Truncated,
    Dropped,
}

struct Section {
    name: &'static str,
    header: &'static str,
    budget: usize,
    used: usize,
    blocks: Vec<String>,
    included: usize,
    truncated: usize,
    dropped: usize,
}

impl Section {
    fn new(name: &'static str, header: &'static str, budget: usize) -> Self {
        Self {
            name,
            header,
            budget,
            used: 0,
            blocks: Vec::new(),
            included: 0,
            truncated: 0,
            dropped: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.budget.saturating_sub(self.used)
    }

    /// Cost of the header (plus separator) if nothing has been added yet.
    fn header_cost(&self) -> usize {
        if self.blocks.is_empty() && !self.header.is_empty() {
            estimate_tokens(self.header) + 1
        } else {
            0
        }
    }

    /// Add `block`, truncating it once if at least `min_partial` tokens remain.
    fn offer(&mut self, block: &str, min_partial: usize) -> Fit {
        let header = self.header_cost();
        let cost = header + estimate_tokens(block) + 1;
        if cost <= self.remaining() {
            self.push(block.to_string(), cost);
            self.included += 1;
            return Fit::Whole;
        }

        let room = self.remaining().saturating_sub(header + 1);
        if room >= min_partial {
            let cut = truncate_to_tokens(block, room);
            if !cut.is_empty() {
                let cost = header + estimate_tokens(&cut) + 1;
                self.push(cut, cost);
                self.included += 1;
                self.truncated += 1;
                return Fit::Truncated;
            }
        }

        self.dropped += 1;
        Fit::Dropped
    }

    /// Add `block` regardless of the budget.
    fn force(&mut self, block: String) {
        let cost = self.header_cost() + estimate_tokens(&block) + 1;
        self.push(block, cost);
        self.included += 1;
    }

    fn push(&mut self, block: String, cost: usize) {
        self.used += cost;
        self.blocks.push(block);
    }

    fn render_into(&self, out: &mut String) {
        if self.blocks.is_empty() {
            return;
        }
        if !self.header.is_empty() {
            out.push_str(self.header);
            out.push_str("\n\n");
        }
        for b in &self.blocks {
            out.push_str(b);
            out.push_str("\n\n");
        }
    }

    fn usage(&self) -> SectionUsage {
        SectionUsage {
            name: self.name.to_string(),
            budget_tokens: self.budget,
            used_tokens: self.used,
            included: self.included,
            truncated: self.truncated,
            dropped: self.dropped,
        }
    }
}

fn item_block(item: &ContentItem) -> String {
    match &item.audience {
        Some(a) => format!("### {} (audience: {})\n{}", item.title, a, item.body.trim()),
        None => format!("### {}\n{}", item.title, item.body.trim()),
    }
}

fn reference_line(item: &ContentItem) -> String {
    format!(
        "- {} (full text omitted for length; this requirement still applies in full)",
        item.title
    )
}

fn preamble(audience: Option<&str>) -> String {
    match audience {
        Some(a) if !a.trim().is_empty() => {
            format!("{}\n\nTarget audience: {}.", WARREN_PREAMBLE, a.trim())
        }
        _ => WARREN_PREAMBLE.to_string(),
    }
}

fn share(total: usize, fraction: f64) -> usize {
    (total as f64 * fraction.clamp(0.0, 1.0)).floor() as usize
}

/// Rank documents by distinct query terms they contain, ties newest first.
fn rank_documents<'a>(query: &str, docs: &'a [SessionDocument]) -> Vec<&'a SessionDocument> {
    let terms = query_terms(query);
    let mut scored: Vec<(usize, &SessionDocument)> = docs
        .iter()
        .map(|d| {
            let text = format!("{} {}", d.title, d.body).to_lowercase();
            (terms.iter().filter(|t| text.contains(t.as_str())).count(), d)
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.created_at.cmp(&a.1.created_at)));
    scored.into_iter().map(|(_, d)| d).collect()
}

/// Pack `input` into a prompt that fits `budget`.
///
/// # Errors
///
/// Returns [`AssembleError::BudgetExhausted`] when the window is too small
/// for the preamble and query alone.
pub fn assemble(
    input: &AssemblyInput<'_>,
    budget: &ContextBudget,
) -> Result<AssembledContext, AssembleError> {
    let window = budget.prompt_window();
    let preamble = preamble(input.audience);
    let query = input.query.trim().to_string();

    let fixed = estimate_tokens(&preamble) + 1 + estimate_tokens(&query);
    if fixed >= window {
        return Err(AssembleError::BudgetExhausted {
            needed: fixed,
            window,
        });
    }
    let available = window - fixed;
    let mut warnings = input.outcome.warnings.clone();

    // Compliance: pinned first, then whatever retrieval surfaced, deduplicated.
    let mut seen = HashSet::new();
    let compliance_items: Vec<&ContentItem> = input
        .pinned
        .iter()
        .chain(
            input
                .outcome
                .items
                .iter()
                .map(|r| &r.item)
                .filter(|i| i.kind.is_compliance_critical()),
        )
        .filter(|i| seen.insert(i.id.as_str()))
        .collect();

    let mut compliance = Section::new("compliance", COMPLIANCE_HEADER, available);
    for item in &compliance_items {
        if let Fit::Dropped = compliance.offer(&item_block(item), budget.min_partial_tokens) {
            compliance.dropped -= 1;
            compliance.force(reference_line(item));
        }
    }
    let used_baseline = compliance.blocks.is_empty();
    if used_baseline {
        if let Fit::Dropped = compliance.offer(COMPLIANCE_BASELINE, budget.min_partial_tokens) {
            compliance.dropped -= 1;
            compliance.force(
                "- Follow SEC Rule 206(4)-1 and FINRA Rule 2210 in full.".to_string(),
            );
        }
    }
    let overflow = compliance.used.saturating_sub(available);
    if overflow > 0 {
        warn!(overflow, "compliance content exceeds the prompt window");
        warnings.push(format!(
            "compliance content exceeds the prompt window by {} tokens",
            overflow
        ));
    }

    let rest = available.saturating_sub(compliance.used);

    // Examples.
    let mut examples = Section::new("examples", EXAMPLES_HEADER, share(rest, budget.example_share));
    for r in input.outcome.items.iter().filter(|r| r.item.is_usable_example()) {
        examples.offer(&item_block(&r.item), budget.min_partial_tokens);
    }

    // Session documents, each capped before packing.
    let doc_budget = share(rest, budget.document_share) + examples.remaining();
    let mut documents = Section::new("documents", DOCUMENTS_HEADER, doc_budget);
    for doc in rank_documents(&query, input.documents) {
        let body = doc.body.trim();
        let capped = truncate_to_tokens(body, budget.per_document_max_tokens);
        let was_capped = capped.len() != body.len();
        let block = format!("### {}\n{}", doc.title, capped);
        if let Fit::Whole = documents.offer(&block, budget.min_partial_tokens) {
            if was_capped {
                documents.truncated += 1;
            }
        }
    }

    // History: newest first until the budget runs out, then chronological.
    let history_budget = share(rest, budget.history_share) + documents.remaining();
    let mut history = Section::new("history", "", history_budget);
    let recent = &input.history[input.history.len().saturating_sub(budget.history_max_turns)..];
    let mut picked: Vec<PromptMessage> = Vec::new();
    for (i, turn) in recent.iter().enumerate().rev() {
        let before = history.blocks.len();
        let fit = history.offer(&turn.content, budget.min_partial_tokens);
        if history.blocks.len() > before {
            let content = history.blocks[before].clone();
            picked.push(PromptMessage::new(turn.role.as_str(), content));
        }
        if !matches!(fit, Fit::Whole) {
            // Older turns would leave a gap in the conversation.
            history.dropped += i;
            break;
        }
    }
    history.dropped += input.history.len() - recent.len();
    picked.reverse();

    let mut system = preamble;
    system.push_str("\n\n");
    compliance.render_into(&mut system);
    examples.render_into(&mut system);
    documents.render_into(&mut system);
    let system = system.trim_end().to_string();

    let total_tokens = estimate_tokens(&system)
        + picked
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum::<usize>()
        + estimate_tokens(&query);

    let report = AssemblyReport {
        strategy: input.outcome.strategy,
        sections: vec![
            compliance.usage(),
            examples.usage(),
            documents.usage(),
            history.usage(),
        ],
        total_tokens,
        overflow_tokens: overflow,
        used_compliance_baseline: used_baseline,
        warnings,
    };
    debug!(
        total = report.total_tokens,
        window,
        strategy = report.strategy.as_str(),
        "assembled context"
    );

    Ok(AssembledContext {
        system,
        history: picked,
        query,
        report,
    })
}
