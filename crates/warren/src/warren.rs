//! The Warren generation service.
//!
//! Ties the pipeline together for one advisor request:
//!
//! ```text
//! history + documents ─┐
//! pinned compliance ───┼─▶ assemble ─▶ payload ─▶ LLM ─▶ screen ─▶ response
//! staged retrieval ────┘                            │
//!                                                   └─ failure ─▶ canned fallback
//! ```
//!
//! Store and provider failures degrade the prompt instead of failing the
//! request; [`Warren::generate`] always returns a response.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use warren_core::assembler::{
    assemble, AssembleError, AssembledContext, AssemblyInput, AssemblyReport, ContextBudget,
};
use warren_core::compliance::{screen, ComplianceFlag};
use warren_core::embedding::EmbeddingProvider;
use warren_core::models::{ContentItem, ContentKind, ConversationTurn, Role};
use warren_core::prompt::PromptPayload;
use warren_core::retrieval::{retrieve, RetrievalOutcome, RetrievalParams, RetrievalRequest};
use warren_core::store::{ContentStore, SearchFilter, SessionStore};

use crate::config::Config;
use crate::embedding::create_provider;
use crate::llm::{create_client, CompletionClient, DisabledClient};
use crate::sqlite_store::SqliteStore;

/// Returned when the model cannot be reached or the prompt cannot be built.
pub const FALLBACK_RESPONSE: &str = "Warren can't draft content right now. Please try again in \
a few minutes. Any marketing material you prepare in the meantime still needs review by your \
Chief Compliance Officer before it is published.";

/// Most pinned compliance items loaded per request.
const PINNED_LIMIT: usize = 50;

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
    pub session_id: String,
    pub prompt: String,
    #[serde(default)]
    pub audience: Option<String>,
    /// Restrict retrieved examples to one kind of content.
    #[serde(default)]
    pub content_kind_hint: Option<ContentKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationResponse {
    pub content: String,
    /// `true` when `content` is [`FALLBACK_RESPONSE`].
    pub fallback: bool,
    /// Set when screening flagged the draft for compliance review.
    pub needs_review: bool,
    pub flags: Vec<ComplianceFlag>,
    pub model: Option<String>,
    pub report: AssemblyReport,
}

/// An assembled prompt ready for a completion call.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedPrompt {
    pub context: AssembledContext,
    pub payload: PromptPayload,
}

pub struct Warren {
    content: Arc<dyn ContentStore>,
    sessions: Arc<dyn SessionStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    llm: Arc<dyn CompletionClient>,
    retrieval: RetrievalParams,
    budget: ContextBudget,
    extra_terms: Vec<String>,
}

impl Warren {
    pub fn new(
        content: Arc<dyn ContentStore>,
        sessions: Arc<dyn SessionStore>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        llm: Arc<dyn CompletionClient>,
        config: &Config,
    ) -> Self {
        Self {
            content,
            sessions,
            embedder,
            llm,
            retrieval: config.retrieval.clone(),
            budget: config.context.clone(),
            extra_terms: config.compliance.extra_terms.clone(),
        }
    }

    /// Open the SQLite store (migrating it if needed), the embedding
    /// provider, and the completion client.
    ///
    /// # Errors
    ///
    /// Fails when the database cannot be opened, or when a configured
    /// provider is missing its API key.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let llm = create_client(&config.llm)?;
        Self::open(config, llm).await
    }

    /// Like [`from_config`](Self::from_config) without a completion client,
    /// for commands that only ingest, search, or assemble. `[llm]` settings
    /// and credentials are not read.
    ///
    /// # Errors
    ///
    /// Fails when the database cannot be opened or the embedding provider
    /// cannot be built.
    pub async fn for_retrieval(config: &Config) -> anyhow::Result<Self> {
        Self::open(config, Arc::new(DisabledClient)).await
    }

    async fn open(config: &Config, llm: Arc<dyn CompletionClient>) -> anyhow::Result<Self> {
        let store = Arc::new(SqliteStore::open(config).await?);
        let embedder = create_provider(&config.embedding)?;
        Ok(Self::new(store.clone(), store, embedder, llm, config))
    }

    pub fn content_store(&self) -> &Arc<dyn ContentStore> {
        &self.content
    }

    pub fn session_store(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn embedder(&self) -> Option<&dyn EmbeddingProvider> {
        self.embedder.as_deref()
    }

    /// Run staged retrieval for `query` over approved content.
    pub async fn search(
        &self,
        query: &str,
        audience: Option<&str>,
        kinds: Option<Vec<ContentKind>>,
        limit: Option<usize>,
    ) -> RetrievalOutcome {
        let mut params = self.retrieval.clone();
        if let Some(limit) = limit {
            params.final_limit = limit.max(1);
            params.candidate_k = params.candidate_k.max(params.final_limit);
        }
        let filter = SearchFilter {
            kinds,
            ..SearchFilter::approved().with_audience(audience.map(str::to_string))
        };
        let req = RetrievalRequest {
            query,
            filter,
            params,
        };
        retrieve(self.content.as_ref(), self.embedder(), &req).await
    }

    /// Gather every source for `query` and pack the prompt.
    pub async fn prepare(
        &self,
        session_id: &str,
        query: &str,
        audience: Option<&str>,
        kind_hint: Option<ContentKind>,
    ) -> Result<PreparedPrompt, (AssembleError, RetrievalOutcome)> {
        let mut warnings = Vec::new();

        let history = self
            .sessions
            .conversation_history(session_id, self.budget.history_max_turns)
            .await
            .unwrap_or_else(|e| {
                warn!(session_id, error = %format!("{:#}", e), "history unavailable");
                warnings.push(format!("conversation history unavailable: {:#}", e));
                Vec::new()
            });

        let documents = self
            .sessions
            .session_documents(session_id)
            .await
            .unwrap_or_else(|e| {
                warn!(session_id, error = %format!("{:#}", e), "session documents unavailable");
                warnings.push(format!("session documents unavailable: {:#}", e));
                Vec::new()
            });

        let pinned: Vec<ContentItem> = self
            .content
            .list_content(&SearchFilter::pinned_compliance(), PINNED_LIMIT)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %format!("{:#}", e), "pinned compliance content unavailable");
                warnings.push(format!("pinned compliance content unavailable: {:#}", e));
                Vec::new()
            });

        let kinds = kind_hint.map(|k| {
            let mut kinds = vec![k, ContentKind::ComplianceRule, ContentKind::Disclosure];
            kinds.dedup();
            kinds
        });
        let mut outcome = self.search(query, audience, kinds, None).await;
        outcome.warnings.extend(warnings);

        let input = AssemblyInput {
            query,
            audience,
            outcome: &outcome,
            pinned: &pinned,
            documents: &documents,
            history: &history,
        };
        match assemble(&input, &self.budget) {
            Ok(context) => {
                let payload = PromptPayload::from_context(&context, &self.budget);
                Ok(PreparedPrompt { context, payload })
            }
            Err(e) => Err((e, outcome)),
        }
    }

    /// Draft a response to `req`. Never fails; see [`FALLBACK_RESPONSE`].
    pub async fn generate(&self, req: &GenerationRequest) -> GenerationResponse {
        let prepared = self
            .prepare(
                &req.session_id,
                &req.prompt,
                req.audience.as_deref(),
                req.content_kind_hint,
            )
            .await;

        let prepared = match prepared {
            Ok(p) => p,
            Err((e, outcome)) => {
                warn!(error = %e, "context assembly failed; returning fallback");
                let mut warnings = outcome.warnings;
                warnings.push(e.to_string());
                self.record_user_turn(req).await;
                return fallback(AssemblyReport {
                    strategy: outcome.strategy,
                    sections: Vec::new(),
                    total_tokens: 0,
                    overflow_tokens: 0,
                    used_compliance_baseline: false,
                    warnings,
                });
            }
        };

        let mut report = prepared.context.report;
        let completion = self.llm.complete(&prepared.payload).await;
        self.record_user_turn(req).await;

        let completion = match completion {
            Ok(c) => c,
            Err(e) => {
                warn!(provider = self.llm.name(), error = %e, "completion failed; returning fallback");
                report.warnings.push(format!("{} completion failed: {}", self.llm.name(), e));
                return fallback(report);
            }
        };

        let flags = screen(&completion.text, &self.extra_terms);
        if !flags.is_empty() {
            warn!(
                session_id = %req.session_id,
                flags = flags.len(),
                "draft flagged for compliance review"
            );
        }

        let turn = ConversationTurn::new(&req.session_id, Role::Assistant, completion.text.clone());
        if let Err(e) = self.sessions.append_turn(&turn).await {
            warn!(error = %format!("{:#}", e), "failed to record assistant turn");
        }

        info!(
            session_id = %req.session_id,
            strategy = report.strategy.as_str(),
            prompt_tokens = report.total_tokens,
            model = %completion.model,
            "generated draft"
        );

        GenerationResponse {
            content: completion.text,
            fallback: false,
            needs_review: !flags.is_empty(),
            flags,
            model: Some(completion.model),
            report,
        }
    }

    async fn record_user_turn(&self, req: &GenerationRequest) {
        let turn = ConversationTurn::new(&req.session_id, Role::User, req.prompt.clone());
        if let Err(e) = self.sessions.append_turn(&turn).await {
            warn!(error = %format!("{:#}", e), "failed to record user turn");
        }
    }
}

fn fallback(report: AssemblyReport) -> GenerationResponse {
    GenerationResponse {
        content: FALLBACK_RESPONSE.to_string(),
        fallback: true,
        needs_review: false,
        flags: Vec::new(),
        model: None,
        report,
    }
}

impl GenerationResponse {
    /// Whether retrieval fell back past the query-ranked stages.
    pub fn degraded(&self) -> bool {
        self.fallback || !self.report.strategy.is_query_ranked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::llm::{Completion, LlmError};
    use std::sync::Mutex;
    use warren_core::models::ContentStatus;
    use warren_core::retrieval::RetrievalStrategy;
    use warren_core::store::memory::InMemoryStore;

    struct ScriptedLlm {
        reply: Option<String>,
        seen: Mutex<Vec<PromptPayload>>,
    }

    impl ScriptedLlm {
        fn new(reply: Option<&str>) -> Self {
            Self {
                reply: reply.map(String::from),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl CompletionClient for ScriptedLlm {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn complete(&self, payload: &PromptPayload) -> Result<Completion, LlmError> {
            self.seen.lock().unwrap().push(payload.clone());
            match &self.reply {
                Some(text) => Ok(Completion {
                    text: text.clone(),
                    model: "scripted-1".into(),
                    input_tokens: None,
                    output_tokens: None,
                }),
                None => Err(LlmError::Transport {
                    provider: "scripted",
                    message: "connection refused".into(),
                }),
            }
        }
    }

    fn item(id: &str, kind: ContentKind, title: &str, body: &str, pinned: bool) -> ContentItem {
        ContentItem {
            id: id.into(),
            kind,
            status: ContentStatus::Approved,
            title: title.into(),
            body: body.into(),
            audience: None,
            tags: vec![],
            pinned,
            source_url: None,
            created_at: 1,
            updated_at: 1,
            content_hash: String::new(),
        }
    }

    async fn warren(llm: Arc<ScriptedLlm>) -> (Warren, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        store
            .add_item(
                item("rule", ContentKind::ComplianceRule, "No performance guarantees", "Never promise returns.", true),
            )
            .await
            .unwrap();
        store
            .add_item(
                item("ex", ContentKind::MarketingExample, "Roth newsletter", "Roth conversions can make sense in low-income years.", false),
            )
            .await
            .unwrap();
        let config = parse_config("[db]\npath = \"unused.sqlite\"\n").unwrap();
        let w = Warren::new(store.clone(), store.clone(), None, llm, &config);
        (w, store)
    }

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            session_id: "s1".into(),
            prompt: prompt.into(),
            audience: None,
            content_kind_hint: None,
        }
    }

    #[tokio::test]
    async fn test_generate_includes_pinned_compliance_and_records_turns() {
        let llm = Arc::new(ScriptedLlm::new(Some("Consider a Roth conversion this year.")));
        let (w, store) = warren(llm.clone()).await;

        let resp = w.generate(&request("Write about Roth conversions")).await;

        assert!(!resp.fallback);
        assert!(!resp.needs_review);
        assert_eq!(resp.model.as_deref(), Some("scripted-1"));
        assert_eq!(resp.report.strategy, RetrievalStrategy::Text);
        let seen = llm.seen.lock().unwrap();
        assert!(seen[0].system.contains("Never promise returns."));
        assert!(seen[0].system.contains("Roth newsletter"));

        let history = store.conversation_history("s1", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].content, "Consider a Roth conversion this year.");
    }

    #[tokio::test]
    async fn test_flagged_draft_needs_review() {
        let llm = Arc::new(ScriptedLlm::new(Some("Guaranteed returns with zero risk!")));
        let (w, _) = warren(llm).await;

        let resp = w.generate(&request("Write about Roth conversions")).await;

        assert!(resp.needs_review);
        let terms: Vec<&str> = resp.flags.iter().map(|f| f.term.as_str()).collect();
        assert_eq!(terms, vec!["guaranteed return", "zero risk"]);
    }

    #[tokio::test]
    async fn test_llm_failure_returns_fallback() {
        let llm = Arc::new(ScriptedLlm::new(None));
        let (w, store) = warren(llm).await;

        let resp = w.generate(&request("Write about Roth conversions")).await;

        assert!(resp.fallback);
        assert_eq!(resp.content, FALLBACK_RESPONSE);
        assert!(resp.degraded());
        assert!(resp
            .report
            .warnings
            .iter()
            .any(|w| w.contains("connection refused")));
        let history = store.conversation_history("s1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_previous_turns_reach_the_prompt() {
        let llm = Arc::new(ScriptedLlm::new(Some("Shorter draft.")));
        let (w, _) = warren(llm.clone()).await;

        w.generate(&request("Write about Roth conversions")).await;
        w.generate(&request("Make it shorter")).await;

        let seen = llm.seen.lock().unwrap();
        let second = &seen[1];
        assert_eq!(second.messages.len(), 3);
        assert_eq!(second.messages[0].content, "Write about Roth conversions");
        assert_eq!(second.last_user_message(), Some("Make it shorter"));
    }

    #[tokio::test]
    async fn test_kind_hint_keeps_compliance() {
        let llm = Arc::new(ScriptedLlm::new(Some("ok")));
        let (w, _) = warren(llm).await;

        let prepared = w
            .prepare("s2", "Roth conversions", None, Some(ContentKind::Reference))
            .await
            .unwrap();

        assert!(prepared.context.system.contains("Never promise returns."));
        assert!(!prepared.context.system.contains("Roth newsletter"));
    }
}
