//! Provider-neutral chat prompt.

use serde::{Deserialize, Serialize};

use crate::assembler::{AssembledContext, ContextBudget};
use crate::tokens::estimate_tokens;

/// One chat message. `role` is `"user"` or `"assistant"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// A system prompt plus alternating messages ending with the user's request.
///
/// Anthropic takes `system` as a top-level field; OpenAI-style APIs take it
/// as the first message. Clients do that mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptPayload {
    pub system: String,
    pub messages: Vec<PromptMessage>,
    /// Response token limit to request from the model.
    pub max_tokens: usize,
    pub estimated_tokens: usize,
}

impl PromptPayload {
    pub fn from_context(ctx: &AssembledContext, budget: &ContextBudget) -> Self {
        let mut messages = ctx.history.clone();
        messages.push(PromptMessage::new("user", ctx.query.clone()));
        let estimated_tokens = estimate_tokens(&ctx.system)
            + messages
                .iter()
                .map(|m| estimate_tokens(&m.content))
                .sum::<usize>();
        Self {
            system: ctx.system.clone(),
            messages,
            max_tokens: budget.reserved_response_tokens,
            estimated_tokens,
        }
    }

    /// The final user message, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::{assemble, AssemblyInput};
    use crate::models::{ConversationTurn, Role};
    use crate::retrieval::{RetrievalOutcome, RetrievalStrategy};

    #[test]
    fn test_payload_appends_query_after_history() {
        let outcome = RetrievalOutcome {
            strategy: RetrievalStrategy::Canned,
            items: vec![],
            warnings: vec![],
            vector_candidates: 0,
            text_candidates: 0,
        };
        let history = vec![
            ConversationTurn::new("s", Role::User, "first draft please"),
            ConversationTurn::new("s", Role::Assistant, "Here is a draft."),
        ];
        let input = AssemblyInput {
            query: "Make it shorter",
            audience: None,
            outcome: &outcome,
            pinned: &[],
            documents: &[],
            history: &history,
        };
        let budget = ContextBudget::default();
        let ctx = assemble(&input, &budget).unwrap();

        let payload = PromptPayload::from_context(&ctx, &budget);

        assert_eq!(payload.messages.len(), 3);
        assert_eq!(payload.messages[2], PromptMessage::new("user", "Make it shorter"));
        assert_eq!(payload.last_user_message(), Some("Make it shorter"));
        assert_eq!(payload.max_tokens, 1500);
        assert!(payload.estimated_tokens <= ctx.report.total_tokens);
        assert_eq!(payload.system, ctx.system);
    }
}
