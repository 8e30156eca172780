//! Core data models shared by the retrieval and assembly pipeline.
//!
//! These types mirror the rows the surrounding advisor platform keeps in its
//! content and session tables. The pipeline only reads them through the
//! [`store`](crate::store) traits.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// What a content item is used for when building a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// A rule or interpretation from SEC / FINRA guidance.
    ComplianceRule,
    /// A previously approved piece of marketing copy.
    MarketingExample,
    /// Mandatory disclosure language.
    Disclosure,
    /// Background material (product sheets, firm facts).
    Reference,
}

impl ContentKind {
    pub const ALL: [ContentKind; 4] = [
        ContentKind::ComplianceRule,
        ContentKind::MarketingExample,
        ContentKind::Disclosure,
        ContentKind::Reference,
    ];

    /// Compliance-critical content is never silently dropped from a prompt.
    pub fn is_compliance_critical(self) -> bool {
        matches!(self, ContentKind::ComplianceRule | ContentKind::Disclosure)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::ComplianceRule => "compliance_rule",
            ContentKind::MarketingExample => "marketing_example",
            ContentKind::Disclosure => "disclosure",
            ContentKind::Reference => "reference",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "compliance_rule" => Ok(ContentKind::ComplianceRule),
            "marketing_example" => Ok(ContentKind::MarketingExample),
            "disclosure" => Ok(ContentKind::Disclosure),
            "reference" => Ok(ContentKind::Reference),
            other => anyhow::bail!(
                "Unknown content kind: '{}'. Use compliance_rule, marketing_example, disclosure, or reference.",
                other
            ),
        }
    }
}

/// Review state of a content item in the CCO workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    #[default]
    Draft,
    InReview,
    Approved,
    Rejected,
}

impl ContentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentStatus::Draft => "draft",
            ContentStatus::InReview => "in_review",
            ContentStatus::Approved => "approved",
            ContentStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "draft" => Ok(ContentStatus::Draft),
            "in_review" => Ok(ContentStatus::InReview),
            "approved" => Ok(ContentStatus::Approved),
            "rejected" => Ok(ContentStatus::Rejected),
            other => anyhow::bail!("Unknown content status: '{}'", other),
        }
    }
}

/// A knowledge item the assembler can draw on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Assigned on ingest when empty.
    #[serde(default)]
    pub id: String,
    pub kind: ContentKind,
    #[serde(default)]
    pub status: ContentStatus,
    pub title: String,
    pub body: String,
    /// Target audience segment (e.g. `"retirees"`). `None` applies to everyone.
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Always included in every prompt, regardless of query relevance.
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub source_url: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub created_at: i64,
    /// Unix seconds.
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub content_hash: String,
}

impl ContentItem {
    /// Whether the item may be shown to the model as an example of approved copy.
    pub fn is_usable_example(&self) -> bool {
        self.status == ContentStatus::Approved
            && matches!(
                self.kind,
                ContentKind::MarketingExample | ContentKind::Reference
            )
    }
}

/// SHA-256 hex digest of a text body.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A chunk of a content item's body text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub content_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A document an advisor attached to a chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDocument {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub session_id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub created_at: i64,
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => anyhow::bail!("Unknown conversation role: '{}'", other),
        }
    }
}

/// One message in an advisor's conversation with Warren.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: i64,
}

impl ConversationTurn {
    pub fn new(session_id: &str, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role,
            content: content.into(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip_through_str() {
        for kind in ContentKind::ALL {
            assert_eq!(kind.as_str().parse::<ContentKind>().unwrap(), kind);
        }
        assert!("memo".parse::<ContentKind>().is_err());
    }

    #[test]
    fn test_compliance_critical_kinds() {
        assert!(ContentKind::ComplianceRule.is_compliance_critical());
        assert!(ContentKind::Disclosure.is_compliance_critical());
        assert!(!ContentKind::MarketingExample.is_compliance_critical());
        assert!(!ContentKind::Reference.is_compliance_critical());
    }

    #[test]
    fn test_item_deserializes_with_defaults() {
        let item: ContentItem = serde_json::from_str(
            r#"{"id":"a","kind":"marketing_example","title":"t","body":"b"}"#,
        )
        .unwrap();
        assert_eq!(item.status, ContentStatus::Draft);
        assert!(!item.pinned);
        assert!(item.tags.is_empty());
        assert!(!item.is_usable_example());
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("").len(), 64);
    }
}
