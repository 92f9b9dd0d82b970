//! Shared types for the moderation pipeline.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::safety::truncate_text;

/// Maximum characters of message text carried in a scan request.
pub const MESSAGE_SNIPPET_MAX_LENGTH: usize = 500;

/// Maximum characters of a model explanation.
pub const EXPLANATION_MAX_LENGTH: usize = 500;

/// Maximum characters of a single evidence value.
pub const EVIDENCE_VALUE_MAX_LENGTH: usize = 1000;

// ── Inbound message ─────────────────────────────────────────────────

/// Chat message as handed over by the platform layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Platform message id (dedupe key).
    pub id: String,
    /// Guild the message was posted in; `None` for direct messages.
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub author_id: String,
    #[serde(default)]
    pub author_is_bot: bool,
    /// Role ids held by the author, for exemption checks.
    #[serde(default)]
    pub author_role_ids: Vec<String>,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        id: impl Into<String>,
        guild_id: Option<&str>,
        channel_id: impl Into<String>,
        author_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            guild_id: guild_id.map(str::to_string),
            channel_id: channel_id.into(),
            author_id: author_id.into(),
            author_is_bot: false,
            author_role_ids: Vec::new(),
            content: content.into(),
            attachments: Vec::new(),
            received_at: Utc::now(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_author_roles(mut self, role_ids: Vec<String>) -> Self {
        self.author_role_ids = role_ids;
        self
    }

    /// Mark the author as an automated account.
    pub fn from_bot(mut self) -> Self {
        self.author_is_bot = true;
        self
    }
}

/// File attached to a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attachment {
    pub name: Option<String>,
    pub content_type: Option<String>,
    pub url: String,
    pub size: u64,
}

const IMAGE_EXTENSIONS: [&str; 6] = [".png", ".jpg", ".jpeg", ".gif", ".webp", ".bmp"];

impl Attachment {
    /// Recognised as an image by file extension or declared content type.
    pub fn is_image(&self) -> bool {
        let by_name = self.name.as_deref().is_some_and(|name| {
            let lower = name.to_lowercase();
            IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
        });
        let by_type = self
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/"));
        by_name || by_type
    }
}

// ── Situations and policies ─────────────────────────────────────────

/// Coarse message context; selects which prompt the model sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Situation {
    ScamText,
    PolicyRestricted,
    ImageWithCode,
    Generic,
}

impl Situation {
    pub const ALL: [Situation; 4] = [
        Situation::ScamText,
        Situation::PolicyRestricted,
        Situation::ImageWithCode,
        Situation::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScamText => "scam_text",
            Self::PolicyRestricted => "policy_restricted",
            Self::ImageWithCode => "image_with_code",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for Situation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of per-channel content policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Gift/red-packet codes allowed, monetary values forbidden.
    RedPacket,
    LinkOnly,
    NoLinks,
    Strict,
}

impl PolicyKind {
    /// Policies that forbid disclosing values route to the restricted prompt.
    pub fn is_restricted_value(&self) -> bool {
        matches!(self, Self::RedPacket)
    }
}

/// A channel policy row supplied by the policy store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPolicy {
    pub kind: PolicyKind,
    pub enabled: bool,
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl ChannelPolicy {
    pub fn new(kind: PolicyKind) -> Self {
        Self {
            kind,
            enabled: true,
            settings: serde_json::Value::Null,
        }
    }
}

// ── Scan request ────────────────────────────────────────────────────

/// Everything the model needs to score one message. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct ScanRequest {
    scan_id: Uuid,
    guild_id: String,
    situation: Situation,
    content: String,
    urls: Vec<String>,
    aux_text: Option<String>,
    context: Option<String>,
}

impl ScanRequest {
    /// Build a request. Content is capped at [`MESSAGE_SNIPPET_MAX_LENGTH`].
    pub fn new(guild_id: impl Into<String>, situation: Situation, content: &str) -> Self {
        Self {
            scan_id: Uuid::new_v4(),
            guild_id: guild_id.into(),
            situation,
            content: truncate_text(content, MESSAGE_SNIPPET_MAX_LENGTH),
            urls: Vec::new(),
            aux_text: None,
            context: None,
        }
    }

    pub fn with_urls(mut self, urls: Vec<String>) -> Self {
        self.urls = urls;
        self
    }

    pub fn with_aux_text(mut self, aux_text: Option<String>) -> Self {
        self.aux_text = aux_text.filter(|t| !t.is_empty());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn scan_id(&self) -> Uuid {
        self.scan_id
    }

    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    pub fn situation(&self) -> Situation {
        self.situation
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn aux_text(&self) -> Option<&str> {
        self.aux_text.as_deref()
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

// ── Scan response ───────────────────────────────────────────────────

/// Violation categories the model may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    InvestmentScam,
    Phishing,
    SupportImpersonation,
    QrScam,
    Spam,
    Harassment,
    PolicyViolation,
    Clean,
}

/// Enforcement the model recommends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    None,
    LogOnly,
    WarnDm,
    Delete,
    Timeout,
    TimeoutAndDelete,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::LogOnly => "log_only",
            Self::WarnDm => "warn_dm",
            Self::Delete => "delete",
            Self::Timeout => "timeout",
            Self::TimeoutAndDelete => "timeout_and_delete",
        }
    }
}

/// Model's self-reported likelihood that a flag is actually benign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FalsePositiveRisk {
    Low,
    Medium,
    High,
}

/// Kind of cited evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    Pattern,
    Url,
    Qr,
    Keyword,
    Behavior,
    MonetaryValue,
    Currency,
    Text,
    Link,
    Mention,
    Attachment,
    Context,
    Phrase,
    Symbol,
    Other,
}

/// A discrete snippet supporting the score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(rename = "type")]
    pub kind: EvidenceType,
    pub value: String,
}

/// Schema-validated model verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResponse {
    pub score: u8,
    pub categories: Vec<Category>,
    pub explanation: String,
    pub recommended_action: RecommendedAction,
    pub confidence: f64,
    pub false_positive_risk: FalsePositiveRisk,
    pub evidence: Vec<Evidence>,
}

// ── Results ─────────────────────────────────────────────────────────

/// Output of one provider-adapter scan (primary prompt plus optional fallback).
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub success: bool,
    pub response: ScanResponse,
    /// The fallback prompt was used.
    pub retried: bool,
    pub error: Option<String>,
}

/// Why the scheduler turned a request away without running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// Backlog at capacity at submission time.
    QueueFull,
    /// Dropped from the backlog by `clear()` before it started.
    Cleared,
}

/// What `ScanQueue::submit` hands back. Never absent.
#[derive(Debug, Clone)]
pub struct QueuedResult {
    pub success: bool,
    pub response: ScanResponse,
    /// Fallback prompt used or transport retried.
    pub retried: bool,
    pub error: Option<String>,
    /// Time between enqueue and dispatch.
    pub queue_time: Duration,
    /// Time between dispatch and completion.
    pub process_time: Duration,
    /// Provider attempts made by the scheduler.
    pub attempts: u32,
    pub rejection: Option<Rejection>,
}

impl QueuedResult {
    pub fn is_queue_full(&self) -> bool {
        self.rejection == Some(Rejection::QueueFull)
    }
}
