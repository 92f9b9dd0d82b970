//! Situation selection: picks the prompt family for a message.
//!
//! Pure and deterministic. Precedence, first match wins:
//! 1. An enabled restricted-value channel policy → `PolicyRestricted`
//! 2. Decoded auxiliary text (QR payload) present → `ImageWithCode`
//! 3. Scam keyword in content, or a suspicious URL → `ScamText`
//! 4. Otherwise → `Generic`

use regex::Regex;
use tracing::debug;

use crate::pipeline::types::{Attachment, ChannelPolicy, PolicyKind, Situation};

const DEFAULT_SCAM_KEYWORDS: [&str; 16] = [
    "guaranteed return",
    "double your",
    "click my bio",
    "click my profile",
    "dm me for",
    "free crypto",
    "free nft",
    "airdrop",
    "investment opportunity",
    "make money fast",
    "limited time offer",
    "act now",
    "support team",
    "verify your account",
    "suspended",
    "urgent action required",
];

/// Host patterns: link shorteners, gift/invite look-alikes, throwaway TLDs.
///
/// Shorteners match as whole host labels so `t.co` does not fire inside
/// `microsoft.com`; look-alikes match anywhere in the host. Only the TLD
/// rule is anchored to the end.
const DEFAULT_SUSPICIOUS_HOSTS: [&str; 6] = [
    r"(?i)(^|\.)bit\.ly(\.|$)",
    r"(?i)tinyurl",
    r"(?i)(^|\.)t\.co(\.|$)",
    r"(?i)discord(app)?\.gift",
    r"(?i)steamcommunity\.",
    r"(?i)\.(tk|ml|ga|cf|gq)$",
];

/// Result of situation selection.
#[derive(Debug, Clone, PartialEq)]
pub struct SituationContext {
    pub situation: Situation,
    pub has_images: bool,
    pub has_aux_text: bool,
    pub aux_text: Option<String>,
    pub urls: Vec<String>,
    /// Set when a channel policy drove the choice.
    pub policy_kind: Option<PolicyKind>,
}

/// Keyword and URL heuristics used to pick a situation.
pub struct SituationSelector {
    scam_keywords: Vec<String>,
    suspicious_hosts: Vec<Regex>,
}

impl SituationSelector {
    /// Selector with the built-in keyword and host lists.
    pub fn default_rules() -> Self {
        Self {
            scam_keywords: DEFAULT_SCAM_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            suspicious_hosts: DEFAULT_SUSPICIOUS_HOSTS
                .iter()
                .map(|p| Regex::new(p).expect("static suspicious host pattern"))
                .collect(),
        }
    }

    /// Selector with no heuristics (only policy and aux text apply).
    pub fn empty() -> Self {
        Self {
            scam_keywords: Vec::new(),
            suspicious_hosts: Vec::new(),
        }
    }

    /// Add a case-insensitive scam keyword.
    pub fn add_keyword(&mut self, keyword: &str) {
        self.scam_keywords.push(keyword.to_lowercase());
    }

    /// Add a regex matched against URL hosts.
    pub fn add_suspicious_host(&mut self, pattern: &str) -> Result<(), regex::Error> {
        self.suspicious_hosts.push(Regex::new(pattern)?);
        Ok(())
    }

    pub fn select(
        &self,
        content: &str,
        attachments: &[Attachment],
        urls: &[String],
        aux_text: Option<&str>,
        policies: &[ChannelPolicy],
    ) -> SituationContext {
        let aux_text = aux_text.filter(|t| !t.is_empty()).map(str::to_string);
        let mut context = SituationContext {
            situation: Situation::Generic,
            has_images: attachments.iter().any(Attachment::is_image),
            has_aux_text: aux_text.is_some(),
            aux_text,
            urls: urls.to_vec(),
            policy_kind: None,
        };

        if let Some(policy) = policies
            .iter()
            .find(|p| p.enabled && p.kind.is_restricted_value())
        {
            context.situation = Situation::PolicyRestricted;
            context.policy_kind = Some(policy.kind);
        } else if context.has_aux_text {
            context.situation = Situation::ImageWithCode;
        } else if self.has_scam_keyword(content) || self.has_suspicious_url(urls) {
            context.situation = Situation::ScamText;
        }

        debug!(
            situation = %context.situation,
            has_images = context.has_images,
            has_aux_text = context.has_aux_text,
            url_count = context.urls.len(),
            "Selected situation"
        );
        context
    }

    fn has_scam_keyword(&self, content: &str) -> bool {
        let lower = content.to_lowercase();
        self.scam_keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    fn has_suspicious_url(&self, urls: &[String]) -> bool {
        urls.iter().any(|url| {
            let host = url_host(url);
            self.suspicious_hosts.iter().any(|re| re.is_match(host))
        })
    }
}

impl Default for SituationSelector {
    fn default() -> Self {
        Self::default_rules()
    }
}

/// Host part of an `http(s)://` URL, without userinfo or port.
fn url_host(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest
        .split(|c: char| matches!(c, '/' | '?' | '#'))
        .next()
        .unwrap_or(rest);
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    host.split(':').next().unwrap_or(host)
}
