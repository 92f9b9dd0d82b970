//! Message processor: turns inbound chat messages into scan verdicts.
//!
//! **Core invariant: enforcement only through the decision gate.**
//! A message is auto-actioned only when it is flagged, its guild has
//! auto-mode on, and `should_auto_act` accepts the response. Everything
//! else that clears the flag threshold goes to human review.
//!
//! Flow:
//! 1. Eligibility (guild, bot author, guild settings, dedupe) → may skip
//! 2. Auxiliary decoding + channel policies → situation selection
//! 3. Sanitised request → scan queue
//! 4. Flag threshold → decision gate

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_FLAG_THRESHOLD;
use crate::pipeline::decision::{Severity, should_auto_act};
use crate::pipeline::dedupe::DedupeCache;
use crate::pipeline::queue::ScanQueue;
use crate::pipeline::situation::SituationSelector;
use crate::pipeline::stores::{AuxDecoder, GuildSettings, NoAuxDecoder, PolicyStore};
use crate::pipeline::types::{
    InboundMessage, MESSAGE_SNIPPET_MAX_LENGTH, QueuedResult, ScanRequest, Situation,
};
use crate::safety::{extract_urls, sanitize_message_content};

/// Why a message was not scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotInGuild,
    BotAuthor,
    ScanDisabled,
    Exempt,
    EmptyMessage,
    AlreadyProcessed,
    /// Edit event whose text did not change.
    ContentUnchanged,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInGuild => "not in guild",
            Self::BotAuthor => "author is bot",
            Self::ScanDisabled => "scanning disabled for guild",
            Self::Exempt => "author or role exempt",
            Self::EmptyMessage => "empty message",
            Self::AlreadyProcessed => "message already processed",
            Self::ContentUnchanged => "content unchanged",
        }
    }
}

/// Verdict for a message that reached the scan queue.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub message_id: String,
    pub guild_id: String,
    pub channel_id: String,
    pub situation: Situation,
    /// Decoded auxiliary text, surfaced to reviewers.
    pub aux_text: Option<String>,
    pub result: QueuedResult,
    /// Score cleared the flag threshold; route to human review.
    pub flagged: bool,
    /// Decision gate passed in an auto-mode guild; enforce `recommended_action`.
    pub auto_action: bool,
    pub severity: Option<Severity>,
}

/// Result of processing one message.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Skipped(SkipReason),
    Scanned(Box<ScanReport>),
}

impl ProcessOutcome {
    pub fn report(&self) -> Option<&ScanReport> {
        match self {
            Self::Scanned(report) => Some(&**report),
            Self::Skipped(_) => None,
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Self::Skipped(reason) => Some(*reason),
            Self::Scanned(_) => None,
        }
    }

    pub fn is_flagged(&self) -> bool {
        self.report().is_some_and(|r| r.flagged)
    }
}

/// Message processor: eligibility, request building, queueing, gating.
pub struct MessageProcessor {
    queue: ScanQueue,
    dedupe: Arc<DedupeCache>,
    selector: SituationSelector,
    policies: Arc<dyn PolicyStore>,
    settings: Arc<dyn GuildSettings>,
    decoder: Arc<dyn AuxDecoder>,
    flag_threshold: u8,
}

impl MessageProcessor {
    pub fn new(
        queue: ScanQueue,
        dedupe: Arc<DedupeCache>,
        policies: Arc<dyn PolicyStore>,
        settings: Arc<dyn GuildSettings>,
    ) -> Self {
        Self {
            queue,
            dedupe,
            selector: SituationSelector::default_rules(),
            policies,
            settings,
            decoder: Arc::new(NoAuxDecoder),
            flag_threshold: DEFAULT_FLAG_THRESHOLD,
        }
    }

    pub fn with_selector(mut self, selector: SituationSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn AuxDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_flag_threshold(mut self, threshold: u8) -> Self {
        self.flag_threshold = threshold;
        self
    }

    pub fn queue(&self) -> &ScanQueue {
        &self.queue
    }

    /// Process a newly posted message through the full pipeline.
    pub async fn process(&self, message: &InboundMessage) -> ProcessOutcome {
        let guild_id = match self.eligibility(message).await {
            Ok(guild_id) => guild_id,
            Err(reason) => {
                debug!(id = %message.id, reason = reason.as_str(), "Skipping message");
                return ProcessOutcome::Skipped(reason);
            }
        };

        let aux_text = if message.attachments.iter().any(|a| a.is_image()) {
            self.decoder.decode(&message.attachments).await
        } else {
            None
        };

        let policies = match self
            .policies
            .channel_policies(guild_id, &message.channel_id)
            .await
        {
            Ok(policies) => policies,
            Err(e) => {
                warn!(
                    guild_id = %guild_id,
                    channel_id = %message.channel_id,
                    error = %e,
                    "Channel policy lookup failed, scanning without policies"
                );
                Vec::new()
            }
        };

        let urls = extract_urls(&message.content);
        let context = self.selector.select(
            &message.content,
            &message.attachments,
            &urls,
            aux_text.as_deref(),
            &policies,
        );

        let request = ScanRequest::new(
            guild_id,
            context.situation,
            &sanitize_message_content(&message.content, MESSAGE_SNIPPET_MAX_LENGTH),
        )
        .with_urls(context.urls.clone())
        .with_aux_text(context.aux_text.clone());

        debug!(
            id = %message.id,
            scan_id = %request.scan_id(),
            guild_id = %guild_id,
            situation = %context.situation,
            has_images = context.has_images,
            has_aux_text = context.has_aux_text,
            url_count = context.urls.len(),
            "Queueing message for scan"
        );

        let result = self.queue.submit(request).await;
        self.decide(message, guild_id, context.situation, context.aux_text, result)
            .await
    }

    /// Re-scan an edited message. `old_content` is `None` when the previous
    /// text is unknown, which always counts as a change.
    pub async fn process_edit(
        &self,
        old_content: Option<&str>,
        message: &InboundMessage,
    ) -> ProcessOutcome {
        if message.guild_id.is_none() {
            return ProcessOutcome::Skipped(SkipReason::NotInGuild);
        }
        if old_content == Some(message.content.as_str()) {
            return ProcessOutcome::Skipped(SkipReason::ContentUnchanged);
        }

        self.dedupe.remove(&message.id);
        debug!(id = %message.id, channel_id = %message.channel_id, "Message edited, re-scanning");
        self.process(message).await
    }

    /// Process several messages concurrently; the queue bounds provider load.
    pub async fn process_batch(&self, messages: &[InboundMessage]) -> Vec<ProcessOutcome> {
        let count = messages.len();
        info!(count, "Processing message batch");

        let outcomes = join_all(messages.iter().map(|m| self.process(m))).await;

        let flagged = outcomes.iter().filter(|o| o.is_flagged()).count();
        let skipped = outcomes.iter().filter(|o| o.skip_reason().is_some()).count();
        info!(total = count, flagged, skipped, "Batch processing complete");
        outcomes
    }

    /// Guild id of an eligible message, or why it is skipped.
    ///
    /// Marks the message in the dedupe cache as its last step.
    async fn eligibility<'m>(&self, message: &'m InboundMessage) -> Result<&'m str, SkipReason> {
        let Some(guild_id) = message.guild_id.as_deref() else {
            return Err(SkipReason::NotInGuild);
        };
        if message.author_is_bot {
            return Err(SkipReason::BotAuthor);
        }

        match self.settings.scan_enabled(guild_id).await {
            Ok(true) => {}
            Ok(false) => return Err(SkipReason::ScanDisabled),
            Err(e) => {
                warn!(guild_id = %guild_id, error = %e, "Scan setting lookup failed, scanning anyway");
            }
        }

        match self
            .settings
            .is_exempt(guild_id, &message.author_id, &message.author_role_ids)
            .await
        {
            Ok(true) => return Err(SkipReason::Exempt),
            Ok(false) => {}
            Err(e) => {
                warn!(guild_id = %guild_id, error = %e, "Exemption lookup failed, scanning anyway");
            }
        }

        if message.content.trim().is_empty() && message.attachments.is_empty() {
            return Err(SkipReason::EmptyMessage);
        }

        if !self.dedupe.try_mark(&message.id) {
            return Err(SkipReason::AlreadyProcessed);
        }
        Ok(guild_id)
    }

    /// Apply the flag threshold, then the decision gate.
    async fn decide(
        &self,
        message: &InboundMessage,
        guild_id: &str,
        situation: Situation,
        aux_text: Option<String>,
        result: QueuedResult,
    ) -> ProcessOutcome {
        let response = &result.response;

        if let Some(rejection) = result.rejection {
            warn!(
                id = %message.id,
                guild_id = %guild_id,
                rejection = ?rejection,
                "Scan not run"
            );
        } else {
            info!(
                id = %message.id,
                guild_id = %guild_id,
                success = result.success,
                score = response.score,
                confidence = response.confidence,
                queue_ms = result.queue_time.as_millis() as u64,
                process_ms = result.process_time.as_millis() as u64,
                "Message scanned"
            );
        }

        let flagged = result.success
            && result.rejection.is_none()
            && response.score >= self.flag_threshold;
        let auto_action = flagged
            && should_auto_act(response)
            && self.auto_mode_enabled(guild_id).await;

        if flagged {
            info!(
                id = %message.id,
                channel_id = %message.channel_id,
                score = response.score,
                action = response.recommended_action.as_str(),
                auto_action,
                "Message flagged for review"
            );
        } else {
            debug!(id = %message.id, score = response.score, "Message below flag threshold");
        }

        let severity = Severity::of(response);
        ProcessOutcome::Scanned(Box::new(ScanReport {
            message_id: message.id.clone(),
            guild_id: guild_id.to_string(),
            channel_id: message.channel_id.clone(),
            situation,
            aux_text,
            result,
            flagged,
            auto_action,
            severity,
        }))
    }

    async fn auto_mode_enabled(&self, guild_id: &str) -> bool {
        match self.settings.auto_mode_enabled(guild_id).await {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!(guild_id = %guild_id, error = %e, "Auto-mode lookup failed, treating as off");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::config::{QueueConfig, RetryPolicy};
    use crate::error::{LlmError, StoreError};
    use crate::llm::{ModelRequest, ModelTransport, Scanner};
    use crate::pipeline::stores::MemoryStore;
    use crate::pipeline::types::{Attachment, ChannelPolicy, PolicyKind, RecommendedAction};

    fn reply(score: u8, confidence: f64, risk: &str, action: &str) -> String {
        format!(
            r#"{{"score":{score},"categories":["phishing"],"explanation":"test verdict","recommended_action":"{action}","confidence":{confidence},"false_positive_risk":"{risk}","evidence":[]}}"#
        )
    }

    /// Returns a fixed reply and records every request.
    struct MockTransport {
        reply: String,
        seen: Mutex<Vec<ModelRequest>>,
    }

    impl MockTransport {
        fn new(reply: String) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        fn last_user_content(&self) -> String {
            self.seen
                .lock()
                .unwrap()
                .last()
                .map(|r| r.user_content.clone())
                .unwrap_or_default()
        }

        fn last_system_prompt(&self) -> String {
            self.seen
                .lock()
                .unwrap()
                .last()
                .map(|r| r.system_prompt.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl ModelTransport for MockTransport {
        fn provider_name(&self) -> &str {
            "mock"
        }

        fn model_name(&self) -> &str {
            "mock-1"
        }

        async fn generate(&self, request: &ModelRequest) -> Result<String, LlmError> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(self.reply.clone())
        }

        async fn health_check(&self) -> Result<(), LlmError> {
            Ok(())
        }
    }

    /// Decoder returning a fixed payload for any attachments.
    struct FixedDecoder(&'static str);

    #[async_trait]
    impl AuxDecoder for FixedDecoder {
        async fn decode(&self, _attachments: &[Attachment]) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    /// Settings store where every lookup fails.
    struct BrokenSettings;

    #[async_trait]
    impl GuildSettings for BrokenSettings {
        async fn scan_enabled(&self, _guild_id: &str) -> Result<bool, StoreError> {
            Err(StoreError::Lookup("db down".into()))
        }

        async fn is_exempt(
            &self,
            _guild_id: &str,
            _author_id: &str,
            _role_ids: &[String],
        ) -> Result<bool, StoreError> {
            Err(StoreError::Lookup("db down".into()))
        }

        async fn auto_mode_enabled(&self, _guild_id: &str) -> Result<bool, StoreError> {
            Err(StoreError::Lookup("db down".into()))
        }
    }

    fn setup(reply: String) -> (MessageProcessor, Arc<MockTransport>, Arc<MemoryStore>) {
        let transport = MockTransport::new(reply);
        let store = Arc::new(MemoryStore::new());
        let processor = build(transport.clone(), store.clone(), store.clone());
        (processor, transport, store)
    }

    fn build(
        transport: Arc<MockTransport>,
        policies: Arc<dyn PolicyStore>,
        settings: Arc<dyn GuildSettings>,
    ) -> MessageProcessor {
        let scanner = Arc::new(Scanner::new(transport, Duration::from_secs(5)));
        let queue = ScanQueue::new(scanner, QueueConfig::default(), RetryPolicy::default());
        let dedupe = Arc::new(DedupeCache::new(Duration::from_secs(60), 1000));
        MessageProcessor::new(queue, dedupe, policies, settings)
    }

    fn message(id: &str, content: &str) -> InboundMessage {
        InboundMessage::new(id, Some("g1"), "c1", "u1", content)
    }

    #[tokio::test]
    async fn direct_message_skipped() {
        let (processor, transport, _) = setup(reply(10, 0.9, "low", "none"));
        let dm = InboundMessage::new("m1", None, "dm", "u1", "hello");
        assert_eq!(
            processor.process(&dm).await.skip_reason(),
            Some(SkipReason::NotInGuild)
        );
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn bot_author_skipped() {
        let (processor, transport, _) = setup(reply(10, 0.9, "low", "none"));
        let outcome = processor.process(&message("m1", "beep").from_bot()).await;
        assert_eq!(outcome.skip_reason(), Some(SkipReason::BotAuthor));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn empty_message_skipped_but_attachment_only_scanned() {
        let (processor, transport, _) = setup(reply(10, 0.9, "low", "none"));
        assert_eq!(
            processor.process(&message("m1", "   ")).await.skip_reason(),
            Some(SkipReason::EmptyMessage)
        );

        let with_file = message("m2", "").with_attachments(vec![Attachment {
            name: Some("doc.pdf".into()),
            ..Default::default()
        }]);
        assert!(processor.process(&with_file).await.report().is_some());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn disabled_guild_and_exempt_author_skipped() {
        let (processor, transport, store) = setup(reply(10, 0.9, "low", "none"));
        store.add_exemption("g1", "role-mod").await;
        let exempt = message("m1", "hello").with_author_roles(vec!["role-mod".into()]);
        assert_eq!(
            processor.process(&exempt).await.skip_reason(),
            Some(SkipReason::Exempt)
        );

        store.set_scan_enabled("g1", false).await;
        assert_eq!(
            processor.process(&message("m2", "hello")).await.skip_reason(),
            Some(SkipReason::ScanDisabled)
        );
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn duplicate_delivery_scanned_once() {
        let (processor, transport, _) = setup(reply(10, 0.9, "low", "none"));
        let msg = message("m1", "hello");
        assert!(processor.process(&msg).await.report().is_some());
        assert_eq!(
            processor.process(&msg).await.skip_reason(),
            Some(SkipReason::AlreadyProcessed)
        );
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn below_threshold_not_flagged() {
        let (processor, _, _) = setup(reply(29, 0.9, "low", "log_only"));
        let outcome = processor.process(&message("m1", "hello")).await;
        let report = outcome.report().unwrap();
        assert!(report.result.success);
        assert!(!report.flagged);
        assert!(!report.auto_action);
    }

    #[tokio::test]
    async fn threshold_is_inclusive_and_configurable() {
        let (processor, _, _) = setup(reply(30, 0.9, "low", "log_only"));
        assert!(processor.process(&message("m1", "hello")).await.is_flagged());

        let (processor, _, _) = setup(reply(30, 0.9, "low", "log_only"));
        let processor = processor.with_flag_threshold(50);
        assert!(!processor.process(&message("m1", "hello")).await.is_flagged());
    }

    #[tokio::test]
    async fn failed_scan_never_flagged_even_at_zero_threshold() {
        let (processor, transport, _) = setup("garbage".to_string());
        let processor = processor.with_flag_threshold(0);
        let outcome = processor.process(&message("m1", "hello")).await;
        let report = outcome.report().unwrap();
        assert!(!report.result.success);
        assert!(!report.flagged);
        assert!(!report.auto_action);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn auto_action_requires_guild_auto_mode() {
        let (processor, _, store) = setup(reply(95, 0.95, "low", "delete"));
        let report = processor.process(&message("m1", "scam")).await;
        let report = report.report().unwrap();
        assert!(report.flagged);
        assert!(!report.auto_action);
        assert_eq!(report.severity, Some(Severity::High));

        store.set_auto_mode("g1", true).await;
        let outcome = processor.process(&message("m2", "scam")).await;
        let report = outcome.report().unwrap();
        assert!(report.auto_action);
        assert_eq!(
            report.result.response.recommended_action,
            RecommendedAction::Delete
        );
    }

    #[tokio::test]
    async fn high_risk_verdict_never_auto_acts() {
        let (processor, _, store) = setup(reply(95, 0.95, "high", "delete"));
        store.set_auto_mode("g1", true).await;
        let outcome = processor.process(&message("m1", "scam")).await;
        let report = outcome.report().unwrap();
        assert!(report.flagged);
        assert!(!report.auto_action);
    }

    #[tokio::test]
    async fn store_failures_fail_open_for_scanning_and_closed_for_enforcement() {
        let transport = MockTransport::new(reply(95, 0.95, "low", "delete"));
        let processor = build(
            transport.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(BrokenSettings),
        );
        let outcome = processor.process(&message("m1", "scam")).await;
        let report = outcome.report().unwrap();
        assert!(report.flagged);
        assert!(!report.auto_action);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn restricted_policy_selects_policy_prompt() {
        let (processor, transport, store) = setup(reply(85, 0.9, "low", "delete"));
        store
            .set_channel_policies("g1", "c1", vec![ChannelPolicy::new(PolicyKind::RedPacket)])
            .await;
        let outcome = processor
            .process(&message("m1", "got 50 USDT from that code"))
            .await;
        assert_eq!(outcome.report().unwrap().situation, Situation::PolicyRestricted);
        assert!(transport.last_system_prompt().contains("red packet"));
    }

    #[tokio::test]
    async fn image_with_decoded_code_selects_image_situation() {
        let (processor, transport, _) = setup(reply(60, 0.8, "medium", "warn_dm"));
        let processor = processor.with_decoder(Arc::new(FixedDecoder("bitcoin:1abc")));
        let msg = message("m1", "scan me").with_attachments(vec![Attachment {
            name: Some("qr.png".into()),
            ..Default::default()
        }]);

        let outcome = processor.process(&msg).await;
        let report = outcome.report().unwrap();
        assert_eq!(report.situation, Situation::ImageWithCode);
        assert_eq!(report.aux_text.as_deref(), Some("bitcoin:1abc"));
        assert!(transport.last_user_content().contains("DECODED_CONTENT: bitcoin:1abc"));
    }

    #[tokio::test]
    async fn decoder_not_consulted_without_images() {
        let (processor, transport, _) = setup(reply(10, 0.9, "low", "none"));
        let processor = processor.with_decoder(Arc::new(FixedDecoder("should not appear")));
        let outcome = processor.process(&message("m1", "plain text")).await;
        assert_eq!(outcome.report().unwrap().situation, Situation::Generic);
        assert!(!transport.last_user_content().contains("DECODED_CONTENT"));
    }

    #[tokio::test]
    async fn secrets_redacted_before_leaving_process() {
        let (processor, transport, _) = setup(reply(10, 0.9, "low", "none"));
        let key = format!("sk-{}", "x".repeat(40));
        processor
            .process(&message("m1", &format!("my key is {key} lol")))
            .await;
        let sent = transport.last_user_content();
        assert!(!sent.contains(&key));
        assert!(sent.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn edit_with_same_content_ignored() {
        let (processor, transport, _) = setup(reply(10, 0.9, "low", "none"));
        let msg = message("m1", "hello");
        processor.process(&msg).await;

        let outcome = processor.process_edit(Some("hello"), &msg).await;
        assert_eq!(outcome.skip_reason(), Some(SkipReason::ContentUnchanged));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn edit_with_new_content_rescanned() {
        let (processor, transport, _) = setup(reply(10, 0.9, "low", "none"));
        processor.process(&message("m1", "hello")).await;

        let edited = message("m1", "hello, claim your airdrop at https://bit.ly/x");
        let outcome = processor.process_edit(Some("hello"), &edited).await;
        assert_eq!(outcome.report().unwrap().situation, Situation::ScamText);
        assert_eq!(transport.calls(), 2);

        // Unknown previous content counts as a change.
        let outcome = processor.process_edit(None, &edited).await;
        assert!(outcome.report().is_some());
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn batch_processes_each_message() {
        let (processor, transport, _) = setup(reply(40, 0.6, "medium", "warn_dm"));
        let messages = vec![
            message("m1", "one"),
            message("m2", "two").from_bot(),
            message("m3", "three"),
        ];
        let outcomes = processor.process_batch(&messages).await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_flagged());
        assert_eq!(outcomes[1].skip_reason(), Some(SkipReason::BotAuthor));
        assert_eq!(
            outcomes[2].report().unwrap().severity,
            Some(Severity::Medium)
        );
        assert_eq!(transport.calls(), 2);
    }
}
