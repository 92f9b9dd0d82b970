//! Collaborator interfaces the pipeline consults per message.
//!
//! Guild configuration, channel policies and custom prompts live outside this
//! crate; these traits are the seams. `MemoryStore` backs all three for the
//! CLI harness and tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::pipeline::types::{Attachment, ChannelPolicy, Situation};

/// Channel policies configured for a channel.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn channel_policies(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<Vec<ChannelPolicy>, StoreError>;
}

/// Per-guild prompt overrides.
#[async_trait]
pub trait PromptStore: Send + Sync {
    /// Custom base prompt for a situation, if the guild configured one.
    async fn custom_prompt(
        &self,
        guild_id: &str,
        situation: Situation,
    ) -> Result<Option<String>, StoreError>;
}

/// Per-guild scanning and enforcement settings.
#[async_trait]
pub trait GuildSettings: Send + Sync {
    /// Whether messages in this guild are scanned at all.
    async fn scan_enabled(&self, guild_id: &str) -> Result<bool, StoreError>;

    /// Whether the author, or one of their roles, is exempt from scanning.
    async fn is_exempt(
        &self,
        guild_id: &str,
        author_id: &str,
        role_ids: &[String],
    ) -> Result<bool, StoreError>;

    /// Whether flagged messages may be enforced without review.
    async fn auto_mode_enabled(&self, guild_id: &str) -> Result<bool, StoreError>;
}

/// Decodes machine-readable payloads (QR codes) from image attachments.
#[async_trait]
pub trait AuxDecoder: Send + Sync {
    /// Decoded text, or `None` when nothing was found. Never fails the pipeline.
    async fn decode(&self, attachments: &[Attachment]) -> Option<String>;
}

/// Decoder that never finds anything.
pub struct NoAuxDecoder;

#[async_trait]
impl AuxDecoder for NoAuxDecoder {
    async fn decode(&self, _attachments: &[Attachment]) -> Option<String> {
        None
    }
}

// ── In-memory store ─────────────────────────────────────────────────

/// In-memory policy, prompt and guild-settings store.
///
/// Guilds scan by default; auto-mode is off by default.
#[derive(Default)]
pub struct MemoryStore {
    policies: RwLock<HashMap<(String, String), Vec<ChannelPolicy>>>,
    prompts: RwLock<HashMap<(String, Situation), String>>,
    auto_mode: RwLock<HashMap<String, bool>>,
    scan_disabled: RwLock<HashSet<String>>,
    /// (guild id, user or role id)
    exempt: RwLock<HashSet<(String, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_channel_policies(
        &self,
        guild_id: &str,
        channel_id: &str,
        policies: Vec<ChannelPolicy>,
    ) {
        self.policies
            .write()
            .await
            .insert((guild_id.to_string(), channel_id.to_string()), policies);
    }

    pub async fn set_custom_prompt(&self, guild_id: &str, situation: Situation, prompt: &str) {
        self.prompts
            .write()
            .await
            .insert((guild_id.to_string(), situation), prompt.to_string());
    }

    pub async fn set_auto_mode(&self, guild_id: &str, enabled: bool) {
        self.auto_mode
            .write()
            .await
            .insert(guild_id.to_string(), enabled);
    }

    pub async fn set_scan_enabled(&self, guild_id: &str, enabled: bool) {
        let mut disabled = self.scan_disabled.write().await;
        if enabled {
            disabled.remove(guild_id);
        } else {
            disabled.insert(guild_id.to_string());
        }
    }

    /// Exempt a user id or role id from scanning in `guild_id`.
    pub async fn add_exemption(&self, guild_id: &str, user_or_role_id: &str) {
        self.exempt
            .write()
            .await
            .insert((guild_id.to_string(), user_or_role_id.to_string()));
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn channel_policies(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<Vec<ChannelPolicy>, StoreError> {
        Ok(self
            .policies
            .read()
            .await
            .get(&(guild_id.to_string(), channel_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl PromptStore for MemoryStore {
    async fn custom_prompt(
        &self,
        guild_id: &str,
        situation: Situation,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .prompts
            .read()
            .await
            .get(&(guild_id.to_string(), situation))
            .cloned())
    }
}

#[async_trait]
impl GuildSettings for MemoryStore {
    async fn scan_enabled(&self, guild_id: &str) -> Result<bool, StoreError> {
        Ok(!self.scan_disabled.read().await.contains(guild_id))
    }

    async fn is_exempt(
        &self,
        guild_id: &str,
        author_id: &str,
        role_ids: &[String],
    ) -> Result<bool, StoreError> {
        let exempt = self.exempt.read().await;
        let hit = |id: &str| exempt.contains(&(guild_id.to_string(), id.to_string()));
        Ok(hit(author_id) || role_ids.iter().any(|r| hit(r.as_str())))
    }

    async fn auto_mode_enabled(&self, guild_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .auto_mode
            .read()
            .await
            .get(guild_id)
            .copied()
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::PolicyKind;

    #[tokio::test]
    async fn policies_scoped_by_guild_and_channel() {
        let store = MemoryStore::new();
        store
            .set_channel_policies("g1", "c1", vec![ChannelPolicy::new(PolicyKind::RedPacket)])
            .await;

        let found = store.channel_policies("g1", "c1").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, PolicyKind::RedPacket);
        assert!(store.channel_policies("g1", "c2").await.unwrap().is_empty());
        assert!(store.channel_policies("g2", "c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn custom_prompt_per_situation() {
        let store = MemoryStore::new();
        store
            .set_custom_prompt("g1", Situation::ScamText, "Be strict about crypto.")
            .await;
        assert_eq!(
            store.custom_prompt("g1", Situation::ScamText).await.unwrap().as_deref(),
            Some("Be strict about crypto.")
        );
        assert!(store.custom_prompt("g1", Situation::Generic).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn auto_mode_defaults_off() {
        let store = MemoryStore::new();
        assert!(!store.auto_mode_enabled("g1").await.unwrap());
        store.set_auto_mode("g1", true).await;
        assert!(store.auto_mode_enabled("g1").await.unwrap());
    }

    #[tokio::test]
    async fn scanning_on_unless_disabled() {
        let store = MemoryStore::new();
        assert!(store.scan_enabled("g1").await.unwrap());
        store.set_scan_enabled("g1", false).await;
        assert!(!store.scan_enabled("g1").await.unwrap());
        assert!(store.scan_enabled("g2").await.unwrap());
        store.set_scan_enabled("g1", true).await;
        assert!(store.scan_enabled("g1").await.unwrap());
    }

    #[tokio::test]
    async fn exemption_by_user_or_role() {
        let store = MemoryStore::new();
        store.add_exemption("g1", "mod-user").await;
        store.add_exemption("g1", "role-staff").await;

        assert!(store.is_exempt("g1", "mod-user", &[]).await.unwrap());
        assert!(
            store
                .is_exempt("g1", "someone", &["role-staff".to_string()])
                .await
                .unwrap()
        );
        assert!(!store.is_exempt("g1", "someone", &["role-member".to_string()]).await.unwrap());
        assert!(!store.is_exempt("g2", "mod-user", &[]).await.unwrap());
    }

    #[tokio::test]
    async fn no_decoder_finds_nothing() {
        let attachments = vec![Attachment {
            name: Some("qr.png".into()),
            ..Default::default()
        }];
        assert!(NoAuxDecoder.decode(&attachments).await.is_none());
    }
}
