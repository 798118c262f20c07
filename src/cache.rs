//! Process-local conversation cache.
//!
//! Holds one ordered, deduplicated message log per conversation together
//! with the sync cursor (highest merged message id) used for incremental
//! fetches. All mutation goes through [`ConversationCache`]; the transport
//! is injected through [`MessageGateway`] so the merge discipline can be
//! exercised without a server.

use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::api::{ApiError, Message};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("could not load messages: {0}")]
    Fetch(#[source] ApiError),
    #[error("could not send message: {0}")]
    Send(#[source] ApiError),
    #[error("a message needs text or an image")]
    EmptyMessage,
}

/// Identity of a message thread: the single org-wide channel, a custom
/// group chat, or a 1:1 direct exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConversationKey {
    OrgWide,
    CustomGroup { group_id: i64 },
    Direct { peer_user_id: i64 },
}

impl ConversationKey {
    /// Stable string form used as the cache key.
    pub fn cache_key(&self) -> String {
        match self {
            ConversationKey::OrgWide => "group".to_string(),
            ConversationKey::CustomGroup { group_id } => format!("group-{group_id}"),
            ConversationKey::Direct { peer_user_id } => format!("pm-{peer_user_id}"),
        }
    }
}

/// An outgoing message before server confirmation: optional text, optional
/// image file. At least one must be present for a send to go out.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub text: Option<String>,
    pub image: Option<PathBuf>,
}

impl Draft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        let no_text = self
            .text
            .as_deref()
            .map(str::trim)
            .is_none_or(str::is_empty);
        no_text && self.image.is_none()
    }
}

/// Remote side of the cache. Implemented by [`crate::api::AuthorizedClient`]
/// against the real service and by in-process mocks in tests.
pub trait MessageGateway {
    async fn fetch_messages(
        &self,
        conversation: &ConversationKey,
        after_id: i64,
    ) -> Result<Vec<Message>, ApiError>;

    async fn post_message(
        &self,
        conversation: &ConversationKey,
        draft: &Draft,
    ) -> Result<Message, ApiError>;
}

#[derive(Debug, Default)]
struct ConversationLog {
    messages: Vec<Message>,
    cursor: i64,
}

impl ConversationLog {
    /// Dedup-by-id merge: inserts each incoming message at its id-sorted
    /// position unless that id is already present, then advances the
    /// cursor to the highest id seen. Idempotent, so overlapping poll
    /// responses and racing fetches are harmless.
    fn merge(&mut self, incoming: Vec<Message>) -> Vec<Message> {
        let mut added = Vec::new();
        for message in incoming {
            match self
                .messages
                .binary_search_by_key(&message.id, |existing| existing.id)
            {
                Ok(_) => {}
                Err(position) => {
                    self.messages.insert(position, message.clone());
                    added.push(message);
                }
            }
        }
        if let Some(last) = self.messages.last() {
            self.cursor = self.cursor.max(last.id);
        }
        added
    }

    fn replace(&mut self, mut messages: Vec<Message>) {
        messages.sort_by_key(|message| message.id);
        messages.dedup_by_key(|message| message.id);
        self.cursor = messages.last().map(|message| message.id).unwrap_or(0);
        self.messages = messages;
    }
}

pub struct ConversationCache<G> {
    gateway: G,
    logs: HashMap<String, ConversationLog>,
}

impl<G: MessageGateway> ConversationCache<G> {
    pub fn new(gateway: G) -> Self {
        Self {
            gateway,
            logs: HashMap::new(),
        }
    }

    /// Full fetch for a conversation: replaces the log and resets the
    /// cursor to the last message id (0 when the log comes back empty).
    /// On failure the log keeps whatever it held before.
    pub async fn load_initial(
        &mut self,
        conversation: &ConversationKey,
    ) -> Result<&[Message], CacheError> {
        let messages = self
            .gateway
            .fetch_messages(conversation, 0)
            .await
            .map_err(CacheError::Fetch)?;
        let log = self.logs.entry(conversation.cache_key()).or_default();
        log.replace(messages);
        Ok(&log.messages)
    }

    /// Incremental fetch with `after_id = cursor`, merged dedup-by-id.
    /// Returns the messages that were actually new. Callers on a poll
    /// timer are expected to log failures and wait for the next tick.
    pub async fn poll(
        &mut self,
        conversation: &ConversationKey,
    ) -> Result<Vec<Message>, CacheError> {
        let cursor = self.cursor(conversation);
        let messages = self
            .gateway
            .fetch_messages(conversation, cursor)
            .await
            .map_err(CacheError::Fetch)?;
        let log = self.logs.entry(conversation.cache_key()).or_default();
        Ok(log.merge(messages))
    }

    /// Confirmation-first send: nothing is appended until the server
    /// returns the message with its assigned id, so a failed send leaves
    /// the log exactly as it was. Empty drafts are rejected before any
    /// network call.
    pub async fn send(
        &mut self,
        conversation: &ConversationKey,
        draft: &Draft,
    ) -> Result<Message, CacheError> {
        if draft.is_empty() {
            return Err(CacheError::EmptyMessage);
        }
        let message = self
            .gateway
            .post_message(conversation, draft)
            .await
            .map_err(CacheError::Send)?;
        let log = self.logs.entry(conversation.cache_key()).or_default();
        log.merge(vec![message.clone()]);
        Ok(message)
    }

    pub fn messages(&self, conversation: &ConversationKey) -> &[Message] {
        self.logs
            .get(&conversation.cache_key())
            .map(|log| log.messages.as_slice())
            .unwrap_or(&[])
    }

    pub fn cursor(&self, conversation: &ConversationKey) -> i64 {
        self.logs
            .get(&conversation.cache_key())
            .map(|log| log.cursor)
            .unwrap_or(0)
    }
}
