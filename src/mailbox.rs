//! The remote mailbox as seen by the challenge engine.
//!
//! The engine only talks to a [`Mailbox`]; `GmailClient` is the production
//! implementation and tests use an in-memory one.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{Label, LabelSet, Message, Thread};
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub id: String,
    pub thread_id: String,
}

/// Messages carrying every `include` label, none of the `exclude` labels,
/// and, when set, sent by `from`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageQuery {
    pub include: Vec<Label>,
    pub exclude: Vec<Label>,
    pub from: Option<String>,
}

impl MessageQuery {
    pub fn labelled(label: &Label) -> Self {
        Self {
            include: vec![label.clone()],
            ..Self::default()
        }
    }

    pub fn without(mut self, label: &Label) -> Self {
        self.exclude.push(label.clone());
        self
    }

    pub fn from_sender(mut self, address: &str) -> Self {
        self.from = Some(address.to_string());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelChange {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl LabelChange {
    pub fn add<S: Into<String>>(mut self, id: S) -> Self {
        self.add.push(id.into());
        self
    }

    pub fn remove<S: Into<String>>(mut self, id: S) -> Self {
        self.remove.push(id.into());
        self
    }
}

/// A plain-text message sent into an existing thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub thread_id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub in_reply_to: Option<String>,
}

#[async_trait]
pub trait Mailbox: Send + Sync {
    async fn list_labels(&self) -> Result<Vec<Label>>;

    /// All matching messages; implementations follow pagination to the end.
    async fn search_messages(&self, query: &MessageQuery) -> Result<Vec<MessageRef>>;

    async fn get_message(&self, id: &str) -> Result<Message>;

    async fn get_thread(&self, id: &str) -> Result<Thread>;

    async fn modify_message_labels(&self, id: &str, change: &LabelChange) -> Result<()>;

    async fn modify_thread_labels(&self, id: &str, change: &LabelChange) -> Result<()>;

    /// Returns the provider ID of the sent message.
    async fn send_message(&self, message: &OutgoingMessage) -> Result<String>;
}

impl LabelSet {
    /// Maps the configured label names onto the mailbox's label IDs.
    /// Names compare case-insensitively, as the provider does.
    pub fn resolve(available: &[Label], config: &Config) -> Result<Self> {
        let find = |name: &str| {
            available
                .iter()
                .find(|l| l.name.eq_ignore_ascii_case(name))
                .cloned()
                .ok_or_else(|| Error::LabelNotFound(name.to_string()))
        };

        Ok(Self {
            unchallenged: find(config.unchallenged_label.as_str())?,
            challenged: find(config.challenged_label.as_str())?,
            passed: find(config.passed_label.as_str())?,
        })
    }
}
