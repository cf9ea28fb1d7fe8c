//! Backoff and cancellation around every mailbox call.

use crate::config::RetrySettings;
use crate::error::{Error, Result};
use crate::mailbox::{LabelChange, Mailbox, MessageQuery, MessageRef, OutgoingMessage};
use crate::models::{Label, Message, Thread};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: settings.base_delay(),
            max_delay: settings.max_delay(),
        }
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Runs `call` until it succeeds, fails permanently, runs out of attempts,
    /// or `cancel` fires.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                outcome = call() => outcome,
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        operation,
                        attempt + 1,
                        self.max_attempts,
                        e,
                        delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// A [`Mailbox`] that runs each call of the wrapped one under a [`RetryPolicy`].
pub struct RetryingMailbox<M> {
    inner: M,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl<M: Mailbox> RetryingMailbox<M> {
    pub fn new(inner: M, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            inner,
            policy,
            cancel,
        }
    }
}

#[async_trait]
impl<M: Mailbox> Mailbox for RetryingMailbox<M> {
    async fn list_labels(&self) -> Result<Vec<Label>> {
        let inner = &self.inner;
        self.policy
            .run("list_labels", &self.cancel, move || inner.list_labels())
            .await
    }

    async fn search_messages(&self, query: &MessageQuery) -> Result<Vec<MessageRef>> {
        let inner = &self.inner;
        self.policy
            .run("search_messages", &self.cancel, move || inner.search_messages(query))
            .await
    }

    async fn get_message(&self, id: &str) -> Result<Message> {
        let inner = &self.inner;
        self.policy
            .run("get_message", &self.cancel, move || inner.get_message(id))
            .await
    }

    async fn get_thread(&self, id: &str) -> Result<Thread> {
        let inner = &self.inner;
        self.policy
            .run("get_thread", &self.cancel, move || inner.get_thread(id))
            .await
    }

    async fn modify_message_labels(&self, id: &str, change: &LabelChange) -> Result<()> {
        let inner = &self.inner;
        self.policy
            .run("modify_message_labels", &self.cancel, move || {
                inner.modify_message_labels(id, change)
            })
            .await
    }

    async fn modify_thread_labels(&self, id: &str, change: &LabelChange) -> Result<()> {
        let inner = &self.inner;
        self.policy
            .run("modify_thread_labels", &self.cancel, move || {
                inner.modify_thread_labels(id, change)
            })
            .await
    }

    // Sending is not idempotent: a send that timed out may still have gone
    // out, so it gets a single attempt.
    async fn send_message(&self, message: &OutgoingMessage) -> Result<String> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            sent = self.inner.send_message(message) => sent,
        }
    }
}
