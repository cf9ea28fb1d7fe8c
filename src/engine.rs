//! The challenge engine: one pass over the mailbox moving threads through
//! unchallenged -> challenged -> passed.

use crate::classifier::ResponseClassifier;
use crate::config::Config;
use crate::error::Result;
use crate::mailbox::{LabelChange, Mailbox, MessageQuery, OutgoingMessage};
use crate::models::{INBOX, LabelSet, Message, Thread, ThreadState, sender_address};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// What happened during one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Threads a challenge was sent into.
    pub challenged: usize,
    /// Threads admitted without a challenge.
    pub auto_passed: usize,
    /// Unchallenged messages whose thread was already challenged.
    pub already_challenged: usize,
    /// Messages skipped for missing headers.
    pub skipped: usize,
    /// Challenged threads checked for an answer.
    pub reviewed: usize,
    /// Challenged threads that were answered.
    pub passed: usize,
}

enum Triage {
    AlreadyChallenged,
    Admit,
    Challenge,
}

pub struct ChallengeEngine<M> {
    mailbox: M,
    labels: LabelSet,
    sender_email: String,
    challenge_body: String,
    classifier: ResponseClassifier,
}

impl<M: Mailbox> ChallengeEngine<M> {
    pub fn new(mailbox: M, labels: LabelSet, config: &Config) -> Self {
        Self {
            mailbox,
            labels,
            sender_email: config.sender_email.clone(),
            challenge_body: config.challenge_body.clone(),
            classifier: ResponseClassifier::new(),
        }
    }

    /// Runs both phases once. The first remote failure ends the pass.
    pub async fn process_emails(&self) -> Result<RunSummary> {
        info!("Starting to process emails");
        let mut summary = RunSummary::default();

        self.challenge_unchallenged(&mut summary).await?;
        self.review_challenged(&mut summary).await?;

        info!("Finished processing emails: {:?}", summary);
        Ok(summary)
    }

    async fn challenge_unchallenged(&self, summary: &mut RunSummary) -> Result<()> {
        let query =
            MessageQuery::labelled(&self.labels.unchallenged).without(&self.labels.passed);
        let pending = self.mailbox.search_messages(&query).await?;
        debug!("Fetched {} unchallenged emails", pending.len());

        for pending_ref in &pending {
            let message = self.mailbox.get_message(&pending_ref.id).await?;

            let (Some(from), Some(subject)) = (message.from.as_deref(), message.subject.as_deref())
            else {
                warn!(
                    "Unable to find sender or subject for message ID {}",
                    message.id
                );
                summary.skipped += 1;
                continue;
            };

            let thread = self.mailbox.get_thread(&message.thread_id).await?;
            match self.triage(&thread, from).await? {
                Triage::AlreadyChallenged => {
                    if thread.has_label(&self.labels.unchallenged.id) {
                        let change = LabelChange::default().remove(&self.labels.unchallenged.id);
                        self.mailbox.modify_thread_labels(&thread.id, &change).await?;
                        info!("Removed 'unchallenged' label from thread {}", thread.id);
                    }
                    info!(
                        "Thread {} already has the challenged label. Skipping.",
                        thread.id
                    );
                    summary.already_challenged += 1;
                }
                Triage::Admit => {
                    info!(
                        "Thread {} is from a sender who already passed. Skipping challenge.",
                        thread.id
                    );
                    // Only the known sender's messages pass; anyone else in
                    // the thread is triaged on their own.
                    let change = LabelChange::default()
                        .add(INBOX)
                        .add(&self.labels.passed.id)
                        .remove(&self.labels.unchallenged.id);
                    let sender = sender_address(from);
                    for admitted in thread.messages.iter().filter(|m| is_from(m, sender)) {
                        self.mailbox.modify_message_labels(&admitted.id, &change).await?;
                        debug!(
                            "Modified labels for message ID {} in thread {}",
                            admitted.id, thread.id
                        );
                    }
                    summary.auto_passed += 1;
                }
                Triage::Challenge => {
                    self.send_challenge(&message, from, subject).await?;
                    info!(
                        "Challenge sent to {} for message ID {}",
                        from, message.id
                    );

                    // Refetch so the challenge we just sent is labelled too.
                    // Messages that already passed keep their state.
                    let thread = self.mailbox.get_thread(&message.thread_id).await?;
                    let change = LabelChange::default()
                        .add(&self.labels.challenged.id)
                        .remove(&self.labels.unchallenged.id);
                    for pending in &thread.messages {
                        if pending.has_label(&self.labels.passed.id) {
                            continue;
                        }
                        self.mailbox.modify_message_labels(&pending.id, &change).await?;
                        debug!(
                            "Modified labels for message ID {} in thread {}",
                            pending.id, thread.id
                        );
                    }
                    summary.challenged += 1;
                }
            }
        }
        Ok(())
    }

    async fn triage(&self, thread: &Thread, from: &str) -> Result<Triage> {
        if ThreadState::of(thread, &self.labels) == ThreadState::Challenged {
            return Ok(Triage::AlreadyChallenged);
        }

        // A passed thread still decides by sender.
        let query = MessageQuery::labelled(&self.labels.passed).from_sender(sender_address(from));
        let known = self.mailbox.search_messages(&query).await?;
        if !known.is_empty() {
            Ok(Triage::Admit)
        } else if thread.has_label(&self.labels.challenged.id) {
            Ok(Triage::AlreadyChallenged)
        } else {
            Ok(Triage::Challenge)
        }
    }

    async fn send_challenge(&self, message: &Message, from: &str, subject: &str) -> Result<()> {
        let challenge = OutgoingMessage {
            thread_id: message.thread_id.clone(),
            from: self.sender_email.clone(),
            to: from.to_string(),
            subject: reply_subject(subject),
            body: self.challenge_body.clone(),
            in_reply_to: message.message_id_header.clone(),
        };
        let sent_id = self.mailbox.send_message(&challenge).await?;
        debug!("Challenge for {} sent as message {}", message.id, sent_id);
        Ok(())
    }

    async fn review_challenged(&self, summary: &mut RunSummary) -> Result<()> {
        let challenged = self
            .mailbox
            .search_messages(&MessageQuery::labelled(&self.labels.challenged))
            .await?;
        debug!("Fetched {} challenged emails", challenged.len());

        let mut seen = HashSet::new();
        for challenged_ref in challenged {
            if !seen.insert(challenged_ref.thread_id.clone()) {
                continue;
            }

            let thread = self.mailbox.get_thread(&challenged_ref.thread_id).await?;
            summary.reviewed += 1;
            let Some((original, answerer)) = self.challenge_target(&thread) else {
                continue;
            };

            let answer = thread
                .replies()
                .into_iter()
                .filter(|reply| reply.id != original.id && reply.internal_date >= original.internal_date)
                .filter(|reply| !self.is_own(reply))
                .filter(|reply| answerer.is_none_or(|address| is_from(reply, address)))
                .find_map(|reply| self.classifier.matched(&reply.snippet).map(|p| (reply, p)));

            let mut change = LabelChange::default().remove(&self.labels.unchallenged.id);
            if let Some((reply, phrase)) = answer {
                let admit = LabelChange::default()
                    .add(INBOX)
                    .add(&self.labels.passed.id);
                self.mailbox
                    .modify_message_labels(&original.id, &admit)
                    .await?;
                info!(
                    "Email in thread {} has passed the challenge ('{}' in message {}, original received {:?})",
                    thread.id,
                    phrase,
                    reply.id,
                    original.received_at()
                );
                change = change.remove(&self.labels.challenged.id);
                summary.passed += 1;
            }

            // Only touch messages that carry something to remove.
            for message in &thread.messages {
                if change.remove.iter().any(|l| message.has_label(l)) {
                    self.mailbox.modify_message_labels(&message.id, &change).await?;
                }
            }
        }
        Ok(())
    }

    /// The message a pass admits. In a thread that already passed this is
    /// the newcomer's earliest challenged message, and only the newcomer's
    /// own replies answer for it.
    fn challenge_target<'t>(&self, thread: &'t Thread) -> Option<(&'t Message, Option<&'t str>)> {
        let original = thread.original()?;
        if !original.has_label(&self.labels.passed.id) {
            return Some((original, None));
        }

        let newcomer = thread
            .messages
            .iter()
            .filter(|m| m.has_label(&self.labels.challenged.id))
            .filter(|m| !m.has_label(&self.labels.passed.id) && !self.is_own(m))
            .min_by_key(|m| m.internal_date);
        match newcomer {
            Some(m) => Some((m, m.from.as_deref().map(sender_address))),
            None => Some((original, None)),
        }
    }

    fn is_own(&self, message: &Message) -> bool {
        is_from(message, sender_address(&self.sender_email))
    }
}

fn is_from(message: &Message, address: &str) -> bool {
    message
        .from
        .as_deref()
        .is_some_and(|from| sender_address(from).eq_ignore_ascii_case(address))
}

fn reply_subject(subject: &str) -> String {
    let already_reply = subject
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("re:"));
    if already_reply {
        subject.to_string()
    } else {
        format!("Re: {}", subject)
    }
}
