//! In-memory mailbox used by the unit tests.

use crate::error::{Error, Result};
use crate::mailbox::{LabelChange, Mailbox, MessageQuery, MessageRef, OutgoingMessage};
use crate::models::{INBOX, Label, LabelSet, Message, Thread, sender_address};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

pub const UNCHALLENGED: &str = "Label_unchallenged";
pub const CHALLENGED: &str = "Label_challenged";
pub const PASSED: &str = "Label_passed";

#[derive(Default)]
struct State {
    /// Insertion order doubles as the provider's thread order.
    messages: Vec<Message>,
    sent: Vec<OutgoingMessage>,
    failing_calls: u32,
    failing_transient: bool,
    failing_operations: HashSet<&'static str>,
    next_date: i64,
}

#[derive(Clone, Default)]
pub struct FakeMailbox {
    state: Arc<Mutex<State>>,
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label_set() -> LabelSet {
        let label = |id: &str, name: &str| Label {
            id: id.to_string(),
            name: name.to_string(),
        };
        LabelSet {
            unchallenged: label(UNCHALLENGED, "unchallenged"),
            challenged: label(CHALLENGED, "challenged"),
            passed: label(PASSED, "passed"),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_message(
        &self,
        thread_id: &str,
        id: &str,
        from: &str,
        subject: &str,
        snippet: &str,
        internal_date: i64,
        labels: &[&str],
    ) {
        let mut state = self.state();
        state.next_date = state.next_date.max(internal_date);
        state.messages.push(Message {
            id: id.to_string(),
            thread_id: thread_id.to_string(),
            from: (!from.is_empty()).then(|| from.to_string()),
            subject: (!subject.is_empty()).then(|| subject.to_string()),
            message_id_header: Some(format!("<{}@mail.example.com>", id)),
            snippet: snippet.to_string(),
            internal_date,
            label_ids: labels.iter().map(|l| l.to_string()).collect(),
        });
    }

    /// The next `count` calls fail, of any operation.
    pub fn fail_next_calls(&self, count: u32, transient: bool) {
        let mut state = self.state();
        state.failing_calls = count;
        state.failing_transient = transient;
    }

    /// Every call of `operation` fails permanently.
    pub fn fail_operation(&self, operation: &'static str) {
        self.state().failing_operations.insert(operation);
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.state().sent.clone()
    }

    pub fn labels_of(&self, id: &str) -> Vec<String> {
        self.state()
            .messages
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.label_ids.clone())
            .unwrap_or_default()
    }

    pub fn has_label(&self, id: &str, label: &str) -> bool {
        self.labels_of(id).iter().any(|l| l == label)
    }

    /// Messages of a thread carrying `label`.
    pub fn thread_label_count(&self, thread_id: &str, label: &str) -> usize {
        self.state()
            .messages
            .iter()
            .filter(|m| m.thread_id == thread_id && m.has_label(label))
            .count()
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        let mut state = self.state();
        if state.failing_operations.contains(operation) {
            return Err(Error::api(operation, "injected failure"));
        }
        if state.failing_calls > 0 {
            state.failing_calls -= 1;
            return if state.failing_transient {
                Err(Error::transient(operation, "503 Service Unavailable"))
            } else {
                Err(Error::api(operation, "400 Bad Request"))
            };
        }
        Ok(())
    }
}

fn apply(message: &mut Message, change: &LabelChange) {
    message.label_ids.retain(|l| !change.remove.contains(l));
    for add in &change.add {
        if !message.label_ids.contains(add) {
            message.label_ids.push(add.clone());
        }
    }
}

#[async_trait]
impl Mailbox for FakeMailbox {
    async fn list_labels(&self) -> Result<Vec<Label>> {
        self.check("list_labels")?;
        let set = Self::label_set();
        Ok(vec![
            Label {
                id: INBOX.to_string(),
                name: INBOX.to_string(),
            },
            set.unchallenged,
            set.challenged,
            set.passed,
        ])
    }

    async fn search_messages(&self, query: &MessageQuery) -> Result<Vec<MessageRef>> {
        self.check("search_messages")?;
        let state = self.state();
        Ok(state
            .messages
            .iter()
            .filter(|m| query.include.iter().all(|l| m.has_label(&l.id)))
            .filter(|m| !query.exclude.iter().any(|l| m.has_label(&l.id)))
            .filter(|m| match (&query.from, &m.from) {
                (None, _) => true,
                (Some(wanted), Some(from)) => sender_address(from).eq_ignore_ascii_case(wanted),
                (Some(_), None) => false,
            })
            .map(|m| MessageRef {
                id: m.id.clone(),
                thread_id: m.thread_id.clone(),
            })
            .collect())
    }

    async fn get_message(&self, id: &str) -> Result<Message> {
        self.check("get_message")?;
        self.state()
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| Error::api("get_message", format!("404 {}", id)))
    }

    async fn get_thread(&self, id: &str) -> Result<Thread> {
        self.check("get_thread")?;
        let messages: Vec<Message> = self
            .state()
            .messages
            .iter()
            .filter(|m| m.thread_id == id)
            .cloned()
            .collect();
        if messages.is_empty() {
            return Err(Error::api("get_thread", format!("404 {}", id)));
        }
        Ok(Thread {
            id: id.to_string(),
            messages,
        })
    }

    async fn modify_message_labels(&self, id: &str, change: &LabelChange) -> Result<()> {
        self.check("modify_message_labels")?;
        let mut state = self.state();
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| Error::api("modify_message_labels", format!("404 {}", id)))?;
        apply(message, change);
        Ok(())
    }

    async fn modify_thread_labels(&self, id: &str, change: &LabelChange) -> Result<()> {
        self.check("modify_thread_labels")?;
        let mut state = self.state();
        for message in state.messages.iter_mut().filter(|m| m.thread_id == id) {
            apply(message, change);
        }
        Ok(())
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<String> {
        self.check("send_message")?;
        let mut state = self.state();
        state.next_date += 1;
        let id = format!("sent-{}", state.sent.len() + 1);
        let sent = Message {
            id: id.clone(),
            thread_id: message.thread_id.clone(),
            from: Some(message.from.clone()),
            subject: Some(message.subject.clone()),
            message_id_header: None,
            snippet: message.body.clone(),
            internal_date: state.next_date,
            label_ids: vec!["SENT".to_string()],
        };
        state.messages.push(sent);
        state.sent.push(message.clone());
        Ok(id)
    }
}
