use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub from: Option<String>,
    pub subject: Option<String>,
    /// The RFC 822 `Message-ID` header, used to thread replies.
    pub message_id_header: Option<String>,
    pub snippet: String,
    pub internal_date: i64, // ms since epoch
    pub label_ids: Vec<String>,
}

impl Message {
    pub fn has_label(&self, label_id: &str) -> bool {
        self.label_ids.iter().any(|l| l == label_id)
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.internal_date)
    }
}

#[derive(Debug, Clone)]
pub struct Thread {
    pub id: String,
    pub messages: Vec<Message>,
}

impl Thread {
    /// The message that started the thread.
    ///
    /// The provider does not promise chronological order, so this picks the
    /// earliest `internal_date`; ties keep the provider's order.
    pub fn original(&self) -> Option<&Message> {
        self.messages
            .iter()
            .enumerate()
            .min_by_key(|(idx, m)| (m.internal_date, *idx))
            .map(|(_, m)| m)
    }

    /// Every message except the original, oldest first.
    pub fn replies(&self) -> Vec<&Message> {
        let original_id = self.original().map(|m| m.id.as_str());
        let mut replies: Vec<&Message> = self
            .messages
            .iter()
            .filter(|m| Some(m.id.as_str()) != original_id)
            .collect();
        replies.sort_by_key(|m| m.internal_date);
        replies
    }

    pub fn has_label(&self, label_id: &str) -> bool {
        self.messages.iter().any(|m| m.has_label(label_id))
    }

    pub fn message_ids(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(|m| m.id.as_str())
    }
}

/// The three configured challenge labels, resolved to provider IDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    pub unchallenged: Label,
    pub challenged: Label,
    pub passed: Label,
}

pub const INBOX: &str = "INBOX";

/// Where a thread sits in the challenge lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Unlabelled,
    Unchallenged,
    Challenged,
    Passed,
}

impl ThreadState {
    /// Later states win when a thread carries more than one label.
    pub fn of(thread: &Thread, labels: &LabelSet) -> Self {
        if thread.has_label(&labels.passed.id) {
            ThreadState::Passed
        } else if thread.has_label(&labels.challenged.id) {
            ThreadState::Challenged
        } else if thread.has_label(&labels.unchallenged.id) {
            ThreadState::Unchallenged
        } else {
            ThreadState::Unlabelled
        }
    }
}

/// Bare address from a `From` header: `"Jane <jane@x.org>"` gives `jane@x.org`.
pub fn sender_address(from: &str) -> &str {
    let from = from.trim();
    match (from.rfind('<'), from.rfind('>')) {
        (Some(start), Some(end)) if start < end => from[start + 1..end].trim(),
        _ => from,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, date: i64, labels: &[&str]) -> Message {
        Message {
            id: id.to_string(),
            thread_id: "t".to_string(),
            from: None,
            subject: None,
            message_id_header: None,
            snippet: String::new(),
            internal_date: date,
            label_ids: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    fn labels() -> LabelSet {
        let label = |id: &str| Label {
            id: id.to_string(),
            name: id.to_lowercase(),
        };
        LabelSet {
            unchallenged: label("L_U"),
            challenged: label("L_C"),
            passed: label("L_P"),
        }
    }

    #[test]
    fn test_original_is_earliest_regardless_of_order() {
        let thread = Thread {
            id: "t".into(),
            messages: vec![msg("reply", 200, &[]), msg("first", 100, &[])],
        };
        assert_eq!(thread.original().unwrap().id, "first");
        let replies: Vec<&str> = thread.replies().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(replies, vec!["reply"]);
    }

    #[test]
    fn test_original_ties_keep_provider_order() {
        let thread = Thread {
            id: "t".into(),
            messages: vec![msg("a", 100, &[]), msg("b", 100, &[])],
        };
        assert_eq!(thread.original().unwrap().id, "a");
    }

    #[test]
    fn test_empty_thread_has_no_original() {
        let thread = Thread {
            id: "t".into(),
            messages: vec![],
        };
        assert!(thread.original().is_none());
        assert!(thread.replies().is_empty());
    }

    #[test]
    fn test_thread_state_precedence() {
        let labels = labels();
        let thread = |l: &[&str]| Thread {
            id: "t".into(),
            messages: vec![msg("a", 1, l)],
        };
        assert_eq!(ThreadState::of(&thread(&[]), &labels), ThreadState::Unlabelled);
        assert_eq!(
            ThreadState::of(&thread(&["L_U"]), &labels),
            ThreadState::Unchallenged
        );
        assert_eq!(
            ThreadState::of(&thread(&["L_U", "L_C"]), &labels),
            ThreadState::Challenged
        );
        assert_eq!(
            ThreadState::of(&thread(&["L_C", "L_P"]), &labels),
            ThreadState::Passed
        );
    }

    #[test]
    fn test_sender_address() {
        assert_eq!(sender_address("Jane Doe <jane@example.org>"), "jane@example.org");
        assert_eq!(sender_address("  jane@example.org "), "jane@example.org");
        assert_eq!(sender_address("\"Doe, Jane\" < jane@example.org >"), "jane@example.org");
    }

    #[test]
    fn test_received_at() {
        let m = msg("a", 1_700_000_000_000, &[]);
        assert_eq!(m.received_at().unwrap().timestamp(), 1_700_000_000);
    }
}
