use crate::error::{Error, Result};
use crate::mailbox::{LabelChange, Mailbox, MessageQuery, MessageRef, OutgoingMessage};
use crate::models;
use async_trait::async_trait;
use google_gmail1::Gmail;
use google_gmail1::api::{ModifyMessageRequest, ModifyThreadRequest, Scope};
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use lettre::message::header::ContentType;
use lettre::message::SinglePart;
use std::io::Cursor;

const USER: &str = "me";
const PAGE_SIZE: u32 = 500;
const METADATA_HEADERS: [&str; 3] = ["From", "Subject", "Message-ID"];

/// Every call asks for the `gmail.modify` scope the user consented to, so a
/// cached token is reused instead of prompting for the per-method default.
#[derive(Clone)]
pub struct GmailClient {
    hub: Gmail<HttpsConnector<HttpConnector>>,
}

impl GmailClient {
    pub fn new(hub: Gmail<HttpsConnector<HttpConnector>>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl Mailbox for GmailClient {
    async fn list_labels(&self) -> Result<Vec<models::Label>> {
        let (_, label_list) = self
            .hub
            .users()
            .labels_list(USER)
            .add_scope(Scope::Modify)
            .doit()
            .await
            .map_err(|e| api_error("list_labels", e))?;

        let labels = label_list
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(|l| models::Label {
                id: l.id.unwrap_or_default(),
                name: l.name.unwrap_or_default(),
            })
            .collect();

        Ok(labels)
    }

    async fn search_messages(&self, query: &MessageQuery) -> Result<Vec<MessageRef>> {
        let q = search_string(query);
        let mut refs = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut req = self
                .hub
                .users()
                .messages_list(USER)
                .max_results(PAGE_SIZE)
                .add_scope(Scope::Modify);

            for label in &query.include {
                req = req.add_label_ids(&label.id);
            }
            if !q.is_empty() {
                req = req.q(&q);
            }
            if let Some(token) = &page_token {
                req = req.page_token(token);
            }

            let (_, message_list) = req
                .doit()
                .await
                .map_err(|e| api_error("search_messages", e))?;

            refs.extend(
                message_list
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| {
                        Some(MessageRef {
                            id: m.id?,
                            thread_id: m.thread_id.unwrap_or_default(),
                        })
                    }),
            );

            match message_list.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        tracing::debug!("Query '{}' matched {} messages", q, refs.len());
        Ok(refs)
    }

    async fn get_message(&self, id: &str) -> Result<models::Message> {
        let mut req = self
            .hub
            .users()
            .messages_get(USER, id)
            .format("metadata")
            .add_scope(Scope::Modify);
        for header in METADATA_HEADERS {
            req = req.add_metadata_headers(header);
        }

        let (_, msg) = req
            .doit()
            .await
            .map_err(|e| api_error("get_message", e))?;

        Ok(to_model(msg))
    }

    async fn get_thread(&self, id: &str) -> Result<models::Thread> {
        let mut req = self
            .hub
            .users()
            .threads_get(USER, id)
            .format("metadata")
            .add_scope(Scope::Modify);
        for header in METADATA_HEADERS {
            req = req.add_metadata_headers(header);
        }

        let (_, thread) = req
            .doit()
            .await
            .map_err(|e| api_error("get_thread", e))?;

        Ok(models::Thread {
            id: thread.id.unwrap_or_else(|| id.to_string()),
            messages: thread
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(to_model)
                .collect(),
        })
    }

    async fn modify_message_labels(&self, id: &str, change: &LabelChange) -> Result<()> {
        let req = ModifyMessageRequest {
            add_label_ids: non_empty(&change.add),
            remove_label_ids: non_empty(&change.remove),
        };
        self.hub
            .users()
            .messages_modify(req, USER, id)
            .add_scope(Scope::Modify)
            .doit()
            .await
            .map_err(|e| api_error("modify_message_labels", e))?;
        Ok(())
    }

    async fn modify_thread_labels(&self, id: &str, change: &LabelChange) -> Result<()> {
        let req = ModifyThreadRequest {
            add_label_ids: non_empty(&change.add),
            remove_label_ids: non_empty(&change.remove),
        };
        self.hub
            .users()
            .threads_modify(req, USER, id)
            .add_scope(Scope::Modify)
            .doit()
            .await
            .map_err(|e| api_error("modify_thread_labels", e))?;
        Ok(())
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<String> {
        let raw = build_message(message)?.formatted();
        tracing::debug!(
            "Sending {} bytes to {} in thread {}",
            raw.len(),
            message.to,
            message.thread_id
        );

        let metadata = google_gmail1::api::Message {
            thread_id: Some(message.thread_id.clone()),
            ..Default::default()
        };
        let mime_type = "message/rfc822"
            .parse()
            .map_err(|e| Error::api("send_message", format!("invalid mime type: {}", e)))?;

        let (_, sent) = self
            .hub
            .users()
            .messages_send(metadata, USER)
            .add_scope(Scope::Modify)
            .upload(Cursor::new(raw), mime_type)
            .await
            .map_err(|e| api_error("send_message", e))?;

        Ok(sent.id.unwrap_or_default())
    }
}

fn to_model(msg: google_gmail1::api::Message) -> models::Message {
    let mut from = None;
    let mut subject = None;
    let mut message_id_header = None;

    if let Some(headers) = msg.payload.as_ref().and_then(|p| p.headers.as_ref()) {
        for header in headers {
            let Some(name) = header.name.as_deref() else {
                continue;
            };
            if name.eq_ignore_ascii_case("From") {
                from = header.value.clone();
            } else if name.eq_ignore_ascii_case("Subject") {
                subject = header.value.clone();
            } else if name.eq_ignore_ascii_case("Message-ID") {
                message_id_header = header.value.clone();
            }
        }
    }

    models::Message {
        id: msg.id.unwrap_or_default(),
        thread_id: msg.thread_id.unwrap_or_default(),
        from,
        subject,
        message_id_header,
        snippet: msg.snippet.unwrap_or_default(),
        internal_date: msg.internal_date.unwrap_or(0),
        label_ids: msg.label_ids.unwrap_or_default(),
    }
}

/// Renders the parts of a query that Gmail only accepts as search terms.
/// Included labels go through `labelIds` instead, which matches by ID.
fn search_string(query: &MessageQuery) -> String {
    let mut terms = Vec::new();
    for label in &query.exclude {
        terms.push(format!("-label:{}", search_label(&label.name)));
    }
    if let Some(from) = &query.from {
        terms.push(format!("from:{}", from));
    }
    terms.join(" ")
}

// Gmail search spells "Follow up/Later" as "follow-up-later".
fn search_label(name: &str) -> String {
    name.to_lowercase().replace([' ', '/'], "-")
}

/// Renders the challenge as RFC 5322. Non-ASCII headers are RFC 2047 encoded
/// and the body gets a transfer encoding that fits its content.
fn build_message(message: &OutgoingMessage) -> Result<lettre::Message> {
    let from: lettre::message::Mailbox = message
        .from
        .parse()
        .map_err(|e| Error::api("send_message", format!("invalid sender '{}': {}", message.from, e)))?;
    let to: lettre::message::Mailbox = message
        .to
        .parse()
        .map_err(|e| Error::api("send_message", format!("invalid recipient '{}': {}", message.to, e)))?;

    let mut builder = lettre::Message::builder()
        .from(from)
        .to(to)
        .subject(message.subject.as_str());
    if let Some(reply_id) = &message.in_reply_to {
        builder = builder.in_reply_to(reply_id.clone());
        builder = builder.references(reply_id.clone());
    }

    let text_part = SinglePart::builder()
        .content_type(ContentType::TEXT_PLAIN)
        .body(message.body.clone());
    builder
        .singlepart(text_part)
        .map_err(|e| Error::api("send_message", format!("failed to build message: {}", e)))
}

fn non_empty(ids: &[String]) -> Option<Vec<String>> {
    (!ids.is_empty()).then(|| ids.to_vec())
}

fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

fn api_error(operation: &'static str, err: google_gmail1::Error) -> Error {
    use google_gmail1::Error as GmailError;

    let transient = match &err {
        GmailError::HttpError(_) | GmailError::Io(_) => true,
        GmailError::Failure(response) => is_transient_status(response.status().as_u16()),
        GmailError::BadRequest(body) => body
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|c| c.as_u64())
            .is_some_and(|c| is_transient_status(c as u16)),
        _ => false,
    };

    if transient {
        Error::transient(operation, err.to_string())
    } else {
        Error::api(operation, err.to_string())
    }
}
