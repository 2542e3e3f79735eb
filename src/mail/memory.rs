use super::{MailClient, MailMessage, MailPart};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// In-process mailbox for tests and dry runs. The search query is not
/// interpreted: every stored message is listed, in insertion order.
#[derive(Default)]
pub struct InMemoryMailbox {
    messages: Mutex<Vec<MailMessage>>,
    attachments: Mutex<HashMap<(String, String), Vec<u8>>>,
    fail_listing: AtomicBool,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message(&self, message: MailMessage) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message);
        }
    }

    pub fn add_attachment(&self, message_id: &str, attachment_id: &str, bytes: Vec<u8>) {
        if let Ok(mut attachments) = self.attachments.lock() {
            attachments.insert((message_id.to_string(), attachment_id.to_string()), bytes);
        }
    }

    /// Make `list_messages` fail, as an expired token would.
    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailClient for InMemoryMailbox {
    async fn list_messages(&self, _query: &str) -> Result<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(IngestError::Mail("invalid_grant: token expired".into()));
        }
        let messages = self.messages.lock().map_err(|_| IngestError::LockPoisoned)?;
        Ok(messages.iter().map(|m| m.id.clone()).collect())
    }

    async fn get_message(&self, message_id: &str) -> Result<MailMessage> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let messages = self.messages.lock().map_err(|_| IngestError::LockPoisoned)?;
        messages
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
            .ok_or_else(|| IngestError::Mail(format!("message {message_id} not found")))
    }

    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let attachments = self.attachments.lock().map_err(|_| IngestError::LockPoisoned)?;
        attachments
            .get(&(message_id.to_string(), attachment_id.to_string()))
            .cloned()
            .ok_or_else(|| {
                IngestError::Mail(format!("attachment {attachment_id} of {message_id} not found"))
            })
    }
}

/// A single-part HTML message with `From` and `Subject` headers.
pub fn html_message(id: &str, from: &str, subject: &str, html: &str) -> MailMessage {
    MailMessage {
        id: id.to_string(),
        payload: MailPart {
            mime_type: Some("text/html".into()),
            headers: vec![
                ("From".into(), from.to_string()),
                ("Subject".into(), subject.to_string()),
            ],
            data: Some(html.as_bytes().to_vec()),
            ..Default::default()
        },
    }
}
