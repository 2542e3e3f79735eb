use super::{MAX_PART_DEPTH, MailClient, MailMessage, MailPart};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use google_gmail1::api::{MessagePart, Scope};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use tracing::{debug, info};

pub type GmailHub = google_gmail1::Gmail<HttpsConnector<HttpConnector>>;

/// `MailClient` backed by the Gmail REST API.
pub struct GmailClient {
    hub: GmailHub,
    user: String,
}

impl GmailClient {
    /// `user` is the Gmail user id; `"me"` means the token's owner.
    pub fn new(hub: GmailHub, user: impl Into<String>) -> Self {
        Self {
            hub,
            user: user.into(),
        }
    }
}

#[async_trait]
impl MailClient for GmailClient {
    async fn list_messages(&self, query: &str) -> Result<Vec<String>> {
        info!(user = %self.user, query = %query, "Starting id fetch");

        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut req = self
                .hub
                .users()
                .messages_list(&self.user)
                .q(query)
                .add_scope(Scope::Readonly);
            if let Some(token) = page_token.as_deref() {
                req = req.page_token(token);
            }

            let (_, response) = req.doit().await?;

            ids.extend(
                response
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| m.id),
            );

            match response.next_page_token {
                Some(token) => {
                    debug!(next_token = %token, "Fetching next page");
                    page_token = Some(token);
                }
                None => break,
            }
        }

        info!(matches = ids.len(), "Listing complete");
        Ok(ids)
    }

    async fn get_message(&self, message_id: &str) -> Result<MailMessage> {
        let (_, email) = self
            .hub
            .users()
            .messages_get(&self.user, message_id)
            .format("full")
            .add_scope(Scope::Readonly)
            .doit()
            .await?;

        debug!(mail = ?email.id, "Fetched mail");

        let payload = email
            .payload
            .ok_or_else(|| IngestError::MissingPayload(message_id.to_string()))?;

        Ok(MailMessage {
            id: email.id.unwrap_or_else(|| message_id.to_string()),
            payload: convert_part(payload, 0),
        })
    }

    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let (_, att) = self
            .hub
            .users()
            .messages_attachments_get(&self.user, message_id, attachment_id)
            .add_scope(Scope::Readonly)
            .doit()
            .await?;

        att.data.ok_or_else(|| {
            IngestError::Mail(format!(
                "attachment {attachment_id} of message {message_id} came back empty"
            ))
        })
    }
}

fn convert_part(part: MessagePart, depth: usize) -> MailPart {
    let body = part.body.unwrap_or_default();
    let parts = if depth < MAX_PART_DEPTH {
        part.parts
            .unwrap_or_default()
            .into_iter()
            .map(|p| convert_part(p, depth + 1))
            .collect()
    } else {
        Vec::new()
    };

    MailPart {
        mime_type: part.mime_type,
        filename: part.filename.filter(|f| !f.is_empty()),
        headers: part
            .headers
            .unwrap_or_default()
            .into_iter()
            .filter_map(|h| Some((h.name?, h.value?)))
            .collect(),
        data: body.data,
        attachment_id: body.attachment_id,
        parts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use google_gmail1::api::{MessagePartBody, MessagePartHeader};

    #[test]
    fn test_convert_part_keeps_tree_and_attachment_ids() {
        let gmail_part = MessagePart {
            mime_type: Some("multipart/mixed".into()),
            filename: Some(String::new()),
            headers: Some(vec![MessagePartHeader {
                name: Some("Subject".into()),
                value: Some("Отклик на вакансию - QA".into()),
            }]),
            parts: Some(vec![
                MessagePart {
                    mime_type: Some("text/html".into()),
                    body: Some(MessagePartBody {
                        data: Some(b"<p>hi</p>".to_vec()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                MessagePart {
                    mime_type: Some("application/pdf".into()),
                    filename: Some("cv.pdf".into()),
                    body: Some(MessagePartBody {
                        attachment_id: Some("ANGjdJ8".into()),
                        size: Some(1024),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };

        let part = convert_part(gmail_part, 0);

        assert_eq!(part.filename, None);
        assert_eq!(part.headers[0].0, "Subject");
        assert_eq!(part.parts.len(), 2);
        assert_eq!(part.parts[0].data.as_deref(), Some(&b"<p>hi</p>"[..]));
        assert_eq!(part.parts[1].filename.as_deref(), Some("cv.pdf"));
        assert_eq!(part.parts[1].attachment_id.as_deref(), Some("ANGjdJ8"));
    }
}
