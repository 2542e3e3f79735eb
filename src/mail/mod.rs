pub mod gmail;
pub mod memory;

use crate::error::Result;
use async_trait::async_trait;

/// Deepest MIME nesting we follow. Real notifications are 2-3 levels deep.
pub const MAX_PART_DEPTH: usize = 32;

/// One node of a message's MIME tree, provider-neutral.
#[derive(Debug, Clone, Default)]
pub struct MailPart {
    pub mime_type: Option<String>,
    pub filename: Option<String>,
    pub headers: Vec<(String, String)>,
    /// Decoded body bytes when the provider inlines them.
    pub data: Option<Vec<u8>>,
    /// Set when the body must be fetched separately.
    pub attachment_id: Option<String>,
    pub parts: Vec<MailPart>,
}

#[derive(Debug, Clone)]
pub struct MailMessage {
    pub id: String,
    pub payload: MailPart,
}

impl MailMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        get_header(&self.payload.headers, name)
    }

    pub fn sender(&self) -> &str {
        self.header("From").unwrap_or_default()
    }

    pub fn subject(&self) -> &str {
        self.header("Subject").unwrap_or_default()
    }
}

/// Mailbox boundary. One instance per account.
#[async_trait]
pub trait MailClient: Send + Sync {
    /// All message ids matching `query`, in provider order.
    async fn list_messages(&self, query: &str) -> Result<Vec<String>>;

    async fn get_message(&self, message_id: &str) -> Result<MailMessage>;

    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>>;
}

pub fn get_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

impl MailPart {
    /// Depth-first, pre-order walk over this part and its descendants.
    /// Subtrees below `MAX_PART_DEPTH` are not visited.
    pub fn walk(&self) -> PartWalk<'_> {
        PartWalk {
            stack: vec![(0, self)],
        }
    }

    fn is_text_body(&self) -> bool {
        matches!(self.mime_type.as_deref(), Some("text/html") | Some("text/plain"))
    }
}

pub struct PartWalk<'a> {
    stack: Vec<(usize, &'a MailPart)>,
}

impl<'a> Iterator for PartWalk<'a> {
    type Item = (usize, &'a MailPart);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, part) = self.stack.pop()?;
        if depth < MAX_PART_DEPTH {
            self.stack
                .extend(part.parts.iter().rev().map(|child| (depth + 1, child)));
        }
        Some((depth, part))
    }
}

/// The longest text/html or text/plain body in the tree. Parts that are
/// not valid UTF-8 are skipped.
pub fn rendered_body(payload: &MailPart) -> Option<String> {
    payload
        .walk()
        .filter(|(_, part)| part.is_text_body())
        .filter_map(|(_, part)| {
            let bytes = part.data.as_ref()?;
            String::from_utf8(bytes.clone()).ok()
        })
        .filter(|body| !body.is_empty())
        .fold(None, |best: Option<String>, body| match best {
            Some(b) if b.len() >= body.len() => Some(b),
            _ => Some(body),
        })
}
