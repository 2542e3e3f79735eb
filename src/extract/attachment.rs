use crate::config::AttachmentLinkConfig;
use crate::mail::MailPart;
use scraper::{Html, Selector};

/// Where the applicant's resume can be found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentRef {
    pub url: Option<String>,
    pub filename: Option<String>,
    /// Present only for MIME attachments; the bytes still have to be fetched.
    pub attachment_id: Option<String>,
}

/// Find the resume reference. Links already rendered in the HTML body
/// win; otherwise the first MIME part with a filename and attachment id
/// is turned into a browser link.
pub fn locate(
    body: Option<&str>,
    payload: &MailPart,
    message_id: &str,
    links: &AttachmentLinkConfig,
) -> AttachmentRef {
    body.and_then(find_linked_attachment)
        .or_else(|| find_mime_attachment(payload, message_id, links))
        .unwrap_or_default()
}

fn is_attachment_link(href: &str) -> bool {
    (href.contains("mail.google.com") && href.contains("attid=") && href.contains("view=att"))
        || href.contains("mail-attachment.googleusercontent.com")
}

fn find_linked_attachment(html: &str) -> Option<AttachmentRef> {
    let doc = Html::parse_document(html);
    let anchor_sel = Selector::parse("a[href]").ok()?;

    doc.select(&anchor_sel).find_map(|a| {
        let href = a.value().attr("href")?;
        if !is_attachment_link(href) {
            return None;
        }

        let text = a.text().collect::<String>();
        let text = text.trim();
        let filename = (!text.is_empty() && !text.starts_with("http") && text.chars().count() > 3)
            .then(|| text.to_string());

        Some(AttachmentRef {
            url: Some(href.to_string()),
            filename,
            attachment_id: None,
        })
    })
}

fn find_mime_attachment(
    payload: &MailPart,
    message_id: &str,
    links: &AttachmentLinkConfig,
) -> Option<AttachmentRef> {
    payload.walk().find_map(|(_, part)| {
        let filename = part.filename.as_deref().filter(|f| !f.is_empty())?;
        let attachment_id = part.attachment_id.as_deref().filter(|id| !id.is_empty())?;

        Some(AttachmentRef {
            url: Some(attachment_view_url(links, message_id, attachment_id)),
            filename: Some(filename.to_string()),
            attachment_id: Some(attachment_id.to_string()),
        })
    })
}

/// Browser link that opens a MIME attachment in the Gmail web UI.
pub fn attachment_view_url(links: &AttachmentLinkConfig, message_id: &str, attachment_id: &str) -> String {
    format!(
        "{}?ui=2&ik={}&attid={}&permmsgid=msg-f:{}&view=att&zw&disp=inline",
        links.base_url, links.ik, attachment_id, message_id
    )
}
