// src/extract/mod.rs

mod attachment;
mod contact;

pub use attachment::{AttachmentRef, attachment_view_url, locate};
pub use contact::{ContactInfo, extract};

/// Vacancy title carried in a notification subject: the text after the
/// first `" - "`, or the subject with the vendor prefix removed.
/// Matching downstream is exact, so no case or whitespace folding happens here.
pub fn vacancy_title(subject: &str, prefix: &str) -> Option<String> {
    let title = match subject.split_once(" - ") {
        Some((_, rest)) => rest.trim(),
        None => subject.strip_prefix(prefix).unwrap_or(subject).trim(),
    };
    (!title.is_empty()).then(|| title.to_string())
}

/// File-name-safe form of an applicant name: alphanumerics, space, hyphen
/// and underscore survive; whitespace runs become one underscore.
pub fn safe_file_stem(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join("_")
}
