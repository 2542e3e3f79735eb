use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;

/// Applicant contact fields found in a notification body. Every field is
/// optional; defaults are applied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContactInfo {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub message: Option<String>,
}

const NAME_LABELS: &[&str] = &["Имя:", "ФИО:", "Полное имя:", "Name:"];
const PHONE_LABELS: &[&str] = &["Телефон для контакта", "Phone for contact"];

/// Boilerplate the job board inserts when no cover letter was written.
const NO_COVER_LETTER: &str = "не предоставил сопроводительного письма";

/// Field labels of the notification template. A captured value that starts
/// with one of these belongs to the next field.
const FIELD_LABELS: &[&str] = &[
    "Email",
    "E-mail",
    "Телефон",
    "Phone",
    "Почта",
    "Текст сообщения",
    "Имя",
    "ФИО",
    "Name:",
];

/// Where a lazily captured field value ends in the flattened text.
const STOP: &str = r"(?:\s+(?:Email|E-mail|Телефон|Phone|Почта|Имя:|Текст сообщения)|$)";

/// Main extraction entry point. Structural cues from the DOM win over
/// label regexes on the flattened text.
pub fn extract(body: &str) -> ContactInfo {
    let doc = Html::parse_document(body);
    let text = visible_text(&doc);
    let paragraphs = paragraph_texts(&doc);

    ContactInfo {
        name: name_from_paragraphs(&paragraphs).or_else(|| name_from_text(&text)),
        email: email_from_mailto(&doc).or_else(|| email_from_text(&text)),
        phone: phone_from_paragraphs(&paragraphs).or_else(|| phone_from_text(&text)),
        message: message_from_text(&text),
    }
}

// ---------------------------------------------------------------------------
// DOM helpers
// ---------------------------------------------------------------------------

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// All text nodes outside `head`, `script` and `style`, whitespace-normalized.
fn visible_text(doc: &Html) -> String {
    let mut out = String::new();
    for node in doc.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "head" | "script" | "style"))
        });
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    normalize_whitespace(&out)
}

fn paragraph_texts(doc: &Html) -> Vec<String> {
    let Ok(sel) = Selector::parse("p, li") else {
        return Vec::new();
    };
    doc.select(&sel)
        .map(|el| normalize_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
        .collect()
}

fn strip_label<'a>(text: &'a str, labels: &[&str]) -> Option<&'a str> {
    labels.iter().find_map(|label| text.strip_prefix(label))
}

/// First capture group of the first pattern whose match passes `accept`.
fn first_capture(text: &str, patterns: &[String], accept: impl Fn(&str) -> bool) -> Option<String> {
    for pattern in patterns {
        let Ok(re) = Regex::new(pattern) else {
            continue;
        };
        if let Some(cap) = re.captures(text) {
            let candidate = cap[1].trim();
            if accept(candidate) {
                return Some(candidate.to_string());
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Name
// ---------------------------------------------------------------------------

fn is_plausible_name(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate.chars().count() < 100
        && candidate.chars().any(char::is_alphabetic)
        && !FIELD_LABELS.iter().any(|label| candidate.starts_with(label))
}

fn name_from_paragraphs(paragraphs: &[String]) -> Option<String> {
    paragraphs
        .iter()
        .filter_map(|p| strip_label(p, NAME_LABELS))
        .map(str::trim)
        .find(|candidate| is_plausible_name(candidate))
        .map(str::to_string)
}

fn name_from_text(text: &str) -> Option<String> {
    let patterns = [
        format!(r"Имя:\s*(.+?){STOP}"),
        format!(r"Имя\s*[-:]\s*(.+?){STOP}"),
        format!(r"ФИО\s*[-:]\s*(.+?){STOP}"),
        format!(r"Полное имя:\s*(.+?){STOP}"),
        format!(r"Name:\s*(.+?){STOP}"),
    ];
    first_capture(text, &patterns, is_plausible_name)
}

// ---------------------------------------------------------------------------
// Email
// ---------------------------------------------------------------------------

fn is_plausible_email(candidate: &str) -> bool {
    match candidate.rsplit_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    }
}

fn email_from_mailto(doc: &Html) -> Option<String> {
    let sel = Selector::parse(r#"a[href^="mailto:"]"#).ok()?;
    doc.select(&sel)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| href.strip_prefix("mailto:"))
        .map(|addr| addr.split('?').next().unwrap_or_default().trim())
        .find(|addr| is_plausible_email(addr))
        .map(str::to_string)
}

fn email_from_text(text: &str) -> Option<String> {
    let patterns = [
        r"Email для контакта\s*[-:]\s*(\S+)".to_string(),
        r"Email\s*[-:]\s*(\S+)".to_string(),
        r"E-mail\s*[-:]\s*(\S+)".to_string(),
        r"Почта\s*[-:]\s*(\S+)".to_string(),
        r"[Ээ]лектронная почта\s*[-:]\s*(\S+)".to_string(),
        r"([A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,})".to_string(),
    ];
    first_capture(text, &patterns, |c| {
        is_plausible_email(c.trim_end_matches(['.', ',', ';']))
    })
    .map(|email| email.trim_end_matches(['.', ',', ';']).to_string())
}

// ---------------------------------------------------------------------------
// Phone
// ---------------------------------------------------------------------------

fn is_plausible_phone(candidate: &str) -> bool {
    candidate.chars().filter(char::is_ascii_digit).count() >= 9
}

fn phone_from_paragraphs(paragraphs: &[String]) -> Option<String> {
    paragraphs
        .iter()
        .filter_map(|p| strip_label(p, PHONE_LABELS))
        .map(|rest| rest.trim_start_matches([' ', '-', '–', ':']).trim())
        .find(|candidate| is_plausible_phone(candidate))
        .map(str::to_string)
}

fn phone_from_text(text: &str) -> Option<String> {
    const NUMBER: &str = r"(\+?\d[\d\s\-()]*\d)";
    let patterns = [
        format!(r"Телефон для контакта\s*[-:]\s*{NUMBER}"),
        format!(r"Телефон\s*[-:]\s*{NUMBER}"),
        format!(r"Phone\s*[-:]\s*{NUMBER}"),
        format!(r"Моб\.\s*тел\.\s*[-:]\s*{NUMBER}"),
        format!(r"Мобильный\s*[-:]\s*{NUMBER}"),
        format!(r"Номер\s*[-:]\s*{NUMBER}"),
        r"(\+?992\d{9})".to_string(),
        r"(\+?\d{9,15})".to_string(),
    ];
    first_capture(text, &patterns, is_plausible_phone)
}

// ---------------------------------------------------------------------------
// Cover message
// ---------------------------------------------------------------------------

fn message_from_text(text: &str) -> Option<String> {
    let patterns = [
        r"Текст сообщения:\s*(.*?)\s*(?:Имя:|Email|$)".to_string(),
        r"Message text:\s*(.*?)\s*(?:Name:|Email|$)".to_string(),
    ];
    let message = first_capture(text, &patterns, |_| true)?;
    if message.is_empty() || message.contains(NO_COVER_LETTER) {
        return None;
    }
    Some(message)
}
