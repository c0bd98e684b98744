//! Email document
//!
//! One indexed email, owned by exactly one tenant. Identity inside the
//! index is the pair `(tenant_id, id)`.

use chrono::{DateTime, Utc};
use htmd::HtmlToMarkdown;
use scraper::Html;
use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EmailDocument {
    /// Message id, unique within a tenant
    #[serde(default)]
    #[validate(length(min = 1, message = "document id must not be empty"))]
    pub id: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "tenant id must not be empty"))]
    pub tenant_id: String,

    #[serde(default)]
    pub thread_id: Option<String>,

    #[serde(default)]
    pub subject: String,

    #[serde(default)]
    pub body_text: String,

    /// HTML rendering, only read at ingest when no text body is present
    #[serde(default, skip_serializing)]
    pub body_html: Option<String>,

    /// Set when only an HTML rendering was available
    #[serde(default)]
    pub body_html_flag: bool,

    #[serde(default)]
    pub from_addresses: Vec<String>,

    #[serde(default)]
    pub from_names: Vec<String>,

    #[serde(default)]
    pub to_addresses: Vec<String>,

    #[serde(default)]
    pub to_names: Vec<String>,

    #[serde(default)]
    pub cc_addresses: Vec<String>,

    #[serde(default)]
    pub cc_names: Vec<String>,

    /// Absent or unparseable timestamps are stored as `None`
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub sent_at: Option<DateTime<Utc>>,

    /// Filled in by the index on write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl EmailDocument {
    pub fn new(tenant_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            thread_id: None,
            subject: String::new(),
            body_text: String::new(),
            body_html: None,
            body_html_flag: false,
            from_addresses: Vec::new(),
            from_names: Vec::new(),
            to_addresses: Vec::new(),
            to_names: Vec::new(),
            cc_addresses: Vec::new(),
            cc_names: Vec::new(),
            sent_at: None,
            embedding: None,
        }
    }

    /// Display name of the first sender, falling back to its address
    pub fn primary_sender(&self) -> Option<&str> {
        self.from_names
            .iter()
            .chain(self.from_addresses.iter())
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
    }

    /// Text the document is embedded as: a `Subject:` line, a `From:`
    /// line when a sender is known, then the body.
    pub fn page_content(&self) -> String {
        render_page(&self.subject, self.primary_sender(), &self.body_text)
    }

    /// Fill the text body from the HTML rendering when only HTML was given
    pub fn normalize_body(&mut self) {
        if !self.body_text.trim().is_empty() {
            return;
        }
        if let Some(html) = self.body_html.take() {
            self.body_text = html_to_text(&html);
            self.body_html_flag = true;
        }
    }

    /// Every participant name and address, senders first
    pub fn participants(&self) -> impl Iterator<Item = &str> {
        self.from_names
            .iter()
            .chain(self.from_addresses.iter())
            .chain(self.to_names.iter())
            .chain(self.to_addresses.iter())
            .chain(self.cc_names.iter())
            .chain(self.cc_addresses.iter())
            .map(String::as_str)
    }
}

/// `Subject: ..\nFrom: ..\n` header followed by `body`
pub fn render_page(subject: &str, sender: Option<&str>, body: &str) -> String {
    let mut content = String::with_capacity(subject.len() + body.len() + 32);
    content.push_str("Subject: ");
    content.push_str(subject.trim());
    content.push('\n');
    if let Some(sender) = sender {
        content.push_str("From: ");
        content.push_str(sender);
        content.push('\n');
    }
    content.push_str(body);
    content
}

/// Elements whose content never belongs in a mail body
const SKIPPED_TAGS: &[&str] = &["head", "style", "script", "noscript"];

/// Markdown rendering of an HTML body, falling back to its visible text
fn html_to_text(html: &str) -> String {
    let converter = HtmlToMarkdown::builder()
        .skip_tags(SKIPPED_TAGS.to_vec())
        .build();
    match converter.convert(html) {
        Ok(markdown) => markdown.replace('\u{a0}', " ").trim().to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "HTML conversion failed, keeping visible text");
            visible_text(html)
        }
    }
}

/// Text nodes outside skipped elements, whitespace collapsed
fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let fragments: Vec<&str> = document
        .root_element()
        .descendants()
        .filter(|node| {
            !node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .is_some_and(|e| SKIPPED_TAGS.contains(&e.name()))
            })
        })
        .filter_map(|node| node.value().as_text().map(|text| &**text))
        .collect();
    fragments.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|value| match value {
        serde_json::Value::String(s) => parse_timestamp(&s),
        serde_json::Value::Null => None,
        other => {
            tracing::warn!(value = %other, "Ignoring non-string sentAt");
            None
        }
    }))
}

/// Parse RFC 3339 or RFC 2822 (mail `Date:` header) timestamps
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    DateTime::parse_from_rfc3339(trimmed)
        .or_else(|_| DateTime::parse_from_rfc2822(trimmed))
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            tracing::warn!(value = %trimmed, error = %e, "Unparseable sentAt, storing as null");
        })
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_deserialize_ingest_payload() {
        let json = r#"{
            "id": "m1",
            "tenantId": "t1",
            "subject": "Sthack",
            "bodyText": "See you at the conference",
            "fromNames": ["Emilie"],
            "fromAddresses": ["emilie@sthack.fr"],
            "sentAt": "2023-05-10T08:00:00Z"
        }"#;

        let doc: EmailDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.id, "m1");
        assert_eq!(doc.tenant_id, "t1");
        assert_eq!(doc.sent_at, Some(Utc.with_ymd_and_hms(2023, 5, 10, 8, 0, 0).unwrap()));
        assert!(doc.to_addresses.is_empty());
        assert!(doc.embedding.is_none());
    }

    #[test]
    fn test_unparseable_sent_at_is_null() {
        let json = r#"{"id": "m1", "tenantId": "t1", "sentAt": "last tuesday"}"#;
        let doc: EmailDocument = serde_json::from_str(json).unwrap();
        assert!(doc.sent_at.is_none());
    }

    #[test]
    fn test_rfc2822_sent_at() {
        let doc: EmailDocument = serde_json::from_str(
            r#"{"id": "m1", "tenantId": "t1", "sentAt": "Wed, 10 May 2023 10:00:00 +0200"}"#,
        )
        .unwrap();
        assert_eq!(doc.sent_at, Some(Utc.with_ymd_and_hms(2023, 5, 10, 8, 0, 0).unwrap()));
    }

    #[test]
    fn test_missing_id_fails_validation() {
        let doc: EmailDocument = serde_json::from_str(r#"{"tenantId": "t1"}"#).unwrap();
        let err = doc.validate().unwrap_err();
        assert!(err.field_errors().contains_key("id"));
    }

    #[test]
    fn test_page_content_header() {
        let mut doc = EmailDocument::new("t1", "m1");
        doc.subject = "Commande T-shirt".into();
        doc.from_addresses = vec!["shop@example.com".into()];
        doc.body_text = "Votre commande est partie.".into();

        assert_eq!(
            doc.page_content(),
            "Subject: Commande T-shirt\nFrom: shop@example.com\nVotre commande est partie."
        );
    }

    #[test]
    fn test_page_content_without_sender() {
        let mut doc = EmailDocument::new("t1", "m1");
        doc.subject = "Rappel".into();
        doc.body_text = "Echeance demain".into();
        assert_eq!(doc.page_content(), "Subject: Rappel\nEcheance demain");
    }

    #[test]
    fn test_html_only_body_is_flagged() {
        let mut doc: EmailDocument = serde_json::from_str(
            r#"{"id": "m1", "tenantId": "t1", "bodyHtml": "<p>Hello <b>Emilie</b></p>"}"#,
        )
        .unwrap();
        doc.normalize_body();
        assert_eq!(doc.body_text, "Hello **Emilie**");
        assert!(doc.body_html_flag);
        assert!(doc.body_html.is_none());
    }

    const NEWSLETTER: &str = "<html><head><title>News</title><style>p{color:red}</style></head>\
        <body><script>track()</script><p>Hi &amp; bye&nbsp;now</p></body></html>";

    #[test]
    fn test_html_body_drops_style_and_decodes_entities() {
        let mut doc = EmailDocument::new("t1", "m1");
        doc.body_html = Some(NEWSLETTER.into());
        doc.normalize_body();

        assert!(doc.body_text.contains("Hi"));
        assert!(doc.body_text.contains("bye now"));
        assert!(!doc.body_text.contains("color"));
        assert!(!doc.body_text.contains("track"));
        assert!(!doc.body_text.contains("News"));
        assert!(!doc.body_text.contains("&amp;"));
        assert!(!doc.body_text.contains("&nbsp;"));
    }

    #[test]
    fn test_visible_text_fallback() {
        assert_eq!(visible_text(NEWSLETTER), "Hi & bye now");
    }

    #[test]
    fn test_primary_sender_prefers_name() {
        let mut doc = EmailDocument::new("t1", "m1");
        doc.from_names = vec!["  ".into(), "Damien".into()];
        doc.from_addresses = vec!["damien@example.com".into()];
        assert_eq!(doc.primary_sender(), Some("Damien"));
    }
}
