//! Data models that flow through the ingestion and answering pipeline.
//!
//! A [`Document`] is created once by the feed connector and never changes
//! afterwards. An [`Answer`] is what the query engine hands back to callers,
//! whatever happened on the way (see [`AnswerStatus`]).

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A normalized news article.
///
/// `id` is derived from the article URL and is the deduplication key
/// everywhere in the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    /// Article text: the feed's content, falling back to its description.
    pub body: String,
    /// Publisher name (e.g. `"BBC News"`).
    pub source: String,
    pub author: Option<String>,
    pub image_url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
}

impl Document {
    /// Derive a stable document identifier from an article URL.
    ///
    /// Surrounding whitespace and any `#fragment` are dropped so that the
    /// same article linked with different anchors dedups to one entry.
    /// Returns `None` for an empty URL.
    pub fn id_from_url(url: &str) -> Option<String> {
        let trimmed = url.trim();
        let without_fragment = match trimmed.find('#') {
            Some(pos) => &trimmed[..pos],
            None => trimmed,
        };
        if without_fragment.is_empty() {
            None
        } else {
            Some(without_fragment.to_string())
        }
    }

    /// Text handed to the embedding provider for this document.
    ///
    /// `"{title}. {description} {body}"` with newlines folded into spaces,
    /// truncated to `max_chars` characters. The description is omitted when
    /// the body already is the description.
    pub fn embedding_text(&self, max_chars: usize) -> String {
        let mut text = format!("{}.", self.title.trim());
        if let Some(desc) = self.description.as_deref().map(str::trim) {
            if !desc.is_empty() && desc != self.body.trim() {
                text.push(' ');
                text.push_str(desc);
            }
        }
        if !self.body.trim().is_empty() {
            text.push(' ');
            text.push_str(self.body.trim());
        }
        let folded = text.replace(['\r', '\n'], " ");
        truncate_chars(&folded, max_chars).to_string()
    }

    /// Publication time formatted as RFC 3339 (`2024-01-18T10:00:00Z`).
    pub fn published_label(&self) -> String {
        self.published_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// Truncate a string to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

/// A retrieved document and its similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}

/// Outcome tag carried by every [`Answer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    /// Retrieval and generation both succeeded.
    Ok,
    /// Generation was rate limited; the answer carries the retrieved context.
    Fallback,
    /// The question could not be embedded, or generation failed for a
    /// reason other than rate limiting.
    Error,
    /// Nothing has been ingested yet.
    IndexEmpty,
    /// Retrieval found documents but none cleared the similarity threshold.
    NoRelevantDocuments,
}

impl AnswerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerStatus::Ok => "ok",
            AnswerStatus::Fallback => "fallback",
            AnswerStatus::Error => "error",
            AnswerStatus::IndexEmpty => "index_empty",
            AnswerStatus::NoRelevantDocuments => "no_relevant_documents",
        }
    }
}

/// The structured response to a question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub question: String,
    pub answer: String,
    pub status: AnswerStatus,
    /// Identifiers of the documents that made it into the context.
    pub sources: Vec<String>,
    /// One-line summaries of the retrieved articles, filled on fallback.
    #[serde(default)]
    pub article_summaries: Vec<String>,
    pub num_documents: usize,
    pub index_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Answer {
    /// An answer with no supporting documents.
    pub fn bare(
        question: &str,
        status: AnswerStatus,
        text: impl Into<String>,
        index_size: usize,
    ) -> Self {
        Self {
            question: question.to_string(),
            answer: text.into(),
            status,
            sources: Vec::new(),
            article_summaries: Vec::new(),
            num_documents: 0,
            index_size,
            note: None,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::Document;
    use chrono::{TimeZone, Utc};

    pub fn doc(id: &str, title: &str, body: &str) -> Document {
        Document {
            id: id.to_string(),
            url: id.to_string(),
            title: title.to_string(),
            description: None,
            body: body.to_string(),
            source: "Wire".to_string(),
            author: None,
            image_url: None,
            published_at: Utc.with_ymd_and_hms(2024, 1, 18, 10, 0, 0).unwrap(),
            fetched_at: Utc.with_ymd_and_hms(2024, 1, 18, 10, 5, 0).unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::doc;
    use super::*;

    #[test]
    fn test_id_from_url_strips_fragment_and_whitespace() {
        assert_eq!(
            Document::id_from_url("  https://example.com/a#comments "),
            Some("https://example.com/a".to_string())
        );
        assert_eq!(Document::id_from_url("   "), None);
        assert_eq!(Document::id_from_url("#top"), None);
    }

    #[test]
    fn test_embedding_text_folds_newlines_and_truncates() {
        let mut d = doc("u1", "AI breakthrough", "Line one\nline two");
        d.description = Some("A model did a thing".to_string());
        assert_eq!(
            d.embedding_text(1000),
            "AI breakthrough. A model did a thing Line one line two"
        );
        assert_eq!(d.embedding_text(5), "AI br");
    }

    #[test]
    fn test_embedding_text_skips_description_equal_to_body() {
        let mut d = doc("u1", "Title", "Same text");
        d.description = Some("Same text".to_string());
        assert_eq!(d.embedding_text(100), "Title. Same text");
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&AnswerStatus::IndexEmpty).unwrap();
        assert_eq!(json, "\"index_empty\"");
        assert_eq!(AnswerStatus::Fallback.as_str(), "fallback");
    }
}
