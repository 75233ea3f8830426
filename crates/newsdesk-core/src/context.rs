//! Context composition for answer generation.
//!
//! Retrieved documents are rendered one block each and concatenated, best
//! match first, until the character budget runs out:
//!
//! ```text
//! [BBC News - 2024-01-18T10:00:00Z] AI breakthrough
//! Researchers announced ...
//!
//! ---
//!
//! [Reuters - 2024-01-18T09:12:00Z] Markets rally
//! Stocks rose ...
//! ```
//!
//! Budgets are counted in characters, not bytes.

use crate::models::{truncate_chars, Document};

/// Separator placed between rendered documents.
pub const SEPARATOR: &str = "\n\n---\n\n";

/// Summaries longer than this are cut and suffixed with `...`.
const SUMMARY_MAX_CHARS: usize = 240;

/// The context handed to the generative provider and what went into it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposedContext {
    pub text: String,
    /// Ids of the documents included, in context order.
    pub sources: Vec<String>,
}

impl ComposedContext {
    pub fn document_count(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Render a single document as a context block.
pub fn render_document(doc: &Document) -> String {
    format!(
        "[{} - {}] {}\n{}",
        doc.source,
        doc.published_label(),
        doc.title,
        doc.body.trim()
    )
}

/// Concatenate documents into a context of at most `max_chars` characters.
///
/// Documents are taken in order and composition stops at the first one that
/// no longer fits. The first document is truncated rather than skipped when
/// it alone exceeds the budget, so a non-empty retrieval always produces a
/// non-empty context (given a non-zero budget).
pub fn compose_context<'a, I>(documents: I, max_chars: usize) -> ComposedContext
where
    I: IntoIterator<Item = &'a Document>,
{
    let separator_len = SEPARATOR.chars().count();
    let mut composed = ComposedContext::default();
    let mut used = 0usize;

    for doc in documents {
        let block = render_document(doc);
        let block_len = block.chars().count();
        let sep = if composed.sources.is_empty() { 0 } else { separator_len };

        if used + sep + block_len <= max_chars {
            if sep > 0 {
                composed.text.push_str(SEPARATOR);
            }
            composed.text.push_str(&block);
            composed.sources.push(doc.id.clone());
            used += sep + block_len;
        } else {
            if composed.sources.is_empty() && max_chars > 0 {
                composed.text.push_str(truncate_chars(&block, max_chars));
                composed.sources.push(doc.id.clone());
            }
            break;
        }
    }

    composed
}

/// A compact, single-line summary of a document.
///
/// `[source - published] title: description`, whitespace collapsed and the
/// description capped at 240 characters.
pub fn summarize_document(doc: &Document) -> String {
    let title = match doc.title.trim() {
        "" => "(untitled)",
        t => t,
    };
    let source = match doc.source.trim() {
        "" => "Unknown",
        s => s,
    };
    let prefix = format!("[{} - {}] {}", source, doc.published_label(), title);

    let raw = doc
        .description
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .unwrap_or(&doc.body);
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return prefix;
    }

    let description = if collapsed.chars().count() > SUMMARY_MAX_CHARS {
        format!("{}...", truncate_chars(&collapsed, SUMMARY_MAX_CHARS - 3))
    } else {
        collapsed
    };
    format!("{}: {}", prefix, description)
}

pub fn summarize_documents<'a, I>(documents: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Document>,
{
    documents.into_iter().map(summarize_document).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::doc;

    #[test]
    fn test_render_document() {
        let d = doc("u1", "AI breakthrough", "Researchers announced a model.\n");
        assert_eq!(
            render_document(&d),
            "[Wire - 2024-01-18T10:00:00Z] AI breakthrough\nResearchers announced a model."
        );
    }

    #[test]
    fn test_compose_joins_with_separator() {
        let docs = vec![doc("u1", "One", "first"), doc("u2", "Two", "second")];
        let ctx = compose_context(&docs, 3000);
        assert_eq!(ctx.sources, vec!["u1", "u2"]);
        assert_eq!(ctx.document_count(), 2);
        assert_eq!(
            ctx.text,
            format!(
                "{}{}{}",
                render_document(&docs[0]),
                SEPARATOR,
                render_document(&docs[1])
            )
        );
    }

    #[test]
    fn test_compose_stops_at_budget() {
        let docs = vec![
            doc("u1", "One", &"a".repeat(40)),
            doc("u2", "Two", &"b".repeat(40)),
            doc("u3", "Three", "short"),
        ];
        let first_len = render_document(&docs[0]).chars().count();
        let ctx = compose_context(&docs, first_len + 10);
        assert_eq!(ctx.sources, vec!["u1"]);
        assert!(ctx.text.chars().count() <= first_len + 10);
    }

    #[test]
    fn test_compose_truncates_oversized_first_document() {
        let docs = vec![doc("u1", "Huge", &"x".repeat(500))];
        let ctx = compose_context(&docs, 100);
        assert_eq!(ctx.sources, vec!["u1"]);
        assert_eq!(ctx.text.chars().count(), 100);
    }

    #[test]
    fn test_compose_empty_inputs() {
        let none: Vec<Document> = Vec::new();
        assert!(compose_context(&none, 100).is_empty());

        let docs = vec![doc("u1", "T", "body")];
        let ctx = compose_context(&docs, 0);
        assert!(ctx.is_empty());
        assert_eq!(ctx.document_count(), 0);
    }

    #[test]
    fn test_summary_prefers_description_and_caps_length() {
        let mut d = doc("u1", "Markets rally", "full body text");
        d.description = Some(format!("  Stocks   rose {}", "y".repeat(300)));
        let summary = summarize_document(&d);
        assert!(summary.starts_with("[Wire - 2024-01-18T10:00:00Z] Markets rally: Stocks rose "));
        assert!(summary.ends_with("..."));
        let description = summary.split_once(": ").unwrap().1;
        assert_eq!(description.chars().count(), 240);
    }

    #[test]
    fn test_summary_without_text() {
        let mut d = doc("u1", "", "   ");
        d.source = String::new();
        assert_eq!(
            summarize_document(&d),
            "[Unknown - 2024-01-18T10:00:00Z] (untitled)"
        );
    }
}
