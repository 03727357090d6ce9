// src/utils/html_debug.rs
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::documents::Document;
use crate::extractors::candidate::{Candidate, Span};
use crate::extractors::consolidate::ConsolidatedRecord;
use crate::extractors::validate::RejectionRecord;
use crate::utils::error::StorageError;

/// How a highlighted span fared in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighlightKind {
    Winner,
    Accepted,
    Rejected,
}

impl HighlightKind {
    fn css_class(self) -> &'static str {
        match self {
            HighlightKind::Winner => "highlight-winner",
            HighlightKind::Accepted => "highlight-accepted",
            HighlightKind::Rejected => "highlight-rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Highlight {
    pub span: Span,
    pub kind: HighlightKind,
    /// Hover text, e.g. `stock_symbol [under_the_symbol]`.
    pub label: String,
}

/// Highlights for every candidate drawn from `document`.
pub fn document_highlights(
    document: &Document,
    candidates: &[Candidate],
    rejections: &[RejectionRecord],
    record: &ConsolidatedRecord,
) -> Vec<Highlight> {
    candidates
        .iter()
        .filter(|c| c.source_document_id == document.id)
        .map(|c| {
            let rejection = rejections.iter().find(|r| {
                r.source_document_id == c.source_document_id
                    && r.field == c.field
                    && r.pattern_name == c.pattern_name
                    && r.span == c.span
            });
            let is_winner = record.get(c.field).is_some_and(|s| {
                s.winner.source_document_id == c.source_document_id
                    && s.winner.pattern_name == c.pattern_name
                    && s.winner.span == c.span
            });
            let (kind, label) = match rejection {
                Some(r) => (
                    HighlightKind::Rejected,
                    format!("{} [{}]: {}", c.field, c.pattern_name, r.message),
                ),
                None if is_winner => (HighlightKind::Winner, format!("{} [{}] winner", c.field, c.pattern_name)),
                None => (
                    HighlightKind::Accepted,
                    format!("{} [{}] conf {:.2}", c.field, c.pattern_name, c.confidence),
                ),
            };
            Highlight { span: c.span, kind, label }
        })
        .collect()
}

/// Renders the document's pages with highlighted spans as a standalone HTML page.
///
/// Overlapping spans keep the first (earliest-starting) highlight.
pub fn render_debug_html(document: &Document, highlights: &[Highlight]) -> String {
    let mut debug_html = String::from("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<style>\n");
    debug_html.push_str("body { font-family: monospace; white-space: pre-wrap; }\n");
    debug_html.push_str(".page { border-top: 2px solid #999; margin-top: 1em; }\n");
    debug_html.push_str(".highlight-winner { background-color: #90EE90; }\n");
    debug_html.push_str(".highlight-accepted { background-color: #FFFF00; }\n");
    debug_html.push_str(".highlight-rejected { background-color: #FFC0CB; text-decoration: line-through; }\n");
    debug_html.push_str("</style>\n");
    debug_html.push_str(&format!("<title>{}</title>\n</head>\n<body>\n", escape_html(&document.id)));

    for (page_index, page) in document.pages.iter().enumerate() {
        debug_html.push_str(&format!("<div class=\"page\" id=\"page-{}\">", page_index + 1));

        let mut on_page: Vec<&Highlight> = highlights
            .iter()
            .filter(|h| h.span.page == page_index && h.span.end <= page.len() && h.span.start < h.span.end)
            .collect();
        on_page.sort_by_key(|h| (h.span.start, h.span.end));

        let mut last_pos = 0;
        for h in on_page {
            if h.span.start < last_pos {
                continue;
            }
            let (Some(before), Some(marked)) = (page.get(last_pos..h.span.start), page.get(h.span.start..h.span.end)) else {
                continue;
            };
            debug_html.push_str(&escape_html(before));
            debug_html.push_str(&format!(
                "<span class=\"{}\" title=\"{}\">",
                h.kind.css_class(),
                escape_html(&h.label)
            ));
            debug_html.push_str(&escape_html(marked));
            debug_html.push_str("</span>");
            last_pos = h.span.end;
        }
        if let Some(rest) = page.get(last_pos..) {
            debug_html.push_str(&escape_html(rest));
        }
        debug_html.push_str("</div>\n");
    }

    debug_html.push_str("</body>\n</html>");
    debug_html
}

/// Writes the annotated document to `path`.
pub fn save_debug_html(document: &Document, highlights: &[Highlight], path: &Path) -> Result<(), StorageError> {
    let mut file = File::create(path)?;
    file.write_all(render_debug_html(document, highlights).as_bytes())?;
    tracing::info!("Saved debug HTML to {}", path.display());
    Ok(())
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn highlight(start: usize, end: usize, kind: HighlightKind) -> Highlight {
        Highlight {
            span: Span { page: 0, start, end },
            kind,
            label: "stock_symbol [test]".into(),
        }
    }

    #[test]
    fn marks_spans_and_escapes_text() {
        let doc = Document::from_text("release.txt", "BLBD <NASDAQ> under");
        let html = render_debug_html(
            &doc,
            &[highlight(0, 4, HighlightKind::Winner), highlight(14, 19, HighlightKind::Rejected)],
        );
        assert!(html.contains("<span class=\"highlight-winner\" title=\"stock_symbol [test]\">BLBD</span>"));
        assert!(html.contains("&lt;NASDAQ&gt;"));
        assert!(html.contains("<span class=\"highlight-rejected\" title=\"stock_symbol [test]\">under</span>"));
    }

    #[test]
    fn overlapping_spans_keep_the_first() {
        let doc = Document::from_text("a.txt", "Macon, Georgia");
        let html = render_debug_html(
            &doc,
            &[highlight(0, 14, HighlightKind::Winner), highlight(0, 5, HighlightKind::Accepted)],
        );
        assert_eq!(html.matches("<span").count(), 1);
        assert!(html.contains("class=\"highlight-accepted\""));
        assert!(html.contains(">Macon</span>, Georgia"));
    }

    #[test]
    fn out_of_range_spans_are_ignored() {
        let doc = Document::from_text("a.txt", "short");
        let html = render_debug_html(&doc, &[highlight(2, 99, HighlightKind::Accepted)]);
        assert!(!html.contains("<span"));
        assert!(html.contains("short"));
    }
}
