// src/documents/mod.rs
//! Source documents as per-page plain text.

use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use scraper::{node::Node, ElementRef, Html, Selector};
use serde::Serialize;
use walkdir::WalkDir;

use crate::utils::error::{AppError, DocumentError};

const FORM_FEED: char = '\x0C';

static BODY_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("body").expect("Failed to compile BODY_SELECTOR"));

/// Elements whose text is never content.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "head", "noscript", "template"];

/// Elements that end a line of text.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "blockquote", "br", "div", "dd", "dt", "footer", "h1", "h2", "h3", "h4",
    "h5", "h6", "header", "hr", "li", "p", "section", "table", "tr",
];

/// One source document. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// File name, unique within a run.
    pub id: String,
    pub source_path: PathBuf,
    pub company_hint: Option<String>,
    pub pages: Vec<String>,
}

impl Document {
    pub fn new(
        id: impl Into<String>,
        source_path: impl Into<PathBuf>,
        company_hint: Option<String>,
        pages: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_path: source_path.into(),
            company_hint,
            pages,
        }
    }

    /// In-memory document whose pages are split on form feeds.
    pub fn from_text(id: impl Into<String>, text: &str) -> Self {
        let id = id.into();
        Self::new(id.clone(), PathBuf::from(&id), None, split_pages(text))
    }

    /// True when no page holds any non-whitespace text.
    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(|p| p.trim().is_empty())
    }

    pub fn text_len(&self) -> usize {
        self.pages.iter().map(String::len).sum()
    }
}

/// A document that could not be turned into text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentFailure {
    pub document_id: String,
    pub error: String,
}

impl DocumentFailure {
    pub fn new(document_id: impl Into<String>, error: &DocumentError) -> Self {
        Self {
            document_id: document_id.into(),
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct LoadedDocuments {
    pub documents: Vec<Document>,
    pub failures: Vec<DocumentFailure>,
}

/// Loads every document directly inside `dir`, ordered by file name.
///
/// Unreadable or unsupported files become failures; `.json` and dot-files are skipped.
pub fn load_directory(dir: &Path, company_hint: Option<&str>) -> Result<LoadedDocuments, AppError> {
    if !dir.is_dir() {
        return Err(AppError::Config(format!(
            "Input directory {} does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut loaded = LoadedDocuments::default();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                let id = file_id(&path);
                let io = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "directory walk failed"));
                let error = DocumentError::Read { path, source: io };
                tracing::warn!("Skipping {}: {}", id, error);
                loaded.failures.push(DocumentFailure::new(id, &error));
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        match load_file(path, company_hint) {
            Ok(Some(document)) => {
                tracing::debug!(
                    "Loaded {} ({} pages, {} bytes)",
                    document.id,
                    document.pages.len(),
                    document.text_len()
                );
                loaded.documents.push(document);
            }
            Ok(None) => tracing::debug!("Skipping metadata file {}", path.display()),
            Err(e) => {
                tracing::warn!("Failed to load {}: {}", path.display(), e);
                loaded.failures.push(DocumentFailure::new(file_id(path), &e));
            }
        }
    }

    tracing::info!(
        "Loaded {} documents from {} ({} failed)",
        loaded.documents.len(),
        dir.display(),
        loaded.failures.len()
    );
    Ok(loaded)
}

/// Loads one file. `Ok(None)` means the file is metadata and was skipped.
pub fn load_file(path: &Path, company_hint: Option<&str>) -> Result<Option<Document>, DocumentError> {
    let id = file_id(path);
    if id.starts_with('.') {
        return Ok(None);
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let pages = match extension.as_str() {
        "json" => return Ok(None),
        "txt" | "text" => split_pages(&read_utf8(path)?),
        "html" | "htm" => html_pages(&read_utf8(path)?),
        _ => return Err(DocumentError::UnsupportedFormat(path.to_path_buf())),
    };

    Ok(Some(Document::new(
        id,
        path,
        company_hint.map(str::to_string),
        pages,
    )))
}

fn file_id(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn read_utf8(path: &Path) -> Result<String, DocumentError> {
    let bytes = fs::read(path).map_err(|source| DocumentError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|_| DocumentError::Encoding(path.to_path_buf()))
}

fn split_pages(text: &str) -> Vec<String> {
    text.split(FORM_FEED).map(str::to_string).collect()
}

/// Reduces an HTML document to text, starting a new page at page-break styled elements.
fn html_pages(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut pages = vec![String::new()];

    match document.select(&BODY_SELECTOR).next() {
        Some(body) => walk(body, &mut pages),
        None => walk(document.root_element(), &mut pages),
    }

    let pages: Vec<String> = pages
        .into_iter()
        .map(|p| tidy_lines(&p))
        .filter(|p| !p.is_empty())
        .collect();
    if pages.is_empty() {
        vec![String::new()]
    } else {
        pages
    }
}

fn walk(element: ElementRef<'_>, pages: &mut Vec<String>) {
    let name = element.value().name();
    if SKIPPED_ELEMENTS.contains(&name) {
        return;
    }

    let style = element
        .value()
        .attr("style")
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if style.contains("page-break-before") {
        pages.push(String::new());
    }

    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            walk(child_element, pages);
        } else if let Node::Text(text) = child.value() {
            if let Some(page) = pages.last_mut() {
                page.push_str(&text.replace('\u{a0}', " "));
            }
        }
    }

    if let Some(page) = pages.last_mut() {
        if BLOCK_ELEMENTS.contains(&name) {
            page.push('\n');
        } else if name == "td" || name == "th" {
            page.push(' ');
        }
    }

    if style.contains("page-break-after") {
        pages.push(String::new());
    }
}

/// Collapses runs of spaces within lines and drops blank lines.
fn tidy_lines(page: &str) -> String {
    page.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
