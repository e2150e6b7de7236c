//! Adds and removes derived-file sources in document markup.

mod markup;

use std::sync::Arc;

pub use markup::{HtmlMarkup, MediaElement, MediaMarkup, SourceTag};

use crate::content::DERIVED_NAME_MARKER;
use crate::media::MediaKind;

/// Result of rewriting one document's markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub content: String,
    /// Whether `content` differs from the input.
    pub changed: bool,
    /// Number of sources inserted.
    pub inserted: usize,
    /// File names of stale derived sources that were removed.
    pub removed: Vec<String>,
}

impl Rewrite {
    fn new(input: &str, content: String, inserted: usize, removed: Vec<String>) -> Self {
        Self {
            changed: content != input,
            content,
            inserted,
            removed,
        }
    }
}

/// Rewrites media elements so they carry a source for the derived file.
///
/// Pure with respect to its inputs: the caller loads and persists documents.
#[derive(Clone)]
pub struct DocumentRewriter {
    markup: Arc<dyn MediaMarkup>,
    source_prefix: String,
}

impl DocumentRewriter {
    pub fn new(markup: Arc<dyn MediaMarkup>, source_prefix: impl Into<String>) -> Self {
        Self {
            markup,
            source_prefix: source_prefix.into(),
        }
    }

    /// Rewriter with the HTML engine.
    pub fn html(source_prefix: impl Into<String>) -> Self {
        Self::new(Arc::new(HtmlMarkup::new()), source_prefix)
    }

    fn file_name<'a>(&self, src: &'a str) -> &'a str {
        src.strip_prefix(self.source_prefix.as_str()).unwrap_or(src)
    }

    /// Add a source for `derived` to every `kind` element that embeds `original`.
    ///
    /// The new source goes right after the element's first source. Other
    /// derived sources in the element are stale and get removed. Elements
    /// that already carry `derived` keep it where it is.
    pub fn rewrite(&self, content: &str, original: &str, derived: &str, kind: MediaKind) -> Rewrite {
        let elements = self.markup.find_media_sources(content, kind);
        let derived_src = format!("{}{}", self.source_prefix, derived);

        let mut out = content.to_string();
        let mut inserted = 0;
        let mut removed = Vec::new();

        // Back to front, so spans of earlier elements stay valid.
        for element in elements.iter().rev() {
            let Some(anchor) = element.sources.first() else {
                continue;
            };
            if self.file_name(&anchor.src) != original {
                continue;
            }

            let mut has_derived = false;
            for source in element.sources.iter().skip(1).rev() {
                let name = self.file_name(&source.src);
                if name == derived {
                    has_derived = true;
                } else if name.contains(DERIVED_NAME_MARKER) {
                    out = self.markup.remove_source(&out, source);
                    removed.push(name.to_string());
                }
            }

            if !has_derived {
                out = self.markup.insert_source(&out, anchor, &derived_src);
                inserted += 1;
            }
        }

        removed.reverse();
        Rewrite::new(content, out, inserted, removed)
    }

    /// Remove every source pointing at `derived` from `kind` elements.
    pub fn remove_reference(&self, content: &str, derived: &str, kind: MediaKind) -> Rewrite {
        let elements = self.markup.find_media_sources(content, kind);

        let mut out = content.to_string();
        let mut removed = Vec::new();
        for source in elements
            .iter()
            .rev()
            .flat_map(|element| element.sources.iter().rev())
        {
            if self.file_name(&source.src) == derived {
                out = self.markup.remove_source(&out, source);
                removed.push(derived.to_string());
            }
        }

        Rewrite::new(content, out, 0, removed)
    }
}
