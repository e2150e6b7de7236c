//! Markup engine used by the document rewriter.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex_lite::Regex;

use crate::media::MediaKind;

/// A `<source>` tag inside a media element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTag {
    /// Byte range of the tag in the markup, including a closing `</source>` if present.
    pub span: Range<usize>,
    /// Decoded `src` attribute, empty when missing.
    pub src: String,
}

/// A `<video>` or `<audio>` element and its sources, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaElement {
    pub span: Range<usize>,
    pub sources: Vec<SourceTag>,
}

/// Operations the rewriter needs from a markup engine.
///
/// Spans returned by [`MediaMarkup::find_media_sources`] refer to the markup
/// passed in. Edits return new markup; applying several edits from the end
/// of the document backwards keeps earlier spans valid.
pub trait MediaMarkup: Send + Sync {
    /// Media elements of the given kind.
    fn find_media_sources(&self, markup: &str, kind: MediaKind) -> Vec<MediaElement>;

    /// Insert a new source with `src` directly after `after`.
    fn insert_source(&self, markup: &str, after: &SourceTag, src: &str) -> String;

    /// Remove a source tag.
    fn remove_source(&self, markup: &str, source: &SourceTag) -> String;
}

static VIDEO_ELEMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<video\b[^>]*>.*?</video\s*>").unwrap());

static AUDIO_ELEMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<audio\b[^>]*>.*?</audio\s*>").unwrap());

static SOURCE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<source\b[^>]*>(?:</source\s*>)?").unwrap());

static SRC_ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).unwrap()
});

/// Lightweight HTML engine working on byte spans.
///
/// Untouched markup is preserved byte for byte, so an insert followed by a
/// remove of the same source restores the input exactly.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlMarkup;

impl HtmlMarkup {
    pub fn new() -> Self {
        Self
    }

    fn element_pattern(kind: MediaKind) -> &'static Regex {
        match kind {
            MediaKind::Video => &*VIDEO_ELEMENT,
            MediaKind::Audio => &*AUDIO_ELEMENT,
        }
    }
}

impl MediaMarkup for HtmlMarkup {
    fn find_media_sources(&self, markup: &str, kind: MediaKind) -> Vec<MediaElement> {
        Self::element_pattern(kind)
            .find_iter(markup)
            .map(|element| {
                let start = element.start();
                let sources = SOURCE_TAG
                    .find_iter(element.as_str())
                    .map(|tag| SourceTag {
                        span: start + tag.start()..start + tag.end(),
                        src: src_attribute(tag.as_str()),
                    })
                    .collect();
                MediaElement {
                    span: element.range(),
                    sources,
                }
            })
            .collect()
    }

    fn insert_source(&self, markup: &str, after: &SourceTag, src: &str) -> String {
        let tag = format!(r#"<source src="{}">"#, escape_attribute(src));
        let mut out = String::with_capacity(markup.len() + tag.len());
        out.push_str(&markup[..after.span.end]);
        out.push_str(&tag);
        out.push_str(&markup[after.span.end..]);
        out
    }

    fn remove_source(&self, markup: &str, source: &SourceTag) -> String {
        let mut out = String::with_capacity(markup.len());
        out.push_str(&markup[..source.span.start]);
        out.push_str(&markup[source.span.end..]);
        out
    }
}

fn src_attribute(tag: &str) -> String {
    SRC_ATTRIBUTE
        .captures(tag)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)))
        .map(|value| unescape_attribute(value.as_str()))
        .unwrap_or_default()
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn unescape_attribute(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_video_sources() {
        let html = r#"<p>intro</p><video controls><source src="@@PLUGINFILE@@/a.webm" type="video/webm"><source src='b.mp4'></source></video>"#;
        let elements = HtmlMarkup.find_media_sources(html, MediaKind::Video);

        assert_eq!(elements.len(), 1);
        let sources = &elements[0].sources;
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].src, "@@PLUGINFILE@@/a.webm");
        assert_eq!(sources[1].src, "b.mp4");
        assert_eq!(&html[sources[1].span.clone()], "<source src='b.mp4'></source>");
    }

    #[test]
    fn test_find_is_kind_specific_and_case_insensitive() {
        let html = r#"<AUDIO><SOURCE SRC="x.ogg"></AUDIO><video><source src="y.webm"></video>"#;
        let audio = HtmlMarkup.find_media_sources(html, MediaKind::Audio);
        assert_eq!(audio.len(), 1);
        assert_eq!(audio[0].sources[0].src, "x.ogg");

        let video = HtmlMarkup.find_media_sources(html, MediaKind::Video);
        assert_eq!(video.len(), 1);
        assert_eq!(video[0].sources[0].src, "y.webm");
    }

    #[test]
    fn test_data_src_is_not_src() {
        assert_eq!(src_attribute(r#"<source data-src="no.webm">"#), "");
        assert_eq!(src_attribute(r#"<source src=plain.webm>"#), "plain.webm");
    }

    #[test]
    fn test_insert_then_remove_restores_input() {
        let html = "<video>\n  <source src=\"a.webm\">\n</video>";
        let markup = HtmlMarkup::new();
        let anchor = markup.find_media_sources(html, MediaKind::Video)[0].sources[0].clone();

        let inserted = markup.insert_source(html, &anchor, "a&b.mp4");
        assert!(inserted.contains(r#"<source src="a&amp;b.mp4">"#));

        let added = markup.find_media_sources(&inserted, MediaKind::Video)[0].sources[1].clone();
        assert_eq!(added.src, "a&b.mp4");
        assert_eq!(markup.remove_source(&inserted, &added), html);
    }

    #[test]
    fn test_element_without_sources() {
        let html = r#"<video src="a.webm"></video>"#;
        let elements = HtmlMarkup.find_media_sources(html, MediaKind::Video);
        assert_eq!(elements.len(), 1);
        assert!(elements[0].sources.is_empty());
    }
}
