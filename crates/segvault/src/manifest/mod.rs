//! Line-preserving model of HLS playlist text.
//!
//! A [`Manifest`] keeps every input line, in order, as a typed
//! [`ManifestLine`]. Rewrites substitute content inside lines; they never
//! reorder them.

pub mod attributes;
mod parser;
mod variant;
mod writer;

use std::ops::Range;

pub use parser::parse_manifest;
pub use variant::{Variant, select_variant};
pub use writer::write_manifest;

pub const STREAM_INF_TAG: &str = "#EXT-X-STREAM-INF";
pub const KEY_TAG: &str = "#EXT-X-KEY";
pub const SESSION_KEY_TAG: &str = "#EXT-X-SESSION-KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScope {
    Segment,
    Session,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLine {
    /// Empty or whitespace-only line.
    Blank(String),
    /// `#` line that is not an `#EXT` tag.
    Comment(String),
    /// `#EXT-X-STREAM-INF`, announcing the variant on the next URI line.
    VariantStream { raw: String, bandwidth: Option<u64> },
    /// Key tag with a `URI` attribute; `uri_span` addresses the value in `raw`.
    KeyReference {
        raw: String,
        scope: KeyScope,
        uri: String,
        uri_span: Range<usize>,
    },
    /// Bare line naming a segment or nested manifest.
    SegmentReference { raw: String, uri: String },
    /// Any other tag, kept verbatim.
    Other(String),
}

impl ManifestLine {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Blank(raw)
            | Self::Comment(raw)
            | Self::Other(raw)
            | Self::VariantStream { raw, .. }
            | Self::KeyReference { raw, .. }
            | Self::SegmentReference { raw, .. } => raw,
        }
    }

    /// The same key tag with its `URI` value replaced by `local`; every other
    /// attribute is left byte-for-byte intact. Non-key lines are returned
    /// unchanged.
    pub fn with_key_uri(&self, local: &str) -> Self {
        match self {
            Self::KeyReference {
                raw,
                scope,
                uri_span,
                ..
            } => {
                let mut rewritten = String::with_capacity(raw.len() + local.len());
                rewritten.push_str(&raw[..uri_span.start]);
                rewritten.push_str(local);
                rewritten.push_str(&raw[uri_span.end..]);
                let span = uri_span.start..uri_span.start + local.len();
                Self::KeyReference {
                    raw: rewritten,
                    scope: *scope,
                    uri: local.to_string(),
                    uri_span: span,
                }
            }
            other => other.clone(),
        }
    }

    /// A segment line pointing at `local`.
    pub fn local_segment(local: &str) -> Self {
        Self::SegmentReference {
            raw: local.to_string(),
            uri: local.to_string(),
        }
    }
}

/// Line terminator detected in the source text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LineEnding {
    #[default]
    Lf,
    CrLf,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub lines: Vec<ManifestLine>,
    pub line_ending: LineEnding,
    pub trailing_newline: bool,
}

impl Manifest {
    /// Same layout, different lines.
    pub fn with_lines(&self, lines: Vec<ManifestLine>) -> Self {
        Self {
            lines,
            line_ending: self.line_ending,
            trailing_newline: self.trailing_newline,
        }
    }

    pub fn key_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| matches!(l, ManifestLine::KeyReference { .. }))
            .count()
    }

    pub fn segment_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| matches!(l, ManifestLine::SegmentReference { .. }))
            .count()
    }

    /// Whether the manifest references anything that can be remuxed.
    pub fn has_media(&self) -> bool {
        self.segment_count() > 0
    }

    pub fn render(&self) -> String {
        let ending = self.line_ending.as_str();
        let mut out = self
            .lines
            .iter()
            .map(ManifestLine::as_str)
            .collect::<Vec<_>>()
            .join(ending);
        if self.trailing_newline && !self.lines.is_empty() {
            out.push_str(ending);
        }
        out
    }
}
