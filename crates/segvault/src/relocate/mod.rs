//! Materialization of a rendition's keys and segments into a [`Workspace`].
//!
//! Both passes consume the typed manifest lines and hand back new lines whose
//! references point at workspace files where the fetch succeeded.
//!
//! [`Workspace`]: crate::Workspace

mod artifacts;
mod keys;
mod segments;

pub use artifacts::{ArtifactKind, ArtifactLedger, LocalArtifact};
pub use keys::KeyRelocator;
pub use segments::SegmentFetcher;

use crate::manifest::ManifestLine;

/// A reference that could not be materialized and was handled by policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedArtifact {
    pub remote_uri: String,
    pub kind: ArtifactKind,
    pub reason: String,
}

/// Result of one relocation pass.
#[derive(Debug, Default)]
pub struct RelocationOutcome {
    pub lines: Vec<ManifestLine>,
    /// Artifacts written by this pass, in manifest order.
    pub stored: Vec<LocalArtifact>,
    pub skipped: Vec<SkippedArtifact>,
}
