use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Key,
    Segment,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Key => "key",
            Self::Segment => "segment",
        }
    }
}

/// A remote resource materialized inside the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArtifact {
    /// Absolute remote URL.
    pub remote_uri: String,
    /// File name relative to the workspace root.
    pub local_name: String,
    pub kind: ArtifactKind,
}

/// Per-run record of stored artifacts.
///
/// Consulted before every fetch: a remote URI maps to at most one local
/// file, and no two remote URIs share a local name.
#[derive(Debug, Default)]
pub struct ArtifactLedger {
    by_remote: HashMap<String, usize>,
    names: HashSet<String>,
    artifacts: Vec<LocalArtifact>,
}

impl ArtifactLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, remote_uri: &str) -> Option<&LocalArtifact> {
        self.by_remote
            .get(remote_uri)
            .map(|&index| &self.artifacts[index])
    }

    pub fn contains(&self, remote_uri: &str) -> bool {
        self.by_remote.contains_key(remote_uri)
    }

    /// Claim a file name derived from `preferred`.
    ///
    /// The first claim gets `preferred` itself; later colliding claims get a
    /// numeric suffix before the extension (`seg.ts`, `seg_1.ts`, ...).
    pub fn reserve_name(&mut self, preferred: &str) -> String {
        let preferred = if preferred.is_empty() {
            "artifact"
        } else {
            preferred
        };
        if self.names.insert(preferred.to_string()) {
            return preferred.to_string();
        }

        let (stem, extension) = match preferred.rfind('.') {
            Some(dot) if dot > 0 => (&preferred[..dot], &preferred[dot..]),
            _ => (preferred, ""),
        };
        let mut n = 1usize;
        loop {
            let candidate = format!("{stem}_{n}{extension}");
            if self.names.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Record a stored artifact. Its local name must have been reserved.
    pub fn record(&mut self, artifact: LocalArtifact) {
        if self.by_remote.contains_key(&artifact.remote_uri) {
            return;
        }
        self.names.insert(artifact.local_name.clone());
        self.by_remote
            .insert(artifact.remote_uri.clone(), self.artifacts.len());
        self.artifacts.push(artifact);
    }

    pub fn artifacts(&self) -> &[LocalArtifact] {
        &self.artifacts
    }

    pub fn count(&self, kind: ArtifactKind) -> usize {
        self.artifacts.iter().filter(|a| a.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Last path segment of `url`, query and fragment excluded.
pub(crate) fn basename(url: &url::Url) -> String {
    let name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    urlencoding::decode(name)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| name.to_string())
        .replace(['/', '\\'], "_")
}
