use std::collections::HashSet;
use std::sync::Arc;

use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{ArtifactKind, ArtifactLedger, LocalArtifact, RelocationOutcome, SkippedArtifact};
use crate::config::{KeyFailurePolicy, KeyFetchConfig};
use crate::error::{FetchError, TreeFetchError};
use crate::fetch::Fetcher;
use crate::manifest::ManifestLine;
use crate::workspace::Workspace;

/// Downloads the keys referenced by `#EXT-X-KEY` / `#EXT-X-SESSION-KEY` tags
/// and points the tags at the local copies.
///
/// Keys are plain resources: no segment authorization is attached. The n-th
/// distinct key URI is stored as `key_<n>.key`.
pub struct KeyRelocator {
    fetcher: Arc<dyn Fetcher>,
    config: KeyFetchConfig,
}

impl KeyRelocator {
    pub fn new(fetcher: Arc<dyn Fetcher>, config: KeyFetchConfig) -> Self {
        Self { fetcher, config }
    }

    #[instrument(name = "relocate_keys", skip_all, fields(base = %base_url))]
    pub async fn relocate(
        &self,
        lines: Vec<ManifestLine>,
        base_url: &Url,
        workspace: &Workspace,
        ledger: &mut ArtifactLedger,
        cancel: &CancellationToken,
    ) -> Result<RelocationOutcome, TreeFetchError> {
        let mut outcome = RelocationOutcome {
            lines: Vec::with_capacity(lines.len()),
            ..Default::default()
        };
        let mut failed: HashSet<String> = HashSet::new();
        let mut ordinal = 0usize;

        for line in lines {
            let ManifestLine::KeyReference { uri, .. } = &line else {
                outcome.lines.push(line);
                continue;
            };
            if cancel.is_cancelled() {
                return Err(TreeFetchError::Cancelled);
            }

            let remote = match base_url.join(uri) {
                Ok(remote) => remote,
                Err(e) => {
                    let error = FetchError::invalid_url(uri.as_str(), e.to_string());
                    self.on_failure(uri, error, &mut outcome)?;
                    continue;
                }
            };

            if let Some(existing) = ledger.get(remote.as_str()) {
                debug!(uri = %remote, local_name = %existing.local_name, "Key already stored");
                outcome.lines.push(line.with_key_uri(&existing.local_name));
                continue;
            }
            if failed.contains(remote.as_str()) {
                continue;
            }

            ordinal += 1;
            match self.fetcher.fetch(&remote, &HeaderMap::new()).await {
                Ok(bytes) => {
                    let local_name = ledger.reserve_name(&format!("key_{ordinal}.key"));
                    let path = workspace
                        .write(&local_name, &bytes)
                        .await
                        .map_err(|e| TreeFetchError::io(workspace.file(&local_name), e))?;
                    debug!(uri = %remote, path = %path.display(), bytes = bytes.len(), "Stored key");

                    let artifact = LocalArtifact {
                        remote_uri: remote.to_string(),
                        local_name,
                        kind: ArtifactKind::Key,
                    };
                    outcome.lines.push(line.with_key_uri(&artifact.local_name));
                    ledger.record(artifact.clone());
                    outcome.stored.push(artifact);
                }
                Err(FetchError::Cancelled) => return Err(TreeFetchError::Cancelled),
                Err(error) => {
                    failed.insert(remote.to_string());
                    self.on_failure(remote.as_str(), error, &mut outcome)?;
                }
            }
        }

        Ok(outcome)
    }

    /// Apply the failure policy; under `DropTag` the tag line is simply not
    /// carried into the output.
    fn on_failure(
        &self,
        uri: &str,
        error: FetchError,
        outcome: &mut RelocationOutcome,
    ) -> Result<(), TreeFetchError> {
        match self.config.failure_policy {
            KeyFailurePolicy::DropTag => {
                warn!(uri, error = %error, "Key fetch failed, dropping key tag");
                outcome.skipped.push(SkippedArtifact {
                    remote_uri: uri.to_string(),
                    kind: ArtifactKind::Key,
                    reason: error.to_string(),
                });
                Ok(())
            }
            KeyFailurePolicy::FailAsset => Err(TreeFetchError::Key {
                uri: uri.to_string(),
                source: error,
            }),
        }
    }
}
