use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::ProgressStyle;
use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, instrument, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use url::Url;

use super::artifacts::basename;
use super::{ArtifactKind, ArtifactLedger, LocalArtifact, RelocationOutcome, SkippedArtifact};
use crate::config::{SegmentFailurePolicy, SegmentFetchConfig};
use crate::error::{FetchError, TreeFetchError};
use crate::fetch::{AuthContext, Fetcher};
use crate::manifest::ManifestLine;
use crate::workspace::Workspace;

/// Downloads every segment referenced by a rendition manifest.
///
/// Up to `concurrency` downloads run at once. Each remote URI is fetched at
/// most once and written to its own file. Lines are rewritten only after
/// every download has settled.
pub struct SegmentFetcher {
    fetcher: Arc<dyn Fetcher>,
    config: SegmentFetchConfig,
}

struct SegmentJob {
    remote: Url,
    local_name: String,
}

enum JobFailure {
    /// Handled by the failure policy.
    Fetch(FetchError),
    /// Ends the pass regardless of policy.
    Fatal(TreeFetchError),
}

impl SegmentFetcher {
    pub fn new(fetcher: Arc<dyn Fetcher>, config: SegmentFetchConfig) -> Self {
        Self { fetcher, config }
    }

    #[instrument(
        name = "fetch_segments",
        skip_all,
        fields(base = %base_url, concurrency = self.config.concurrency.max(1))
    )]
    pub async fn fetch_all(
        &self,
        lines: Vec<ManifestLine>,
        base_url: &Url,
        workspace: &Workspace,
        ledger: &mut ArtifactLedger,
        auth: Option<&AuthContext>,
        cancel: &CancellationToken,
    ) -> Result<RelocationOutcome, TreeFetchError> {
        let mut outcome = RelocationOutcome::default();

        // Resolve references and plan one job per distinct remote URI.
        let mut resolved: Vec<Option<String>> = Vec::with_capacity(lines.len());
        let mut jobs: Vec<SegmentJob> = Vec::new();
        let mut planned: HashSet<String> = HashSet::new();
        for line in &lines {
            let ManifestLine::SegmentReference { uri, .. } = line else {
                resolved.push(None);
                continue;
            };
            let remote = match base_url.join(uri) {
                Ok(remote) => remote,
                Err(e) => {
                    resolved.push(None);
                    self.on_failure(
                        uri,
                        FetchError::invalid_url(uri.as_str(), e.to_string()),
                        &mut outcome,
                    )?;
                    continue;
                }
            };
            let key = remote.to_string();
            if !ledger.contains(&key) && planned.insert(key.clone()) {
                let local_name = ledger.reserve_name(&basename(&remote));
                jobs.push(SegmentJob { remote, local_name });
            }
            resolved.push(Some(key));
        }

        let span = Span::current();
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{span_child_prefix}{spinner:.yellow} [{bar:20.yellow/white}] {pos}/{len} segments {msg}")
        {
            span.pb_set_style(&style.progress_chars("=> "));
        }
        span.pb_set_length(jobs.len() as u64);
        info!(
            segments = jobs.len(),
            references = resolved.iter().flatten().count(),
            "Fetching segments"
        );

        // Run the jobs with bounded concurrency. A fatal failure cancels the
        // outstanding ones; whatever is in flight is drained before returning.
        let pass_cancel = cancel.child_token();
        let concurrency = self.config.concurrency.max(1);
        let mut pending = jobs.into_iter();
        let mut in_flight = FuturesUnordered::new();
        let mut fatal: Option<TreeFetchError> = None;

        loop {
            while fatal.is_none() && in_flight.len() < concurrency {
                let Some(job) = pending.next() else {
                    break;
                };
                in_flight.push(self.fetch_one(job, workspace, auth, &pass_cancel));
            }

            let Some((job, result)) = in_flight.next().await else {
                break;
            };
            span.pb_inc(1);

            match result {
                Ok(path) => {
                    debug!(uri = %job.remote, path = %path.display(), "Stored segment");
                    let artifact = LocalArtifact {
                        remote_uri: job.remote.to_string(),
                        local_name: job.local_name,
                        kind: ArtifactKind::Segment,
                    };
                    ledger.record(artifact.clone());
                    outcome.stored.push(artifact);
                }
                Err(_) if fatal.is_some() => {}
                Err(JobFailure::Fetch(FetchError::Cancelled)) => {
                    fatal = Some(TreeFetchError::Cancelled);
                    pass_cancel.cancel();
                }
                Err(JobFailure::Fetch(error)) => {
                    if let Err(e) = self.on_failure(job.remote.as_str(), error, &mut outcome) {
                        fatal = Some(e);
                        pass_cancel.cancel();
                    }
                }
                Err(JobFailure::Fatal(e)) => {
                    fatal = Some(e);
                    pass_cancel.cancel();
                }
            }
        }

        if let Some(e) = fatal {
            warn!(error = %e, "Segment pass aborted");
            return Err(e);
        }
        if cancel.is_cancelled() {
            return Err(TreeFetchError::Cancelled);
        }

        outcome.lines = lines
            .into_iter()
            .zip(resolved)
            .map(|(line, remote)| {
                match remote.as_deref().and_then(|remote| ledger.get(remote)) {
                    Some(artifact) => ManifestLine::local_segment(&artifact.local_name),
                    None => line,
                }
            })
            .collect();
        // Restore manifest order for the artifacts written by this pass.
        let mut order: HashMap<&str, usize> = HashMap::new();
        for (i, line) in outcome.lines.iter().enumerate() {
            if let ManifestLine::SegmentReference { uri, .. } = line {
                order.entry(uri.as_str()).or_insert(i);
            }
        }
        let mut stored = std::mem::take(&mut outcome.stored);
        stored.sort_by_key(|a| order.get(a.local_name.as_str()).copied().unwrap_or(usize::MAX));
        outcome.stored = stored;

        info!(
            stored = outcome.stored.len(),
            skipped = outcome.skipped.len(),
            "Segment pass finished"
        );
        Ok(outcome)
    }

    async fn fetch_one(
        &self,
        job: SegmentJob,
        workspace: &Workspace,
        auth: Option<&AuthContext>,
        cancel: &CancellationToken,
    ) -> (SegmentJob, Result<PathBuf, JobFailure>) {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(JobFailure::Fetch(FetchError::Cancelled)),
            result = self.download(&job, workspace, auth) => result,
        };
        (job, result)
    }

    async fn download(
        &self,
        job: &SegmentJob,
        workspace: &Workspace,
        auth: Option<&AuthContext>,
    ) -> Result<PathBuf, JobFailure> {
        let headers = match auth {
            Some(auth) => {
                let token = auth.token().await.map_err(JobFailure::Fatal)?;
                auth.headers(token, &job.remote).map_err(JobFailure::Fetch)?
            }
            None => HeaderMap::new(),
        };

        let bytes = self
            .fetcher
            .fetch(&job.remote, &headers)
            .await
            .map_err(JobFailure::Fetch)?;

        workspace
            .write(&job.local_name, &bytes)
            .await
            .map_err(|e| JobFailure::Fatal(TreeFetchError::io(workspace.file(&job.local_name), e)))
    }

    fn on_failure(
        &self,
        uri: &str,
        error: FetchError,
        outcome: &mut RelocationOutcome,
    ) -> Result<(), TreeFetchError> {
        match self.config.failure_policy {
            SegmentFailurePolicy::KeepRemote => {
                warn!(uri, error = %error, "Segment fetch failed, keeping remote reference");
                outcome.skipped.push(SkippedArtifact {
                    remote_uri: uri.to_string(),
                    kind: ArtifactKind::Segment,
                    reason: error.to_string(),
                });
                Ok(())
            }
            SegmentFailurePolicy::FailAsset => Err(TreeFetchError::Segment {
                uri: uri.to_string(),
                source: error,
            }),
        }
    }
}
