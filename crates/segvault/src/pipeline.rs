//! End-to-end acquisition of one asset.
//!
//! ```text
//! Created -> ResolvingManifest -> SelectingVariant -> FetchingTree
//!         -> Rewriting -> Remuxing -> Succeeded | Failed(kind)
//! ```
//!
//! Progressive assets skip straight from `ResolvingManifest` to a terminal
//! state. Every run that acquired a workspace releases it exactly once
//! before returning.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::header::HeaderMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::config::EngineConfig;
use crate::error::{FailureKind, FetchError, TreeFetchError};
use crate::events::{EventSink, PipelineEvent};
use crate::fetch::{AuthContext, Fetcher, TokenProvider};
use crate::manifest::{Manifest, parse_manifest, select_variant, write_manifest};
use crate::media::{AssetRequest, MediaKind};
use crate::relocate::{ArtifactLedger, KeyRelocator, RelocationOutcome, SegmentFetcher};
use crate::remux::MediaRemuxer;
use crate::workspace::{self, Workspace};

const MASTER_FILE: &str = "main.m3u8";
const RENDITION_FILE: &str = "playlist.m3u8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    ResolvingManifest,
    SelectingVariant,
    FetchingTree,
    Rewriting,
    Remuxing,
    Succeeded,
    Failed(FailureKind),
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::ResolvingManifest => "resolving_manifest",
            Self::SelectingVariant => "selecting_variant",
            Self::FetchingTree => "fetching_tree",
            Self::Rewriting => "rewriting",
            Self::Remuxing => "remuxing",
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }

    /// Terminal failure for a run interrupted while in this state.
    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Created | Self::ResolvingManifest => FailureKind::ManifestFetchFailed,
            Self::SelectingVariant => FailureKind::NoVariantFound,
            Self::FetchingTree | Self::Rewriting => FailureKind::TreeFetchFailed,
            Self::Remuxing | Self::Succeeded => FailureKind::RemuxFailed,
            Self::Failed(kind) => *kind,
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(kind) => write!(f, "failed({kind})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Outcome of one [`AssetPipeline::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineResult {
    pub asset_id: String,
    /// Destination path. When `succeeded` is true it holds this run's
    /// complete output; a failed run never writes to it, so anything found
    /// there after a failure predates the run.
    pub output_path: PathBuf,
    pub succeeded: bool,
    pub failure_kind: Option<FailureKind>,
    /// Human-readable cause of the failure.
    pub detail: Option<String>,
}

struct Failure {
    kind: FailureKind,
    detail: String,
}

impl Failure {
    fn new(kind: FailureKind, detail: impl std::fmt::Display) -> Self {
        Self {
            kind,
            detail: detail.to_string(),
        }
    }
}

/// State bookkeeping for a single run.
struct Progress<'a> {
    asset_id: &'a str,
    events: &'a EventSink,
    state: PipelineState,
}

impl Progress<'_> {
    fn enter(&mut self, state: PipelineState) {
        debug!(asset_id = %self.asset_id, from = %self.state, to = %state, "State transition");
        self.state = state;
        self.events.emit(PipelineEvent::StateChanged {
            asset_id: self.asset_id.to_string(),
            state,
        });
    }

    fn fail(&self, detail: impl std::fmt::Display) -> Failure {
        Failure::new(self.state.failure_kind(), detail)
    }
}

/// Composes manifest resolution, tree fetching, rewriting and remuxing.
///
/// The pipeline itself never retries; resilience belongs to the [`Fetcher`].
pub struct AssetPipeline {
    config: EngineConfig,
    fetcher: Arc<dyn Fetcher>,
    tokens: Option<Arc<dyn TokenProvider>>,
    remuxer: Arc<dyn MediaRemuxer>,
    events: EventSink,
    cancel: CancellationToken,
}

impl AssetPipeline {
    pub fn new(
        config: EngineConfig,
        fetcher: Arc<dyn Fetcher>,
        tokens: Option<Arc<dyn TokenProvider>>,
        remuxer: Arc<dyn MediaRemuxer>,
    ) -> Self {
        Self {
            config,
            fetcher,
            tokens,
            remuxer,
            events: EventSink::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        self.events = EventSink::new(Some(tx));
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Acquire one asset into `target_dir`.
    #[instrument(skip_all, fields(asset_id = %request.asset_id))]
    pub async fn run(&self, request: AssetRequest, target_dir: &Path) -> PipelineResult {
        let request = request.resolve_locator(self.config.manifest_host.as_deref());
        let output_path = target_dir.join(format!(
            "{}.{}",
            workspace::sanitize(&request.asset_id),
            self.config.output_extension
        ));
        let mut progress = Progress {
            asset_id: &request.asset_id,
            events: &self.events,
            state: PipelineState::Created,
        };
        progress.enter(PipelineState::Created);
        info!(url = %request.manifest_url, kind = ?request.kind, "Starting asset");

        let outcome = match Workspace::acquire(target_dir, &request.asset_id).await {
            Ok(workspace) => {
                let outcome = match request.kind {
                    MediaKind::Progressive => {
                        self.acquire_progressive(&request, &workspace, &output_path, &mut progress)
                            .await
                    }
                    MediaKind::Segmented | MediaKind::KeyLocator => {
                        self.acquire_segmented(&request, &workspace, &output_path, &mut progress)
                            .await
                    }
                };
                self.release(workspace, &request.asset_id).await;
                outcome
            }
            Err(e) => Err(Failure::new(
                FailureKind::TreeFetchFailed,
                format!("failed to create workspace: {e}"),
            )),
        };

        let result = match outcome {
            Ok(()) => {
                progress.enter(PipelineState::Succeeded);
                info!(output = %output_path.display(), "Asset stored");
                PipelineResult {
                    asset_id: request.asset_id.clone(),
                    output_path,
                    succeeded: true,
                    failure_kind: None,
                    detail: None,
                }
            }
            Err(failure) => {
                progress.enter(PipelineState::Failed(failure.kind));
                error!(kind = %failure.kind, detail = %failure.detail, "Asset failed");
                PipelineResult {
                    asset_id: request.asset_id.clone(),
                    output_path,
                    succeeded: false,
                    failure_kind: Some(failure.kind),
                    detail: Some(failure.detail),
                }
            }
        };

        self.events.emit(PipelineEvent::Finished {
            asset_id: request.asset_id.clone(),
            result: result.clone(),
        });
        result
    }

    async fn release(&self, workspace: Workspace, asset_id: &str) {
        let path = workspace.path().to_path_buf();
        if let Err(e) = workspace.release().await {
            warn!(path = %path.display(), error = %e, "Failed to remove workspace");
        }
        self.events.emit(PipelineEvent::WorkspaceReleased {
            asset_id: asset_id.to_string(),
            path,
        });
    }

    fn auth_context(&self, request: &AssetRequest) -> Result<Option<AuthContext>, String> {
        if !request.requires_auth {
            return Ok(None);
        }
        let provider = self
            .tokens
            .clone()
            .ok_or_else(|| "asset requires authorization but no token provider is set".to_string())?;
        Ok(Some(AuthContext::new(
            request.file_id(),
            self.config.auth.clone(),
            provider,
        )))
    }

    /// Fetch `url`, authorized when `auth` is present.
    async fn fetch(
        &self,
        url: &Url,
        auth: Option<&AuthContext>,
    ) -> Result<bytes::Bytes, TreeFetchError> {
        let headers = match auth {
            Some(auth) => {
                let token = auth.token().await?;
                auth.headers(token, url)
                    .map_err(|source| fetch_error(url, source))?
            }
            None => HeaderMap::new(),
        };
        self.fetcher
            .fetch(url, &headers)
            .await
            .map_err(|source| fetch_error(url, source))
    }

    async fn acquire_progressive(
        &self,
        request: &AssetRequest,
        workspace: &Workspace,
        output_path: &Path,
        progress: &mut Progress<'_>,
    ) -> Result<(), Failure> {
        progress.enter(PipelineState::ResolvingManifest);
        self.check_cancelled(progress)?;
        let auth = self.auth_context(request).map_err(|e| progress.fail(e))?;

        let bytes = self
            .fetch(&request.manifest_url, auth.as_ref())
            .await
            .map_err(|e| progress.fail(e))?;
        if bytes.is_empty() {
            return Err(progress.fail("progressive download returned no data"));
        }

        let staging = format!("{}.partial", workspace::sanitize(&request.asset_id));
        let staged = workspace
            .write(&staging, &bytes)
            .await
            .map_err(|e| progress.fail(format!("failed to stage download: {e}")))?;
        tokio::fs::rename(&staged, output_path)
            .await
            .map_err(|e| progress.fail(format!("failed to move download into place: {e}")))?;
        debug!(bytes = bytes.len(), "Progressive asset stored");
        Ok(())
    }

    async fn acquire_segmented(
        &self,
        request: &AssetRequest,
        workspace: &Workspace,
        output_path: &Path,
        progress: &mut Progress<'_>,
    ) -> Result<(), Failure> {
        // Master manifest.
        progress.enter(PipelineState::ResolvingManifest);
        self.check_cancelled(progress)?;
        let auth = self.auth_context(request).map_err(|e| progress.fail(e))?;
        let master_url = &request.manifest_url;
        let master_text = self
            .fetch(master_url, auth.as_ref())
            .await
            .map_err(|e| progress.fail(e))?;
        workspace
            .write(MASTER_FILE, &master_text)
            .await
            .map_err(|e| progress.fail(format!("failed to store master manifest: {e}")))?;
        let master = parse_manifest(&String::from_utf8_lossy(&master_text));

        // Variant.
        progress.enter(PipelineState::SelectingVariant);
        let variant = select_variant(master_url, &master.lines)
            .ok_or_else(|| progress.fail("master manifest announces no variant"))?;
        info!(bandwidth = variant.bandwidth, uri = %variant.uri, "Selected rendition");

        // Rendition tree.
        progress.enter(PipelineState::FetchingTree);
        self.check_cancelled(progress)?;
        let rendition_text = self
            .fetch(&variant.uri, auth.as_ref())
            .await
            .map_err(|e| progress.fail(e))?;
        let rendition = parse_manifest(&String::from_utf8_lossy(&rendition_text));
        if !rendition.has_media() {
            return Err(progress.fail("rendition manifest references no segments"));
        }

        // Names the pipeline writes itself are never handed to artifacts.
        let mut ledger = ArtifactLedger::new();
        ledger.reserve_name(MASTER_FILE);
        ledger.reserve_name(RENDITION_FILE);
        let keys = KeyRelocator::new(self.fetcher.clone(), self.config.keys.clone())
            .relocate(
                rendition.lines.clone(),
                &variant.uri,
                workspace,
                &mut ledger,
                &self.cancel,
            )
            .await
            .map_err(|e| progress.fail(e))?;
        self.report(&request.asset_id, &keys);

        let segments = SegmentFetcher::new(self.fetcher.clone(), self.config.segments.clone())
            .fetch_all(
                keys.lines,
                &variant.uri,
                workspace,
                &mut ledger,
                auth.as_ref(),
                &self.cancel,
            )
            .await
            .map_err(|e| progress.fail(e))?;
        self.report(&request.asset_id, &segments);
        info!(
            keys = keys.stored.len(),
            segments = segments.stored.len(),
            skipped = keys.skipped.len() + segments.skipped.len(),
            "Rendition tree fetched"
        );

        // Local manifest.
        progress.enter(PipelineState::Rewriting);
        let local: Manifest = rendition.with_lines(segments.lines);
        let local_path = workspace.file(RENDITION_FILE);
        write_manifest(&local_path, &local)
            .await
            .map_err(|e| progress.fail(format!("failed to write local manifest: {e}")))?;

        // Container.
        progress.enter(PipelineState::Remuxing);
        self.check_cancelled(progress)?;
        self.remuxer
            .remux(&local_path, output_path, &self.cancel)
            .await
            .map_err(|e| progress.fail(e))?;
        Ok(())
    }

    fn report(&self, asset_id: &str, outcome: &RelocationOutcome) {
        for artifact in &outcome.stored {
            self.events.emit(PipelineEvent::ArtifactStored {
                asset_id: asset_id.to_string(),
                artifact: artifact.clone(),
            });
        }
        for skipped in &outcome.skipped {
            self.events.emit(PipelineEvent::ArtifactSkipped {
                asset_id: asset_id.to_string(),
                kind: skipped.kind,
                remote_uri: skipped.remote_uri.clone(),
                reason: skipped.reason.clone(),
            });
        }
    }

    fn check_cancelled(&self, progress: &Progress<'_>) -> Result<(), Failure> {
        if self.cancel.is_cancelled() {
            Err(progress.fail("run cancelled"))
        } else {
            Ok(())
        }
    }
}

fn fetch_error(url: &Url, source: FetchError) -> TreeFetchError {
    match source {
        FetchError::Cancelled => TreeFetchError::Cancelled,
        source => TreeFetchError::Resource {
            uri: url.to_string(),
            source,
        },
    }
}
