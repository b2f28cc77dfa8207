use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::pipeline::{PipelineResult, PipelineState};
use crate::relocate::{ArtifactKind, LocalArtifact};

/// Progress notifications emitted by an [`crate::AssetPipeline`] run.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StateChanged {
        asset_id: String,
        state: PipelineState,
    },
    ArtifactStored {
        asset_id: String,
        artifact: LocalArtifact,
    },
    ArtifactSkipped {
        asset_id: String,
        kind: ArtifactKind,
        remote_uri: String,
        reason: String,
    },
    WorkspaceReleased {
        asset_id: String,
        path: PathBuf,
    },
    Finished {
        asset_id: String,
        result: PipelineResult,
    },
}

impl PipelineEvent {
    pub fn asset_id(&self) -> &str {
        match self {
            Self::StateChanged { asset_id, .. }
            | Self::ArtifactStored { asset_id, .. }
            | Self::ArtifactSkipped { asset_id, .. }
            | Self::WorkspaceReleased { asset_id, .. }
            | Self::Finished { asset_id, .. } => asset_id,
        }
    }
}

/// Optional event channel. Sends never block and a closed receiver is ignored.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink {
    tx: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl EventSink {
    pub(crate) fn new(tx: Option<mpsc::UnboundedSender<PipelineEvent>>) -> Self {
        Self { tx }
    }

    pub(crate) fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
