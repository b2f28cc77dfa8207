//! Acquisition engine for segmented, token-authenticated media assets.
//!
//! One [`AssetPipeline`] run takes an [`AssetRequest`], walks the remote
//! manifest tree into a scoped [`Workspace`], rewrites the rendition manifest
//! to point at local files and remuxes it into a single container. The
//! destination file is either complete or absent when the run returns.
//!
//! Network access goes through the [`Fetcher`] and [`TokenProvider`] seams so
//! callers can supply their own session handling.

pub mod config;
pub mod error;
pub mod events;
pub mod fetch;
pub mod http;
pub mod manifest;
pub mod media;
pub mod pipeline;
pub mod proxy;
pub mod relocate;
pub mod remux;
pub mod retry;
pub mod workspace;

pub use config::{
    AuthScheme, EngineConfig, HttpConfig, KeyFailurePolicy, KeyFetchConfig, SegmentFailurePolicy,
    SegmentFetchConfig,
};
pub use error::{
    FailureKind, FetchError, PipelineError, RemuxError, RemuxFailureKind, TreeFetchError,
};
pub use events::PipelineEvent;
pub use fetch::{AuthContext, AuthToken, Fetcher, TokenGrant, TokenProvider};
pub use http::{HttpTokenProvider, ReqwestFetcher, create_client};
pub use manifest::{
    Manifest, ManifestLine, Variant, parse_manifest, select_variant, write_manifest,
};
pub use media::{AssetRequest, MediaKind};
pub use pipeline::{AssetPipeline, PipelineResult, PipelineState};
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
pub use relocate::{
    ArtifactKind, ArtifactLedger, KeyRelocator, LocalArtifact, RelocationOutcome, SegmentFetcher,
    SkippedArtifact,
};
pub use remux::{FfmpegRemuxer, MediaRemuxer, RemuxConfig};
pub use retry::RetryPolicy;
pub use workspace::Workspace;
