use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use segvault_engine::{
    EngineConfig, KeyFailurePolicy, ProxyConfig, ProxyType, RetryPolicy, SegmentFailurePolicy,
};
use url::Url;

#[derive(Debug, Parser)]
#[command(
    name = "segvault",
    version,
    about = "Acquire segmented, token-protected media assets as single files"
)]
pub struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Download one asset and remux it into `<out>/<id>.mp4`
    Fetch(FetchArgs),
}

#[derive(Debug, clap::Args)]
pub struct FetchArgs {
    /// Asset identifier, used for output and workspace names
    #[arg(long)]
    pub id: String,

    /// Master manifest, key locator or progressive file URL
    #[arg(long)]
    pub url: String,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    pub out: PathBuf,

    /// Authorize manifest and segment requests with a per-asset token
    #[arg(long)]
    pub auth: bool,

    /// Token provisioning endpoint
    #[arg(long, env = "SEGVAULT_TOKEN_ENDPOINT", requires = "auth")]
    pub token_endpoint: Option<Url>,

    /// Bearer credential for the token endpoint
    #[arg(long, env = "SEGVAULT_BEARER", hide_env_values = true)]
    pub bearer: Option<String>,

    /// File id passed to token provisioning (defaults to --id)
    #[arg(long)]
    pub file_id: Option<String>,

    /// Maximum concurrent segment downloads
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..=64))]
    pub concurrency: u16,

    /// Path to the ffmpeg binary
    #[arg(long, env = "FFMPEG_PATH", default_value = "ffmpeg")]
    pub ffmpeg: String,

    /// Fail the asset when any segment cannot be downloaded
    #[arg(long)]
    pub strict_segments: bool,

    /// Fail the asset when any key cannot be downloaded
    #[arg(long)]
    pub strict_keys: bool,

    /// Referer header sent with every request
    #[arg(long, env = "SEGVAULT_REFERER")]
    pub referer: Option<String>,

    /// Origin header sent with every request
    #[arg(long, env = "SEGVAULT_ORIGIN")]
    pub origin: Option<String>,

    /// Host header for authorized requests
    #[arg(long)]
    pub host_override: Option<String>,

    /// Host serving manifests when --url is a key locator
    #[arg(long)]
    pub manifest_host: Option<String>,

    /// Request timeout in seconds (0 disables it)
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Retries per request on transient errors
    #[arg(long, default_value_t = 3)]
    pub retries: u32,

    /// Proxy URL for all requests
    #[arg(long)]
    pub proxy: Option<String>,

    #[arg(long, value_enum, default_value = "http", requires = "proxy")]
    pub proxy_type: ProxyType,
}

impl FetchArgs {
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();

        config.http.timeout = Duration::from_secs(self.timeout);
        config.http.referer = self.referer.clone();
        config.http.origin = self.origin.clone();
        config.http.proxy = self.proxy.as_ref().map(|url| ProxyConfig {
            url: url.clone(),
            proxy_type: self.proxy_type,
            auth: None,
        });

        config.retry = RetryPolicy {
            max_retries: self.retries,
            ..RetryPolicy::default()
        };
        config.auth.host_override = self.host_override.clone();
        config.segments.concurrency = usize::from(self.concurrency);
        config.segments.failure_policy = if self.strict_segments {
            SegmentFailurePolicy::FailAsset
        } else {
            SegmentFailurePolicy::KeepRemote
        };
        config.keys.failure_policy = if self.strict_keys {
            KeyFailurePolicy::FailAsset
        } else {
            KeyFailurePolicy::DropTag
        };
        config.remux.ffmpeg_path = self.ffmpeg.clone();
        config.manifest_host = self.manifest_host.clone();
        config
    }
}
