use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::proxy::ProxyConfig;
use crate::remux::RemuxConfig;
use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Transport options for [`crate::ReqwestFetcher`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Overall timeout for one request
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Read timeout (maximum time between receiving data chunks)
    pub read_timeout: Duration,

    /// User agent string
    pub user_agent: String,

    /// Headers sent with every request
    pub headers: HeaderMap,

    /// `Referer` sent with every request
    pub referer: Option<String>,

    /// `Origin` sent with every request
    pub origin: Option<String>,

    /// Proxy configuration (optional)
    pub proxy: Option<ProxyConfig>,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,

    pub danger_accept_invalid_certs: bool,

    /// Maximum idle connections to keep per host
    pub pool_max_idle_per_host: usize,

    /// Duration to keep idle connections alive before closing
    pub pool_idle_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: HttpConfig::get_default_headers(),
            referer: None,
            origin: None,
            proxy: None,
            use_system_proxy: true,
            danger_accept_invalid_certs: false,
            pool_max_idle_per_host: 10,
            pool_idle_timeout: Duration::from_secs(30),
        }
    }
}

impl HttpConfig {
    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));

        default_headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );
        default_headers
    }
}

/// How per-asset authorization is attached to segment requests.
///
/// A protected segment URL looks like `https://host/<root>/hls/<suffix>`; the
/// part after `path_marker` is URL-encoded into `path_header` and the token
/// content goes into `token_header`.
#[derive(Debug, Clone)]
pub struct AuthScheme {
    pub path_marker: String,
    pub token_header: String,
    pub path_header: String,
    /// Explicit `Host` header for authorized requests.
    pub host_override: Option<String>,
}

impl Default for AuthScheme {
    fn default() -> Self {
        Self {
            path_marker: "/hls/".to_string(),
            token_header: "content".to_string(),
            path_header: "x-content-uri".to_string(),
            host_override: None,
        }
    }
}

/// What to do with a key tag whose key cannot be downloaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum KeyFailurePolicy {
    /// Remove the tag line from the local manifest.
    #[default]
    DropTag,
    /// Fail the whole asset.
    FailAsset,
}

/// What to do with a segment that cannot be downloaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum SegmentFailurePolicy {
    /// Keep the original remote reference in the local manifest.
    #[default]
    KeepRemote,
    /// Fail the whole asset and cancel outstanding fetches.
    FailAsset,
}

#[derive(Debug, Clone)]
pub struct SegmentFetchConfig {
    /// Maximum number of segment downloads in flight
    pub concurrency: usize,
    pub failure_policy: SegmentFailurePolicy,
}

impl Default for SegmentFetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            failure_policy: SegmentFailurePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct KeyFetchConfig {
    pub failure_policy: KeyFailurePolicy,
}

/// Top-level configuration for one [`crate::AssetPipeline`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub http: HttpConfig,
    pub retry: RetryPolicy,
    pub auth: AuthScheme,
    pub segments: SegmentFetchConfig,
    pub keys: KeyFetchConfig,
    pub remux: RemuxConfig,
    /// Host serving manifests, used when an asset is handed out as a key URL.
    pub manifest_host: Option<String>,
    /// Extension of the final output file
    pub output_extension: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            retry: RetryPolicy::default(),
            auth: AuthScheme::default(),
            segments: SegmentFetchConfig::default(),
            keys: KeyFetchConfig::default(),
            remux: RemuxConfig::default(),
            manifest_host: None,
            output_extension: "mp4".to_string(),
        }
    }
}
