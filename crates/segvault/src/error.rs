use std::path::PathBuf;

use reqwest::StatusCode;

/// Failure of a single fetch through a [`crate::Fetcher`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("fetch cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("request failed with HTTP {status} for {url}")]
    Status { status: StatusCode, url: String },

    #[error("transport error for {url}: {reason}")]
    Transport {
        url: String,
        reason: String,
        retryable: bool,
    },

    #[error("invalid header `{name}`: {reason}")]
    InvalidHeader { name: String, reason: String },
}

impl FetchError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_header(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::InvalidHeader {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::Status {
            status,
            url: url.into(),
        }
    }

    pub fn from_reqwest(url: impl Into<String>, err: &reqwest::Error) -> Self {
        Self::Transport {
            url: url.into(),
            reason: err.to_string(),
            retryable: crate::retry::is_retryable_reqwest_error(err),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled | Self::InvalidUrl { .. } | Self::InvalidHeader { .. } => false,
            Self::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Transport { retryable, .. } => *retryable,
        }
    }

    /// HTTP status code, when the server answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(status.as_u16()),
            _ => None,
        }
    }
}

/// Fatal failure while materializing a rendition's keys and segments.
#[derive(Debug, thiserror::Error)]
pub enum TreeFetchError {
    #[error("token provisioning failed for file `{file_id}`")]
    Auth { file_id: String },

    #[error("resource `{uri}` could not be fetched: {source}")]
    Resource {
        uri: String,
        #[source]
        source: FetchError,
    },

    #[error("key `{uri}` could not be fetched: {source}")]
    Key {
        uri: String,
        #[source]
        source: FetchError,
    },

    #[error("segment `{uri}` could not be fetched: {source}")]
    Segment {
        uri: String,
        #[source]
        source: FetchError,
    },

    #[error("workspace I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tree fetch cancelled")]
    Cancelled,
}

impl TreeFetchError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Coarse classification of a remux failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemuxFailureKind {
    InputMissing,
    ProcessFailure,
    OutputDirectoryFailure,
}

#[derive(Debug, thiserror::Error)]
pub enum RemuxError {
    #[error("remux input {} is missing or empty", .path.display())]
    InputMissing { path: PathBuf },

    #[error("failed to prepare output location {}: {source}", .path.display())]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("remux cancelled")]
    Cancelled,

    #[error("remux process exited with {}: {stderr}", .code.map_or_else(|| "signal".to_string(), |c| format!("code {c}")))]
    Process { code: Option<i32>, stderr: String },
}

impl RemuxError {
    pub fn kind(&self) -> RemuxFailureKind {
        match self {
            Self::InputMissing { .. } => RemuxFailureKind::InputMissing,
            Self::OutputDirectory { .. } => RemuxFailureKind::OutputDirectoryFailure,
            Self::Spawn { .. } | Self::Process { .. } | Self::Cancelled => {
                RemuxFailureKind::ProcessFailure
            }
        }
    }

    /// Diagnostic output captured from the remux process, if any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::Process { stderr, .. } if !stderr.is_empty() => Some(stderr),
            _ => None,
        }
    }
}

/// Terminal failure tag of an [`crate::AssetPipeline`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ManifestFetchFailed,
    NoVariantFound,
    TreeFetchFailed,
    RemuxFailed,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManifestFetchFailed => "manifest_fetch_failed",
            Self::NoVariantFound => "no_variant_found",
            Self::TreeFetchFailed => "tree_fetch_failed",
            Self::RemuxFailed => "remux_failed",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while constructing engine components.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("proxy configuration error: {reason}")]
    ProxyConfiguration { reason: String },

    #[error("HTTP client construction failed: {source}")]
    Client {
        #[from]
        source: reqwest::Error,
    },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl PipelineError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        let err = FetchError::status(StatusCode::BAD_GATEWAY, "https://h/seg.ts");
        assert!(err.is_retryable());
        let err = FetchError::status(StatusCode::TOO_MANY_REQUESTS, "https://h/seg.ts");
        assert!(err.is_retryable());
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let err = FetchError::status(StatusCode::FORBIDDEN, "https://h/seg.ts");
        assert!(!err.is_retryable());
        assert_eq!(err.status_code(), Some(403));
        assert!(!FetchError::Cancelled.is_retryable());
    }

    #[test]
    fn remux_error_kinds() {
        let err = RemuxError::InputMissing {
            path: PathBuf::from("/tmp/x.m3u8"),
        };
        assert_eq!(err.kind(), RemuxFailureKind::InputMissing);

        let err = RemuxError::Process {
            code: Some(1),
            stderr: "Invalid data found".to_string(),
        };
        assert_eq!(err.kind(), RemuxFailureKind::ProcessFailure);
        assert_eq!(err.diagnostics(), Some("Invalid data found"));
        assert!(err.to_string().contains("code 1"));

        assert_eq!(RemuxError::Cancelled.kind(), RemuxFailureKind::ProcessFailure);
        assert_eq!(RemuxError::Cancelled.diagnostics(), None);
    }
}
