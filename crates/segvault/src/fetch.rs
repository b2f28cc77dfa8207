//! Seams to the outside world: raw fetching and token provisioning.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HOST, HeaderMap, HeaderName, HeaderValue};
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;

use crate::config::AuthScheme;
use crate::error::{FetchError, TreeFetchError};

/// Authenticated fetch capability.
///
/// Implementations own session state (cookies, login) and any retry policy.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url, headers: &HeaderMap) -> Result<Bytes, FetchError>;
}

/// Credential handed out by a [`TokenProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub content: String,
    pub expires_in_seconds: u64,
}

/// Token provisioning capability, keyed by asset file id.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(&self, asset_file_id: &str) -> Option<TokenGrant>;
}

/// Segment credential for one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub asset_file_id: String,
    pub content: String,
    pub expires_in_seconds: u64,
}

/// Per-run authorization state.
///
/// The provider is asked at most once; a failed attempt is remembered so
/// concurrent segment workers never trigger a second request.
pub struct AuthContext {
    file_id: String,
    scheme: AuthScheme,
    provider: Arc<dyn TokenProvider>,
    token: OnceCell<Option<AuthToken>>,
}

impl AuthContext {
    pub fn new(
        file_id: impl Into<String>,
        scheme: AuthScheme,
        provider: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            scheme,
            provider,
            token: OnceCell::new(),
        }
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub async fn token(&self) -> Result<&AuthToken, TreeFetchError> {
        let cached = self
            .token
            .get_or_init(|| async {
                debug!(file_id = %self.file_id, "Requesting segment token");
                match self.provider.get_token(&self.file_id).await {
                    Some(grant) => Some(AuthToken {
                        asset_file_id: self.file_id.clone(),
                        content: grant.content,
                        expires_in_seconds: grant.expires_in_seconds,
                    }),
                    None => {
                        warn!(file_id = %self.file_id, "Token provider returned no token");
                        None
                    }
                }
            })
            .await;

        cached.as_ref().ok_or_else(|| TreeFetchError::Auth {
            file_id: self.file_id.clone(),
        })
    }

    /// The part of `url` following the configured path marker, query included,
    /// percent-encoded segment by segment with the slashes kept.
    pub fn path_suffix(&self, url: &Url) -> Option<String> {
        let raw = url.as_str();
        let start = raw.find(&self.scheme.path_marker)? + self.scheme.path_marker.len();
        let suffix = &raw[start..];
        Some(
            suffix
                .split('/')
                .map(|part| {
                    let decoded = urlencoding::decode(part).unwrap_or(part.into());
                    urlencoding::encode(&decoded).into_owned()
                })
                .collect::<Vec<_>>()
                .join("/"),
        )
    }

    /// Headers authorizing a fetch of `url` with `token`.
    pub fn headers(&self, token: &AuthToken, url: &Url) -> Result<HeaderMap, FetchError> {
        let suffix = self.path_suffix(url).ok_or_else(|| {
            FetchError::invalid_url(
                url.as_str(),
                format!("missing path marker `{}`", self.scheme.path_marker),
            )
        })?;

        let mut headers = HeaderMap::new();
        insert_header(&mut headers, &self.scheme.token_header, &token.content)?;
        insert_header(&mut headers, &self.scheme.path_header, &suffix)?;
        if let Some(host) = &self.scheme.host_override {
            let value = HeaderValue::from_str(host)
                .map_err(|e| FetchError::invalid_header(HOST.as_str(), e))?;
            headers.insert(HOST, value);
        }
        Ok(headers)
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), FetchError> {
    let header_name =
        HeaderName::from_bytes(name.as_bytes()).map_err(|e| FetchError::invalid_header(name, e))?;
    let header_value = HeaderValue::from_str(value).map_err(|e| FetchError::invalid_header(name, e))?;
    headers.insert(header_name, header_value);
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::FakeTokens;
    use super::*;

    fn context(provider: Arc<FakeTokens>) -> AuthContext {
        AuthContext::new("file-42", AuthScheme::default(), provider)
    }

    #[tokio::test]
    async fn token_is_requested_once() {
        let provider = Arc::new(FakeTokens::granting("secret"));
        let ctx = context(provider.clone());

        let first = ctx.token().await.unwrap().clone();
        let second = ctx.token().await.unwrap().clone();

        assert_eq!(first, second);
        assert_eq!(first.asset_file_id, "file-42");
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn refused_token_is_not_requested_again() {
        let provider = Arc::new(FakeTokens::refusing());
        let ctx = context(provider.clone());

        assert!(matches!(ctx.token().await, Err(TreeFetchError::Auth { .. })));
        assert!(matches!(ctx.token().await, Err(TreeFetchError::Auth { .. })));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_request() {
        let provider = Arc::new(FakeTokens::granting("secret"));
        let ctx = context(provider.clone());

        let results = futures::future::join_all((0..8).map(|_| ctx.token())).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn headers_carry_token_and_encoded_suffix() {
        let ctx = context(Arc::new(FakeTokens::granting("secret")));
        let token = ctx.token().await.unwrap().clone();
        let url =
            Url::parse("https://video.example.com/root/hls/p 1/f/720p/seg0.ts?t=9").unwrap();

        let headers = ctx.headers(&token, &url).unwrap();

        assert_eq!(headers["content"], "secret");
        assert_eq!(headers["x-content-uri"], "p%201/f/720p/seg0.ts%3Ft%3D9");
    }

    #[tokio::test]
    async fn headers_require_path_marker() {
        let ctx = context(Arc::new(FakeTokens::granting("secret")));
        let token = ctx.token().await.unwrap().clone();
        let url = Url::parse("https://video.example.com/plain/seg0.ts").unwrap();

        assert!(matches!(
            ctx.headers(&token, &url),
            Err(FetchError::InvalidUrl { .. })
        ));
    }
}
