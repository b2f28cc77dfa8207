//! `reqwest`-backed implementations of the fetch and token seams.

use std::sync::OnceLock;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, ORIGIN, REFERER};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::config::HttpConfig;
use crate::error::{FetchError, PipelineError};
use crate::fetch::{Fetcher, TokenGrant, TokenProvider};
use crate::retry::{RetryPolicy, retry_with_backoff};

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &HttpConfig) -> Result<Client, PipelineError> {
    install_rustls_provider();

    let mut headers = config.headers.clone();
    if let Some(referer) = &config.referer {
        let value = HeaderValue::from_str(referer)
            .map_err(|e| PipelineError::configuration(format!("invalid referer: {e}")))?;
        headers.insert(REFERER, value);
    }
    if let Some(origin) = &config.origin {
        let value = HeaderValue::from_str(origin)
            .map_err(|e| PipelineError::configuration(format!("invalid origin: {e}")))?;
        headers.insert(ORIGIN, value);
    }

    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(config.pool_idle_timeout)
        .user_agent(&config.user_agent)
        .default_headers(headers)
        .danger_accept_invalid_certs(config.danger_accept_invalid_certs);

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.read_timeout.is_zero() {
        client_builder = client_builder.read_timeout(config.read_timeout);
    }

    if let Some(proxy_config) = &config.proxy {
        client_builder = client_builder.proxy(proxy_config.to_reqwest()?);
        info!(proxy_url = %proxy_config.url, "Using explicitly configured proxy");
    } else if config.use_system_proxy {
        debug!("Using system proxy settings");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled");
    }

    client_builder.build().map_err(PipelineError::from)
}

/// [`Fetcher`] over a shared reqwest client.
///
/// Any 2xx answer is a success. Transient failures are retried according to
/// the [`RetryPolicy`]; cancelling the token aborts pending retries.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl ReqwestFetcher {
    pub fn new(config: &HttpConfig, retry: RetryPolicy) -> Result<Self, PipelineError> {
        Ok(Self::from_client(create_client(config)?, retry))
    }

    pub fn from_client(client: Client, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn fetch_once(&self, url: &Url, headers: &HeaderMap) -> Result<Bytes, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .headers(headers.clone())
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url.as_str(), &e))?;

        let status = response.status();
        trace!(url = %url, status = %status, version = ?response.version(), "Response received");
        if !status.is_success() {
            return Err(FetchError::status(status, url.as_str()));
        }

        response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(url.as_str(), &e))
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &Url, headers: &HeaderMap) -> Result<Bytes, FetchError> {
        retry_with_backoff(&self.retry, &self.cancel, |_attempt| {
            self.fetch_once(url, headers)
        })
        .await
    }
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    file_id: &'a str,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    content: String,
    #[serde(default, alias = "expires_in")]
    exp: Option<u64>,
}

/// [`TokenProvider`] that POSTs `{"file_id", "exp"}` to a token endpoint
/// with a bearer credential.
pub struct HttpTokenProvider {
    client: Client,
    endpoint: Url,
    bearer: String,
    requested_ttl_seconds: u64,
}

impl HttpTokenProvider {
    pub fn new(client: Client, endpoint: Url, bearer: impl Into<String>) -> Self {
        Self {
            client,
            endpoint,
            bearer: bearer.into(),
            requested_ttl_seconds: 3600,
        }
    }

    pub fn with_ttl(mut self, seconds: u64) -> Self {
        self.requested_ttl_seconds = seconds;
        self
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn get_token(&self, asset_file_id: &str) -> Option<TokenGrant> {
        let body = TokenRequest {
            file_id: asset_file_id,
            exp: self.requested_ttl_seconds,
        };
        let response = match self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.bearer)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "Token request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(
                endpoint = %self.endpoint,
                status = %response.status(),
                file_id = asset_file_id,
                "Token endpoint refused request"
            );
            return None;
        }

        match response.json::<TokenResponse>().await {
            Ok(token) => {
                debug!(file_id = asset_file_id, "Token granted");
                Some(TokenGrant {
                    content: token.content,
                    expires_in_seconds: token.exp.unwrap_or(self.requested_ttl_seconds),
                })
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "Malformed token response");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response per connection, in order, and records
    /// each raw request.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (Url, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = seen.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let request = read_request(&mut socket).await;
                recorded.lock().unwrap().push(request);
                let reply = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });

        (Url::parse(&format!("http://{addr}/")).unwrap(), seen)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if data.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&data).into_owned()
    }

    fn config() -> HttpConfig {
        HttpConfig {
            referer: Some("https://site.example.com/".to_string()),
            origin: Some("https://site.example.com".to_string()),
            use_system_proxy: false,
            ..HttpConfig::default()
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        }
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let (base, seen) = serve(vec![(503, ""), (200, "payload")]).await;
        let fetcher = ReqwestFetcher::new(&config(), fast_retry()).unwrap();

        let bytes = fetcher
            .fetch(&base.join("seg0.ts").unwrap(), &HeaderMap::new())
            .await
            .unwrap();

        assert_eq!(&bytes[..], b"payload");
        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let first = requests[0].to_ascii_lowercase();
        assert!(first.contains("referer: https://site.example.com/"));
        assert!(first.contains("origin: https://site.example.com"));
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let (base, seen) = serve(vec![(403, ""), (200, "never")]).await;
        let fetcher = ReqwestFetcher::new(&config(), fast_retry()).unwrap();

        let err = fetcher
            .fetch(&base.join("seg0.ts").unwrap(), &HeaderMap::new())
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), Some(403));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn request_headers_are_forwarded() {
        let (base, seen) = serve(vec![(200, "ok")]).await;
        let fetcher = ReqwestFetcher::new(&config(), RetryPolicy::none()).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("content", HeaderValue::from_static("tok"));
        headers.insert("x-content-uri", HeaderValue::from_static("p/f/seg0.ts"));

        fetcher
            .fetch(&base.join("hls/p/f/seg0.ts").unwrap(), &headers)
            .await
            .unwrap();

        let request = seen.lock().unwrap()[0].to_ascii_lowercase();
        assert!(request.contains("content: tok"));
        assert!(request.contains("x-content-uri: p/f/seg0.ts"));
    }

    #[tokio::test]
    async fn token_provider_posts_file_id_and_reads_grant() {
        let (base, seen) = serve(vec![(200, r#"{"content":"abc","expires_in":120}"#)]).await;
        let client = create_client(&config()).unwrap();
        let provider = HttpTokenProvider::new(client, base.join("token").unwrap(), "bearer-1");

        let grant = provider.get_token("file-9").await.unwrap();

        assert_eq!(grant.content, "abc");
        assert_eq!(grant.expires_in_seconds, 120);
        let request = seen.lock().unwrap()[0].clone();
        assert!(request.starts_with("POST /token"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer bearer-1"));
        assert!(request.contains(r#""file_id":"file-9""#));
        assert!(request.contains(r#""exp":3600"#));
    }

    #[tokio::test]
    async fn token_provider_maps_refusal_to_none() {
        let (base, _seen) = serve(vec![(401, r#"{"error":"expired"}"#)]).await;
        let client = create_client(&config()).unwrap();
        let provider = HttpTokenProvider::new(client, base.join("token").unwrap(), "stale");

        assert!(provider.get_token("file-9").await.is_none());
    }
}
