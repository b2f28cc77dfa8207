use reqwest::Proxy;

use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ProxyType {
    Http,
    Https,
    Socks5,
}

#[derive(Debug, Clone)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// Outbound proxy for every engine request.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Proxy server URL (e.g., "http://proxy.example.com:8080")
    pub url: String,
    pub proxy_type: ProxyType,
    pub auth: Option<ProxyAuth>,
}

impl ProxyConfig {
    pub fn to_reqwest(&self) -> Result<Proxy, PipelineError> {
        let invalid = |e: reqwest::Error| PipelineError::ProxyConfiguration {
            reason: format!("invalid proxy URL `{}`: {e}", self.url),
        };

        let mut proxy = match self.proxy_type {
            ProxyType::Http => Proxy::http(&self.url).map_err(invalid)?,
            ProxyType::Https => Proxy::https(&self.url).map_err(invalid)?,
            ProxyType::Socks5 => {
                let url = if self.url.starts_with("socks5://") || self.url.starts_with("socks5h://")
                {
                    self.url.clone()
                } else {
                    format!("socks5://{}", self.url)
                };
                Proxy::all(&url).map_err(invalid)?
            }
        };

        if let Some(auth) = &self.auth {
            proxy = proxy.basic_auth(&auth.username, &auth.password);
        }

        Ok(proxy)
    }
}
