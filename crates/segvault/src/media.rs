//! Asset requests and ingestion-time media classification.

use url::Url;

use crate::error::FetchError;

/// How an asset's URL is to be acquired, decided once at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// A single progressive file fetched in one request.
    Progressive,
    /// A master manifest describing a segmented stream.
    Segmented,
    /// A key URL standing in for the manifest of the same asset.
    KeyLocator,
}

impl MediaKind {
    pub fn classify(url: &Url) -> Self {
        let path = url.path();
        if path.ends_with(".mp4") {
            Self::Progressive
        } else if path.ends_with(".key") {
            Self::KeyLocator
        } else {
            Self::Segmented
        }
    }
}

/// One media item to acquire.
#[derive(Debug, Clone)]
pub struct AssetRequest {
    pub asset_id: String,
    pub manifest_url: Url,
    pub requires_auth: bool,
    /// Identifier passed to token provisioning; defaults to `asset_id`.
    pub file_id: Option<String>,
    pub kind: MediaKind,
}

impl AssetRequest {
    pub fn new(
        asset_id: impl Into<String>,
        manifest_url: &str,
        requires_auth: bool,
    ) -> Result<Self, FetchError> {
        let manifest_url = Url::parse(manifest_url)
            .map_err(|e| FetchError::invalid_url(manifest_url, e.to_string()))?;
        let kind = MediaKind::classify(&manifest_url);
        Ok(Self {
            asset_id: asset_id.into(),
            manifest_url,
            requires_auth,
            file_id: None,
            kind,
        })
    }

    pub fn with_file_id(mut self, file_id: impl Into<String>) -> Self {
        self.file_id = Some(file_id.into());
        self
    }

    pub fn file_id(&self) -> &str {
        self.file_id.as_deref().unwrap_or(&self.asset_id)
    }

    /// Turn a [`MediaKind::KeyLocator`] request into a segmented one.
    ///
    /// `/keys/<profile>/<file_id>/<ts>/<name>.key` maps to
    /// `https://<manifest_host>/hls/<profile>/<file_id>/<ts>/main.m3u8`. Other
    /// shapes keep their URL and are treated as segmented.
    pub fn resolve_locator(mut self, manifest_host: Option<&str>) -> Self {
        if self.kind != MediaKind::KeyLocator {
            return self;
        }
        if let Some(url) = manifest_url_from_key(&self.manifest_url, manifest_host) {
            self.manifest_url = url;
        }
        self.kind = MediaKind::Segmented;
        self
    }
}

fn manifest_url_from_key(key_url: &Url, manifest_host: Option<&str>) -> Option<Url> {
    let parts: Vec<&str> = key_url.path_segments()?.collect();
    if parts.len() < 4 || parts[0] != "keys" {
        return None;
    }
    let (profile, file_id, ts) = (parts[1], parts[2], parts[3]);
    let host = match manifest_host {
        Some(host) => host.to_string(),
        None => key_url.host_str()?.to_string(),
    };
    Url::parse(&format!(
        "{}://{host}/hls/{profile}/{file_id}/{ts}/main.m3u8",
        key_url.scheme()
    ))
    .ok()
}
