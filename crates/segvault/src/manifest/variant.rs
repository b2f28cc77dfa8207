use tracing::debug;
use url::Url;

use super::ManifestLine;

/// A rendition announced by a master manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub bandwidth: u64,
    pub uri: Url,
}

/// Pick the highest-bandwidth variant of a master manifest.
///
/// Only URI lines directly announced by a `#EXT-X-STREAM-INF` tag are
/// candidates. A later variant replaces the current best only when its
/// bandwidth is strictly greater, so the first of several equal variants
/// wins. A tag without a readable `BANDWIDTH` counts as bandwidth 0.
pub fn select_variant(base_url: &Url, lines: &[ManifestLine]) -> Option<Variant> {
    let mut announced: Option<u64> = None;
    let mut best: Option<(u64, &str)> = None;

    for line in lines {
        match line {
            ManifestLine::VariantStream { bandwidth, .. } => {
                announced = Some(bandwidth.unwrap_or(0));
            }
            ManifestLine::SegmentReference { uri, .. } => {
                let Some(bandwidth) = announced.take() else {
                    continue;
                };
                if best.is_none_or(|(max, _)| bandwidth > max) {
                    best = Some((bandwidth, uri.as_str()));
                }
            }
            _ => {}
        }
    }

    let (bandwidth, uri) = best?;
    match base_url.join(uri) {
        Ok(uri) => {
            debug!(bandwidth, uri = %uri, "Selected variant");
            Some(Variant { bandwidth, uri })
        }
        Err(e) => {
            debug!(uri, error = %e, "Selected variant URI does not resolve");
            None
        }
    }
}
