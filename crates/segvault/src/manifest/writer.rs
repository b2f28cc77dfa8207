use std::path::Path;

use tracing::debug;

use super::Manifest;

/// Serialize `manifest` and overwrite `path` with it.
pub async fn write_manifest(path: &Path, manifest: &Manifest) -> std::io::Result<()> {
    let text = manifest.render();
    tokio::fs::write(path, text.as_bytes()).await?;
    debug!(
        path = %path.display(),
        lines = manifest.lines.len(),
        bytes = text.len(),
        "Wrote local manifest"
    );
    Ok(())
}
