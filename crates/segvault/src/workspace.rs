//! Scoped per-asset scratch directory.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Exclusive scratch directory `<target_dir>/<asset_id>_temp` for one run.
///
/// [`Workspace::release`] removes it on the normal path. If the value is
/// dropped without being released (early return, panic unwinding) the
/// directory is removed synchronously in `Drop`. Removal happens once.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    released: bool,
}

impl Workspace {
    /// Create the scratch directory, clearing leftovers of an earlier run.
    pub async fn acquire(target_dir: &Path, asset_id: &str) -> std::io::Result<Self> {
        let path = target_dir.join(format!("{}_temp", sanitize(asset_id)));
        if tokio::fs::try_exists(&path).await? {
            warn!(path = %path.display(), "Removing stale workspace");
            tokio::fs::remove_dir_all(&path).await?;
        }
        tokio::fs::create_dir_all(&path).await?;
        debug!(path = %path.display(), "Acquired workspace");
        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Store `bytes` as `name` inside the workspace.
    pub async fn write(&self, name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        let path = self.file(name);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Recursively remove the directory.
    pub async fn release(mut self) -> std::io::Result<()> {
        self.released = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Released workspace");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Released workspace on drop"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove workspace"),
        }
    }
}

/// Asset ids become path components; keep them to a single one.
pub(crate) fn sanitize(asset_id: &str) -> String {
    let cleaned: String = asset_id
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "asset".to_string(),
        trimmed => trimmed.to_string(),
    }
}
