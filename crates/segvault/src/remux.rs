//! Lossless repackaging of a local manifest into one container file.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::RemuxError;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Options for [`FfmpegRemuxer`].
#[derive(Debug, Clone)]
pub struct RemuxConfig {
    /// Path to the ffmpeg binary.
    pub ffmpeg_path: String,
    /// Move the index to the front of MP4-family outputs.
    pub faststart: bool,
    /// Extra options placed before `-i`.
    pub input_options: Vec<String>,
    /// Extra options placed before the output path.
    pub output_options: Vec<String>,
}

impl Default for RemuxConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            faststart: true,
            input_options: Vec::new(),
            output_options: Vec::new(),
        }
    }
}

/// Container remux capability.
#[async_trait]
pub trait MediaRemuxer: Send + Sync {
    /// Repackage the media referenced by `manifest` into `output`.
    ///
    /// On success `output` is complete; on failure or cancellation it is left
    /// untouched.
    async fn remux(
        &self,
        manifest: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), RemuxError>;
}

/// [`MediaRemuxer`] backed by an external ffmpeg process.
///
/// ffmpeg writes to a staging file next to the input manifest which is
/// renamed over the destination once the process exits cleanly.
pub struct FfmpegRemuxer {
    config: RemuxConfig,
}

impl FfmpegRemuxer {
    pub fn new(config: RemuxConfig) -> Self {
        Self { config }
    }

    /// Map output extensions to ffmpeg muxer names.
    fn muxer_for(output: &Path) -> &'static str {
        let extension = output
            .extension()
            .and_then(OsStr::to_str)
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("mkv") => "matroska",
            Some("ts" | "m2ts" | "mts") => "mpegts",
            Some("mov") => "mov",
            Some("m4a") => "ipod",
            _ => "mp4",
        }
    }

    fn build_args(&self, input: &Path, staging: &Path, muxer: &str) -> Vec<String> {
        let mut args: Vec<String> = [
            "-y",
            "-hide_banner",
            "-nostats",
            "-loglevel",
            "error",
            "-allowed_extensions",
            "ALL",
            "-protocol_whitelist",
            "file,crypto,data,http,https,tcp,tls",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        args.extend(self.config.input_options.iter().cloned());
        args.extend(["-i".to_string(), input.display().to_string()]);
        args.extend(["-map", "0", "-c", "copy"].map(String::from));

        if self.config.faststart && muxer == "mp4" {
            args.extend(["-movflags".to_string(), "+faststart".to_string()]);
        }
        args.extend(self.config.output_options.iter().cloned());
        args.extend(["-f".to_string(), muxer.to_string()]);
        args.push(staging.display().to_string());
        args
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.ffmpeg_path);
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            cmd.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
        cmd
    }
}

fn staging_path(manifest: &Path, output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    match manifest.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => dir.join(format!(".{name}.partial")),
        None => output.with_file_name(format!(".{name}.partial")),
    }
}

#[async_trait]
impl MediaRemuxer for FfmpegRemuxer {
    #[instrument(skip_all, fields(input = %manifest.display(), output = %output.display()))]
    async fn remux(
        &self,
        manifest: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), RemuxError> {
        match tokio::fs::metadata(manifest).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            _ => {
                return Err(RemuxError::InputMissing {
                    path: manifest.to_path_buf(),
                });
            }
        }

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| RemuxError::OutputDirectory {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let staging = staging_path(manifest, output);
        let args = self.build_args(manifest, &staging, Self::muxer_for(output));
        debug!("FFmpeg args: {:?}", args);

        let mut cmd = self.command();
        cmd.args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = std::time::Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                discard(&staging).await;
                warn!("Remux cancelled");
                return Err(RemuxError::Cancelled);
            }
            result = cmd.output() => result.map_err(|source| RemuxError::Spawn {
                program: self.config.ffmpeg_path.clone(),
                source,
            })?,
        };

        if !result.status.success() {
            discard(&staging).await;
            let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
            warn!(code = ?result.status.code(), stderr = %stderr, "ffmpeg failed");
            return Err(RemuxError::Process {
                code: result.status.code(),
                stderr,
            });
        }

        if let Err(source) = tokio::fs::rename(&staging, output).await {
            discard(&staging).await;
            return Err(RemuxError::OutputDirectory {
                path: output.to_path_buf(),
                source,
            });
        }

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Remux completed"
        );
        Ok(())
    }
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staging file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemuxFailureKind;
    use std::time::Duration;
    use tempfile::TempDir;

    fn remuxer(ffmpeg_path: &str) -> FfmpegRemuxer {
        FfmpegRemuxer::new(RemuxConfig {
            ffmpeg_path: ffmpeg_path.to_string(),
            ..RemuxConfig::default()
        })
    }

    #[test]
    fn test_build_args_copy_streams_and_quiet() {
        let remuxer = remuxer("ffmpeg");
        let args = remuxer.build_args(
            Path::new("/w/playlist.m3u8"),
            Path::new("/d/.a.mp4.partial"),
            "mp4",
        );

        let joined = args.join(" ");
        assert!(args.contains(&"-y".to_string()));
        assert!(joined.contains("-loglevel error"));
        assert!(joined.contains("-allowed_extensions ALL -protocol_whitelist"));
        assert!(joined.contains("-i /w/playlist.m3u8 -map 0 -c copy"));
        assert!(joined.contains("-movflags +faststart"));
        assert!(joined.ends_with("-f mp4 /d/.a.mp4.partial"));
    }

    #[test]
    fn test_muxer_follows_output_extension() {
        assert_eq!(FfmpegRemuxer::muxer_for(Path::new("a.mp4")), "mp4");
        assert_eq!(FfmpegRemuxer::muxer_for(Path::new("a.MKV")), "matroska");
        assert_eq!(FfmpegRemuxer::muxer_for(Path::new("a.ts")), "mpegts");
        assert_eq!(FfmpegRemuxer::muxer_for(Path::new("a")), "mp4");

        let args = remuxer("ffmpeg").build_args(Path::new("i"), Path::new("o"), "matroska");
        assert!(!args.contains(&"-movflags".to_string()));
    }

    #[tokio::test]
    async fn test_empty_manifest_is_input_missing() {
        let temp = TempDir::new().unwrap();
        let manifest = temp.path().join("playlist.m3u8");
        tokio::fs::write(&manifest, "").await.unwrap();

        let err = remuxer("ffmpeg")
            .remux(&manifest, &temp.path().join("out.mp4"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), RemuxFailureKind::InputMissing);

        let err = remuxer("ffmpeg")
            .remux(
                &temp.path().join("absent.m3u8"),
                &temp.path().join("out.mp4"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), RemuxFailureKind::InputMissing);
    }

    #[tokio::test]
    async fn test_missing_binary_is_process_failure() {
        let temp = TempDir::new().unwrap();
        let manifest = temp.path().join("playlist.m3u8");
        tokio::fs::write(&manifest, "#EXTM3U\nseg0.ts\n").await.unwrap();

        let err = remuxer("/nonexistent/ffmpeg-binary")
            .remux(&manifest, &temp.path().join("out.mp4"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RemuxError::Spawn { .. }));
        assert_eq!(err.kind(), RemuxFailureKind::ProcessFailure);
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_run_renames_staging_into_place() {
        let temp = TempDir::new().unwrap();
        let manifest = temp.path().join("playlist.m3u8");
        tokio::fs::write(&manifest, "#EXTM3U\nseg0.ts\n").await.unwrap();
        let ffmpeg = script(temp.path(), "for last; do :; done\nprintf media > \"$last\"");
        let output = temp.path().join("out").join("a.mp4");

        remuxer(&ffmpeg)
            .remux(&manifest, &output, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"media");
        assert!(!staging_path(&manifest, &output).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_run_surfaces_stderr_and_leaves_no_output() {
        let temp = TempDir::new().unwrap();
        let manifest = temp.path().join("playlist.m3u8");
        tokio::fs::write(&manifest, "#EXTM3U\nseg0.ts\n").await.unwrap();
        let ffmpeg = script(
            temp.path(),
            "for last; do :; done\nprintf partial > \"$last\"\necho 'seg0.ts: Invalid data found' >&2\nexit 1",
        );
        let output = temp.path().join("a.mp4");

        let err = remuxer(&ffmpeg)
            .remux(&manifest, &output, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), RemuxFailureKind::ProcessFailure);
        assert_eq!(err.diagnostics(), Some("seg0.ts: Invalid data found"));
        assert!(!output.exists());
        assert!(!staging_path(&manifest, &output).exists());
    }

    #[test]
    fn test_staging_lives_beside_the_manifest() {
        let staging = staging_path(Path::new("/d/m1_temp/playlist.m3u8"), Path::new("/d/m1.mp4"));
        assert_eq!(staging, PathBuf::from("/d/m1_temp/.m1.mp4.partial"));

        let staging = staging_path(Path::new("playlist.m3u8"), Path::new("/d/m1.mp4"));
        assert_eq!(staging, PathBuf::from("/d/.m1.mp4.partial"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_run_removes_staging_and_leaves_no_output() {
        let temp = TempDir::new().unwrap();
        let workspace = temp.path().join("m1_temp");
        std::fs::create_dir(&workspace).unwrap();
        let manifest = workspace.join("playlist.m3u8");
        tokio::fs::write(&manifest, "#EXTM3U\nseg0.ts\n").await.unwrap();
        let ffmpeg = script(
            temp.path(),
            "for last; do :; done\nprintf partial > \"$last\"\nexec sleep 5",
        );
        let output = temp.path().join("m1.mp4");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = remuxer(&ffmpeg)
            .remux(&manifest, &output, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, RemuxError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(!output.exists());
        assert!(!staging_path(&manifest, &output).exists());
        let stray: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".partial"))
            .collect();
        assert!(stray.is_empty(), "{stray:?}");
    }
}
