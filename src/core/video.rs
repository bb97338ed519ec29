//! Still-frame extraction from videos via an external `ffmpeg` process.

use bytes::Bytes;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{AppError, Result},
    models::media::normalize_extension,
    state::{DecoderCommand, ExtractorConfig},
    utils,
};

/// Video filter chain: normalise the colour space, let the decoder pick a
/// representative frame, then scale to a fixed width keeping aspect ratio.
fn filter_chain(width: u32) -> String {
    format!(
        "colorspace=all=bt709:iall=bt601-6-625:fast=1,thumbnail,scale={}:-1",
        width
    )
}

/// Checks that the decoder can be launched, running it with `-version`
pub fn check_decoder_installed(decoder: &DecoderCommand) -> Result<()> {
    let output = std::process::Command::new(&decoder.program)
        .args(&decoder.pre_args)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| {
            AppError::FrameExtraction(format!(
                "{} is not installed or not in PATH: {}",
                decoder.program.display(),
                e
            ))
        })?;

    if !output.status.success() {
        return Err(AppError::FrameExtraction(format!(
            "{} -version exited with {}",
            decoder.program.display(),
            output.status
        )));
    }

    Ok(())
}

/// Extracts one representative still from a video through an external
/// decoder process.
///
/// At most `max_concurrent` decoder processes run at once per extractor.
#[derive(Debug, Clone)]
pub struct FrameExtractor {
    config: ExtractorConfig,
    permits: Arc<Semaphore>,
}

impl FrameExtractor {
    /// Creates an extractor.
    pub fn new(config: ExtractorConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self { config, permits }
    }

    /// The extractor's configuration.
    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Number of decoder slots currently free.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Extracts a still (PNG bytes) from `video`.
    ///
    /// The input is written to a uniquely named scratch file that is removed
    /// on every exit path, including cancellation. Fails with
    /// [`AppError::FrameExtraction`] when the decoder cannot be spawned,
    /// exits non-zero, times out or prints nothing, and with
    /// [`AppError::Cancelled`] when `cancel` fires first.
    pub async fn extract_frame(
        &self,
        video: &[u8],
        ext: &str,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            permit = self.permits.acquire() => permit
                .map_err(|_| AppError::Internal("frame extractor is shut down".to_string()))?,
        };

        let input = self.create_scratch_file(ext).await?;
        log::debug!(
            "Extracting frame from {} bytes via {}",
            video.len(),
            input.path().display()
        );

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AppError::Cancelled),
            res = self.decode(video, input.path()) => res,
        };

        if let Err(e) = input.close() {
            log::warn!("Failed to remove scratch file: {}", e);
        }

        result
    }

    async fn create_scratch_file(&self, ext: &str) -> Result<NamedTempFile> {
        let dir = self.scratch_dir();
        utils::ensure_dir_exists(&dir).await?;

        let ext = normalize_extension(ext);
        let ext = if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            ext
        } else {
            "bin".to_string()
        };

        let file = tempfile::Builder::new()
            .prefix(&utils::timestamped_prefix("frame"))
            .suffix(&format!(".{}", ext))
            .tempfile_in(&dir)?;
        Ok(file)
    }

    async fn decode(&self, video: &[u8], input: &Path) -> Result<Bytes> {
        tokio::fs::write(input, video).await?;

        let decoder = &self.config.decoder;
        let child = Command::new(&decoder.program)
            .args(&decoder.pre_args)
            .args(self.decoder_args(input))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::FrameExtraction(format!(
                    "failed to spawn {}: {}",
                    decoder.program.display(),
                    e
                ))
            })?;

        // Dropping the child on timeout kills it.
        let output = match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| {
                AppError::FrameExtraction(format!("failed to collect decoder output: {}", e))
            })?,
            Err(_) => {
                return Err(AppError::FrameExtraction(format!(
                    "decoder timed out after {:?}",
                    self.config.timeout
                )))
            }
        };

        if !output.status.success() {
            return Err(AppError::FrameExtraction(format!(
                "decoder exited with {}: {}",
                output.status,
                utils::stderr_tail(&output.stderr, 500)
            )));
        }

        if output.stdout.is_empty() {
            return Err(AppError::FrameExtraction(
                "decoder produced no output".to_string(),
            ));
        }

        if !output.stderr.is_empty() {
            log::debug!("decoder stderr: {}", utils::stderr_tail(&output.stderr, 500));
        }

        Ok(Bytes::from(output.stdout))
    }

    /// Arguments passed to the decoder after the configured prefix.
    pub(crate) fn decoder_args(&self, input: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
        ];
        if let Some(offset) = self.config.seek_offset {
            args.push("-ss".into());
            args.push(format!("{:.3}", offset.as_secs_f64()).into());
        }
        args.push("-i".into());
        args.push(input.as_os_str().to_owned());
        args.extend(
            [
                "-vf".to_string(),
                filter_chain(self.config.frame_width),
                "-frames:v".to_string(),
                "1".to_string(),
                "-pix_fmt".to_string(),
                "rgb24".to_string(),
                "-f".to_string(),
                "image2pipe".to_string(),
                "-vcodec".to_string(),
                "png".to_string(),
                "-".to_string(),
            ]
            .into_iter()
            .map(OsString::from),
        );
        args
    }

    /// Directory the scratch files go to.
    pub fn scratch_dir(&self) -> PathBuf {
        self.config
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}
