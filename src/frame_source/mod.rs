//! FrameSource - Video frame acquisition
//!
//! ## Responsibilities
//!
//! - Open the configured video input (camera device, file, or stream URL)
//! - Deliver raw RGB frames at the processing resolution
//! - Bounded-retry acquisition for transient failures
//!
//! Decoding is delegated to an ffmpeg child process writing `rgb24` rawvideo to
//! stdout; the child is killed when the source is released or dropped.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

/// How long `open` waits for the first decoded frame
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw RGB24 frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub sequence: u64,
}

/// Open video input
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, `None` once the input is exhausted
    async fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Free the underlying device or process; safe to call more than once
    async fn release(&mut self);
}

/// Creates a fresh `FrameSource` for each streaming run
#[async_trait]
pub trait FrameSourceFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn FrameSource>>;

    /// Human-readable input name for logs
    fn describe(&self) -> String;
}

/// Bounded retry for acquisition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Try to open the source up to `policy.attempts` times with a fixed backoff
pub async fn open_with_retry(
    factory: &dyn FrameSourceFactory,
    policy: RetryPolicy,
) -> Result<Box<dyn FrameSource>> {
    let attempts = policy.attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match factory.open().await {
            Ok(source) => {
                tracing::info!(source = %factory.describe(), attempt, "Frame source opened");
                return Ok(source);
            }
            Err(e) => {
                tracing::warn!(
                    source = %factory.describe(),
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    "Frame source open failed"
                );
                last_error = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
        }
    }

    Err(Error::SourceUnavailable(format!(
        "{} after {} attempts: {}",
        factory.describe(),
        attempts,
        last_error
    )))
}

/// Spawns ffmpeg for every run
#[derive(Debug, Clone)]
pub struct FfmpegSourceFactory {
    input: String,
    width: u32,
    height: u32,
}

impl FfmpegSourceFactory {
    pub fn new(input: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            input: input.into(),
            width,
            height,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-hide_banner").arg("-loglevel").arg("error");

        if self.input.starts_with("/dev/video") {
            cmd.arg("-f").arg("video4linux2");
        } else if self.input.starts_with("rtsp://") {
            cmd.arg("-rtsp_transport").arg("tcp");
        }

        cmd.arg("-i")
            .arg(&self.input)
            .arg("-vf")
            .arg(format!("scale={}:{}", self.width, self.height))
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-f")
            .arg("rawvideo")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl FrameSourceFactory for FfmpegSourceFactory {
    async fn open(&self) -> Result<Box<dyn FrameSource>> {
        let is_url = self.input.contains("://");
        if !is_url && !Path::new(&self.input).exists() {
            return Err(Error::SourceUnavailable(format!(
                "{} does not exist",
                self.input
            )));
        }

        let mut child = self
            .command()
            .spawn()
            .map_err(|e| Error::SourceUnavailable(format!("failed to spawn ffmpeg: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("ffmpeg stdout not captured".to_string()))?;

        let mut source = FfmpegFrameSource {
            child: Some(child),
            stdout,
            width: self.width,
            height: self.height,
            sequence: 0,
            pending: None,
        };

        // Only report success once ffmpeg actually decodes something
        match tokio::time::timeout(FIRST_FRAME_TIMEOUT, source.read_frame()).await {
            Ok(Ok(Some(frame))) => {
                source.pending = Some(frame);
                Ok(Box::new(source))
            }
            Ok(Ok(None)) => {
                source.release().await;
                Err(Error::SourceUnavailable(format!(
                    "{} produced no frames",
                    self.input
                )))
            }
            Ok(Err(e)) => {
                source.release().await;
                Err(e)
            }
            Err(_) => {
                source.release().await;
                Err(Error::SourceUnavailable(format!(
                    "{} timed out waiting for first frame",
                    self.input
                )))
            }
        }
    }

    fn describe(&self) -> String {
        format!("ffmpeg:{} @{}x{}", self.input, self.width, self.height)
    }
}

/// Reads fixed-size rawvideo frames from ffmpeg's stdout
pub struct FfmpegFrameSource {
    child: Option<Child>,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    sequence: u64,
    pending: Option<Frame>,
}

impl FfmpegFrameSource {
    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    async fn read_frame(&mut self) -> Result<Option<Frame>> {
        let mut pixels = vec![0u8; self.frame_len()];
        match self.stdout.read_exact(&mut pixels).await {
            Ok(_) => {
                let frame = Frame {
                    width: self.width,
                    height: self.height,
                    pixels,
                    sequence: self.sequence,
                };
                self.sequence += 1;
                Ok(Some(frame))
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(Error::Frame(format!("ffmpeg read failed: {e}"))),
        }
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        if self.child.is_none() {
            return Ok(None);
        }
        self.read_frame().await
    }

    async fn release(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "ffmpeg already exited");
            }
            match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
                Ok(Ok(status)) => tracing::debug!(status = %status, "ffmpeg exited"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Failed to reap ffmpeg"),
                Err(_) => tracing::warn!("ffmpeg did not exit within 2s"),
            }
            tracing::info!("Released frame source");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct EmptySource;

    #[async_trait]
    impl FrameSource for EmptySource {
        async fn next_frame(&mut self) -> Result<Option<Frame>> {
            Ok(None)
        }

        async fn release(&mut self) {}
    }

    /// Fails the first `failures` opens
    struct FlakyFactory {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl FrameSourceFactory for FlakyFactory {
        async fn open(&self) -> Result<Box<dyn FrameSource>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(Error::SourceUnavailable("camera busy".to_string()))
            } else {
                Ok(Box::new(EmptySource))
            }
        }

        fn describe(&self) -> String {
            "flaky".to_string()
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_open_succeeds_after_transient_failures() {
        let factory = FlakyFactory {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        assert!(open_with_retry(&factory, fast_policy()).await.is_ok());
        assert_eq!(factory.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_open_gives_up_after_attempts() {
        let factory = FlakyFactory {
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let result = open_with_retry(&factory, fast_policy()).await;
        assert!(matches!(result, Err(Error::SourceUnavailable(_))));
        assert_eq!(factory.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_ffmpeg_missing_file_is_unavailable() {
        let factory = FfmpegSourceFactory::new("/nonexistent/video.mp4", 320, 240);
        let result = factory.open().await;
        assert!(matches!(result, Err(Error::SourceUnavailable(_))));
    }

    #[test]
    fn test_describe() {
        let factory = FfmpegSourceFactory::new("/dev/video0", 320, 240);
        assert_eq!(factory.describe(), "ffmpeg:/dev/video0 @320x240");
    }
}
