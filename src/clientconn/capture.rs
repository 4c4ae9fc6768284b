//! Raw inbound traffic capture.
//!
//! Every byte read from the client is teed into a scratch file and a running
//! SHA-256. A session that ends with a clean disconnect keeps the file as
//! `<dir>/<hex[..2]>/<hex>.bin`; any other outcome deletes it.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, ReadBuf};

use super::SessionError;

/// An in-progress capture of one session's inbound bytes.
#[derive(Debug)]
pub struct Capture {
    dir: PathBuf,
    file: NamedTempFile,
    hasher: Sha256,
}

impl Capture {
    /// Opens a scratch file (`_*.partial`) in `dir`, creating `dir` if needed.
    pub fn create(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let file = tempfile::Builder::new()
            .prefix("_")
            .suffix(".partial")
            .tempfile_in(dir)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            file,
            hasher: Sha256::new(),
        })
    }

    fn record(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)?;
        self.hasher.update(bytes);
        Ok(())
    }

    /// Keeps or discards the capture depending on how the session ended.
    ///
    /// Returns the final path when the capture was kept.
    pub fn finish(self, cause: &SessionError) -> Option<PathBuf> {
        if !cause.is_clean_disconnect() {
            if let Err(e) = self.file.close() {
                tracing::warn!(error = %e, "Failed to remove capture scratch file");
            }
            return None;
        }

        match self.persist() {
            Ok(path) => {
                tracing::debug!(path = %path.display(), "Traffic capture saved");
                Some(path)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to save traffic capture");
                None
            }
        }
    }

    fn persist(mut self) -> io::Result<PathBuf> {
        self.file.flush()?;
        self.file.as_file().sync_all()?;

        let hex = format!("{:x}", self.hasher.finalize());
        let shard = self.dir.join(&hex[..2]);
        std::fs::create_dir_all(&shard)?;

        let path = shard.join(format!("{}.bin", hex));
        self.file.persist(&path).map_err(|e| e.error)?;
        Ok(path)
    }
}

/// Reader that copies everything it reads into an optional [`Capture`].
#[derive(Debug)]
pub struct CaptureReader<'a, R> {
    inner: R,
    capture: Option<&'a mut Capture>,
}

impl<'a, R> CaptureReader<'a, R> {
    pub fn new(inner: R, capture: Option<&'a mut Capture>) -> Self {
        Self { inner, capture }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CaptureReader<'_, R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;

        if let Some(capture) = this.capture.as_deref_mut() {
            capture.record(&buf.filled()[before..])?;
        }
        Poll::Ready(Ok(()))
    }
}
