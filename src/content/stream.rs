//! Message body store and the stream adapter over it.
//!
//! The body is exposed to the rest of the gateway as stream views: readers
//! see a snapshot of the current content, writers stage a full replacement
//! that is installed atomically on shutdown. A writer that goes away without
//! shutting down leaves the old body untouched.

use arc_swap::ArcSwap;
use bytes::{Bytes, BytesMut};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::{debug, warn};

use crate::error::StreamError;

/// Copy granularity for body replacement.
pub const DEFAULT_COPY_CHUNK: usize = 4096;

/// Upper bound on a replacement body.
pub const DEFAULT_MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// The pipeline's native representation of a message body.
///
/// Cheap to clone; all clones observe the same content. Open stream handles
/// are counted so that release-on-every-exit-path is observable.
#[derive(Clone)]
pub struct MessageBody {
    shared: Arc<BodyShared>,
}

struct BodyShared {
    data: ArcSwap<Bytes>,
    open_streams: AtomicUsize,
    max_body_bytes: usize,
}

impl MessageBody {
    pub fn new(data: Bytes) -> Self {
        Self::with_limit(data, DEFAULT_MAX_BODY_BYTES)
    }

    pub fn with_limit(data: Bytes, max_body_bytes: usize) -> Self {
        Self {
            shared: Arc::new(BodyShared {
                data: ArcSwap::from_pointee(data),
                open_streams: AtomicUsize::new(0),
                max_body_bytes,
            }),
        }
    }

    /// Snapshot of the current body.
    pub fn bytes(&self) -> Bytes {
        self.shared.data.load().as_ref().clone()
    }

    pub fn len(&self) -> usize {
        self.shared.data.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stream handles currently open on this body.
    pub fn open_streams(&self) -> usize {
        self.shared.open_streams.load(Ordering::SeqCst)
    }

    /// Open a readable stream view over the current content.
    pub fn reader(&self) -> BodyReader {
        self.shared.open_streams.fetch_add(1, Ordering::SeqCst);
        BodyReader {
            cursor: io::Cursor::new(self.bytes()),
            shared: self.shared.clone(),
        }
    }

    /// Open a staging write stream. Bytes become the new body only when the
    /// writer is shut down; a dropped writer changes nothing.
    pub fn writer(&self) -> BodyWriter {
        self.shared.open_streams.fetch_add(1, Ordering::SeqCst);
        BodyWriter {
            staged: BytesMut::new(),
            committed: false,
            shared: self.shared.clone(),
        }
    }

    /// Fully overwrite the body with the content of `new_stream`, copying in
    /// bounded chunks through a fresh write stream.
    ///
    /// Atomic from the pipeline's point of view: either the whole new body
    /// is installed or the old body is left untouched. Both streams are
    /// closed on every exit path.
    pub async fn replace<R>(&self, mut new_stream: R, chunk: usize) -> Result<u64, StreamError>
    where
        R: AsyncRead + Unpin,
    {
        let mut writer = self.writer();
        let mut buf = vec![0u8; chunk.max(1)];
        let mut copied: u64 = 0;

        loop {
            let n = new_stream
                .read(&mut buf)
                .await
                .map_err(|e| StreamError::Read(e.to_string()))?;
            if n == 0 {
                break;
            }
            copied += n as u64;
            if copied > self.shared.max_body_bytes as u64 {
                return Err(StreamError::TooLarge {
                    limit: self.shared.max_body_bytes,
                });
            }
            writer
                .write_all(&buf[..n])
                .await
                .map_err(|e| StreamError::Write(e.to_string()))?;
        }

        writer
            .flush()
            .await
            .map_err(|e| StreamError::Write(e.to_string()))?;
        writer
            .shutdown()
            .await
            .map_err(|e| StreamError::Write(e.to_string()))?;

        debug!(bytes = copied, "body replacement installed");
        Ok(copied)
    }
}

/// Readable snapshot view of a message body.
pub struct BodyReader {
    cursor: io::Cursor<Bytes>,
    shared: Arc<BodyShared>,
}

impl AsyncRead for BodyReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.cursor).poll_read(cx, buf)
    }
}

impl Drop for BodyReader {
    fn drop(&mut self) {
        self.shared.open_streams.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Staging write stream. `shutdown` installs the staged bytes as the new
/// body; anything short of that leaves the old body in place.
pub struct BodyWriter {
    staged: BytesMut,
    committed: bool,
    shared: Arc<BodyShared>,
}

impl AsyncWrite for BodyWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.committed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write stream already closed",
            )));
        }
        this.staged.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.committed {
            let new_body = this.staged.split().freeze();
            this.shared.data.store(Arc::new(new_body));
            this.committed = true;
        }
        Poll::Ready(Ok(()))
    }
}

impl Drop for BodyWriter {
    fn drop(&mut self) {
        self.shared.open_streams.fetch_sub(1, Ordering::SeqCst);
        if !self.committed && !self.staged.is_empty() {
            warn!(
                staged_bytes = self.staged.len(),
                "write stream closed without commit, staged content discarded"
            );
        }
    }
}
