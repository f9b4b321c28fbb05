//! Reader adapters used by upload and download paths

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use super::progress::ProgressAggregator;

/// Byte-counting proxy around a reader
///
/// Every byte handed to the consumer is recorded on the aggregator, so
/// progress follows bytes read rather than bytes acknowledged.
#[pin_project]
pub struct ProgressReader<R> {
    #[pin]
    inner: R,
    progress: Arc<ProgressAggregator>,
}

impl<R> ProgressReader<R> {
    pub fn new(inner: R, progress: Arc<ProgressAggregator>) -> Self {
        Self { inner, progress }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead> AsyncRead for ProgressReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        let result = this.inner.poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            let read = buf.filled().len() - before;
            this.progress.record(read as u64);
        }
        result
    }
}

/// Read until `buf` is full or the reader reports end of stream
///
/// A short read is never mistaken for exhaustion: only a zero-byte read
/// stops the loop early. Returns the number of bytes placed in `buf`.
pub async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let read = reader.read(&mut buf[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    /// Hands out at most `step` bytes per read
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl AsyncRead for Trickle {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let end = (self.pos + self.step)
                .min(self.data.len())
                .min(self.pos + buf.remaining());
            let chunk = self.data[self.pos..end].to_vec();
            buf.put_slice(&chunk);
            self.pos = end;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_read_full_survives_short_reads() {
        let mut reader = Trickle {
            data: (0..100u8).collect(),
            pos: 0,
            step: 7,
        };

        let mut buf = [0u8; 40];
        assert_eq!(read_full(&mut reader, &mut buf).await.unwrap(), 40);
        assert_eq!(buf[39], 39);

        let mut rest = [0u8; 80];
        assert_eq!(read_full(&mut reader, &mut rest).await.unwrap(), 60);
        assert_eq!(read_full(&mut reader, &mut rest).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_progress_reader_counts_bytes() {
        let progress = Arc::new(ProgressAggregator::silent("k", Some(64)));
        let mut reader = ProgressReader::new(&[7u8; 64][..], progress.clone());

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        assert_eq!(out.len(), 64);
        assert_eq!(progress.transferred(), 64);
    }
}
