use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::AsyncRead;
use tokio_stream::StreamExt;
use crate::config::DEFAULT_CAPTURE_LIMIT;
use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{BytesCodec, FramedRead};

/// Byte buffer shared between a pipe reader task and its owner.
///
/// Keeps at most `limit` bytes: once full, the oldest output is discarded,
/// so a long-running child only ever holds the tail of its output.
#[derive(Clone)]
pub struct CaptureBuffer {
    bytes: Arc<Mutex<BytesMut>>,
    limit: usize,
}

impl Default for CaptureBuffer {
    fn default() -> Self {
        Self::with_limit(DEFAULT_CAPTURE_LIMIT)
    }
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(BytesMut::new())),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn lock(&self) -> MutexGuard<'_, BytesMut> {
        // A panicking reader can only have left whole frames behind.
        self.bytes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn extend(&self, data: &[u8]) {
        let mut bytes = self.lock();
        if data.len() >= self.limit {
            bytes.clear();
            bytes.extend_from_slice(&data[data.len() - self.limit..]);
            return;
        }

        bytes.extend_from_slice(data);
        let excess = bytes.len().saturating_sub(self.limit);
        if excess > 0 {
            bytes.advance(excess);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.lock().to_vec()
    }

    /// Lossy UTF-8 view of everything captured so far.
    pub fn decoded(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }
}

impl std::fmt::Debug for CaptureBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureBuffer")
            .field("len", &self.len())
            .field("limit", &self.limit)
            .finish()
    }
}

/// Point-in-time copy of a child's standard output and standard error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CapturedOutput {
    pub fn from_buffers(stdout: &CaptureBuffer, stderr: &CaptureBuffer) -> Self {
        Self {
            stdout: stdout.snapshot(),
            stderr: stderr.snapshot(),
        }
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Captured output split into lines, like reading the pipes line by line.
    pub fn stdout_lines(&self) -> Vec<String> {
        self.stdout_text().lines().map(str::to_owned).collect()
    }

    pub fn stderr_lines(&self) -> Vec<String> {
        self.stderr_text().lines().map(str::to_owned).collect()
    }
}

/// Drain `io` into `buffer` until EOF.
pub async fn capture<A: AsyncRead + Unpin>(io: A, buffer: CaptureBuffer) -> tokio::io::Result<()> {
    let mut frames = FramedRead::with_capacity(io, BytesCodec::new(), 1024);
    while let Some(frame) = frames.next().await {
        buffer.extend(&frame?);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_reads_until_eof() {
        let buffer = CaptureBuffer::new();
        let input: &[u8] = b"first line\nsecond line\n";

        capture(input, buffer.clone()).await.unwrap();

        assert_eq!(buffer.decoded(), "first line\nsecond line\n");
        assert_eq!(buffer.len(), 23);
    }

    #[tokio::test]
    async fn test_capture_empty_stream() {
        let buffer = CaptureBuffer::new();
        capture(tokio::io::empty(), buffer.clone()).await.unwrap();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_limit_keeps_the_tail() {
        let buffer = CaptureBuffer::with_limit(4);
        buffer.extend(b"ab");
        assert_eq!(buffer.decoded(), "ab");

        buffer.extend(b"cdef");
        assert_eq!(buffer.decoded(), "cdef");

        buffer.extend(b"gh");
        assert_eq!(buffer.decoded(), "efgh");
        assert_eq!(buffer.len(), 4);

        buffer.extend(b"0123456789");
        assert_eq!(buffer.decoded(), "6789");
    }

    #[tokio::test]
    async fn test_capture_respects_limit() {
        let buffer = CaptureBuffer::with_limit(8);
        let input = "line\n".repeat(100);

        capture(input.as_bytes(), buffer.clone()).await.unwrap();

        assert_eq!(buffer.len(), 8);
        assert_eq!(buffer.decoded(), "ne\nline\n");
    }

    #[test]
    fn test_default_limit() {
        assert_eq!(CaptureBuffer::new().limit(), DEFAULT_CAPTURE_LIMIT);
    }

    #[test]
    fn test_decoding_is_lossy() {
        let buffer = CaptureBuffer::new();
        buffer.extend(&[b'o', b'k', 0xff]);
        assert_eq!(buffer.decoded(), "ok\u{fffd}");
    }

    #[test]
    fn test_captured_output_lines() {
        let stdout = CaptureBuffer::new();
        let stderr = CaptureBuffer::new();
        stdout.extend(b"a\nb\n");
        stderr.extend(b"oops\n");

        let output = CapturedOutput::from_buffers(&stdout, &stderr);
        assert_eq!(output.stdout_lines(), vec!["a", "b"]);
        assert_eq!(output.stderr_text(), "oops\n");
    }
}
