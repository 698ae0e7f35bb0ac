// pilink-camera/src/stream.rs
use futures_core::Stream;
use log::warn;
use tokio::io::{AsyncRead, AsyncReadExt};

/// JPEG start-of-image marker.
pub const JPEG_START: &[u8] = &[0xFF, 0xD8];
/// JPEG end-of-image marker.
pub const JPEG_END: &[u8] = &[0xFF, 0xD9];

// bytes pulled from the source per read
const CHUNK: usize = 4096;

/// One complete START..=END byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Cuts an append-only byte stream into frames.
///
/// The search is plain byte order: the first START in the buffer, then the
/// first END after it. Marker bytes inside a payload are not recognised as
/// such, so a stray END inside a JPEG body ends the frame early.
///
/// Between calls the buffer never holds a complete frame, only the
/// unfinished tail of the next one (or a possible partial START marker).
#[derive(Debug)]
pub struct FrameTokenizer {
    start: &'static [u8],
    end: &'static [u8],
    max_frame_len: usize,
    buffer: Vec<u8>,
    discarded: usize,
}

impl FrameTokenizer {
    pub fn new(start: &'static [u8], end: &'static [u8], max_frame_len: usize) -> Self {
        Self {
            start,
            end,
            max_frame_len,
            buffer: Vec::new(),
            discarded: 0,
        }
    }

    pub fn jpeg(max_frame_len: usize) -> Self {
        Self::new(JPEG_START, JPEG_END, max_frame_len)
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete frame, or `None` until more input arrives.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let Some(start) = find(&self.buffer, self.start, 0) else {
                // keep just enough to complete a START split across chunks
                let keep = self.start.len().saturating_sub(1);
                if self.buffer.len() > keep {
                    self.discard(self.buffer.len() - keep);
                }
                return None;
            };
            if start > 0 {
                self.discard(start);
            }

            if let Some(end) = find(&self.buffer, self.end, self.start.len()) {
                let end = end + self.end.len();
                let frame: Vec<u8> = self.buffer.drain(..end).collect();
                return Some(Frame(frame));
            }
            if self.buffer.len() <= self.max_frame_len {
                return None;
            }

            warn!(
                "dropping {} byte partial frame (limit {})",
                self.buffer.len(),
                self.max_frame_len
            );
            // skip this START so the scan resumes at the next one
            self.discard(self.start.len());
        }
    }

    /// Unconsumed bytes.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Total bytes dropped because they could not belong to a frame.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    fn discard(&mut self, n: usize) {
        self.buffer.drain(..n);
        self.discarded += n;
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < from + needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

/// Lazily tokenize `source` into frames.
///
/// The stream ends when the source reports EOF (source closed); an I/O
/// error is yielded once and also ends the stream. The tokenizer is owned
/// by the stream and dropped with it.
pub fn frame_stream<R>(source: R, tokenizer: FrameTokenizer) -> impl Stream<Item = std::io::Result<Frame>>
where
    R: AsyncRead + Unpin,
{
    futures_util::stream::unfold(Some((source, tokenizer)), |state| async move {
        let (mut source, mut tokenizer) = state?;
        let mut chunk = [0u8; CHUNK];
        loop {
            if let Some(frame) = tokenizer.next_frame() {
                return Some((Ok(frame), Some((source, tokenizer))));
            }
            match source.read(&mut chunk).await {
                Ok(0) => return None,
                Ok(n) => tokenizer.push(&chunk[..n]),
                Err(e) => return Some((Err(e), None)),
            }
        }
    })
}
