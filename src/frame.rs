//! Incremental decoder for server-pushed event streams.
//!
//! The remote run endpoint writes one frame per generation:
//!
//! ```text
//! data: {"generation":0,...}
//!
//! data: {"generation":1,...}
//!
//! ```
//!
//! Bytes arrive in arbitrary chunks. [`FrameDecoder`] buffers them undecoded,
//! cuts complete frames at blank-line delimiters and parses each frame's data
//! payload as JSON. A frame that fails to parse is reported as
//! [`Frame::Malformed`] and decoding continues; only the transport can end a
//! stream early. Whatever is left unterminated when the stream ends is
//! discarded, never parsed.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;

pub const DATA_FIELD: &str = "data";

/// One decoded unit of the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame<T> {
    Record(T),
    Malformed { payload: String, reason: String },
}

/// Locate the first frame delimiter in `buf`.
///
/// Returns `(frame_len, delimiter_len)`: the frame occupies `buf[..frame_len]`
/// and the delimiter the following `delimiter_len` bytes. Both `\n\n` and
/// `\r\n\r\n` terminate a frame.
pub fn find_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    find_delimiter_from(buf, 0)
}

/// [`find_delimiter`] skipping bytes a previous search already covered.
///
/// `start` must come from [`resume_offset`] of a buffer that held no
/// delimiter; offsets in the result are still relative to `buf[0]`.
pub fn find_delimiter_from(buf: &[u8], start: usize) -> Option<(usize, usize)> {
    let mut i = start;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' {
            if buf[i + 1] == b'\n' {
                return Some((i, 2));
            }
            if buf[i + 1] == b'\r' && buf.get(i + 2) == Some(&b'\n') && i >= 1 && buf[i - 1] == b'\r'
            {
                return Some((i - 1, 4));
            }
        }
        i += 1;
    }
    None
}

/// Where the next search of a `len`-byte buffer without a delimiter resumes.
///
/// The last three bytes may open a `\r\n\r\n` completed by the next chunk.
pub fn resume_offset(len: usize) -> usize {
    len.saturating_sub(3)
}

/// Extract the data payload of one frame.
///
/// Multiple `data:` lines are joined with `\n`; comment lines (`:`) and other
/// fields are ignored. `None` means the frame carried no data at all.
pub fn frame_payload(frame: &str) -> Option<String> {
    let mut payload: Option<String> = None;
    for line in frame.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field != DATA_FIELD {
            continue;
        }
        match payload.as_mut() {
            Some(p) => {
                p.push('\n');
                p.push_str(value);
            }
            None => payload = Some(value.to_string()),
        }
    }
    payload
}

/// Decode one complete frame (delimiter already removed).
pub fn parse_frame<T: DeserializeOwned>(raw: &[u8]) -> Option<Frame<T>> {
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => {
            return Some(Frame::Malformed {
                payload: String::from_utf8_lossy(raw).into_owned(),
                reason: format!("invalid utf-8: {}", e),
            })
        }
    };
    let payload = frame_payload(text)?;
    Some(match serde_json::from_str::<T>(&payload) {
        Ok(record) => Frame::Record(record),
        Err(e) => Frame::Malformed {
            payload,
            reason: e.to_string(),
        },
    })
}

/// Pull-based frame decoder fed with raw byte chunks.
#[derive(Debug)]
pub struct FrameDecoder<T> {
    buf: Vec<u8>,
    /// Search resumes here; everything before it holds no delimiter.
    scanned: usize,
    _record: PhantomData<fn() -> T>,
}

impl<T> Default for FrameDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FrameDecoder<T> {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            _record: PhantomData,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes buffered but not yet terminated by a delimiter.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// End of stream: drop any unterminated remainder and report its length.
    pub fn finish(&mut self) -> usize {
        let dropped = self.buf.len();
        self.buf.clear();
        self.scanned = 0;
        dropped
    }
}

impl<T: DeserializeOwned> FrameDecoder<T> {
    /// Next complete frame, or `None` when more bytes are needed.
    ///
    /// Frames without a data field are consumed silently.
    pub fn next_frame(&mut self) -> Option<Frame<T>> {
        while let Some((frame_len, delim_len)) = find_delimiter_from(&self.buf, self.scanned) {
            let raw: Vec<u8> = self.buf.drain(..frame_len + delim_len).take(frame_len).collect();
            self.scanned = 0;
            if let Some(frame) = parse_frame(&raw) {
                return Some(frame);
            }
        }
        self.scanned = resume_offset(self.buf.len());
        None
    }

    /// Feed a chunk and collect every frame it completes.
    pub fn decode_chunk(&mut self, chunk: &[u8]) -> Vec<Frame<T>> {
        self.push(chunk);
        std::iter::from_fn(|| self.next_frame()).collect()
    }
}
