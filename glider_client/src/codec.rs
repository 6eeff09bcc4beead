//! `tokio_util` codec adapter for the event-stream frame format.
//!
//! Framing and payload parsing are shared with [`glider::frame::FrameDecoder`];
//! this module only plugs them into `FramedRead` so a streaming response body
//! can be consumed as a `Stream` of decoded frames.

use std::io;
use std::marker::PhantomData;

use bytes::{Buf as _, Bytes, BytesMut};
use glider::frame::{find_delimiter_from, parse_frame, resume_offset, Frame};
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::service::ByteStream;

pub type FrameStream<T> = FramedRead<StreamReader<ByteStream, Bytes>, EventStreamCodec<T>>;

#[derive(Debug)]
pub struct EventStreamCodec<T> {
    /// Offset into the read buffer where the delimiter search resumes.
    next_index: usize,
    _record: PhantomData<fn() -> T>,
}

impl<T> Default for EventStreamCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventStreamCodec<T> {
    pub fn new() -> Self {
        Self {
            next_index: 0,
            _record: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Decoder for EventStreamCodec<T> {
    type Item = Frame<T>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Frame<T>>> {
        while let Some((frame_len, delim_len)) = find_delimiter_from(src, self.next_index) {
            let raw = src.split_to(frame_len);
            src.advance(delim_len);
            self.next_index = 0;
            if let Some(frame) = parse_frame(&raw) {
                return Ok(Some(frame));
            }
        }
        self.next_index = resume_offset(src.len());
        Ok(None)
    }

    /// An unterminated tail at end of stream is dropped, not parsed.
    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<Frame<T>>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            debug!(bytes = src.len(), "discarding unterminated frame at end of stream");
            src.clear();
        }
        self.next_index = 0;
        Ok(None)
    }
}

/// Decode a response body into a stream of frames.
pub fn decode_stream<T: DeserializeOwned>(body: ByteStream) -> FrameStream<T> {
    FramedRead::new(StreamReader::new(body), EventStreamCodec::new())
}
