//! Streaming frame accumulator for the raw byte stream.
//!
//! The lower transport delivers byte chunks of arbitrary size. This module
//! slices that stream into complete SLIP-delimited frames, carrying partial
//! data across successive reads.

use threewire_core::framing::slip::DELIMITER;

/// Stateful accumulator that buffers stream data and extracts complete
/// frames delimited by 0xC0 bytes.
///
/// Rules, applied byte by byte:
/// - The first delimiter opens a frame; anything buffered before it is
///   discarded as line noise.
/// - Two delimiters back to back are collapsed: the second is treated as
///   the opening delimiter of the next frame, never as the close of an
///   empty one.
/// - A delimiter closing a non-empty body completes the frame, which is
///   returned still stuffed and including both delimiters.
///
/// Bytes left over when a chunk is exhausted are retained as the
/// unprocessed tail for the next call.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
    delimiter_seen: bool,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            delimiter_seen: false,
        }
    }

    /// Feed a chunk from the stream and extract all complete frames.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();

        for &byte in data {
            self.buffer.push(byte);

            if byte != DELIMITER {
                continue;
            }

            if !self.delimiter_seen {
                // Start of frame; data before it is irrelevant.
                self.delimiter_seen = true;
                self.buffer.clear();
                self.buffer.push(DELIMITER);
            } else if self.buffer.len() == 2 {
                // Two delimiters back to back open a new frame rather than
                // closing an empty one.
                self.buffer.clear();
                self.buffer.push(DELIMITER);
            } else {
                frames.push(std::mem::take(&mut self.buffer));
                self.delimiter_seen = false;
            }
        }

        frames
    }

    /// Number of unprocessed bytes retained for the next chunk.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}
