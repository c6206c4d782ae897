//! Resynchronizing stream decoder
//!
//! The bus delivers arbitrary-length chunks with no message boundaries. The
//! decoder scans for the marker byte, slices length-delimited candidates and
//! checksum-verifies them. An incomplete tail is retained as residue for the
//! next chunk; checksum failures advance the scan cursor by one byte so a
//! fabricated marker inside payload data cannot derail a later real frame.

use crate::frame::{Frame, FRAME_MARKER, FRAME_OVERHEAD, LENGTH_OFFSET};

/// Stateful frame decoder for one bus session.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    residue: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes held over from previous chunks that do not yet form a frame.
    pub fn residue(&self) -> &[u8] {
        &self.residue
    }

    /// Consume one inbound chunk and return every complete, valid frame.
    ///
    /// Never blocks and never fails: garbage is skipped, truncated tails are
    /// buffered until more bytes arrive.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut data = std::mem::take(&mut self.residue);
        data.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut k = 0;
        while k < data.len() {
            if data[k] != FRAME_MARKER {
                k += 1;
                continue;
            }
            // Need the length field before the frame extent is known
            if k + LENGTH_OFFSET >= data.len() {
                self.residue = data[k..].to_vec();
                return frames;
            }
            let frame_len = data[k + LENGTH_OFFSET] as usize + FRAME_OVERHEAD;
            if k + frame_len > data.len() {
                self.residue = data[k..].to_vec();
                return frames;
            }
            match Frame::parse(data[k..k + frame_len].to_vec()) {
                Ok(frame) => {
                    frames.push(frame);
                    k += frame_len;
                }
                // Treat an invalid marker match as line noise, not an error
                Err(_) => k += 1,
            }
        }
        frames
    }
}
