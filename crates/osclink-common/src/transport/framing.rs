//! Stream framing for OSC over TCP
//!
//! Two framings share the wire. The first bytes of a connection decide which
//! one a peer uses:
//!
//! ```text
//! length-prefixed:  +----------------+-----------------+
//!                   | Length (4B BE) | OSC packet      |
//!                   +----------------+-----------------+
//!
//! SLIP (RFC 1055):  [END] OSC packet with END/ESC escaped END
//! ```
//!
//! A stream that starts with `/`, with `END /` or with `#bun` is SLIP, any
//! other stream is length-prefixed. [`StreamFramer`] is a tokio-util codec,
//! so it keeps partially received frames across reads and resumes decoding
//! when more bytes arrive.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{OscError, Result};
use crate::protocol::DEFAULT_MAX_MSG_SIZE;

pub const SLIP_END: u8 = 0xC0;
pub const SLIP_ESC: u8 = 0xDB;
pub const SLIP_ESC_END: u8 = 0xDC;
pub const SLIP_ESC_ESC: u8 = 0xDD;

/// Smallest receive buffer allocated for a stream
pub const MIN_STREAM_BUFFER: usize = 64;

/// Decoder state inside a SLIP stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlipState {
    Normal,
    AfterEscape,
}

/// Framing detected on a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    /// Fewer than four bytes seen so far
    Unknown,
    LengthPrefixed,
    Slip(SlipState),
}

fn printable_or_nul(b: u8) -> bool {
    b == 0 || b == b' ' || b.is_ascii_graphic()
}

/// Decides the framing from the first four bytes of a stream
pub fn detect_slip(head: &[u8; 4]) -> bool {
    if head[0] == SLIP_END && head[1] == b'/' && printable_or_nul(head[2]) && printable_or_nul(head[3]) {
        return true;
    }
    if head[0] == b'/' && head[1..].iter().all(|&b| printable_or_nul(b)) {
        return true;
    }
    head == b"#bun"
}

/// SLIP-encodes `data`, terminating the frame with `END`
pub fn slip_encode(data: &[u8], dst: &mut BytesMut) {
    dst.reserve(data.len() + data.len() / 8 + 1);
    for &b in data {
        match b {
            SLIP_ESC => {
                dst.put_u8(SLIP_ESC);
                dst.put_u8(SLIP_ESC_ESC);
            }
            SLIP_END => {
                dst.put_u8(SLIP_ESC);
                dst.put_u8(SLIP_ESC_END);
            }
            other => dst.put_u8(other),
        }
    }
    dst.put_u8(SLIP_END);
}

/// Prefixes `data` with its big-endian length
pub fn length_prefix(data: &[u8], dst: &mut BytesMut) {
    dst.reserve(4 + data.len());
    dst.put_u32(data.len() as u32);
    dst.put_slice(data);
}

/// Frame decoder and encoder for one stream connection
#[derive(Debug)]
pub struct StreamFramer {
    mode: FrameMode,
    /// Decoded bytes of the SLIP frame in progress
    frame: BytesMut,
    /// Raw bytes fed through [`StreamFramer::feed`]
    pending: BytesMut,
    max_size: usize,
    /// Encode outgoing frames with SLIP instead of a length prefix
    slip_out: bool,
}

impl StreamFramer {
    pub fn new() -> Self {
        Self {
            mode: FrameMode::Unknown,
            frame: BytesMut::new(),
            pending: BytesMut::new(),
            max_size: DEFAULT_MAX_MSG_SIZE,
            slip_out: false,
        }
    }

    /// Create a framer with a custom maximum frame size
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Encode outgoing frames with SLIP
    pub fn with_slip_output(mut self, slip: bool) -> Self {
        self.slip_out = slip;
        self
    }

    /// Framer for a stream whose mode is already known
    pub fn with_mode(mut self, mode: FrameMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
    }

    /// Pushes raw bytes and returns every frame they complete.
    ///
    /// Incomplete data stays buffered for the next call.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        let mut pending = std::mem::take(&mut self.pending);
        pending.extend_from_slice(data);
        let mut frames = Vec::new();
        let result = loop {
            match self.decode(&mut pending) {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break Ok(frames),
                Err(e) => break Err(e),
            }
        };
        self.pending = pending;
        result
    }

    /// Grows `buf` ahead of a read: doubles its capacity when it is more
    /// than half full, never beyond the maximum frame size plus a header.
    pub fn reserve_read(&self, buf: &mut BytesMut) -> Result<()> {
        let cap = buf.capacity().max(MIN_STREAM_BUFFER);
        let limit = self.max_size + 4;
        if buf.len() >= limit {
            return Err(OscError::TooBig {
                size: buf.len(),
                max: self.max_size,
            });
        }
        if buf.capacity() - buf.len() < cap / 2 || buf.capacity() < MIN_STREAM_BUFFER {
            let target = (cap * 2).min(limit).max(buf.len() + 1);
            buf.reserve(target - buf.len());
        }
        Ok(())
    }

    fn decode_length_prefixed(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        loop {
            if src.len() < 4 {
                return Ok(None);
            }
            let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
            if length > self.max_size {
                return Err(OscError::TooBig {
                    size: length,
                    max: self.max_size,
                });
            }
            if length == 0 {
                // empty frames carry nothing to dispatch
                src.advance(4);
                continue;
            }
            let total = 4 + length;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }
            src.advance(4);
            return Ok(Some(src.split_to(length).freeze()));
        }
    }

    fn decode_slip(&mut self, mut state: SlipState, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let mut consumed = 0;
        let mut complete = None;
        for &b in src.iter() {
            consumed += 1;
            match (state, b) {
                (SlipState::Normal, SLIP_END) => {
                    // leading or repeated END bytes delimit nothing
                    if !self.frame.is_empty() {
                        complete = Some(self.frame.split().freeze());
                        break;
                    }
                }
                (SlipState::Normal, SLIP_ESC) => state = SlipState::AfterEscape,
                (SlipState::Normal, other) => self.frame.put_u8(other),
                (SlipState::AfterEscape, SLIP_ESC_END) => {
                    self.frame.put_u8(SLIP_END);
                    state = SlipState::Normal;
                }
                (SlipState::AfterEscape, SLIP_ESC_ESC) => {
                    self.frame.put_u8(SLIP_ESC);
                    state = SlipState::Normal;
                }
                (SlipState::AfterEscape, other) => {
                    // protocol violation: keep the byte as is
                    self.frame.put_u8(other);
                    state = SlipState::Normal;
                }
            }
            if self.frame.len() > self.max_size {
                return Err(OscError::TooBig {
                    size: self.frame.len(),
                    max: self.max_size,
                });
            }
        }
        src.advance(consumed);
        self.mode = FrameMode::Slip(state);
        Ok(complete)
    }
}

impl Default for StreamFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for StreamFramer {
    type Item = Bytes;
    type Error = OscError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if self.mode == FrameMode::Unknown {
            if src.len() < 4 {
                return Ok(None);
            }
            let head = [src[0], src[1], src[2], src[3]];
            self.mode = if detect_slip(&head) {
                FrameMode::Slip(SlipState::Normal)
            } else {
                FrameMode::LengthPrefixed
            };
            tracing::debug!(mode = ?self.mode, "Detected stream framing");
        }

        match self.mode {
            FrameMode::LengthPrefixed => self.decode_length_prefixed(src),
            FrameMode::Slip(state) => self.decode_slip(state, src),
            FrameMode::Unknown => Ok(None),
        }
    }
}

impl Encoder<&[u8]> for StreamFramer {
    type Error = OscError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_size {
            return Err(OscError::TooBig {
                size: item.len(),
                max: self.max_size,
            });
        }
        if self.slip_out {
            slip_encode(item, dst);
        } else {
            length_prefix(item, dst);
        }
        Ok(())
    }
}
