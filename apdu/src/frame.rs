// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Frame codec for carrying messages over fixed-size transport frames
//!
//! Messages are split into frames no larger than the configured frame size,
//! each frame carries a sequence index, with the first frame additionally
//! carrying the total message length.
//!
//! ## Encoding
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |       CHANNEL (opt)           |   TAG (opt)   |   SEQUENCE    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   SEQUENCE    |      LENGTH (first frame)     |  PAYLOAD...   /
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! All multi-byte fields are big-endian. USB HID frames carry a channel
//! and the `0x05` tag and are zero-padded to 64 bytes, BLE frames carry
//! only the tag, raw / proxy frames carry neither.

use encdec::Encode;

use crate::ApduError;

/// Default frame tag for APDU transport
pub const FRAME_TAG_APDU: u8 = 0x05;

/// USB HID frame (report) size
pub const HID_FRAME_SIZE: usize = 64;

/// Frame codec errors
#[derive(Copy, Clone, PartialEq, Debug, thiserror::Error)]
pub enum FrameError {
    /// Frame received out of sequence, partial message discarded
    #[error("frame out of sequence (expected: {expected}, actual: {actual})")]
    OutOfSequence { expected: u16, actual: u16 },

    /// Frame shorter than its header
    #[error("truncated frame ({0} bytes)")]
    Truncated(usize),

    /// Frame channel does not match the configured channel
    #[error("invalid frame channel (expected: {expected:04x}, actual: {actual:04x})")]
    InvalidChannel { expected: u16, actual: u16 },

    /// Frame tag does not match the configured tag
    #[error("invalid frame tag (expected: {expected:02x}, actual: {actual:02x})")]
    InvalidTag { expected: u8, actual: u8 },

    /// Message exceeds the maximum encodable length
    #[error("message too large ({0} bytes)")]
    MessageTooLarge(usize),

    /// Frame size too small to carry any payload
    #[error("invalid frame size {0}")]
    InvalidFrameSize(usize),
}

impl From<encdec::Error> for FrameError {
    fn from(_: encdec::Error) -> Self {
        FrameError::Truncated(0)
    }
}

impl From<ApduError> for FrameError {
    fn from(_: ApduError) -> Self {
        FrameError::Truncated(0)
    }
}

/// Frame layout configuration, per transport
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct FrameConfig {
    /// Maximum frame size in bytes
    pub frame_size: usize,
    /// Channel identifier (USB HID)
    pub channel: Option<u16>,
    /// Frame tag
    pub tag: Option<u8>,
    /// Zero-pad frames to `frame_size`
    pub padding: bool,
}

impl FrameConfig {
    /// USB HID framing with a random channel
    pub fn hid() -> Self {
        Self {
            frame_size: HID_FRAME_SIZE,
            channel: Some(rand::random::<u16>()),
            tag: Some(FRAME_TAG_APDU),
            padding: true,
        }
    }

    /// BLE framing for the negotiated MTU
    pub fn ble(mtu: usize) -> Self {
        Self {
            frame_size: mtu,
            channel: None,
            tag: Some(FRAME_TAG_APDU),
            padding: false,
        }
    }

    /// Raw framing (sequence and length only)
    pub fn raw(frame_size: usize) -> Self {
        Self {
            frame_size,
            channel: None,
            tag: None,
            padding: false,
        }
    }

    /// Length of the common frame header (excluding the first-frame length field)
    pub fn header_len(&self) -> usize {
        self.channel.map(|_| 2).unwrap_or(0) + self.tag.map(|_| 1).unwrap_or(0) + 2
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self::hid()
    }
}

/// Frame header
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct FrameHeader {
    pub channel: Option<u16>,
    pub tag: Option<u8>,
    pub sequence: u16,
    /// Total message length, present on the first frame only
    pub data_len: Option<u16>,
}

impl Encode for FrameHeader {
    type Error = FrameError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        let mut n = 2;
        n += self.channel.map(|_| 2).unwrap_or(0);
        n += self.tag.map(|_| 1).unwrap_or(0);
        n += self.data_len.map(|_| 2).unwrap_or(0);
        Ok(n)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self.encode_len()?;
        if buff.len() < n {
            return Err(FrameError::Truncated(buff.len()));
        }

        let mut index = 0;

        if let Some(c) = self.channel {
            buff[index..][..2].copy_from_slice(&c.to_be_bytes());
            index += 2;
        }

        if let Some(t) = self.tag {
            buff[index] = t;
            index += 1;
        }

        buff[index..][..2].copy_from_slice(&self.sequence.to_be_bytes());
        index += 2;

        if let Some(l) = self.data_len {
            buff[index..][..2].copy_from_slice(&l.to_be_bytes());
            index += 2;
        }

        Ok(index)
    }
}

/// Single transport frame
#[derive(Clone, PartialEq, Debug)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Encode frame to bytes, padding to the configured frame size where required
    pub fn to_bytes(&self, cfg: &FrameConfig) -> Result<Vec<u8>, FrameError> {
        let h = self.header.encode_len()?;

        let len = match cfg.padding {
            true => cfg.frame_size.max(h + self.payload.len()),
            false => h + self.payload.len(),
        };

        let mut b = vec![0u8; len];
        self.header.encode(&mut b)?;
        b[h..][..self.payload.len()].copy_from_slice(&self.payload);

        Ok(b)
    }

    /// Parse a raw frame, `first` selects whether the length field is expected
    pub fn parse(cfg: &FrameConfig, raw: &[u8], first: bool) -> Result<Self, FrameError> {
        let min = cfg.header_len() + if first { 2 } else { 0 };
        if raw.len() < min {
            return Err(FrameError::Truncated(raw.len()));
        }

        let mut index = 0;

        let channel = match cfg.channel {
            Some(expected) => {
                let actual = u16::from_be_bytes([raw[0], raw[1]]);
                if actual != expected {
                    return Err(FrameError::InvalidChannel { expected, actual });
                }
                index += 2;
                Some(actual)
            }
            None => None,
        };

        let tag = match cfg.tag {
            Some(expected) => {
                let actual = raw[index];
                if actual != expected {
                    return Err(FrameError::InvalidTag { expected, actual });
                }
                index += 1;
                Some(actual)
            }
            None => None,
        };

        let sequence = u16::from_be_bytes([raw[index], raw[index + 1]]);
        index += 2;

        // The length field is only present on sequence zero
        let data_len = match first && sequence == 0 {
            true => {
                let l = u16::from_be_bytes([raw[index], raw[index + 1]]);
                index += 2;
                Some(l)
            }
            false => None,
        };

        Ok(Self {
            header: FrameHeader {
                channel,
                tag,
                sequence,
                data_len,
            },
            payload: raw[index..].to_vec(),
        })
    }
}

/// Splits messages into [Frame]s
#[derive(Clone, Debug)]
pub struct FrameEncoder {
    cfg: FrameConfig,
}

impl FrameEncoder {
    pub fn new(cfg: FrameConfig) -> Self {
        Self { cfg }
    }

    /// Split a message into frames, the first declaring the total message length.
    ///
    /// An empty message produces a single header-only frame.
    pub fn encode(&self, message: &[u8]) -> Result<Vec<Frame>, FrameError> {
        if message.len() > u16::MAX as usize {
            return Err(FrameError::MessageTooLarge(message.len()));
        }

        let h = self.cfg.header_len();
        if self.cfg.frame_size <= h + 2 {
            return Err(FrameError::InvalidFrameSize(self.cfg.frame_size));
        }

        let mut frames = vec![];
        let mut index = 0;
        let mut sequence = 0u16;

        loop {
            let first = sequence == 0;
            let capacity = self.cfg.frame_size - h - if first { 2 } else { 0 };
            let n = capacity.min(message.len() - index);

            frames.push(Frame {
                header: FrameHeader {
                    channel: self.cfg.channel,
                    tag: self.cfg.tag,
                    sequence,
                    data_len: first.then_some(message.len() as u16),
                },
                payload: message[index..][..n].to_vec(),
            });

            index += n;
            if index >= message.len() {
                break;
            }

            sequence = sequence.wrapping_add(1);
        }

        Ok(frames)
    }

    /// Split a message into encoded frame bytes ready for transmission
    pub fn encode_bytes(&self, message: &[u8]) -> Result<Vec<Vec<u8>>, FrameError> {
        self.encode(message)?
            .iter()
            .map(|f| f.to_bytes(&self.cfg))
            .collect()
    }
}

/// Reassembles [Frame]s into a message
///
/// The decoder holds state for one in-flight message and must be
/// [reset][FrameDecoder::reset] when an exchange is aborted.
#[derive(Clone, Debug)]
pub struct FrameDecoder {
    cfg: FrameConfig,
    expected: Option<usize>,
    sequence: u16,
    buff: Vec<u8>,
}

impl FrameDecoder {
    pub fn new(cfg: FrameConfig) -> Self {
        Self {
            cfg,
            expected: None,
            sequence: 0,
            buff: vec![],
        }
    }

    /// Discard any partially received message
    pub fn reset(&mut self) {
        self.expected = None;
        self.sequence = 0;
        self.buff.clear();
    }

    /// Check whether a message is partially received
    pub fn is_pending(&self) -> bool {
        self.expected.is_some()
    }

    /// Feed a raw frame, returning the complete message once all frames are received
    pub fn decode(&mut self, raw: &[u8]) -> Result<Option<Vec<u8>>, FrameError> {
        let frame = match Frame::parse(&self.cfg, raw, self.expected.is_none()) {
            Ok(f) => f,
            Err(e) => {
                self.reset();
                return Err(e);
            }
        };

        if frame.header.sequence != self.sequence {
            let expected = self.sequence;
            self.reset();
            return Err(FrameError::OutOfSequence {
                expected,
                actual: frame.header.sequence,
            });
        }

        if let Some(l) = frame.header.data_len {
            self.expected = Some(l as usize);
            self.buff.clear();
        }

        let expected = self.expected.unwrap_or(0);

        // Drop trailing padding
        let n = frame.payload.len().min(expected - self.buff.len());
        self.buff.extend_from_slice(&frame.payload[..n]);

        if self.buff.len() >= expected {
            let message = core::mem::take(&mut self.buff);
            self.reset();
            return Ok(Some(message));
        }

        self.sequence = self.sequence.wrapping_add(1);

        Ok(None)
    }
}
