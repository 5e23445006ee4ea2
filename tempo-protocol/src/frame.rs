//! Media frame abstraction
//!
//! A frame is one fixed-duration encoded media unit, identified by a
//! monotonically increasing index. The transport is generic over the frame
//! kind: audio and video are two implementations of [`MediaFrame`] rather
//! than two instantiations of a specialized connection.

use crate::packet::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// One encoded media unit carried by the transport.
///
/// Implementations are immutable once created and must keep their wire form
/// within `MAX_WIRE_SIZE` so the sender can budget packet assembly.
pub trait MediaFrame: Clone {
    /// Number of 48 kHz samples covered by one frame.
    const SAMPLES_PER_FRAME: u32;

    /// Upper bound on `wire_size()` for any valid frame.
    const MAX_WIRE_SIZE: usize;

    /// Most frames of this kind that fit in one packet bundle.
    const MAX_FRAMES_PER_PACKET: usize;

    /// Frame index, in units of `SAMPLES_PER_FRAME`.
    fn frame_index(&self) -> u32;

    /// First sample covered by this frame.
    fn sample_index(&self) -> u64 {
        u64::from(self.frame_index()) * u64::from(Self::SAMPLES_PER_FRAME)
    }

    /// Exact serialized length in bytes.
    fn wire_size(&self) -> usize;

    fn encode(&self, buf: &mut BytesMut);

    fn decode(buf: &mut Bytes) -> Result<Self, WireError>;
}

/// Maximum encoded length of one audio channel (fits a u8 length prefix).
pub const MAX_AUDIO_CHANNEL_SIZE: usize = 255;

/// Maximum encoded length of one video chunk.
pub const MAX_VIDEO_CHUNK_SIZE: usize = 1280;

/// A stereo audio frame: two independently encoded channel payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    frame_index: u32,
    ch1: Bytes,
    ch2: Bytes,
}

impl AudioFrame {
    /// Create a frame from two encoded channel payloads.
    ///
    /// # Panics
    /// Panics if either channel exceeds [`MAX_AUDIO_CHANNEL_SIZE`]; the
    /// encoder contract bounds its output, so a longer payload is a caller
    /// bug rather than a recoverable condition.
    pub fn new(frame_index: u32, ch1: Bytes, ch2: Bytes) -> Self {
        assert!(ch1.len() <= MAX_AUDIO_CHANNEL_SIZE, "channel 1 too long");
        assert!(ch2.len() <= MAX_AUDIO_CHANNEL_SIZE, "channel 2 too long");
        AudioFrame {
            frame_index,
            ch1,
            ch2,
        }
    }

    pub fn ch1(&self) -> &Bytes {
        &self.ch1
    }

    pub fn ch2(&self) -> &Bytes {
        &self.ch2
    }
}

impl MediaFrame for AudioFrame {
    const SAMPLES_PER_FRAME: u32 = 120; // 2.5 ms @ 48 kHz
    const MAX_WIRE_SIZE: usize = 4 + 1 + MAX_AUDIO_CHANNEL_SIZE + 1 + MAX_AUDIO_CHANNEL_SIZE;
    const MAX_FRAMES_PER_PACKET: usize = 8;

    fn frame_index(&self) -> u32 {
        self.frame_index
    }

    fn wire_size(&self) -> usize {
        4 + 1 + self.ch1.len() + 1 + self.ch2.len()
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.frame_index);
        buf.put_u8(self.ch1.len() as u8);
        buf.put_slice(&self.ch1);
        buf.put_u8(self.ch2.len() as u8);
        buf.put_slice(&self.ch2);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        if buf.remaining() < 5 {
            return Err(WireError::Truncated);
        }
        let frame_index = buf.get_u32();

        let len1 = buf.get_u8() as usize;
        if buf.remaining() < len1 {
            return Err(WireError::Truncated);
        }
        let ch1 = buf.split_to(len1);

        if buf.remaining() < 1 {
            return Err(WireError::Truncated);
        }
        let len2 = buf.get_u8() as usize;
        if buf.remaining() < len2 {
            return Err(WireError::Truncated);
        }
        let ch2 = buf.split_to(len2);

        Ok(AudioFrame {
            frame_index,
            ch1,
            ch2,
        })
    }
}

/// A video frame: one chunk of an encoded access unit.
///
/// Large access units are split into chunks upstream; each chunk occupies
/// one frame index so the transport bookkeeping is identical to audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    frame_index: u32,
    chunk: Bytes,
}

impl VideoFrame {
    /// # Panics
    /// Panics if the chunk exceeds [`MAX_VIDEO_CHUNK_SIZE`].
    pub fn new(frame_index: u32, chunk: Bytes) -> Self {
        assert!(chunk.len() <= MAX_VIDEO_CHUNK_SIZE, "video chunk too long");
        VideoFrame { frame_index, chunk }
    }

    pub fn chunk(&self) -> &Bytes {
        &self.chunk
    }
}

impl MediaFrame for VideoFrame {
    const SAMPLES_PER_FRAME: u32 = 120;
    const MAX_WIRE_SIZE: usize = 4 + 2 + MAX_VIDEO_CHUNK_SIZE;
    const MAX_FRAMES_PER_PACKET: usize = 2;

    fn frame_index(&self) -> u32 {
        self.frame_index
    }

    fn wire_size(&self) -> usize {
        4 + 2 + self.chunk.len()
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.frame_index);
        buf.put_u16(self.chunk.len() as u16);
        buf.put_slice(&self.chunk);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        if buf.remaining() < 6 {
            return Err(WireError::Truncated);
        }
        let frame_index = buf.get_u32();
        let len = buf.get_u16() as usize;
        if len > MAX_VIDEO_CHUNK_SIZE {
            return Err(WireError::FrameTooLong);
        }
        if buf.remaining() < len {
            return Err(WireError::Truncated);
        }
        let chunk = buf.split_to(len);

        Ok(VideoFrame { frame_index, chunk })
    }
}
