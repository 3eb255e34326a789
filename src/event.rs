//! Events sent from the audio thread to the control thread, plus the few the
//! control thread raises itself.
//!
//! Every payload is fixed size so events can travel through a bounded `rtrb`
//! ring without allocating on the audio thread.

use crate::midi::MidiEvent;
use crate::settings::Latency;
use crate::space::{InstanceId, SpaceId};

/// Samples carried by one [`MicBlock`].
pub const MIC_BLOCK_SAMPLES: usize = 128;

/// Uncompressed captured input, interleaved.
#[derive(Clone, Copy, Debug)]
pub struct MicBlock {
    pub channels: usize,
    len: usize,
    samples: [f32; MIC_BLOCK_SAMPLES],
}

impl MicBlock {
    pub(crate) fn new(channels: usize, data: &[f32]) -> Self {
        let len = data.len().min(MIC_BLOCK_SAMPLES);
        let mut samples = [0.0; MIC_BLOCK_SAMPLES];
        samples[..len].copy_from_slice(&data[..len]);
        Self {
            channels,
            len,
            samples,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples[..self.len]
    }
}

/// Captured input as signed 16-bit little-endian PCM bytes.
#[derive(Clone, Copy, Debug)]
pub struct MicBytes {
    pub channels: usize,
    len: usize,
    bytes: [u8; MIC_BLOCK_SAMPLES * 2],
}

impl MicBytes {
    pub(crate) fn new(channels: usize, data: &[f32]) -> Self {
        let count = data.len().min(MIC_BLOCK_SAMPLES);
        let mut bytes = [0u8; MIC_BLOCK_SAMPLES * 2];
        for (chunk, &s) in bytes.chunks_exact_mut(2).zip(data[..count].iter()) {
            let pcm = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            chunk.copy_from_slice(&pcm.to_le_bytes());
        }
        Self {
            channels,
            len: count * 2,
            bytes,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// Something the audio thread wants the control thread to know.
#[derive(Clone, Copy, Debug)]
pub enum AudioEvent {
    Midi(MidiEvent),
    /// The master mix went over full scale and was clamped.
    Clipping { peak: f32 },
    MicrophoneFloat(MicBlock),
    MicrophoneBytes(MicBytes),
    /// A latency change took effect at a block boundary.
    LatencyChanged(Latency),
    /// A sound started playing. Raised on the control thread by
    /// [`SoundSystem::play`](crate::SoundSystem::play).
    SoundInstancePlayed { instance: InstanceId, space: SpaceId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mic_bytes_are_i16_le() {
        let block = MicBytes::new(1, &[1.0, -1.0, 0.0]);
        assert_eq!(block.bytes(), &[0xFF, 0x7F, 0x01, 0x80, 0x00, 0x00]);
    }

    #[test]
    fn mic_block_truncates() {
        let data = vec![0.5; MIC_BLOCK_SAMPLES + 10];
        let block = MicBlock::new(2, &data);
        assert_eq!(block.samples().len(), MIC_BLOCK_SAMPLES);
    }
}
