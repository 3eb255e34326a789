//! Audio sample player.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use dasp_graph::Buffer;

use crate::node::ProcessContext;
use crate::nodes::{clear, NodeParam};
use crate::space::{InstanceShared, SoundBuffer};

/// Plays a pre-decoded [`SoundBuffer`] for one sound instance.
///
/// Gain, pause and looping are read from the instance's shared atomics every
/// block; the playback cursor and end-of-sound flag are written back.
///
/// When the gain is below the engine's minimum volume threshold the player is
/// virtualized: it keeps advancing its cursor but outputs silence.
pub struct Player {
    buffer: Arc<SoundBuffer>,
    shared: Arc<InstanceShared>,
    /// Cursor in frames
    position: usize,
}

impl Player {
    pub fn new(buffer: Arc<SoundBuffer>, shared: Arc<InstanceShared>) -> Self {
        Self {
            buffer,
            shared,
            position: 0,
        }
    }

    /// Get the current playback position in seconds.
    #[inline]
    pub fn position_secs(&self) -> f64 {
        self.position as f64 / self.buffer.sample_rate().max(1) as f64
    }

    pub(crate) fn apply(&mut self, param: NodeParam) {
        if let NodeParam::Volume(v) = param {
            self.shared.gain.store(v.max(0.0));
        }
    }

    pub(crate) fn process(&mut self, ctx: &ProcessContext, outputs: &mut [Buffer]) {
        let shared = &self.shared;
        if shared.paused.load(Ordering::Relaxed) || shared.finished.load(Ordering::Relaxed) {
            clear(outputs);
            return;
        }

        let frames = self.buffer.frames();
        let looping = shared.looping.load(Ordering::Relaxed);
        let gain = shared.gain.load();
        let audible = gain >= ctx.min_volume_threshold;

        if frames == 0 {
            clear(outputs);
            shared.finished.store(true, Ordering::Relaxed);
            return;
        }

        if !audible {
            clear(outputs);
        }

        let src_channels = self.buffer.channels();
        let samples = self.buffer.samples();
        let buffer_len = outputs.first().map_or(ctx.block_frames, |b| b.len());

        for i in 0..buffer_len {
            if self.position >= frames {
                if looping {
                    self.position = 0;
                } else {
                    for buffer in outputs.iter_mut() {
                        buffer[i..].iter_mut().for_each(|s| *s = 0.0);
                    }
                    shared.finished.store(true, Ordering::Relaxed);
                    break;
                }
            }

            if audible {
                let frame = self.position * src_channels;
                for (ch, buffer) in outputs.iter_mut().enumerate() {
                    // wrap if more outputs than source channels
                    buffer[i] = samples[frame + ch % src_channels] * gain;
                }
            }

            self.position += 1;
        }

        shared.position.store(self.position as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(frames: usize, gain: f32, looping: bool) -> Player {
        let buffer = Arc::new(SoundBuffer::new(vec![0.5; frames * 2], 2, 48000));
        let shared = Arc::new(InstanceShared::new(gain, false, looping));
        Player::new(buffer, shared)
    }

    #[test]
    fn plays_then_finishes() {
        let ctx = ProcessContext::new(48000, 0.015);
        let mut p = player(10, 1.0, false);
        let mut out = vec![Buffer::default(); 2];
        p.process(&ctx, &mut out);
        assert_eq!(out[1][9], 0.5);
        assert_eq!(out[1][10], 0.0);
        assert!(p.shared.is_finished());
        assert_eq!(p.shared.position(), 10);
    }

    #[test]
    fn quiet_player_is_virtualized() {
        let ctx = ProcessContext::new(48000, 0.015);
        let mut p = player(1000, 0.01, false);
        let mut out = vec![Buffer::default(); 2];
        p.process(&ctx, &mut out);
        assert!(out.iter().all(|b| b.iter().all(|&s| s == 0.0)));
        // the cursor still moved
        assert_eq!(p.shared.position(), 64);
    }

    #[test]
    fn looping_wraps_around() {
        let ctx = ProcessContext::new(48000, 0.0);
        let mut p = player(10, 1.0, true);
        let mut out = vec![Buffer::default(); 2];
        p.process(&ctx, &mut out);
        assert!(!p.shared.is_finished());
        assert!(out[0].iter().all(|&s| s == 0.5));
    }
}
