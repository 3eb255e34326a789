//! Custom audio source fed from the control thread through a ring buffer.

use dasp_graph::Buffer;
use rtrb::{Consumer, Producer, RingBuffer};

/// Plays interleaved samples pushed through its [`CustomInput`].
///
/// Underruns are filled with silence.
pub struct Custom {
    consumer: Consumer<f32>,
    channels: usize,
}

/// Producer side of a [`Custom`] node.
pub struct CustomInput {
    producer: Producer<f32>,
    channels: usize,
}

impl Custom {
    /// Create a custom node buffering up to `capacity_frames` frames of `channels` channels.
    pub fn new(channels: usize, capacity_frames: usize) -> (Self, CustomInput) {
        let channels = channels.max(1);
        let (producer, consumer) = RingBuffer::new(capacity_frames.max(1) * channels);
        (
            Self { consumer, channels },
            CustomInput { producer, channels },
        )
    }

    pub(crate) fn process(&mut self, outputs: &mut [Buffer]) {
        let len = outputs.first().map_or(0, |b| b.len());
        for i in 0..len {
            for ch in 0..self.channels {
                let sample = self.consumer.pop().unwrap_or(0.0);
                if let Some(buffer) = outputs.get_mut(ch) {
                    buffer[i] = sample;
                }
            }
            // a mono feed fills every output channel
            if self.channels == 1 {
                let s = outputs[0][i];
                for buffer in outputs.iter_mut().skip(1) {
                    buffer[i] = s;
                }
            }
        }
    }
}

impl CustomInput {
    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Free space in samples.
    pub fn available(&self) -> usize {
        self.producer.slots()
    }

    /// Queue interleaved samples. Only whole frames are written.
    ///
    /// Returns the number of samples accepted.
    pub fn push_samples(&mut self, samples: &[f32]) -> usize {
        let room = self.producer.slots();
        let n = samples.len().min(room);
        let n = n - n % self.channels;
        for &s in &samples[..n] {
            if self.producer.push(s).is_err() {
                return 0;
            }
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pushed_samples_come_out_then_silence() {
        let (mut node, mut input) = Custom::new(2, 128);
        assert_eq!(input.push_samples(&[0.1, 0.2, 0.3]), 2);

        let mut out = vec![Buffer::default(); 2];
        node.process(&mut out);
        assert_eq!((out[0][0], out[1][0]), (0.1, 0.2));
        assert_eq!((out[0][1], out[1][1]), (0.0, 0.0));
    }

    #[test]
    fn push_stops_at_capacity() {
        let (_node, mut input) = Custom::new(1, 4);
        assert_eq!(input.push_samples(&[1.0; 10]), 4);
        assert_eq!(input.available(), 0);
    }
}
