//! Waveform oscillator

use dasp_graph::Buffer;
use serde::{Deserialize, Serialize};

use crate::node::ProcessContext;
use crate::nodes::{Noise, NodeParam};

/// Shape of a [`Generator`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaveType {
    #[default]
    Sine,
    Square,
    Saw,
    Triangle,
    Noise,
}

/// A generated-wave oscillator. Every output channel carries the same signal.
#[derive(Clone, Debug)]
pub struct Generator {
    wave: WaveType,
    frequency: f32,
    phase: f32,
    amplitude: f32,
    noise: Noise,
}

impl Generator {
    pub fn new(wave: WaveType, frequency: f32) -> Self {
        Self {
            wave,
            frequency: frequency.max(0.0),
            phase: 0.0,
            amplitude: 0.25, // -12dB, safe default
            noise: Noise::new(0x2545_F491),
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    #[inline]
    pub fn wave(&self) -> WaveType {
        self.wave
    }

    #[inline]
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    #[inline]
    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    pub(crate) fn apply(&mut self, param: NodeParam) {
        match param {
            NodeParam::Frequency(f) => self.frequency = f.max(0.0),
            NodeParam::Amplitude(a) => self.amplitude = a.clamp(0.0, 1.0),
            NodeParam::Wave(w) => self.wave = w,
            _ => {}
        }
    }

    #[inline]
    fn sample(&mut self) -> f32 {
        let p = self.phase;
        match self.wave {
            WaveType::Sine => (p * core::f32::consts::TAU).sin(),
            WaveType::Square => {
                if p < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            WaveType::Saw => 2.0 * p - 1.0,
            WaveType::Triangle => 1.0 - 4.0 * (p - 0.5).abs(),
            WaveType::Noise => self.noise.next_sample(),
        }
    }

    pub(crate) fn process(&mut self, ctx: &ProcessContext, outputs: &mut [Buffer]) {
        let Some((first, rest)) = outputs.split_first_mut() else {
            return;
        };

        let phase_inc = self.frequency / ctx.sample_rate as f32;
        let amplitude = self.amplitude;

        for out in first.iter_mut() {
            *out = self.sample() * amplitude;

            self.phase += phase_inc;
            self.phase -= self.phase.floor();
        }

        for buffer in rest.iter_mut() {
            buffer.copy_from_slice(first);
        }
    }
}
