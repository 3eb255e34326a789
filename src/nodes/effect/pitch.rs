//! Pitch shifter: two crossfaded read taps sweeping through a short delay line.

use core::f32::consts::PI;

use dasp_graph::Buffer;

use crate::node::Inputs;
use crate::nodes::NodeParam;

/// Window length of the shifter in seconds.
const WINDOW_SECS: f32 = 0.05;

#[derive(Clone, Debug)]
pub struct PitchShift {
    lines: Vec<Vec<f32>>,
    write: usize,
    /// Distance of the first tap behind the write head, in samples
    offset: f32,
    /// Pitch offset in octaves
    pitch: f32,
}

impl PitchShift {
    pub fn new(sample_rate: u32, channels: usize, pitch: f32) -> Self {
        let len = ((WINDOW_SECS * sample_rate as f32) as usize).max(4);
        Self {
            lines: vec![vec![0.0; len]; channels.max(1)],
            write: 0,
            offset: 0.0,
            pitch,
        }
    }

    #[inline]
    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    /// Playback rate of the taps: 2^pitch.
    #[inline]
    pub fn ratio(&self) -> f32 {
        self.pitch.exp2()
    }

    pub(crate) fn apply(&mut self, param: NodeParam) {
        if let NodeParam::Pitch(p) = param {
            self.pitch = p.clamp(-4.0, 4.0);
        }
    }

    pub(crate) fn process(&mut self, inputs: &Inputs<'_>, outputs: &mut [Buffer]) {
        inputs.sum_into(outputs);
        if self.pitch == 0.0 {
            return;
        }

        let len = self.lines[0].len();
        let window = len as f32;
        let step = 1.0 - self.ratio();

        let mut write = self.write;
        let mut offset = self.offset;
        for (buffer, line) in outputs.iter_mut().zip(self.lines.iter_mut()) {
            write = self.write;
            offset = self.offset;
            for sample in buffer.iter_mut() {
                line[write] = *sample;

                let a = offset;
                let b = (offset + window * 0.5) % window;
                let tap = |d: f32| {
                    let pos = (write as f32 - d + window) % window;
                    let i = pos as usize % len;
                    let frac = pos - pos.floor();
                    line[i] * (1.0 - frac) + line[(i + 1) % len] * frac
                };
                // sine windows of the two taps sum to constant power
                let out = tap(a) * (PI * a / window).sin() + tap(b) * (PI * b / window).sin();
                *sample = out;

                offset = (offset + step).rem_euclid(window);
                write = (write + 1) % len;
            }
        }
        self.write = write;
        self.offset = offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn octave_up_doubles_the_rate() {
        let shifter = PitchShift::new(48000, 1, 1.0);
        assert_eq!(shifter.ratio(), 2.0);
    }

    #[test]
    fn zero_pitch_passes_through() {
        let mut shifter = PitchShift::new(48000, 2, 0.0);
        let mut out = vec![Buffer::default(); 2];
        shifter.process(&Inputs::none(), &mut out);
        assert!(out.iter().all(|b| b.iter().all(|&s| s == 0.0)));
    }
}
