//! Freeverb-style reverb: parallel damped combs into series allpasses.

use dasp_graph::Buffer;

use crate::node::Inputs;
use crate::nodes::NodeParam;

// Freeverb tunings at 44.1 kHz, scaled to the engine rate.
const COMB_TUNING: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNING: [usize; 4] = [556, 441, 341, 225];
const STEREO_SPREAD: usize = 23;
const FIXED_GAIN: f32 = 0.015;

#[derive(Clone, Debug)]
struct Comb {
    buffer: Vec<f32>,
    index: usize,
    filterstore: f32,
}

impl Comb {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            index: 0,
            filterstore: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let output = self.buffer[self.index];
        self.filterstore = output * (1.0 - damp) + self.filterstore * damp;
        self.buffer[self.index] = input + self.filterstore * feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }
}

#[derive(Clone, Debug)]
struct Allpass {
    buffer: Vec<f32>,
    index: usize,
}

impl Allpass {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            index: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let buffered = self.buffer[self.index];
        self.buffer[self.index] = input + buffered * 0.5;
        self.index = (self.index + 1) % self.buffer.len();
        buffered - input
    }
}

#[derive(Clone, Debug)]
struct Tank {
    combs: Vec<Comb>,
    allpasses: Vec<Allpass>,
}

impl Tank {
    fn new(sample_rate: u32, spread: usize) -> Self {
        let scale = |n: usize| ((n + spread) as f32 * sample_rate as f32 / 44100.0) as usize;
        Self {
            combs: COMB_TUNING.iter().map(|&n| Comb::new(scale(n))).collect(),
            allpasses: ALLPASS_TUNING.iter().map(|&n| Allpass::new(scale(n))).collect(),
        }
    }
}

/// Room reverb. Odd channels use a slightly detuned tank for stereo width.
#[derive(Clone, Debug)]
pub struct Reverb {
    tanks: Vec<Tank>,
    room_size: f32,
    damping: f32,
    mix: f32,
}

impl Reverb {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        let tanks = (0..channels.max(1))
            .map(|ch| Tank::new(sample_rate, if ch % 2 == 1 { STEREO_SPREAD } else { 0 }))
            .collect();
        Self {
            tanks,
            room_size: 0.5,
            damping: 0.5,
            mix: 0.33,
        }
    }

    #[inline]
    pub fn room_size(&self) -> f32 {
        self.room_size
    }

    pub(crate) fn apply(&mut self, param: NodeParam) {
        match param {
            NodeParam::RoomSize(r) => self.room_size = r.clamp(0.0, 1.0),
            NodeParam::Damping(d) => self.damping = d.clamp(0.0, 1.0),
            NodeParam::Mix(m) => self.mix = m.clamp(0.0, 1.0),
            _ => {}
        }
    }

    pub(crate) fn process(&mut self, inputs: &Inputs<'_>, outputs: &mut [Buffer]) {
        inputs.sum_into(outputs);

        let feedback = self.room_size * 0.28 + 0.7;
        let damp = self.damping * 0.4;
        let mix = self.mix;

        for (buffer, tank) in outputs.iter_mut().zip(self.tanks.iter_mut()) {
            for sample in buffer.iter_mut() {
                let input = *sample * FIXED_GAIN;
                let mut wet = 0.0;
                for comb in tank.combs.iter_mut() {
                    wet += comb.process(input, feedback, damp);
                }
                for allpass in tank.allpasses.iter_mut() {
                    wet = allpass.process(wet);
                }
                *sample = *sample * (1.0 - mix) + wet * mix;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fully_dry_silence_stays_silent() {
        let mut reverb = Reverb::new(44100, 1);
        reverb.apply(NodeParam::Mix(0.0));
        let mut out = vec![Buffer::default(); 1];
        reverb.process(&Inputs::none(), &mut out);
        assert!(out[0].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn comb_output_is_bounded() {
        let mut comb = Comb::new(8);
        let mut peak: f32 = 0.0;
        for i in 0..10_000 {
            let x = if i == 0 { 1.0 } else { 0.0 };
            peak = peak.max(comb.process(x, 0.98, 0.2).abs());
        }
        assert!(peak <= 1.0);
    }
}
