use dasp_graph::Buffer;

use crate::node::Inputs;
use crate::nodes::{Noise, NodeParam};

/// Adds white noise on top of its inputs.
#[derive(Clone, Debug)]
pub struct AddNoise {
    level: f32,
    noise: Noise,
}

impl AddNoise {
    pub fn new(level: f32) -> Self {
        Self {
            level: level.clamp(0.0, 1.0),
            noise: Noise::new(0x9E37_79B9),
        }
    }

    #[inline]
    pub fn level(&self) -> f32 {
        self.level
    }

    pub(crate) fn apply(&mut self, param: NodeParam) {
        if let NodeParam::NoiseLevel(l) = param {
            self.level = l.clamp(0.0, 1.0);
        }
    }

    pub(crate) fn process(&mut self, inputs: &Inputs<'_>, outputs: &mut [Buffer]) {
        inputs.sum_into(outputs);
        let level = self.level;
        for buffer in outputs.iter_mut() {
            for sample in buffer.iter_mut() {
                *sample += self.noise.next_sample() * level;
            }
        }
    }
}
