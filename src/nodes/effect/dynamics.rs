//! Feed-forward compressor with linked channels.

use dasp_graph::Buffer;

use crate::convert::{decibels_to_volume, volume_to_decibels};
use crate::node::{Inputs, ProcessContext, BLOCK_FRAMES};
use crate::nodes::NodeParam;

#[derive(Clone, Debug)]
pub struct Compressor {
    threshold_db: f32,
    ratio: f32,
    attack: f32,
    release: f32,
    makeup_db: f32,
    envelope: f32,
}

impl Compressor {
    pub fn new() -> Self {
        Self {
            threshold_db: -12.0,
            ratio: 4.0,
            attack: 0.005,
            release: 0.1,
            makeup_db: 0.0,
            envelope: 0.0,
        }
    }

    #[inline]
    pub fn threshold(&self) -> f32 {
        self.threshold_db
    }

    #[inline]
    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    /// Gain reduction in dB for an envelope level in dB.
    fn reduction_db(&self, level_db: f32) -> f32 {
        let over = level_db - self.threshold_db;
        if over <= 0.0 {
            0.0
        } else {
            over * (1.0 - 1.0 / self.ratio)
        }
    }

    pub(crate) fn apply(&mut self, param: NodeParam) {
        match param {
            NodeParam::Threshold(t) => self.threshold_db = t.clamp(-100.0, 0.0),
            NodeParam::Ratio(r) => self.ratio = r.max(1.0),
            NodeParam::Attack(a) => self.attack = a.max(0.0),
            NodeParam::Release(r) => self.release = r.max(0.0),
            NodeParam::MakeupGain(g) => self.makeup_db = g.clamp(-24.0, 24.0),
            _ => {}
        }
    }

    pub(crate) fn process(
        &mut self,
        ctx: &ProcessContext,
        inputs: &Inputs<'_>,
        outputs: &mut [Buffer],
    ) {
        inputs.sum_into(outputs);

        let sr = ctx.sample_rate as f32;
        let coeff = |t: f32| if t <= 0.0 { 0.0 } else { (-1.0 / (t * sr)).exp() };
        let (attack, release) = (coeff(self.attack), coeff(self.release));
        let makeup = decibels_to_volume(self.makeup_db);

        for i in 0..BLOCK_FRAMES {
            let level = outputs.iter().fold(0.0f32, |m, b| m.max(b[i].abs()));
            let c = if level > self.envelope { attack } else { release };
            self.envelope = level + c * (self.envelope - level);

            let gain = decibels_to_volume(-self.reduction_db(volume_to_decibels(self.envelope)));
            for buffer in outputs.iter_mut() {
                buffer[i] *= gain * makeup;
            }
        }
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_threshold_is_untouched() {
        let c = Compressor::new();
        assert_eq!(c.reduction_db(-20.0), 0.0);
    }

    #[test]
    fn four_to_one_above_threshold() {
        let mut c = Compressor::new();
        c.apply(NodeParam::Threshold(-12.0));
        c.apply(NodeParam::Ratio(4.0));
        // 8 dB over with 4:1 leaves 2 dB, so 6 dB of reduction
        assert!((c.reduction_db(-4.0) - 6.0).abs() < 1e-5);
    }

    #[test]
    fn ratio_never_drops_below_one() {
        let mut c = Compressor::new();
        c.apply(NodeParam::Ratio(0.2));
        assert_eq!(c.ratio(), 1.0);
    }
}
