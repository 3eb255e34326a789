//! Volume and panning

use dasp_graph::Buffer;

use crate::node::Inputs;
use crate::nodes::NodeParam;

/// A volume control that passes audio through with amplitude scaling.
///
/// Gain changes are smoothed to prevent clicks. Negative gains clamp to 0.
#[derive(Clone, Debug)]
pub struct Volume {
    gain: f32,
    /// Smoothing to prevent clicks on rapid gain changes
    smoothed_gain: f32,
    /// Smoothing coefficient (0.0 = instant, 1.0 = no change)
    smooth_coeff: f32,
}

impl Volume {
    pub fn new(gain: f32) -> Self {
        let gain = gain.max(0.0);
        Self {
            gain,
            smoothed_gain: gain,
            smooth_coeff: 0.995, // ~4ms at 48kHz
        }
    }

    /// Disable smoothing for instant gain changes
    pub fn without_smoothing(mut self) -> Self {
        self.smooth_coeff = 0.0;
        self
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub(crate) fn apply(&mut self, param: NodeParam) {
        if let NodeParam::Volume(g) = param {
            self.gain = g.max(0.0);
        }
    }

    pub(crate) fn process(&mut self, inputs: &Inputs<'_>, outputs: &mut [Buffer]) {
        inputs.sum_into(outputs);

        let smooth_coeff = self.smooth_coeff;
        let target_gain = self.gain;
        let mut current_gain = self.smoothed_gain;

        for (ch, buffer) in outputs.iter_mut().enumerate() {
            // every channel follows the same ramp
            let mut gain = self.smoothed_gain;
            for sample in buffer.iter_mut() {
                gain = target_gain + smooth_coeff * (gain - target_gain);
                *sample *= gain;
            }
            if ch == 0 {
                current_gain = gain;
            }
        }

        self.smoothed_gain = current_gain;
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Stereo panner with a unity-at-center law.
///
/// The channel on the side being panned towards stays at unity; the other
/// falls off with the square root of the distance. Only the first two
/// channels are affected.
#[derive(Clone, Debug, Default)]
pub struct Panning {
    pan: f32,
}

impl Panning {
    pub fn new(pan: f32) -> Self {
        Self {
            pan: pan.clamp(-1.0, 1.0),
        }
    }

    #[inline]
    pub fn pan(&self) -> f32 {
        self.pan
    }

    /// (left, right) gains for the current position.
    pub fn gains(&self) -> (f32, f32) {
        let pos = (self.pan + 1.0) * 0.5;
        if pos <= 0.5 {
            (1.0, (pos * 2.0).sqrt())
        } else {
            (((1.0 - pos) * 2.0).sqrt(), 1.0)
        }
    }

    pub(crate) fn apply(&mut self, param: NodeParam) {
        if let NodeParam::Pan(p) = param {
            self.pan = p.clamp(-1.0, 1.0);
        }
    }

    pub(crate) fn process(&mut self, inputs: &Inputs<'_>, outputs: &mut [Buffer]) {
        inputs.sum_into(outputs);
        if outputs.len() < 2 {
            return;
        }

        let (left, right) = self.gains();
        outputs[0].iter_mut().for_each(|s| *s *= left);
        outputs[1].iter_mut().for_each(|s| *s *= right);
    }
}
