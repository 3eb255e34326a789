//! Feedback delay

use dasp_graph::Buffer;

use crate::node::{Inputs, ProcessContext};
use crate::nodes::NodeParam;

/// Longest delay a [`Delay`] can be set to, in seconds.
pub const MAX_DELAY_SECS: f32 = 2.0;

/// Feedback delay line with a wet/dry mix.
///
/// The line for every channel is allocated up front for [`MAX_DELAY_SECS`],
/// so changing the delay time never allocates.
#[derive(Clone, Debug)]
pub struct Delay {
    lines: Vec<Vec<f32>>,
    write: usize,
    time: f32,
    feedback: f32,
    mix: f32,
}

impl Delay {
    pub fn new(sample_rate: u32, channels: usize, time: f32) -> Self {
        let len = ((MAX_DELAY_SECS * sample_rate as f32) as usize + 1).max(2);
        Self {
            lines: vec![vec![0.0; len]; channels.max(1)],
            write: 0,
            time: time.clamp(0.0, MAX_DELAY_SECS),
            feedback: 0.35,
            mix: 0.5,
        }
    }

    #[inline]
    pub fn time(&self) -> f32 {
        self.time
    }

    pub(crate) fn apply(&mut self, param: NodeParam) {
        match param {
            NodeParam::DelayTime(t) => self.time = t.clamp(0.0, MAX_DELAY_SECS),
            NodeParam::Feedback(f) => self.feedback = f.clamp(0.0, 0.95),
            NodeParam::Mix(m) => self.mix = m.clamp(0.0, 1.0),
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

        let len = self.lines[0].len();
        let delay = ((self.time * ctx.sample_rate as f32) as usize).clamp(1, len - 1);
        let (feedback, mix) = (self.feedback, self.mix);

        let mut write = self.write;
        for (buffer, line) in outputs.iter_mut().zip(self.lines.iter_mut()) {
            write = self.write;
            for sample in buffer.iter_mut() {
                let read = (write + len - delay) % len;
                let delayed = line[read];
                line[write] = *sample + delayed * feedback;
                *sample = *sample * (1.0 - mix) + delayed * mix;
                write = (write + 1) % len;
            }
        }
        self.write = write;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::BLOCK_FRAMES;

    #[test]
    fn impulse_comes_back_after_delay_time() {
        let ctx = ProcessContext::new(1000, 0.0);
        // 10 ms at 1 kHz is 10 samples
        let mut delay = Delay::new(1000, 1, 0.01);
        delay.apply(NodeParam::Mix(1.0));
        delay.apply(NodeParam::Feedback(0.0));

        // prime the line by hand; no inputs means the block is summed to silence
        delay.lines[0][0] = 1.0;
        delay.write = 10;

        let mut out = vec![Buffer::default(); 1];
        delay.process(&ctx, &Inputs::none(), &mut out);
        assert_eq!(out[0][0], 1.0);
        assert!(out[0][1..BLOCK_FRAMES].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn zero_sample_rate_does_not_panic() {
        let ctx = ProcessContext::new(0, 0.0);
        let mut delay = Delay::new(0, 2, 0.5);
        let mut out = vec![Buffer::default(); 2];
        delay.process(&ctx, &Inputs::none(), &mut out);
        assert!(out[0].iter().all(|s| s.is_finite()));
    }
}
