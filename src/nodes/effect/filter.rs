//! Biquad filters and a fixed-band equalizer
//!
//! Coefficients follow the RBJ Audio EQ Cookbook. They are recomputed lazily
//! on the audio thread after a parameter change, since the sample rate is only
//! known there.

use core::f32::consts::PI;

use dasp_graph::Buffer;

use crate::node::{Inputs, ProcessContext, MAX_CHANNELS};
use crate::nodes::NodeParam;

/// Direct Form I biquad section.
#[derive(Clone, Copy, Debug)]
struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Biquad {
    const PASSTHROUGH: Biquad = Biquad {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
        x1: 0.0,
        x2: 0.0,
        y1: 0.0,
        y2: 0.0,
    };

    /// Set normalized coefficients, keeping the filter history.
    fn set(&mut self, (b0, b1, b2, a0, a1, a2): (f32, f32, f32, f32, f32, f32)) {
        let a0_inv = 1.0 / a0;
        self.b0 = b0 * a0_inv;
        self.b1 = b1 * a0_inv;
        self.b2 = b2 * a0_inv;
        self.a1 = a1 * a0_inv;
        self.a2 = a2 * a0_inv;
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let output = self.b0 * input + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }
}

type Coefficients = (f32, f32, f32, f32, f32, f32);

fn omega(frequency: f32, sample_rate: f32) -> (f32, f32) {
    // keep the center below nyquist so the filter stays stable
    let frequency = frequency.clamp(10.0, (sample_rate * 0.49).max(10.0));
    let omega = 2.0 * PI * frequency / sample_rate;
    (omega.cos(), omega.sin())
}

fn lowpass(frequency: f32, q: f32, sample_rate: f32) -> Coefficients {
    let (cos, sin) = omega(frequency, sample_rate);
    let alpha = sin / (2.0 * q);
    (
        (1.0 - cos) / 2.0,
        1.0 - cos,
        (1.0 - cos) / 2.0,
        1.0 + alpha,
        -2.0 * cos,
        1.0 - alpha,
    )
}

fn highpass(frequency: f32, q: f32, sample_rate: f32) -> Coefficients {
    let (cos, sin) = omega(frequency, sample_rate);
    let alpha = sin / (2.0 * q);
    (
        (1.0 + cos) / 2.0,
        -(1.0 + cos),
        (1.0 + cos) / 2.0,
        1.0 + alpha,
        -2.0 * cos,
        1.0 - alpha,
    )
}

fn bandpass(frequency: f32, q: f32, sample_rate: f32) -> Coefficients {
    let (cos, sin) = omega(frequency, sample_rate);
    let alpha = sin / (2.0 * q);
    (alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cos, 1.0 - alpha)
}

fn peaking(frequency: f32, q: f32, gain_db: f32, sample_rate: f32) -> Coefficients {
    let a = 10.0f32.powf(gain_db / 40.0);
    let (cos, sin) = omega(frequency, sample_rate);
    let alpha = sin / (2.0 * q);
    (
        1.0 + alpha * a,
        -2.0 * cos,
        1.0 - alpha * a,
        1.0 + alpha / a,
        -2.0 * cos,
        1.0 - alpha / a,
    )
}

/// Response of a [`Filter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterType {
    LowPass,
    HighPass,
    BandPass,
}

/// Single biquad filter: low-pass, high-pass or band-pass.
#[derive(Clone, Debug)]
pub struct Filter {
    filter_type: FilterType,
    cutoff: f32,
    q: f32,
    dirty: bool,
    sections: [Biquad; MAX_CHANNELS],
}

impl Filter {
    pub fn new(filter_type: FilterType, cutoff: f32, q: f32) -> Self {
        Self {
            filter_type,
            cutoff,
            q: q.max(0.05),
            dirty: true,
            sections: [Biquad::PASSTHROUGH; MAX_CHANNELS],
        }
    }

    pub fn low_pass(cutoff: f32) -> Self {
        Self::new(FilterType::LowPass, cutoff, core::f32::consts::FRAC_1_SQRT_2)
    }

    pub fn high_pass(cutoff: f32) -> Self {
        Self::new(FilterType::HighPass, cutoff, core::f32::consts::FRAC_1_SQRT_2)
    }

    pub fn band_pass(center: f32, q: f32) -> Self {
        Self::new(FilterType::BandPass, center, q)
    }

    #[inline]
    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    #[inline]
    pub fn cutoff(&self) -> f32 {
        self.cutoff
    }

    pub(crate) fn apply(&mut self, param: NodeParam) {
        match param {
            NodeParam::Cutoff(f) => self.cutoff = f.max(0.0),
            NodeParam::Resonance(q) => self.q = q.max(0.05),
            _ => return,
        }
        self.dirty = true;
    }

    pub(crate) fn process(
        &mut self,
        ctx: &ProcessContext,
        inputs: &Inputs<'_>,
        outputs: &mut [Buffer],
    ) {
        if self.dirty {
            let sr = ctx.sample_rate as f32;
            let coefficients = match self.filter_type {
                FilterType::LowPass => lowpass(self.cutoff, self.q, sr),
                FilterType::HighPass => highpass(self.cutoff, self.q, sr),
                FilterType::BandPass => bandpass(self.cutoff, self.q, sr),
            };
            self.sections.iter_mut().for_each(|s| s.set(coefficients));
            self.dirty = false;
        }

        inputs.sum_into(outputs);
        for (buffer, section) in outputs.iter_mut().zip(self.sections.iter_mut()) {
            for sample in buffer.iter_mut() {
                *sample = section.process(*sample);
            }
        }
    }
}

/// Number of bands in an [`Equalizer`].
pub const EQ_BANDS: usize = 5;

/// Center frequencies of the equalizer bands, in Hz.
const EQ_CENTERS: [f32; EQ_BANDS] = [100.0, 300.0, 1000.0, 3000.0, 10000.0];
const EQ_Q: f32 = 1.0;

/// Five-band peaking equalizer. Every band starts flat (0 dB).
#[derive(Clone, Debug)]
pub struct Equalizer {
    gains_db: [f32; EQ_BANDS],
    dirty: bool,
    sections: [[Biquad; EQ_BANDS]; MAX_CHANNELS],
}

impl Equalizer {
    pub fn new() -> Self {
        Self {
            gains_db: [0.0; EQ_BANDS],
            dirty: true,
            sections: [[Biquad::PASSTHROUGH; EQ_BANDS]; MAX_CHANNELS],
        }
    }

    /// Gain of `band` in dB, or `None` if out of range.
    pub fn band_gain(&self, band: usize) -> Option<f32> {
        self.gains_db.get(band).copied()
    }

    pub(crate) fn apply(&mut self, param: NodeParam) {
        if let NodeParam::EqBand { band, gain_db } = param {
            if let Some(g) = self.gains_db.get_mut(band) {
                *g = gain_db.clamp(-24.0, 24.0);
                self.dirty = true;
            }
        }
    }

    pub(crate) fn process(
        &mut self,
        ctx: &ProcessContext,
        inputs: &Inputs<'_>,
        outputs: &mut [Buffer],
    ) {
        if self.dirty {
            let sr = ctx.sample_rate as f32;
            for channel in self.sections.iter_mut() {
                for (band, section) in channel.iter_mut().enumerate() {
                    section.set(peaking(EQ_CENTERS[band], EQ_Q, self.gains_db[band], sr));
                }
            }
            self.dirty = false;
        }

        inputs.sum_into(outputs);
        for (buffer, channel) in outputs.iter_mut().zip(self.sections.iter_mut()) {
            for sample in buffer.iter_mut() {
                let mut x = *sample;
                for section in channel.iter_mut() {
                    x = section.process(x);
                }
                *sample = x;
            }
        }
    }
}

impl Default for Equalizer {
    fn default() -> Self {
        Self::new()
    }
}
