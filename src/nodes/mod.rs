//! Built-in audio nodes
//!
//! Nodes are organized into two categories:
//! - `source`: Generate audio (no audio inputs) - oscillators, sample players, custom feeds
//! - `effect`: Process audio (inputs → outputs) - volume, filters, delays, reverb
//!
//! Every kind is a variant of the closed [`NodeKind`] enum; dispatch is a plain `match`.

pub mod effect;
pub mod source;

use dasp_graph::Buffer;

use crate::node::{Inputs, ProcessContext};

pub use effect::{
    AddNoise, Combine, Compressor, Delay, Equalizer, Filter, FilterType, Panning, PitchShift,
    Reverb, Volume, EQ_BANDS,
};
pub use source::{Custom, CustomInput, Generator, Player, WaveType};

/// A parameter change, applied between blocks.
///
/// Each kind reacts to the parameters that make sense for it and ignores the rest.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NodeParam {
    /// Linear gain (volume, player gain)
    Volume(f32),
    /// Stereo position, -1.0 (left) to 1.0 (right)
    Pan(f32),
    /// Pitch offset in octaves
    Pitch(f32),
    /// Filter cutoff or center frequency in Hz
    Cutoff(f32),
    /// Filter Q
    Resonance(f32),
    /// Equalizer band gain in dB
    EqBand { band: usize, gain_db: f32 },
    /// Delay time in seconds
    DelayTime(f32),
    /// Delay feedback, 0.0 to 0.95
    Feedback(f32),
    /// Wet/dry balance, 0.0 (dry) to 1.0 (wet)
    Mix(f32),
    /// Reverb room size, 0.0 to 1.0
    RoomSize(f32),
    /// Reverb damping, 0.0 to 1.0
    Damping(f32),
    /// Compressor threshold in dB
    Threshold(f32),
    /// Compressor ratio (≥ 1)
    Ratio(f32),
    /// Compressor attack in seconds
    Attack(f32),
    /// Compressor release in seconds
    Release(f32),
    /// Compressor makeup gain in dB
    MakeupGain(f32),
    /// Oscillator frequency in Hz
    Frequency(f32),
    /// Oscillator amplitude, 0.0 to 1.0
    Amplitude(f32),
    /// Oscillator waveform
    Wave(WaveType),
    /// Added noise level, 0.0 to 1.0
    NoiseLevel(f32),
}

/// The processor state of a [`SoundNode`](crate::SoundNode).
pub enum NodeKind {
    Combine(Combine),
    Volume(Volume),
    Panning(Panning),
    Pitch(PitchShift),
    Filter(Filter),
    Equalizer(Equalizer),
    Reverb(Reverb),
    Delay(Delay),
    Compressor(Compressor),
    AddNoise(AddNoise),
    Generator(Generator),
    Custom(Custom),
    Player(Player),
}

impl NodeKind {
    /// The name used by
    /// [`SoundSystem::create_node_by_name`](crate::SoundSystem::create_node_by_name).
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Combine(_) => "combine",
            NodeKind::Volume(_) => "volume",
            NodeKind::Panning(_) => "panning",
            NodeKind::Pitch(_) => "pitch",
            NodeKind::Filter(f) => match f.filter_type() {
                FilterType::LowPass => "low_pass",
                FilterType::HighPass => "high_pass",
                FilterType::BandPass => "band_pass",
            },
            NodeKind::Equalizer(_) => "equalizer",
            NodeKind::Reverb(_) => "reverb",
            NodeKind::Delay(_) => "delay",
            NodeKind::Compressor(_) => "compressor",
            NodeKind::AddNoise(_) => "add_noise",
            NodeKind::Generator(_) => "generator",
            NodeKind::Custom(_) => "custom",
            NodeKind::Player(_) => "player",
        }
    }

    pub(crate) fn process(
        &mut self,
        ctx: &ProcessContext,
        inputs: &Inputs<'_>,
        outputs: &mut [Buffer],
    ) {
        match self {
            NodeKind::Combine(n) => n.process(inputs, outputs),
            NodeKind::Volume(n) => n.process(inputs, outputs),
            NodeKind::Panning(n) => n.process(inputs, outputs),
            NodeKind::Pitch(n) => n.process(inputs, outputs),
            NodeKind::Filter(n) => n.process(ctx, inputs, outputs),
            NodeKind::Equalizer(n) => n.process(ctx, inputs, outputs),
            NodeKind::Reverb(n) => n.process(inputs, outputs),
            NodeKind::Delay(n) => n.process(ctx, inputs, outputs),
            NodeKind::Compressor(n) => n.process(ctx, inputs, outputs),
            NodeKind::AddNoise(n) => n.process(inputs, outputs),
            NodeKind::Generator(n) => n.process(ctx, outputs),
            NodeKind::Custom(n) => n.process(outputs),
            NodeKind::Player(n) => n.process(ctx, outputs),
        }
    }

    pub(crate) fn apply(&mut self, param: NodeParam) {
        match self {
            NodeKind::Combine(_) | NodeKind::Custom(_) => {}
            NodeKind::Volume(n) => n.apply(param),
            NodeKind::Panning(n) => n.apply(param),
            NodeKind::Pitch(n) => n.apply(param),
            NodeKind::Filter(n) => n.apply(param),
            NodeKind::Equalizer(n) => n.apply(param),
            NodeKind::Reverb(n) => n.apply(param),
            NodeKind::Delay(n) => n.apply(param),
            NodeKind::Compressor(n) => n.apply(param),
            NodeKind::AddNoise(n) => n.apply(param),
            NodeKind::Generator(n) => n.apply(param),
            NodeKind::Player(n) => n.apply(param),
        }
    }
}

/// Zero every sample of every buffer.
#[inline]
pub(crate) fn clear(outputs: &mut [Buffer]) {
    for buffer in outputs.iter_mut() {
        buffer.iter_mut().for_each(|s| *s = 0.0);
    }
}

/// Small xorshift generator shared by the noise sources. Never allocates.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Noise(u32);

impl Noise {
    pub(crate) fn new(seed: u32) -> Self {
        Self(seed.max(1))
    }

    /// Next sample in `[-1, 1)`.
    #[inline]
    pub(crate) fn next_sample(&mut self) -> f32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        (x as f32 / u32::MAX as f32) * 2.0 - 1.0
    }
}
