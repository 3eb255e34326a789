//! Effect nodes - process audio from inputs to outputs
//!
//! Effects sum their inputs first (see [`Inputs::sum_into`](crate::node::Inputs::sum_into))
//! and then work in place on their own output buffers.

mod combine;
mod delay;
mod dynamics;
mod filter;
mod noise;
mod pitch;
mod reverb;
mod volume;

pub use combine::Combine;
pub use delay::Delay;
pub use dynamics::Compressor;
pub use filter::{Equalizer, Filter, FilterType, EQ_BANDS};
pub use noise::AddNoise;
pub use pitch::PitchShift;
pub use reverb::Reverb;
pub use volume::{Panning, Volume};
