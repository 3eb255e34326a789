//! Source nodes - generate audio without inputs

mod custom;
mod generator;
mod player;

pub use custom::{Custom, CustomInput};
pub use generator::{Generator, WaveType};
pub use player::Player;
