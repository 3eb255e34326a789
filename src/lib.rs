//! Klangraum - a real-time audio node graph with a job-marshaling control thread
//!
//! Design principles:
//! - The audio thread owns the graph; the control thread edits it only through queued commands
//! - Evaluation is a stable topological order, recomputed only when the topology changes
//! - Removed nodes are freed after a full pass, back on the control thread
//! - Nothing on the audio path blocks, logs, or returns errors
//!
//! ```
//! use klangraum::{SoundSystem, SystemConfig, ThreadingMode, WaveType};
//!
//! let mut system = SoundSystem::with_engine(SystemConfig {
//!     threading: ThreadingMode::SingleThreaded,
//!     ..SystemConfig::default()
//! });
//! let tone = system.create_generated_wave_node("tone", WaveType::Sine, 440.0).unwrap();
//! system.connect(tone, system.output_node()).unwrap();
//!
//! let mut out = vec![0.0f32; 512];
//! system.render(&mut out, 2).unwrap();
//! system.update(1.0 / 60.0);
//! ```

mod command;
mod convert;
mod engine;
mod error;
mod event;
mod fade;
mod graph;
mod jobs;
mod midi;
mod mixing;
mod node;
mod settings;
mod space;
mod system;

#[cfg(feature = "cpal_sink")]
mod device;

pub mod nodes;

pub use command::{CommandSender, EngineCommand};
pub use convert::{decibels_to_volume, pitch_to_semitones, semitones_to_pitch, volume_to_decibels};
pub use engine::AudioEngine;
pub use error::{Error, Result};
pub use event::{AudioEvent, MicBlock, MicBytes, MIC_BLOCK_SAMPLES};
pub use fade::VolumeFadeJob;
pub use graph::{NodeGraph, NodeInfo, NodeInfoList, NodeInputs, RetiredNode};
pub use jobs::{
    Job, JobContext, JobQueue, JobStatus, JobWorker, Repeat, RepeatHandle, RepeatingJob, Step,
    ThreadingMode, REPEAT_INTERVAL,
};
pub use midi::{MidiEvent, MidiInput};
pub use mixing::{remap, remap_add, AtomicF32, ClipDetector, LevelMeter};
pub use node::{Inputs, NodeId, NodeState, ProcessContext, SoundNode, BLOCK_FRAMES, MAX_CHANNELS};
pub use nodes::{NodeKind, NodeParam, WaveType};
pub use settings::{AudioSettings, Latency, MixType};
pub use space::{
    InstanceId, InstanceShared, PlayOptions, SoundBuffer, SoundInstance, SoundSpace, SpaceId,
};
pub use system::{SoundSystem, SystemConfig, MIN_SAMPLE_RATE, OUTPUT_NODE_NAME};

#[cfg(feature = "cpal_sink")]
pub use device::{CpalDevice, OpenError, OutputStream};
