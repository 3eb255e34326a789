//! Control-thread edits marshaled to the audio thread.

use std::sync::Arc;

use crate::jobs::JobQueue;
use crate::mixing::AtomicF32;
use crate::node::{NodeId, SoundNode};
use crate::nodes::NodeParam;
use crate::settings::{Latency, MixType};

/// One immutable edit of live audio state.
///
/// Commands are applied in submission order at the start of a block, all
/// of a batch before the block is evaluated.
pub enum EngineCommand {
    SetVolume(f32),
    SetMuted(bool),
    SetLatency(Latency),
    SetMixType(MixType),
    SetMinVolumeThreshold(f32),
    AddNode {
        id: NodeId,
        name: String,
        node: Box<SoundNode>,
        inputs: Vec<NodeId>,
    },
    RemoveNode(NodeId),
    Connect { from: NodeId, to: NodeId },
    Disconnect { from: NodeId, to: NodeId },
    SetParam { node: NodeId, param: NodeParam },
    SetBypassed { node: NodeId, bypassed: bool },
    SetMicDispatch { float: bool, bytes: bool },
}

/// Cloneable sender for [`EngineCommand`]s.
///
/// Also carries the control-side copy of the master volume, so jobs can read
/// the value they last asked for without a round trip through the audio thread.
#[derive(Clone)]
pub struct CommandSender {
    queue: Arc<JobQueue<EngineCommand>>,
    volume: Arc<AtomicF32>,
}

impl CommandSender {
    pub(crate) fn new(queue: Arc<JobQueue<EngineCommand>>, volume: f32) -> Self {
        Self {
            queue,
            volume: Arc::new(AtomicF32::new(volume)),
        }
    }

    pub(crate) fn queue(&self) -> &Arc<JobQueue<EngineCommand>> {
        &self.queue
    }

    pub fn send(&self, command: EngineCommand) {
        self.queue.push(command);
    }

    /// Master volume as last requested, clamped to ≥ 0.
    pub fn volume(&self) -> f32 {
        self.volume.load()
    }

    pub fn set_volume(&self, volume: f32) {
        let volume = volume.max(0.0);
        self.volume.store(volume);
        self.send(EngineCommand::SetVolume(volume));
    }
}
