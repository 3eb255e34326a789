//! Core node types: ids, lifetime states, the per-block context, and [`SoundNode`].

use dasp_graph::Buffer;

use crate::graph::NodeInputs;
use crate::mixing;
use crate::nodes::{NodeKind, NodeParam};

/// Number of frames in one processing block (the `dasp_graph` buffer length).
pub const BLOCK_FRAMES: usize = 64;

/// Upper bound on the channels a node (or the master mix) can carry. 7.1 needs eight.
pub const MAX_CHANNELS: usize = 8;

/// Information available during audio processing.
///
/// Passed to every [`SoundNode::process`] call.
#[derive(Clone, Copy, Debug)]
pub struct ProcessContext {
    /// Sample rate of the engine in Hz (e.g., 44100, 48000)
    pub sample_rate: u32,
    /// Number of frames per block (always [`BLOCK_FRAMES`])
    pub block_frames: usize,
    /// Players quieter than this are virtualized: their cursor advances but they output silence.
    pub min_volume_threshold: f32,
}

impl ProcessContext {
    pub(crate) fn new(sample_rate: u32, min_volume_threshold: f32) -> Self {
        Self {
            sample_rate,
            block_frames: BLOCK_FRAMES,
            min_volume_threshold,
        }
    }
}

/// Unique identifier for a node.
///
/// Ids are handed out in increasing order, so they double as the insertion
/// order used to break ties in the evaluation order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    /// The raw id value.
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Lifetime of a node as seen by a [`NodeGraph`](crate::NodeGraph).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeState {
    /// Created but never inserted into the graph.
    Uninitialized,
    /// In the graph and evaluated every block.
    Active,
    /// Marked for removal. Produces no output and is skipped, but its buffers stay valid.
    PendingRemoval,
    /// Retired after a full evaluation pass; no longer in the graph.
    Removed,
}

/// A single signal-processing unit.
///
/// Owns its output buffers (one [`Buffer`] per channel) and a [`NodeKind`]
/// holding the processor state. A bypassed node passes the sum of its inputs
/// straight through.
pub struct SoundNode {
    kind: NodeKind,
    outputs: Vec<Buffer>,
    bypassed: bool,
}

impl SoundNode {
    /// Create a node with `channels` output channels (clamped to `1..=MAX_CHANNELS`).
    pub fn new(kind: NodeKind, channels: usize) -> Self {
        let channels = channels.clamp(1, MAX_CHANNELS);
        let mut outputs = Vec::with_capacity(MAX_CHANNELS);
        outputs.resize(channels, Buffer::default());
        Self {
            kind,
            outputs,
            bypassed: false,
        }
    }

    /// Change the number of output channels. Never reallocates.
    pub(crate) fn set_channels(&mut self, channels: usize) {
        let channels = channels.clamp(1, MAX_CHANNELS);
        self.outputs.resize(channels, Buffer::default());
    }

    /// Number of output channels.
    #[inline]
    pub fn channels(&self) -> usize {
        self.outputs.len()
    }

    /// Output buffers written by the last [`process`](Self::process) call.
    #[inline]
    pub fn outputs(&self) -> &[Buffer] {
        &self.outputs
    }

    #[inline]
    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    pub fn set_bypassed(&mut self, bypassed: bool) {
        self.bypassed = bypassed;
    }

    #[inline]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Apply a parameter change. Parameters that do not apply to this kind are ignored.
    pub fn apply(&mut self, param: NodeParam) {
        self.kind.apply(param);
    }

    /// Process one block.
    ///
    /// Reads the already-computed outputs of `inputs` and overwrites this
    /// node's own output buffers.
    pub fn process(&mut self, ctx: &ProcessContext, inputs: &Inputs<'_>) {
        if self.bypassed {
            inputs.sum_into(&mut self.outputs);
            return;
        }
        self.kind.process(ctx, inputs, &mut self.outputs);
    }
}

/// The input side of a node during processing.
///
/// Yields the output buffers of every active input, in connection order.
/// Inputs that are pending removal are skipped.
pub struct Inputs<'a> {
    inner: Option<NodeInputs<'a, Box<SoundNode>>>,
}

impl<'a> Inputs<'a> {
    pub(crate) fn new(inner: NodeInputs<'a, Box<SoundNode>>) -> Self {
        Self { inner: Some(inner) }
    }

    /// No inputs at all. Sources are processed with this in tests and benches.
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// Iterate the channel buffers of each connected input.
    pub fn iter(&self) -> impl Iterator<Item = &'a [Buffer]> + '_ {
        self.inner
            .iter()
            .flat_map(|inputs| inputs.iter())
            .map(|node| node.outputs())
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Sum every input into `out`.
    ///
    /// Each input is converted to the layout of `out` first, following the
    /// rules of [`remap_add`](crate::remap_add): mono spreads to every
    /// channel, wider inputs fold down speaker by speaker.
    pub fn sum_into(&self, out: &mut [Buffer]) {
        for buf in out.iter_mut() {
            buf.iter_mut().for_each(|s| *s = 0.0);
        }
        for input in self.iter() {
            mixing::remap_add(input, out);
        }
    }
}
