//! The real-time side: evaluates the node graph one block at a time and
//! turns the master mix into device-ready frames.

use std::mem;
use std::sync::Arc;

use dasp_graph::Buffer;
use rtrb::{Consumer, Producer};

use crate::command::{CommandSender, EngineCommand};
use crate::event::{AudioEvent, MicBlock, MicBytes, MIC_BLOCK_SAMPLES};
use crate::graph::{NodeGraph, RetiredNode};
use crate::jobs::JobQueue;
use crate::midi::MidiEvent;
use crate::mixing::{self, ClipDetector, LevelMeter};
use crate::node::{Inputs, NodeId, ProcessContext, SoundNode, BLOCK_FRAMES, MAX_CHANNELS};
use crate::settings::{AudioSettings, Latency, MixType};

/// Ring ends connecting an [`AudioEngine`] to its [`SoundSystem`](crate::SoundSystem).
pub(crate) struct EngineLinks {
    pub commands: Arc<JobQueue<EngineCommand>>,
    pub events: Producer<AudioEvent>,
    pub retired: Producer<RetiredNode<Box<SoundNode>>>,
    pub midi: Consumer<[u8; 3]>,
    pub meter: Arc<LevelMeter>,
}

/// The audio engine.
///
/// Owned by whoever drives the output device. Every call to
/// [`render`](Self::render) pulls as many 64-frame blocks as it needs; for each
/// block the engine:
///
/// 1. frees nodes whose removal has outlived a full pass,
/// 2. parses pending MIDI input,
/// 3. applies every queued [`EngineCommand`] (or none, if the queue lock is contended),
/// 4. evaluates the graph,
/// 5. applies master volume and mute, meters the result, reports and clamps clipping,
/// 6. remaps the master mix to the selected speaker layout and then to the device.
///
/// The output node always carries the selected layout, so multichannel
/// sounds reach their speakers without passing through stereo.
///
/// Nothing here blocks, allocates in steady state, or logs.
pub struct AudioEngine {
    graph: NodeGraph<Box<SoundNode>>,
    output: NodeId,

    commands: Arc<JobQueue<EngineCommand>>,
    batch: Vec<EngineCommand>,
    events: Producer<AudioEvent>,
    retired: Producer<RetiredNode<Box<SoundNode>>>,
    midi: Consumer<[u8; 3]>,
    meter: Arc<LevelMeter>,

    ctx: ProcessContext,
    volume: f32,
    muted: bool,
    mix_type: MixType,
    latency: Latency,
    device_channels: usize,
    clip: ClipDetector,
    mic_float: bool,
    mic_bytes: bool,

    master: Vec<Buffer>,
    layout: Vec<Buffer>,
    device: Vec<Buffer>,
    /// Last rendered block, interleaved with `block_channels` channels
    block: Vec<f32>,
    block_channels: usize,
    /// Frames of `block` already handed out
    cursor: usize,
}

impl AudioEngine {
    pub(crate) fn new(
        sample_rate: u32,
        device_channels: usize,
        settings: &AudioSettings,
        graph: NodeGraph<Box<SoundNode>>,
        output: NodeId,
        links: EngineLinks,
    ) -> Self {
        let settings = settings.clone().sanitized();
        let device_channels = device_channels.clamp(1, MAX_CHANNELS);
        let mut engine = Self {
            graph,
            output,
            commands: links.commands,
            batch: Vec::with_capacity(64),
            events: links.events,
            retired: links.retired,
            midi: links.midi,
            meter: links.meter,
            ctx: ProcessContext::new(sample_rate, settings.min_volume_threshold),
            volume: settings.system_volume,
            muted: false,
            mix_type: settings.mix_type,
            latency: settings.latency,
            device_channels,
            clip: ClipDetector::new(sample_rate as u64),
            mic_float: false,
            mic_bytes: false,
            master: vec![Buffer::default(); MAX_CHANNELS],
            layout: vec![Buffer::default(); MAX_CHANNELS],
            device: vec![Buffer::default(); MAX_CHANNELS],
            block: vec![0.0; BLOCK_FRAMES * MAX_CHANNELS],
            block_channels: device_channels,
            cursor: BLOCK_FRAMES,
        };
        engine.sync_output_layout();
        engine
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.ctx.sample_rate
    }

    #[inline]
    pub fn volume(&self) -> f32 {
        self.volume
    }

    #[inline]
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    #[inline]
    pub fn latency(&self) -> Latency {
        self.latency
    }

    #[inline]
    pub fn mix_type(&self) -> MixType {
        self.mix_type
    }

    #[inline]
    pub fn min_volume_threshold(&self) -> f32 {
        self.ctx.min_volume_threshold
    }

    /// Channel count of the selected speaker layout.
    pub fn output_channels(&self) -> usize {
        self.mix_type.channel_count(self.device_channels)
    }

    /// Channel count of the device buffers last rendered.
    #[inline]
    pub fn device_channels(&self) -> usize {
        self.device_channels
    }

    pub fn meter(&self) -> &Arc<LevelMeter> {
        &self.meter
    }

    /// Evaluation passes completed so far.
    pub fn passes(&self) -> u64 {
        self.graph.passes()
    }

    pub fn graph(&self) -> &NodeGraph<Box<SoundNode>> {
        &self.graph
    }

    /// Whether `sender` feeds this engine's command queue.
    pub(crate) fn is_driven_by(&self, sender: &CommandSender) -> bool {
        Arc::ptr_eq(&self.commands, sender.queue())
    }

    /// Fill an interleaved device buffer with `channels` channels.
    ///
    /// Works for any buffer length: the unread rest of the last block is
    /// carried over to the next call. A trailing partial frame is zeroed.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.clamp(1, MAX_CHANNELS);
        if channels != self.block_channels {
            // a layout change discards the carried frames
            self.block_channels = channels;
            self.cursor = BLOCK_FRAMES;
            self.device_channels = channels;
            self.sync_output_layout();
        }

        let frames = out.len() / channels;
        let mut written = 0;
        while written < frames {
            if self.cursor >= BLOCK_FRAMES {
                self.process_block();
                self.cursor = 0;
            }
            let n = (BLOCK_FRAMES - self.cursor).min(frames - written);
            let src = &self.block[self.cursor * channels..(self.cursor + n) * channels];
            out[written * channels..(written + n) * channels].copy_from_slice(src);
            written += n;
            self.cursor += n;
        }
        out[frames * channels..].iter_mut().for_each(|s| *s = 0.0);
    }

    /// Feed a block of captured input (interleaved, `channels` channels).
    ///
    /// Updates the input peak and forwards the data to the control thread
    /// when microphone dispatch is enabled.
    pub fn process_input(&mut self, input: &[f32], channels: usize) {
        let peak = input.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        self.meter.set_input_peak(peak);

        if self.mic_float {
            for chunk in input.chunks(MIC_BLOCK_SAMPLES) {
                let _ = self
                    .events
                    .push(AudioEvent::MicrophoneFloat(MicBlock::new(channels, chunk)));
            }
        }
        if self.mic_bytes {
            for chunk in input.chunks(MIC_BLOCK_SAMPLES) {
                let _ = self
                    .events
                    .push(AudioEvent::MicrophoneBytes(MicBytes::new(channels, chunk)));
            }
        }
    }

    /// Render one block into `self.block`.
    fn process_block(&mut self) {
        let room = self.retired.slots();
        let retired = &mut self.retired;
        self.graph.retire(room, |node| {
            let _ = retired.push(node);
        });

        while let Ok(message) = self.midi.pop() {
            if let Some(event) = MidiEvent::parse(message) {
                let _ = self.events.push(AudioEvent::Midi(event));
            }
        }

        self.apply_commands();

        let ctx = self.ctx;
        self.graph.for_each_in_order(|_, node, inputs| {
            node.process(&ctx, &Inputs::new(inputs));
        });

        let target = self.output_channels().clamp(1, MAX_CHANNELS);
        let mixed = match self.graph.get(self.output) {
            Some(out) => {
                for (master, buffer) in self.master.iter_mut().zip(out.outputs()) {
                    master.copy_from_slice(buffer);
                }
                out.channels()
            }
            None => {
                let silent = &mut self.master[..target];
                silent.iter_mut().for_each(|b| b.iter_mut().for_each(|s| *s = 0.0));
                target
            }
        };
        let master = &mut self.master[..mixed];

        let gain = if self.muted { 0.0 } else { self.volume };
        for buffer in master.iter_mut() {
            buffer.iter_mut().for_each(|s| *s *= gain);
        }

        let (peak, rms) = mixing::block_levels(master);
        self.meter.set_output(peak, rms);
        if self.clip.observe(peak, BLOCK_FRAMES) {
            let _ = self.events.push(AudioEvent::Clipping { peak });
        }
        mixing::clamp(master);

        let channels = self.block_channels;
        mixing::remap(&self.master[..mixed], &mut self.layout[..target]);
        mixing::remap(&self.layout[..target], &mut self.device[..channels]);

        for (ch, buffer) in self.device[..channels].iter().enumerate() {
            for (frame, &s) in buffer.iter().enumerate() {
                self.block[frame * channels + ch] = s;
            }
        }
    }

    /// Give the output node one channel per speaker of the selected layout.
    fn sync_output_layout(&mut self) {
        let target = self.output_channels();
        if let Some(out) = self.graph.get_mut(self.output) {
            out.set_channels(target);
        }
    }

    fn apply_commands(&mut self) {
        let mut batch = mem::take(&mut self.batch);
        if self.commands.try_take_all(&mut batch) {
            for command in batch.drain(..) {
                self.apply(command);
            }
        }
        self.batch = batch;
    }

    fn apply(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::SetVolume(v) => self.volume = v.max(0.0),
            EngineCommand::SetMuted(m) => self.muted = m,
            EngineCommand::SetLatency(latency) => {
                if latency != self.latency {
                    self.latency = latency;
                    let _ = self.events.push(AudioEvent::LatencyChanged(latency));
                }
            }
            EngineCommand::SetMixType(mix_type) => {
                self.mix_type = mix_type;
                self.sync_output_layout();
            }
            EngineCommand::SetMinVolumeThreshold(t) => self.ctx.min_volume_threshold = t.max(0.0),
            // the control thread validated these edits against its mirror
            EngineCommand::AddNode {
                id,
                name,
                node,
                inputs,
            } => {
                let _ = self.graph.add_node(id, name, node, inputs);
            }
            EngineCommand::RemoveNode(id) => {
                let _ = self.graph.remove_node(id);
            }
            EngineCommand::Connect { from, to } => {
                let _ = self.graph.connect(from, to);
            }
            EngineCommand::Disconnect { from, to } => {
                let _ = self.graph.disconnect(from, to);
            }
            EngineCommand::SetParam { node, param } => {
                if let Some(node) = self.graph.get_mut(node) {
                    node.apply(param);
                }
            }
            EngineCommand::SetBypassed { node, bypassed } => {
                if let Some(node) = self.graph.get_mut(node) {
                    node.set_bypassed(bypassed);
                }
            }
            EngineCommand::SetMicDispatch { float, bytes } => {
                self.mic_float = float;
                self.mic_bytes = bytes;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::ThreadingMode;
    use crate::nodes::WaveType;
    use crate::system::{SoundSystem, SystemConfig};

    fn engine_with_tone() -> (SoundSystem, AudioEngine) {
        let (mut system, engine) = SoundSystem::new(SystemConfig {
            threading: ThreadingMode::SingleThreaded,
            ..SystemConfig::default()
        });
        let tone = system
            .create_generated_wave_node("tone", WaveType::Saw, 300.0)
            .unwrap();
        let pan = system.create_panning_node("pan", 0.5).unwrap();
        system.connect(tone, pan).unwrap();
        system.connect(pan, system.output_node()).unwrap();
        (system, engine)
    }

    #[test]
    fn unusual_device_layouts_reuse_front_channels() {
        let (_system, mut engine) = engine_with_tone();
        let mut out = vec![0.0f32; 64 * 3];
        engine.render(&mut out, 3);

        assert_eq!(engine.device_channels(), 3);
        assert_eq!(engine.output_channels(), 2);
        assert!(out.chunks(3).any(|f| f[0] != f[1]));
        for frame in out.chunks(3) {
            assert_eq!(frame[2], frame[0]);
        }
    }

    #[test]
    fn trailing_partial_frame_is_zeroed() {
        let (_system, mut engine) = engine_with_tone();
        let mut out = [1.0f32; 7];
        engine.render(&mut out, 2);
        assert_eq!(out[6], 0.0);
    }

    #[test]
    fn blocks_are_rendered_on_demand() {
        let (_system, mut engine) = engine_with_tone();
        let mut out = vec![0.0f32; 65 * 2];
        engine.render(&mut out, 2);
        assert_eq!(engine.passes(), 2);

        // 63 frames are still buffered
        let mut out = vec![0.0f32; 63 * 2];
        engine.render(&mut out, 2);
        assert_eq!(engine.passes(), 2);
    }

    #[test]
    fn commands_apply_at_the_next_block() {
        let (system, mut engine) = engine_with_tone();
        let sender = system.command_sender();
        sender.set_volume(-1.0);
        sender.send(EngineCommand::SetLatency(Latency::High));
        assert_eq!(engine.volume(), 1.0);

        let mut out = vec![0.0f32; 128];
        engine.render(&mut out, 2);
        assert_eq!(engine.volume(), 0.0);
        assert_eq!(engine.latency(), Latency::High);
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
