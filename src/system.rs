//! The control-thread façade.

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;

use hashbrown::HashMap;
use rtrb::{Consumer, RingBuffer};
use tracing::{debug, error, info, warn};

use crate::command::{CommandSender, EngineCommand};
use crate::engine::{AudioEngine, EngineLinks};
use crate::error::{Error, Result};
use crate::event::AudioEvent;
use crate::fade::VolumeFadeJob;
use crate::graph::{NodeGraph, NodeInfoList, RetiredNode};
use crate::jobs::{Job, JobQueue, JobWorker, RepeatHandle, ThreadingMode};
use crate::midi::MidiInput;
use crate::mixing::LevelMeter;
use crate::node::{NodeId, NodeState, SoundNode, MAX_CHANNELS};
use crate::nodes::{
    AddNoise, Combine, Compressor, Custom, CustomInput, Delay, Equalizer, Filter, Generator,
    NodeKind, NodeParam, Panning, PitchShift, Player, Reverb, Volume, WaveType,
};
use crate::settings::{AudioSettings, Latency, MixType};
use crate::space::{
    InstanceId, InstanceShared, PlayOptions, SoundBuffer, SoundInstance, SoundSpace, SpaceId,
};

/// Name of the node every sound ultimately feeds.
pub const OUTPUT_NODE_NAME: &str = "AudioOutput";

/// Lowest sample rate the engine runs at; lower requests are raised to it.
pub const MIN_SAMPLE_RATE: u32 = 8000;

const CLIPPING_WARNING: &str = concat!(
    "Audio is too loud and is being clipped. ",
    "Reduce volume or number of sounds to avoid audio problems."
);

/// How to build a [`SoundSystem`].
#[derive(Clone, Debug)]
pub struct SystemConfig {
    /// Raised to [`MIN_SAMPLE_RATE`] if lower
    pub sample_rate: u32,
    /// Channels of the output device; resolves [`MixType::AutoDetect`]
    pub device_channels: usize,
    pub settings: AudioSettings,
    pub threading: ThreadingMode,
    /// Nodes the graph can hold before reallocating
    pub max_nodes: usize,
    /// Capacity of the audio → control event ring, and of the backlog
    /// kept for [`SoundSystem::take_events`]
    pub event_capacity: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            device_channels: 2,
            settings: AudioSettings::default(),
            threading: ThreadingMode::Threaded,
            max_nodes: 256,
            event_capacity: 1024,
        }
    }
}

/// Counts active non-editor spaces.
#[derive(Debug, Default)]
struct SpaceCounter(i64);

impl SpaceCounter {
    /// Returns `true` when this made the first space active.
    fn increment(&mut self) -> bool {
        self.0 += 1;
        self.0 == 1
    }

    /// Returns `true` when this released the last active space.
    fn decrement(&mut self) -> bool {
        self.0 -= 1;
        if self.0 < 0 {
            error!("sound space tracking has become negative");
            debug_assert!(self.0 >= 0, "sound space tracking has become negative");
            self.0 = 0;
            return false;
        }
        self.0 == 0
    }
}

/// A named group of sounds sharing a volume node.
///
/// The node only exists while at least one non-editor space is active.
#[derive(Debug)]
struct SoundTag {
    name: String,
    volume: f32,
    node: Option<NodeId>,
}

/// The control-thread entry point.
///
/// Creates nodes, manages sound spaces and instances, and configures the
/// engine. Every edit of live audio state is validated here and then
/// marshaled to the [`AudioEngine`] as an [`EngineCommand`].
pub struct SoundSystem {
    sample_rate: u32,
    device_channels: usize,

    commands: CommandSender,
    events: Consumer<AudioEvent>,
    retired: Consumer<RetiredNode<Box<SoundNode>>>,
    midi: Option<MidiInput>,
    meter: Arc<LevelMeter>,
    worker: JobWorker,
    engine: Option<AudioEngine>,

    /// Control-side copy of the graph topology, labelled with node kinds
    mirror: NodeGraph<&'static str>,
    next_node: u64,
    output: NodeId,

    muted: bool,
    mix_type: MixType,
    latency: Latency,
    min_volume_threshold: f32,
    mic_float: bool,
    mic_bytes: bool,

    spaces: HashMap<SpaceId, SoundSpace>,
    next_space: u64,
    space_counter: SpaceCounter,
    instances: HashMap<InstanceId, SoundInstance>,
    next_instance: u64,
    finished: Vec<SoundInstance>,
    tags: Vec<SoundTag>,
    preview: Option<(SpaceId, InstanceId)>,

    /// Oldest events are dropped once it holds `outbox_capacity`
    outbox: VecDeque<AudioEvent>,
    outbox_capacity: usize,
}

impl SoundSystem {
    /// Create the façade and the engine it controls.
    ///
    /// The caller decides who owns the engine, typically a device stream.
    pub fn new(config: SystemConfig) -> (SoundSystem, AudioEngine) {
        let settings = config.settings.clone().sanitized();
        let max_nodes = config.max_nodes.max(8);
        let event_capacity = config.event_capacity.max(16);
        let device_channels = config.device_channels.clamp(1, MAX_CHANNELS);
        let sample_rate = config.sample_rate.max(MIN_SAMPLE_RATE);
        if sample_rate != config.sample_rate {
            warn!(
                requested = config.sample_rate,
                sample_rate, "sample rate too low, raised"
            );
        }

        let queue = Arc::new(JobQueue::with_capacity(256));
        let (events_tx, events) = RingBuffer::new(event_capacity);
        let (retired_tx, retired) = RingBuffer::new(max_nodes);
        let (midi, midi_rx) = MidiInput::new(256);
        let meter = Arc::new(LevelMeter::new());

        let output = NodeId(0);
        let mut graph = NodeGraph::with_capacity(max_nodes);
        let mut mirror = NodeGraph::with_capacity(max_nodes);
        let layout = settings.mix_type.channel_count(device_channels);
        let master = SoundNode::new(NodeKind::Combine(Combine::new()), layout);
        // both graphs are empty, so neither insert can fail
        let _ = graph.add_node(output, OUTPUT_NODE_NAME, Box::new(master), Vec::new());
        let _ = mirror.add_node(output, OUTPUT_NODE_NAME, "combine", Vec::new());

        let engine = AudioEngine::new(
            sample_rate,
            device_channels,
            &settings,
            graph,
            output,
            EngineLinks {
                commands: queue.clone(),
                events: events_tx,
                retired: retired_tx,
                midi: midi_rx,
                meter: meter.clone(),
            },
        );

        info!(
            sample_rate,
            channels = device_channels,
            threading = ?config.threading,
            "sound system initialized"
        );

        let system = SoundSystem {
            sample_rate,
            device_channels,
            commands: CommandSender::new(queue, settings.system_volume),
            events,
            retired,
            midi: Some(midi),
            meter,
            worker: JobWorker::new(config.threading),
            engine: None,
            mirror,
            next_node: 1,
            output,
            muted: false,
            mix_type: settings.mix_type,
            latency: settings.latency,
            min_volume_threshold: settings.min_volume_threshold,
            mic_float: false,
            mic_bytes: false,
            spaces: HashMap::new(),
            next_space: 0,
            space_counter: SpaceCounter::default(),
            instances: HashMap::new(),
            next_instance: 0,
            finished: Vec::new(),
            tags: Vec::new(),
            preview: None,
            outbox: VecDeque::with_capacity(event_capacity),
            outbox_capacity: event_capacity,
        };
        (system, engine)
    }

    /// Create a system that keeps its engine, to be driven with [`render`](Self::render).
    ///
    /// Useful without an audio device: offline rendering, tests, headless hosts.
    pub fn with_engine(config: SystemConfig) -> SoundSystem {
        let (mut system, engine) = SoundSystem::new(config);
        system.engine = Some(engine);
        system
    }

    /// Render interleaved frames with the attached engine.
    pub fn render(&mut self, out: &mut [f32], channels: usize) -> Result<()> {
        let engine = self.engine.as_mut().ok_or(Error::EngineDetached)?;
        engine.render(out, channels);
        Ok(())
    }

    /// Feed captured input to the attached engine.
    pub fn process_input(&mut self, input: &[f32], channels: usize) -> Result<()> {
        let engine = self.engine.as_mut().ok_or(Error::EngineDetached)?;
        engine.process_input(input, channels);
        Ok(())
    }

    pub fn engine(&self) -> Option<&AudioEngine> {
        self.engine.as_ref()
    }

    /// Take back an engine, e.g. after its output device failed to open.
    ///
    /// The engine must be the one created alongside this system. An
    /// attached engine renders through [`render`](Self::render).
    pub fn attach_engine(&mut self, engine: AudioEngine) -> Result<()> {
        if !engine.is_driven_by(&self.commands) {
            return Err(Error::ForeignEngine);
        }
        if self.engine.replace(engine).is_some() {
            warn!("replacing an attached audio engine");
        }
        debug!("audio engine attached");
        Ok(())
    }

    /// Hand the engine to someone else, typically a device stream.
    pub fn detach_engine(&mut self) -> Option<AudioEngine> {
        self.engine.take()
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The node every sound ultimately feeds.
    #[inline]
    pub fn output_node(&self) -> NodeId {
        self.output
    }

    /// The MIDI producer handle. Can be taken once.
    pub fn take_midi_input(&mut self) -> Option<MidiInput> {
        self.midi.take()
    }

    /// A sender for engine commands, for jobs submitted to the worker.
    pub fn command_sender(&self) -> CommandSender {
        self.commands.clone()
    }

    pub fn submit_job(&self, job: impl Job + 'static) {
        self.worker.submit(job);
    }

    /// Once per frame: collect retired nodes and events, advance spaces, run inline jobs.
    ///
    /// `dt` is the frame time in seconds.
    pub fn update(&mut self, dt: f32) {
        while let Ok(retired) = self.retired.pop() {
            self.mirror.finalize(retired.id);
            debug!(node = retired.id.get(), name = %retired.name, "node freed");
        }

        let mut dropped = 0usize;
        while let Ok(event) = self.events.pop() {
            if let AudioEvent::Clipping { peak } = event {
                warn!(peak, "{CLIPPING_WARNING}");
            }
            dropped += self.queue_event(event);
        }
        if dropped > 0 {
            debug!(dropped, "event backlog full, oldest events dropped");
        }

        for space in self.spaces.values_mut() {
            space.update(dt, &mut self.instances, &mut self.finished);
        }
        for instance in mem::take(&mut self.finished) {
            if self.preview.is_some_and(|(_, id)| id == instance.id()) {
                self.preview = None;
            }
            self.release_node(instance.node());
        }

        self.worker.pump();
    }

    /// Events received since the last call, in arrival order.
    ///
    /// At most `event_capacity` events are kept between calls; older ones
    /// are dropped first.
    pub fn take_events(&mut self) -> Vec<AudioEvent> {
        self.outbox.drain(..).collect()
    }

    /// Returns how many events were dropped to make room.
    fn queue_event(&mut self, event: AudioEvent) -> usize {
        let mut dropped = 0;
        while self.outbox.len() >= self.outbox_capacity {
            self.outbox.pop_front();
            dropped += 1;
        }
        self.outbox.push_back(event);
        dropped
    }

    // ---- nodes ----

    /// Add a node of any kind, consuming `inputs` in order.
    pub fn add_node(
        &mut self,
        kind: NodeKind,
        channels: usize,
        name: impl Into<String>,
        inputs: &[NodeId],
    ) -> Result<NodeId> {
        let id = NodeId(self.next_node);
        let name = name.into();
        let label = kind.name();

        self.mirror
            .add_node(id, name.clone(), label, inputs.to_vec())?;
        self.next_node += 1;

        debug!(node = id.get(), kind = label, name = %name, "node created");
        self.commands.send(EngineCommand::AddNode {
            id,
            name,
            node: Box::new(SoundNode::new(kind, channels)),
            inputs: inputs.to_vec(),
        });
        Ok(id)
    }

    pub fn create_volume_node(&mut self, name: &str, volume: f32) -> Result<NodeId> {
        self.add_node(NodeKind::Volume(Volume::new(volume)), 2, name, &[])
    }

    pub fn create_panning_node(&mut self, name: &str, pan: f32) -> Result<NodeId> {
        self.add_node(NodeKind::Panning(Panning::new(pan)), 2, name, &[])
    }

    /// `pitch` is in octaves.
    pub fn create_pitch_node(&mut self, name: &str, pitch: f32) -> Result<NodeId> {
        let node = PitchShift::new(self.sample_rate, 2, pitch);
        self.add_node(NodeKind::Pitch(node), 2, name, &[])
    }

    pub fn create_low_pass_node(&mut self, name: &str, cutoff: f32) -> Result<NodeId> {
        self.add_node(NodeKind::Filter(Filter::low_pass(cutoff)), 2, name, &[])
    }

    pub fn create_high_pass_node(&mut self, name: &str, cutoff: f32) -> Result<NodeId> {
        self.add_node(NodeKind::Filter(Filter::high_pass(cutoff)), 2, name, &[])
    }

    pub fn create_band_pass_node(&mut self, name: &str, center: f32, q: f32) -> Result<NodeId> {
        self.add_node(NodeKind::Filter(Filter::band_pass(center, q)), 2, name, &[])
    }

    pub fn create_equalizer_node(&mut self, name: &str) -> Result<NodeId> {
        self.add_node(NodeKind::Equalizer(Equalizer::new()), 2, name, &[])
    }

    pub fn create_reverb_node(&mut self, name: &str) -> Result<NodeId> {
        let node = Reverb::new(self.sample_rate, 2);
        self.add_node(NodeKind::Reverb(node), 2, name, &[])
    }

    /// `time` is in seconds.
    pub fn create_delay_node(&mut self, name: &str, time: f32) -> Result<NodeId> {
        let node = Delay::new(self.sample_rate, 2, time);
        self.add_node(NodeKind::Delay(node), 2, name, &[])
    }

    pub fn create_compressor_node(&mut self, name: &str) -> Result<NodeId> {
        self.add_node(NodeKind::Compressor(Compressor::new()), 2, name, &[])
    }

    pub fn create_generated_wave_node(
        &mut self,
        name: &str,
        wave: WaveType,
        frequency: f32,
    ) -> Result<NodeId> {
        self.add_node(NodeKind::Generator(Generator::new(wave, frequency)), 1, name, &[])
    }

    pub fn create_add_noise_node(&mut self, name: &str, level: f32) -> Result<NodeId> {
        self.add_node(NodeKind::AddNoise(AddNoise::new(level)), 2, name, &[])
    }

    /// A node playing samples pushed through the returned [`CustomInput`].
    pub fn create_custom_node(
        &mut self,
        name: &str,
        channels: usize,
    ) -> Result<(NodeId, CustomInput)> {
        let channels = channels.clamp(1, MAX_CHANNELS);
        // a quarter second of buffering
        let (node, input) = Custom::new(channels, (self.sample_rate / 4) as usize);
        let id = self.add_node(NodeKind::Custom(node), channels, name, &[])?;
        Ok((id, input))
    }

    pub fn create_combine_node(&mut self, name: &str) -> Result<NodeId> {
        self.add_node(NodeKind::Combine(Combine::new()), 2, name, &[])
    }

    /// Create a node from its kind name, with default parameters.
    ///
    /// Known kinds: `volume`, `panning`, `pitch`, `low_pass`, `high_pass`,
    /// `band_pass`, `equalizer`, `reverb`, `delay`, `compressor`,
    /// `generator`, `add_noise`, `combine`. Custom and player nodes need
    /// handles and have their own constructors.
    pub fn create_node_by_name(&mut self, kind: &str, name: &str) -> Result<NodeId> {
        match kind {
            "volume" => self.create_volume_node(name, 1.0),
            "panning" => self.create_panning_node(name, 0.0),
            "pitch" => self.create_pitch_node(name, 0.0),
            "low_pass" => self.create_low_pass_node(name, 1000.0),
            "high_pass" => self.create_high_pass_node(name, 1000.0),
            "band_pass" => self.create_band_pass_node(name, 1000.0, 1.0),
            "equalizer" => self.create_equalizer_node(name),
            "reverb" => self.create_reverb_node(name),
            "delay" => self.create_delay_node(name, 0.25),
            "compressor" => self.create_compressor_node(name),
            "generator" => self.create_generated_wave_node(name, WaveType::Sine, 440.0),
            "add_noise" => self.create_add_noise_node(name, 0.1),
            "combine" => self.create_combine_node(name),
            other => Err(Error::UnknownNodeKind(other.to_string())),
        }
    }

    /// Append `from` to the inputs of `to`. Rejects edits that would form a cycle.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        self.mirror.connect(from, to)?;
        self.commands.send(EngineCommand::Connect { from, to });
        Ok(())
    }

    /// Remove one `from` → `to` connection. Returns whether one existed.
    pub fn disconnect(&mut self, from: NodeId, to: NodeId) -> Result<bool> {
        let removed = self.mirror.disconnect(from, to)?;
        if removed {
            self.commands.send(EngineCommand::Disconnect { from, to });
        }
        Ok(removed)
    }

    /// Request removal. The node goes silent at the next block and is freed
    /// once the engine has completed a full pass without it.
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        if id == self.output {
            warn!("removing the output node silences the engine");
        }
        self.mirror.remove_node(id)?;
        self.commands.send(EngineCommand::RemoveNode(id));
        debug!(node = id.get(), "node removal requested");
        Ok(())
    }

    pub fn set_node_param(&mut self, node: NodeId, param: NodeParam) -> Result<()> {
        self.require_active(node)?;
        self.commands.send(EngineCommand::SetParam { node, param });
        Ok(())
    }

    pub fn set_bypassed(&mut self, node: NodeId, bypassed: bool) -> Result<()> {
        self.require_active(node)?;
        self.commands.send(EngineCommand::SetBypassed { node, bypassed });
        Ok(())
    }

    pub fn node_state(&self, id: NodeId) -> NodeState {
        self.mirror.state(id)
    }

    /// (id, name, state, connections) of every node, as seen from the control thread.
    pub fn node_graph_info(&self) -> NodeInfoList<'_, &'static str> {
        self.mirror.node_info_list()
    }

    fn require_active(&self, node: NodeId) -> Result<()> {
        match self.mirror.state(node) {
            NodeState::Active => Ok(()),
            _ => Err(Error::UnknownNode(node)),
        }
    }

    fn release_node(&mut self, node: NodeId) {
        if self.mirror.state(node) == NodeState::Active {
            let _ = self.remove_node(node);
        }
    }

    // ---- engine settings ----

    /// Master volume, linear. Negative values clamp to 0.
    pub fn set_volume(&mut self, volume: f32) {
        self.commands.set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        self.commands.volume()
    }

    /// Fade the master volume to `target` over `seconds` on the job worker.
    pub fn fade_volume(&mut self, target: f32, seconds: f32) -> RepeatHandle {
        let job = VolumeFadeJob::new(self.commands.clone(), target, seconds);
        self.worker.spawn_repeating(job, false)
    }

    /// Silence everything without touching the volume.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.commands.send(EngineCommand::SetMuted(muted));
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn set_latency(&mut self, latency: Latency) {
        self.latency = latency;
        self.commands.send(EngineCommand::SetLatency(latency));
    }

    pub fn latency(&self) -> Latency {
        self.latency
    }

    pub fn set_mix_type(&mut self, mix_type: MixType) {
        self.mix_type = mix_type;
        self.commands.send(EngineCommand::SetMixType(mix_type));
    }

    pub fn mix_type(&self) -> MixType {
        self.mix_type
    }

    /// Select the layout by channel count; 0 follows the device, unsupported counts mean stereo.
    pub fn set_output_channels(&mut self, channels: usize) {
        let mix_type = match channels {
            0 => MixType::AutoDetect,
            n => MixType::from_channel_count(n),
        };
        self.set_mix_type(mix_type);
    }

    pub fn output_channels(&self) -> usize {
        self.mix_type.channel_count(self.device_channels)
    }

    pub fn set_min_volume_threshold(&mut self, threshold: f32) {
        self.min_volume_threshold = threshold.max(0.0);
        self.commands
            .send(EngineCommand::SetMinVolumeThreshold(self.min_volume_threshold));
    }

    pub fn min_volume_threshold(&self) -> f32 {
        self.min_volume_threshold
    }

    pub fn peak_output_level(&self) -> f32 {
        self.meter.peak()
    }

    pub fn rms_output_level(&self) -> f32 {
        self.meter.rms()
    }

    pub fn peak_input_level(&self) -> f32 {
        self.meter.input_peak()
    }

    pub fn set_dispatch_microphone_float(&mut self, enabled: bool) {
        self.mic_float = enabled;
        self.send_mic_dispatch();
    }

    pub fn dispatch_microphone_float(&self) -> bool {
        self.mic_float
    }

    pub fn set_dispatch_microphone_bytes(&mut self, enabled: bool) {
        self.mic_bytes = enabled;
        self.send_mic_dispatch();
    }

    pub fn dispatch_microphone_bytes(&self) -> bool {
        self.mic_bytes
    }

    fn send_mic_dispatch(&self) {
        self.commands.send(EngineCommand::SetMicDispatch {
            float: self.mic_float,
            bytes: self.mic_bytes,
        });
    }

    /// The current settings, as they would be saved.
    pub fn settings(&self) -> AudioSettings {
        AudioSettings {
            system_volume: self.volume(),
            mix_type: self.mix_type,
            min_volume_threshold: self.min_volume_threshold,
            latency: self.latency,
        }
    }

    pub fn apply_settings(&mut self, settings: &AudioSettings) {
        let settings = settings.clone().sanitized();
        self.set_volume(settings.system_volume);
        self.set_mix_type(settings.mix_type);
        self.set_min_volume_threshold(settings.min_volume_threshold);
        self.set_latency(settings.latency);
    }

    // ---- spaces, tags and instances ----

    /// Register a space. The first non-editor space brings every sound tag to life.
    pub fn add_sound_space(&mut self, is_editor: bool) -> SpaceId {
        let id = SpaceId(self.next_space);
        self.next_space += 1;
        self.spaces.insert(id, SoundSpace::new(id, is_editor));

        if !is_editor && self.space_counter.increment() {
            debug!("first sound space active, creating tags");
            for i in 0..self.tags.len() {
                self.create_tag_node(i);
            }
        }
        id
    }

    /// Drop a space and release its instances right away.
    ///
    /// Removing the last non-editor space releases every sound tag.
    pub fn remove_sound_space(&mut self, id: SpaceId) -> Result<()> {
        let space = self.spaces.remove(&id).ok_or(Error::UnknownSpace(id))?;

        for instance_id in space.instances() {
            if let Some(instance) = self.instances.remove(instance_id) {
                self.release_node(instance.node());
            }
        }
        if self.preview.is_some_and(|(s, _)| s == id) {
            self.preview = None;
        }

        if !space.is_editor() && self.space_counter.decrement() {
            debug!("last sound space gone, releasing tags");
            for i in 0..self.tags.len() {
                if let Some(node) = self.tags[i].node.take() {
                    self.release_node(node);
                }
            }
        }
        Ok(())
    }

    /// Number of active non-editor spaces.
    pub fn active_space_count(&self) -> usize {
        self.space_counter.0.max(0) as usize
    }

    pub fn space(&self, id: SpaceId) -> Option<&SoundSpace> {
        self.spaces.get(&id)
    }

    /// Register a sound tag. Its volume node exists while any non-editor space is active.
    pub fn add_sound_tag(&mut self, name: &str) {
        if self.tags.iter().any(|t| t.name == name) {
            return;
        }
        self.tags.push(SoundTag {
            name: name.to_string(),
            volume: 1.0,
            node: None,
        });
        if self.space_counter.0 > 0 {
            self.create_tag_node(self.tags.len() - 1);
        }
    }

    /// The live volume node of a tag.
    pub fn tag_node(&self, name: &str) -> Option<NodeId> {
        self.tags.iter().find(|t| t.name == name)?.node
    }

    pub fn set_tag_volume(&mut self, name: &str, volume: f32) {
        let Some(tag) = self.tags.iter_mut().find(|t| t.name == name) else {
            return;
        };
        tag.volume = volume.max(0.0);
        if let Some(node) = tag.node {
            let param = NodeParam::Volume(tag.volume);
            self.commands.send(EngineCommand::SetParam { node, param });
        }
    }

    fn create_tag_node(&mut self, index: usize) {
        let tag = &self.tags[index];
        let name = format!("Tag:{}", tag.name);
        let volume = tag.volume;
        let output = self.output;

        // tags carry the layout of the mix they feed
        let channels = self.output_channels();
        let created = self
            .add_node(NodeKind::Volume(Volume::new(volume)), channels, name, &[])
            .and_then(|node| self.connect(node, output).map(|_| node));
        match created {
            Ok(node) => {
                debug!(tag = %self.tags[index].name, node = node.get(), "tag created");
                self.tags[index].node = Some(node);
            }
            Err(e) => error!(tag = %self.tags[index].name, "failed to create tag node: {e}"),
        }
    }

    /// Start playing `buffer` in `space`.
    pub fn play(
        &mut self,
        space: SpaceId,
        buffer: Arc<SoundBuffer>,
        options: PlayOptions,
    ) -> Result<InstanceId> {
        if !self.spaces.contains_key(&space) {
            return Err(Error::UnknownSpace(space));
        }

        let shared = Arc::new(InstanceShared::new(0.0, options.paused, options.looping));
        let channels = buffer.channels();
        let player = Player::new(buffer, shared.clone());
        let node = self.add_node(NodeKind::Player(player), channels, "Player", &[])?;

        let destination = options
            .tag
            .as_deref()
            .and_then(|t| self.tag_node(t))
            .unwrap_or(self.output);
        self.connect(node, destination)?;

        let id = InstanceId(self.next_instance);
        self.next_instance += 1;
        let instance = SoundInstance::new(id, space, node, shared, &options);
        self.instances.insert(id, instance);
        if let Some(space) = self.spaces.get_mut(&space) {
            space.instances.push(id);
        }
        debug!(instance = id.0, node = node.get(), "sound instance played");
        self.queue_event(AudioEvent::SoundInstancePlayed { instance: id, space });
        Ok(id)
    }

    /// Stop an instance, fading out over `fade_out` seconds. Unknown ids are ignored.
    pub fn stop(&mut self, instance: InstanceId, fade_out: f32) {
        if let Some(i) = self.instances.get_mut(&instance) {
            i.stop(fade_out);
        }
    }

    pub fn pause(&mut self, instance: InstanceId) {
        self.set_paused(instance, true);
    }

    pub fn resume(&mut self, instance: InstanceId) {
        self.set_paused(instance, false);
    }

    fn set_paused(&mut self, instance: InstanceId, paused: bool) {
        if let Some(i) = self.instances.get(&instance) {
            i.shared.paused.store(paused, std::sync::atomic::Ordering::Relaxed);
        }
    }

    pub fn set_instance_volume(&mut self, instance: InstanceId, volume: f32) {
        if let Some(i) = self.instances.get_mut(&instance) {
            i.set_volume(volume);
        }
    }

    /// Whether the instance is still alive (playing, paused or fading out).
    pub fn is_playing(&self, instance: InstanceId) -> bool {
        self.instances.contains_key(&instance)
    }

    pub fn instance(&self, instance: InstanceId) -> Option<&SoundInstance> {
        self.instances.get(&instance)
    }

    /// Playback position in frames.
    pub fn instance_position(&self, instance: InstanceId) -> Option<u64> {
        Some(self.instances.get(&instance)?.shared.position())
    }

    /// Play `buffer` as the editor preview, replacing any previous preview.
    pub fn play_preview(&mut self, buffer: Arc<SoundBuffer>) -> Result<InstanceId> {
        self.stop_preview();
        let space = match self.spaces.values().find(|s| s.is_editor()) {
            Some(s) => s.id(),
            None => self.add_sound_space(true),
        };
        let id = self.play(space, buffer, PlayOptions::default())?;
        self.preview = Some((space, id));
        Ok(id)
    }

    pub fn stop_preview(&mut self) {
        if let Some((_, id)) = self.preview.take() {
            self.stop(id, 0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_reports_first_and_last() {
        let mut c = SpaceCounter::default();
        assert!(c.increment());
        assert!(!c.increment());
        assert!(!c.decrement());
        assert!(c.decrement());
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "negative"))]
    fn counter_underflow_is_a_defect() {
        let mut c = SpaceCounter::default();
        assert!(!c.decrement());
        assert_eq!(c.0, 0);
    }

    #[test]
    fn by_name_rejects_unknown_kinds() {
        let (mut system, _engine) = SoundSystem::new(SystemConfig {
            threading: ThreadingMode::SingleThreaded,
            ..SystemConfig::default()
        });
        let err = system.create_node_by_name("flanger", "f").unwrap_err();
        assert!(matches!(err, Error::UnknownNodeKind(k) if k == "flanger"));
        let id = system.create_node_by_name("reverb", "hall").unwrap();
        assert_eq!(system.node_state(id), NodeState::Active);
    }
}
