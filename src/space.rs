//! Sound spaces and the instances playing in them.
//!
//! Everything here lives on the control thread. The only state shared with
//! the audio thread is [`InstanceShared`], a handful of atomics read and
//! written by the instance's player node.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;

use crate::mixing::AtomicF32;
use crate::node::NodeId;

/// Identifies a [`SoundSpace`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SpaceId(pub(crate) u64);

/// Identifies a playing sound instance.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct InstanceId(pub(crate) u64);

/// Pre-decoded audio, shared between every instance playing it.
///
/// Samples are interleaved (L, R, L, R, ... for stereo).
#[derive(Clone, Debug)]
pub struct SoundBuffer {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
}

impl SoundBuffer {
    pub fn new(samples: Vec<f32>, channels: usize, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let mut samples = samples;
        // drop a trailing partial frame
        samples.truncate(samples.len() - samples.len() % channels);
        Self {
            samples,
            channels,
            sample_rate,
        }
    }

    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Length in frames.
    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate.max(1) as f64
    }
}

/// State shared between a [`SoundInstance`] and its player node.
#[derive(Debug)]
pub struct InstanceShared {
    /// Playback cursor in frames. Written by the audio thread.
    pub(crate) position: AtomicU64,
    /// Set by the audio thread when a non-looping sound runs out.
    pub(crate) finished: AtomicBool,
    /// Effective gain (volume × fade). Written by the control thread.
    pub(crate) gain: AtomicF32,
    pub(crate) paused: AtomicBool,
    pub(crate) looping: AtomicBool,
}

impl InstanceShared {
    pub(crate) fn new(gain: f32, paused: bool, looping: bool) -> Self {
        Self {
            position: AtomicU64::new(0),
            finished: AtomicBool::new(false),
            gain: AtomicF32::new(gain),
            paused: AtomicBool::new(paused),
            looping: AtomicBool::new(looping),
        }
    }

    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }

    pub fn gain(&self) -> f32 {
        self.gain.load()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::Relaxed)
    }
}

/// How to start a sound.
#[derive(Clone, Debug)]
pub struct PlayOptions {
    /// Instance volume, clamped to ≥ 0
    pub volume: f32,
    pub looping: bool,
    /// Start paused; resume with [`SoundSystem::resume`](crate::SoundSystem::resume)
    pub paused: bool,
    /// Fade in over this many seconds (0 starts at full volume)
    pub fade_in: f32,
    /// Route through this sound tag's volume node when the tag is live
    pub tag: Option<String>,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            volume: 1.0,
            looping: false,
            paused: false,
            fade_in: 0.0,
            tag: None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Fade {
    from: f32,
    to: f32,
    duration: f32,
    elapsed: f32,
}

impl Fade {
    fn level(&self) -> f32 {
        if self.duration <= 0.0 {
            return self.to;
        }
        let t = (self.elapsed / self.duration).min(1.0);
        self.from + (self.to - self.from) * t
    }

    fn is_done(&self) -> bool {
        self.elapsed >= self.duration
    }
}

/// One playing sound.
///
/// Owns its player node for its whole lifetime; the node is removed from the
/// graph when the instance finishes or is stopped.
#[derive(Debug)]
pub struct SoundInstance {
    pub(crate) id: InstanceId,
    pub(crate) space: SpaceId,
    pub(crate) node: NodeId,
    pub(crate) shared: Arc<InstanceShared>,
    volume: f32,
    fade_level: f32,
    fade: Option<Fade>,
    stopping: bool,
}

impl SoundInstance {
    pub(crate) fn new(
        id: InstanceId,
        space: SpaceId,
        node: NodeId,
        shared: Arc<InstanceShared>,
        options: &PlayOptions,
    ) -> Self {
        let mut instance = Self {
            id,
            space,
            node,
            shared,
            volume: options.volume.max(0.0),
            fade_level: 1.0,
            fade: None,
            stopping: false,
        };
        if options.fade_in > 0.0 {
            instance.start_fade(0.0, 1.0, options.fade_in);
        }
        instance.publish_gain();
        instance
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn space(&self) -> SpaceId {
        self.space
    }

    /// The player node driving this instance.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    pub(crate) fn set_volume(&mut self, volume: f32) {
        self.volume = volume.max(0.0);
        self.publish_gain();
    }

    /// Stop, fading out over `fade_out` seconds first.
    pub(crate) fn stop(&mut self, fade_out: f32) {
        if self.stopping {
            return;
        }
        self.stopping = true;
        let from = self.fade_level;
        self.start_fade(from, 0.0, fade_out.max(0.0));
        self.publish_gain();
    }

    fn start_fade(&mut self, from: f32, to: f32, duration: f32) {
        let fade = Fade {
            from,
            to,
            duration,
            elapsed: 0.0,
        };
        self.fade_level = fade.level();
        self.fade = Some(fade);
    }

    fn publish_gain(&self) {
        self.shared.gain.store(self.volume * self.fade_level);
    }

    /// Advance fade timers by `dt` seconds. Returns `true` once the instance is done.
    pub(crate) fn update(&mut self, dt: f32) -> bool {
        if let Some(fade) = self.fade.as_mut() {
            fade.elapsed += dt;
            self.fade_level = fade.level();
            if fade.is_done() {
                self.fade = None;
            }
            self.publish_gain();
        }

        self.shared.is_finished() || (self.stopping && self.fade.is_none())
    }
}

/// A per-scene set of playing instances.
///
/// Holds only ids; the instances themselves are owned by the
/// [`SoundSystem`](crate::SoundSystem).
#[derive(Debug)]
pub struct SoundSpace {
    pub(crate) id: SpaceId,
    pub(crate) is_editor: bool,
    pub(crate) instances: Vec<InstanceId>,
}

impl SoundSpace {
    pub(crate) fn new(id: SpaceId, is_editor: bool) -> Self {
        Self {
            id,
            is_editor,
            instances: Vec::new(),
        }
    }

    pub fn id(&self) -> SpaceId {
        self.id
    }

    pub fn is_editor(&self) -> bool {
        self.is_editor
    }

    pub fn instances(&self) -> &[InstanceId] {
        &self.instances
    }

    /// Advance every instance by `dt` seconds and prune the finished ones.
    ///
    /// Pruned instances are moved out of `all` and appended to `finished`.
    /// Ids whose instance no longer exists are dropped.
    pub(crate) fn update(
        &mut self,
        dt: f32,
        all: &mut HashMap<InstanceId, SoundInstance>,
        finished: &mut Vec<SoundInstance>,
    ) {
        self.instances.retain(|id| {
            let Some(instance) = all.get_mut(id) else {
                return false;
            };
            if instance.update(dt) {
                if let Some(instance) = all.remove(id) {
                    finished.push(instance);
                }
                return false;
            }
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(options: &PlayOptions) -> SoundInstance {
        let shared = Arc::new(InstanceShared::new(0.0, false, false));
        SoundInstance::new(InstanceId(1), SpaceId(1), NodeId(5), shared, options)
    }

    #[test]
    fn sound_buffer_drops_partial_frame() {
        let buffer = SoundBuffer::new(vec![0.0; 5], 2, 48000);
        assert_eq!(buffer.frames(), 2);
        assert_eq!(buffer.samples().len(), 4);
    }

    #[test]
    fn fade_in_ramps_gain() {
        let mut i = instance(&PlayOptions {
            volume: 0.5,
            fade_in: 1.0,
            ..PlayOptions::default()
        });
        assert_eq!(i.shared.gain(), 0.0);
        assert!(!i.update(0.5));
        assert!((i.shared.gain() - 0.25).abs() < 1e-6);
        assert!(!i.update(0.5));
        assert_eq!(i.shared.gain(), 0.5);
    }

    #[test]
    fn stop_fades_out_then_finishes() {
        let mut i = instance(&PlayOptions::default());
        i.stop(0.2);
        assert!(!i.update(0.1));
        assert!(i.update(0.1));
        assert_eq!(i.shared.gain(), 0.0);
    }

    #[test]
    fn space_prunes_finished_and_missing() {
        let mut all = HashMap::new();
        let a = instance(&PlayOptions::default());
        a.shared.finished.store(true, Ordering::Relaxed);
        all.insert(InstanceId(1), a);

        let mut space = SoundSpace::new(SpaceId(1), false);
        space.instances = vec![InstanceId(1), InstanceId(2)];

        let mut finished = Vec::new();
        space.update(0.016, &mut all, &mut finished);
        assert!(space.instances().is_empty());
        assert_eq!(finished.len(), 1);
        assert!(all.is_empty());
    }
}
