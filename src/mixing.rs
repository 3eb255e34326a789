//! Master-bus helpers: level metering, clip detection and channel remapping.

use std::sync::atomic::{AtomicU32, Ordering};

use dasp_graph::Buffer;

/// An `f32` stored as its bit pattern in an [`AtomicU32`].
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Latest-block level snapshot, written by the audio thread and read anywhere.
#[derive(Debug, Default)]
pub struct LevelMeter {
    peak: AtomicF32,
    rms: AtomicF32,
    input_peak: AtomicF32,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peak absolute sample of the last output block, after volume and before clamping.
    pub fn peak(&self) -> f32 {
        self.peak.load()
    }

    /// RMS of the last output block, after volume and before clamping.
    pub fn rms(&self) -> f32 {
        self.rms.load()
    }

    /// Peak absolute sample of the last captured input block.
    pub fn input_peak(&self) -> f32 {
        self.input_peak.load()
    }

    pub(crate) fn set_output(&self, peak: f32, rms: f32) {
        self.peak.store(peak);
        self.rms.store(rms);
    }

    pub(crate) fn set_input_peak(&self, peak: f32) {
        self.input_peak.store(peak);
    }
}

/// Peak (max |x|) and RMS (sqrt(mean(x²))) over every sample of `buffers`.
pub fn block_levels(buffers: &[Buffer]) -> (f32, f32) {
    let mut peak = 0.0f32;
    let mut sum_sq = 0.0f32;
    let mut count = 0usize;
    for buffer in buffers {
        for &s in buffer.iter() {
            peak = peak.max(s.abs());
            sum_sq += s * s;
        }
        count += buffer.len();
    }
    if count == 0 {
        return (0.0, 0.0);
    }
    (peak, (sum_sq / count as f32).sqrt())
}

/// Rate-limits clipping reports to one per window of rendered audio.
///
/// The first clip is always reported.
#[derive(Clone, Debug)]
pub struct ClipDetector {
    window: u64,
    frames_since_report: u64,
}

impl ClipDetector {
    /// `window` is measured in frames; the engine uses one second.
    pub fn new(window: u64) -> Self {
        Self {
            window,
            frames_since_report: window,
        }
    }

    /// Record a block of `frames` whose peak was `peak`.
    ///
    /// Returns `true` if this block should raise a clipping event.
    pub fn observe(&mut self, peak: f32, frames: usize) -> bool {
        self.frames_since_report = self.frames_since_report.saturating_add(frames as u64);
        if peak > 1.0 && self.frames_since_report >= self.window {
            self.frames_since_report = 0;
            return true;
        }
        false
    }
}

/// Hard-clamp every sample to `[-1, 1]`.
pub fn clamp(buffers: &mut [Buffer]) {
    for buffer in buffers.iter_mut() {
        buffer.iter_mut().for_each(|s| *s = s.clamp(-1.0, 1.0));
    }
}

/// Copy `src` into `dst`, converting between speaker layouts.
///
/// See [`remap_add`] for the conversion rules.
pub fn remap(src: &[Buffer], dst: &mut [Buffer]) {
    for buffer in dst.iter_mut() {
        buffer.iter_mut().for_each(|s| *s = 0.0);
    }
    remap_add(src, dst);
}

/// Mix `src` into `dst`, converting between speaker layouts.
///
/// Layouts follow the usual channel order: L R for stereo, FL FR RL RR for
/// quad, L R C LFE SL SR for 5.1 and L R C LFE RL RR SL SR for 7.1.
///
/// - equal counts add channel for channel
/// - a mono target averages every source channel
/// - a mono source feeds every target channel except the LFE
/// - stereo sources fill surrounds from the front pair, with the centre as their average
/// - other known layouts route speaker by speaker: a missing centre splits
///   over the front pair, a missing LFE is dropped, and surrounds fall back
///   to the other surround pair and then to the front
/// - anything else maps target channel `c` to source channel `c % src.len()`
pub fn remap_add(src: &[Buffer], dst: &mut [Buffer]) {
    if src.is_empty() || dst.is_empty() {
        return;
    }

    if src.len() == dst.len() {
        for (d, s) in dst.iter_mut().zip(src.iter()) {
            add_scaled(d, s, 1.0);
        }
        return;
    }

    if dst.len() == 1 {
        let scale = 1.0 / src.len() as f32;
        for s in src {
            add_scaled(&mut dst[0], s, scale);
        }
        return;
    }

    let lfe = if dst.len() >= 6 { Some(3) } else { None };

    if src.len() == 1 {
        for (c, d) in dst.iter_mut().enumerate() {
            if Some(c) != lfe {
                add_scaled(d, &src[0], 1.0);
            }
        }
        return;
    }

    if src.len() == 2 {
        for (c, d) in dst.iter_mut().enumerate() {
            if Some(c) == lfe {
                continue;
            }
            if c == 2 && lfe.is_some() {
                add_scaled(d, &src[0], 0.5);
                add_scaled(d, &src[1], 0.5);
            } else {
                add_scaled(d, &src[c % 2], 1.0);
            }
        }
        return;
    }

    if let (Some(from), Some(to)) = (speakers(src.len()), speakers(dst.len())) {
        for (buffer, &speaker) in src.iter().zip(from) {
            speaker.route(to, |c, gain| add_scaled(&mut dst[c], buffer, gain));
        }
        return;
    }

    for (c, d) in dst.iter_mut().enumerate() {
        add_scaled(d, &src[c % src.len()], 1.0);
    }
}

#[inline]
fn add_scaled(dst: &mut Buffer, src: &Buffer, gain: f32) {
    for (o, i) in dst.iter_mut().zip(src.iter()) {
        *o += *i * gain;
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Speaker {
    FrontLeft,
    FrontRight,
    Centre,
    Lfe,
    RearLeft,
    RearRight,
    SideLeft,
    SideRight,
}

const STEREO: &[Speaker] = &[Speaker::FrontLeft, Speaker::FrontRight];
const QUAD: &[Speaker] = &[
    Speaker::FrontLeft,
    Speaker::FrontRight,
    Speaker::RearLeft,
    Speaker::RearRight,
];
const FIVE_ONE: &[Speaker] = &[
    Speaker::FrontLeft,
    Speaker::FrontRight,
    Speaker::Centre,
    Speaker::Lfe,
    Speaker::SideLeft,
    Speaker::SideRight,
];
const SEVEN_ONE: &[Speaker] = &[
    Speaker::FrontLeft,
    Speaker::FrontRight,
    Speaker::Centre,
    Speaker::Lfe,
    Speaker::RearLeft,
    Speaker::RearRight,
    Speaker::SideLeft,
    Speaker::SideRight,
];

fn speakers(channels: usize) -> Option<&'static [Speaker]> {
    match channels {
        2 => Some(STEREO),
        4 => Some(QUAD),
        6 => Some(FIVE_ONE),
        8 => Some(SEVEN_ONE),
        _ => None,
    }
}

impl Speaker {
    /// Call `add(channel, gain)` for every channel of `layout` this speaker lands on.
    fn route(self, layout: &[Speaker], mut add: impl FnMut(usize, f32)) {
        use Speaker::*;
        let find = |s: Speaker| layout.iter().position(|&l| l == s);
        // every known layout starts with the front pair
        let (left, right) = (0, 1);

        match self {
            FrontLeft => add(left, 1.0),
            FrontRight => add(right, 1.0),
            Centre => match find(Centre) {
                Some(c) => add(c, 1.0),
                None => {
                    add(left, 0.5);
                    add(right, 0.5);
                }
            },
            Lfe => {
                if let Some(c) = find(Lfe) {
                    add(c, 1.0);
                }
            }
            RearLeft | SideLeft => {
                let other = if self == RearLeft { SideLeft } else { RearLeft };
                add(find(self).or_else(|| find(other)).unwrap_or(left), 1.0);
            }
            RearRight | SideRight => {
                let other = if self == RearRight { SideRight } else { RearRight };
                add(find(self).or_else(|| find(other)).unwrap_or(right), 1.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(values: &[f32]) -> Vec<Buffer> {
        values
            .iter()
            .map(|&v| {
                let mut b = Buffer::default();
                b.iter_mut().for_each(|s| *s = v);
                b
            })
            .collect()
    }

    fn firsts(buffers: &[Buffer]) -> Vec<f32> {
        buffers.iter().map(|b| b[0]).collect()
    }

    #[test]
    fn levels_of_constant_block() {
        let (peak, rms) = block_levels(&filled(&[0.5, -0.5]));
        assert_eq!(peak, 0.5);
        assert!((rms - 0.5).abs() < 1e-6);
        assert_eq!(block_levels(&[]), (0.0, 0.0));
    }

    #[test]
    fn clip_reports_once_per_window() {
        let mut clip = ClipDetector::new(48000);
        assert!(clip.observe(1.5, 64));
        assert!(!clip.observe(1.5, 64));
        assert!(!clip.observe(0.5, 48000));
        assert!(clip.observe(1.1, 64));
        // exactly 1.0 is not clipping
        let mut clip = ClipDetector::new(0);
        assert!(!clip.observe(1.0, 64));
    }

    #[test]
    fn stereo_to_five_one() {
        let mut dst = vec![Buffer::default(); 6];
        remap(&filled(&[0.2, 0.6]), &mut dst);
        let got = firsts(&dst);
        let want = [0.2, 0.6, 0.4, 0.0, 0.2, 0.6];
        for (g, w) in got.iter().zip(want.iter()) {
            assert!((g - w).abs() < 1e-6, "{got:?}");
        }
    }

    #[test]
    fn stereo_to_quad_and_seven_one() {
        let mut quad = vec![Buffer::default(); 4];
        remap(&filled(&[0.1, 0.3]), &mut quad);
        assert_eq!(firsts(&quad), vec![0.1, 0.3, 0.1, 0.3]);

        let mut seven = vec![Buffer::default(); 8];
        remap(&filled(&[0.1, 0.3]), &mut seven);
        assert_eq!(firsts(&seven)[3], 0.0);
        assert_eq!(firsts(&seven)[6..], [0.1, 0.3]);
    }

    #[test]
    fn mono_target_averages() {
        let mut dst = vec![Buffer::default(); 1];
        remap(&filled(&[1.0, 0.0]), &mut dst);
        assert_eq!(dst[0][0], 0.5);
    }

    #[test]
    fn quad_folds_into_stereo() {
        let mut dst = vec![Buffer::default(); 2];
        remap(&filled(&[0.1, 0.2, 0.3, 0.4]), &mut dst);
        let got = firsts(&dst);
        assert!((got[0] - 0.4).abs() < 1e-6, "{got:?}");
        assert!((got[1] - 0.6).abs() < 1e-6, "{got:?}");
    }

    #[test]
    fn five_one_to_stereo_and_quad() {
        let src = filled(&[0.1, 0.2, 0.4, 1.0, 0.05, 0.07]);

        let mut stereo = vec![Buffer::default(); 2];
        remap(&src, &mut stereo);
        let got = firsts(&stereo);
        // centre split over the front, LFE dropped
        assert!((got[0] - 0.35).abs() < 1e-6, "{got:?}");
        assert!((got[1] - 0.47).abs() < 1e-6, "{got:?}");

        let mut quad = vec![Buffer::default(); 4];
        remap(&src, &mut quad);
        let got = firsts(&quad);
        assert!((got[2] - 0.05).abs() < 1e-6, "{got:?}");
        assert!((got[3] - 0.07).abs() < 1e-6, "{got:?}");
    }

    #[test]
    fn quad_rears_become_five_one_sides() {
        let mut dst = vec![Buffer::default(); 6];
        remap(&filled(&[0.1, 0.2, 0.3, 0.4]), &mut dst);
        assert_eq!(firsts(&dst), vec![0.1, 0.2, 0.0, 0.0, 0.3, 0.4]);
    }

    #[test]
    fn remap_add_accumulates() {
        let mut dst = filled(&[0.25, 0.25]);
        remap_add(&filled(&[0.5]), &mut dst);
        assert_eq!(firsts(&dst), vec![0.75, 0.75]);
    }

    #[test]
    fn mono_source_skips_lfe() {
        let mut dst = vec![Buffer::default(); 6];
        remap(&filled(&[0.7]), &mut dst);
        assert_eq!(firsts(&dst), vec![0.7, 0.7, 0.7, 0.0, 0.7, 0.7]);
    }
}
