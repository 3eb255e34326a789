//! Volume and pitch unit conversions.
//!
//! These are the exact conversions the binding layer exposes, in `f32`, so
//! tests can compare results bit for bit.

/// Linear volume to decibels. Silence (and anything quieter than -100 dB) is -100 dB.
pub fn volume_to_decibels(volume: f32) -> f32 {
    if volume == 0.0 {
        return -100.0;
    }

    let decibels = 20.0 * volume.log10();
    if decibels < -100.0 {
        -100.0
    } else {
        decibels
    }
}

/// Decibels to linear volume.
pub fn decibels_to_volume(decibels: f32) -> f32 {
    10.0f32.powf(decibels / 20.0)
}

/// Pitch in octaves to semitones. A pitch of zero is exactly zero semitones.
pub fn pitch_to_semitones(pitch: f32) -> f32 {
    if pitch == 0.0 {
        return 0.0;
    }

    3986.0 * pitch.exp2().log10() / 100.0
}

/// Semitones to pitch in octaves.
pub fn semitones_to_pitch(semitones: f32) -> f32 {
    (semitones / 12.0).exp2().log2()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_is_minus_one_hundred_db() {
        assert_eq!(volume_to_decibels(0.0), -100.0);
        assert_eq!(volume_to_decibels(1.0e-9), -100.0);
    }

    #[test]
    fn unity_is_zero_db() {
        assert_eq!(volume_to_decibels(1.0), 0.0);
        assert_eq!(decibels_to_volume(0.0), 1.0);
    }

    #[test]
    fn decibel_round_trip() {
        for &v in &[0.001f32, 0.015, 0.25, 0.5, 1.0, 1.5, 2.0, 8.0] {
            let back = decibels_to_volume(volume_to_decibels(v));
            assert!((back - v).abs() <= v * 1e-4, "{v} came back as {back}");
        }
    }

    #[test]
    fn zero_pitch_is_exact_both_ways() {
        assert_eq!(pitch_to_semitones(0.0), 0.0);
        assert_eq!(semitones_to_pitch(0.0), 0.0);
    }

    #[test]
    fn pitch_round_trip() {
        for &p in &[-2.0f32, -1.0, -0.5, 0.25, 1.0, 2.0] {
            let back = semitones_to_pitch(pitch_to_semitones(p));
            assert!((back - p).abs() < 1e-3, "{p} came back as {back}");
        }
    }

    #[test]
    fn one_octave_is_about_twelve_semitones() {
        assert!((pitch_to_semitones(1.0) - 12.0).abs() < 0.01);
    }
}
