//! Audio presence resolution
//!
//! Decides, per stage, whether the output carries mixed audio, one source's
//! audio, or no audio stream at all. Requesting an audio map when neither
//! input has audio makes the encoder fail, so [`AudioPlan::None`] must be
//! honoured all the way down to the output options.

use serde::{Deserialize, Serialize};

/// How the overlay's audio is cut and positioned on the output timeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayAudio {
    /// Keep `[0, trim]` of the overlay's audio. `None` keeps all of it.
    pub trim: Option<f64>,
    /// Seconds of silence before the overlay audio starts.
    pub delay: f64,
}

impl OverlayAudio {
    pub fn delay_ms(&self) -> u64 {
        (self.delay.max(0.0) * 1000.0).round() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "plan", rename_all = "snake_case")]
pub enum AudioPlan {
    /// Base audio mixed with the trimmed, delayed overlay audio; runs as long
    /// as the longer of the two.
    Mix(OverlayAudio),
    /// Base audio passes through with its timestamps reset.
    BaseOnly,
    /// Trimmed, delayed overlay audio is the only track.
    OverlayOnly(OverlayAudio),
    /// No audio stream in the output.
    None,
}

impl AudioPlan {
    /// Pick the plan for a base/overlay pair.
    ///
    /// `overlay_duration` is the overlay's visible length when known.
    pub fn resolve(
        base_has_audio: bool,
        overlay_has_audio: bool,
        overlay_duration: Option<f64>,
        overlay_start: f64,
    ) -> AudioPlan {
        let overlay = OverlayAudio {
            trim: overlay_duration.filter(|d| d.is_finite() && *d > 0.0),
            delay: overlay_start.max(0.0),
        };

        match (base_has_audio, overlay_has_audio) {
            (true, true) => AudioPlan::Mix(overlay),
            (true, false) => AudioPlan::BaseOnly,
            (false, true) => AudioPlan::OverlayOnly(overlay),
            (false, false) => AudioPlan::None,
        }
    }

    /// Plan for a stage with a single source (no overlay).
    pub fn single(has_audio: bool) -> AudioPlan {
        if has_audio {
            AudioPlan::BaseOnly
        } else {
            AudioPlan::None
        }
    }

    /// Whether the stage output will carry an audio stream.
    pub fn produces_audio(&self) -> bool {
        !matches!(self, AudioPlan::None)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AudioPlan::Mix(_) => "mix",
            AudioPlan::BaseOnly => "base_only",
            AudioPlan::OverlayOnly(_) => "overlay_only",
            AudioPlan::None => "none",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_presence_combination_has_exactly_one_plan() {
        let cases = [
            (true, true, "mix"),
            (true, false, "base_only"),
            (false, true, "overlay_only"),
            (false, false, "none"),
        ];
        for (base, overlay, expected) in cases {
            let plan = AudioPlan::resolve(base, overlay, Some(3.0), 1.0);
            assert_eq!(plan.name(), expected);
            assert_eq!(plan.produces_audio(), base || overlay);
        }
    }

    #[test]
    fn mix_trims_and_delays_overlay() {
        let plan = AudioPlan::resolve(true, true, Some(3.0), 1.0);
        let AudioPlan::Mix(overlay) = plan else {
            panic!("expected mix, got {:?}", plan);
        };
        assert_eq!(overlay.trim, Some(3.0));
        assert_eq!(overlay.delay_ms(), 1000);
    }

    #[test]
    fn overlay_only_uses_same_cut_as_mix() {
        let mixed = AudioPlan::resolve(true, true, Some(2.5), 0.25);
        let solo = AudioPlan::resolve(false, true, Some(2.5), 0.25);
        match (mixed, solo) {
            (AudioPlan::Mix(a), AudioPlan::OverlayOnly(b)) => assert_eq!(a, b),
            other => panic!("unexpected plans {:?}", other),
        }
    }

    #[test]
    fn unusable_durations_disable_trim() {
        for d in [None, Some(0.0), Some(-1.0), Some(f64::INFINITY)] {
            let AudioPlan::OverlayOnly(overlay) = AudioPlan::resolve(false, true, d, 0.0) else {
                panic!("expected overlay_only");
            };
            assert_eq!(overlay.trim, None);
        }
    }

    #[test]
    fn negative_start_is_clamped() {
        let AudioPlan::Mix(overlay) = AudioPlan::resolve(true, true, Some(1.0), -2.0) else {
            panic!("expected mix");
        };
        assert_eq!(overlay.delay, 0.0);
        assert_eq!(overlay.delay_ms(), 0);
    }

    #[test]
    fn single_source_plans() {
        assert_eq!(AudioPlan::single(true), AudioPlan::BaseOnly);
        assert_eq!(AudioPlan::single(false), AudioPlan::None);
    }
}
