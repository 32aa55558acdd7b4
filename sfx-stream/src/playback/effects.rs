//! Source effects: fades and markers
//!
//! Effects are polled once per update with the wall clock tick and the
//! source's playback position. Each one reports the gain it contributes and
//! whether it finished; finished effects are removed by the owner.
//!
//! Fades are measured either against the wall clock (fade-in, stop/pause
//! fade-out) or against playback position (the fade-out that ends with the
//! sound). The source's fade gain is the product of the active fades, so
//! removing one mid-ramp simply drops its factor.

use sfx_common::FadeCurve;

/// Floor for a fade-in's first update, so the source never plays at
/// exactly zero (zero would make it lose its voice)
pub const MIN_FADE_GAIN: f32 = 0.01;

/// What a completed fade-out does to its source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeCompletion {
    None,
    Stop,
    Pause,
}

/// Which position an effect is scheduled against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectClock {
    /// System clock ticks
    Wall,
    /// Source playback position in ticks
    Playback,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EffectKind {
    FadeIn {
        curve: FadeCurve,
    },
    FadeOut {
        curve: FadeCurve,
        on_complete: FadeCompletion,
    },
    Marker {
        name: String,
    },
}

/// Result of polling one effect
#[derive(Debug, Clone, PartialEq)]
pub struct EffectOutput {
    pub gain: f32,
    pub done: bool,
    pub action: FadeCompletion,
    pub marker: Option<String>,
}

impl EffectOutput {
    fn gain(gain: f32, done: bool) -> Self {
        Self {
            gain,
            done,
            action: FadeCompletion::None,
            marker: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    kind: EffectKind,
    clock: EffectClock,
    start: u64,
    duration: u64,
}

impl Effect {
    pub fn fade_in(curve: FadeCurve, now: u64, duration_ticks: u64) -> Self {
        Self {
            kind: EffectKind::FadeIn { curve },
            clock: EffectClock::Wall,
            start: now,
            duration: duration_ticks,
        }
    }

    /// Fade-out starting now, applying `on_complete` when it reaches silence
    pub fn fade_out(curve: FadeCurve, now: u64, duration_ticks: u64, on_complete: FadeCompletion) -> Self {
        Self {
            kind: EffectKind::FadeOut { curve, on_complete },
            clock: EffectClock::Wall,
            start: now,
            duration: duration_ticks,
        }
    }

    /// Fade-out that reaches silence at `end_ticks` of playback
    pub fn end_fade(curve: FadeCurve, end_ticks: u64, duration_ticks: u64) -> Self {
        let duration = duration_ticks.min(end_ticks);
        Self {
            kind: EffectKind::FadeOut {
                curve,
                on_complete: FadeCompletion::None,
            },
            clock: EffectClock::Playback,
            start: end_ticks - duration,
            duration,
        }
    }

    pub fn marker(name: impl Into<String>, position_ticks: u64) -> Self {
        Self {
            kind: EffectKind::Marker { name: name.into() },
            clock: EffectClock::Playback,
            start: position_ticks,
            duration: 0,
        }
    }

    pub fn kind(&self) -> &EffectKind {
        &self.kind
    }

    pub fn clock(&self) -> EffectClock {
        self.clock
    }

    pub fn is_fade(&self) -> bool {
        !matches!(self.kind, EffectKind::Marker { .. })
    }

    /// A stop or pause fade started by the application
    pub fn is_transition_fade(&self) -> bool {
        matches!(
            self.kind,
            EffectKind::FadeOut {
                on_complete: FadeCompletion::Stop | FadeCompletion::Pause,
                ..
            }
        )
    }

    /// The fade-out tied to the end of the sound
    pub fn is_end_fade(&self) -> bool {
        matches!(self.kind, EffectKind::FadeOut { .. }) && self.clock == EffectClock::Playback
    }

    fn progress(&self, at: u64) -> f32 {
        if self.duration == 0 {
            return 1.0;
        }
        (at.saturating_sub(self.start) as f32 / self.duration as f32).min(1.0)
    }

    pub fn update(&mut self, now: u64, position_ticks: u64) -> EffectOutput {
        let at = match self.clock {
            EffectClock::Wall => now,
            EffectClock::Playback => position_ticks,
        };

        match &self.kind {
            EffectKind::FadeIn { curve } => {
                let t = self.progress(at);
                let gain = curve.calculate_fade_in(t).max(MIN_FADE_GAIN);
                EffectOutput::gain(gain, t >= 1.0)
            }
            EffectKind::FadeOut { curve, on_complete } => {
                if self.clock == EffectClock::Playback && at < self.start {
                    return EffectOutput::gain(1.0, false);
                }
                let t = self.progress(at);
                let gain = curve.calculate_fade_out(t);
                // The end fade holds at silence until playback stops
                let done = t >= 1.0 && self.clock == EffectClock::Wall;
                EffectOutput {
                    action: if done { *on_complete } else { FadeCompletion::None },
                    ..EffectOutput::gain(gain, done)
                }
            }
            EffectKind::Marker { name } => {
                let passed = at >= self.start;
                EffectOutput {
                    marker: passed.then(|| name.clone()),
                    ..EffectOutput::gain(1.0, passed)
                }
            }
        }
    }
}

/// Ordered effect list of one source
#[derive(Debug, Clone, Default)]
pub struct EffectList {
    effects: Vec<Effect>,
}

/// Combined result of polling an [`EffectList`]
#[derive(Debug, Clone, PartialEq)]
pub struct EffectsUpdate {
    /// Product of the active fade gains
    pub gain: f32,
    pub action: FadeCompletion,
    pub markers: Vec<String>,
}

impl EffectList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Effect> {
        self.effects.iter()
    }

    pub fn retain(&mut self, keep: impl FnMut(&Effect) -> bool) {
        self.effects.retain(keep);
    }

    /// Poll every effect in order, dropping the finished ones
    pub fn update(&mut self, now: u64, position_ticks: u64) -> EffectsUpdate {
        let mut result = EffectsUpdate {
            gain: 1.0,
            action: FadeCompletion::None,
            markers: Vec::new(),
        };

        self.effects.retain_mut(|effect| {
            let output = effect.update(now, position_ticks);
            // A fade-out that completes here still silences this pass
            if !output.done || output.action != FadeCompletion::None {
                result.gain *= output.gain;
            }
            if output.action != FadeCompletion::None && result.action == FadeCompletion::None {
                result.action = output.action;
            }
            if let Some(name) = output.marker {
                result.markers.push(name);
            }
            !output.done
        });

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fade_in_starts_above_zero_and_completes() {
        let mut fade = Effect::fade_in(FadeCurve::Linear, 1000, 500);

        let first = fade.update(1000, 0);
        assert_eq!(first.gain, MIN_FADE_GAIN);
        assert!(!first.done);

        let half = fade.update(1250, 0);
        assert!((half.gain - 0.5).abs() < 1e-6);

        assert!(fade.update(1500, 0).done);
    }

    #[test]
    fn test_transition_fade_reports_action() {
        let mut fade = Effect::fade_out(FadeCurve::Linear, 0, 100, FadeCompletion::Pause);
        assert_eq!(fade.update(50, 0).action, FadeCompletion::None);

        let out = fade.update(100, 0);
        assert!(out.done);
        assert_eq!(out.action, FadeCompletion::Pause);
        assert_eq!(out.gain, 0.0);
    }

    #[test]
    fn test_end_fade_follows_playback_position() {
        let mut fade = Effect::end_fade(FadeCurve::Linear, 10_000, 2000);
        assert_eq!(fade.update(99_999, 7000).gain, 1.0);
        assert!((fade.update(0, 9000).gain - 0.5).abs() < 1e-6);

        let end = fade.update(0, 10_000);
        assert_eq!(end.gain, 0.0);
        assert!(!end.done);
    }

    #[test]
    fn test_end_fade_longer_than_sound() {
        let fade = Effect::end_fade(FadeCurve::Linear, 1000, 5000);
        assert_eq!(fade.start, 0);
        assert_eq!(fade.duration, 1000);
    }

    #[test]
    fn test_marker_fires_once() {
        let mut list = EffectList::new();
        list.push(Effect::marker("hit", 300));

        assert!(list.update(0, 200).markers.is_empty());
        assert_eq!(list.update(0, 300).markers, vec!["hit".to_string()]);
        assert!(list.update(0, 400).markers.is_empty());
        assert!(list.is_empty());
    }

    #[test]
    fn test_gain_is_product_of_fades() {
        let mut list = EffectList::new();
        list.push(Effect::fade_in(FadeCurve::Linear, 0, 1000));
        list.push(Effect::fade_out(FadeCurve::Linear, 0, 1000, FadeCompletion::Stop));

        let out = list.update(500, 0);
        assert!((out.gain - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_removed_fade_restores_full_gain() {
        let mut list = EffectList::new();
        list.push(Effect::fade_in(FadeCurve::Linear, 0, 1000));
        assert!(list.update(100, 0).gain < 0.2);

        list.retain(|effect| !effect.is_fade());
        assert_eq!(list.update(200, 0).gain, 1.0);
    }

    #[test]
    fn test_completing_fade_out_stays_silent_for_its_last_pass() {
        let mut list = EffectList::new();
        list.push(Effect::fade_out(FadeCurve::Linear, 0, 500, FadeCompletion::Stop));
        assert!(list.update(450, 0).gain > 0.0);

        let out = list.update(500, 0);
        assert_eq!(out.action, FadeCompletion::Stop);
        assert_eq!(out.gain, 0.0);
        assert!(list.is_empty());
        assert_eq!(list.update(550, 0).gain, 1.0);
    }

    #[test]
    fn test_completed_fade_in_restores_full_gain() {
        let mut list = EffectList::new();
        list.push(Effect::fade_in(FadeCurve::Linear, 0, 100));
        assert_eq!(list.update(100, 0).gain, 1.0);
        assert!(list.is_empty());
    }

    #[test]
    fn test_zero_length_fade_completes_immediately() {
        let mut fade = Effect::fade_out(FadeCurve::Linear, 10, 0, FadeCompletion::Stop);
        let out = fade.update(10, 0);
        assert!(out.done);
        assert_eq!(out.action, FadeCompletion::Stop);
    }
}
