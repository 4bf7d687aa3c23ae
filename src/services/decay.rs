// src/services/decay.rs
//! Confidence decay and tier promotion math.
//!
//! Confidence halves once per tier half-life:
//!
//! ```text
//! confidence(t) = confidence * 0.5 ^ (age_days / half_life_days)
//! ```
//!
//! Age is measured from `updated_at`, and a decay pass advances that anchor
//! to the pass time. Two passes over the same window therefore compose to
//! the same result as one, which is what makes maintenance idempotent and
//! safe to re-run after a crash.

use chrono::{DateTime, Duration, Utc};

use crate::config::{DecayConfig, PromotionConfig};
use crate::models::{MemoryAtom, MemoryTier};

const MS_PER_DAY: f64 = 86_400_000.0;

/// Confidence after `age` under the given half-life. A non-positive or
/// non-finite half-life disables decay for the tier.
pub fn decayed_confidence(confidence: f64, age: Duration, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 || !half_life_days.is_finite() {
        return confidence;
    }
    let days = age.num_milliseconds() as f64 / MS_PER_DAY;
    if days <= 0.0 {
        return confidence;
    }
    confidence * 0.5_f64.powf(days / half_life_days)
}

/// Decay an atom in place against `now` and advance its anchor.
/// Returns whether anything changed. A `now` at or before the anchor is a
/// no-op and leaves the anchor untouched.
pub fn decay_in_place(atom: &mut MemoryAtom, cfg: &DecayConfig, now: DateTime<Utc>) -> bool {
    let age = now - atom.updated_at;
    if age <= Duration::zero() {
        return false;
    }
    atom.confidence = decayed_confidence(atom.confidence, age, cfg.half_life_days(atom.tier));
    atom.updated_at = now;
    true
}

/// The tier this atom qualifies to move into, or `None` if it stays put.
/// One step at a time; the maintenance pass loops to cascade.
pub fn promotion_target(atom: &MemoryAtom, cfg: &PromotionConfig) -> Option<MemoryTier> {
    let (min_triggers, min_confidence) = cfg.gate(atom.tier)?;
    if atom.trigger_count >= min_triggers && atom.confidence >= min_confidence {
        atom.tier.promoted()
    } else {
        None
    }
}

/// When this atom's confidence will cross the removal floor, assuming no
/// further reinforcement. An atom already at or below the floor reports
/// `now`; an atom that can never cross (decay disabled) reports `None`.
pub fn projected_decay_out(
    atom: &MemoryAtom,
    cfg: &DecayConfig,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let floor = cfg.confidence_floor;
    if !floor.is_finite() || floor <= 0.0 || !atom.confidence.is_finite() {
        return None;
    }
    if atom.confidence <= floor {
        return Some(now);
    }
    let half_life = cfg.half_life_days(atom.tier);
    if half_life <= 0.0 || !half_life.is_finite() {
        return None;
    }
    let days = half_life * (atom.confidence / floor).log2();
    let ms = days * MS_PER_DAY;
    if !ms.is_finite() || ms > i64::MAX as f64 {
        return None;
    }
    let delta = Duration::try_milliseconds(ms as i64)?;
    Some(atom.updated_at + delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MemoryType;

    fn atom(tier: MemoryTier, confidence: f64, triggers: u32) -> MemoryAtom {
        let mut a = MemoryAtom::new(MemoryType::Preference, "prefers quiet mornings", confidence, Utc::now());
        a.tier = tier;
        a.trigger_count = triggers;
        a
    }

    #[test]
    fn confidence_halves_per_half_life() {
        let halved = decayed_confidence(0.8, Duration::days(7), 7.0);
        assert!((halved - 0.4).abs() < 1e-9);
        let quartered = decayed_confidence(0.8, Duration::days(14), 7.0);
        assert!((quartered - 0.2).abs() < 1e-9);
    }

    #[test]
    fn zero_or_negative_age_is_noop() {
        assert_eq!(decayed_confidence(0.8, Duration::zero(), 7.0), 0.8);
        assert_eq!(decayed_confidence(0.8, Duration::days(-3), 7.0), 0.8);
        let mut a = atom(MemoryTier::ShortTerm, 0.8, 1);
        let anchor = a.updated_at;
        assert!(!decay_in_place(&mut a, &DecayConfig::default(), anchor - Duration::days(1)));
        assert_eq!(a.updated_at, anchor);
        assert_eq!(a.confidence, 0.8);
    }

    #[test]
    fn decay_advances_anchor() {
        let mut a = atom(MemoryTier::ShortTerm, 0.8, 1);
        let later = a.updated_at + Duration::days(7);
        assert!(decay_in_place(&mut a, &DecayConfig::default(), later));
        assert_eq!(a.updated_at, later);
        assert!((a.confidence - 0.4).abs() < 1e-9);
        // Re-running against the same instant changes nothing.
        assert!(!decay_in_place(&mut a, &DecayConfig::default(), later));
        assert!((a.confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn promotion_gates_are_inclusive() {
        let cfg = PromotionConfig::default();
        assert_eq!(
            promotion_target(&atom(MemoryTier::ShortTerm, 0.6, 3), &cfg),
            Some(MemoryTier::Working)
        );
        assert_eq!(promotion_target(&atom(MemoryTier::ShortTerm, 0.59, 3), &cfg), None);
        assert_eq!(promotion_target(&atom(MemoryTier::ShortTerm, 0.9, 2), &cfg), None);
        assert_eq!(
            promotion_target(&atom(MemoryTier::Working, 0.8, 8), &cfg),
            Some(MemoryTier::LongTerm)
        );
        assert_eq!(promotion_target(&atom(MemoryTier::LongTerm, 1.0, 99), &cfg), None);
    }

    #[test]
    fn projection_lands_on_floor_crossing() {
        let cfg = DecayConfig::default();
        let a = atom(MemoryTier::ShortTerm, 0.6, 1);
        let now = a.updated_at;
        let at = projected_decay_out(&a, &cfg, now).expect("projection");
        // 0.6 halves to 0.15 in exactly two short-term half-lives.
        let expected = a.updated_at + Duration::days(14);
        assert!((at - expected).num_seconds().abs() < 2);
    }

    #[test]
    fn projection_edge_cases() {
        let cfg = DecayConfig::default();
        let now = Utc::now();
        let below = atom(MemoryTier::ShortTerm, 0.1, 1);
        assert_eq!(projected_decay_out(&below, &cfg, now), Some(now));
        let mut no_decay_cfg = cfg.clone();
        no_decay_cfg.short_term_half_life_days = 0.0;
        let a = atom(MemoryTier::ShortTerm, 0.6, 1);
        assert_eq!(projected_decay_out(&a, &no_decay_cfg, now), None);
    }
}
