// tests/maintenance_tests.rs
// Decay, floor removal, and promotion behavior of the maintenance pass.
// Every test drives time through explicit `now` values; nothing sleeps.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Duration, Utc};

use persona_core::models::{EventKind, EvolutionEvent, MemoryAtom, MemoryTier, MemoryType, Principle, PrincipleDimension};
use persona_core::services::evolution::EvolutionLog;
use persona_core::services::principles::PrincipleStore;
use persona_core::services::store::MemoryStore;
use persona_core::storage::StorePaths;
use persona_core::{AtomDraft, Commands, EngineError};

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn tmp_root(name: &str) -> PathBuf {
    let ns = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let pid = std::process::id();
    let c = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("persona_maint_{pid}_{ns}_{c}_{name}"))
}

fn seed(
    root: &PathBuf,
    kind: MemoryType,
    content: &str,
    confidence: f64,
    tier: MemoryTier,
    triggers: u32,
    at: DateTime<Utc>,
) -> MemoryAtom {
    let store = MemoryStore::open(&StorePaths::new(root)).expect("store");
    let mut atom = MemoryAtom::new(kind, content, confidence, at);
    atom.tier = tier;
    atom.trigger_count = triggers;
    store.save(&atom).expect("seed atom");
    atom
}

#[test]
fn confidence_halves_after_one_half_life() {
    let root = tmp_root("halving");
    let engine = Commands::open(&root).expect("open");
    let t0 = Utc::now();
    let atom = seed(&root, MemoryType::Preference, "prefers quiet mornings", 0.8, MemoryTier::ShortTerm, 1, t0);

    let report = engine.apply_maintenance(t0 + Duration::days(7)).expect("maintenance");
    assert_eq!(report.retained, 1);
    assert_eq!(report.decayed_out, 0);

    let after = engine.show_memory(&atom.id).expect("show");
    assert!((after.confidence - 0.4).abs() < 1e-9);
    assert_eq!(after.updated_at, t0 + Duration::days(7));
}

#[test]
fn rerunning_at_the_same_instant_changes_nothing() {
    let root = tmp_root("idempotent");
    let engine = Commands::open(&root).expect("open");
    let t0 = Utc::now();
    seed(&root, MemoryType::Preference, "prefers quiet mornings", 0.8, MemoryTier::ShortTerm, 1, t0);
    seed(&root, MemoryType::Thinking, "sketches the data model first", 0.9, MemoryTier::ShortTerm, 3, t0);
    seed(&root, MemoryType::Value, "values honest answers", 0.18, MemoryTier::Working, 1, t0);

    let t1 = t0 + Duration::days(3);
    let first = engine.apply_maintenance(t1).expect("first pass");
    // 0.9 * 0.5^(3/7) ~ 0.669 clears the working gate; 0.8 * 0.743 does not
    // have the triggers for it.
    assert_eq!(first.promoted, 1);
    assert_eq!(first.decayed_out, 0);
    let state = engine.list_memories(None, None, None).expect("list");

    let second = engine.apply_maintenance(t1).expect("second pass");
    assert_eq!(second.promoted, 0);
    assert_eq!(second.decayed_out, 0);
    assert_eq!(second.skipped, 0);
    assert_eq!(engine.list_memories(None, None, None).expect("list again"), state);
}

/// Two passes over [t0, t1] and [t1, t2] must land exactly where one pass
/// over [t0, t2] does; the anchor advance makes the exponentials compose.
#[test]
fn split_passes_compose_into_one_exponential() {
    let root_a = tmp_root("compose_a");
    let root_b = tmp_root("compose_b");
    let engine_a = Commands::open(&root_a).expect("open a");
    let engine_b = Commands::open(&root_b).expect("open b");
    let t0 = Utc::now();

    let atom = MemoryAtom::new(MemoryType::Preference, "enjoys long train rides", 0.8, t0);
    MemoryStore::open(&StorePaths::new(&root_a)).expect("store a").save(&atom).expect("seed a");
    MemoryStore::open(&StorePaths::new(&root_b)).expect("store b").save(&atom).expect("seed b");

    engine_a.apply_maintenance(t0 + Duration::days(3)).expect("a pass 1");
    engine_a.apply_maintenance(t0 + Duration::days(10)).expect("a pass 2");
    engine_b.apply_maintenance(t0 + Duration::days(10)).expect("b single pass");

    let a = engine_a.show_memory(&atom.id).expect("show a");
    let b = engine_b.show_memory(&atom.id).expect("show b");
    assert!((a.confidence - b.confidence).abs() < 1e-12);
    assert!((a.confidence - 0.8 * 0.5_f64.powf(10.0 / 7.0)).abs() < 1e-9);
}

#[test]
fn promotion_gates_are_inclusive_and_need_both_conditions() {
    let root = tmp_root("gates");
    let engine = Commands::open(&root).expect("open");
    let t0 = Utc::now();
    let ready = seed(&root, MemoryType::Preference, "prefers pairing on gnarly bugs", 0.6, MemoryTier::ShortTerm, 3, t0);
    let low_confidence = seed(&root, MemoryType::Preference, "enjoys long train rides", 0.59, MemoryTier::ShortTerm, 3, t0);
    let few_triggers = seed(&root, MemoryType::Preference, "prefers quiet mornings", 0.9, MemoryTier::ShortTerm, 2, t0);

    // Same instant, so no decay interferes with the boundary values.
    let report = engine.apply_maintenance(t0).expect("maintenance");
    assert_eq!(report.promoted, 1);

    assert_eq!(engine.show_memory(&ready.id).expect("ready").tier, MemoryTier::Working);
    assert_eq!(engine.show_memory(&low_confidence.id).expect("low").tier, MemoryTier::ShortTerm);
    assert_eq!(engine.show_memory(&few_triggers.id).expect("few").tier, MemoryTier::ShortTerm);

    let events = engine.history(Some(&ready.id)).expect("history");
    let promoted: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == EventKind::AtomPromoted)
        .collect();
    assert_eq!(promoted.len(), 1);
    assert_eq!(promoted[0].detail, "short_term -> working");
}

#[test]
fn strong_atom_crosses_two_tiers_in_one_pass() {
    let root = tmp_root("cascade");
    let engine = Commands::open(&root).expect("open");
    let t0 = Utc::now();
    let atom = seed(&root, MemoryType::Value, "values written design docs", 0.9, MemoryTier::ShortTerm, 8, t0);

    let report = engine.apply_maintenance(t0).expect("maintenance");
    assert_eq!(report.promoted, 1);
    assert_eq!(engine.show_memory(&atom.id).expect("show").tier, MemoryTier::LongTerm);

    let hops: Vec<String> = engine
        .history(Some(&atom.id))
        .expect("history")
        .into_iter()
        .filter(|e| e.event_type == EventKind::AtomPromoted)
        .map(|e| e.detail)
        .collect();
    assert_eq!(hops, vec!["short_term -> working", "working -> long_term"]);
}

#[test]
fn atom_under_the_floor_is_removed_and_its_principle_decremented() {
    let root = tmp_root("floor");
    let engine = Commands::open(&root).expect("open");
    let paths = StorePaths::new(&root);
    let principles = PrincipleStore::open(&paths).expect("principles");
    let evolution = EvolutionLog::open(&paths);
    let t0 = Utc::now();

    let principle = Principle::new(PrincipleDimension::Worldview, "keeps plans written down", 0.8, 5, t0);
    principles
        .save_with_event(
            &principle,
            &EvolutionEvent::new(EventKind::PrincipleFormed, &principle.id, "", t0),
            &evolution,
        )
        .expect("seed principle");
    let mut fading = MemoryAtom::new(MemoryType::Preference, "keeps a paper notebook", 0.2, t0);
    fading.tier = MemoryTier::Working;
    fading.related_principle_id = Some(principle.id.clone());
    MemoryStore::open(&paths).expect("store").save(&fading).expect("seed atom");

    // One working half-life: 0.2 -> 0.1, strictly below the 0.15 floor.
    let report = engine.apply_maintenance(t0 + Duration::days(30)).expect("maintenance");
    assert_eq!(report.decayed_out, 1);
    assert_eq!(report.retained, 0);

    assert!(matches!(
        engine.show_memory(&fading.id),
        Err(EngineError::NotFound { .. })
    ));
    let decayed = engine
        .timeline(Some(EventKind::AtomDecayedOut), None)
        .expect("timeline");
    assert_eq!(decayed.len(), 1);
    assert_eq!(decayed[0].target_id, fading.id);

    let after = engine.show_principle(&principle.id).expect("principle");
    assert_eq!(after.evidence_count, 4);
    assert!(after.active);
}

#[test]
fn atom_exactly_at_the_floor_is_retained() {
    let root = tmp_root("at_floor");
    let engine = Commands::open(&root).expect("open");
    let t0 = Utc::now();
    // 0.3 halves to exactly the 0.15 floor after one short-term half-life.
    let atom = seed(&root, MemoryType::Preference, "prefers tea over coffee", 0.3, MemoryTier::ShortTerm, 1, t0);

    let report = engine.apply_maintenance(t0 + Duration::days(7)).expect("maintenance");
    assert_eq!(report.decayed_out, 0);
    assert_eq!(report.retained, 1);
    let after = engine.show_memory(&atom.id).expect("show");
    assert!((after.confidence - 0.15).abs() < 1e-9);
}

#[test]
fn non_finite_confidence_is_skipped_not_destroyed() {
    let root = tmp_root("nan");
    let engine = Commands::open(&root).expect("open");
    let t0 = Utc::now();
    let damaged = seed(&root, MemoryType::Identity, "grew up near the coast", f64::NAN, MemoryTier::ShortTerm, 1, t0);
    seed(&root, MemoryType::Preference, "prefers quiet mornings", 0.8, MemoryTier::ShortTerm, 1, t0);

    let report = engine.apply_maintenance(t0 + Duration::days(7)).expect("maintenance");
    assert_eq!(report.skipped, 1);
    assert_eq!(report.retained, 1);
    assert_eq!(report.decayed_out, 0);
    assert!(report.notes.iter().any(|n| n.contains(&damaged.id)));

    // The damaged atom is still on file, untouched, after the pass.
    let still_there = engine.show_memory(&damaged.id).expect("show damaged");
    assert!(still_there.confidence.is_nan());
    assert!(engine
        .timeline(Some(EventKind::AtomDecayedOut), None)
        .expect("timeline")
        .is_empty());
}

/// Reinforcement moves the decay anchor: an atom merged 3 days in decays
/// from the merge, not from creation.
#[test]
fn reinforcement_resets_the_decay_clock() {
    let root = tmp_root("anchor");
    let engine = Commands::open(&root).expect("open");
    let t0 = Utc::now();
    let draft = AtomDraft::new("preference", "writes tests before implementation").with_confidence(0.7);
    let control = AtomDraft::new("thinking", "reads the failing test first").with_confidence(0.7);

    let report = engine.ingest(&[draft.clone(), control], t0).expect("ingest");
    let reinforced_id = report.inserted[0].clone();
    let control_id = report.inserted[1].clone();
    engine.ingest(&[draft], t0 + Duration::days(3)).expect("reinforce");

    engine
        .apply_maintenance(t0 + Duration::days(10))
        .expect("maintenance");

    // Reinforced at day 3: (0.7 + 0.05) decayed over the remaining 7 days.
    let reinforced = engine.show_memory(&reinforced_id).expect("reinforced");
    assert!((reinforced.confidence - 0.375).abs() < 1e-9);
    // Untouched control decays over the full 10 days.
    let control = engine.show_memory(&control_id).expect("control");
    assert!((control.confidence - 0.7 * 0.5_f64.powf(10.0 / 7.0)).abs() < 1e-9);
}
