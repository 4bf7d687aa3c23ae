use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender};
use rand::{rngs::StdRng, Rng, SeedableRng};
use sysinfo::System;

use persona_core::{AtomDraft, Commands};

#[derive(Clone, Debug)]
struct BenchCfg {
    drafts_per_session: usize, // N
    parallel_sessions: usize,  // M
}

#[derive(Debug, Clone)]
struct Metrics {
    intake_latencies_ms: Vec<f64>,
    select_latencies_ms: Vec<f64>,
    errors: usize,
    intakes: usize,
    selections: usize,
    start: Instant,
    end: Instant,
    max_rss_mb: f64,
    avg_cpu_percent: f64,
    store_size_mb: f64,
    maintenance_ms: f64,
    aggregate_ms: f64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            intake_latencies_ms: Vec::new(),
            select_latencies_ms: Vec::new(),
            errors: 0,
            intakes: 0,
            selections: 0,
            start: Instant::now(),
            end: Instant::now(),
            max_rss_mb: 0.0,
            avg_cpu_percent: 0.0,
            store_size_mb: 0.0,
            maintenance_ms: 0.0,
            aggregate_ms: 0.0,
        }
    }
}

fn pct(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() { return 0.0; }
    let rank = (p * (sorted.len() as f64 - 1.0)).clamp(0.0, sorted.len() as f64 - 1.0);
    let idx = rank.round() as usize;
    sorted[idx]
}

const TYPES: [&str; 5] = ["identity", "value", "thinking", "preference", "communication"];

// Small vocabulary so some drafts land close enough to merge; a pure
// random-string load would never exercise the dedup path.
const VOCAB: [&str; 32] = [
    "prefers", "values", "avoids", "enjoys", "reviews", "writes", "reads", "plans",
    "short", "long", "careful", "direct", "quiet", "detailed", "honest", "early",
    "meetings", "notes", "tests", "design", "feedback", "mornings", "decisions", "drafts",
    "code", "docs", "walks", "coffee", "deadlines", "sketches", "questions", "lists",
];

fn random_draft(rng: &mut StdRng, i: usize) -> AtomDraft {
    let words = rng.gen_range(4..=8);
    let content: Vec<&str> = (0..words)
        .map(|_| VOCAB[rng.gen_range(0..VOCAB.len())])
        .collect();
    let confidence = 0.4 + rng.gen_range(0..=60) as f64 / 100.0;
    let mut draft =
        AtomDraft::new(TYPES[i % TYPES.len()], content.join(" ")).with_confidence(confidence);
    if i % 4 == 0 {
        draft = draft.with_evidence(format!("said during load run: {}", content.join(" ")));
    }
    draft
}

fn sample_process_metrics(sys: &mut System) -> (f64, f64) {
    sys.refresh_processes();
    let pid = sysinfo::Pid::from_u32(std::process::id());
    if let Some(p) = sys.process(pid) {
        let rss_mb = p.memory() as f64 / (1024.0 * 1024.0);
        let cpu = p.cpu_usage() as f64; // 0..100 per core aggregated
        (rss_mb, cpu)
    } else {
        (0.0, 0.0)
    }
}

fn dir_size_mb(path: &Path) -> f64 {
    fn walk(path: &Path) -> u64 {
        let mut total = 0;
        if let Ok(entries) = fs::read_dir(path) {
            for entry in entries.flatten() {
                let p = entry.path();
                if p.is_dir() {
                    total += walk(&p);
                } else if let Ok(meta) = entry.metadata() {
                    total += meta.len();
                }
            }
        }
        total
    }
    walk(path) as f64 / (1024.0 * 1024.0)
}

fn run_bench(cfg: BenchCfg) -> anyhow::Result<Metrics> {
    // Isolated store root; everything the engine writes lives here.
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().to_path_buf();

    // Single-writer queue, matching the engine's one-writer lock design:
    // one thread owns the Commands handle and applies every mutation.
    #[derive(Debug)]
    enum Op {
        Ingest { draft: AtomDraft, ack: Sender<bool> },
        Select { ack: Sender<bool> },
        Maintain { ack: Sender<bool> },
        Aggregate { ack: Sender<bool> },
        Stop,
    }

    let (tx, rx): (Sender<Op>, Receiver<Op>) = bounded(2048);
    let writer_root = root.clone();
    let writer_handle = thread::spawn(move || -> anyhow::Result<()> {
        let engine = Commands::open(&writer_root)?;
        loop {
            match rx.recv() {
                Ok(Op::Ingest { draft, ack }) => {
                    let ok = engine.ingest(&[draft], Utc::now()).is_ok();
                    let _ = ack.send(ok);
                }
                Ok(Op::Select { ack }) => {
                    let ok = engine.select_for_injection(10, 0.5).is_ok();
                    let _ = ack.send(ok);
                }
                Ok(Op::Maintain { ack }) => {
                    let ok = engine.apply_maintenance(Utc::now()).is_ok();
                    let _ = ack.send(ok);
                }
                Ok(Op::Aggregate { ack }) => {
                    let ok = engine.aggregate(Utc::now()).is_ok();
                    let _ = ack.send(ok);
                }
                Ok(Op::Stop) | Err(_) => break,
            }
        }
        Ok(())
    });

    let mut workers = Vec::new();
    let metrics = Arc::new(Mutex::new(Metrics::default()));
    let start = Instant::now();

    for sidx in 0..cfg.parallel_sessions {
        let txc = tx.clone();
        let mref = Arc::clone(&metrics);
        let n = cfg.drafts_per_session;
        workers.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(0xC0FFEE + sidx as u64);
            let mut intake_lat = Vec::with_capacity(n);
            let mut select_lat = Vec::with_capacity(n / 8 + 1);
            let mut errors = 0usize;
            let mut intakes = 0usize;
            let mut selections = 0usize;

            for i in 0..n {
                let draft = random_draft(&mut rng, i);

                let t0 = Instant::now();
                let (ack_tx, ack_rx) = bounded::<bool>(0);
                if txc.send(Op::Ingest { draft, ack: ack_tx }).is_err() {
                    errors += 1;
                    continue;
                }
                match ack_rx.recv() {
                    Ok(true) => {
                        intake_lat.push(t0.elapsed().as_secs_f64() * 1000.0);
                        intakes += 1;
                    }
                    _ => errors += 1,
                }

                // A new conversation starts roughly every eighth interaction.
                if i % 8 == 0 {
                    let t1 = Instant::now();
                    let (ack_tx, ack_rx) = bounded::<bool>(0);
                    if txc.send(Op::Select { ack: ack_tx }).is_err() {
                        errors += 1;
                        continue;
                    }
                    match ack_rx.recv() {
                        Ok(true) => {
                            select_lat.push(t1.elapsed().as_secs_f64() * 1000.0);
                            selections += 1;
                        }
                        _ => errors += 1,
                    }
                }
            }

            let mut m = mref.lock().unwrap();
            m.intake_latencies_ms.extend(intake_lat);
            m.select_latencies_ms.extend(select_lat);
            m.errors += errors;
            m.intakes += intakes;
            m.selections += selections;
        }));
    }

    // Resource sampler thread
    let sampler_running = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let sampler_flag = sampler_running.clone();
    let mut sys = System::new_all();
    let sampler = thread::spawn(move || {
        let mut max_rss = 0.0f64;
        let mut cpu_sum = 0.0f64;
        let mut cpu_count = 0usize;
        while sampler_flag.load(std::sync::atomic::Ordering::Relaxed) {
            let (rss, cpu) = sample_process_metrics(&mut sys);
            if rss > max_rss { max_rss = rss; }
            cpu_sum += cpu;
            cpu_count += 1;
            thread::sleep(Duration::from_millis(50));
        }
        let avg_cpu = if cpu_count == 0 { 0.0 } else { cpu_sum / cpu_count as f64 };
        (max_rss, avg_cpu)
    });

    for h in workers { let _ = h.join(); }

    // One background cycle over the full store, timed separately.
    let t_m = Instant::now();
    let (ack_tx, ack_rx) = bounded::<bool>(0);
    let _ = tx.send(Op::Maintain { ack: ack_tx });
    let _ = ack_rx.recv();
    let maintenance_ms = t_m.elapsed().as_secs_f64() * 1000.0;

    let t_a = Instant::now();
    let (ack_tx, ack_rx) = bounded::<bool>(0);
    let _ = tx.send(Op::Aggregate { ack: ack_tx });
    let _ = ack_rx.recv();
    let aggregate_ms = t_a.elapsed().as_secs_f64() * 1000.0;

    let _ = tx.send(Op::Stop);
    let _ = writer_handle.join();

    sampler_running.store(false, std::sync::atomic::Ordering::Relaxed);
    let (max_rss, avg_cpu) = sampler.join().unwrap_or((0.0, 0.0));

    let mut result = metrics.lock().unwrap().clone();
    result.start = start;
    result.end = Instant::now();
    result.max_rss_mb = max_rss;
    result.avg_cpu_percent = avg_cpu;
    result.store_size_mb = dir_size_mb(&root);
    result.maintenance_ms = maintenance_ms;
    result.aggregate_ms = aggregate_ms;

    result.intake_latencies_ms.sort_by(|a, b| a.partial_cmp(b).unwrap());
    result.select_latencies_ms.sort_by(|a, b| a.partial_cmp(b).unwrap());

    Ok(result)
}

fn main() -> anyhow::Result<()> {
    let n: usize = std::env::var("PERSONA_BENCH_N").ok().and_then(|s| s.parse().ok()).unwrap_or(200);
    let m: usize = std::env::var("PERSONA_BENCH_M").ok().and_then(|s| s.parse().ok()).unwrap_or(4);
    let cfg = BenchCfg {
        drafts_per_session: n,
        parallel_sessions: m,
    };

    eprintln!("Running workload: intake+select under one writer — N={} M={}", n, m);
    let metrics = run_bench(cfg)?;

    let dur_s = (metrics.end - metrics.start).as_secs_f64();
    let throughput = if dur_s > 0.0 { metrics.intakes as f64 / dur_s } else { 0.0 };

    let p50i = pct(&metrics.intake_latencies_ms, 0.50);
    let p95i = pct(&metrics.intake_latencies_ms, 0.95);
    let p99i = pct(&metrics.intake_latencies_ms, 0.99);
    let p50s = pct(&metrics.select_latencies_ms, 0.50);
    let p95s = pct(&metrics.select_latencies_ms, 0.95);
    let p99s = pct(&metrics.select_latencies_ms, 0.99);

    let total_ops = (metrics.intakes + metrics.selections) as f64;
    let error_rate = if total_ops > 0.0 { metrics.errors as f64 / total_ops * 100.0 } else { 0.0 };

    // Targets
    let target_tput = 50.0;
    let target_p95_intake = 25.0;
    let target_p95_select = 20.0;
    let target_error_pct = 0.1;

    println!("--- persona-core load bench: intake + select ---");
    println!("Throughput: {:.1} drafts/sec (target {:.1})", throughput, target_tput);
    println!("Latency intake ms: p50 {:.1} p95 {:.1} p99 {:.1} (target p95 < {:.0})", p50i, p95i, p99i, target_p95_intake);
    println!("Latency select ms: p50 {:.1} p95 {:.1} p99 {:.1} (target p95 < {:.0})", p50s, p95s, p99s, target_p95_select);
    println!("Background: maintenance {:.1} ms, aggregation {:.1} ms over {} intakes", metrics.maintenance_ms, metrics.aggregate_ms, metrics.intakes);
    println!("Resource: max RSS {:.1} MB, avg CPU {:.1}%, store size {:.2} MB", metrics.max_rss_mb, metrics.avg_cpu_percent, metrics.store_size_mb);
    println!("Errors: {} ({:.3}%) (target < {:.3}%)", metrics.errors, error_rate, target_error_pct);

    let ok_tput = throughput >= target_tput;
    let ok_intake = p95i < target_p95_intake;
    let ok_select = p95s < target_p95_select;
    let ok_err = error_rate < target_error_pct;
    println!("SLOs: throughput={} intake={} select={} errors={}", ok_tput, ok_intake, ok_select, ok_err);

    Ok(())
}
