//! Long-running stress test for the glew lifecycle orchestrator.
//!
//! Runs hundreds of randomised start/stop/suspend interleavings against the
//! scripted engine, checking after every cycle that engine calls never
//! overlapped, that every stop callback fired exactly once, and that the
//! orchestrator settled where the last request pointed.
//!
//! Usage:
//!   cargo run --bin stress_test -- [--cycles N] [--seed S]

use glew_core::{LifecycleOrchestrator, OrchestratorState};
use glew_engine::mock::ScriptJournal;
use glew_engine::{Completion, WalletModel, WalletObserver};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

const SETTLE: Duration = Duration::from_secs(10);

struct Timings {
    interleave: Duration,
    settle: Duration,
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Start,
    Stop,
    Suspend,
    Pause(u64),
}

fn random_ops(rng: &mut StdRng) -> Vec<Op> {
    let len = rng.gen_range(1..32);
    (0..len)
        .map(|_| match rng.gen_range(0..4) {
            0 => Op::Start,
            1 => Op::Stop,
            2 => Op::Suspend,
            _ => Op::Pause(rng.gen_range(0..3)),
        })
        .collect()
}

fn client() -> Arc<dyn WalletObserver> {
    Arc::new(WalletModel::new())
}

fn run_cycle(rng: &mut StdRng, cycle: usize, timings: &mut Timings) -> Result<(), String> {
    let journal = ScriptJournal::auto(Duration::from_micros(rng.gen_range(0..500)));
    let orchestrator = LifecycleOrchestrator::new(journal.factory())
        .map_err(|e| format!("cycle {cycle}: CANNOT CREATE ORCHESTRATOR: {e}"))?;
    orchestrator.set_fatal_handler(Arc::new(move |reason: &str| {
        eprintln!("  cycle {cycle}: FATAL: {reason}");
    }));

    let ops = random_ops(rng);
    let stops_fired = Arc::new(AtomicUsize::new(0));
    let mut stops_requested = 0;

    let t0 = Instant::now();
    for op in &ops {
        match *op {
            Op::Start => orchestrator.start(client(), Completion::new(|_| {})),
            Op::Stop => {
                stops_requested += 1;
                let fired = Arc::clone(&stops_fired);
                orchestrator.stop(Some(Completion::new(move |()| {
                    fired.fetch_add(1, Ordering::SeqCst);
                })));
            }
            Op::Suspend => orchestrator.suspend(Completion::noop()),
            Op::Pause(ms) => std::thread::sleep(Duration::from_millis(ms)),
        }
    }
    timings.interleave += t0.elapsed();

    let t0 = Instant::now();
    let (tx, rx) = mpsc::channel();
    orchestrator.start(
        client(),
        Completion::new(move |r| {
            let _ = tx.send(r);
        }),
    );
    match rx.recv_timeout(SETTLE) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(format!("cycle {cycle}: FINAL START FAILED: {e}")),
        Err(_) => return Err(format!("cycle {cycle}: FINAL START TIMED OUT ({ops:?})")),
    }
    if !orchestrator.wait_for(SETTLE, |p| p.state == OrchestratorState::Running) {
        return Err(format!(
            "cycle {cycle}: NOT RUNNING AFTER START: {}",
            orchestrator.phase()
        ));
    }

    let (tx, rx) = mpsc::channel();
    orchestrator.stop(Some(Completion::new(move |()| {
        let _ = tx.send(());
    })));
    if rx.recv_timeout(SETTLE).is_err() {
        return Err(format!("cycle {cycle}: FINAL STOP TIMED OUT ({ops:?})"));
    }
    let phase = orchestrator.phase();
    if !phase.is_idle() || phase.suspended {
        return Err(format!("cycle {cycle}: NOT IDLE AFTER STOP: {phase}"));
    }
    timings.settle += t0.elapsed();

    if !journal.wait_until(SETTLE, |j| j.in_flight() == 0) {
        return Err(format!("cycle {cycle}: ENGINE CALL LEAK: {} in flight", journal.in_flight()));
    }
    if journal.max_in_flight() > 1 {
        return Err(format!(
            "cycle {cycle}: OVERLAPPING ENGINE CALLS: {} at once",
            journal.max_in_flight()
        ));
    }
    let fired = stops_fired.load(Ordering::SeqCst);
    if fired != stops_requested {
        return Err(format!(
            "cycle {cycle}: LOST STOP CALLBACKS: {fired} of {stops_requested} fired"
        ));
    }
    Ok(())
}

fn print_report(cycles: usize, failures: u64, timings: &Timings) {
    println!();
    println!("============================================");
    println!("Results: {cycles} cycles, {failures} failures");
    println!(
        "  interleave: {:.3}s total, {:.3}ms avg",
        timings.interleave.as_secs_f64(),
        timings.interleave.as_secs_f64() * 1000.0 / cycles as f64
    );
    println!(
        "  settle:     {:.3}s total, {:.3}ms avg",
        timings.settle.as_secs_f64(),
        timings.settle.as_secs_f64() * 1000.0 / cycles as f64
    );

    if failures > 0 {
        eprintln!("\nSTRESS TEST FAILED");
        std::process::exit(1);
    } else {
        println!("\nSTRESS TEST PASSED");
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let arg = |name: &str| {
        args.iter()
            .position(|a| a == name)
            .and_then(|i| args.get(i + 1))
            .and_then(|s| s.parse::<u64>().ok())
    };
    let cycles = arg("--cycles").map_or(500, |n| n as usize);
    let seed = arg("--seed").unwrap_or_else(rand::random);

    println!("glew stress test: {cycles} cycles, seed {seed}");
    println!("============================================");

    let mut rng = StdRng::seed_from_u64(seed);
    let mut timings = Timings {
        interleave: Duration::ZERO,
        settle: Duration::ZERO,
    };
    let mut failures = 0u64;

    for cycle in 1..=cycles {
        if let Err(msg) = run_cycle(&mut rng, cycle, &mut timings) {
            eprintln!("  {msg}");
            failures += 1;
            continue;
        }
        if cycle.is_multiple_of(100) {
            let elapsed = timings.interleave + timings.settle;
            println!(
                "  cycle {cycle}/{cycles}: {:.1}s elapsed, {failures} failures",
                elapsed.as_secs_f64()
            );
        }
    }

    print_report(cycles, failures, &timings);
}
