//! # Observatory Benchmark Harness
//!
//! Purpose: Provide a dependency-free, repeatable benchmark driver for
//! the ring queue and latency aggregator so baseline throughput and
//! latency can be compared over time.
//!
//! ## Design Principles
//! 1. **Deterministic Workload**: Use a fixed PRNG seed for stable
//!    comparisons.
//! 2. **Allocation Control**: Pre-build samples to keep setup costs off
//!    the hot path.
//! 3. **Zero-Cost Dispatch**: Call the concrete aggregator directly to
//!    avoid dynamic dispatch.

use std::env;
use std::hint::black_box;
use std::time::Instant;

use obs_common::{CallSiteName, ObservatoryConfig, Sample};
use obs_engine::AggregatorRegistry;
use obs_queue::BoundedRingQueue;

const DEFAULT_OP_COUNT: usize = 1_000_000;
const DEFAULT_RING_CAPACITY: usize = 10_000;

struct BenchConfig {
    op_count: usize,
    ring_capacity: usize,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        let op_count = parse_usize(args.next(), DEFAULT_OP_COUNT);
        let ring_capacity = parse_usize(args.next(), DEFAULT_RING_CAPACITY);
        BenchConfig { op_count, ring_capacity }
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

/// Tiny deterministic PRNG used to avoid external dependencies.
///
/// XorShift is fast enough for benchmarks and keeps the workload
/// reproducible.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    #[inline]
    fn next_sample_ms(&mut self) -> u32 {
        (self.next_u64() % 2000) as u32
    }
}

fn report(label: &str, ops: usize, elapsed: std::time::Duration) {
    let secs = elapsed.as_secs_f64();
    let ops_per_sec = (ops as f64) / secs;
    let nanos_per_op = (secs * 1e9) / (ops as f64);
    println!("{label}: {ops} ops in {secs:.3}s ({ops_per_sec:.0} ops/s, {nanos_per_op:.1} ns/op)");
}

/// Runs the ring queue workload on a bare OS thread rather than a Tokio
/// task, wrapped in a [`obs_engine::trace::thread_scope`] bag so a
/// thread-bound caller can still tag its own benchmark run (e.g. a seed
/// or label) without a Tokio task-local scope to attach to.
fn bench_ring_queue(op_count: usize, ring_capacity: usize) -> String {
    obs_engine::trace::thread_scope(|| {
        obs_engine::trace::set("bench.phase", "ring_queue");

        let queue: BoundedRingQueue<u32> = BoundedRingQueue::new(ring_capacity);
        let mut rng = XorShift64::new(0xA5A5_A5A5_A5A5_A5A5);

        let start = Instant::now();
        for _ in 0..op_count {
            let value = rng.next_u64() as u32;
            let _ = queue.try_push(value);
            if let Some(popped) = queue.try_pop() {
                black_box(popped);
            }
        }
        report("ring push/pop", op_count, start.elapsed());
        println!(
            "ring counters: pushed={} popped={} dropped={}",
            queue.pushed(),
            queue.popped(),
            queue.dropped()
        );

        obs_engine::trace::to_json()
    })
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
    let config = BenchConfig::from_args();
    println!("op_count={} ring_capacity={}", config.op_count, config.ring_capacity);

    let op_count = config.op_count;
    let ring_capacity = config.ring_capacity;
    let ring_bench_trace = std::thread::spawn(move || bench_ring_queue(op_count, ring_capacity))
        .join()
        .expect("ring queue benchmark thread panicked");
    println!("ring queue benchmark trace bag: {ring_bench_trace}");

    let registry = AggregatorRegistry::new(&ObservatoryConfig::default());
    let name = CallSiteName::new("bench::record");
    let mut rng = XorShift64::new(0x1234_5678_9ABC_DEF0);

    let start = Instant::now();
    for _ in 0..config.op_count {
        registry.record(&name, Sample::from_millis(rng.next_sample_ms()));
    }
    report("aggregator record (enqueue only)", config.op_count, start.elapsed());

    // Give the call site's consumer task a moment to drain before reporting
    // final numbers, since record() only enqueues on the hot path.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    if let Some(snapshot) = registry.snapshot(&name) {
        println!(
            "aggregator drained: count={} min={:?} max={:?} median={:?}",
            snapshot.count, snapshot.min_ms, snapshot.max_ms, snapshot.median_ms
        );
    }
}
