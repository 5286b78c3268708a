//! Stress runs for the transactional memory layer.
//!
//! These runs drive many transactions against a shared [`SnapshotCell`] and
//! check that readers only ever observe whole committed snapshots.

use crate::fixtures::fresh_memory;
use entidb_txmem::{CoreResult, SnapshotCell, TransactionalMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Map used by the stress runs: key to the version that last wrote it.
pub type VersionMap = TransactionalMap<u32, u64>;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of transactions to commit.
    pub operations: usize,
    /// Number of concurrent reader threads.
    pub threads: usize,
    /// Number of keys written by each transaction.
    pub width: u32,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 1_000,
            threads: 4,
            width: 64,
        }
    }
}

fn commit_version(cell: &SnapshotCell<VersionMap>, version: u64, width: u32) -> CoreResult<()> {
    let mut memory = fresh_memory();
    let map = cell.load();
    for key in 0..width {
        map.put(&mut memory, key, version)?;
    }
    memory.register_consumer(cell.consumer());
    memory.commit()
}

/// Returns true if every key of `map` carries the same version.
fn is_whole_snapshot(map: &VersionMap, width: u32) -> bool {
    let reader = fresh_memory();
    let mut versions = map.values(&reader);
    match versions.next() {
        None => true,
        Some(first) => map.len(&reader) == width as usize && versions.all(|v| v == first),
    }
}

/// Run sequential commits, each rewriting every key.
pub fn stress_sequential_commits(config: &StressConfig) -> StressTestResult {
    let cell = SnapshotCell::new(VersionMap::new());

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for version in 1..=config.operations as u64 {
        match commit_version(&cell, version, config.width) {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run one committing writer against concurrent readers.
///
/// Every commit and every whole-snapshot read counts as a success; a read
/// mixing versions counts as a failure.
pub fn stress_concurrent_readers(config: &StressConfig) -> StressTestResult {
    let cell = SnapshotCell::new(VersionMap::new());
    let done = Arc::new(AtomicBool::new(false));
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let width = config.width;

    let start = Instant::now();

    let readers: Vec<_> = (0..config.threads)
        .map(|_| {
            let cell = cell.clone();
            let done = Arc::clone(&done);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);

            thread::spawn(move || loop {
                let finished = done.load(Ordering::Acquire);
                if is_whole_snapshot(&cell.load(), width) {
                    successful.fetch_add(1, Ordering::Relaxed);
                } else {
                    failed.fetch_add(1, Ordering::Relaxed);
                }
                if finished {
                    break;
                }
            })
        })
        .collect();

    for version in 1..=config.operations as u64 {
        match commit_version(&cell, version, width) {
            Ok(()) => successful.fetch_add(1, Ordering::Relaxed),
            Err(_) => failed.fetch_add(1, Ordering::Relaxed),
        };
    }
    done.store(true, Ordering::Release);

    for handle in readers {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run transactions where every other one rolls back.
///
/// Rolled-back transactions count as failures; the published map must only
/// reflect committed ones.
pub fn stress_transaction_aborts(config: &StressConfig) -> (StressTestResult, VersionMap) {
    let cell = SnapshotCell::new(VersionMap::new());

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let key = i as u32;
        let mut memory = fresh_memory();
        let map = cell.load();
        if map.put(&mut memory, key, i as u64).is_err() {
            failed += 1;
            continue;
        }

        if i % 2 == 0 {
            memory.rollback();
            failed += 1;
            continue;
        }
        memory.register_consumer(cell.consumer());
        match memory.commit() {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    (StressTestResult::new(successful, failed, start.elapsed()), cell.load())
}
