//! Stress helpers.
//!
//! These drive the safe layer from several threads at once to shake out
//! ordering problems between guards, releases and query rounds.

use crate::fixtures::TestArray;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tessera::{Array, Error, IncompleteDriver, Query, QueryType};
use tracing::debug;

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
    /// Operations per thread.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Initial read buffer size in elements.
    pub buffer_elements: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 200,
            threads: 4,
            buffer_elements: 2,
        }
    }
}

/// Acquires guards on a shared array from every thread while the main
/// thread releases it halfway through.
///
/// Acquisitions refused with [`Error::Released`] count as failed; any other
/// error panics. The array is freed exactly once whatever the interleaving.
pub fn stress_guard_release(array: Array, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(config.threads + 1));

    let start = Instant::now();
    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let array = array.clone();
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let barrier = Arc::clone(&barrier);
            let operations = config.operations;

            thread::spawn(move || {
                barrier.wait();
                for _ in 0..operations {
                    match array.is_open() {
                        Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(Error::Released { .. }) => failed.fetch_add(1, Ordering::Relaxed),
                        Err(other) => panic!("unexpected error: {other}"),
                    };
                }
            })
        })
        .collect();

    barrier.wait();
    thread::yield_now();
    debug!(threads = config.threads, "releasing shared array");
    array.handle().release();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Every thread reads the whole array through its own query, starting from
/// tiny buffers, `config.operations` times.
///
/// A read counts as successful when it delivers `expected_cells` cells of
/// attribute `a`.
pub fn stress_concurrent_reads(array: &TestArray, expected_cells: u64, config: &StressConfig) -> StressTestResult {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);

    let start = Instant::now();
    thread::scope(|scope| {
        for _ in 0..config.threads {
            scope.spawn(|| {
                let opened = array.open(QueryType::Read);
                for _ in 0..config.operations {
                    let outcome = read_all(&opened, config.buffer_elements);
                    match outcome {
                        Ok(cells) if cells == expected_cells => successful.fetch_add(1, Ordering::Relaxed),
                        _ => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
    });

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

fn read_all(array: &Array, buffer_elements: usize) -> tessera::Result<u64> {
    let query = Query::new(array, QueryType::Read)?;
    query.set_data_buffer("a", vec![0i32; buffer_elements])?;
    let summary = IncompleteDriver::new(&query).run(|_| Ok(()))?;
    Ok(summary.cells.get("a").copied().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::scenarios;
    use crate::native_addr;

    #[test]
    fn guard_release_frees_once() {
        let fixture = TestArray::int(None);
        let array = fixture.open(QueryType::Read);
        let addr = native_addr!(array);
        let config = StressConfig {
            operations: 100,
            ..Default::default()
        };
        let result = stress_guard_release(array, &config);
        assert_eq!(result.total_ops, 400);
        assert_eq!(tessera_sim::free_count(addr), 1);
        assert!(tessera_sim::violations_for(addr).is_empty());
    }

    #[test]
    fn concurrent_reads_all_complete() {
        let fixture = scenarios::counted(25);
        let config = StressConfig {
            operations: 5,
            threads: 3,
            buffer_elements: 2,
        };
        let result = stress_concurrent_reads(&fixture, 25, &config);
        assert_eq!(result.successful_ops, 15);
        assert_eq!(result.failed_ops, 0);
    }
}
