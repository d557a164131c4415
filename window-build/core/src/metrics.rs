// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Metrics recorded while spilling and reading back spilled rows

use std::fmt::{self, Display};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use window_build_common::human_readable_size;

/// A counter to record things such as number of spilled rows.
///
/// Clones share the underlying value.
#[derive(Debug, Clone, Default)]
pub struct Count {
    /// value of the metric counter
    value: Arc<AtomicUsize>,
}

impl PartialEq for Count {
    fn eq(&self, other: &Self) -> bool {
        self.value().eq(&other.value())
    }
}

impl Display for Count {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl Count {
    /// create a new counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `n` to the metric's value
    pub fn add(&self, n: usize) {
        // relaxed ordering for operations on `value` poses no issues
        // we're purely using atomic ops with no associated memory ops
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get the current value
    pub fn value(&self) -> usize {
        self.value.load(Ordering::Relaxed)
    }
}

/// Measure a potentially non contiguous duration of time
#[derive(Debug, Clone, Default)]
pub struct Time {
    /// elapsed time, in nanoseconds
    nanos: Arc<AtomicUsize>,
}

impl PartialEq for Time {
    fn eq(&self, other: &Self) -> bool {
        self.value().eq(&other.value())
    }
}

impl Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let duration = Duration::from_nanos(self.value() as u64);
        write!(f, "{duration:?}")
    }
}

impl Time {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add elapsed nanoseconds since `start` to self
    pub fn add_elapsed(&self, start: Instant) {
        self.add_duration(start.elapsed());
    }

    /// Add duration of time to self
    ///
    /// Note: this will always increment the recorded time by at least 1 nanosecond
    /// to distinguish between the scenario of no values recorded, in which
    /// case the value will be 0, and no measurable amount of time having passed,
    /// in which case the value will be small but not 0.
    pub fn add_duration(&self, duration: Duration) {
        let more_nanos = duration.as_nanos() as usize;
        self.nanos.fetch_add(more_nanos.max(1), Ordering::Relaxed);
    }

    /// Return a scoped guard that adds the amount of time elapsed
    /// between its creation and its drop or call to `stop` to the
    /// underlying metric.
    pub fn timer(&self) -> ScopedTimerGuard<'_> {
        ScopedTimerGuard {
            inner: self,
            start: Some(Instant::now()),
        }
    }

    /// Get the number of nanoseconds record by this Time metric
    pub fn value(&self) -> usize {
        self.nanos.load(Ordering::Relaxed)
    }
}

/// RAII structure that records the time elapsed between its creation
/// and its drop into a [`Time`]
#[derive(Debug)]
pub struct ScopedTimerGuard<'a> {
    inner: &'a Time,
    start: Option<Instant>,
}

impl ScopedTimerGuard<'_> {
    /// Stop the timer timing and record the time taken
    pub fn stop(&mut self) {
        if let Some(start) = self.start.take() {
            self.inner.add_elapsed(start)
        }
    }

    /// Stop the timer, record the time taken and consume self
    pub fn done(mut self) {
        self.stop()
    }
}

impl Drop for ScopedTimerGuard<'_> {
    fn drop(&mut self) {
        self.stop()
    }
}

/// Metrics of the spill files written and read by one window build.
///
/// Clones share the same counters, so the spiller and the merge stream
/// record into the metrics owned by the build.
#[derive(Debug, Clone, Default)]
pub struct SpillMetrics {
    /// Number of sorted runs written
    pub spill_file_count: Count,
    /// Number of rows written to spill files
    pub spilled_rows: Count,
    /// Size of the spilled batches in memory
    pub spilled_bytes: Count,
    /// Size of the spill files on disk
    pub spilled_disk_bytes: Count,
    /// Time spent sorting and writing runs
    pub spill_write_time: Time,
    /// Number of spilled rows read back by merge streams
    pub spill_read_rows: Count,
    /// Time spent reading and merging runs
    pub spill_read_time: Time,
}

impl SpillMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A point in time copy of the current values
    pub fn stats(&self) -> SpillStats {
        SpillStats {
            spill_runs: self.spill_file_count.value(),
            spilled_rows: self.spilled_rows.value(),
            spilled_bytes: self.spilled_bytes.value(),
            spilled_disk_bytes: self.spilled_disk_bytes.value(),
            spill_write_nanos: self.spill_write_time.value(),
            spill_read_rows: self.spill_read_rows.value(),
            spill_read_nanos: self.spill_read_time.value(),
        }
    }
}

/// Snapshot of [`SpillMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpillStats {
    pub spill_runs: usize,
    pub spilled_rows: usize,
    pub spilled_bytes: usize,
    pub spilled_disk_bytes: usize,
    pub spill_write_nanos: usize,
    pub spill_read_rows: usize,
    pub spill_read_nanos: usize,
}

impl Display for SpillStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "spill_runs={}, spilled_rows={}, spilled_bytes={}, spilled_disk_bytes={}, \
             spill_write_time={:?}, spill_read_rows={}, spill_read_time={:?}",
            self.spill_runs,
            self.spilled_rows,
            human_readable_size(self.spilled_bytes),
            human_readable_size(self.spilled_disk_bytes),
            Duration::from_nanos(self.spill_write_nanos as u64),
            self.spill_read_rows,
            Duration::from_nanos(self.spill_read_nanos as u64),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_is_shared_by_clones() {
        let count = Count::new();
        let clone = count.clone();
        count.add(3);
        clone.add(4);
        assert_eq!(count.value(), 7);
        assert_eq!(count, clone);
        assert_eq!(count.to_string(), "7");
    }

    #[test]
    fn timer_records_at_least_one_nano() {
        let time = Time::new();
        assert_eq!(time.value(), 0);
        time.timer().done();
        assert!(time.value() >= 1);

        let before = time.value();
        {
            let _timer = time.timer();
        }
        assert!(time.value() > before);
    }

    #[test]
    fn stats_snapshot() {
        let metrics = SpillMetrics::new();
        metrics.spill_file_count.add(2);
        metrics.spilled_rows.add(100);
        metrics.spilled_bytes.add(4 * 1024);

        let stats = metrics.clone().stats();
        assert_eq!(stats.spill_runs, 2);
        assert_eq!(stats.spilled_rows, 100);
        assert_eq!(stats.spill_read_rows, 0);

        metrics.spill_read_rows.add(100);
        assert_eq!(stats.spill_read_rows, 0);
        assert_eq!(metrics.stats().spill_read_rows, 100);
        assert!(stats.to_string().contains("spilled_bytes=4.0 KB"));
    }
}
