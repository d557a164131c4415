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

//! [`SortWindowBuild`]: a [`WindowBuild`] that groups rows into partitions
//! by sorting them, spilling sorted runs to disk under memory pressure

use std::fmt::{self, Debug};
use std::mem::size_of;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use log::{debug, trace, warn};
use window_build_common::config::WindowBuildConfig;
use window_build_common::{
    assert_eq_or_internal_err, human_readable_size, internal_err, Result,
};
use window_build_execution::memory_pool::{
    MemoryConsumer, MemoryReclaimer, MemoryReservation,
};
use window_build_execution::RuntimeEnv;

use crate::compare::make_compare_flags;
use crate::metrics::{SpillMetrics, SpillStats};
use crate::partition::WindowPartition;
use crate::prefix_sort::PrefixSort;
use crate::row_container::{RowContainer, RowContainerIterator, RowId, RowLayout};
use crate::spill::{SortInputSpiller, SpillMergeStream, SpillPartitionSet};
use crate::window_build::{InputChannels, WindowBuild, WindowKeys};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildState {
    /// Accepting input
    Building,
    /// Inside `no_more_input`
    Finalizing,
    /// Handing out partitions
    Draining,
    /// All partitions were handed out
    Done,
}

/// Sort based [`WindowBuild`].
///
/// Input rows are buffered in a [`RowContainer`]. At [`WindowBuild::no_more_input`]
/// the row handles are sorted by partition keys then ORDER BY keys and the
/// partition boundaries are located in the sorted sequence, after which
/// partitions are returned straight from memory.
///
/// If spilling is enabled, buffered rows may be written to disk as sorted
/// runs, either when forced by [`SpillConfig::testing_force_spill`] or when
/// a memory governor asks through the shared [`MemoryReclaimer`]. Once a
/// build has spilled, all remaining rows are spilled too at the end of the
/// input and partitions are then read back one at a time from a merge of
/// all runs.
///
/// ```text
///                    no_more_input
///   add_input ─────┬──────────────────────┐
///       │          │ never spilled        │ spilled
///       ▼          ▼                      ▼
///   RowContainer   sort + boundaries      final spill + merge stream
///                  │                      │
///                  ▼                      ▼
///            memory partitions      partitions loaded from spill
/// ```
///
/// [`SpillConfig::testing_force_spill`]: window_build_common::config::SpillConfig::testing_force_spill
pub struct SortWindowBuild {
    input_schema: SchemaRef,
    keys: WindowKeys,
    channels: InputChannels,
    config: WindowBuildConfig,
    runtime: Arc<RuntimeEnv>,
    reclaimer: Arc<MemoryReclaimer>,
    /// Input rows before spilling, or the rows of the current partition
    /// when reading back from spill
    data: RowContainer,
    /// Memory of the sorted row handles, the partition boundaries and the
    /// sort scratch space
    sort_reservation: MemoryReservation,
    num_rows: usize,
    /// All rows in partition order, or the rows of the current partition
    /// when reading back from spill
    sorted_rows: Vec<RowId>,
    /// Index in `sorted_rows` of the first row of each partition, followed
    /// by the number of rows
    partition_start_rows: Vec<usize>,
    /// Partition last returned by `next_partition`
    current_partition: Option<usize>,
    spiller: Option<SortInputSpiller>,
    merge: Option<SpillMergeStream>,
    spill_metrics: SpillMetrics,
    /// A partition was loaded from spill and not returned yet
    partition_loaded: bool,
    state: BuildState,
}

impl Debug for SortWindowBuild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortWindowBuild")
            .field("keys", &self.keys)
            .field("num_rows", &self.num_rows)
            .field("state", &self.state)
            .field("spilled", &self.spiller.is_some())
            .field("num_partitions", &self.num_partitions())
            .finish()
    }
}

impl SortWindowBuild {
    pub fn try_new(
        input_schema: SchemaRef,
        keys: WindowKeys,
        config: WindowBuildConfig,
        runtime: Arc<RuntimeEnv>,
        reclaimer: Arc<MemoryReclaimer>,
    ) -> Result<Self> {
        config.validate()?;
        let channels = InputChannels::try_new(input_schema.fields().len(), &keys)?;
        let compare_flags =
            make_compare_flags(keys.partition_by.len(), &keys.sorting_orders());
        let layout = RowLayout::try_new(
            channels.stored_schema(&input_schema),
            &channels,
            compare_flags,
        )?;

        let reservation = MemoryConsumer::new("SortWindowBuild")
            .with_can_spill(config.spill_enabled())
            .register(&runtime.memory_pool);
        let sort_reservation = reservation.new_empty();
        let data = RowContainer::new(Arc::new(layout), config.row_container, reservation);

        Ok(Self {
            input_schema,
            keys,
            channels,
            config,
            runtime,
            reclaimer,
            data,
            sort_reservation,
            num_rows: 0,
            sorted_rows: vec![],
            partition_start_rows: vec![],
            current_partition: None,
            spiller: None,
            merge: None,
            spill_metrics: SpillMetrics::new(),
            partition_loaded: false,
            state: BuildState::Building,
        })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.input_schema
    }

    pub fn reclaimer(&self) -> &Arc<MemoryReclaimer> {
        &self.reclaimer
    }

    /// Bytes currently reserved from the memory pool
    pub fn reserved_bytes(&self) -> usize {
        self.data.reservation().size() + self.sort_reservation.size()
    }

    /// Returns true once rows were written to disk
    pub fn spilled(&self) -> bool {
        self.spiller.is_some()
    }

    /// Partition boundaries computed for the in-memory path
    pub fn partition_start_rows(&self) -> &[usize] {
        &self.partition_start_rows
    }

    /// Number of partitions of the in-memory path, `None` when reading
    /// back from spill
    pub fn num_partitions(&self) -> Option<usize> {
        self.merge
            .is_none()
            .then(|| self.partition_start_rows.len().saturating_sub(1))
    }

    /// Makes sure the rows of `batch` fit into memory before they are
    /// stored, growing the reservation when they may not.
    ///
    /// Failing to grow the reservation is not an error: the rows are stored
    /// anyway and the pool reports true exhaustion when the memory is
    /// actually allocated.
    pub fn ensure_input_fits(&mut self, batch: &RecordBatch) -> Result<()> {
        let Some(spill_config) = self.config.spill.clone() else {
            return Ok(());
        };
        if self.data.is_empty() {
            return Ok(());
        }
        if spill_config.testing_force_spill {
            return self.spill();
        }
        if self.maybe_reclaim()? {
            return Ok(());
        }

        let input_rows = batch.num_rows();
        let (free_rows, free_bytes) = self.data.free_space();
        let variable_bytes = self.data.variable_bytes();
        let variable_bytes_per_row = variable_bytes / self.data.num_rows();
        let input_variable_bytes = variable_bytes_per_row * input_rows;

        let reservation = self.data.reservation();
        let current_usage = reservation.used();
        let min_reservation_bytes =
            current_usage * spill_config.min_spillable_reservation_pct / 100;
        let increment_bytes = self.data.size_increment(input_rows, input_variable_bytes);

        if reservation.available() >= min_reservation_bytes
            && free_rows > input_rows
            && (variable_bytes == 0 || free_bytes >= input_variable_bytes)
        {
            return Ok(());
        }

        let target_increment_bytes = (increment_bytes * 2)
            .max(current_usage * spill_config.spillable_reservation_growth_pct / 100);
        let reserved = {
            let _guard = self.reclaimer.enter_non_reclaimable();
            self.data
                .reservation_mut()
                .maybe_reserve(target_increment_bytes)
        };
        if self.maybe_reclaim()? || reserved {
            return Ok(());
        }

        let reservation = self.data.reservation();
        warn!(
            "Failed to reserve {} for memory pool {}, usage: {}, reservation: {}",
            human_readable_size(target_increment_bytes),
            reservation.name(),
            human_readable_size(reservation.used()),
            human_readable_size(reservation.size())
        );
        Ok(())
    }

    /// Reserves memory for sorting all buffered rows. Best effort, a failed
    /// reservation is only logged.
    pub fn ensure_sort_fits(&mut self) -> Result<()> {
        let Some(spill_config) = self.config.spill.clone() else {
            return Ok(());
        };
        if spill_config.testing_force_spill {
            return self.spill();
        }
        if self.maybe_reclaim()? || self.spiller.is_some() {
            return Ok(());
        }

        let sort_buffer_bytes = self.num_rows * (size_of::<RowId>() + size_of::<usize>())
            + PrefixSort::max_required_bytes(&self.data, &self.config.prefix_sort);
        let reserved = {
            let _guard = self.reclaimer.enter_non_reclaimable();
            self.sort_reservation.maybe_reserve(sort_buffer_bytes)
        };
        if self.maybe_reclaim()? || reserved {
            return Ok(());
        }

        let reservation = self.data.reservation();
        warn!(
            "Failed to reserve {} for sort window build from memory pool {}, usage: {}, reservation: {}",
            human_readable_size(sort_buffer_bytes),
            reservation.name(),
            human_readable_size(reservation.used() + self.sort_reservation.used()),
            human_readable_size(self.reserved_bytes())
        );
        Ok(())
    }

    /// Spills if a reclaim was requested since the last check. Returns true
    /// if rows were spilled.
    fn maybe_reclaim(&mut self) -> Result<bool> {
        if !self.reclaimer.take_reclaim_request() {
            return Ok(false);
        }
        if self.config.spill.is_none() || self.data.is_empty() {
            debug!("Ignoring reclaim request, nothing to spill");
            return Ok(false);
        }
        debug!(
            "Spilling {} rows ({}) on reclaim request",
            self.data.num_rows(),
            human_readable_size(self.data.reservation().size())
        );
        self.spill()?;
        Ok(true)
    }

    /// Sorts all buffered rows and computes the partition boundaries
    pub fn sort_partitions(&mut self) -> Result<()> {
        self.sort_reservation
            .try_allocate(self.num_rows * size_of::<RowId>())?;
        let mut sorted_rows = Vec::with_capacity(self.num_rows);
        self.data.list_rows(
            &mut RowContainerIterator::default(),
            self.num_rows,
            &mut sorted_rows,
        );
        assert_eq_or_internal_err!(
            sorted_rows.len(),
            self.num_rows,
            "Row container lost rows"
        );

        let scratch_bytes =
            PrefixSort::max_required_bytes(&self.data, &self.config.prefix_sort);
        self.sort_reservation.try_allocate(scratch_bytes)?;
        PrefixSort::sort(&self.data, &self.config.prefix_sort, &mut sorted_rows);
        self.sort_reservation.deallocate(scratch_bytes);
        self.sorted_rows = sorted_rows;

        self.compute_partition_start_rows()
    }

    /// Locates the first row of every partition in the sorted rows
    pub fn compute_partition_start_rows(&mut self) -> Result<()> {
        if self.sorted_rows.is_empty() {
            return internal_err!("No sorted rows to partition");
        }
        let data = &self.data;
        let rows = &self.sorted_rows;

        let mut partition_start_rows = vec![0];
        let mut start = 0;
        while start < rows.len() {
            let next = find_next_partition_start_row(rows.len(), start, |left, right| {
                data.partition_keys_equal(rows[left], rows[right])
            });
            partition_start_rows.push(next);
            start = next;
        }

        self.sort_reservation
            .try_allocate(partition_start_rows.len() * size_of::<usize>())?;
        self.partition_start_rows = partition_start_rows;
        Ok(())
    }

    fn setup_spiller(&mut self) -> Result<()> {
        if self.spiller.is_some() {
            return Ok(());
        }
        let Some(spill_config) = self.config.spill.clone() else {
            return internal_err!("Spilling is disabled for this window build");
        };
        self.spiller = Some(SortInputSpiller::new(
            Arc::clone(self.data.layout()),
            spill_config,
            self.config.prefix_sort,
            Arc::clone(&self.runtime.disk_manager),
            self.spill_metrics.clone(),
        ));
        Ok(())
    }

    /// Replaces the buffered rows with the rows of the next partition of
    /// the merge stream. Leaves the buffer empty once the stream is
    /// exhausted.
    fn load_next_partition_from_spill(&mut self) -> Result<()> {
        self.sorted_rows.clear();
        self.data.clear();
        let Some(merge) = self.merge.as_mut() else {
            return internal_err!("No spill merge stream to load partitions from");
        };

        while let Some(cursor) = merge.next()? {
            if let Some(last) = self.sorted_rows.last() {
                if !self.data.partition_key_matches(*last, cursor.partition_key()) {
                    break;
                }
            }
            let row = self.data.append_row(cursor.row(), cursor.partition_len())?;
            self.sorted_rows.push(row);
            merge.pop()?;
        }
        trace!("Loaded partition of {} rows from spill", self.sorted_rows.len());
        Ok(())
    }

    fn partition(&self, start: usize, end: usize) -> WindowPartition<'_> {
        WindowPartition::new(
            &self.data,
            &self.sorted_rows[start..end],
            self.channels.inversed_input_channels(),
            &self.input_schema,
            &self.keys.order_by,
        )
    }
}

impl WindowBuild for SortWindowBuild {
    fn add_input(&mut self, batch: &RecordBatch) -> Result<()> {
        if self.state != BuildState::Building {
            return internal_err!("Window build received input after no_more_input");
        }
        assert_eq_or_internal_err!(
            batch.num_columns(),
            self.input_schema.fields().len(),
            "Input batch does not match the window build schema"
        );
        let columns = self.channels.project(batch);

        self.ensure_input_fits(batch)?;

        let num_rows = self.data.store_columns(&columns)?;
        self.num_rows += num_rows;
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        if !matches!(self.state, BuildState::Building | BuildState::Finalizing) {
            return internal_err!("Window build can not spill after no_more_input");
        }
        self.setup_spiller()?;
        if let Some(spiller) = self.spiller.as_mut() {
            spiller.spill(&self.data)?;
        }
        self.data.clear();
        self.data.reservation_mut().release();
        Ok(())
    }

    fn no_more_input(&mut self) -> Result<()> {
        if self.state != BuildState::Building {
            return internal_err!("no_more_input called twice on window build");
        }
        self.state = BuildState::Finalizing;

        if self.num_rows > 0 {
            self.ensure_sort_fits()?;

            if self.spiller.is_some() {
                // Spill the remaining rows so that every partition is read
                // back from disk
                self.spill()?;

                let mut spill_partition_set = SpillPartitionSet::new();
                if let Some(spiller) = self.spiller.as_mut() {
                    spiller.finish_spill(&mut spill_partition_set)?;
                }
                assert_eq_or_internal_err!(
                    spill_partition_set.len(),
                    1,
                    "Expected exactly one spill partition"
                );
                if let Some((_, partition)) = spill_partition_set.pop_first() {
                    debug!(
                        "Reading {} spilled rows back from {} runs",
                        partition.num_rows(),
                        partition.runs().len()
                    );
                    let read_buffer_size = self
                        .config
                        .spill
                        .as_ref()
                        .map(|spill| spill.read_buffer_size)
                        .unwrap_or_default();
                    self.merge = Some(partition.create_ordered_reader(
                        read_buffer_size,
                        self.spill_metrics.clone(),
                    )?);
                }
            } else {
                self.sort_partitions()?;
                debug!(
                    "Sorted {} rows into {} partitions in memory",
                    self.num_rows,
                    self.partition_start_rows.len() - 1
                );
            }
        }

        // Release the unused memory reservation after processing input
        self.data.reservation_mut().release();
        self.sort_reservation.release();
        self.state = BuildState::Draining;
        Ok(())
    }

    fn has_next_partition(&mut self) -> Result<bool> {
        match self.state {
            BuildState::Building | BuildState::Finalizing => {
                return internal_err!("has_next_partition called before no_more_input")
            }
            BuildState::Done => return Ok(false),
            BuildState::Draining => {}
        }

        let has_next = if self.merge.is_some() {
            if !self.partition_loaded {
                self.load_next_partition_from_spill()?;
                self.partition_loaded = !self.sorted_rows.is_empty();
            }
            self.partition_loaded
        } else {
            let next = self.current_partition.map_or(0, |p| p + 1);
            next + 1 < self.partition_start_rows.len()
        };
        if !has_next {
            self.state = BuildState::Done;
        }
        Ok(has_next)
    }

    fn next_partition(&mut self) -> Result<WindowPartition<'_>> {
        match self.state {
            BuildState::Building | BuildState::Finalizing => {
                return internal_err!("next_partition called before no_more_input")
            }
            BuildState::Done => return internal_err!("All window partitions consumed"),
            BuildState::Draining => {}
        }

        if self.merge.is_some() {
            if !self.partition_loaded {
                return internal_err!("No window partitions available");
            }
            self.partition_loaded = false;
            return Ok(self.partition(0, self.sorted_rows.len()));
        }

        if self.partition_start_rows.is_empty() {
            return internal_err!("No window partitions available");
        }
        let next = self.current_partition.map_or(0, |p| p + 1);
        if next + 1 >= self.partition_start_rows.len() {
            return internal_err!("All window partitions consumed");
        }
        self.current_partition = Some(next);
        let (start, end) = (
            self.partition_start_rows[next],
            self.partition_start_rows[next + 1],
        );
        Ok(self.partition(start, end))
    }

    fn spilled_stats(&self) -> Option<SpillStats> {
        self.spiller.as_ref().map(SortInputSpiller::stats)
    }

    fn num_rows(&self) -> usize {
        self.num_rows
    }
}

/// Returns the index of the first row after `start` that is not in the
/// partition of row `start`, or `num_rows` if there is none.
///
/// `same_partition(a, b)` tells whether rows `a` and `b` of the sorted
/// sequence have equal partition keys. Instead of comparing every row with
/// row `start`, the search steps out at exponentially growing distances and,
/// on the first mismatch, narrows the range and restarts the search from
/// the last matching row. This needs O(log n) comparisons for a partition
/// of n rows and a single one when every row is its own partition.
pub fn find_next_partition_start_row(
    num_rows: usize,
    start: usize,
    mut same_partition: impl FnMut(usize, usize) -> bool,
) -> usize {
    let mut left = start;
    let mut right = left + 1;
    let mut last_position = num_rows;
    while right < last_position {
        let mut distance = 1;
        while distance < last_position - left {
            right = left + distance;
            if !same_partition(left, right) {
                last_position = right;
                break;
            }
            distance *= 2;
        }
        left += distance / 2;
        right = left + 1;
    }
    right
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rstest::rstest;

    fn linear_scan(keys: &[u32], start: usize) -> usize {
        (start + 1..keys.len())
            .find(|idx| keys[*idx] != keys[start])
            .unwrap_or(keys.len())
    }

    fn boundaries(keys: &[u32]) -> Vec<usize> {
        let mut starts = vec![0];
        let mut start = 0;
        while start < keys.len() {
            start = find_next_partition_start_row(keys.len(), start, |a, b| keys[a] == keys[b]);
            starts.push(start);
        }
        starts
    }

    #[rstest]
    #[case::single_row(vec![7])]
    #[case::one_partition(vec![1; 1000])]
    #[case::all_distinct((0..1000).collect())]
    #[case::two_partitions(vec![1, 1, 1, 2])]
    #[case::power_of_two_sizes([vec![1; 64], vec![2; 128], vec![3; 1]].concat())]
    fn matches_linear_scan(#[case] keys: Vec<u32>) {
        for start in 0..keys.len() {
            assert_eq!(
                find_next_partition_start_row(keys.len(), start, |a, b| keys[a] == keys[b]),
                linear_scan(&keys, start),
                "start {start}"
            );
        }
    }

    #[test]
    fn example_boundaries() {
        // A A B B B C
        assert_eq!(boundaries(&[0, 0, 1, 1, 1, 2]), vec![0, 2, 5, 6]);
    }

    #[test]
    fn random_partition_sizes() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let num_partitions = rng.random_range(1..30);
            let mut keys = vec![];
            for key in 0..num_partitions {
                let size = if rng.random_bool(0.2) {
                    rng.random_range(1..300)
                } else {
                    rng.random_range(1..5)
                };
                keys.extend(std::iter::repeat_n(key, size));
            }

            let starts = boundaries(&keys);
            assert_eq!(starts[0], 0);
            assert_eq!(*starts.last().unwrap(), keys.len());
            assert_eq!(starts.len(), num_partitions as usize + 1);
            assert!(starts.windows(2).all(|w| w[0] < w[1]));
            for w in starts.windows(2) {
                assert_eq!(w[1], linear_scan(&keys, w[0]));
            }
        }
    }

    #[test]
    fn logarithmic_comparisons_for_one_partition() {
        let mut comparisons = 0;
        let next = find_next_partition_start_row(1 << 16, 0, |_, _| {
            comparisons += 1;
            true
        });
        assert_eq!(next, 1 << 16);
        assert!(comparisons <= 16 * 17, "{comparisons} comparisons");
    }
}
