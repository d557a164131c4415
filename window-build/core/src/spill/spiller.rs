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

use std::sync::Arc;

use log::debug;
use window_build_common::config::{PrefixSortConfig, SpillConfig};
use window_build_common::{human_readable_size, internal_err, Result};
use window_build_execution::DiskManager;

use super::{IPCStreamWriter, SpillPartition, SpillPartitionSet, SpillRun};
use crate::metrics::{SpillMetrics, SpillStats};
use crate::prefix_sort::PrefixSort;
use crate::row_container::{RowContainer, RowContainerIterator, RowLayout};

/// Writes the buffered input rows of a window build to disk as sorted runs.
///
/// Every call to [`Self::spill`] sorts the rows of a [`RowContainer`] by the
/// container's [`RowLayout`], the same ordering the in-memory path sorts
/// by, and writes them as one run. All runs end up in a single
/// [`SpillPartition`], which merges them back in order.
#[derive(Debug)]
pub struct SortInputSpiller {
    layout: Arc<RowLayout>,
    spill_config: SpillConfig,
    prefix_sort_config: PrefixSortConfig,
    disk_manager: Arc<DiskManager>,
    metrics: SpillMetrics,
    runs: Vec<SpillRun>,
    finished: bool,
}

impl SortInputSpiller {
    pub fn new(
        layout: Arc<RowLayout>,
        spill_config: SpillConfig,
        prefix_sort_config: PrefixSortConfig,
        disk_manager: Arc<DiskManager>,
        metrics: SpillMetrics,
    ) -> Self {
        Self {
            layout,
            spill_config,
            prefix_sort_config,
            disk_manager,
            metrics,
            runs: vec![],
            finished: false,
        }
    }

    /// Sorts the rows of `container` and writes them as one run. The
    /// container is left untouched. Does nothing if it holds no rows.
    pub fn spill(&mut self, container: &RowContainer) -> Result<()> {
        if self.finished {
            return internal_err!("Spill after the spiller was finished");
        }
        if container.is_empty() {
            return Ok(());
        }
        let mut timer = self.metrics.spill_write_time.timer();

        let mut rows = Vec::with_capacity(container.num_rows());
        container.list_rows(
            &mut RowContainerIterator::default(),
            container.num_rows(),
            &mut rows,
        );
        PrefixSort::sort(container, &self.prefix_sort_config, &mut rows);

        let mut file = self.disk_manager.create_tmp_file("SortWindowBuild spill")?;
        let mut writer = IPCStreamWriter::new(file.path(), self.layout.schema())?;
        for chunk in rows.chunks(self.spill_config.write_batch_rows) {
            let batch = self
                .layout
                .decode_batch(chunk.iter().map(|id| container.row(*id)))?;
            writer.write(&batch)?;
        }
        let (num_batches, num_rows, num_bytes) =
            (writer.num_batches, writer.num_rows, writer.num_bytes);
        writer.finish()?;
        file.update_disk_usage()?;
        timer.stop();

        self.metrics.spill_file_count.add(1);
        self.metrics.spilled_rows.add(num_rows);
        self.metrics.spilled_bytes.add(num_bytes);
        self.metrics
            .spilled_disk_bytes
            .add(file.current_disk_usage() as usize);
        debug!(
            "Spilled run of {num_rows} rows in {num_batches} batches ({}) to {:?}",
            human_readable_size(num_bytes),
            file.path()
        );

        self.runs.push(SpillRun { file, num_rows });
        Ok(())
    }

    /// Moves every run written so far into a single spill partition of
    /// `partitions`. No more runs can be written afterwards.
    pub fn finish_spill(&mut self, partitions: &mut SpillPartitionSet) -> Result<()> {
        if self.finished {
            return internal_err!("Spiller already finished");
        }
        self.finished = true;
        let partition =
            SpillPartition::new(0, Arc::clone(&self.layout), std::mem::take(&mut self.runs));
        if partitions.insert(partition.id(), partition).is_some() {
            return internal_err!("Spill partition 0 already exists");
        }
        Ok(())
    }

    pub fn num_runs(&self) -> usize {
        self.runs.len()
    }

    pub fn stats(&self) -> SpillStats {
        self.metrics.stats()
    }
}
