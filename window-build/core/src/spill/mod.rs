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

//! Spilling of buffered rows to disk as sorted runs, and reading them back
//! as a single ordered stream

mod merge;
mod spiller;

pub use merge::{SpillMergeStream, SpillRowCursor};
pub use spiller::SortInputSpiller;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use arrow::datatypes::Schema;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use window_build_common::{exec_window_err, Result};
use window_build_execution::disk_manager::RefCountedTempFile;

use crate::metrics::SpillMetrics;
use crate::row_container::RowLayout;

/// Identifies a group of spilled runs that are read back together
pub type SpillPartitionId = u32;

/// All spill partitions produced by a spiller, ordered by id
pub type SpillPartitionSet = BTreeMap<SpillPartitionId, SpillPartition>;

/// A sorted run of rows written to a single temporary file as an arrow IPC
/// stream
#[derive(Debug, Clone)]
pub struct SpillRun {
    file: RefCountedTempFile,
    num_rows: usize,
}

impl SpillRun {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }
}

/// The sorted runs of one spill partition
#[derive(Debug)]
pub struct SpillPartition {
    id: SpillPartitionId,
    layout: Arc<RowLayout>,
    runs: Vec<SpillRun>,
}

impl SpillPartition {
    pub fn new(id: SpillPartitionId, layout: Arc<RowLayout>, runs: Vec<SpillRun>) -> Self {
        Self { id, layout, runs }
    }

    pub fn id(&self) -> SpillPartitionId {
        self.id
    }

    pub fn runs(&self) -> &[SpillRun] {
        &self.runs
    }

    pub fn num_rows(&self) -> usize {
        self.runs.iter().map(SpillRun::num_rows).sum()
    }

    /// Opens every run and merges them into one stream ordered by the
    /// row layout. Each run is read through a buffer of `read_buffer_size`
    /// bytes.
    pub fn create_ordered_reader(
        self,
        read_buffer_size: usize,
        metrics: SpillMetrics,
    ) -> Result<SpillMergeStream> {
        SpillMergeStream::try_new(self.layout, self.runs, read_buffer_size, metrics)
    }
}

/// Writes record batches to a file in the arrow IPC stream format
struct IPCStreamWriter {
    /// Inner writer
    writer: StreamWriter<BufWriter<File>>,
    /// Batches written
    num_batches: usize,
    /// Rows written
    num_rows: usize,
    /// Bytes written, as measured in memory
    num_bytes: usize,
}

impl IPCStreamWriter {
    /// Create new writer
    fn new(path: &Path, schema: &Schema) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            exec_window_err!("Failed to create spill file at {path:?}: {e:?}")
        })?;
        Ok(Self {
            num_batches: 0,
            num_rows: 0,
            num_bytes: 0,
            writer: StreamWriter::try_new(BufWriter::new(file), schema)?,
        })
    }

    /// Write one single batch
    fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        self.writer.write(batch)?;
        self.num_batches += 1;
        self.num_rows += batch.num_rows();
        self.num_bytes += batch.get_array_memory_size();
        Ok(())
    }

    /// Finish the writer and flush everything to the file
    fn finish(self) -> Result<()> {
        let mut file = self.writer.into_inner()?;
        file.flush()?;
        Ok(())
    }
}
