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

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use arrow::ipc::reader::StreamReader;
use log::trace;
use window_build_common::{internal_err, Result};
use window_build_execution::disk_manager::RefCountedTempFile;

use super::SpillRun;
use crate::metrics::SpillMetrics;
use crate::row_container::{EncodedRows, RowLayout};

/// Reads the batches of one sorted run and keeps the current batch in its
/// encoded row form
struct SpillRunReader {
    reader: StreamReader<BufReader<File>>,
    /// Keeps the spill file alive while it is read
    _file: RefCountedTempFile,
    rows: EncodedRows,
    /// Index of the current row in `rows`
    pos: usize,
}

impl SpillRunReader {
    fn try_new(run: SpillRun, read_buffer_size: usize) -> Result<Self> {
        let file = File::open(run.path())?;
        let reader =
            StreamReader::try_new(BufReader::with_capacity(read_buffer_size, file), None)?;
        Ok(Self {
            reader,
            _file: run.file,
            rows: EncodedRows::default(),
            pos: 0,
        })
    }

    /// Loads the next non empty batch. Returns false once the run is
    /// exhausted.
    fn load_next_batch(&mut self, layout: &RowLayout) -> Result<bool> {
        self.pos = 0;
        for batch in self.reader.by_ref() {
            let batch = batch?;
            if batch.num_rows() == 0 {
                continue;
            }
            self.rows = layout.encode(batch.columns())?;
            return Ok(true);
        }
        self.rows = EncodedRows::default();
        Ok(false)
    }

    fn is_exhausted(&self) -> bool {
        self.pos >= self.rows.num_rows()
    }

    fn current_row(&self) -> Option<&[u8]> {
        (!self.is_exhausted()).then(|| self.rows.row(self.pos))
    }

    fn advance(&mut self, layout: &RowLayout) -> Result<()> {
        self.pos += 1;
        if self.is_exhausted() {
            self.load_next_batch(layout)?;
        }
        Ok(())
    }
}

/// A forward only stream of spilled rows merged from several sorted runs.
///
/// Rows are produced in the order of the [`RowLayout`] they were spilled
/// with, so all rows of a window partition are adjacent and ordered by the
/// ORDER BY keys.
///
/// ```text
/// while let Some(cursor) = stream.next()? {
///     // inspect cursor.row(), cursor.partition_key(), ...
///     stream.pop()?;
/// }
/// ```
pub struct SpillMergeStream {
    layout: Arc<RowLayout>,
    readers: Vec<SpillRunReader>,
    /// A loser tree that always produces the reader with the minimum row.
    ///
    /// Node 0 stores the top winner, Nodes 1..num_readers store the loser
    /// nodes. See `lt_leaf_node_index` for the shape of the tree.
    loser_tree: Vec<usize>,
    /// If the most recently popped winner has been replaced within the
    /// loser tree
    loser_tree_adjusted: bool,
    metrics: SpillMetrics,
}

impl std::fmt::Debug for SpillMergeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpillMergeStream")
            .field("num_runs", &self.readers.len())
            .field("loser_tree", &self.loser_tree)
            .finish()
    }
}

impl SpillMergeStream {
    pub(super) fn try_new(
        layout: Arc<RowLayout>,
        runs: Vec<SpillRun>,
        read_buffer_size: usize,
        metrics: SpillMetrics,
    ) -> Result<Self> {
        let timer = metrics.spill_read_time.timer();
        let mut readers = runs
            .into_iter()
            .map(|run| SpillRunReader::try_new(run, read_buffer_size))
            .collect::<Result<Vec<_>>>()?;
        for reader in readers.iter_mut() {
            reader.load_next_batch(&layout)?;
        }
        timer.done();

        let mut stream = Self {
            layout,
            readers,
            loser_tree: vec![],
            loser_tree_adjusted: false,
            metrics,
        };
        stream.init_loser_tree();
        Ok(stream)
    }

    pub fn num_runs(&self) -> usize {
        self.readers.len()
    }

    /// Returns a cursor on the smallest remaining row, or `None` once all
    /// runs are exhausted. The row stays current until [`Self::pop`].
    pub fn next(&mut self) -> Result<Option<SpillRowCursor<'_>>> {
        if self.readers.is_empty() {
            return Ok(None);
        }
        if !self.loser_tree_adjusted {
            self.update_loser_tree();
        }
        let reader = &self.readers[self.loser_tree[0]];
        if reader.is_exhausted() {
            return Ok(None);
        }
        Ok(Some(SpillRowCursor { reader }))
    }

    /// Advances past the current row
    pub fn pop(&mut self) -> Result<()> {
        if !self.loser_tree_adjusted
            || self.readers.is_empty()
            || self.readers[self.loser_tree[0]].is_exhausted()
        {
            return internal_err!("No current spilled row to pop");
        }
        let winner = self.loser_tree[0];
        let timer = self.metrics.spill_read_time.timer();
        self.readers[winner].advance(&self.layout)?;
        timer.done();
        self.metrics.spill_read_rows.add(1);
        self.loser_tree_adjusted = false;
        Ok(())
    }

    /// Returns `true` if the row of reader `a` is greater than the one of
    /// reader `b`, exhausted readers being the greatest. Ties are broken by
    /// the reader index.
    #[inline]
    fn is_gt(&self, a: usize, b: usize) -> bool {
        match (self.readers[a].current_row(), self.readers[b].current_row()) {
            (None, _) => true,
            (_, None) => false,
            (Some(ac), Some(bc)) => ac.cmp(bc).then_with(|| a.cmp(&b)).is_gt(),
        }
    }

    /// Find the leaf node index in the loser tree for the given reader index
    ///
    /// With 5 readers the tree looks like this, node 2 taking as input the
    /// next row of R0 and the loser of (R3, R4):
    ///
    /// ```text
    ///           0 (winner)
    ///
    ///           1
    ///        /     \
    ///       2       3
    ///     /  \     / \
    ///    4    |   |   |
    ///   / \   |   |   |
    /// -+---+--+---+---+---- Below is not a part of loser tree
    ///  R3 R4 R0   R1  R2
    /// ```
    #[inline]
    fn lt_leaf_node_index(&self, reader_index: usize) -> usize {
        (self.readers.len() + reader_index) / 2
    }

    /// Find the parent node index for the given node index
    #[inline]
    fn lt_parent_node_index(&self, node_idx: usize) -> usize {
        node_idx / 2
    }

    fn init_loser_tree(&mut self) {
        self.loser_tree = vec![usize::MAX; self.readers.len()];
        for i in 0..self.readers.len() {
            let mut winner = i;
            let mut cmp_node = self.lt_leaf_node_index(i);
            while cmp_node != 0 && self.loser_tree[cmp_node] != usize::MAX {
                let challenger = self.loser_tree[cmp_node];
                if self.is_gt(winner, challenger) {
                    self.loser_tree[cmp_node] = winner;
                    winner = challenger;
                }
                cmp_node = self.lt_parent_node_index(cmp_node);
            }
            self.loser_tree[cmp_node] = winner;
        }
        self.loser_tree_adjusted = true;
    }

    /// Replays the matches of the previous winner after it advanced
    fn update_loser_tree(&mut self) {
        let mut winner = self.loser_tree[0];
        let mut cmp_node = self.lt_leaf_node_index(winner);
        while cmp_node != 0 {
            let challenger = self.loser_tree[cmp_node];
            if self.is_gt(winner, challenger) {
                self.loser_tree[cmp_node] = winner;
                winner = challenger;
            }
            cmp_node = self.lt_parent_node_index(cmp_node);
        }
        self.loser_tree[0] = winner;
        self.loser_tree_adjusted = true;
        trace!("Spill merge winner is run {winner}");
    }
}

/// The current row of a [`SpillMergeStream`]
#[derive(Clone, Copy)]
pub struct SpillRowCursor<'a> {
    reader: &'a SpillRunReader,
}

impl<'a> SpillRowCursor<'a> {
    /// The encoded row, see [`RowLayout`]
    pub fn row(&self) -> &'a [u8] {
        self.reader.rows.row(self.reader.pos)
    }

    /// The encoded partition keys of the row
    pub fn partition_key(&self) -> &'a [u8] {
        self.reader.rows.partition_key(self.reader.pos)
    }

    pub fn partition_len(&self) -> usize {
        self.reader.rows.partition_len(self.reader.pos)
    }
}
