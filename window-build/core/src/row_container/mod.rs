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

//! [`RowContainer`]: append-only storage for the rows of a window build

use std::cmp::Ordering;
use std::mem::size_of;
use std::sync::Arc;

use arrow::array::ArrayRef;
use window_build_common::config::RowContainerConfig;
use window_build_common::{internal_window_err, Result};
use window_build_execution::memory_pool::MemoryReservation;

mod layout;

pub use layout::{EncodedRows, RowLayout};

/// Handle of a row stored in a [`RowContainer`].
///
/// Valid until the container it was returned by is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId {
    slab: u32,
    row: u32,
}

/// Cursor over the rows of a [`RowContainer`], see [`RowContainer::list_rows`]
#[derive(Debug, Default, Clone)]
pub struct RowContainerIterator {
    slab: usize,
    row: usize,
}

/// Per row bookkeeping besides the encoded bytes: the row offset and the
/// length of its partition key prefix
const FIXED_ROW_SIZE: usize = size_of::<usize>() + size_of::<u32>();

#[derive(Debug)]
struct Slab {
    data: Vec<u8>,
    /// Start of each row in `data` plus the end of the last row
    offsets: Vec<usize>,
    partition_lens: Vec<u32>,
    row_capacity: usize,
    byte_capacity: usize,
}

impl Slab {
    fn new(row_capacity: usize, byte_capacity: usize) -> Self {
        let mut offsets = Vec::with_capacity(row_capacity + 1);
        offsets.push(0);
        Self {
            data: Vec::with_capacity(byte_capacity),
            offsets,
            partition_lens: Vec::with_capacity(row_capacity),
            row_capacity,
            byte_capacity,
        }
    }

    fn allocated_size(&self) -> usize {
        self.byte_capacity + self.row_capacity * FIXED_ROW_SIZE
    }

    fn num_rows(&self) -> usize {
        self.partition_lens.len()
    }

    fn free_rows(&self) -> usize {
        self.row_capacity - self.num_rows()
    }

    fn free_bytes(&self) -> usize {
        self.byte_capacity - self.data.len()
    }

    fn fits(&self, num_bytes: usize) -> bool {
        self.free_rows() > 0 && self.free_bytes() >= num_bytes
    }

    fn row(&self, row: usize) -> &[u8] {
        &self.data[self.offsets[row]..self.offsets[row + 1]]
    }

    fn partition_key(&self, row: usize) -> &[u8] {
        let start = self.offsets[row];
        &self.data[start..start + self.partition_lens[row] as usize]
    }
}

/// Append-only storage for encoded rows (see [`RowLayout`]).
///
/// Rows are allocated from fixed size slabs and addressed by [`RowId`].
/// Every slab is allocated through the container's [`MemoryReservation`],
/// consuming reserved headroom first and growing the reservation when it
/// runs out. [`Self::clear`] drops all slabs at once.
#[derive(Debug)]
pub struct RowContainer {
    layout: Arc<RowLayout>,
    config: RowContainerConfig,
    slabs: Vec<Slab>,
    num_rows: usize,
    /// Encoded bytes of all stored rows
    variable_bytes: usize,
    /// Bytes of all allocated slabs
    allocated_bytes: usize,
    reservation: MemoryReservation,
}

impl RowContainer {
    pub fn new(
        layout: Arc<RowLayout>,
        config: RowContainerConfig,
        reservation: MemoryReservation,
    ) -> Self {
        Self {
            layout,
            config,
            slabs: vec![],
            num_rows: 0,
            variable_bytes: 0,
            allocated_bytes: 0,
            reservation,
        }
    }

    pub fn layout(&self) -> &Arc<RowLayout> {
        &self.layout
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn reservation(&self) -> &MemoryReservation {
        &self.reservation
    }

    pub fn reservation_mut(&mut self) -> &mut MemoryReservation {
        &mut self.reservation
    }

    /// Encodes and stores every row of `columns`, given in stored order
    pub fn store_columns(&mut self, columns: &[ArrayRef]) -> Result<usize> {
        let rows = self.layout.encode(columns)?;
        self.store_rows(&rows)?;
        Ok(rows.num_rows())
    }

    /// Stores every row of `rows`
    pub fn store_rows(&mut self, rows: &EncodedRows) -> Result<()> {
        for idx in 0..rows.num_rows() {
            self.append_row(rows.row(idx), rows.partition_len(idx))?;
        }
        Ok(())
    }

    /// Allocates a new row and copies the encoded `row` into it
    pub fn append_row(&mut self, row: &[u8], partition_len: usize) -> Result<RowId> {
        if !self.slabs.last().is_some_and(|slab| slab.fits(row.len())) {
            self.allocate_slab(row.len())?;
        }
        let slab_idx = self.slabs.len() - 1;
        let slab = &mut self.slabs[slab_idx];
        let row_idx = slab.num_rows();

        slab.data.extend_from_slice(row);
        slab.offsets.push(slab.data.len());
        slab.partition_lens.push(
            u32::try_from(partition_len)
                .map_err(|_| internal_window_err!("Partition key of {partition_len} bytes"))?,
        );
        self.num_rows += 1;
        self.variable_bytes += row.len();

        Ok(RowId {
            slab: slab_idx as u32,
            row: row_idx as u32,
        })
    }

    fn allocate_slab(&mut self, min_bytes: usize) -> Result<()> {
        if self.slabs.len() >= u32::MAX as usize {
            return Err(internal_window_err!("Too many slabs in row container"));
        }
        let slab = Slab::new(
            self.config.slab_row_capacity,
            self.config.slab_byte_capacity.max(min_bytes),
        );
        let size = slab.allocated_size();
        self.reservation.try_allocate(size)?;
        self.allocated_bytes += size;
        self.slabs.push(slab);
        Ok(())
    }

    /// The encoded bytes of row `id`
    pub fn row(&self, id: RowId) -> &[u8] {
        self.slabs[id.slab as usize].row(id.row as usize)
    }

    /// The encoded partition keys of row `id`
    pub fn partition_key(&self, id: RowId) -> &[u8] {
        self.slabs[id.slab as usize].partition_key(id.row as usize)
    }

    /// Compares two rows by all keys, partition keys first
    pub fn compare_rows(&self, left: RowId, right: RowId) -> Ordering {
        self.row(left).cmp(self.row(right))
    }

    /// Returns true if both rows have equal partition keys, nulls being
    /// equal to nulls
    pub fn partition_keys_equal(&self, left: RowId, right: RowId) -> bool {
        self.partition_key(left) == self.partition_key(right)
    }

    /// Returns true if row `id` has the encoded partition keys `other`
    pub fn partition_key_matches(&self, id: RowId, other: &[u8]) -> bool {
        self.partition_key(id) == other
    }

    /// Free row slots and free bytes left in the slab currently filled
    pub fn free_space(&self) -> (usize, usize) {
        self.slabs
            .last()
            .map_or((0, 0), |slab| (slab.free_rows(), slab.free_bytes()))
    }

    /// Encoded bytes of all stored rows
    pub fn variable_bytes(&self) -> usize {
        self.variable_bytes
    }

    /// Bytes allocated for the slabs, used or not
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    /// Estimated memory needed to add `num_rows` rows with a total of
    /// `variable_bytes` encoded bytes
    pub fn size_increment(&self, num_rows: usize, variable_bytes: usize) -> usize {
        let (free_rows, free_bytes) = self.free_space();
        let new_rows = num_rows.saturating_sub(free_rows);
        let new_bytes = variable_bytes.saturating_sub(free_bytes);
        let new_slabs = new_rows
            .div_ceil(self.config.slab_row_capacity)
            .max(new_bytes.div_ceil(self.config.slab_byte_capacity));
        new_rows * FIXED_ROW_SIZE + new_bytes.max(new_slabs * self.config.slab_byte_capacity)
    }

    /// Appends up to `max_rows` row handles to `out`, in insertion order,
    /// starting at `iter`. Returns the number of rows listed.
    pub fn list_rows(
        &self,
        iter: &mut RowContainerIterator,
        max_rows: usize,
        out: &mut Vec<RowId>,
    ) -> usize {
        let mut listed = 0;
        while listed < max_rows && iter.slab < self.slabs.len() {
            let slab = &self.slabs[iter.slab];
            let count = (slab.num_rows() - iter.row).min(max_rows - listed);
            out.extend((iter.row..iter.row + count).map(|row| RowId {
                slab: iter.slab as u32,
                row: row as u32,
            }));
            listed += count;
            iter.row += count;
            if iter.row == slab.num_rows() {
                iter.slab += 1;
                iter.row = 0;
            }
        }
        listed
    }

    /// Decodes `rows` into columns in stored order
    pub fn extract_columns(&self, rows: &[RowId]) -> Result<Vec<ArrayRef>> {
        self.layout.decode(rows.iter().map(|id| self.row(*id)))
    }

    /// Drops all rows, invalidating every [`RowId`] handed out so far. The
    /// memory is returned to the reservation, which keeps it reserved.
    pub fn clear(&mut self) {
        self.slabs.clear();
        self.reservation.deallocate(self.allocated_bytes);
        self.allocated_bytes = 0;
        self.num_rows = 0;
        self.variable_bytes = 0;
    }
}
