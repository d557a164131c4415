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

use arrow::array::ArrayRef;
use arrow::compute::SortOptions;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use window_build_common::{internal_err, Result};

use crate::row_container::{RowContainer, RowId};

/// The rows of one window partition, in ORDER BY order.
///
/// A view over rows owned by the window build that produced it, which stays
/// borrowed for as long as the partition is alive.
#[derive(Debug, Clone, Copy)]
pub struct WindowPartition<'a> {
    data: &'a RowContainer,
    rows: &'a [RowId],
    /// Stored column of each input column
    inversed_input_channels: &'a [usize],
    input_schema: &'a SchemaRef,
    /// ORDER BY keys as input column and direction
    sort_keys: &'a [(usize, SortOptions)],
}

impl<'a> WindowPartition<'a> {
    pub fn new(
        data: &'a RowContainer,
        rows: &'a [RowId],
        inversed_input_channels: &'a [usize],
        input_schema: &'a SchemaRef,
        sort_keys: &'a [(usize, SortOptions)],
    ) -> Self {
        Self {
            data,
            rows,
            inversed_input_channels,
            input_schema,
            sort_keys,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_ids(&self) -> &'a [RowId] {
        self.rows
    }

    pub fn sort_keys(&self) -> &'a [(usize, SortOptions)] {
        self.sort_keys
    }

    pub fn schema(&self) -> &'a SchemaRef {
        self.input_schema
    }

    /// Materializes the partition with the columns of the input schema
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let stored = self.data.extract_columns(self.rows)?;
        let columns = self
            .inversed_input_channels
            .iter()
            .map(|stored_idx| Arc::clone(&stored[*stored_idx]))
            .collect();
        Ok(RecordBatch::try_new(Arc::clone(self.input_schema), columns)?)
    }

    /// Materializes input column `column` of the partition
    pub fn column(&self, column: usize) -> Result<ArrayRef> {
        let Some(stored_idx) = self.inversed_input_channels.get(column) else {
            return internal_err!(
                "Column {column} out of range for a partition with {} columns",
                self.inversed_input_channels.len()
            );
        };
        let mut stored = self.data.extract_columns(self.rows)?;
        Ok(stored.swap_remove(*stored_idx))
    }
}
