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

//! [`WindowBuild`]: accumulates the input of a window operator and hands it
//! out one partition at a time

use std::fmt::Debug;
use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::compute::SortOptions;
use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use window_build_common::{config_err, Result};

use crate::metrics::SpillStats;
use crate::partition::WindowPartition;

/// PARTITION BY and ORDER BY keys of a window, as input column indices
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowKeys {
    pub partition_by: Vec<usize>,
    pub order_by: Vec<(usize, SortOptions)>,
}

impl WindowKeys {
    pub fn new(partition_by: Vec<usize>, order_by: Vec<(usize, SortOptions)>) -> Self {
        Self {
            partition_by,
            order_by,
        }
    }

    /// Resolves the key columns by name against `schema`
    pub fn try_new_with_names(
        schema: &Schema,
        partition_by: &[&str],
        order_by: &[(&str, SortOptions)],
    ) -> Result<Self> {
        let partition_by = partition_by
            .iter()
            .map(|name| schema.index_of(name))
            .collect::<Result<Vec<_>, _>>()?;
        let order_by = order_by
            .iter()
            .map(|(name, options)| Ok((schema.index_of(name)?, *options)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(partition_by, order_by))
    }

    /// User ORDER BY directions, in key order
    pub fn sorting_orders(&self) -> Vec<SortOptions> {
        self.order_by.iter().map(|(_, options)| *options).collect()
    }
}

/// Maps the columns of the input batches onto the columns stored by a
/// window build.
///
/// Stored columns are the partition keys, then the ORDER BY keys not
/// already stored, then every remaining input column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputChannels {
    /// Input column of each stored column
    input_channels: Vec<usize>,
    /// Stored column of each input column
    inversed_input_channels: Vec<usize>,
    /// Stored column of each key, partition keys first
    key_channels: Vec<usize>,
    num_partition_keys: usize,
}

impl InputChannels {
    pub fn try_new(num_input_columns: usize, keys: &WindowKeys) -> Result<Self> {
        let key_inputs = keys
            .partition_by
            .iter()
            .chain(keys.order_by.iter().map(|(idx, _)| idx));
        for idx in key_inputs.clone() {
            if *idx >= num_input_columns {
                return config_err!(
                    "Window key refers to column {idx} but the input has {num_input_columns} columns"
                );
            }
        }

        let mut input_channels = Vec::with_capacity(num_input_columns);
        for idx in key_inputs.clone().copied().chain(0..num_input_columns) {
            if !input_channels.contains(&idx) {
                input_channels.push(idx);
            }
        }

        let mut inversed_input_channels = vec![0; num_input_columns];
        for (stored, input) in input_channels.iter().enumerate() {
            inversed_input_channels[*input] = stored;
        }

        let key_channels = key_inputs
            .map(|idx| inversed_input_channels[*idx])
            .collect();

        Ok(Self {
            input_channels,
            inversed_input_channels,
            key_channels,
            num_partition_keys: keys.partition_by.len(),
        })
    }

    pub fn input_channels(&self) -> &[usize] {
        &self.input_channels
    }

    pub fn inversed_input_channels(&self) -> &[usize] {
        &self.inversed_input_channels
    }

    /// Stored columns of the partition keys followed by the ORDER BY keys
    pub fn key_channels(&self) -> &[usize] {
        &self.key_channels
    }

    pub fn partition_key_channels(&self) -> &[usize] {
        &self.key_channels[..self.num_partition_keys]
    }

    pub fn sort_key_channels(&self) -> &[usize] {
        &self.key_channels[self.num_partition_keys..]
    }

    pub fn num_partition_keys(&self) -> usize {
        self.num_partition_keys
    }

    /// Schema of the stored columns
    pub fn stored_schema(&self, input_schema: &Schema) -> SchemaRef {
        let fields = self
            .input_channels
            .iter()
            .map(|idx| Arc::clone(&input_schema.fields()[*idx]))
            .collect::<Vec<_>>();
        Arc::new(Schema::new_with_metadata(
            fields,
            input_schema.metadata().clone(),
        ))
    }

    /// The columns of `batch` in stored order
    pub fn project(&self, batch: &RecordBatch) -> Vec<ArrayRef> {
        self.input_channels
            .iter()
            .map(|idx| Arc::clone(batch.column(*idx)))
            .collect()
    }
}

/// Buffers every input row of a window operator, then yields the rows one
/// partition at a time, each partition ordered by the ORDER BY keys.
///
/// Calls are driven sequentially by a single thread:
///
/// ```text
/// add_input* -> no_more_input -> (has_next_partition -> next_partition)*
/// ```
pub trait WindowBuild: Debug + Send {
    /// Buffers the rows of `batch`
    fn add_input(&mut self, batch: &RecordBatch) -> Result<()>;

    /// Writes the buffered rows to disk and releases their memory
    fn spill(&mut self) -> Result<()>;

    /// Signals that all input has been added and prepares the partitions
    fn no_more_input(&mut self) -> Result<()>;

    /// Returns true if another partition is available
    fn has_next_partition(&mut self) -> Result<bool>;

    /// Returns the next partition. Must follow a call to
    /// [`Self::has_next_partition`] that returned true.
    fn next_partition(&mut self) -> Result<WindowPartition<'_>>;

    /// Spill statistics, `None` if this build never spilled
    fn spilled_stats(&self) -> Option<SpillStats>;

    /// Number of rows added so far
    fn num_rows(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{DataType, Field};

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("a", DataType::Int32, true),
            Field::new("b", DataType::Utf8, true),
            Field::new("c", DataType::Int64, true),
            Field::new("d", DataType::Float64, true),
        ])
    }

    #[test]
    fn keys_come_first() -> Result<()> {
        let schema = schema();
        let keys = WindowKeys::try_new_with_names(
            &schema,
            &["c"],
            &[("b", SortOptions::default())],
        )?;
        let channels = InputChannels::try_new(4, &keys)?;

        assert_eq!(channels.input_channels(), &[2, 1, 0, 3]);
        assert_eq!(channels.inversed_input_channels(), &[2, 1, 0, 3]);
        assert_eq!(channels.partition_key_channels(), &[0]);
        assert_eq!(channels.sort_key_channels(), &[1]);

        let stored = channels.stored_schema(&schema);
        let names: Vec<_> = stored.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["c", "b", "a", "d"]);
        Ok(())
    }

    #[test]
    fn sort_key_already_partition_key() -> Result<()> {
        let keys = WindowKeys::new(
            vec![1],
            vec![(1, SortOptions::default()), (3, SortOptions::default())],
        );
        let channels = InputChannels::try_new(4, &keys)?;

        assert_eq!(channels.input_channels(), &[1, 3, 0, 2]);
        assert_eq!(channels.key_channels(), &[0, 0, 1]);
        assert_eq!(channels.num_partition_keys(), 1);
        Ok(())
    }

    #[test]
    fn no_keys_keeps_input_order() -> Result<()> {
        let channels = InputChannels::try_new(3, &WindowKeys::default())?;
        assert_eq!(channels.input_channels(), &[0, 1, 2]);
        assert!(channels.key_channels().is_empty());
        Ok(())
    }

    #[test]
    fn out_of_range_key() {
        let keys = WindowKeys::new(vec![7], vec![]);
        let err = InputChannels::try_new(3, &keys).unwrap_err();
        assert!(err.to_string().contains("column 7"), "{err}");
    }

    #[test]
    fn unknown_column_name() {
        let err = WindowKeys::try_new_with_names(&schema(), &["nope"], &[]).unwrap_err();
        assert!(err.to_string().contains("nope"), "{err}");
    }
}
