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

#![allow(dead_code)]

//! Helpers shared by the window build integration tests

use std::cmp::Ordering;
use std::sync::Arc;

use window_build::arrow::array::{Array, ArrayRef, Int32Array, Int64Array, StringArray};
use window_build::arrow::compute::SortOptions;
use window_build::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use window_build::arrow::record_batch::RecordBatch;
use window_build::{SortWindowBuild, WindowBuild, WindowKeys};
use window_build_common::config::{RowContainerConfig, SpillConfig, WindowBuildConfig};
use window_build_common::Result;
use window_build_execution::memory_pool::MemoryReclaimer;
use window_build_execution::RuntimeEnv;

/// A row of the test schema: partition key, order key and a unique id
pub type Row = (Option<String>, Option<i32>, i64);

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("v", DataType::Int64, false),
        Field::new("p", DataType::Utf8, true),
        Field::new("o", DataType::Int32, true),
    ]))
}

pub fn batch(rows: &[Row]) -> RecordBatch {
    let ids: ArrayRef = Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.2)));
    let partitions: ArrayRef = Arc::new(StringArray::from_iter(rows.iter().map(|r| r.0.clone())));
    let orders: ArrayRef = Arc::new(Int32Array::from_iter(rows.iter().map(|r| r.1)));
    RecordBatch::try_new(schema(), vec![ids, partitions, orders]).unwrap()
}

pub fn rows(batch: &RecordBatch) -> Vec<Row> {
    let ids = batch.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
    let partitions = batch.column(1).as_any().downcast_ref::<StringArray>().unwrap();
    let orders = batch.column(2).as_any().downcast_ref::<Int32Array>().unwrap();
    (0..batch.num_rows())
        .map(|idx| {
            (
                partitions.is_valid(idx).then(|| partitions.value(idx).to_string()),
                orders.is_valid(idx).then(|| orders.value(idx)),
                ids.value(idx),
            )
        })
        .collect()
}

/// Partitioned by `p`, ordered by `o`
pub fn keys(order: SortOptions) -> WindowKeys {
    WindowKeys::try_new_with_names(&schema(), &["p"], &[("o", order)]).unwrap()
}

pub fn spill_config() -> SpillConfig {
    SpillConfig::new()
        .with_read_buffer_size(4096)
        .with_write_batch_rows(7)
}

/// Small slabs so that tests exercise many of them
pub fn config(spill: Option<SpillConfig>) -> WindowBuildConfig {
    let config = WindowBuildConfig::new().with_row_container(RowContainerConfig::new(16, 512));
    match spill {
        Some(spill) => config.with_spill(spill),
        None => config,
    }
}

pub fn new_build(
    config: WindowBuildConfig,
    runtime: &Arc<RuntimeEnv>,
    order: SortOptions,
) -> SortWindowBuild {
    SortWindowBuild::try_new(
        schema(),
        keys(order),
        config,
        Arc::clone(runtime),
        Arc::new(MemoryReclaimer::new()),
    )
    .unwrap()
}

/// Reads every remaining partition
pub fn drain(build: &mut impl WindowBuild) -> Result<Vec<Vec<Row>>> {
    let mut partitions = vec![];
    while build.has_next_partition()? {
        let partition = build.next_partition()?;
        partitions.push(rows(&partition.to_record_batch()?));
    }
    Ok(partitions)
}

/// Compares two order keys the way `options` orders them
pub fn compare_order(a: Option<i32>, b: Option<i32>, options: SortOptions) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) if options.nulls_first => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) if options.nulls_first => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) if options.descending => b.cmp(&a),
        (Some(a), Some(b)) => a.cmp(&b),
    }
}

/// Asserts every partition holds a single partition key, that partitions
/// have distinct keys and that rows are ordered by `o`
pub fn assert_partitioned(partitions: &[Vec<Row>], options: SortOptions) {
    let mut seen = vec![];
    for partition in partitions {
        assert!(!partition.is_empty());
        let key = &partition[0].0;
        assert!(partition.iter().all(|row| &row.0 == key), "{partition:?}");
        assert!(!seen.contains(key), "partition {key:?} returned twice");
        seen.push(key.clone());
        for pair in partition.windows(2) {
            assert_ne!(
                compare_order(pair[0].1, pair[1].1, options),
                Ordering::Greater,
                "{pair:?} out of order"
            );
        }
    }
}

/// Partitions with their rows in id order, for comparing runs whose order
/// of tied rows differs
pub fn normalize(mut partitions: Vec<Vec<Row>>) -> Vec<Vec<Row>> {
    for partition in partitions.iter_mut() {
        partition.sort_by_key(|row| row.2);
    }
    partitions.sort();
    partitions
}
