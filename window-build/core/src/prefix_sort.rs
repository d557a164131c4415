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

//! Sorting of row handles using a fixed width prefix of the encoded keys

use std::cmp::Ordering;
use std::mem::size_of;

use window_build_common::config::PrefixSortConfig;

use crate::row_container::{RowContainer, RowId};

/// Sorts [`RowId`]s of a [`RowContainer`] by their encoded rows.
///
/// For inputs of at least [`PrefixSortConfig::min_num_rows`] rows, the
/// first [`PrefixSortConfig::prefix_bytes`] bytes of every row are loaded
/// into an integer next to the handle, so most comparisons are a single
/// integer comparison that never touches the row storage. Rows with equal
/// prefixes fall back to comparing the full rows. Smaller inputs are sorted
/// with a plain comparison sort.
///
/// The sort is not stable: the order of rows that compare equal is
/// unspecified.
#[derive(Debug)]
pub struct PrefixSort;

impl PrefixSort {
    /// Scratch memory [`Self::sort`] needs for `container.num_rows()` rows
    pub fn max_required_bytes(container: &RowContainer, config: &PrefixSortConfig) -> usize {
        if container.num_rows() < config.min_num_rows {
            return 0;
        }
        container.num_rows() * size_of::<(u64, RowId)>()
    }

    /// Sorts `rows` in place
    pub fn sort(container: &RowContainer, config: &PrefixSortConfig, rows: &mut [RowId]) {
        if rows.len() < config.min_num_rows {
            rows.sort_unstable_by(|a, b| container.compare_rows(*a, *b));
            return;
        }

        let mut prefixed = rows
            .iter()
            .map(|id| (load_prefix(container.row(*id), config.prefix_bytes), *id))
            .collect::<Vec<_>>();
        prefixed.sort_unstable_by(|(a_prefix, a), (b_prefix, b)| {
            match a_prefix.cmp(b_prefix) {
                Ordering::Equal => container.compare_rows(*a, *b),
                ordering => ordering,
            }
        });
        for (slot, (_, id)) in rows.iter_mut().zip(prefixed) {
            *slot = id;
        }
    }
}

/// The first `prefix_bytes` bytes of `row` as a big endian integer, zero
/// padded on the right. Padding keeps the integer order consistent with
/// the byte order of the full rows.
fn load_prefix(row: &[u8], prefix_bytes: usize) -> u64 {
    let mut buf = [0u8; 8];
    let len = row.len().min(prefix_bytes);
    buf[..len].copy_from_slice(&row[..len]);
    u64::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::make_compare_flags;
    use crate::row_container::RowLayout;
    use crate::window_build::{InputChannels, WindowKeys};
    use arrow::array::{ArrayRef, Int32Array, StringArray};
    use arrow::compute::SortOptions;
    use arrow::datatypes::{DataType, Field, Schema};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rstest::rstest;
    use std::sync::Arc;
    use window_build_common::config::RowContainerConfig;
    use window_build_execution::memory_pool::{
        MemoryConsumer, MemoryPool, UnboundedMemoryPool,
    };

    fn container(num_rows: usize, seed: u64) -> RowContainer {
        let schema = Schema::new(vec![
            Field::new("p", DataType::Utf8, true),
            Field::new("o", DataType::Int32, true),
        ]);
        let desc = SortOptions {
            descending: true,
            nulls_first: false,
        };
        let keys = WindowKeys::new(vec![0], vec![(1, desc)]);
        let channels = InputChannels::try_new(2, &keys).unwrap();
        let flags = make_compare_flags(1, &keys.sorting_orders());
        let layout =
            RowLayout::try_new(channels.stored_schema(&schema), &channels, flags).unwrap();

        let pool: Arc<dyn MemoryPool> = Arc::new(UnboundedMemoryPool::default());
        let reservation = MemoryConsumer::new("PrefixSortTest").register(&pool);
        let mut container =
            RowContainer::new(Arc::new(layout), RowContainerConfig::default(), reservation);

        let mut rng = StdRng::seed_from_u64(seed);
        // shared leading bytes make many prefixes tie
        let partitions: Vec<Option<String>> = (0..num_rows)
            .map(|_| {
                let p = rng.random_range(0..6);
                (p != 0).then(|| format!("partition-{}", "x".repeat(p)))
            })
            .collect();
        let orders: Vec<Option<i32>> = (0..num_rows)
            .map(|_| rng.random_bool(0.9).then(|| rng.random_range(-50..50)))
            .collect();
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(partitions)),
            Arc::new(Int32Array::from(orders)),
        ];
        container.store_columns(&columns).unwrap();
        container
    }

    fn all_rows(container: &RowContainer) -> Vec<RowId> {
        let mut rows = vec![];
        let mut iter = Default::default();
        container.list_rows(&mut iter, container.num_rows(), &mut rows);
        rows
    }

    #[rstest]
    #[case::plain_sort(50, 8)]
    #[case::prefix_sort(1000, 8)]
    #[case::short_prefix(1000, 1)]
    #[case::odd_prefix(517, 3)]
    fn sorts_like_full_comparison(#[case] num_rows: usize, #[case] prefix_bytes: usize) {
        let container = container(num_rows, num_rows as u64);
        let config = PrefixSortConfig::new(prefix_bytes, 130);

        let mut rows = all_rows(&container);
        PrefixSort::sort(&container, &config, &mut rows);

        assert_eq!(rows.len(), num_rows);
        for pair in rows.windows(2) {
            assert_ne!(
                container.compare_rows(pair[0], pair[1]),
                Ordering::Greater
            );
        }
    }

    #[test]
    fn required_bytes() {
        let config = PrefixSortConfig::new(8, 130);
        assert_eq!(PrefixSort::max_required_bytes(&container(129, 0), &config), 0);
        assert_eq!(
            PrefixSort::max_required_bytes(&container(130, 0), &config),
            130 * 16
        );
    }

    #[test]
    fn prefix_is_zero_padded() {
        assert_eq!(load_prefix(&[1, 2], 8), 0x0102_0000_0000_0000);
        assert_eq!(load_prefix(&[1, 2, 3], 2), 0x0102_0000_0000_0000);
        assert!(load_prefix(&[1], 8) <= load_prefix(&[1, 0, 1], 8));
    }
}
