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

//! Key comparison flags shared by the in-memory sort and the spilled runs

use arrow::compute::SortOptions;

/// How a single key column takes part in a row comparison.
///
/// A list of these, one per key column, is the single ordering used both
/// when sorting rows in memory and when writing sorted spill runs, so the
/// two paths always group rows identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompareFlags {
    pub nulls_first: bool,
    pub ascending: bool,
}

impl Default for CompareFlags {
    fn default() -> Self {
        Self {
            nulls_first: true,
            ascending: true,
        }
    }
}

impl CompareFlags {
    /// Flags mirroring a user ORDER BY direction
    pub fn from_sort_options(options: SortOptions) -> Self {
        Self {
            nulls_first: options.nulls_first,
            ascending: !options.descending,
        }
    }

    /// The arrow [`SortOptions`] used to encode a key column with these flags
    pub fn sort_options(&self) -> SortOptions {
        SortOptions {
            descending: !self.ascending,
            nulls_first: self.nulls_first,
        }
    }
}

impl From<SortOptions> for CompareFlags {
    fn from(options: SortOptions) -> Self {
        Self::from_sort_options(options)
    }
}

impl From<CompareFlags> for SortOptions {
    fn from(flags: CompareFlags) -> Self {
        flags.sort_options()
    }
}

/// Builds the combined key comparison list: default flags for each of the
/// `num_partition_keys` partition keys followed by the ORDER BY flags.
pub fn make_compare_flags(
    num_partition_keys: usize,
    sorting_orders: &[SortOptions],
) -> Vec<CompareFlags> {
    let mut compare_flags = Vec::with_capacity(num_partition_keys + sorting_orders.len());
    compare_flags.extend(std::iter::repeat_n(CompareFlags::default(), num_partition_keys));
    compare_flags.extend(sorting_orders.iter().copied().map(CompareFlags::from));
    compare_flags
}
