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

// Make cheap clones clear: https://github.com/apache/datafusion/issues/11143
#![deny(clippy::clone_on_ref_ptr)]

//! Sort based window partition build.
//!
//! A window operator needs its input grouped by the PARTITION BY keys and
//! ordered by the ORDER BY keys within each partition. [`SortWindowBuild`]
//! buffers all input rows, sorts them once the input is complete and then
//! hands the partitions to the window function evaluation one at a time.
//!
//! The build reserves its memory from a
//! [`MemoryPool`](window_build_execution::memory_pool::MemoryPool) and, when
//! spilling is enabled, can write its rows to disk as sorted runs that are
//! merged back partition by partition:
//!
//! ```
//! # use std::sync::Arc;
//! # use window_build::arrow::array::Int32Array;
//! # use window_build::arrow::record_batch::RecordBatch;
//! # use window_build::arrow::datatypes::{DataType, Field, Schema};
//! # use window_build::{SortWindowBuild, WindowBuild, WindowKeys};
//! # use window_build_common::config::WindowBuildConfig;
//! # use window_build_execution::memory_pool::MemoryReclaimer;
//! # use window_build_execution::RuntimeEnv;
//! # fn main() -> window_build_common::Result<()> {
//! let schema = Arc::new(Schema::new(vec![
//!     Field::new("k", DataType::Int32, false),
//!     Field::new("v", DataType::Int32, false),
//! ]));
//! let mut build = SortWindowBuild::try_new(
//!     Arc::clone(&schema),
//!     WindowKeys::try_new_with_names(&schema, &["k"], &[("v", Default::default())])?,
//!     WindowBuildConfig::default(),
//!     Arc::new(RuntimeEnv::default()),
//!     Arc::new(MemoryReclaimer::new()),
//! )?;
//!
//! let batch = RecordBatch::try_new(
//!     schema,
//!     vec![
//!         Arc::new(Int32Array::from(vec![2, 1, 2])),
//!         Arc::new(Int32Array::from(vec![30, 10, 20])),
//!     ],
//! )?;
//! build.add_input(&batch)?;
//! build.no_more_input()?;
//!
//! let mut sizes = vec![];
//! while build.has_next_partition()? {
//!     sizes.push(build.next_partition()?.num_rows());
//! }
//! assert_eq!(sizes, vec![1, 2]);
//! # Ok(())
//! # }
//! ```

pub mod compare;
pub mod metrics;
pub mod partition;
pub mod prefix_sort;
pub mod row_container;
pub mod sort_window_build;
pub mod spill;
pub mod window_build;

pub use compare::{make_compare_flags, CompareFlags};
pub use metrics::{SpillMetrics, SpillStats};
pub use partition::WindowPartition;
pub use sort_window_build::{find_next_partition_start_row, SortWindowBuild};
pub use window_build::{InputChannels, WindowBuild, WindowKeys};
pub use window_build_common::arrow;
