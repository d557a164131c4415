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

//! Execution [`RuntimeEnv`] environment that manages access to the memory
//! pool and the spill disk manager.

use crate::disk_manager::{DiskManager, DiskManagerBuilder, DiskManagerMode};
use crate::memory_pool::{GreedyMemoryPool, MemoryPool, UnboundedMemoryPool};
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::sync::Arc;
use window_build_common::Result;

/// Execution runtime environment shared by all window builds of a task.
///
/// # Example: Create default `RuntimeEnv`
/// ```
/// # use window_build_execution::runtime_env::RuntimeEnv;
/// let runtime_env = RuntimeEnv::default();
/// ```
///
/// # Example: Create a `RuntimeEnv` with a 1 MiB memory limit
/// ```
/// # use window_build_execution::runtime_env::RuntimeEnvBuilder;
/// let runtime_env = RuntimeEnvBuilder::new()
///     .with_memory_limit(1024 * 1024, 1.0)
///     .build()
///     .unwrap();
/// assert_eq!(runtime_env.memory_pool.pool_size(), Some(1024 * 1024));
/// ```
pub struct RuntimeEnv {
    /// Runtime memory management
    pub memory_pool: Arc<dyn MemoryPool>,
    /// Manage temporary files during query execution
    pub disk_manager: Arc<DiskManager>,
}

impl Debug for RuntimeEnv {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeEnv")
            .field("memory_pool", &self.memory_pool)
            .field("disk_manager", &self.disk_manager)
            .finish()
    }
}

impl Default for RuntimeEnv {
    fn default() -> Self {
        RuntimeEnv {
            memory_pool: Arc::new(UnboundedMemoryPool::default()),
            disk_manager: Arc::new(DiskManager::default()),
        }
    }
}

/// Execution runtime configuration builder.
///
/// See example on [`RuntimeEnv`]
#[derive(Clone, Default)]
pub struct RuntimeEnvBuilder {
    /// DiskManager to manage temporary disk file usage
    pub disk_manager_builder: Option<DiskManagerBuilder>,
    /// [`MemoryPool`] from which to allocate memory
    ///
    /// Defaults to using an [`UnboundedMemoryPool`] if `None`
    pub memory_pool: Option<Arc<dyn MemoryPool>>,
}

impl RuntimeEnvBuilder {
    /// New with default values
    pub fn new() -> Self {
        Default::default()
    }

    /// Customize the disk manager
    pub fn with_disk_manager_builder(mut self, disk_manager: DiskManagerBuilder) -> Self {
        self.disk_manager_builder = Some(disk_manager);
        self
    }

    /// Customize memory policy
    pub fn with_memory_pool(mut self, memory_pool: Arc<dyn MemoryPool>) -> Self {
        self.memory_pool = Some(memory_pool);
        self
    }

    /// Specify the total memory to use while running the window build.
    /// Operators reserve through a [`GreedyMemoryPool`] of
    /// `max_memory * memory_fraction` bytes.
    pub fn with_memory_limit(self, max_memory: usize, memory_fraction: f64) -> Self {
        let pool_size = (max_memory as f64 * memory_fraction) as usize;
        self.with_memory_pool(Arc::new(GreedyMemoryPool::new(pool_size)))
    }

    /// Use the specified path to create any needed temporary files
    pub fn with_temp_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        let builder = self.disk_manager_builder.take().unwrap_or_default();
        self.with_disk_manager_builder(
            builder.with_mode(DiskManagerMode::Directories(vec![path.into()])),
        )
    }

    /// Build a RuntimeEnv
    pub fn build(self) -> Result<RuntimeEnv> {
        let Self {
            disk_manager_builder,
            memory_pool,
        } = self;
        let memory_pool =
            memory_pool.unwrap_or_else(|| Arc::new(UnboundedMemoryPool::default()));

        Ok(RuntimeEnv {
            memory_pool,
            disk_manager: Arc::new(disk_manager_builder.unwrap_or_default().build()?),
        })
    }

    /// Convenience method to create a new `Arc<RuntimeEnv>`
    pub fn build_arc(self) -> Result<Arc<RuntimeEnv>> {
        self.build().map(Arc::new)
    }
}
