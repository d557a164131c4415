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

//! [`DiskManager`]: Manages the spill files written by window builds

use log::debug;
use parking_lot::Mutex;
use rand::{rng, Rng};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::{Builder, NamedTempFile, TempDir};
use window_build_common::{
    human_readable_size, resources_err, resources_window_err, Result, WindowBuildError,
};

pub const DEFAULT_MAX_TEMP_DIRECTORY_SIZE: u64 = 100 * 1024 * 1024 * 1024; // 100GB

/// Builder pattern for the [DiskManager] structure
#[derive(Clone, Debug)]
pub struct DiskManagerBuilder {
    mode: DiskManagerMode,
    /// The maximum amount of data (in bytes) stored inside the temporary directories.
    max_temp_directory_size: u64,
}

impl Default for DiskManagerBuilder {
    fn default() -> Self {
        Self {
            mode: DiskManagerMode::OsTmpDirectory,
            max_temp_directory_size: DEFAULT_MAX_TEMP_DIRECTORY_SIZE,
        }
    }
}

impl DiskManagerBuilder {
    pub fn with_mode(mut self, mode: DiskManagerMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_temp_directory_size(mut self, value: u64) -> Self {
        self.max_temp_directory_size = value;
        self
    }

    /// Create a DiskManager given the builder
    pub fn build(self) -> Result<DiskManager> {
        let local_dirs = match self.mode {
            DiskManagerMode::OsTmpDirectory => Some(vec![]),
            DiskManagerMode::Directories(conf_dirs) => {
                let local_dirs = create_local_dirs(&conf_dirs)?;
                debug!("Created local dirs {local_dirs:?} as spill working directory");
                Some(local_dirs)
            }
            DiskManagerMode::Disabled => None,
        };
        Ok(DiskManager {
            local_dirs: Mutex::new(local_dirs),
            max_temp_directory_size: self.max_temp_directory_size,
            used_disk_space: AtomicU64::new(0),
        })
    }
}

#[derive(Clone, Debug, Default)]
pub enum DiskManagerMode {
    /// Create temporary files within a temporary directory chosen by the OS
    #[default]
    OsTmpDirectory,

    /// Create temporary files within the specified directories. One of the
    /// directories will be chosen at random for each temporary file created.
    Directories(Vec<PathBuf>),

    /// Disable disk manager, attempts to create temporary files will error
    Disabled,
}

/// Manages files generated during query execution, e.g. spill files generated
/// while processing dataset larger than available memory.
#[derive(Debug)]
pub struct DiskManager {
    /// TempDirs to put temporary files in.
    ///
    /// If `Some(vec![])` a new OS specified temporary directory will be created
    /// If `None` an error will be returned (configured not to spill)
    local_dirs: Mutex<Option<Vec<Arc<TempDir>>>>,
    max_temp_directory_size: u64,
    used_disk_space: AtomicU64,
}

impl Default for DiskManager {
    fn default() -> Self {
        Self {
            local_dirs: Mutex::new(Some(vec![])),
            max_temp_directory_size: DEFAULT_MAX_TEMP_DIRECTORY_SIZE,
            used_disk_space: AtomicU64::new(0),
        }
    }
}

impl DiskManager {
    /// Creates a builder for [DiskManager]
    pub fn builder() -> DiskManagerBuilder {
        DiskManagerBuilder::default()
    }

    /// Bytes currently held by live temporary files
    pub fn used_disk_space(&self) -> u64 {
        self.used_disk_space.load(Ordering::Relaxed)
    }

    pub fn max_temp_directory_size(&self) -> u64 {
        self.max_temp_directory_size
    }

    /// Return true if this disk manager supports creating temporary
    /// files. If this returns false, any call to `create_tmp_file`
    /// will error.
    pub fn tmp_files_enabled(&self) -> bool {
        self.local_dirs.lock().is_some()
    }

    /// Return a temporary file from a randomized choice in the configured locations
    ///
    /// If the file can not be created for some reason, returns an
    /// error message referencing the request description
    pub fn create_tmp_file(
        self: &Arc<Self>,
        request_description: &str,
    ) -> Result<RefCountedTempFile> {
        let mut guard = self.local_dirs.lock();
        let local_dirs = guard.as_mut().ok_or_else(|| {
            resources_window_err!(
                "Memory Exhausted while {request_description} (DiskManager is disabled)"
            )
        })?;

        if local_dirs.is_empty() {
            let tempdir = Builder::new()
                .prefix("window-build-")
                .tempdir()
                .map_err(WindowBuildError::IoError)?;

            debug!(
                "Created directory '{:?}' as spill directory for {}",
                tempdir.path().to_string_lossy(),
                request_description,
            );

            local_dirs.push(Arc::new(tempdir));
        }

        let dir_index = rng().random_range(0..local_dirs.len());
        Ok(RefCountedTempFile {
            _parent_temp_dir: Arc::clone(&local_dirs[dir_index]),
            tempfile: Arc::new(
                Builder::new()
                    .tempfile_in(local_dirs[dir_index].as_ref())
                    .map_err(WindowBuildError::IoError)?,
            ),
            current_file_disk_usage: Arc::new(AtomicU64::new(0)),
            disk_manager: Arc::clone(self),
        })
    }
}

/// A wrapper around a [`NamedTempFile`] that also keeps its parent
/// temporary directory alive.
///
/// Clones share the same file. The file is deleted, and its size removed
/// from the disk manager's usage, when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct RefCountedTempFile {
    _parent_temp_dir: Arc<TempDir>,
    tempfile: Arc<NamedTempFile>,
    current_file_disk_usage: Arc<AtomicU64>,
    disk_manager: Arc<DiskManager>,
}

impl RefCountedTempFile {
    pub fn path(&self) -> &Path {
        self.tempfile.path()
    }

    pub fn inner(&self) -> &NamedTempFile {
        self.tempfile.as_ref()
    }

    /// Updates the global disk usage counter after the file was written.
    ///
    /// # Errors
    /// - Returns an error if the global disk usage exceeds the configured limit.
    pub fn update_disk_usage(&mut self) -> Result<()> {
        let new_disk_usage = self.tempfile.as_file().metadata()?.len();
        let old_disk_usage = self
            .current_file_disk_usage
            .swap(new_disk_usage, Ordering::Relaxed);

        let used = &self.disk_manager.used_disk_space;
        used.fetch_sub(old_disk_usage, Ordering::Relaxed);
        let global_disk_usage =
            used.fetch_add(new_disk_usage, Ordering::Relaxed) + new_disk_usage;

        if global_disk_usage > self.disk_manager.max_temp_directory_size {
            return resources_err!(
                "The used disk space during the spilling process has exceeded the allowable limit of {}. Try increasing the `max_temp_directory_size` in the disk manager configuration.",
                human_readable_size(self.disk_manager.max_temp_directory_size as usize)
            );
        }
        Ok(())
    }

    pub fn current_disk_usage(&self) -> u64 {
        self.current_file_disk_usage.load(Ordering::Relaxed)
    }
}

impl Drop for RefCountedTempFile {
    fn drop(&mut self) {
        if Arc::strong_count(&self.tempfile) == 1 {
            let current_usage = self.current_file_disk_usage.load(Ordering::Relaxed);
            self.disk_manager
                .used_disk_space
                .fetch_sub(current_usage, Ordering::Relaxed);
        }
    }
}

/// Setup local dirs by creating one new dir in each of the given dirs
fn create_local_dirs(local_dirs: &[PathBuf]) -> Result<Vec<Arc<TempDir>>> {
    local_dirs
        .iter()
        .map(|root| {
            if !root.exists() {
                std::fs::create_dir_all(root)?;
            }
            Builder::new()
                .prefix("window-build-")
                .tempdir_in(root)
                .map(Arc::new)
                .map_err(WindowBuildError::IoError)
        })
        .collect()
}
