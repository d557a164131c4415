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

//! Runtime configuration for the sort-based window build

use crate::{config_err, Result};

/// Configuration that controls how the window build spills buffered rows.
///
/// When a window build has no [`SpillConfig`] spilling is disabled and all
/// input must fit in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpillConfig {
    /// Size in bytes of the read buffer of every spill run opened by the
    /// merge reader
    pub read_buffer_size: usize,
    /// Number of rows per record batch written to a spill run
    pub write_batch_rows: usize,
    /// Minimum memory reservation, as a percentage of the current usage,
    /// that must be available before a batch is accepted without trying to
    /// grow the reservation
    pub min_spillable_reservation_pct: usize,
    /// Percentage of the current usage used as the minimum reservation
    /// increment when the reservation needs to grow
    pub spillable_reservation_growth_pct: usize,
    /// Spill on every memory check. Only meant to make spilling
    /// deterministic in tests.
    pub testing_force_spill: bool,
}

impl Default for SpillConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 1024 * 1024,
            write_batch_rows: 8192,
            min_spillable_reservation_pct: 5,
            spillable_reservation_growth_pct: 10,
            testing_force_spill: false,
        }
    }
}

impl SpillConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_read_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size;
        self
    }

    pub fn with_write_batch_rows(mut self, write_batch_rows: usize) -> Self {
        self.write_batch_rows = write_batch_rows;
        self
    }

    pub fn with_min_spillable_reservation_pct(mut self, pct: usize) -> Self {
        self.min_spillable_reservation_pct = pct;
        self
    }

    pub fn with_spillable_reservation_growth_pct(mut self, pct: usize) -> Self {
        self.spillable_reservation_growth_pct = pct;
        self
    }

    pub fn with_testing_force_spill(mut self, force: bool) -> Self {
        self.testing_force_spill = force;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_size == 0 {
            return config_err!("spill read_buffer_size must be greater than 0");
        }
        if self.write_batch_rows == 0 {
            return config_err!("spill write_batch_rows must be greater than 0");
        }
        if self.min_spillable_reservation_pct > 100 {
            return config_err!(
                "min_spillable_reservation_pct must be at most 100, got {}",
                self.min_spillable_reservation_pct
            );
        }
        Ok(())
    }
}

/// Configuration of the normalized-key prefix sort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixSortConfig {
    /// Number of leading bytes of the normalized key compared as a single
    /// integer before falling back to a full comparison. At most 8.
    pub prefix_bytes: usize,
    /// Inputs with fewer rows than this are sorted with plain comparisons
    pub min_num_rows: usize,
}

impl Default for PrefixSortConfig {
    fn default() -> Self {
        Self {
            prefix_bytes: 8,
            min_num_rows: 130,
        }
    }
}

impl PrefixSortConfig {
    pub fn new(prefix_bytes: usize, min_num_rows: usize) -> Self {
        Self {
            prefix_bytes,
            min_num_rows,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=8).contains(&self.prefix_bytes) {
            return config_err!(
                "prefix_bytes must be between 1 and 8, got {}",
                self.prefix_bytes
            );
        }
        Ok(())
    }
}

/// Allocation granularity of the row container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowContainerConfig {
    /// Number of row slots allocated per slab
    pub slab_row_capacity: usize,
    /// Bytes of encoded row data allocated per slab. A single row larger than
    /// this gets a slab of its own.
    pub slab_byte_capacity: usize,
}

impl Default for RowContainerConfig {
    fn default() -> Self {
        Self {
            slab_row_capacity: 1024,
            slab_byte_capacity: 64 * 1024,
        }
    }
}

impl RowContainerConfig {
    pub fn new(slab_row_capacity: usize, slab_byte_capacity: usize) -> Self {
        Self {
            slab_row_capacity,
            slab_byte_capacity,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.slab_row_capacity == 0 || self.slab_byte_capacity == 0 {
            return config_err!(
                "row container slab capacities must be greater than 0, got {} rows and {} bytes",
                self.slab_row_capacity,
                self.slab_byte_capacity
            );
        }
        if u32::try_from(self.slab_row_capacity).is_err() {
            return config_err!(
                "slab_row_capacity must fit in 32 bits, got {}",
                self.slab_row_capacity
            );
        }
        Ok(())
    }
}

/// Configuration of a single window build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowBuildConfig {
    /// `None` disables spilling
    pub spill: Option<SpillConfig>,
    pub prefix_sort: PrefixSortConfig,
    pub row_container: RowContainerConfig,
}

impl WindowBuildConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables spilling with the given configuration
    pub fn with_spill(mut self, spill: SpillConfig) -> Self {
        self.spill = Some(spill);
        self
    }

    pub fn with_prefix_sort(mut self, prefix_sort: PrefixSortConfig) -> Self {
        self.prefix_sort = prefix_sort;
        self
    }

    pub fn with_row_container(mut self, row_container: RowContainerConfig) -> Self {
        self.row_container = row_container;
        self
    }

    pub fn spill_enabled(&self) -> bool {
        self.spill.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(spill) = &self.spill {
            spill.validate()?;
        }
        self.prefix_sort.validate()?;
        self.row_container.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        WindowBuildConfig::default().validate().unwrap();
        WindowBuildConfig::new()
            .with_spill(SpillConfig::default())
            .validate()
            .unwrap();
        assert!(!WindowBuildConfig::default().spill_enabled());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = WindowBuildConfig::new()
            .with_spill(SpillConfig::new().with_write_batch_rows(0))
            .validate()
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid or Unsupported Configuration: spill write_batch_rows must be greater than 0"
        );

        let err = WindowBuildConfig::new()
            .with_prefix_sort(PrefixSortConfig::new(9, 10))
            .validate()
            .unwrap_err();
        assert!(err.message().contains("prefix_bytes"));

        let err = WindowBuildConfig::new()
            .with_row_container(RowContainerConfig::new(0, 1024))
            .validate()
            .unwrap_err();
        assert!(err.message().contains("slab capacities"));
    }
}
