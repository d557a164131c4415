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

use crate::memory_pool::{MemoryPool, MemoryReservation};
use log::debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use window_build_common::{resources_window_err, Result, WindowBuildError};

/// A [`MemoryPool`] that enforces no limit
#[derive(Debug, Default)]
pub struct UnboundedMemoryPool {
    used: AtomicUsize,
}

impl MemoryPool for UnboundedMemoryPool {
    fn grow(&self, _reservation: &MemoryReservation, additional: usize) {
        self.used.fetch_add(additional, Ordering::Relaxed);
    }

    fn shrink(&self, _reservation: &MemoryReservation, shrink: usize) {
        self.used.fetch_sub(shrink, Ordering::Relaxed);
    }

    fn try_grow(&self, reservation: &MemoryReservation, additional: usize) -> Result<()> {
        self.grow(reservation, additional);
        Ok(())
    }

    fn reserved(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    fn pool_size(&self) -> Option<usize> {
        None
    }
}

/// A [`MemoryPool`] that implements a greedy first-come first-serve limit.
///
/// A failed [`MemoryPool::try_grow`] never blocks: it fails immediately and
/// leaves it to the caller to spill or to degrade.
#[derive(Debug)]
pub struct GreedyMemoryPool {
    pool_size: usize,
    used: AtomicUsize,
}

impl GreedyMemoryPool {
    /// Allocate up to `limit` bytes
    pub fn new(pool_size: usize) -> Self {
        debug!("Created new GreedyMemoryPool(pool_size={pool_size})");
        Self {
            pool_size,
            used: AtomicUsize::new(0),
        }
    }
}

impl MemoryPool for GreedyMemoryPool {
    fn grow(&self, _reservation: &MemoryReservation, additional: usize) {
        self.used.fetch_add(additional, Ordering::Relaxed);
    }

    fn shrink(&self, _reservation: &MemoryReservation, shrink: usize) {
        self.used.fetch_sub(shrink, Ordering::Relaxed);
    }

    fn try_grow(&self, reservation: &MemoryReservation, additional: usize) -> Result<()> {
        self.used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                let new_used = used + additional;
                (new_used <= self.pool_size).then_some(new_used)
            })
            .map_err(|used| {
                insufficient_capacity_err(
                    reservation,
                    additional,
                    self.pool_size.saturating_sub(used),
                )
            })?;
        Ok(())
    }

    fn reserved(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    fn pool_size(&self) -> Option<usize> {
        Some(self.pool_size)
    }
}

fn insufficient_capacity_err(
    reservation: &MemoryReservation,
    additional: usize,
    available: usize,
) -> WindowBuildError {
    resources_window_err!(
        "Failed to allocate additional {} bytes for {} with {} bytes already allocated - maximum available is {}",
        additional,
        reservation.registration.consumer.name,
        reservation.size,
        available
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_pool::MemoryConsumer;
    use std::sync::Arc;

    #[test]
    fn test_greedy() {
        let pool: Arc<dyn MemoryPool> = Arc::new(GreedyMemoryPool::new(100));
        assert_eq!(pool.pool_size(), Some(100));

        let mut r1 = MemoryConsumer::new("r1").register(&pool);
        r1.try_grow(80).unwrap();

        let mut r2 = MemoryConsumer::new("r2").register(&pool);
        let err = r2.try_grow(30).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Resources exhausted: Failed to allocate additional 30 bytes for r2 with 0 bytes already allocated - maximum available is 20"
        );

        r1.shrink(50);
        r2.try_grow(30).unwrap();
        assert_eq!(pool.reserved(), 60);
    }

    #[test]
    fn test_unbounded() {
        let pool: Arc<dyn MemoryPool> = Arc::new(UnboundedMemoryPool::default());
        assert_eq!(pool.pool_size(), None);
        let mut r = MemoryConsumer::new("r").register(&pool);
        r.try_grow(usize::MAX / 2).unwrap();
        assert_eq!(pool.reserved(), usize::MAX / 2);
        drop(r);
        assert_eq!(pool.reserved(), 0);
    }
}
