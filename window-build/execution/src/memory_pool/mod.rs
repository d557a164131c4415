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

//! [`MemoryPool`] for memory management during query execution, and
//! [`MemoryReclaimer`] for coordinating spills with an external governor

use log::debug;
use std::sync::Arc;
use window_build_common::Result;

mod pool;
mod reclaim;

pub use pool::*;
pub use reclaim::*;
pub use window_build_common::human_readable_size;

/// Tracks and potentially limits memory use across operators during execution.
///
/// Operators register a [`MemoryConsumer`] and receive a
/// [`MemoryReservation`]. A reservation distinguishes between the bytes it
/// has *reserved* from the pool and the bytes it has actually *used*, which
/// lets an operator pre-commit headroom before it allocates:
///
/// ```text
///            reserved (size)
///   ┌──────────────────────────────────┐
///   │       used        │  available   │
///   └──────────────────────────────────┘
/// ```
///
/// Only changes of the reserved size are reported to the pool, so the pool
/// only has to reason about reservations.
pub trait MemoryPool: Send + Sync + std::fmt::Debug {
    /// Registers a new [`MemoryConsumer`]
    fn register(&self, _consumer: &MemoryConsumer) {}

    /// Records the destruction of a [`MemoryReservation`] with [`MemoryConsumer`]
    fn unregister(&self, _consumer: &MemoryConsumer) {}

    /// Infallibly grow the provided `reservation` by `additional` bytes
    fn grow(&self, reservation: &MemoryReservation, additional: usize);

    /// Infallibly shrink the provided `reservation` by `shrink` bytes
    fn shrink(&self, reservation: &MemoryReservation, shrink: usize);

    /// Attempt to grow the provided `reservation` by `additional` bytes
    ///
    /// On error the `allocation` will not be increased in size
    fn try_grow(&self, reservation: &MemoryReservation, additional: usize) -> Result<()>;

    /// Return the total amount of memory reserved
    fn reserved(&self) -> usize;

    /// Return the configured pool size, `None` if unbounded
    fn pool_size(&self) -> Option<usize>;
}

/// A memory consumer is a named allocation traced by a particular
/// [`MemoryReservation`] in a [`MemoryPool`]
#[derive(Debug)]
pub struct MemoryConsumer {
    name: String,
    can_spill: bool,
}

impl MemoryConsumer {
    /// Create a new empty [`MemoryConsumer`] that can be grown using [`MemoryReservation`]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            can_spill: false,
        }
    }

    /// Set whether this allocation can be spilled to disk
    pub fn with_can_spill(self, can_spill: bool) -> Self {
        Self { can_spill, ..self }
    }

    /// Returns true if this allocation can spill to disk
    pub fn can_spill(&self) -> bool {
        self.can_spill
    }

    /// Returns the name associated with this allocation
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers this [`MemoryConsumer`] with the provided [`MemoryPool`] returning
    /// a [`MemoryReservation`] that can be used to grow or shrink the memory reservation
    pub fn register(self, pool: &Arc<dyn MemoryPool>) -> MemoryReservation {
        pool.register(&self);
        MemoryReservation {
            registration: Arc::new(SharedRegistration {
                pool: Arc::clone(pool),
                consumer: self,
            }),
            size: 0,
            used: 0,
        }
    }
}

/// A registration of a [`MemoryConsumer`] with a [`MemoryPool`].
///
/// Calls [`MemoryPool::unregister`] on drop to return any memory to
/// the underlying pool.
#[derive(Debug)]
struct SharedRegistration {
    pool: Arc<dyn MemoryPool>,
    consumer: MemoryConsumer,
}

impl Drop for SharedRegistration {
    fn drop(&mut self) {
        self.pool.unregister(&self.consumer);
    }
}

/// A [`MemoryReservation`] tracks an individual reservation of a number of
/// bytes of memory in a [`MemoryPool`] that is freed back to the pool on
/// drop, together with how much of it is currently in use.
///
/// Invariant: `used <= size` after every successful operation.
#[derive(Debug)]
pub struct MemoryReservation {
    registration: Arc<SharedRegistration>,
    size: usize,
    used: usize,
}

impl MemoryReservation {
    /// Returns the name of the consumer owning this reservation
    pub fn name(&self) -> &str {
        self.registration.consumer.name()
    }

    /// Returns the [`MemoryConsumer`] for this [`MemoryReservation`]
    pub fn consumer(&self) -> &MemoryConsumer {
        &self.registration.consumer
    }

    /// Returns the number of bytes reserved from the pool
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the number of reserved bytes currently in use
    pub fn used(&self) -> usize {
        self.used
    }

    /// Returns the reserved bytes not yet in use
    pub fn available(&self) -> usize {
        self.size - self.used
    }

    /// Frees all bytes from this reservation back to the underlying
    /// pool, returning the number of bytes freed.
    pub fn free(&mut self) -> usize {
        let size = self.size;
        if size != 0 {
            self.registration.pool.shrink(self, size);
            self.size = 0;
        }
        self.used = 0;
        size
    }

    /// Frees `capacity` unused bytes from this reservation
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds [`Self::available`]
    pub fn shrink(&mut self, capacity: usize) {
        let new_size = self.size.checked_sub(capacity).unwrap();
        assert!(
            new_size >= self.used,
            "cannot shrink reservation {} below its usage of {} bytes",
            self.name(),
            self.used
        );
        self.registration.pool.shrink(self, capacity);
        self.size = new_size
    }

    /// Increase the size of this reservation by `capacity` bytes
    pub fn grow(&mut self, capacity: usize) {
        self.registration.pool.grow(self, capacity);
        self.size += capacity;
    }

    /// Try to increase the size of this reservation by `capacity`
    /// bytes, returning error if there is insufficient capacity left
    /// in the pool.
    pub fn try_grow(&mut self, capacity: usize) -> Result<()> {
        self.registration.pool.try_grow(self, capacity)?;
        self.size += capacity;
        Ok(())
    }

    /// Best effort attempt to add `capacity` bytes of headroom to this
    /// reservation. Returns false, leaving the reservation unchanged, if
    /// the pool cannot satisfy the request.
    pub fn maybe_reserve(&mut self, capacity: usize) -> bool {
        match self.try_grow(capacity) {
            Ok(()) => true,
            Err(e) => {
                debug!("Reservation {} could not grow: {e}", self.name());
                false
            }
        }
    }

    /// Marks `bytes` as in use, consuming available reservation first and
    /// growing the reservation through the pool for the remainder.
    ///
    /// This is where true memory exhaustion is reported.
    pub fn try_allocate(&mut self, bytes: usize) -> Result<()> {
        let available = self.available();
        if bytes > available {
            self.try_grow(bytes - available)?;
        }
        self.used += bytes;
        Ok(())
    }

    /// Marks `bytes` previously allocated as no longer in use. The bytes
    /// stay reserved until [`Self::release`] or [`Self::free`].
    pub fn deallocate(&mut self, bytes: usize) {
        debug_assert!(bytes <= self.used, "deallocating more than was allocated");
        self.used = self.used.saturating_sub(bytes);
    }

    /// Returns the unused part of the reservation to the pool, returning
    /// the number of bytes released
    pub fn release(&mut self) -> usize {
        let unused = self.available();
        if unused != 0 {
            self.shrink(unused);
        }
        unused
    }

    /// Returns a new empty [`MemoryReservation`] with the same [`MemoryConsumer`]
    pub fn new_empty(&self) -> Self {
        Self {
            size: 0,
            used: 0,
            registration: Arc::clone(&self.registration),
        }
    }
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        self.free();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_pool_underflow() {
        let pool: Arc<dyn MemoryPool> = Arc::new(GreedyMemoryPool::new(50));
        let mut a1 = MemoryConsumer::new("a1").register(&pool);
        assert_eq!(pool.reserved(), 0);

        a1.grow(100);
        assert_eq!(pool.reserved(), 100);

        assert_eq!(a1.free(), 100);
        assert_eq!(pool.reserved(), 0);

        a1.try_grow(100).unwrap_err();
        assert_eq!(pool.reserved(), 0);

        a1.try_grow(30).unwrap();
        assert_eq!(pool.reserved(), 30);

        let mut a2 = MemoryConsumer::new("a2").register(&pool);
        a2.try_grow(25).unwrap_err();
        assert_eq!(pool.reserved(), 30);

        drop(a1);
        assert_eq!(pool.reserved(), 0);

        a2.try_grow(25).unwrap();
        assert_eq!(pool.reserved(), 25);
    }

    #[test]
    fn test_allocate_within_reservation() {
        let pool: Arc<dyn MemoryPool> = Arc::new(GreedyMemoryPool::new(100));
        let mut r = MemoryConsumer::new("window").register(&pool);

        assert!(r.maybe_reserve(40));
        assert_eq!((r.size(), r.used(), r.available()), (40, 0, 40));

        // Served from the existing reservation, the pool does not change
        r.try_allocate(30).unwrap();
        assert_eq!((r.size(), r.used(), r.available()), (40, 30, 10));
        assert_eq!(pool.reserved(), 40);

        // Grows the reservation by the missing 20 bytes only
        r.try_allocate(30).unwrap();
        assert_eq!((r.size(), r.used(), r.available()), (60, 60, 0));
        assert_eq!(pool.reserved(), 60);

        // Exhaustion is reported by the pool
        let err = r.try_allocate(50).unwrap_err();
        assert!(err.to_string().starts_with("Resources exhausted"));
        assert_eq!(r.used(), 60);

        r.deallocate(60);
        assert_eq!(r.available(), 60);
        assert_eq!(r.release(), 60);
        assert_eq!(pool.reserved(), 0);
    }

    #[test]
    fn test_maybe_reserve_is_best_effort() {
        let pool: Arc<dyn MemoryPool> = Arc::new(GreedyMemoryPool::new(10));
        let mut r = MemoryConsumer::new("window")
            .with_can_spill(true)
            .register(&pool);
        assert!(r.consumer().can_spill());
        assert!(!r.maybe_reserve(11));
        assert_eq!(r.size(), 0);
        assert!(r.maybe_reserve(10));
        assert_eq!(pool.reserved(), 10);
    }
}
