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

use log::debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Shared state between a spillable operator and an external memory
/// governor that may ask it to give memory back.
///
/// The governor calls [`Self::request_reclaim`] from any thread. The request
/// is never acted upon asynchronously: the owning operator polls
/// [`Self::take_reclaim_request`] at well defined checkpoints of its own
/// thread and spills there.
///
/// While the owner is inside a non-reclaimable section (see
/// [`Self::enter_non_reclaimable`]), requests are refused, so a reclaim can
/// not race with a reservation attempt of the same operator.
#[derive(Debug, Default)]
pub struct MemoryReclaimer {
    non_reclaimable: AtomicBool,
    reclaim_requested: AtomicBool,
    num_reclaims: AtomicUsize,
}

impl MemoryReclaimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while the owner is inside a non-reclaimable section
    pub fn is_non_reclaimable(&self) -> bool {
        self.non_reclaimable.load(Ordering::Acquire)
    }

    /// Marks the owner as non-reclaimable until the returned guard is
    /// dropped. Guards may nest; each restores the previous state.
    pub fn enter_non_reclaimable(&self) -> NonReclaimableSectionGuard<'_> {
        let previous = self.non_reclaimable.swap(true, Ordering::AcqRel);
        NonReclaimableSectionGuard {
            reclaimer: self,
            previous,
        }
    }

    /// Asks the owner to spill at its next checkpoint. Returns false if the
    /// owner is currently non-reclaimable and the request was dropped.
    pub fn request_reclaim(&self) -> bool {
        if self.is_non_reclaimable() {
            debug!("Reclaim request refused inside a non-reclaimable section");
            return false;
        }
        self.reclaim_requested.store(true, Ordering::Release);
        true
    }

    /// Returns true if there is a pending reclaim request, clearing it
    pub fn take_reclaim_request(&self) -> bool {
        let requested = self.reclaim_requested.swap(false, Ordering::AcqRel);
        if requested {
            self.num_reclaims.fetch_add(1, Ordering::Relaxed);
        }
        requested
    }

    /// Returns true if a reclaim request is pending
    pub fn has_pending_request(&self) -> bool {
        self.reclaim_requested.load(Ordering::Acquire)
    }

    /// Number of reclaim requests taken by the owner so far
    pub fn num_reclaims(&self) -> usize {
        self.num_reclaims.load(Ordering::Relaxed)
    }
}

/// RAII guard returned by [`MemoryReclaimer::enter_non_reclaimable`]
#[derive(Debug)]
pub struct NonReclaimableSectionGuard<'a> {
    reclaimer: &'a MemoryReclaimer,
    previous: bool,
}

impl Drop for NonReclaimableSectionGuard<'_> {
    fn drop(&mut self) {
        self.reclaimer
            .non_reclaimable
            .store(self.previous, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn requests_refused_inside_section() {
        let reclaimer = MemoryReclaimer::new();
        {
            let _guard = reclaimer.enter_non_reclaimable();
            assert!(reclaimer.is_non_reclaimable());
            assert!(!reclaimer.request_reclaim());
            {
                let _nested = reclaimer.enter_non_reclaimable();
            }
            // the nested guard restores the outer state
            assert!(reclaimer.is_non_reclaimable());
        }
        assert!(!reclaimer.is_non_reclaimable());
        assert!(!reclaimer.take_reclaim_request());

        assert!(reclaimer.request_reclaim());
        assert!(reclaimer.has_pending_request());
        assert!(reclaimer.take_reclaim_request());
        assert!(!reclaimer.take_reclaim_request());
        assert_eq!(reclaimer.num_reclaims(), 1);
    }

    #[test]
    fn request_from_other_thread() {
        let reclaimer = Arc::new(MemoryReclaimer::new());
        let governor = Arc::clone(&reclaimer);
        thread::spawn(move || assert!(governor.request_reclaim()))
            .join()
            .unwrap();
        assert!(reclaimer.take_reclaim_request());
    }
}
