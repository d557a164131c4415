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

//! Randomized comparison of the in-memory and spilling window builds

mod common;

use std::sync::Arc;

use common::{assert_partitioned, batch, config, drain, init, normalize, spill_config, Row};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use window_build::arrow::compute::SortOptions;
use window_build::{SortWindowBuild, WindowBuild};
use window_build_common::config::WindowBuildConfig;
use window_build_common::Result;
use window_build_execution::memory_pool::{MemoryPool, MemoryReclaimer};
use window_build_execution::RuntimeEnv;

#[derive(Debug, Clone, Copy)]
enum Mode {
    InMemory,
    ForcedSpill,
    /// Reclaim requested before a random subset of batches
    Reclaim,
}

fn random_batches(rng: &mut StdRng) -> Vec<Vec<Row>> {
    let num_keys = rng.random_range(1..40);
    let num_batches = rng.random_range(1..12);
    let mut next_id = 0;
    (0..num_batches)
        .map(|_| {
            let num_rows = rng.random_range(0..150);
            (0..num_rows)
                .map(|_| {
                    next_id += 1;
                    let partition = rng
                        .random_bool(0.95)
                        .then(|| format!("key-{:03}", rng.random_range(0..num_keys)));
                    let order = rng.random_bool(0.9).then(|| rng.random_range(-20..20));
                    (partition, order, next_id)
                })
                .collect()
        })
        .collect()
}

fn run(
    batches: &[Vec<Row>],
    mode: Mode,
    order: SortOptions,
    rng: &mut StdRng,
) -> Result<Vec<Vec<Row>>> {
    let config = match mode {
        Mode::InMemory => config(None),
        Mode::ForcedSpill => config(Some(spill_config().with_testing_force_spill(true))),
        Mode::Reclaim => config(Some(spill_config())),
    };
    let runtime = Arc::new(RuntimeEnv::default());
    let reclaimer = Arc::new(MemoryReclaimer::new());
    let mut build = SortWindowBuild::try_new(
        common::schema(),
        common::keys(order),
        config,
        Arc::clone(&runtime),
        Arc::clone(&reclaimer),
    )?;

    for rows in batches {
        if matches!(mode, Mode::Reclaim) && rng.random_bool(0.3) {
            reclaimer.request_reclaim();
        }
        build.add_input(&batch(rows))?;
    }
    build.no_more_input()?;
    let partitions = drain(&mut build)?;
    drop(build);

    assert_eq!(runtime.memory_pool.reserved(), 0);
    assert_eq!(runtime.disk_manager.used_disk_space(), 0);
    assert_partitioned(&partitions, order);
    Ok(partitions)
}

#[test]
fn spilling_does_not_change_partitions() -> Result<()> {
    init();
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..30 {
        let batches = random_batches(&mut rng);
        let order = SortOptions {
            descending: rng.random_bool(0.5),
            nulls_first: rng.random_bool(0.5),
        };
        let num_rows: usize = batches.iter().map(Vec::len).sum();

        let expected = normalize(run(&batches, Mode::InMemory, order, &mut rng)?);
        assert_eq!(expected.iter().map(Vec::len).sum::<usize>(), num_rows);
        for mode in [Mode::ForcedSpill, Mode::Reclaim] {
            let actual = normalize(run(&batches, mode, order, &mut rng)?);
            assert_eq!(expected, actual, "{mode:?} with {order:?}");
        }
    }
    Ok(())
}

#[test]
fn custom_row_container_sizes() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(7);
    let batches = random_batches(&mut rng);
    let order = SortOptions::default();

    let runtime = Arc::new(RuntimeEnv::default());
    let mut build = SortWindowBuild::try_new(
        common::schema(),
        common::keys(order),
        WindowBuildConfig::default().with_spill(spill_config()),
        runtime,
        Arc::new(MemoryReclaimer::new()),
    )?;
    for rows in &batches {
        build.add_input(&batch(rows))?;
    }
    build.no_more_input()?;
    let default_sizes = normalize(drain(&mut build)?);

    let small_sizes = normalize(run(&batches, Mode::InMemory, order, &mut rng)?);
    assert_eq!(default_sizes, small_sizes);
    Ok(())
}
