// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/noisefft

//! Static work partitioning across a fixed pool of worker threads

use anyhow::{anyhow, Result};
use crossbeam::thread;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

use super::engine::UnitOutcome;
use super::RunSummary;
use crate::trace::{StationId, UnitHandle};

/// Collect units into one group per station, in station order. Every day of
/// a station lands with the same worker, so no archive has two writers.
pub fn group_by_station(units: Vec<UnitHandle>) -> Vec<Vec<UnitHandle>> {
    let mut groups: BTreeMap<StationId, Vec<UnitHandle>> = BTreeMap::new();
    for unit in units {
        groups.entry(unit.station.clone()).or_default().push(unit);
    }
    groups.into_values().collect()
}

/// Indices of the groups owned by `rank`: group `i` goes to worker
/// `i mod workers`, so the first `n_groups mod workers` ranks take one extra
pub fn assign(n_groups: usize, workers: usize, rank: usize) -> Vec<usize> {
    if workers == 0 {
        return Vec::new();
    }
    (rank..n_groups).step_by(workers).collect()
}

/// Fixed-size pool; the work list is fixed before any worker starts and the
/// scope join is the shutdown barrier
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn run<F>(&self, units: Vec<UnitHandle>, process: F) -> Result<RunSummary>
    where
        F: Fn(&UnitHandle) -> UnitOutcome + Sync,
    {
        let started = Instant::now();
        let groups = group_by_station(units);
        let workers = self.workers.min(groups.len()).max(1);
        let groups = &groups;
        let process = &process;

        let summaries = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for rank in 0..workers {
                let owned = assign(groups.len(), workers, rank);
                let handle = scope
                    .builder()
                    .name(format!("worker-{}", rank))
                    .spawn(move |_| {
                        let started = Instant::now();
                        let mut summary = RunSummary::default();
                        let units: usize = owned.iter().map(|&i| groups[i].len()).sum();
                        info!("Worker {} owns {} stations, {} units", rank, owned.len(), units);

                        for &i in &owned {
                            for unit in &groups[i] {
                                debug!("Worker {} starting {}", rank, unit);
                                summary.record(&process(unit));
                            }
                        }
                        summary.elapsed = started.elapsed();
                        debug!(
                            "Worker {} done: {} written, {} skipped",
                            rank, summary.written, summary.skipped
                        );
                        summary
                    })?;
                handles.push(handle);
            }

            handles
                .into_iter()
                .map(|handle| handle.join().map_err(|_| anyhow!("worker thread panicked")))
                .collect::<Result<Vec<_>>>()
        })
        .map_err(|_| anyhow!("worker pool panicked"))??;

        let mut total = RunSummary::default();
        for summary in summaries {
            total.merge(summary);
        }
        total.elapsed = started.elapsed();
        Ok(total)
    }
}
