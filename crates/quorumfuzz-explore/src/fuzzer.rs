//! The fuzz loop — seeds, replays, scores, mutates.

use crate::corpus::Corpus;
use crate::engine::{EngineConfig, Executor};
use crate::guider::{Guider, GuiderError};
use crate::mutator::Mutator;
use log::{debug, info, warn};
use quorumfuzz_env::{Checker, EnvironmentConfig};
use quorumfuzz_trace::CoverageStats;
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FuzzError {
    #[error(transparent)]
    Guider(#[from] GuiderError),
}

/// Knobs for one fuzzing campaign.
#[derive(Clone)]
pub struct FuzzerConfig {
    pub iterations: usize,
    pub horizon: usize,
    /// Children generated per new coverage unit.
    pub mut_per_trace: usize,
    /// Random runs pushed into the corpus at every reseed.
    pub seed_population_size: usize,
    pub number_requests: usize,
    pub crash_quota: usize,
    pub max_messages_cap: usize,
    /// Every this many iterations the corpus is cleared and reseeded;
    /// 0 disables reseeding.
    pub reseed_frequency: usize,
    pub seed: u64,
    pub env: EnvironmentConfig,
    pub checker: Option<Checker>,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        Self {
            iterations: 10_000,
            horizon: 100,
            mut_per_trace: 5,
            seed_population_size: 10,
            number_requests: 1,
            crash_quota: 10,
            max_messages_cap: 5,
            reseed_frequency: 2_000,
            seed: 42,
            env: EnvironmentConfig::default(),
            checker: None,
        }
    }
}

/// Counters kept for reporting only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FuzzStats {
    /// Iterations that replayed a corpus entry.
    pub mutated_executions: usize,
    /// Iterations that ran fully random.
    pub random_executions: usize,
    /// Iterations on which the checker returned false.
    pub checker_violations: usize,
    /// Iterations cut short by a Raft panic or environment error.
    pub execution_errors: usize,
    /// Distinct error messages observed.
    pub errors: BTreeSet<String>,
}

/// One fuzzing arm: an executor, a corpus, a mutator and a guider.
pub struct Fuzzer<'a> {
    config: FuzzerConfig,
    executor: Executor,
    corpus: Corpus,
    mutator: &'a mut dyn Mutator,
    guider: &'a dyn Guider,
    stats: FuzzStats,
    next_run: u64,
}

impl<'a> Fuzzer<'a> {
    pub fn new(config: FuzzerConfig, mutator: &'a mut dyn Mutator, guider: &'a dyn Guider) -> Self {
        let engine_config = EngineConfig {
            horizon: config.horizon,
            number_requests: config.number_requests,
            crash_quota: config.crash_quota,
            max_messages_cap: config.max_messages_cap,
            seed: config.seed,
            env: config.env.clone(),
            checker: config.checker,
        };
        Self {
            config,
            executor: Executor::new(engine_config),
            corpus: Corpus::new(),
            mutator,
            guider,
            stats: FuzzStats::default(),
            next_run: 0,
        }
    }

    /// Run all iterations; returns the per-iteration coverage series.
    ///
    /// Raft panics are recorded and the loop moves on; an oracle failure
    /// aborts because the feedback loop cannot continue without it.
    pub fn run(&mut self) -> Result<Vec<CoverageStats>, FuzzError> {
        let mut series = Vec::with_capacity(self.config.iterations);
        for i in 0..self.config.iterations {
            if self.config.reseed_frequency > 0 && i % self.config.reseed_frequency == 0 {
                self.reseed();
            }

            let mimic = self.corpus.pop();
            if mimic.is_some() {
                self.stats.mutated_executions += 1;
            } else {
                self.stats.random_executions += 1;
            }

            let run_id = self.take_run_id();
            let result = self.executor.run_iteration(run_id, mimic.as_ref());
            if let Some(err) = &result.error {
                self.stats.execution_errors += 1;
                self.stats.errors.insert(err.clone());
                warn!("iteration {i} ended early: {err}");
            }
            if result.checker_violated {
                self.stats.checker_violations += 1;
                warn!("iteration {i} violated the checker");
            }

            let (new_units, rate) = self.guider.check(&result.schedule, &result.event_trace)?;
            if new_units > 0 {
                debug!("iteration {i}: {new_units} new coverage units (rate {rate:.3})");
                for _ in 0..new_units * self.config.mut_per_trace {
                    if let Some(child) =
                        self.mutator.mutate(&result.schedule, &result.event_trace)
                    {
                        self.corpus.push(&child);
                    }
                }
            }

            series.push(self.guider.coverage());
        }
        Ok(series)
    }

    /// Clear the corpus and refill it with fresh random runs.
    fn reseed(&mut self) {
        self.corpus.clear();
        info!(
            "seeding corpus with {} random runs",
            self.config.seed_population_size
        );
        for _ in 0..self.config.seed_population_size {
            let run_id = self.take_run_id();
            let result = self.executor.run_iteration(run_id, None);
            if let Some(err) = &result.error {
                self.stats.execution_errors += 1;
                self.stats.errors.insert(err.clone());
            }
            self.corpus.push(&result.schedule);
        }
    }

    fn take_run_id(&mut self) -> u64 {
        let id = self.next_run;
        self.next_run += 1;
        id
    }

    pub fn stats(&self) -> &FuzzStats {
        &self.stats
    }

    pub fn corpus_len(&self) -> usize {
        self.corpus.len()
    }
}
