//! N-way comparison of guidance strategies.
//!
//! Each arm pairs a mutator with a guider; arms run sequentially for a
//! number of repetitions and the per-iteration coverage series, run times
//! and fuzzer stats land in `data.json` under the save path.

use crate::fuzzer::{FuzzError, FuzzStats, Fuzzer, FuzzerConfig};
use crate::guider::Guider;
use crate::mutator::Mutator;
use log::{info, warn};
use quorumfuzz_trace::CoverageStats;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ComparisonError {
    #[error(transparent)]
    Fuzz(#[from] FuzzError),
    #[error("failed to write results: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialise results: {0}")]
    Serialise(#[from] serde_json::Error),
}

struct Arm {
    name: String,
    mutator: Box<dyn Mutator>,
    guider: Box<dyn Guider>,
}

/// Everything recorded for one arm across all repetitions.
#[derive(Debug, Default, Serialize)]
struct ArmRecord {
    average_runtime_secs: f64,
    runtimes_secs: Vec<f64>,
    average_coverage: CoverageStats,
    /// One coverage series per repetition.
    coverages: Vec<Vec<CoverageStats>>,
    stats: Vec<FuzzStats>,
}

/// Sequentially runs every arm `runs` times under the same configuration.
pub struct Comparison {
    config: FuzzerConfig,
    arms: Vec<Arm>,
    save_path: PathBuf,
    runs: usize,
}

impl Comparison {
    /// The save path is recreated from scratch.
    pub fn new(save_path: impl Into<PathBuf>, config: FuzzerConfig, runs: usize) -> Self {
        let save_path = save_path.into();
        if save_path.exists() {
            if let Err(e) = fs::remove_dir_all(&save_path) {
                warn!("failed to clear save path {:?}: {e}", save_path);
            }
        }
        if let Err(e) = fs::create_dir_all(&save_path) {
            warn!("failed to create save path {:?}: {e}", save_path);
        }
        Self {
            config,
            arms: Vec::new(),
            save_path,
            runs,
        }
    }

    pub fn add(&mut self, name: &str, mutator: Box<dyn Mutator>, guider: Box<dyn Guider>) {
        self.arms.push(Arm {
            name: name.to_string(),
            mutator,
            guider,
        });
    }

    /// Run every arm, then write `data.json`.
    pub fn run(&mut self) -> Result<(), ComparisonError> {
        let mut records: BTreeMap<String, ArmRecord> = self
            .arms
            .iter()
            .map(|arm| (arm.name.clone(), ArmRecord::default()))
            .collect();

        for run in 0..self.runs {
            info!("starting run {}/{}", run + 1, self.runs);
            for arm in &mut self.arms {
                info!("running arm {}", arm.name);
                let started = Instant::now();
                let (series, stats) = {
                    let mut fuzzer =
                        Fuzzer::new(self.config.clone(), arm.mutator.as_mut(), arm.guider.as_ref());
                    let series = fuzzer.run()?;
                    (series, fuzzer.stats().clone())
                };
                let elapsed = started.elapsed().as_secs_f64();
                arm.guider.reset(&arm.name);

                if let Some(record) = records.get_mut(&arm.name) {
                    record.runtimes_secs.push(elapsed);
                    record.coverages.push(series);
                    record.stats.push(stats);
                }
            }
        }

        for record in records.values_mut() {
            finalise(record);
        }
        let path = self.save_path.join("data.json");
        fs::write(&path, serde_json::to_vec_pretty(&records)?)?;
        info!("wrote comparison results to {:?}", path);
        Ok(())
    }
}

/// Fill in the averages from the raw series.
fn finalise(record: &mut ArmRecord) {
    if !record.runtimes_secs.is_empty() {
        record.average_runtime_secs =
            record.runtimes_secs.iter().sum::<f64>() / record.runtimes_secs.len() as f64;
    }
    let finals: Vec<CoverageStats> = record
        .coverages
        .iter()
        .filter_map(|series| series.last().copied())
        .collect();
    if !finals.is_empty() {
        record.average_coverage = CoverageStats {
            unique_states: finals.iter().map(|c| c.unique_states).sum::<usize>() / finals.len(),
            unique_traces: finals.iter().map(|c| c.unique_traces).sum::<usize>() / finals.len(),
            unique_state_traces: finals.iter().map(|c| c.unique_state_traces).sum::<usize>()
                / finals.len(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guider::TlcStateGuider;
    use crate::mutator::Empty;
    use quorumfuzz_env::EnvironmentConfig;
    use std::thread;

    fn stub_tlc(responses: Vec<String>) -> (String, thread::JoinHandle<()>) {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let addr = format!("127.0.0.1:{}", server.server_addr().to_ip().unwrap().port());
        let handle = thread::spawn(move || {
            for body in responses {
                let Ok(request) = server.recv() else {
                    break;
                };
                request.respond(tiny_http::Response::from_string(body)).ok();
            }
        });
        (addr, handle)
    }

    fn tiny_config() -> FuzzerConfig {
        FuzzerConfig {
            iterations: 2,
            horizon: 10,
            mut_per_trace: 1,
            seed_population_size: 1,
            number_requests: 0,
            crash_quota: 0,
            max_messages_cap: 3,
            reseed_frequency: 0,
            seed: 1,
            env: EnvironmentConfig {
                replicas: 3,
                election_tick: 8,
                heartbeat_tick: 2,
                ticks_per_step: 2,
            },
            checker: None,
        }
    }

    #[test]
    fn records_series_and_averages_per_arm() {
        let response = r#"{"States":["s"],"Keys":[1]}"#.to_string();
        let (addr, handle) = stub_tlc(vec![response.clone(), response]);
        let dir = tempfile::tempdir().unwrap();
        let save = dir.path().join("results");

        let mut comparison = Comparison::new(&save, tiny_config(), 1);
        comparison.add(
            "random",
            Box::new(Empty),
            Box::new(TlcStateGuider::new(&addr)),
        );
        comparison.run().unwrap();

        let written = fs::read_to_string(save.join("data.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&written).unwrap();
        let arm = &parsed["random"];
        assert_eq!(arm["coverages"].as_array().unwrap().len(), 1);
        assert_eq!(arm["coverages"][0].as_array().unwrap().len(), 2);
        assert_eq!(arm["average_coverage"]["unique_states"], 1);
        assert_eq!(arm["stats"][0]["random_executions"], 2);
        assert_eq!(arm["runtimes_secs"].as_array().unwrap().len(), 1);
        handle.join().unwrap();
    }

    #[test]
    fn finalise_averages_final_coverage() {
        let mut record = ArmRecord {
            runtimes_secs: vec![1.0, 3.0],
            coverages: vec![
                vec![
                    CoverageStats {
                        unique_states: 1,
                        unique_traces: 1,
                        unique_state_traces: 1,
                    },
                    CoverageStats {
                        unique_states: 4,
                        unique_traces: 2,
                        unique_state_traces: 2,
                    },
                ],
                vec![CoverageStats {
                    unique_states: 2,
                    unique_traces: 2,
                    unique_state_traces: 1,
                }],
            ],
            ..Default::default()
        };
        finalise(&mut record);
        assert_eq!(record.average_runtime_secs, 2.0);
        assert_eq!(record.average_coverage.unique_states, 3);
        assert_eq!(record.average_coverage.unique_traces, 2);
    }
}
