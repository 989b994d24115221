//! Cumulative state coverage over a directory of recorded traces.
//!
//! Re-runs each saved event trace through the oracle and tracks how many
//! distinct abstract states the corpus reaches as traces accumulate.

use crate::oracle::{OracleError, TlcClient};
use log::info;
use quorumfuzz_trace::EventTrace;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeasureError {
    #[error("error reading traces: {0}")]
    Io(#[from] std::io::Error),
    #[error("error parsing trace file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// The on-disk shape written by a recording guider.
#[derive(Deserialize)]
struct RecordedTrace {
    event_trace: EventTrace,
}

/// Replays recorded event traces and accumulates state-key coverage.
pub struct CoverageMeasurer {
    traces_path: PathBuf,
    out_path: PathBuf,
    client: TlcClient,
    seen: HashMap<i64, usize>,
}

impl CoverageMeasurer {
    pub fn new(
        traces_path: impl Into<PathBuf>,
        out_path: impl Into<PathBuf>,
        tlc_addr: &str,
    ) -> Self {
        Self {
            traces_path: traces_path.into(),
            out_path: out_path.into(),
            client: TlcClient::new(tlc_addr),
            seen: HashMap::new(),
        }
    }

    /// Run the whole corpus; returns the cumulative unique-state counts
    /// (index 0 is the empty corpus) and writes them to
    /// `tlccoverage.json` under the output path.
    pub fn measure(&mut self) -> Result<Vec<usize>, MeasureError> {
        let files = self.trace_files()?;
        info!("measuring coverage over {} traces", files.len());

        let mut coverages = vec![0];
        for path in &files {
            let events = parse_trace(path)?;
            let states = self.client.send_trace(&events)?;
            for state in states {
                *self.seen.entry(state.key).or_insert(0) += 1;
            }
            coverages.push(self.seen.len());
        }

        fs::create_dir_all(&self.out_path)?;
        let out = self.out_path.join("tlccoverage.json");
        fs::write(
            &out,
            serde_json::to_vec_pretty(&serde_json::json!({ "coverages": coverages }))?,
        )?;
        info!("wrote coverage curve to {:?}", out);
        Ok(coverages)
    }

    /// All `.json` files under the traces directory, in numeric order of
    /// their file stems where possible.
    fn trace_files(&self) -> Result<Vec<PathBuf>, MeasureError> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.traces_path)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort_by_key(|path| {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            (stem.parse::<usize>().unwrap_or(usize::MAX), stem.to_string())
        });
        Ok(files)
    }
}

/// A trace file is either a recorded `{trace, event_trace, state_trace}`
/// object or a bare event array.
fn parse_trace(path: &Path) -> Result<EventTrace, MeasureError> {
    let data = fs::read_to_string(path)?;
    if let Ok(recorded) = serde_json::from_str::<RecordedTrace>(&data) {
        return Ok(recorded.event_trace);
    }
    Ok(serde_json::from_str::<EventTrace>(&data)?)
}
