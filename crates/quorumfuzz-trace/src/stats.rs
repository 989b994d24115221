//! Coverage counters shared between guiders and reporting.

use serde::{Deserialize, Serialize};

/// A snapshot of the coverage a guider has accumulated.
///
/// All three counters are monotonically non-decreasing between calls to a
/// guider's `reset`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageStats {
    /// Distinct abstract states reported by the oracle.
    pub unique_states: usize,
    /// Distinct traces (scheduling traces, or event-chain keys for the
    /// trace-coverage guider).
    pub unique_traces: usize,
    /// Distinct abstract state sequences.
    pub unique_state_traces: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialises_field_names() {
        let stats = CoverageStats {
            unique_states: 3,
            unique_traces: 2,
            unique_state_traces: 1,
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["unique_states"], 3);
        assert_eq!(json["unique_traces"], 2);
        assert_eq!(json["unique_state_traces"], 1);
    }
}
