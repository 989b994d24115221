//! Corpus — FIFO of schedules that earned the right to be mutated.

use quorumfuzz_trace::{Schedule, SchedulingChoice};
use std::collections::VecDeque;

/// Predicate deciding which choices survive the copy into the corpus.
pub type CopyFilter = fn(&SchedulingChoice) -> bool;

/// Keep every choice. Exists so specific kinds (e.g. client requests) can
/// be stripped from corpus entries later without touching call sites.
pub fn default_copy_filter(_choice: &SchedulingChoice) -> bool {
    true
}

/// FIFO queue of seed schedules awaiting replay.
///
/// Entries are deep copies: pushing never aliases the caller's schedule,
/// and mutating a popped entry can never affect another entry.
pub struct Corpus {
    entries: VecDeque<Schedule>,
    filter: CopyFilter,
}

impl Corpus {
    /// Empty corpus with the default (keep-everything) filter.
    pub fn new() -> Self {
        Self::with_filter(default_copy_filter)
    }

    pub fn with_filter(filter: CopyFilter) -> Self {
        Self {
            entries: VecDeque::new(),
            filter,
        }
    }

    /// Copy a schedule into the queue, applying the copy filter.
    pub fn push(&mut self, schedule: &Schedule) {
        let copied: Schedule = schedule
            .iter()
            .filter(|c| (self.filter)(c))
            .cloned()
            .collect();
        self.entries.push_back(copied);
    }

    /// Take the oldest entry.
    pub fn pop(&mut self) -> Option<Schedule> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries (used when the fuzz loop reseeds).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for Corpus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> Schedule {
        Schedule::from(vec![
            SchedulingChoice::Node {
                from: 1,
                to: 2,
                max_messages: 3,
            },
            SchedulingChoice::ClientRequest {
                step: 0,
                request_id: 1,
            },
        ])
    }

    #[test]
    fn fifo_order() {
        let mut corpus = Corpus::new();
        let a = Schedule::from(vec![SchedulingChoice::RandomInteger { value: 1 }]);
        let b = Schedule::from(vec![SchedulingChoice::RandomInteger { value: 2 }]);
        corpus.push(&a);
        corpus.push(&b);
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.pop().unwrap(), a);
        assert_eq!(corpus.pop().unwrap(), b);
        assert!(corpus.pop().is_none());
    }

    #[test]
    fn push_copies_content() {
        let mut corpus = Corpus::new();
        let s = schedule();
        corpus.push(&s);
        let popped = corpus.pop().unwrap();
        assert_eq!(popped, s);
    }

    #[test]
    fn filter_strips_choices() {
        fn no_requests(c: &SchedulingChoice) -> bool {
            !matches!(c, SchedulingChoice::ClientRequest { .. })
        }
        let mut corpus = Corpus::with_filter(no_requests);
        corpus.push(&schedule());
        let popped = corpus.pop().unwrap();
        assert_eq!(popped.len(), 1);
        assert!(popped.choices()[0].is_node());
    }

    #[test]
    fn clear_empties_queue() {
        let mut corpus = Corpus::new();
        corpus.push(&schedule());
        corpus.push(&schedule());
        corpus.clear();
        assert!(corpus.is_empty());
    }
}
