//! Measurement collection for sort runs.
//!
//! The core emits tagged events `(phase, key, value)` where the value is a
//! count, duration or byte size. Records are buffered per rank and written as
//! `RESULT` lines on the root after a run, one line per record:
//!
//! ```text
//! RESULT num_procs=4 iteration=0 phase=sorting key=alltoall_bytes value=12345
//! ```
//!
//! The tool is passed explicitly into the sort calls; there is no process
//! global state.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Instant;

/// One measurement event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasureRecord {
    /// Coarse phase of the sort (e.g. "sorting", "bloomfilter").
    pub phase: String,
    /// Event key within the phase.
    pub key: String,
    /// Count, byte size, or duration in microseconds.
    pub value: u64,
}

/// Buffers measurement events for one rank.
#[derive(Debug, Default)]
pub struct Measurements {
    /// Prepended to every output line (experiment name, process count, ...).
    prefix: String,
    phase: String,
    records: Vec<MeasureRecord>,
    running: HashMap<String, Instant>,
    enabled: bool,
}

impl Measurements {
    pub fn new(prefix: impl Into<String>) -> Self {
        Measurements {
            prefix: prefix.into(),
            phase: "none".to_string(),
            records: Vec::new(),
            running: HashMap::new(),
            enabled: true,
        }
    }

    /// A sink that drops everything; used by tests that do not care.
    pub fn disabled() -> Self {
        Measurements {
            enabled: false,
            ..Measurements::new("")
        }
    }

    pub fn set_phase(&mut self, phase: &str) {
        self.phase = phase.to_string();
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    /// Records a plain counter value.
    pub fn add(&mut self, key: &str, value: u64) {
        if self.enabled {
            self.records.push(MeasureRecord {
                phase: self.phase.clone(),
                key: key.to_string(),
                value,
            });
        }
    }

    /// Starts a wall-clock timer for `key`.
    pub fn start(&mut self, key: &str) {
        if self.enabled {
            self.running.insert(key.to_string(), Instant::now());
        }
    }

    /// Stops the timer and records the elapsed time in microseconds.
    pub fn stop(&mut self, key: &str) {
        if !self.enabled {
            return;
        }
        let Some(started) = self.running.remove(key) else {
            return;
        };
        let micros = started.elapsed().as_micros() as u64;
        self.records.push(MeasureRecord {
            phase: self.phase.clone(),
            key: format!("{key}_time"),
            value: micros,
        });
    }

    pub fn records(&self) -> &[MeasureRecord] {
        &self.records
    }

    /// Renders all buffered records as RESULT lines.
    pub fn to_result_lines(&self) -> String {
        let mut out = String::new();
        for record in &self.records {
            let _ = writeln!(
                out,
                "RESULT{}{} phase={} key={} value={}",
                if self.prefix.is_empty() { "" } else { " " },
                self.prefix,
                record.phase,
                record.key,
                record.value
            );
        }
        out
    }

    /// Drops all records and running timers, keeping the prefix.
    pub fn reset(&mut self) {
        self.records.clear();
        self.running.clear();
        self.phase = "none".to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_render() {
        let mut m = Measurements::new("num_procs=2");
        m.set_phase("sorting");
        m.add("input_strings", 100);
        m.add("input_chars", 4200);

        let lines = m.to_result_lines();
        assert!(lines.contains("RESULT num_procs=2 phase=sorting key=input_strings value=100"));
        assert!(lines.contains("key=input_chars value=4200"));
    }

    #[test]
    fn test_timer_produces_time_suffix() {
        let mut m = Measurements::new("");
        m.start("merge");
        m.stop("merge");
        assert_eq!(m.records().len(), 1);
        assert_eq!(m.records()[0].key, "merge_time");
    }

    #[test]
    fn test_disabled_sink_discards() {
        let mut m = Measurements::disabled();
        m.add("x", 1);
        m.start("y");
        m.stop("y");
        assert!(m.records().is_empty());
    }

    #[test]
    fn test_reset() {
        let mut m = Measurements::new("p");
        m.add("x", 1);
        m.reset();
        assert!(m.records().is_empty());
        assert_eq!(m.phase(), "none");
    }
}
