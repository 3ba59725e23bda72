use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    error::Result,
    state::{StateStore, LAST_RUNS},
};

/// Number of invocation timestamps kept.
pub const CADENCE_CAPACITY: usize = 100;
/// Fewer samples than this cannot yield a meaningful interval.
pub const MIN_SAMPLES: usize = 3;

/// Fixed-capacity buffer of epoch seconds; pushing past capacity evicts the
/// oldest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRing {
    capacity: usize,
    samples: VecDeque<i64>,
}

impl InvocationRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::with_capacity(capacity),
        }
    }

    fn from_samples(capacity: usize, samples: Vec<i64>) -> Self {
        let mut ring = Self::new(capacity);
        for s in samples {
            ring.push(s);
        }
        ring
    }

    pub fn push(&mut self, epoch_secs: i64) {
        self.samples.push_back(epoch_secs);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> impl Iterator<Item = i64> + '_ {
        self.samples.iter().copied()
    }
}

/// Observed gaps between scheduler invocations, in minutes rounded to two
/// decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CadenceStats {
    pub average_minutes: f64,
    pub min_minutes: f64,
    pub max_minutes: f64,
    /// Number of gaps measured (samples - 1).
    pub count: usize,
    pub last: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cadence {
    /// Not enough invocations recorded yet.
    Insufficient { samples: usize },
    Measured(CadenceStats),
}

/// Records when the scheduler was invoked and reports how regular that is.
pub struct CadenceMonitor {
    state: Arc<dyn StateStore>,
    capacity: usize,
}

impl CadenceMonitor {
    pub fn new(state: Arc<dyn StateStore>) -> Self {
        Self::with_capacity(state, CADENCE_CAPACITY)
    }

    pub fn with_capacity(state: Arc<dyn StateStore>, capacity: usize) -> Self {
        Self { state, capacity }
    }

    pub fn load(&self) -> Result<InvocationRing> {
        let samples = match self.state.get(LAST_RUNS)? {
            None => Vec::new(),
            Some(raw) => match serde_json::from_str::<Vec<i64>>(&raw) {
                Ok(samples) => samples,
                Err(e) => {
                    // Not fatal: the buffer only feeds diagnostics.
                    warn!("discarding unreadable invocation history: {e}");
                    Vec::new()
                }
            },
        };
        Ok(InvocationRing::from_samples(self.capacity, samples))
    }

    pub fn log_invocation(&self, now: DateTime<Utc>) -> Result<()> {
        let mut ring = self.load()?;
        ring.push(now.timestamp());
        let encoded = serde_json::to_string(&ring.samples().collect::<Vec<_>>())?;
        self.state.set(LAST_RUNS, &encoded)
    }

    pub fn measure_interval(&self) -> Result<Cadence> {
        let ring = self.load()?;
        Ok(measure(&ring))
    }
}

/// Gap statistics over the samples in chronological order.
pub fn measure(ring: &InvocationRing) -> Cadence {
    if ring.len() < MIN_SAMPLES {
        return Cadence::Insufficient {
            samples: ring.len(),
        };
    }
    let mut samples: Vec<i64> = ring.samples().collect();
    samples.sort_unstable();

    let gaps: Vec<i64> = samples.windows(2).map(|w| w[1] - w[0]).collect();
    let total: i64 = gaps.iter().sum();
    let min = gaps.iter().copied().min().unwrap_or_default();
    let max = gaps.iter().copied().max().unwrap_or_default();
    let last_secs = samples.last().copied().unwrap_or_default();

    Cadence::Measured(CadenceStats {
        average_minutes: round2(total as f64 / gaps.len() as f64 / 60.0),
        min_minutes: round2(min as f64 / 60.0),
        max_minutes: round2(max as f64 / 60.0),
        count: gaps.len(),
        last: DateTime::from_timestamp(last_secs, 0).unwrap_or_default(),
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStateStore;

    fn ring(samples: &[i64]) -> InvocationRing {
        InvocationRing::from_samples(CADENCE_CAPACITY, samples.to_vec())
    }

    #[test]
    fn ring_evicts_oldest() {
        let mut ring = InvocationRing::new(3);
        for s in 1..=5 {
            ring.push(s);
        }
        assert_eq!(ring.samples().collect::<Vec<_>>(), vec![3, 4, 5]);
    }

    #[test]
    fn fewer_than_three_samples_is_insufficient() {
        assert_eq!(measure(&ring(&[])), Cadence::Insufficient { samples: 0 });
        assert_eq!(measure(&ring(&[0, 60])), Cadence::Insufficient { samples: 2 });
    }

    #[test]
    fn gap_statistics() {
        let Cadence::Measured(stats) = measure(&ring(&[0, 60, 125, 185])) else {
            panic!("expected measured cadence");
        };
        assert_eq!(stats.count, 3);
        assert_eq!(stats.average_minutes, 1.03);
        assert_eq!(stats.min_minutes, 1.0);
        assert_eq!(stats.max_minutes, 1.08);
        assert_eq!(stats.last.timestamp(), 185);
    }

    #[test]
    fn out_of_order_samples_are_sorted() {
        let Cadence::Measured(stats) = measure(&ring(&[125, 0, 185, 60])) else {
            panic!("expected measured cadence");
        };
        assert_eq!(stats.min_minutes, 1.0);
        assert_eq!(stats.last.timestamp(), 185);
    }

    #[test]
    fn monitor_persists_and_caps_history() {
        let state = Arc::new(MemoryStateStore::new());
        let monitor = CadenceMonitor::with_capacity(state.clone(), 4);
        for secs in [0, 60, 120, 180, 240, 300] {
            monitor
                .log_invocation(DateTime::from_timestamp(secs, 0).unwrap())
                .unwrap();
        }
        let ring = monitor.load().unwrap();
        assert_eq!(ring.samples().collect::<Vec<_>>(), vec![120, 180, 240, 300]);
        assert_eq!(
            state.get(LAST_RUNS).unwrap().as_deref(),
            Some("[120,180,240,300]")
        );

        match monitor.measure_interval().unwrap() {
            Cadence::Measured(stats) => {
                assert_eq!(stats.count, 3);
                assert_eq!(stats.average_minutes, 1.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn corrupt_history_starts_over() {
        let state = Arc::new(MemoryStateStore::new());
        state.set(LAST_RUNS, "1,2,3").unwrap();
        let monitor = CadenceMonitor::new(state);
        assert!(monitor.load().unwrap().is_empty());
        monitor
            .log_invocation(DateTime::from_timestamp(10, 0).unwrap())
            .unwrap();
        assert_eq!(monitor.load().unwrap().len(), 1);
    }
}
