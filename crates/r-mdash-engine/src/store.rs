//! ---
//! ems_section: "11-telemetry-replay-analytics"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Replay, analytics and chart preparation for machine telemetry."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::ops::Range;

use tracing::debug;

use crate::errors::{EngineError, Result};
use crate::sample::Sample;

/// Ordered sample history for one machine session.
///
/// Live sessions grow it through [`SequenceStore::append`]; replay sessions
/// replace it wholesale through [`SequenceStore::load`]. Samples are never
/// reordered.
#[derive(Debug, Default, Clone)]
pub struct SequenceStore {
    samples: Vec<Sample>,
}

impl SequenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last_index(&self) -> Option<usize> {
        self.samples.len().checked_sub(1)
    }

    pub fn machine_id(&self) -> Option<&str> {
        self.samples.first().map(|sample| sample.machine_id.as_str())
    }

    /// Append one sample at the end.
    ///
    /// Rejects the sample without touching the store when its timestamp is
    /// older than the last stored one, when it belongs to another machine, or
    /// when it fails [`Sample::validate`].
    pub fn append(&mut self, sample: Sample) -> Result<usize> {
        sample.validate()?;
        if let Some(last) = self.samples.last() {
            if sample.ts < last.ts {
                return Err(EngineError::OutOfOrder {
                    previous_ts: last.ts,
                    rejected_ts: sample.ts,
                });
            }
            if sample.machine_id != last.machine_id {
                return Err(EngineError::MachineMismatch {
                    expected: last.machine_id.clone(),
                    found: sample.machine_id,
                });
            }
        }
        self.samples.push(sample);
        Ok(self.samples.len() - 1)
    }

    /// Replace the whole store. On error the previous contents are kept.
    pub fn load(&mut self, samples: Vec<Sample>) -> Result<()> {
        let Some(first) = samples.first() else {
            return Err(EngineError::EmptySequence);
        };
        for sample in &samples {
            sample.validate()?;
            if sample.machine_id != first.machine_id {
                return Err(EngineError::MachineMismatch {
                    expected: first.machine_id.clone(),
                    found: sample.machine_id.clone(),
                });
            }
        }
        if let Some(pair) = samples.windows(2).find(|pair| pair[1].ts < pair[0].ts) {
            return Err(EngineError::OutOfOrder {
                previous_ts: pair[0].ts,
                rejected_ts: pair[1].ts,
            });
        }
        debug!(machine = %first.machine_id, samples = samples.len(), "sequence loaded");
        self.samples = samples;
        Ok(())
    }

    pub fn at(&self, index: usize) -> Result<&Sample> {
        self.samples.get(index).ok_or(EngineError::IndexOutOfRange {
            index,
            len: self.samples.len(),
        })
    }

    /// Borrow `start..end`. Both bounds must address stored samples, so
    /// `end` may equal the length but `start` may not.
    pub fn slice(&self, start: usize, end: usize) -> Result<&[Sample]> {
        let len = self.samples.len();
        if start >= len || start > end {
            return Err(EngineError::IndexOutOfRange { index: start, len });
        }
        if end > len {
            return Err(EngineError::IndexOutOfRange { index: end, len });
        }
        Ok(&self.samples[start..end])
    }

    pub fn range(&self, range: Range<usize>) -> Result<&[Sample]> {
        self.slice(range.start, range.end)
    }
}
