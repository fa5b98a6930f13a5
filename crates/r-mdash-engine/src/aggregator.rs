//! ---
//! ems_section: "11-telemetry-replay-analytics"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Replay, analytics and chart preparation for machine telemetry."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Trailing-window KPIs.
//!
//! The window ends at the cursor inclusive and holds at most `window` samples.
//! It is never padded and never looks ahead, so early in a sequence it is
//! simply shorter.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, Result};
use crate::sample::{MachineState, Sample};
use crate::store::SequenceStore;

/// Nominal sampling rate the throughput figure assumes.
const SAMPLES_PER_MINUTE: f64 = 60.0;

/// KPI set derived from one window. Replaced wholesale whenever the cursor moves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiSnapshot {
    /// Store index of the first sample in the window.
    pub window_start: usize,
    pub window_len: usize,
    pub uptime_percent: f64,
    pub idle_percent: f64,
    pub off_percent: f64,
    pub avg_power: f64,
    /// `max(kwh_total) - min(kwh_total)` over the window.
    pub energy_delta: f64,
    pub avg_pf: f64,
    /// Units produced inside the window, ignoring counter resets.
    pub count_delta: u64,
    /// Units per minute.
    pub throughput: f64,
    /// Spread of the current sample's phase currents, in percent of their mean.
    pub phase_imbalance: f64,
    pub max_temp: f64,
    pub min_temp: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct WindowAggregator {
    window: usize,
}

impl Default for WindowAggregator {
    fn default() -> Self {
        Self {
            window: Self::DEFAULT_WINDOW,
        }
    }
}

impl WindowAggregator {
    pub const DEFAULT_WINDOW: usize = 60;

    pub fn new(window: usize) -> Result<Self> {
        if window == 0 {
            return Err(EngineError::InvalidWindow);
        }
        Ok(Self { window })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Store indices covered by the window ending at `cursor` in a sequence
    /// of `len` samples.
    pub fn window_bounds(&self, cursor: usize, len: usize) -> Result<Range<usize>> {
        if cursor >= len {
            return Err(EngineError::IndexOutOfRange { index: cursor, len });
        }
        let end = cursor + 1;
        Ok(end.saturating_sub(self.window)..end)
    }

    /// KPIs for the window ending at `cursor`, or `None` when there is no cursor
    /// or nothing stored.
    pub fn aggregate(
        &self,
        store: &SequenceStore,
        cursor: Option<usize>,
    ) -> Result<Option<KpiSnapshot>> {
        let Some(cursor) = cursor else {
            return Ok(None);
        };
        if store.is_empty() {
            return Ok(None);
        }
        let bounds = self.window_bounds(cursor, store.len())?;
        let window = store.slice(bounds.start, bounds.end)?;
        Ok(summarize(window, bounds.start))
    }
}

/// Reduce `window` to a [`KpiSnapshot`]; its last sample is the current one.
pub fn summarize(window: &[Sample], window_start: usize) -> Option<KpiSnapshot> {
    let current = window.last()?;
    let len = window.len();
    let share = |state: MachineState| {
        let hits = window.iter().filter(|sample| sample.state == state).count();
        hits as f64 / len as f64 * 100.0
    };

    let avg_power = window.iter().map(|sample| sample.kw).sum::<f64>() / len as f64;

    let (kwh_min, kwh_max) = extrema(window.iter().map(|sample| sample.kwh_total));
    let (min_temp, max_temp) = extrema(window.iter().map(|sample| sample.temp_c));

    let (pf_sum, pf_count) = window
        .iter()
        .filter(|sample| sample.is_producing())
        .fold((0.0, 0usize), |(sum, count), sample| (sum + sample.pf, count + 1));
    let avg_pf = if pf_count == 0 {
        0.0
    } else {
        pf_sum / pf_count as f64
    };

    let count_delta = counter_progress(window);
    let throughput = if len < 2 {
        0.0
    } else {
        count_delta as f64 / (len as f64 / SAMPLES_PER_MINUTE)
    };

    Some(KpiSnapshot {
        window_start,
        window_len: len,
        uptime_percent: share(MachineState::Run),
        idle_percent: share(MachineState::Idle),
        off_percent: share(MachineState::Off),
        avg_power,
        energy_delta: kwh_max - kwh_min,
        avg_pf,
        count_delta,
        throughput,
        phase_imbalance: phase_imbalance(current),
        max_temp,
        min_temp,
    })
}

/// `(max - min) / mean * 100` of the three phase currents; 0 when the mean is 0.
pub fn phase_imbalance(sample: &Sample) -> f64 {
    let currents = [sample.ir, sample.iy, sample.ib];
    let mean = currents.iter().sum::<f64>() / currents.len() as f64;
    if mean.abs() <= f64::EPSILON {
        return 0.0;
    }
    let (min, max) = extrema(currents.into_iter());
    (max - min) / mean * 100.0
}

/// Sum of the non-negative steps of `count_total`. A decrease is a counter
/// reset and contributes nothing.
fn counter_progress(window: &[Sample]) -> u64 {
    window
        .windows(2)
        .map(|pair| pair[1].count_total.saturating_sub(pair[0].count_total))
        .sum()
}

fn extrema(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), value| {
        (min.min(value), max.max(value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample, series};

    fn store_of(samples: Vec<Sample>) -> SequenceStore {
        let mut store = SequenceStore::new();
        store.load(samples).unwrap();
        store
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn average_power_over_full_window() {
        let store = store_of(series(&[10.0, 12.0, 11.0, 13.0, 9.0]));
        let kpis = WindowAggregator::new(5)
            .unwrap()
            .aggregate(&store, Some(4))
            .unwrap()
            .unwrap();
        assert!(approx(kpis.avg_power, 11.0));
        assert_eq!(kpis.window_len, 5);
    }

    #[test]
    fn energy_delta_absorbs_single_counter_reset() {
        let mut samples = series(&[1.0; 5]);
        for (sample, kwh) in samples.iter_mut().zip([100.0, 100.5, 101.0, 50.0, 50.3]) {
            sample.kwh_total = kwh;
        }
        let store = store_of(samples);
        let kpis = WindowAggregator::new(5)
            .unwrap()
            .aggregate(&store, Some(4))
            .unwrap()
            .unwrap();
        assert!(approx(kpis.energy_delta, 51.0));
        assert!(kpis.energy_delta >= 0.0);
    }

    #[test]
    fn phase_imbalance_of_current_sample() {
        let mut balanced = sample(0, MachineState::Run, 5.0);
        (balanced.ir, balanced.iy, balanced.ib) = (10.0, 10.0, 10.0);
        assert_eq!(phase_imbalance(&balanced), 0.0);

        let mut skewed = balanced.clone();
        (skewed.ir, skewed.iy, skewed.ib) = (10.0, 12.0, 8.0);
        assert!(approx(phase_imbalance(&skewed), 40.0));

        let mut dead = balanced;
        (dead.ir, dead.iy, dead.ib) = (0.0, 0.0, 0.0);
        assert_eq!(phase_imbalance(&dead), 0.0);
    }

    #[test]
    fn state_shares_exclude_stop() {
        let states = [
            MachineState::Run,
            MachineState::Run,
            MachineState::Idle,
            MachineState::Stop,
            MachineState::Off,
        ];
        let samples: Vec<Sample> = states
            .iter()
            .enumerate()
            .map(|(i, state)| sample(i as i64 * 1_000, *state, 1.0))
            .collect();
        let kpis = summarize(&samples, 0).unwrap();
        assert!(approx(kpis.uptime_percent, 40.0));
        assert!(approx(kpis.idle_percent, 20.0));
        assert!(approx(kpis.off_percent, 20.0));
        assert!(kpis.uptime_percent + kpis.idle_percent + kpis.off_percent < 100.0);
    }

    #[test]
    fn power_factor_averages_only_run_and_idle_samples() {
        let mut samples = vec![
            sample(0, MachineState::Run, 1.0),
            sample(1_000, MachineState::Idle, 1.0),
            sample(2_000, MachineState::Off, 0.0),
        ];
        samples[0].pf = 0.9;
        samples[1].pf = 0.7;
        samples[2].pf = 0.0;
        assert!(approx(summarize(&samples, 0).unwrap().avg_pf, 0.8));

        let stopped = vec![sample(0, MachineState::Stop, 0.0), sample(1_000, MachineState::Off, 0.0)];
        assert_eq!(summarize(&stopped, 0).unwrap().avg_pf, 0.0);
    }

    #[test]
    fn throughput_scales_count_progress_to_units_per_minute() {
        let mut samples = series(&[1.0; 6]);
        for (i, sample) in samples.iter_mut().enumerate() {
            sample.count_total = 100 + i as u64;
        }
        let kpis = summarize(&samples, 0).unwrap();
        assert_eq!(kpis.count_delta, 5);
        assert!(approx(kpis.throughput, 5.0 / (6.0 / 60.0)));

        assert_eq!(summarize(&samples[..1], 0).unwrap().throughput, 0.0);
    }

    #[test]
    fn counter_reset_never_counts_negative_progress() {
        let mut samples = series(&[1.0; 4]);
        for (sample, count) in samples.iter_mut().zip([500, 502, 3, 5]) {
            sample.count_total = count;
        }
        assert_eq!(summarize(&samples, 0).unwrap().count_delta, 4);
    }

    #[test]
    fn window_is_truncated_at_sequence_start() {
        let store = store_of(series(&[1.0, 2.0, 3.0, 4.0]));
        let aggregator = WindowAggregator::new(60).unwrap();
        let kpis = aggregator.aggregate(&store, Some(1)).unwrap().unwrap();
        assert_eq!(kpis.window_start, 0);
        assert_eq!(kpis.window_len, 2);
        assert!(approx(kpis.avg_power, 1.5));

        let narrow = WindowAggregator::new(2).unwrap();
        assert_eq!(narrow.window_bounds(3, 4).unwrap(), 2..4);
    }

    #[test]
    fn cursor_past_end_is_out_of_range() {
        let store = store_of(series(&[1.0, 2.0, 3.0]));
        let aggregator = WindowAggregator::new(2).unwrap();
        for cursor in [3, usize::MAX] {
            assert!(matches!(
                aggregator.aggregate(&store, Some(cursor)),
                Err(EngineError::IndexOutOfRange { index, len: 3 }) if index == cursor
            ));
        }
        assert!(aggregator.window_bounds(usize::MAX, usize::MAX).is_err());
    }

    #[test]
    fn temperature_extrema_cover_window() {
        let mut samples = series(&[1.0; 3]);
        for (sample, temp) in samples.iter_mut().zip([41.0, 47.5, 39.2]) {
            sample.temp_c = temp;
        }
        let kpis = summarize(&samples, 0).unwrap();
        assert_eq!(kpis.max_temp, 47.5);
        assert_eq!(kpis.min_temp, 39.2);
    }

    #[test]
    fn no_cursor_or_empty_store_yields_no_data() {
        let aggregator = WindowAggregator::default();
        assert!(aggregator
            .aggregate(&SequenceStore::new(), Some(0))
            .unwrap()
            .is_none());
        let store = store_of(series(&[1.0]));
        assert!(aggregator.aggregate(&store, None).unwrap().is_none());
        assert!(aggregator.aggregate(&store, Some(5)).is_err());
        assert!(matches!(WindowAggregator::new(0), Err(EngineError::InvalidWindow)));
    }

    #[test]
    fn state_shares_stay_within_bounds_for_every_cursor() {
        let states = [MachineState::Run, MachineState::Idle, MachineState::Stop, MachineState::Off];
        let samples: Vec<Sample> = (0..40)
            .map(|i| sample(i * 1_000, states[(i as usize * 7) % 4], 2.0))
            .collect();
        let store = store_of(samples);
        let aggregator = WindowAggregator::new(9).unwrap();
        for cursor in 0..store.len() {
            let kpis = aggregator.aggregate(&store, Some(cursor)).unwrap().unwrap();
            for share in [kpis.uptime_percent, kpis.idle_percent, kpis.off_percent] {
                assert!((0.0..=100.0).contains(&share));
            }
            assert!(kpis.energy_delta >= 0.0);
        }
    }
}
