//! ---
//! ems_section: "11-telemetry-replay-analytics"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Replay, analytics and chart preparation for machine telemetry."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Chart preparation.
//!
//! Decimation is strict stride sampling: every `ceil(len / N)`-th raw sample is
//! kept unchanged, nothing is interpolated. The value domain is always taken
//! over the full range so summary numbers do not depend on the point budget.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, Result};
use crate::sample::SampleField;
use crate::store::SequenceStore;

/// How many points a chart may receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointBudget {
    /// Overview charts. A budget of 0 is treated as 1.
    Max(usize),
    /// Inline sparklines over short ranges.
    Unbounded,
}

impl Default for PointBudget {
    fn default() -> Self {
        PointBudget::Max(VisualizationPreparer::DEFAULT_OVERVIEW_POINTS)
    }
}

impl PointBudget {
    pub fn stride(self, len: usize) -> usize {
        match self {
            PointBudget::Max(points) => len.div_ceil(points.max(1)).max(1),
            PointBudget::Unbounded => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecimatedPoint {
    /// Index into the sequence store.
    pub index: usize,
    pub value: f64,
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueDomain {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl ValueDomain {
    /// `max - min`, or 1 for a flat series so normalisation never divides by zero.
    pub fn span(&self) -> f64 {
        let span = self.max - self.min;
        if span > 0.0 {
            span
        } else {
            1.0
        }
    }
}

/// Point projected into a `width x height` box with y growing downwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlotPoint {
    pub index: usize,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visualization {
    pub field: SampleField,
    pub start: usize,
    pub end: usize,
    pub stride: usize,
    pub points: Vec<DecimatedPoint>,
    pub domain: ValueDomain,
}

impl Visualization {
    /// Store index behind the point at `position`.
    pub fn original_index(&self, position: usize) -> Option<usize> {
        (position < self.points.len()).then(|| self.start + position * self.stride)
    }

    /// Position of the plotted point closest to store index `index`.
    pub fn nearest_position(&self, index: usize) -> Option<usize> {
        if !(self.start..self.end).contains(&index) || self.points.is_empty() {
            return None;
        }
        let offset = index - self.start;
        let position = (offset + self.stride / 2) / self.stride;
        Some(position.min(self.points.len() - 1))
    }

    pub fn plot_coordinates(&self, width: f64, height: f64) -> Vec<PlotPoint> {
        let last = self.points.len().saturating_sub(1);
        let span = self.domain.span();
        self.points
            .iter()
            .enumerate()
            .map(|(position, point)| {
                let x = if last == 0 {
                    0.0
                } else {
                    position as f64 / last as f64 * width
                };
                let y = height - (point.value - self.domain.min) / span * height;
                PlotPoint {
                    index: point.index,
                    x,
                    y,
                }
            })
            .collect()
    }
}

/// Stateless decimator; repeated calls over an unchanged store return equal output.
#[derive(Debug, Clone, Copy, Default)]
pub struct VisualizationPreparer {
    overview: PointBudget,
}

impl VisualizationPreparer {
    pub const DEFAULT_OVERVIEW_POINTS: usize = 500;

    pub fn new(overview: PointBudget) -> Self {
        Self { overview }
    }

    /// Decimate with the configured overview budget.
    pub fn overview(
        &self,
        store: &SequenceStore,
        range: Range<usize>,
        field: SampleField,
    ) -> Result<Visualization> {
        self.prepare(store, range, self.overview, field)
    }

    pub fn prepare(
        &self,
        store: &SequenceStore,
        range: Range<usize>,
        budget: PointBudget,
        field: SampleField,
    ) -> Result<Visualization> {
        if range.start == range.end {
            return Err(EngineError::EmptyRange {
                start: range.start,
                end: range.end,
            });
        }
        let samples = store.range(range.clone())?;
        let stride = budget.stride(samples.len());

        let points = samples
            .iter()
            .enumerate()
            .step_by(stride)
            .map(|(offset, sample)| DecimatedPoint {
                index: range.start + offset,
                value: field.value(sample),
                ts: sample.ts,
            })
            .collect();

        let (min, max, sum) = samples.iter().map(|sample| field.value(sample)).fold(
            (f64::INFINITY, f64::NEG_INFINITY, 0.0),
            |(min, max, sum), value| (min.min(value), max.max(value), sum + value),
        );

        Ok(Visualization {
            field,
            start: range.start,
            end: range.end,
            stride,
            points,
            domain: ValueDomain {
                min,
                max,
                mean: sum / samples.len() as f64,
            },
        })
    }
}

/// Zoom and pan as chosen by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    zoom: f64,
    pan: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { zoom: 1.0, pan: 0.0 }
    }
}

impl Viewport {
    pub const MIN_ZOOM: f64 = 0.5;
    pub const MAX_ZOOM: f64 = 10.0;

    /// `zoom` is clamped to `[MIN_ZOOM, MAX_ZOOM]`, `pan` to `[0, 1]`.
    pub fn new(zoom: f64, pan: f64) -> Self {
        Self {
            zoom: clamp_or(zoom, Self::MIN_ZOOM, Self::MAX_ZOOM, 1.0),
            pan: clamp_or(pan, 0.0, 1.0, 0.0),
        }
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn pan(&self) -> f64 {
        self.pan
    }

    pub fn zoomed_by(self, factor: f64) -> Self {
        Self::new(self.zoom * factor, self.pan)
    }

    pub fn panned_to(self, pan: f64) -> Self {
        Self::new(self.zoom, pan)
    }

    /// Index sub-range of `full` that is on screen. Zooming out below 1 still
    /// shows the whole range.
    pub fn visible_range(&self, full: Range<usize>) -> Range<usize> {
        let len = full.len();
        if len == 0 {
            return full;
        }
        let visible = ((len as f64 / self.zoom).ceil() as usize).clamp(1, len);
        let offset = (self.pan * (len - visible) as f64).round() as usize;
        let start = full.start + offset;
        start..start + visible
    }
}

fn clamp_or(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(min, max)
    }
}
