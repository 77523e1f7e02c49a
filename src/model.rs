//! Metric data model shared by the agent and the collector.
//!
//! - [`MetricKind`]: gauge (last write wins) or counter (additive deltas)
//! - [`WireItem`]: the JSON representation of one metric update or value
//! - [`Snapshot`]: an owned, point-in-time copy of every gauge and counter
//!
//! Gauges and counters live in separate collections, so a gauge and a counter
//! may share a name.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Maximum number of items carried by one batch.
pub const MAX_BATCH_SIZE: usize = 100;

/// Gauge values keyed by metric name.
pub type Gauges = HashMap<String, f64>;

/// Counter totals keyed by metric name.
pub type Counters = HashMap<String, i64>;

/// Metric kind classification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MetricKind {
    /// Floating point value, last write wins.
    Gauge,
    /// Integer running total, updated by deltas.
    Counter,
}

/// A wire item whose kind does not match its populated field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{id}: invalid metric type or value")]
pub struct ValidationError {
    /// Metric name of the offending item.
    pub id: String,
}

/// One metric as it travels over the network and sits in the snapshot file.
///
/// Exactly one of `value` (gauges) or `delta` (counters) is expected to be set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireItem {
    /// Metric name.
    pub id: String,
    /// Metric kind.
    #[serde(rename = "type")]
    pub kind: MetricKind,
    /// Gauge value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Counter delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
}

/// A validated update borrowed from a [`WireItem`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricUpdate<'a> {
    Gauge { name: &'a str, value: f64 },
    Counter { name: &'a str, delta: i64 },
}

impl WireItem {
    /// Build a gauge item.
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge,
            value: Some(value),
            delta: None,
        }
    }

    /// Build a counter item.
    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter,
            value: None,
            delta: Some(delta),
        }
    }

    /// Check that the populated field matches the declared kind.
    pub fn validate(&self) -> Result<MetricUpdate<'_>, ValidationError> {
        match (self.kind, self.value, self.delta) {
            (MetricKind::Gauge, Some(value), _) => Ok(MetricUpdate::Gauge {
                name: &self.id,
                value,
            }),
            (MetricKind::Counter, _, Some(delta)) => Ok(MetricUpdate::Counter {
                name: &self.id,
                delta,
            }),
            _ => Err(ValidationError {
                id: self.id.clone(),
            }),
        }
    }
}

/// Owned copy of all gauges and counters at one instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub gauges: Gauges,
    pub counters: Counters,
}

impl Snapshot {
    /// Total number of metrics in the snapshot.
    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.counters.is_empty()
    }

    /// Look up a single metric and return it as a wire item.
    pub fn get(&self, kind: MetricKind, name: &str) -> Option<WireItem> {
        match kind {
            MetricKind::Gauge => self.gauges.get(name).map(|v| WireItem::gauge(name, *v)),
            MetricKind::Counter => self.counters.get(name).map(|d| WireItem::counter(name, *d)),
        }
    }

    /// Convert every metric to a wire item.
    ///
    /// Gauges come first, then counters, each sorted by name. Counter items carry
    /// the running total in `delta`.
    pub fn to_wire_items(&self) -> Vec<WireItem> {
        let mut gauges: Vec<_> = self.gauges.iter().collect();
        gauges.sort_by(|a, b| a.0.cmp(b.0));
        let mut counters: Vec<_> = self.counters.iter().collect();
        counters.sort_by(|a, b| a.0.cmp(b.0));

        gauges
            .into_iter()
            .map(|(name, value)| WireItem::gauge(name.as_str(), *value))
            .chain(
                counters
                    .into_iter()
                    .map(|(name, delta)| WireItem::counter(name.as_str(), *delta)),
            )
            .collect()
    }
}

/// Split items into batches of at most [`MAX_BATCH_SIZE`].
pub fn batches(items: &[WireItem]) -> impl Iterator<Item = &[WireItem]> {
    items.chunks(MAX_BATCH_SIZE)
}
