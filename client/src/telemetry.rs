//! Telemetry view-model: historical and live samples for the selected chart

use crate::errors::{Error, Result};
use crate::metrics::{STREAM_EVENTS_DROPPED_TOTAL, TELEMETRY_SAMPLES};
use crate::model::{Chart, ChartKind, TelemetryRecord};
use crate::resources::TelemetryQuery;
use crate::stream::DeviceData;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use tracing::debug;

pub const DEFAULT_SAMPLE_LIMIT: usize = 100;

/// Scalar value of one field at one instant
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl Scalar {
    fn from_json(value: &Value) -> Option<Scalar> {
        match value {
            Value::Number(n) => n.as_f64().map(Scalar::Number),
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            Value::String(s) => Some(Scalar::Text(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Plot value: numbers as-is, booleans as 0/1, numeric text parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            Scalar::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Scalar::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// The two payload shapes a field may arrive in
#[derive(Debug, Clone, PartialEq)]
pub enum FieldReading {
    /// `{"temp": {"value": 5, "unit": "C"}}`
    Wrapped(Scalar),
    /// `{"temp": 5}`
    Bare(Scalar),
}

impl FieldReading {
    /// Normalizes `data[field]`. Missing fields, nulls and objects without a
    /// scalar `value` yield `None`.
    pub fn extract(data: &Map<String, Value>, field: &str) -> Option<FieldReading> {
        match data.get(field)? {
            Value::Object(inner) => inner
                .get("value")
                .and_then(Scalar::from_json)
                .map(FieldReading::Wrapped),
            raw => Scalar::from_json(raw).map(FieldReading::Bare),
        }
    }

    pub fn into_scalar(self) -> Scalar {
        match self {
            FieldReading::Wrapped(v) | FieldReading::Bare(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    pub timestamp: DateTime<Utc>,
    pub value: Scalar,
}

impl TelemetrySample {
    fn from_parts(timestamp: DateTime<Utc>, data: &Map<String, Value>, field: &str) -> Option<Self> {
        FieldReading::extract(data, field).map(|reading| Self {
            timestamp,
            value: reading.into_scalar(),
        })
    }
}

/// The chart currently on screen
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub chart_id: String,
    pub name: String,
    pub device_id: String,
    pub field: String,
    pub kind: ChartKind,
}

impl From<&Chart> for Selection {
    fn from(chart: &Chart) -> Self {
        Self {
            chart_id: chart.id.clone(),
            name: chart.name.clone(),
            device_id: chart.device.id().to_string(),
            field: chart.field.clone(),
            kind: chart.kind,
        }
    }
}

/// Claim on the view for one historical fetch.
///
/// Only the ticket issued for the current selection and range can apply its
/// results; any later selection or range change makes it stale.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchTicket {
    generation: u64,
    pub query: TelemetryQuery,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartFrame {
    pub title: String,
    pub label: String,
    pub kind: ChartKind,
    pub labels: Vec<DateTime<Utc>>,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChartView {
    /// Nothing to draw yet
    Waiting,
    Chart(ChartFrame),
}

#[derive(Debug, Clone)]
pub struct TelemetryView {
    selection: Option<Selection>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    samples: VecDeque<TelemetrySample>,
    limit: usize,
    generation: u64,
}

impl Default for TelemetryView {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_LIMIT)
    }
}

impl TelemetryView {
    pub fn new(limit: usize) -> Self {
        Self {
            selection: None,
            start: None,
            end: None,
            samples: VecDeque::with_capacity(limit),
            limit: limit.max(1),
            generation: 0,
        }
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn range(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        (self.start, self.end)
    }

    pub fn samples(&self) -> impl Iterator<Item = &TelemetrySample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Switches to `chart`, clearing the date filter. Held samples survive
    /// only when the new chart plots the same device and field.
    pub fn select(&mut self, chart: &Chart) -> FetchTicket {
        let selection = Selection::from(chart);
        let same_series = self.selection.as_ref().is_some_and(|current| {
            current.device_id == selection.device_id && current.field == selection.field
        });
        if !same_series {
            self.samples.clear();
            TELEMETRY_SAMPLES.set(0.0);
        }
        self.start = None;
        self.end = None;
        self.generation += 1;
        let ticket = FetchTicket {
            generation: self.generation,
            query: self.query_for(&selection),
        };
        self.selection = Some(selection);
        ticket
    }

    /// Applies a date filter to the current selection.
    pub fn set_range(
        &mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<FetchTicket> {
        let Some(selection) = &self.selection else {
            return Err(Error::Validation("No chart selected".to_string()));
        };
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(Error::Validation(
                    "Start date must not be after end date".to_string(),
                ));
            }
        }
        let selection = selection.clone();
        self.start = start;
        self.end = end;
        self.generation += 1;
        Ok(FetchTicket {
            generation: self.generation,
            query: self.query_for(&selection),
        })
    }

    /// Ticket for re-fetching the current selection without invalidating
    /// fetches already in flight for it.
    pub fn refresh_ticket(&self) -> Option<FetchTicket> {
        self.query().map(|query| FetchTicket {
            generation: self.generation,
            query,
        })
    }

    /// Drops the date filter and every held sample.
    pub fn reset_to_live(&mut self) {
        self.start = None;
        self.end = None;
        self.samples.clear();
        self.generation += 1;
        TELEMETRY_SAMPLES.set(0.0);
    }

    /// Deselects the chart and clears everything.
    pub fn clear(&mut self) {
        self.selection = None;
        self.reset_to_live();
    }

    fn query_for(&self, selection: &Selection) -> TelemetryQuery {
        TelemetryQuery {
            device_id: selection.device_id.clone(),
            field: selection.field.clone(),
            start: self.start,
            end: self.end,
            limit: Some(self.limit),
        }
    }

    fn query(&self) -> Option<TelemetryQuery> {
        self.selection.as_ref().map(|s| self.query_for(s))
    }

    pub fn is_current(&self, ticket: &FetchTicket) -> bool {
        ticket.generation == self.generation
            && self
                .selection
                .as_ref()
                .is_some_and(|s| s.device_id == ticket.query.device_id && s.field == ticket.query.field)
    }

    /// Replaces the samples with `records` if `ticket` is still current.
    ///
    /// Records lacking the field are dropped; the rest are ordered by
    /// timestamp. Live samples newer than the newest record and inside the
    /// ticket's range are kept after them, then the sequence is cut to the
    /// newest `limit`. Returns false for a stale ticket.
    pub fn apply_history(&mut self, ticket: &FetchTicket, records: &[TelemetryRecord]) -> bool {
        if !self.is_current(ticket) {
            debug!(
                "Discarding stale history for {}/{}",
                ticket.query.device_id, ticket.query.field
            );
            return false;
        }

        let field = &ticket.query.field;
        let mut samples: Vec<TelemetrySample> = records
            .iter()
            .filter_map(|r| TelemetrySample::from_parts(r.timestamp, &r.data, field))
            .collect();
        samples.sort_by_key(|s| s.timestamp);

        let newest = samples.last().map(|s| s.timestamp);
        let (start, end) = (ticket.query.start, ticket.query.end);
        samples.extend(self.samples.drain(..).filter(|held| {
            newest.map_or(true, |t| held.timestamp > t)
                && start.map_or(true, |b| held.timestamp >= b)
                && end.map_or(true, |b| held.timestamp <= b)
        }));

        let skip = samples.len().saturating_sub(self.limit);
        self.samples = samples.into_iter().skip(skip).collect();
        TELEMETRY_SAMPLES.set(self.samples.len() as f64);
        true
    }

    /// Appends a live reading for the selected device, evicting the oldest
    /// sample beyond the limit. Returns false when the event does not apply.
    pub fn ingest(&mut self, event: &DeviceData) -> bool {
        let Some(selection) = &self.selection else {
            STREAM_EVENTS_DROPPED_TOTAL.inc();
            return false;
        };
        if event.device_id != selection.device_id {
            STREAM_EVENTS_DROPPED_TOTAL.inc();
            return false;
        }
        let Some(sample) = TelemetrySample::from_parts(event.timestamp, &event.data, &selection.field)
        else {
            return false;
        };

        self.samples.push_back(sample);
        while self.samples.len() > self.limit {
            self.samples.pop_front();
        }
        TELEMETRY_SAMPLES.set(self.samples.len() as f64);
        true
    }

    pub fn view(&self) -> ChartView {
        let Some(selection) = &self.selection else {
            return ChartView::Waiting;
        };
        if self.samples.is_empty() {
            return ChartView::Waiting;
        }

        ChartView::Chart(ChartFrame {
            title: format!(
                "{} - {} Chart",
                selection.name,
                selection.kind.to_string().to_uppercase()
            ),
            label: format!("{} ({})", selection.name, selection.field),
            kind: selection.kind,
            labels: self.samples.iter().map(|s| s.timestamp).collect(),
            values: self.samples.iter().map(|s| s.value.as_f64()).collect(),
        })
    }
}

/// Converts a `datetime-local` style input (`2024-05-01T10:30`, seconds
/// optional) in the local zone to UTC. Blank input means "no bound".
pub fn parse_local_input(input: &str) -> Result<Option<DateTime<Utc>>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M"))
        .map_err(|e| Error::Validation(format!("Invalid date {}: {}", trimmed, e)))?;
    local_to_utc(&Local, naive).map(Some)
}

/// Resolves `naive` in `zone`; ambiguous times take the earlier instant.
pub fn local_to_utc<Tz: TimeZone>(zone: &Tz, naive: NaiveDateTime) -> Result<DateTime<Utc>> {
    zone.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| Error::Validation(format!("{} does not exist in the local time zone", naive)))
}
