//! Normalized clinical records produced by reconciliation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::RecordId;

/// Fields shared by every output record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    /// `<prefix>_<event key>[_<suffix>]`.
    pub id: RecordId,
    /// Epoch milliseconds of the source event.
    pub timestamp_ms: i64,
    /// Source/device tag.
    pub device: String,
}

/// A continuous glucose sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlucoseEntry {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub mgdl: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BolusKind {
    Normal,
    Square,
    Dual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bolus {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub insulin_units: f64,
    pub bolus_kind: BolusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<f64>,
    /// Delivered by the pump's closed-loop algorithm.
    #[serde(default)]
    pub automatic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbIntake {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub grams: f64,
    /// The bolus record these grams were matched to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<RecordId>,
}

/// A manually entered glucose measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BgCheck {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub mgdl: f64,
}

/// Bolus calculator inputs the pump reported alongside a bolus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BolusCalculation {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iob: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carb_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub food_units: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction_units: Option<f64>,
    pub total_units: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Treatment records, one variant per clinical kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Treatment {
    Bolus(Bolus),
    CarbIntake(CarbIntake),
    BgCheck(BgCheck),
    BolusCalculation(BolusCalculation),
    Note(Note),
    DeviceEvent(DeviceEvent),
}

impl Treatment {
    pub const fn meta(&self) -> &RecordMeta {
        match self {
            Self::Bolus(r) => &r.meta,
            Self::CarbIntake(r) => &r.meta,
            Self::BgCheck(r) => &r.meta,
            Self::BolusCalculation(r) => &r.meta,
            Self::Note(r) => &r.meta,
            Self::DeviceEvent(r) => &r.meta,
        }
    }

    /// Storage kind name.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Bolus(_) => "bolus",
            Self::CarbIntake(_) => "carb_intake",
            Self::BgCheck(_) => "bg_check",
            Self::BolusCalculation(_) => "bolus_calculation",
            Self::Note(_) => "note",
            Self::DeviceEvent(_) => "device_event",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateSpanCategory {
    BasalDelivery,
}

/// An interval record: "this state was active from start to end".
///
/// Spans are created open (`end_ms == None`) and closed once by
/// [`crate::close_state_spans`]. The latest span of a category stays open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSpan {
    pub id: RecordId,
    pub category: StateSpanCategory,
    pub state: String,
    pub start_ms: i64,
    pub end_ms: Option<i64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub device: String,
    pub created_at_ms: i64,
}

impl StateSpan {
    /// Basal rate in U/h, if recorded.
    pub fn rate(&self) -> Option<f64> {
        self.metadata.get("rate").and_then(serde_json::Value::as_f64)
    }

    pub const fn is_open(&self) -> bool {
        self.end_ms.is_none()
    }
}

/// Any record the core can emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum OutputRecord {
    Entry(GlucoseEntry),
    Treatment(Treatment),
    StateSpan(StateSpan),
}

impl OutputRecord {
    pub const fn id(&self) -> &RecordId {
        match self {
            Self::Entry(e) => &e.meta.id,
            Self::Treatment(t) => &t.meta().id,
            Self::StateSpan(s) => &s.id,
        }
    }

    pub const fn timestamp_ms(&self) -> i64 {
        match self {
            Self::Entry(e) => e.meta.timestamp_ms,
            Self::Treatment(t) => t.meta().timestamp_ms,
            Self::StateSpan(s) => s.start_ms,
        }
    }

    /// Storage kind name.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Entry(_) => "entry",
            Self::Treatment(t) => t.kind(),
            Self::StateSpan(_) => "state_span",
        }
    }
}
