//! Record factories.
//!
//! Each function builds exactly one record from values the caller has already
//! validated. IDs are `<prefix>_<event key>` so reruns over the same input
//! produce the same IDs.

use std::collections::BTreeMap;

use serde_json::json;

use crate::record::{
    BgCheck, Bolus, BolusCalculation, BolusKind, CarbIntake, DeviceEvent, GlucoseEntry, Note,
    RecordMeta, StateSpan, StateSpanCategory,
};
use crate::types::{EventKey, RecordId};

pub const ENTRY_PREFIX: &str = "entry";
pub const BOLUS_PREFIX: &str = "bolus";
pub const CARBS_PREFIX: &str = "carbs";
pub const BG_PREFIX: &str = "bg";
pub const CALC_PREFIX: &str = "calc";
pub const NOTE_PREFIX: &str = "note";
pub const DEVICE_PREFIX: &str = "device";
pub const BASAL_PREFIX: &str = "basal";

/// Identity and time of a validated source event.
#[derive(Debug, Clone, Copy)]
pub struct Stamp<'a> {
    pub key: &'a EventKey,
    pub timestamp_ms: i64,
    pub device: &'a str,
}

impl Stamp<'_> {
    pub fn id(&self, prefix: &str, suffix: Option<&str>) -> RecordId {
        RecordId::derive(prefix, self.key, suffix)
    }

    pub fn meta(&self, prefix: &str, suffix: Option<&str>) -> RecordMeta {
        RecordMeta {
            id: self.id(prefix, suffix),
            timestamp_ms: self.timestamp_ms,
            device: self.device.to_string(),
        }
    }
}

pub fn glucose_entry(
    stamp: Stamp<'_>,
    mgdl: f64,
    trend: Option<&str>,
    noise: Option<f64>,
) -> GlucoseEntry {
    GlucoseEntry {
        meta: stamp.meta(ENTRY_PREFIX, None),
        mgdl,
        trend: trend.map(String::from),
        noise,
    }
}

/// Bolus details resolved from the event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BolusParts {
    pub insulin_units: f64,
    pub kind: BolusKind,
    pub duration_minutes: Option<f64>,
    pub automatic: bool,
}

pub fn bolus(stamp: Stamp<'_>, suffix: Option<&str>, parts: BolusParts) -> Bolus {
    Bolus {
        meta: stamp.meta(BOLUS_PREFIX, suffix),
        insulin_units: parts.insulin_units,
        bolus_kind: parts.kind,
        duration_minutes: parts.duration_minutes,
        automatic: parts.automatic,
    }
}

pub fn carb_intake(stamp: Stamp<'_>, grams: f64, correlation_id: Option<RecordId>) -> CarbIntake {
    CarbIntake {
        meta: stamp.meta(CARBS_PREFIX, None),
        grams,
        correlation_id,
    }
}

pub fn bg_check(stamp: Stamp<'_>, mgdl: f64) -> BgCheck {
    BgCheck {
        meta: stamp.meta(BG_PREFIX, None),
        mgdl,
    }
}

/// Bolus calculator inputs as reported by the pump.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CalculatorInputs {
    pub bg: Option<f64>,
    pub carbs: Option<f64>,
    pub iob: Option<f64>,
    pub carb_ratio: Option<f64>,
    pub food_units: Option<f64>,
    pub correction_units: Option<f64>,
}

pub fn bolus_calculation(
    stamp: Stamp<'_>,
    inputs: CalculatorInputs,
    total_units: f64,
) -> BolusCalculation {
    BolusCalculation {
        meta: stamp.meta(CALC_PREFIX, None),
        bg: inputs.bg,
        carbs: inputs.carbs,
        iob: inputs.iob,
        carb_ratio: inputs.carb_ratio,
        food_units: inputs.food_units,
        correction_units: inputs.correction_units,
        total_units,
    }
}

pub fn note(stamp: Stamp<'_>, text: &str) -> Note {
    Note {
        meta: stamp.meta(NOTE_PREFIX, None),
        text: text.to_string(),
    }
}

pub fn device_event(stamp: Stamp<'_>, event_type: &str, notes: Option<String>) -> DeviceEvent {
    DeviceEvent {
        meta: stamp.meta(DEVICE_PREFIX, None),
        event_type: event_type.to_string(),
        notes,
    }
}

/// Where the active basal rate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasalOrigin {
    Temp,
    Scheduled,
    Suspended,
}

impl BasalOrigin {
    /// State label of the span.
    pub const fn state(self) -> &'static str {
        match self {
            Self::Temp => "TempBasal",
            Self::Scheduled => "Scheduled",
            Self::Suspended => "Suspended",
        }
    }

    /// Value of the `origin` metadata key.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Temp => "temp",
            Self::Scheduled => "scheduled",
            Self::Suspended => "suspended",
        }
    }
}

/// Optional details a basal program reports alongside its rate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BasalDetails {
    pub percent: Option<f64>,
    pub programmed_duration_minutes: Option<f64>,
}

/// An open basal-delivery span starting at the event time.
pub fn basal_span(
    stamp: Stamp<'_>,
    origin: BasalOrigin,
    rate: f64,
    details: BasalDetails,
) -> StateSpan {
    let mut metadata = BTreeMap::new();
    metadata.insert("rate".to_string(), json!(rate));
    metadata.insert("origin".to_string(), json!(origin.as_str()));
    if let Some(percent) = details.percent {
        metadata.insert("percent".to_string(), json!(percent));
    }
    if let Some(minutes) = details.programmed_duration_minutes {
        metadata.insert("programmedDurationMinutes".to_string(), json!(minutes));
    }

    StateSpan {
        id: stamp.id(BASAL_PREFIX, None),
        category: StateSpanCategory::BasalDelivery,
        state: origin.state().to_string(),
        start_ms: stamp.timestamp_ms,
        end_ms: None,
        metadata,
        device: stamp.device.to_string(),
        created_at_ms: stamp.timestamp_ms,
    }
}
