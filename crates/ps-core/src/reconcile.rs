//! Reconciliation entry points.

use serde::{Deserialize, Serialize};

use crate::closure::close_state_spans;
use crate::context::ConsolidationContext;
use crate::dispatch::{
    Dispatch, DispatchEnv, ENTRY_HANDLERS, Handler, STATE_SPAN_HANDLERS, TREATMENT_HANDLERS,
    dispatch,
};
use crate::event::RawDeviceEvent;
use crate::record::{
    BgCheck, Bolus, BolusCalculation, CarbIntake, DeviceEvent, GlucoseEntry, Note, OutputRecord,
    RecordMeta, StateSpan, Treatment,
};

const MS_PER_MINUTE: u64 = 60_000;

/// Per-run switches and matching windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileOptions {
    /// Emit glucose entries from sensor readings.
    pub glucose_sync: bool,
    /// Emit BG checks from manually entered readings.
    pub manual_bg_sync: bool,
    /// Pair boluses with carbohydrate entries.
    pub meal_carb_consolidation: bool,
    /// Pair temp basal programs with confirmed rates.
    pub temp_basal_consolidation: bool,
    pub temp_basal_window_minutes: i64,
    pub carb_window_minutes: i64,
    /// Device tag written on every record.
    pub device: String,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            glucose_sync: true,
            manual_bg_sync: true,
            meal_carb_consolidation: true,
            temp_basal_consolidation: true,
            temp_basal_window_minutes: 5,
            carb_window_minutes: 10,
            device: "tandem".to_string(),
        }
    }
}

impl ReconcileOptions {
    /// Temp basal window in ms; negative windows count as zero.
    pub fn temp_basal_window_ms(&self) -> u64 {
        window_ms(self.temp_basal_window_minutes)
    }

    /// Carbohydrate window in ms; negative windows count as zero.
    pub fn carb_window_ms(&self) -> u64 {
        window_ms(self.carb_window_minutes)
    }
}

fn window_ms(minutes: i64) -> u64 {
    u64::try_from(minutes)
        .unwrap_or(0)
        .saturating_mul(MS_PER_MINUTE)
}

/// Runs the dispatcher passes over one batch of events.
///
/// The consolidation context is built once in [`Reconciler::new`] and then
/// only read, so each projection can be requested on its own.
#[derive(Debug)]
pub struct Reconciler<'a> {
    events: &'a [RawDeviceEvent],
    options: &'a ReconcileOptions,
    context: ConsolidationContext,
}

impl<'a> Reconciler<'a> {
    pub fn new(events: &'a [RawDeviceEvent], options: &'a ReconcileOptions) -> Self {
        Self {
            events,
            options,
            context: ConsolidationContext::build(events, options),
        }
    }

    pub const fn context(&self) -> &ConsolidationContext {
        &self.context
    }

    fn pass<R>(&self, family: &str, handlers: &[Handler<R>]) -> Vec<R> {
        let env = DispatchEnv {
            context: &self.context,
            device: &self.options.device,
        };
        let Dispatch {
            records,
            handled,
            dropped,
            ignored,
            deleted,
        } = dispatch(self.events, handlers, &env);
        tracing::debug!(
            family,
            records = records.len(),
            handled,
            dropped,
            ignored,
            deleted,
            "dispatch pass complete"
        );
        records
    }

    /// Glucose entries, empty when glucose sync is off.
    pub fn glucose_entries(&self) -> Vec<GlucoseEntry> {
        if !self.options.glucose_sync {
            return Vec::new();
        }
        let mut entries = self.pass("entries", ENTRY_HANDLERS);
        entries.sort_by(|a, b| by_meta(&a.meta, &b.meta));
        entries
    }

    pub fn treatments(&self) -> Vec<Treatment> {
        let mut treatments = self.pass("treatments", TREATMENT_HANDLERS);
        treatments.sort_by(|a, b| by_meta(a.meta(), b.meta()));
        treatments
    }

    /// Basal spans, already closed against their successors.
    pub fn state_spans(&self) -> Vec<StateSpan> {
        close_state_spans(self.pass("state_spans", STATE_SPAN_HANDLERS))
    }

    /// All three projections, computed in parallel.
    pub fn run(&self) -> ReconcileOutput {
        let (entries, (treatments, state_spans)) = rayon::join(
            || self.glucose_entries(),
            || rayon::join(|| self.treatments(), || self.state_spans()),
        );
        ReconcileOutput::from_parts(entries, treatments, state_spans)
    }
}

/// Reconciles one batch of raw events with the given options.
pub fn reconcile(events: &[RawDeviceEvent], options: &ReconcileOptions) -> ReconcileOutput {
    Reconciler::new(events, options).run()
}

fn by_meta(a: &RecordMeta, b: &RecordMeta) -> std::cmp::Ordering {
    a.timestamp_ms
        .cmp(&b.timestamp_ms)
        .then_with(|| a.id.cmp(&b.id))
}

/// Everything one reconciliation produced, grouped by record kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileOutput {
    pub entries: Vec<GlucoseEntry>,
    pub boluses: Vec<Bolus>,
    pub carb_intakes: Vec<CarbIntake>,
    pub bg_checks: Vec<BgCheck>,
    pub bolus_calculations: Vec<BolusCalculation>,
    pub notes: Vec<Note>,
    pub device_events: Vec<DeviceEvent>,
    pub state_spans: Vec<StateSpan>,
}

impl ReconcileOutput {
    /// Splits treatments by kind. Each input list must already be sorted.
    pub fn from_parts(
        entries: Vec<GlucoseEntry>,
        treatments: Vec<Treatment>,
        state_spans: Vec<StateSpan>,
    ) -> Self {
        let mut output = Self {
            entries,
            state_spans,
            ..Self::default()
        };
        for treatment in treatments {
            match treatment {
                Treatment::Bolus(r) => output.boluses.push(r),
                Treatment::CarbIntake(r) => output.carb_intakes.push(r),
                Treatment::BgCheck(r) => output.bg_checks.push(r),
                Treatment::BolusCalculation(r) => output.bolus_calculations.push(r),
                Treatment::Note(r) => output.notes.push(r),
                Treatment::DeviceEvent(r) => output.device_events.push(r),
            }
        }
        output
    }

    pub fn record_count(&self) -> usize {
        self.entries.len()
            + self.boluses.len()
            + self.carb_intakes.len()
            + self.bg_checks.len()
            + self.bolus_calculations.len()
            + self.notes.len()
            + self.device_events.len()
            + self.state_spans.len()
    }

    /// Flattens the output into storable records, grouped by kind.
    pub fn into_records(self) -> Vec<OutputRecord> {
        let mut records = Vec::with_capacity(self.record_count());
        records.extend(self.entries.into_iter().map(OutputRecord::Entry));
        let treatments = self
            .boluses
            .into_iter()
            .map(Treatment::Bolus)
            .chain(self.carb_intakes.into_iter().map(Treatment::CarbIntake))
            .chain(self.bg_checks.into_iter().map(Treatment::BgCheck))
            .chain(
                self.bolus_calculations
                    .into_iter()
                    .map(Treatment::BolusCalculation),
            )
            .chain(self.notes.into_iter().map(Treatment::Note))
            .chain(self.device_events.into_iter().map(Treatment::DeviceEvent));
        records.extend(treatments.map(OutputRecord::Treatment));
        records.extend(self.state_spans.into_iter().map(OutputRecord::StateSpan));
        records
    }
}
