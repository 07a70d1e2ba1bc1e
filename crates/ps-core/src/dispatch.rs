//! Ordered, first-match-wins classification of raw events.
//!
//! Each output family has a fixed list of handlers. For every live event the
//! predicates are tried in declared order and only the first match produces
//! records. Declared order is part of the contract: narrower classifiers
//! (profile switch) sit before broader ones (indication) that also match.

use crate::context::ConsolidationContext;
use crate::event::RawDeviceEvent;
use crate::event_code::EventCode;
use crate::factory::{self, BasalDetails, BasalOrigin, BolusParts, CalculatorInputs, Stamp};
use crate::payload::Payload;
use crate::record::{BolusKind, GlucoseEntry, StateSpan, Treatment};

/// Everything a producer may read besides the event itself.
#[derive(Debug, Clone, Copy)]
pub struct DispatchEnv<'a> {
    pub context: &'a ConsolidationContext,
    pub device: &'a str,
}

impl DispatchEnv<'_> {
    /// Identity and time for records built from `event`, if its timestamp parses.
    fn stamp<'s>(&'s self, event: &'s RawDeviceEvent) -> Option<Stamp<'s>> {
        Some(Stamp {
            key: &event.id,
            timestamp_ms: event.timestamp_ms()?,
            device: self.device,
        })
    }
}

/// A (predicate, producer) pair.
pub struct Handler<R> {
    pub name: &'static str,
    pub matches: fn(&RawDeviceEvent, &ConsolidationContext) -> bool,
    /// Returns no records when the payload fails validation.
    pub produce: fn(&RawDeviceEvent, &DispatchEnv<'_>) -> Vec<R>,
}

/// Records plus bookkeeping from one dispatcher pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch<R> {
    pub records: Vec<R>,
    /// Events a handler claimed.
    pub handled: usize,
    /// Claimed events that produced nothing.
    pub dropped: usize,
    /// Live events no handler matched.
    pub ignored: usize,
    pub deleted: usize,
}

impl<R> Default for Dispatch<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            handled: 0,
            dropped: 0,
            ignored: 0,
            deleted: 0,
        }
    }
}

/// Name of the handler that would claim `event`, if any.
pub fn classify<R>(
    event: &RawDeviceEvent,
    handlers: &[Handler<R>],
    context: &ConsolidationContext,
) -> Option<&'static str> {
    if !event.is_live() {
        return None;
    }
    handlers
        .iter()
        .find(|h| (h.matches)(event, context))
        .map(|h| h.name)
}

/// Runs every live event through the first matching handler.
pub fn dispatch<R>(
    events: &[RawDeviceEvent],
    handlers: &[Handler<R>],
    env: &DispatchEnv<'_>,
) -> Dispatch<R> {
    let mut outcome = Dispatch::default();
    for event in events {
        if !event.is_live() {
            outcome.deleted += 1;
            continue;
        }
        let Some(handler) = handlers.iter().find(|h| (h.matches)(event, env.context)) else {
            outcome.ignored += 1;
            continue;
        };

        outcome.handled += 1;
        let records = (handler.produce)(event, env);
        if records.is_empty() {
            tracing::trace!(event = %event.id, handler = handler.name, "event produced no records");
            outcome.dropped += 1;
        }
        outcome.records.extend(records);
    }
    outcome
}

// ========== Entries ==========

pub static ENTRY_HANDLERS: &[Handler<GlucoseEntry>] = &[Handler {
    name: "glucose_reading",
    matches: |event, _| event.code == EventCode::GlucoseReading,
    produce: produce_glucose_entry,
}];

fn produce_glucose_entry(event: &RawDeviceEvent, env: &DispatchEnv<'_>) -> Vec<GlucoseEntry> {
    let (Some(stamp), Some(mgdl)) = (env.stamp(event), positive_value(event)) else {
        return Vec::new();
    };
    let payload = event.payload();
    vec![factory::glucose_entry(
        stamp,
        mgdl,
        payload.text("trend"),
        payload.number("noise"),
    )]
}

// ========== Treatments ==========

pub static TREATMENT_HANDLERS: &[Handler<Treatment>] = &[
    Handler {
        name: "bolus",
        matches: |event, _| event.code.is_bolus(),
        produce: produce_bolus,
    },
    Handler {
        name: "carb_correction",
        matches: |event, _| event.code == EventCode::CarbCorrection,
        produce: produce_carb_correction,
    },
    Handler {
        name: "manual_glucose",
        matches: |event, context| {
            event.code == EventCode::ManualGlucose && context.manual_bg_sync()
        },
        produce: produce_bg_check,
    },
    Handler {
        name: "priming",
        matches: |event, _| event.code == EventCode::Priming,
        produce: produce_priming,
    },
    Handler {
        name: "profile_switch",
        matches: |event, _| event.code == EventCode::ProfileSwitch,
        produce: produce_profile_switch,
    },
    Handler {
        name: "indication",
        matches: |event, _| event.code.is_indication(),
        produce: produce_indication,
    },
    Handler {
        name: "note",
        matches: |event, _| event.code == EventCode::Note,
        produce: produce_note,
    },
];

fn produce_bolus(event: &RawDeviceEvent, env: &DispatchEnv<'_>) -> Vec<Treatment> {
    let Some(stamp) = env.stamp(event) else {
        return Vec::new();
    };
    let Some(units) = event.numeric_value().filter(|u| *u >= 0.0) else {
        return Vec::new();
    };
    let payload = event.payload();
    let kind = match event.code {
        EventCode::BolusSquare => BolusKind::Square,
        EventCode::BolusDual => BolusKind::Dual,
        _ => BolusKind::Normal,
    };
    let parts = BolusParts {
        insulin_units: units,
        kind,
        duration_minutes: payload.number("duration_minutes"),
        automatic: payload.flag("automatic").unwrap_or(false),
    };

    let mut records = Vec::new();
    let split = if kind == BolusKind::Dual {
        payload
            .number("immediate_units")
            .zip(payload.number("extended_units"))
    } else {
        None
    };
    let bolus_id = if let Some((immediate, extended)) = split {
        let now = factory::bolus(
            stamp,
            Some("now"),
            BolusParts {
                insulin_units: immediate,
                duration_minutes: None,
                ..parts
            },
        );
        let ext = factory::bolus(
            stamp,
            Some("ext"),
            BolusParts {
                insulin_units: extended,
                ..parts
            },
        );
        let id = now.meta.id.clone();
        records.push(Treatment::Bolus(now));
        records.push(Treatment::Bolus(ext));
        id
    } else {
        let bolus = factory::bolus(stamp, None, parts);
        let id = bolus.meta.id.clone();
        records.push(Treatment::Bolus(bolus));
        id
    };

    if let Some(grams) = env.context.bolus_carbs(&event.id) {
        records.push(Treatment::CarbIntake(factory::carb_intake(
            stamp,
            grams,
            Some(bolus_id),
        )));
    }
    if let Some(inputs) = calculator_inputs(payload) {
        records.push(Treatment::BolusCalculation(factory::bolus_calculation(
            stamp, inputs, units,
        )));
    }
    records
}

/// Calculator inputs, present only when the pump reported any of them.
fn calculator_inputs(payload: Payload<'_>) -> Option<CalculatorInputs> {
    let inputs = CalculatorInputs {
        bg: payload.number("bg"),
        carbs: payload.number("carbs"),
        iob: payload.number("iob"),
        carb_ratio: payload.number("carb_ratio"),
        food_units: payload.number("food_units"),
        correction_units: payload.number("correction_units"),
    };
    let reported = inputs.bg.is_some()
        || inputs.carbs.is_some()
        || inputs.food_units.is_some()
        || inputs.correction_units.is_some();
    reported.then_some(inputs)
}

fn produce_carb_correction(event: &RawDeviceEvent, env: &DispatchEnv<'_>) -> Vec<Treatment> {
    let (Some(stamp), Some(grams)) = (env.stamp(event), positive_value(event)) else {
        return Vec::new();
    };
    if env.context.is_carb_suppressed(stamp.timestamp_ms) {
        tracing::trace!(event = %event.id, "carbohydrate entry already counted by a bolus");
        return Vec::new();
    }
    vec![Treatment::CarbIntake(factory::carb_intake(stamp, grams, None))]
}

fn produce_bg_check(event: &RawDeviceEvent, env: &DispatchEnv<'_>) -> Vec<Treatment> {
    let (Some(stamp), Some(mgdl)) = (env.stamp(event), positive_value(event)) else {
        return Vec::new();
    };
    vec![Treatment::BgCheck(factory::bg_check(stamp, mgdl))]
}

fn produce_priming(event: &RawDeviceEvent, env: &DispatchEnv<'_>) -> Vec<Treatment> {
    let Some(stamp) = env.stamp(event) else {
        return Vec::new();
    };
    let event_type = match event.payload().text("prime_type") {
        Some("cannula") => "Cannula Fill",
        Some("tubing") => "Tubing Fill",
        Some("cartridge") => "Cartridge Change",
        _ => "Site Change",
    };
    let notes = event.numeric_value().map(|units| format!("{units} U primed"));
    vec![Treatment::DeviceEvent(factory::device_event(
        stamp, event_type, notes,
    ))]
}

fn produce_profile_switch(event: &RawDeviceEvent, env: &DispatchEnv<'_>) -> Vec<Treatment> {
    let Some(stamp) = env.stamp(event) else {
        return Vec::new();
    };
    let profile = event.payload().text("profile").map(String::from);
    vec![Treatment::DeviceEvent(factory::device_event(
        stamp,
        "Profile Switch",
        profile,
    ))]
}

fn produce_indication(event: &RawDeviceEvent, env: &DispatchEnv<'_>) -> Vec<Treatment> {
    let Some(stamp) = env.stamp(event) else {
        return Vec::new();
    };
    let payload = event.payload();
    let event_type = match payload.text("kind") {
        Some(SUSPEND_KIND) => "Pump Suspend",
        Some("pump_resumed") => "Pump Resume",
        Some("alarm") => "Alarm",
        Some("alert") => "Alert",
        _ => "Indication",
    };
    let notes = payload.text("message").map(String::from);
    vec![Treatment::DeviceEvent(factory::device_event(
        stamp, event_type, notes,
    ))]
}

fn produce_note(event: &RawDeviceEvent, env: &DispatchEnv<'_>) -> Vec<Treatment> {
    let Some(stamp) = env.stamp(event) else {
        return Vec::new();
    };
    let text = event.payload().text("text").or_else(|| {
        event
            .value
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    });
    text.map(|text| vec![Treatment::Note(factory::note(stamp, text))])
        .unwrap_or_default()
}

// ========== State spans ==========

const SUSPEND_KIND: &str = "pump_suspended";

pub static STATE_SPAN_HANDLERS: &[Handler<StateSpan>] = &[
    Handler {
        name: "temp_basal_program",
        matches: |event, _| event.code == EventCode::TempBasalProgram,
        produce: produce_temp_basal,
    },
    Handler {
        name: "basal_rate",
        matches: |event, _| event.code == EventCode::BasalRate,
        produce: produce_basal_rate,
    },
    Handler {
        name: "pump_suspend",
        matches: |event, _| {
            event.code == EventCode::Indication
                && event.payload().text("kind") == Some(SUSPEND_KIND)
        },
        produce: produce_suspend,
    },
];

fn produce_temp_basal(event: &RawDeviceEvent, env: &DispatchEnv<'_>) -> Vec<StateSpan> {
    let Some(stamp) = env.stamp(event) else {
        return Vec::new();
    };
    let payload = event.payload();
    let rate = env
        .context
        .resolved_temp_rate(stamp.timestamp_ms)
        .map(|resolved| resolved.rate)
        .or_else(|| payload.number("rate"))
        .filter(|r| *r >= 0.0);
    let Some(rate) = rate else {
        return Vec::new();
    };
    let details = BasalDetails {
        percent: payload.number("percent"),
        programmed_duration_minutes: payload.number("duration_minutes"),
    };
    vec![factory::basal_span(stamp, BasalOrigin::Temp, rate, details)]
}

fn produce_basal_rate(event: &RawDeviceEvent, env: &DispatchEnv<'_>) -> Vec<StateSpan> {
    if env.context.is_rate_consumed(&event.id) {
        tracing::trace!(event = %event.id, "confirmed rate folded into temp basal program");
        return Vec::new();
    }
    let Some(stamp) = env.stamp(event) else {
        return Vec::new();
    };
    let Some(rate) = event.numeric_value().filter(|r| *r >= 0.0) else {
        return Vec::new();
    };
    let payload = event.payload();
    let origin = if payload.flag("temp") == Some(true) {
        BasalOrigin::Temp
    } else {
        BasalOrigin::Scheduled
    };
    let details = BasalDetails {
        percent: payload.number("percent"),
        programmed_duration_minutes: None,
    };
    vec![factory::basal_span(stamp, origin, rate, details)]
}

fn produce_suspend(event: &RawDeviceEvent, env: &DispatchEnv<'_>) -> Vec<StateSpan> {
    env.stamp(event)
        .map(|stamp| {
            vec![factory::basal_span(
                stamp,
                BasalOrigin::Suspended,
                0.0,
                BasalDetails::default(),
            )]
        })
        .unwrap_or_default()
}

fn positive_value(event: &RawDeviceEvent) -> Option<f64> {
    event.numeric_value().filter(|v| *v > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::ReconcileOptions;
    use crate::testing::{at, event, ms};
    use serde_json::json;

    fn run<R>(
        events: &[RawDeviceEvent],
        handlers: &[Handler<R>],
        options: &ReconcileOptions,
    ) -> Dispatch<R> {
        let context = ConsolidationContext::build(events, options);
        let env = DispatchEnv {
            context: &context,
            device: "tandem",
        };
        dispatch(events, handlers, &env)
    }

    fn treatments(events: &[RawDeviceEvent]) -> Vec<Treatment> {
        run(events, TREATMENT_HANDLERS, &ReconcileOptions::default()).records
    }

    fn device_event_type(treatment: &Treatment) -> &str {
        match treatment {
            Treatment::DeviceEvent(d) => &d.event_type,
            other => panic!("expected device event, got {other:?}"),
        }
    }

    #[test]
    fn profile_switch_is_claimed_before_indication() {
        let switch = event("ps1", EventCode::ProfileSwitch, at(0))
            .with_payload(json!({"profile": "Weekend", "kind": "alert"}));
        let context = ConsolidationContext::default();

        assert!(switch.code.is_indication());
        assert_eq!(
            classify(&switch, TREATMENT_HANDLERS, &context),
            Some("profile_switch")
        );

        let records = treatments(&[switch]);
        assert_eq!(records.len(), 1);
        assert_eq!(device_event_type(&records[0]), "Profile Switch");
        match &records[0] {
            Treatment::DeviceEvent(d) => assert_eq!(d.notes.as_deref(), Some("Weekend")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn declared_order_decides_overlapping_predicates() {
        // Same handlers with the broad one first: the narrow one never runs.
        let reordered = [
            Handler {
                name: "indication",
                matches: TREATMENT_HANDLERS[5].matches,
                produce: TREATMENT_HANDLERS[5].produce,
            },
            Handler {
                name: "profile_switch",
                matches: TREATMENT_HANDLERS[4].matches,
                produce: TREATMENT_HANDLERS[4].produce,
            },
        ];
        let switch = event("ps1", EventCode::ProfileSwitch, at(0));
        let outcome = run(&[switch], &reordered, &ReconcileOptions::default());

        assert_eq!(outcome.handled, 1);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(device_event_type(&outcome.records[0]), "Indication");
    }

    #[test]
    fn unmatched_events_are_ignored() {
        let events = vec![
            event("g1", EventCode::GlucoseReading, at(0)).with_value("110"),
            event("r1", EventCode::BasalRate, at(0)).with_value("0.8"),
        ];
        let outcome = run(&events, TREATMENT_HANDLERS, &ReconcileOptions::default());
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.ignored, 2);
        assert_eq!(outcome.handled, 0);
    }

    #[test]
    fn invalid_payload_is_handled_but_dropped() {
        let events = vec![
            event("b1", EventCode::BolusNormal, at(0)).with_value("a lot"),
            event("n1", EventCode::Note, at(1)),
            event("c1", EventCode::CarbCorrection, "not a time".to_string()).with_value("30"),
        ];
        let outcome = run(&events, TREATMENT_HANDLERS, &ReconcileOptions::default());
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.handled, 3);
        assert_eq!(outcome.dropped, 3);
        assert_eq!(outcome.ignored, 0);
    }

    #[test]
    fn deleted_events_never_dispatch() {
        let events = vec![
            event("g1", EventCode::GlucoseReading, at(0)).with_value("110").deleted(),
            event("n1", EventCode::Note, at(0)).with_value("hello").deleted(),
            event("r1", EventCode::BasalRate, at(0)).with_value("0.8").deleted(),
        ];
        let options = ReconcileOptions::default();
        assert!(run(&events, ENTRY_HANDLERS, &options).records.is_empty());
        assert!(run(&events, TREATMENT_HANDLERS, &options).records.is_empty());
        let spans = run(&events, STATE_SPAN_HANDLERS, &options);
        assert!(spans.records.is_empty());
        assert_eq!(spans.deleted, 3);
        let context = ConsolidationContext::default();
        assert_eq!(classify(&events[1], TREATMENT_HANDLERS, &context), None);
    }

    #[test]
    fn glucose_reading_becomes_entry() {
        let events = vec![
            event("g1", EventCode::GlucoseReading, at(0))
                .with_value("142")
                .with_payload(json!({"trend": "Flat", "noise": 1})),
            event("g2", EventCode::GlucoseReading, at(5)).with_value("0"),
        ];
        let outcome = run(&events, ENTRY_HANDLERS, &ReconcileOptions::default());

        assert_eq!(outcome.records.len(), 1);
        let entry = &outcome.records[0];
        assert_eq!(entry.meta.id.as_str(), "entry_g1");
        assert_eq!(entry.meta.timestamp_ms, ms(0));
        assert_eq!(entry.meta.device, "tandem");
        assert!((entry.mgdl - 142.0).abs() < f64::EPSILON);
        assert_eq!(entry.trend.as_deref(), Some("Flat"));
        assert_eq!(entry.noise, Some(1.0));
        assert_eq!(outcome.dropped, 1);
    }

    #[test]
    fn bolus_with_embedded_carbs_suppresses_separate_correction() {
        let events = vec![
            event("b1", EventCode::BolusNormal, at(0))
                .with_value("4.2")
                .with_payload(json!({"carbs": 20, "bg": 180, "iob": 0.5, "food_units": 2.0})),
            event("c1", EventCode::CarbCorrection, at(3)).with_value("25"),
        ];
        let records = treatments(&events);

        let carb_intakes: Vec<_> = records
            .iter()
            .filter_map(|t| match t {
                Treatment::CarbIntake(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(carb_intakes.len(), 1);
        assert_eq!(carb_intakes[0].meta.id.as_str(), "carbs_b1");
        assert!((carb_intakes[0].grams - 20.0).abs() < f64::EPSILON);
        assert_eq!(
            carb_intakes[0].correlation_id.as_ref().map(|id| id.as_str()),
            Some("bolus_b1")
        );

        let calc = records
            .iter()
            .find_map(|t| match t {
                Treatment::BolusCalculation(c) => Some(c),
                _ => None,
            })
            .unwrap();
        assert_eq!(calc.meta.id.as_str(), "calc_b1");
        assert_eq!(calc.bg, Some(180.0));
        assert_eq!(calc.carbs, Some(20.0));
        assert!((calc.total_units - 4.2).abs() < f64::EPSILON);
    }

    #[test]
    fn free_standing_correction_becomes_carb_intake() {
        let events = vec![event("c1", EventCode::CarbCorrection, at(0)).with_value("15")];
        let records = treatments(&events);
        assert_eq!(records.len(), 1);
        match &records[0] {
            Treatment::CarbIntake(c) => {
                assert_eq!(c.meta.id.as_str(), "carbs_c1");
                assert!(c.correlation_id.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn dual_bolus_with_split_yields_two_boluses() {
        let events = vec![event("d1", EventCode::BolusDual, at(0))
            .with_value("5")
            .with_payload(json!({
                "immediate_units": 3,
                "extended_units": 2,
                "duration_minutes": 120
            }))];
        let records = treatments(&events);

        let boluses: Vec<_> = records
            .iter()
            .filter_map(|t| match t {
                Treatment::Bolus(b) => Some(b),
                _ => None,
            })
            .collect();
        assert_eq!(boluses.len(), 2);
        assert_eq!(boluses[0].meta.id.as_str(), "bolus_d1_now");
        assert!((boluses[0].insulin_units - 3.0).abs() < f64::EPSILON);
        assert_eq!(boluses[0].duration_minutes, None);
        assert_eq!(boluses[1].meta.id.as_str(), "bolus_d1_ext");
        assert_eq!(boluses[1].duration_minutes, Some(120.0));
        assert_eq!(boluses[1].bolus_kind, BolusKind::Dual);
    }

    #[test]
    fn square_bolus_keeps_duration_and_automatic_flag() {
        let events = vec![event("s1", EventCode::BolusSquare, at(0))
            .with_value("1.5")
            .with_payload(json!({"duration_minutes": 60, "automatic": true}))];
        let records = treatments(&events);
        match &records[0] {
            Treatment::Bolus(b) => {
                assert_eq!(b.bolus_kind, BolusKind::Square);
                assert_eq!(b.duration_minutes, Some(60.0));
                assert!(b.automatic);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn manual_glucose_respects_toggle() {
        let events = vec![event("bg1", EventCode::ManualGlucose, at(0)).with_value("104")];

        let on = run(&events, TREATMENT_HANDLERS, &ReconcileOptions::default());
        assert_eq!(on.records.len(), 1);
        assert!(matches!(&on.records[0], Treatment::BgCheck(b) if b.meta.id.as_str() == "bg_bg1"));

        let options = ReconcileOptions {
            manual_bg_sync: false,
            ..ReconcileOptions::default()
        };
        let off = run(&events, TREATMENT_HANDLERS, &options);
        assert!(off.records.is_empty());
        assert_eq!(off.ignored, 1);
    }

    #[test]
    fn priming_and_indications_map_to_device_events() {
        let events = vec![
            event("p1", EventCode::Priming, at(0))
                .with_value("0.3")
                .with_payload(json!({"prime_type": "cannula"})),
            event("p2", EventCode::Priming, at(1)),
            event("i1", EventCode::Indication, at(2))
                .with_payload(json!({"kind": "pump_suspended", "message": "user suspended"})),
            event("i2", EventCode::Indication, at(3)).with_payload(json!({"kind": "pump_resumed"})),
            event("i3", EventCode::Indication, at(4)).with_payload(json!({"kind": "alarm"})),
            event("i4", EventCode::Indication, at(5)),
        ];
        let records = treatments(&events);
        let types: Vec<_> = records.iter().map(device_event_type).collect();
        assert_eq!(
            types,
            vec![
                "Cannula Fill",
                "Site Change",
                "Pump Suspend",
                "Pump Resume",
                "Alarm",
                "Indication"
            ]
        );
        match &records[0] {
            Treatment::DeviceEvent(d) => assert_eq!(d.notes.as_deref(), Some("0.3 U primed")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn note_text_falls_back_to_value() {
        let events = vec![
            event("n1", EventCode::Note, at(0)).with_payload(json!({"text": "new site"})),
            event("n2", EventCode::Note, at(1)).with_value("ran 5k"),
        ];
        let records = treatments(&events);
        let texts: Vec<_> = records
            .iter()
            .filter_map(|t| match t {
                Treatment::Note(n) => Some(n.text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["new site", "ran 5k"]);
    }

    #[test]
    fn confirmed_rate_folds_into_program_span() {
        let events = vec![
            event("p1", EventCode::TempBasalProgram, at(0))
                .with_payload(json!({"rate": 0.5, "percent": 50, "duration_minutes": 30})),
            event("r1", EventCode::BasalRate, at(1))
                .with_value("0.55")
                .with_payload(json!({"temp": true})),
            event("r2", EventCode::BasalRate, at(31)).with_value("1.1"),
        ];
        let outcome = run(&events, STATE_SPAN_HANDLERS, &ReconcileOptions::default());

        assert_eq!(outcome.records.len(), 2);
        let temp = &outcome.records[0];
        assert_eq!(temp.id.as_str(), "basal_p1");
        assert_eq!(temp.state, "TempBasal");
        assert_eq!(temp.rate(), Some(0.55));
        assert_eq!(temp.metadata["programmedDurationMinutes"], 30.0);
        let scheduled = &outcome.records[1];
        assert_eq!(scheduled.id.as_str(), "basal_r2");
        assert_eq!(scheduled.state, "Scheduled");
        assert_eq!(outcome.dropped, 1);
        assert!(!outcome.records.iter().any(|s| s.id.as_str() == "basal_r1"));
    }

    #[test]
    fn without_consolidation_both_temp_events_emit_spans() {
        let options = ReconcileOptions {
            temp_basal_consolidation: false,
            ..ReconcileOptions::default()
        };
        let events = vec![
            event("p1", EventCode::TempBasalProgram, at(0)).with_payload(json!({"rate": 0.5})),
            event("r1", EventCode::BasalRate, at(1))
                .with_value("0.55")
                .with_payload(json!({"temp": true})),
        ];
        let outcome = run(&events, STATE_SPAN_HANDLERS, &options);

        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].rate(), Some(0.5));
        assert_eq!(outcome.records[1].state, "TempBasal");
        assert_eq!(outcome.records[1].metadata["origin"], "temp");
    }

    #[test]
    fn program_without_any_rate_is_dropped() {
        let events = vec![event("p1", EventCode::TempBasalProgram, at(0))];
        let outcome = run(&events, STATE_SPAN_HANDLERS, &ReconcileOptions::default());
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.dropped, 1);
    }

    #[test]
    fn suspend_indication_opens_zero_rate_span() {
        let events = vec![
            event("i1", EventCode::Indication, at(0)).with_payload(json!({"kind": "pump_suspended"})),
            event("i2", EventCode::Indication, at(1)).with_payload(json!({"kind": "alarm"})),
        ];
        let outcome = run(&events, STATE_SPAN_HANDLERS, &ReconcileOptions::default());

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].state, "Suspended");
        assert_eq!(outcome.records[0].rate(), Some(0.0));
        assert_eq!(outcome.ignored, 1);
    }
}
