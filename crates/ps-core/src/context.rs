//! Consolidation context.
//!
//! One pre-pass over the whole batch resolves the two ambiguities the pump
//! reports:
//!
//! 1. Temp basals arrive twice: once as the program the user entered and once
//!    as the rate the pump confirmed. Each program timestamp is paired with
//!    the nearest confirmed rate inside the window, and the paired rate event
//!    stops producing a span of its own.
//! 2. A meal can show up both as a carbohydrate correction and as the
//!    carbohydrate estimate a bolus carries. Each bolus claims at most one
//!    carbohydrate amount, and the claimed carbohydrate events are suppressed
//!    so the meal is counted once.
//!
//! The result is immutable. Working state (best candidate per program,
//! unmatched carbohydrate list) lives only inside [`ConsolidationContext::build`].

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use crate::event::RawDeviceEvent;
use crate::event_code::EventCode;
use crate::reconcile::ReconcileOptions;
use crate::types::EventKey;

/// The confirmed rate chosen for a temp-basal program.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRate {
    /// Confirmed rate in U/h.
    pub rate: f64,
    /// The basal-rate event the rate came from.
    pub source_key: EventKey,
    /// Distance between the program and the confirmation.
    pub distance_ms: u64,
}

/// Lookups shared by every dispatcher pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsolidationContext {
    bolus_carb_matches: BTreeMap<EventKey, f64>,
    suppressed_carb_times: BTreeSet<i64>,
    temp_basal_program_times: Vec<i64>,
    temp_basal_rates: BTreeMap<i64, ResolvedRate>,
    consumed_rate_keys: BTreeSet<EventKey>,
    temp_basal_window_ms: u64,
    carb_window_ms: u64,
    manual_bg_sync: bool,
}

impl ConsolidationContext {
    /// Builds the context from the full event batch.
    pub fn build(events: &[RawDeviceEvent], options: &ReconcileOptions) -> Self {
        let mut context = Self {
            temp_basal_window_ms: options.temp_basal_window_ms(),
            carb_window_ms: options.carb_window_ms(),
            manual_bg_sync: options.manual_bg_sync,
            ..Self::default()
        };

        if options.temp_basal_consolidation {
            context.resolve_temp_basals(events);
        }
        if options.meal_carb_consolidation {
            context.resolve_bolus_carbs(events);
        }

        tracing::debug!(
            programs = context.temp_basal_program_times.len(),
            resolved_rates = context.temp_basal_rates.len(),
            bolus_carb_matches = context.bolus_carb_matches.len(),
            suppressed_carbs = context.suppressed_carb_times.len(),
            "built consolidation context"
        );
        context
    }

    fn resolve_temp_basals(&mut self, events: &[RawDeviceEvent]) {
        let mut programs: Vec<i64> = events
            .iter()
            .filter(|e| e.is_live() && e.code == EventCode::TempBasalProgram)
            .filter_map(RawDeviceEvent::timestamp_ms)
            .collect();
        programs.sort_unstable();
        programs.dedup();

        let confirmed = events
            .iter()
            .filter(|e| e.is_live() && e.code == EventCode::BasalRate)
            .filter(|e| e.payload().flag("temp") == Some(true))
            .filter_map(|e| Some((e, e.timestamp_ms()?, e.numeric_value()?)));

        // Best candidate so far per program. Equal distances never replace,
        // so the earlier-scanned confirmation keeps the program.
        let mut claimed: BTreeMap<i64, ResolvedRate> = BTreeMap::new();
        for (event, confirmed_at, rate) in confirmed {
            for &program_at in &programs {
                let distance_ms = confirmed_at.abs_diff(program_at);
                if distance_ms > self.temp_basal_window_ms {
                    continue;
                }
                let candidate = ResolvedRate {
                    rate,
                    source_key: event.id.clone(),
                    distance_ms,
                };
                match claimed.entry(program_at) {
                    Entry::Vacant(slot) => {
                        slot.insert(candidate);
                    }
                    Entry::Occupied(mut slot) => {
                        if distance_ms < slot.get().distance_ms {
                            tracing::trace!(
                                program_at,
                                replaced = %slot.get().source_key,
                                by = %candidate.source_key,
                                "closer temp basal confirmation"
                            );
                            slot.insert(candidate);
                        }
                    }
                }
            }
        }

        self.consumed_rate_keys = claimed.values().map(|r| r.source_key.clone()).collect();
        self.temp_basal_rates = claimed;
        self.temp_basal_program_times = programs;
    }

    fn resolve_bolus_carbs(&mut self, events: &[RawDeviceEvent]) {
        let window = self.carb_window_ms;

        // (timestamp, grams) of carbohydrate corrections nobody has claimed.
        let mut unmatched: Vec<(i64, f64)> = events
            .iter()
            .filter(|e| e.is_live() && e.code == EventCode::CarbCorrection)
            .filter_map(|e| Some((e.timestamp_ms()?, e.numeric_value()?)))
            .filter(|&(_, grams)| grams > 0.0)
            .collect();

        for bolus in events.iter().filter(|e| e.is_live() && e.code.is_bolus()) {
            let Some(bolus_at) = bolus.timestamp_ms() else {
                continue;
            };

            // The pump's own estimate wins over any free-standing entry.
            if let Some(embedded) = bolus.payload().number("carbs").filter(|g| *g > 0.0) {
                self.bolus_carb_matches.insert(bolus.id.clone(), embedded);
                let suppressed = &mut self.suppressed_carb_times;
                unmatched.retain(|&(carb_at, _)| {
                    let within = carb_at.abs_diff(bolus_at) <= window;
                    if within {
                        suppressed.insert(carb_at);
                    }
                    !within
                });
                continue;
            }

            let nearest = unmatched
                .iter()
                .enumerate()
                .map(|(idx, &(carb_at, _))| (idx, carb_at.abs_diff(bolus_at)))
                .filter(|&(_, distance)| distance <= window)
                .min_by_key(|&(_, distance)| distance)
                .map(|(idx, _)| idx);

            if let Some(idx) = nearest {
                let (carb_at, grams) = unmatched.remove(idx);
                self.bolus_carb_matches.insert(bolus.id.clone(), grams);
                self.suppressed_carb_times.insert(carb_at);
            }
        }
    }

    /// Carbohydrate grams matched to a bolus.
    pub fn bolus_carbs(&self, bolus: &EventKey) -> Option<f64> {
        self.bolus_carb_matches.get(bolus).copied()
    }

    pub fn is_carb_suppressed(&self, timestamp_ms: i64) -> bool {
        self.suppressed_carb_times.contains(&timestamp_ms)
    }

    /// The confirmed rate paired with the program at `program_ms`.
    pub fn resolved_temp_rate(&self, program_ms: i64) -> Option<&ResolvedRate> {
        self.temp_basal_rates.get(&program_ms)
    }

    /// True when a confirmed-rate event was folded into a program.
    pub fn is_rate_consumed(&self, key: &EventKey) -> bool {
        self.consumed_rate_keys.contains(key)
    }

    pub const fn bolus_carb_matches(&self) -> &BTreeMap<EventKey, f64> {
        &self.bolus_carb_matches
    }

    pub const fn suppressed_carb_times(&self) -> &BTreeSet<i64> {
        &self.suppressed_carb_times
    }

    pub fn temp_basal_program_times(&self) -> &[i64] {
        &self.temp_basal_program_times
    }

    pub const fn temp_basal_window_ms(&self) -> u64 {
        self.temp_basal_window_ms
    }

    pub const fn carb_window_ms(&self) -> u64 {
        self.carb_window_ms
    }

    pub const fn manual_bg_sync(&self) -> bool {
        self.manual_bg_sync
    }
}
