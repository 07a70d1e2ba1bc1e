//! Core reconciliation logic for pump and CGM sync.
//!
//! This crate turns raw vendor device events into normalized records:
//! - Consolidation: pairing temp basal programs with confirmed rates and
//!   boluses with carbohydrate entries
//! - Dispatch: ordered, first-match classification into entries, treatments
//!   and basal state spans
//! - Closure: ending each basal span where the next one begins

mod closure;
pub mod context;
pub mod dispatch;
pub mod event;
pub mod event_code;
pub mod factory;
pub mod metrics;
pub mod payload;
mod reconcile;
pub mod record;
pub mod types;

#[cfg(test)]
mod testing;

pub use closure::close_state_spans;
pub use context::{ConsolidationContext, ResolvedRate};
pub use event::{RawDeviceEvent, parse_vendor_timestamp};
pub use event_code::{EventCode, UnknownEventCode};
pub use metrics::{MeteredRecord, SyncMetrics};
pub use payload::Payload;
pub use reconcile::{ReconcileOptions, ReconcileOutput, Reconciler, reconcile};
pub use record::{
    BgCheck, Bolus, BolusCalculation, BolusKind, CarbIntake, DeviceEvent, GlucoseEntry, Note,
    OutputRecord, RecordMeta, StateSpan, StateSpanCategory, Treatment,
};
pub use types::{EventKey, RecordId, ValidationError};
