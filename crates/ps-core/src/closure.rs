//! Closes open state spans against their successors.

use serde_json::json;

use crate::record::{StateSpan, StateSpanCategory};

const MS_PER_MINUTE: f64 = 60_000.0;

/// Ends each open basal-delivery span where the next one begins.
///
/// Only open spans with a positive start take part. For each adjacent pair
/// (ordered by start, then ID) the earlier span gets `end_ms`,
/// `durationMinutes` and, when it has a rate, `insulinDelivered` in units
/// rounded to four places. The latest span stays open. Already closed spans
/// pass through untouched.
///
/// The result holds every input span, ordered by start then ID.
#[must_use]
pub fn close_state_spans(spans: Vec<StateSpan>) -> Vec<StateSpan> {
    let (mut open, mut rest): (Vec<_>, Vec<_>) = spans.into_iter().partition(|span| {
        span.category == StateSpanCategory::BasalDelivery && span.is_open() && span.start_ms > 0
    });
    open.sort_by(|a, b| a.start_ms.cmp(&b.start_ms).then_with(|| a.id.cmp(&b.id)));

    let next_starts: Vec<i64> = open.iter().skip(1).map(|span| span.start_ms).collect();
    for (span, next_start) in open.iter_mut().zip(next_starts) {
        close(span, next_start);
    }
    tracing::debug!(closed = open.len().saturating_sub(1), "closed state spans");

    rest.append(&mut open);
    rest.sort_by(|a, b| a.start_ms.cmp(&b.start_ms).then_with(|| a.id.cmp(&b.id)));
    rest
}

#[expect(
    clippy::cast_precision_loss,
    reason = "span lengths are far below 2^52 ms"
)]
fn close(span: &mut StateSpan, end_ms: i64) {
    let minutes = (end_ms - span.start_ms) as f64 / MS_PER_MINUTE;
    span.end_ms = Some(end_ms);
    span.metadata
        .insert("durationMinutes".to_string(), json!(minutes));
    if let Some(rate) = span.rate() {
        span.metadata.insert(
            "insulinDelivered".to_string(),
            json!(round_to(rate * minutes / 60.0, 4)),
        );
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10_f64.powi(places);
    (value * scale).round() / scale
}
