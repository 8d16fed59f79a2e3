//! Fixed-rate trace sampling
//!
//! The sampler is deterministic per trace id so every service in a
//! distributed trace reaches the same decision without coordination:
//! - ratio `>= 1.0`: record and sample everything
//! - ratio `<= 0.0`: drop everything
//! - otherwise: hash the lowercase hex trace id with 32-bit DJB2 and keep
//!   the trace when the normalized score falls below the ratio

use opentelemetry::trace::{
    Link, SamplingDecision, SamplingResult, SpanKind, TraceContextExt, TraceId, TraceState,
};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::ShouldSample;

/// Span attribute carrying the effective sample rate in percent
pub const SAMPLE_RATE_ATTRIBUTE: &str = "_MS.sampleRate";

/// Normalized DJB2 score in `[0.0, 1.0]` for a hex trace id
pub fn djb2_sample_score(trace_id_hex: &str) -> f64 {
    let mut hash: i32 = 5381;
    for byte in trace_id_hex.bytes() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_add(hash)
            .wrapping_add(i32::from(byte));
    }

    let hash = if hash == i32::MIN {
        i32::MAX
    } else {
        hash.abs()
    };

    f64::from(hash) / f64::from(i32::MAX)
}

/// Ratio sampler compatible with Application Insights ingestion
#[derive(Debug, Clone)]
pub struct ApplicationInsightsSampler {
    ratio: f64,
}

impl ApplicationInsightsSampler {
    /// Create a sampler keeping `ratio` (0.0 to 1.0) of traces
    pub fn new(ratio: f64) -> Self {
        Self { ratio }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Sample rate in percent, as reported on every span
    pub fn sample_rate(&self) -> f64 {
        self.ratio * 100.0
    }

    /// Decide for a trace id without any SDK context
    pub fn decide(&self, trace_id: TraceId) -> SamplingDecision {
        if self.ratio >= 1.0 {
            return SamplingDecision::RecordAndSample;
        }
        if self.ratio <= 0.0 {
            return SamplingDecision::Drop;
        }

        let hex = format!("{:032x}", u128::from_be_bytes(trace_id.to_bytes()));
        let score = djb2_sample_score(&hex);
        if score < self.ratio {
            SamplingDecision::RecordAndSample
        } else {
            SamplingDecision::Drop
        }
    }
}

impl ShouldSample for ApplicationInsightsSampler {
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        _name: &str,
        _span_kind: &SpanKind,
        _attributes: &[KeyValue],
        _links: &[Link],
    ) -> SamplingResult {
        let trace_state = parent_context
            .filter(|cx| cx.has_active_span())
            .map(|cx| cx.span().span_context().trace_state().clone())
            .unwrap_or_else(TraceState::default);

        SamplingResult {
            decision: self.decide(trace_id),
            attributes: vec![KeyValue::new(SAMPLE_RATE_ATTRIBUTE, self.sample_rate())],
            trace_state,
        }
    }
}
