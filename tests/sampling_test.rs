//! Tests for the Application Insights ratio sampler
//!
//! Random trace ids are used to check that the kept fraction tracks the
//! configured ratio and that decisions are stable per trace id.

use opentelemetry::trace::{SamplingDecision, SpanKind, TraceId};
use opentelemetry_sdk::trace::ShouldSample;
use otel_distro::pipeline::sampling::{
    djb2_sample_score, ApplicationInsightsSampler, SAMPLE_RATE_ATTRIBUTE,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SAMPLES: usize = 10_000;

fn random_trace_ids(seed: u64) -> Vec<TraceId> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..SAMPLES)
        .map(|_| TraceId::from_bytes(rng.random::<u128>().to_be_bytes()))
        .collect()
}

fn kept_fraction(sampler: &ApplicationInsightsSampler, ids: &[TraceId]) -> f64 {
    let kept = ids
        .iter()
        .filter(|id| sampler.decide(**id) == SamplingDecision::RecordAndSample)
        .count();
    kept as f64 / ids.len() as f64
}

#[test]
fn test_kept_fraction_tracks_ratio() {
    let ids = random_trace_ids(7);

    for ratio in [0.1, 0.25, 0.5, 0.75] {
        let fraction = kept_fraction(&ApplicationInsightsSampler::new(ratio), &ids);
        assert!(
            (fraction - ratio).abs() < 0.05,
            "ratio {} kept {}",
            ratio,
            fraction
        );
    }
}

#[test]
fn test_decisions_are_deterministic() {
    let ids = random_trace_ids(11);
    let sampler = ApplicationInsightsSampler::new(0.3);

    for id in ids.iter().take(500) {
        assert_eq!(sampler.decide(*id), sampler.decide(*id));
    }
}

#[test]
fn test_higher_ratio_keeps_superset() {
    let ids = random_trace_ids(23);
    let low = ApplicationInsightsSampler::new(0.2);
    let high = ApplicationInsightsSampler::new(0.6);

    for id in &ids {
        if low.decide(*id) == SamplingDecision::RecordAndSample {
            assert_eq!(high.decide(*id), SamplingDecision::RecordAndSample);
        }
    }
}

#[test]
fn test_score_matches_known_trace_id() {
    let score = djb2_sample_score("0af7651916cd43dd8448eb211c80319c");
    assert!((score - 0.5279).abs() < 0.001, "score {}", score);
}

#[test]
fn test_sample_rate_attribute_on_every_decision() {
    let sampler = ApplicationInsightsSampler::new(0.25);

    for id in random_trace_ids(3).into_iter().take(50) {
        let result = sampler.should_sample(None, id, "op", &SpanKind::Server, &[], &[]);
        let rate = result
            .attributes
            .iter()
            .find(|kv| kv.key.as_str() == SAMPLE_RATE_ATTRIBUTE)
            .map(|kv| kv.value.clone());
        assert_eq!(rate, Some(opentelemetry::Value::F64(25.0)));
    }
}
