//! Observation analyzer.
//!
//! Classifies raw invocation records into success/failure/anomaly,
//! derives the outcome score, and emits hints for the next cycle's
//! planner. Keeps rolling latency and payload-size baselines per tool to
//! spot out-of-distribution results.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use telos_kernel::action::Action;
use telos_kernel::clock::Clock;
use telos_kernel::cycle::CycleHint;
use telos_kernel::goal::Goal;
use telos_kernel::observation::Observation;
use telos_kernel::tool::{InvocationRecord, ToolErrorKind};

/// Rolling window length per tool.
const BASELINE_WINDOW: usize = 64;
/// Minimum samples before anomaly detection engages.
const BASELINE_MIN_SAMPLES: usize = 8;
/// Latency anomaly threshold: `p95 × 3`.
const LATENCY_P95_FACTOR: f64 = 3.0;
/// Payload anomaly threshold in standard deviations from the median.
const PAYLOAD_SIGMA_FACTOR: f64 = 5.0;
/// Success scores below this trigger a refinement hint.
const WEAK_SUCCESS_SCORE: f64 = 0.3;

#[derive(Debug, Default)]
struct ToolBaseline {
    latencies: VecDeque<u64>,
    payloads: VecDeque<u64>,
}

impl ToolBaseline {
    fn push(&mut self, latency_ms: u64, payload_bytes: u64) {
        self.latencies.push_back(latency_ms);
        self.payloads.push_back(payload_bytes);
        while self.latencies.len() > BASELINE_WINDOW {
            self.latencies.pop_front();
        }
        while self.payloads.len() > BASELINE_WINDOW {
            self.payloads.pop_front();
        }
    }

    fn latency_p95(&self) -> Option<f64> {
        if self.latencies.len() < BASELINE_MIN_SAMPLES {
            return None;
        }
        let mut sorted: Vec<u64> = self.latencies.iter().copied().collect();
        sorted.sort_unstable();
        let idx = ((sorted.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
        Some(sorted[idx] as f64)
    }

    fn payload_median_and_sigma(&self) -> Option<(f64, f64)> {
        if self.payloads.len() < BASELINE_MIN_SAMPLES {
            return None;
        }
        let mut sorted: Vec<u64> = self.payloads.iter().copied().collect();
        sorted.sort_unstable();
        let median = sorted[sorted.len() / 2] as f64;
        let mean = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        let variance = sorted
            .iter()
            .map(|v| {
                let d = *v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / sorted.len() as f64;
        Some((median, variance.sqrt()))
    }
}

/// The analyzer. One instance serves all tools; baselines are per tool.
pub struct ObservationAnalyzer {
    baselines: Mutex<HashMap<String, ToolBaseline>>,
    clock: Arc<dyn Clock>,
}

impl ObservationAnalyzer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            baselines: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Turn a raw invocation record into the final observation plus hints
    /// for the next cycle.
    pub fn analyze(
        &self,
        record: &InvocationRecord,
        action: &Action,
        goal: &Goal,
    ) -> (Observation, Vec<CycleHint>) {
        let now = self.clock.now_millis();
        let mut hints = Vec::new();
        let mut signals = record.signals.clone();
        signals.insert("attempts".into(), f64::from(record.attempts));
        if record.fallback_used {
            signals.insert("fallback_used".into(), 1.0);
        }

        let (success, score, anomaly, summary) = if record.cancelled {
            (
                false,
                0.0,
                false,
                format!("{} cancelled by deadline", record.tool_name),
            )
        } else if !record.success {
            // Handler-reported failure. User-class failures are expected
            // outcomes, not anomalies; everything else scores -1 after the
            // retry budget is spent.
            let (score, anomaly) = match record.error_kind {
                Some(ToolErrorKind::User) => (-0.5, false),
                _ => (-1.0, true),
            };
            let message = record.error_message.as_deref().unwrap_or("unknown error");
            (
                false,
                score,
                anomaly,
                format!("{} failed: {message}", record.tool_name),
            )
        } else {
            let mut anomaly = false;
            {
                let baselines = self.baselines.lock();
                if let Some(baseline) = baselines.get(&record.tool_name) {
                    if let Some(p95) = baseline.latency_p95()
                        && record.latency_ms as f64 > p95 * LATENCY_P95_FACTOR
                    {
                        anomaly = true;
                    }
                    if let Some((median, sigma)) = baseline.payload_median_and_sigma()
                        && sigma > 0.0
                        && (record.payload_bytes as f64 - median).abs()
                            > PAYLOAD_SIGMA_FACTOR * sigma
                    {
                        anomaly = true;
                    }
                }
            }
            if anomaly {
                debug!(tool = %record.tool_name, "result out of distribution");
                hints.push(CycleHint::RetryWithSmallerScope);
            }

            let score = match record.score {
                Some(s) => s.clamp(0.0, 1.0),
                None => {
                    if let Some(confidence) = record.signals.get("confidence") {
                        confidence.clamp(0.0, 1.0)
                    } else if record.payload_bytes > 0 {
                        1.0
                    } else {
                        0.25
                    }
                }
            };
            (
                true,
                score,
                anomaly,
                format!(
                    "{} succeeded in {}ms ({} bytes)",
                    record.tool_name, record.latency_ms, record.payload_bytes
                ),
            )
        };

        if success {
            let mut baselines = self.baselines.lock();
            baselines
                .entry(record.tool_name.clone())
                .or_default()
                .push(record.latency_ms, record.payload_bytes);

            if score < WEAK_SUCCESS_SCORE {
                hints.push(CycleHint::RefineParameters);
            }
        }

        let observation = Observation {
            action_id: action.id,
            goal_id: goal.id,
            success,
            score,
            anomaly,
            signals,
            summary,
            latency_ms: record.latency_ms,
            payload_bytes: record.payload_bytes,
            produced_at: now,
        };
        (observation, hints)
    }
}
