//! Rolling per-processor outcome samples and comparison records.

use crate::pipeline::ProcessorKind;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

const MAX_SAMPLES: usize = 10_000;
const MAX_COMPARISONS: usize = 200;

#[derive(Debug, Clone)]
struct Sample {
    processor: ProcessorKind,
    at: Instant,
    elapsed_ms: u64,
    success: bool,
    confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorSummary {
    pub samples: usize,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub avg_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonRecord {
    pub primary: ProcessorKind,
    pub enhanced_elapsed_ms: u64,
    pub legacy_elapsed_ms: u64,
    pub enhanced_success: bool,
    pub legacy_success: bool,
    pub enhanced_confidence: f64,
    pub legacy_confidence: f64,
    pub same_sql: bool,
}

#[derive(Default)]
pub struct MigrationMetrics {
    samples: Mutex<VecDeque<Sample>>,
    comparisons: Mutex<VecDeque<ComparisonRecord>>,
}

impl MigrationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, processor: ProcessorKind, elapsed_ms: u64, success: bool, confidence: f64) {
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        if samples.len() == MAX_SAMPLES {
            samples.pop_front();
        }
        samples.push_back(Sample {
            processor,
            at: Instant::now(),
            elapsed_ms,
            success,
            confidence,
        });
    }

    pub fn record_comparison(&self, record: ComparisonRecord) {
        let mut comparisons = self.comparisons.lock().unwrap_or_else(|e| e.into_inner());
        if comparisons.len() == MAX_COMPARISONS {
            comparisons.pop_front();
        }
        comparisons.push_back(record);
    }

    pub fn recent_comparisons(&self, limit: usize) -> Vec<ComparisonRecord> {
        let comparisons = self.comparisons.lock().unwrap_or_else(|e| e.into_inner());
        comparisons.iter().rev().take(limit).cloned().collect()
    }

    /// Summary of samples for `processor` no older than `window`.
    pub fn summary(&self, processor: ProcessorKind, window: Duration) -> ProcessorSummary {
        let samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let in_window: Vec<&Sample> = samples
            .iter()
            .filter(|s| s.processor == processor && now.duration_since(s.at) <= window)
            .collect();

        if in_window.is_empty() {
            return ProcessorSummary::default();
        }
        let n = in_window.len() as f64;
        ProcessorSummary {
            samples: in_window.len(),
            success_rate: in_window.iter().filter(|s| s.success).count() as f64 / n,
            avg_latency_ms: in_window.iter().map(|s| s.elapsed_ms as f64).sum::<f64>() / n,
            avg_confidence: in_window.iter().map(|s| s.confidence).sum::<f64>() / n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_summary_respects_window() {
        let metrics = MigrationMetrics::new();
        metrics.record(ProcessorKind::Legacy, 900, false, 0.4);
        tokio::time::advance(Duration::from_secs(120)).await;
        metrics.record(ProcessorKind::Legacy, 100, true, 0.8);
        metrics.record(ProcessorKind::Legacy, 300, true, 0.6);
        metrics.record(ProcessorKind::Enhanced, 50, true, 0.9);

        let legacy = metrics.summary(ProcessorKind::Legacy, Duration::from_secs(60));
        assert_eq!(legacy.samples, 2);
        assert_eq!(legacy.success_rate, 1.0);
        assert_eq!(legacy.avg_latency_ms, 200.0);

        let all = metrics.summary(ProcessorKind::Legacy, Duration::from_secs(600));
        assert_eq!(all.samples, 3);
    }

    #[test]
    fn test_comparisons_newest_first() {
        let metrics = MigrationMetrics::new();
        for i in 0..3 {
            metrics.record_comparison(ComparisonRecord {
                primary: ProcessorKind::Enhanced,
                enhanced_elapsed_ms: i,
                legacy_elapsed_ms: 10,
                enhanced_success: true,
                legacy_success: true,
                enhanced_confidence: 0.8,
                legacy_confidence: 0.7,
                same_sql: false,
            });
        }
        let recent = metrics.recent_comparisons(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].enhanced_elapsed_ms, 2);
    }
}
