//! Automatic rollout adjustment.
//!
//! Each evaluation scores the enhanced processor against the legacy one over
//! the metrics window: `0.7 * latency delta + 0.3 * success-rate delta`, both
//! positive when the enhanced path is better. The rollout moves by one step
//! only after the same verdict holds for `sustained_evaluations` in a row.

use super::metrics::{MigrationMetrics, ProcessorSummary};
use super::router::MigrationRouter;
use crate::config::AutoMigrationConfig;
use crate::pipeline::ProcessorKind;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

const LATENCY_WEIGHT: f64 = 0.7;
const SUCCESS_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "action")]
pub enum MigrationAction {
    InsufficientData,
    Hold,
    Increase { from: u8, to: u8 },
    Decrease { from: u8, to: u8 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub score: Option<f64>,
    pub action: MigrationAction,
    pub enhanced: ProcessorSummary,
    pub legacy: ProcessorSummary,
}

#[derive(Debug, Default)]
struct Streak {
    improving: u32,
    regressing: u32,
}

/// Weighted improvement of `enhanced` over `legacy`.
pub fn improvement_score(enhanced: &ProcessorSummary, legacy: &ProcessorSummary) -> f64 {
    let latency_delta = if legacy.avg_latency_ms > 0.0 {
        (legacy.avg_latency_ms - enhanced.avg_latency_ms) / legacy.avg_latency_ms
    } else {
        0.0
    };
    let success_delta = enhanced.success_rate - legacy.success_rate;
    LATENCY_WEIGHT * latency_delta.clamp(-1.0, 1.0) + SUCCESS_WEIGHT * success_delta
}

pub struct MigrationController {
    router: Arc<MigrationRouter>,
    metrics: Arc<MigrationMetrics>,
    config: AutoMigrationConfig,
    streak: Mutex<Streak>,
    last: Mutex<Option<Evaluation>>,
}

impl MigrationController {
    pub fn new(router: Arc<MigrationRouter>, metrics: Arc<MigrationMetrics>, config: AutoMigrationConfig) -> Self {
        Self {
            router,
            metrics,
            config,
            streak: Mutex::new(Streak::default()),
            last: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AutoMigrationConfig {
        &self.config
    }

    pub fn last_evaluation(&self) -> Option<Evaluation> {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn evaluate(&self) -> Evaluation {
        let window = Duration::from_secs(self.config.window_secs);
        let enhanced = self.metrics.summary(ProcessorKind::Enhanced, window);
        let legacy = self.metrics.summary(ProcessorKind::Legacy, window);

        let evaluation = if enhanced.samples < self.config.min_samples
            || legacy.samples < self.config.min_samples
        {
            debug!(
                enhanced = enhanced.samples,
                legacy = legacy.samples,
                "Not enough samples for migration evaluation"
            );
            Evaluation {
                score: None,
                action: MigrationAction::InsufficientData,
                enhanced,
                legacy,
            }
        } else {
            let score = improvement_score(&enhanced, &legacy);
            let action = self.apply(score);
            Evaluation {
                score: Some(score),
                action,
                enhanced,
                legacy,
            }
        };

        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(evaluation.clone());
        evaluation
    }

    fn apply(&self, score: f64) -> MigrationAction {
        let mut streak = self.streak.lock().unwrap_or_else(|e| e.into_inner());
        if score >= self.config.improvement_threshold {
            streak.improving += 1;
            streak.regressing = 0;
        } else if score <= -self.config.regression_threshold {
            streak.regressing += 1;
            streak.improving = 0;
        } else {
            *streak = Streak::default();
            return MigrationAction::Hold;
        }

        let sustained = self.config.sustained_evaluations.max(1);
        let from = self.router.rollout_percentage();
        let step = self.config.step_percentage;

        if streak.improving >= sustained && from < 100 {
            *streak = Streak::default();
            let to = from.saturating_add(step).min(100);
            self.router.set_rollout_percentage(to);
            info!(from, to, score, "Raising enhanced rollout");
            MigrationAction::Increase { from, to }
        } else if streak.regressing >= sustained && from > 0 {
            *streak = Streak::default();
            let to = from.saturating_sub(step);
            self.router.set_rollout_percentage(to);
            warn!(from, to, score, "Lowering enhanced rollout after sustained regression");
            MigrationAction::Decrease { from, to }
        } else {
            MigrationAction::Hold
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationConfig;

    fn setup(rollout: u8) -> (Arc<MigrationRouter>, Arc<MigrationMetrics>, MigrationController) {
        let router = Arc::new(MigrationRouter::new(&MigrationConfig {
            rollout_percentage: rollout,
            ..MigrationConfig::default()
        }));
        let metrics = Arc::new(MigrationMetrics::new());
        let controller = MigrationController::new(
            router.clone(),
            metrics.clone(),
            AutoMigrationConfig {
                enabled: true,
                min_samples: 2,
                sustained_evaluations: 2,
                step_percentage: 10,
                ..AutoMigrationConfig::default()
            },
        );
        (router, metrics, controller)
    }

    fn feed(metrics: &MigrationMetrics, enhanced_ms: u64, enhanced_ok: bool) {
        for _ in 0..3 {
            metrics.record(ProcessorKind::Enhanced, enhanced_ms, enhanced_ok, 0.8);
            metrics.record(ProcessorKind::Legacy, 1000, true, 0.6);
        }
    }

    #[test]
    fn test_score_weights() {
        let enhanced = ProcessorSummary {
            samples: 10,
            success_rate: 1.0,
            avg_latency_ms: 500.0,
            avg_confidence: 0.8,
        };
        let legacy = ProcessorSummary {
            samples: 10,
            success_rate: 0.9,
            avg_latency_ms: 1000.0,
            avg_confidence: 0.6,
        };
        let score = improvement_score(&enhanced, &legacy);
        assert!((score - (0.7 * 0.5 + 0.3 * 0.1)).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insufficient_data_holds_rollout() {
        let (router, _metrics, controller) = setup(30);
        assert_eq!(controller.evaluate().action, MigrationAction::InsufficientData);
        assert_eq!(router.rollout_percentage(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_improvement_raises_rollout() {
        let (router, metrics, controller) = setup(30);
        feed(&metrics, 400, true);
        assert_eq!(controller.evaluate().action, MigrationAction::Hold);
        assert_eq!(
            controller.evaluate().action,
            MigrationAction::Increase { from: 30, to: 40 }
        );
        assert_eq!(router.rollout_percentage(), 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_regression_lowers_rollout() {
        let (router, metrics, controller) = setup(30);
        feed(&metrics, 3000, false);
        controller.evaluate();
        assert_eq!(
            controller.evaluate().action,
            MigrationAction::Decrease { from: 30, to: 20 }
        );
        assert_eq!(router.rollout_percentage(), 20);
        assert!(controller.last_evaluation().is_some());
    }
}
