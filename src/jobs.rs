//! Periodic background work: cache optimization, auto-migration evaluation,
//! rate-limiter and conversation housekeeping. Every job stops when the token is cancelled.

use crate::api::AppState;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Run `tick` every `period` until `shutdown` fires. The first tick happens
/// one period after start.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(job = name, period_secs = period.as_secs(), "Background job started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => tick().await,
            }
        }
        info!(job = name, "Background job stopped");
    })
}

pub fn spawn_all(state: &AppState, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    if state.cache.is_enabled() {
        let cache = state.cache.clone();
        let period = Duration::from_secs(state.config.cache.sweep_interval_secs.max(1));
        handles.push(spawn_periodic("cache-optimize", period, shutdown.clone(), move || {
            let cache = cache.clone();
            async move {
                match cache.optimize().await {
                    Ok(report) => debug!(remaining = report.remaining, "Cache sweep finished"),
                    Err(e) => warn!(error = %e, "Cache sweep failed"),
                }
            }
        }));
    }

    if state.controller.config().enabled {
        let controller = state.controller.clone();
        let period = Duration::from_secs(state.controller.config().evaluation_interval_secs.max(1));
        handles.push(spawn_periodic("auto-migration", period, shutdown.clone(), move || {
            let controller = controller.clone();
            async move {
                let evaluation = controller.evaluate();
                debug!(action = ?evaluation.action, score = ?evaluation.score, "Migration evaluated");
            }
        }));
    }

    let limiter = state.rate_limiter.clone();
    handles.push(spawn_periodic(
        "rate-limit-prune",
        Duration::from_secs(300),
        shutdown.clone(),
        move || {
            let limiter = limiter.clone();
            async move { limiter.prune() }
        },
    ));

    let conversations = state.conversations.clone();
    handles.push(spawn_periodic(
        "conversation-prune",
        Duration::from_secs(300),
        shutdown.clone(),
        move || {
            let conversations = conversations.clone();
            async move {
                let removed = conversations.prune();
                if removed > 0 {
                    debug!(removed, "Idle conversations pruned");
                }
            }
        },
    ));

    handles
}
