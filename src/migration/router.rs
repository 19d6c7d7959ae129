//! Deterministic traffic routing between the legacy and enhanced processors.

use crate::config::MigrationConfig;
use crate::pipeline::ProcessorKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoutingReason {
    KillSwitch,
    AdminUser,
    AllowList,
    InRollout,
    OutsideRollout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub processor: ProcessorKind,
    pub reason: RoutingReason,
    pub bucket: u8,
}

/// Stable bucket in `0..100` for a user id.
pub fn user_bucket(user_id: &str) -> u8 {
    let digest = Sha256::digest(user_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % 100) as u8
}

pub struct MigrationRouter {
    enhanced_enabled: AtomicBool,
    rollout_percentage: AtomicU8,
    allow_list: HashSet<String>,
    admin_users: HashSet<String>,
}

impl MigrationRouter {
    pub fn new(config: &MigrationConfig) -> Self {
        Self {
            enhanced_enabled: AtomicBool::new(config.enhanced_enabled),
            rollout_percentage: AtomicU8::new(config.rollout_percentage.min(100)),
            allow_list: config.allow_list.clone(),
            admin_users: config.admin_users.clone(),
        }
    }

    pub fn route(&self, user_id: &str) -> RoutingDecision {
        let bucket = user_bucket(user_id);
        let (processor, reason) = if !self.enhanced_enabled() {
            (ProcessorKind::Legacy, RoutingReason::KillSwitch)
        } else if self.admin_users.contains(user_id) {
            (ProcessorKind::Enhanced, RoutingReason::AdminUser)
        } else if self.allow_list.contains(user_id) {
            (ProcessorKind::Enhanced, RoutingReason::AllowList)
        } else if bucket < self.rollout_percentage() {
            (ProcessorKind::Enhanced, RoutingReason::InRollout)
        } else {
            (ProcessorKind::Legacy, RoutingReason::OutsideRollout)
        };
        RoutingDecision {
            processor,
            reason,
            bucket,
        }
    }

    pub fn enhanced_enabled(&self) -> bool {
        self.enhanced_enabled.load(Ordering::Relaxed)
    }

    pub fn set_enhanced_enabled(&self, enabled: bool) {
        self.enhanced_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn rollout_percentage(&self) -> u8 {
        self.rollout_percentage.load(Ordering::Relaxed)
    }

    pub fn set_rollout_percentage(&self, percentage: u8) {
        self.rollout_percentage.store(percentage.min(100), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(rollout: u8) -> MigrationRouter {
        MigrationRouter::new(&MigrationConfig {
            rollout_percentage: rollout,
            admin_users: ["root".to_string()].into_iter().collect(),
            allow_list: ["beta".to_string()].into_iter().collect(),
            ..MigrationConfig::default()
        })
    }

    #[test]
    fn test_routing_is_deterministic() {
        let r = router(50);
        for user in ["alice", "bob", "carol", "u-123"] {
            assert_eq!(r.route(user), r.route(user));
            assert_eq!(user_bucket(user), user_bucket(user));
        }
    }

    #[test]
    fn test_rollout_bounds() {
        let none = router(0);
        let all = router(100);
        for i in 0..200 {
            let user = format!("user-{i}");
            assert_eq!(none.route(&user).processor, ProcessorKind::Legacy);
            assert_eq!(all.route(&user).processor, ProcessorKind::Enhanced);
        }
    }

    #[test]
    fn test_rollout_is_monotonic() {
        // A user enrolled at a lower percentage stays enrolled at a higher one.
        let low = router(20);
        let high = router(60);
        for i in 0..200 {
            let user = format!("user-{i}");
            if low.route(&user).processor == ProcessorKind::Enhanced {
                assert_eq!(high.route(&user).processor, ProcessorKind::Enhanced);
            }
        }
    }

    #[test]
    fn test_lists_override_and_kill_switch_wins() {
        let r = router(0);
        assert_eq!(r.route("root").reason, RoutingReason::AdminUser);
        assert_eq!(r.route("beta").processor, ProcessorKind::Enhanced);

        r.set_enhanced_enabled(false);
        assert_eq!(r.route("root").processor, ProcessorKind::Legacy);
        assert_eq!(r.route("root").reason, RoutingReason::KillSwitch);
    }
}
