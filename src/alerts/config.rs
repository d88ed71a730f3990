//! Alert configuration types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Thresholds and delivery targets for monitor alerts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertSettings {
    /// Missed-signature rate over the last 100 blocks that raises a sync alert
    #[serde(default = "default_proportion")]
    pub proportion: f64,
    /// Bonded-set ranks above this raise a ranking alert
    #[serde(default = "default_ranking_threshold")]
    pub ranking_threshold: i64,
    /// Notification targets
    #[serde(default = "default_targets")]
    pub targets: Vec<NotifyTarget>,
}

fn default_proportion() -> f64 {
    0.1
}

fn default_ranking_threshold() -> i64 {
    100
}

fn default_targets() -> Vec<NotifyTarget> {
    vec![NotifyTarget::Log]
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            proportion: default_proportion(),
            ranking_threshold: default_ranking_threshold(),
            targets: default_targets(),
        }
    }
}

impl AlertSettings {
    /// Set the missed-signature proportion
    pub fn with_proportion(mut self, proportion: f64) -> Self {
        self.proportion = proportion;
        self
    }
}

/// Notification target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum NotifyTarget {
    /// Log to tracing
    Log,
    /// HTTP webhook
    Webhook {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}
