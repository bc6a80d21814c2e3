//! Scheduler configuration

use serde::{Deserialize, Serialize};

use crate::domain::Priority;

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Priority used when a submission names neither a level nor a signal
    #[serde(default)]
    pub default_priority: Priority,

    /// Level at or above which a queue counts as urgent for
    /// [`Scheduler::urgent_scheduled_queue_count`](crate::Scheduler::urgent_scheduled_queue_count)
    #[serde(default = "default_urgent_threshold")]
    pub urgent_threshold: Priority,
}

fn default_urgent_threshold() -> Priority {
    Priority::UserBlocking
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_priority: Priority::UserVisible,
            urgent_threshold: Priority::UserBlocking,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.default_priority, Priority::UserVisible);
        assert_eq!(config.urgent_threshold, Priority::UserBlocking);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: SchedulerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.default_priority, Priority::UserVisible);
        assert_eq!(config.urgent_threshold, Priority::UserBlocking);

        let config: SchedulerConfig =
            serde_json::from_str(r#"{"default_priority": "background"}"#).unwrap();
        assert_eq!(config.default_priority, Priority::Background);
    }
}
