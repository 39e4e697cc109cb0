//! Status conditions shared by every kind and revision
//!
//! Conditions are merged by type: setting a condition replaces the existing
//! condition of the same type, and the transition time only moves when the
//! status value actually changes.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reporting overall readiness
pub const CONDITION_READY: &str = "Ready";

/// Condition type tracking power transitions
pub const CONDITION_POWER_OPERATION: &str = "PowerOperation";

/// Condition reasons
pub mod reason {
    pub const POWER_SYNCED: &str = "PowerSynced";
    pub const POWER_SYNC_FAILED: &str = "PowerSyncFailed";
    pub const BACKING_RESOURCES_FAILED: &str = "BackingResourcesFailed";
    pub const INVALID_CONFIGURATION: &str = "InvalidConfiguration";
    pub const TEARDOWN_FAILED: &str = "TeardownFailed";
    pub const SYNCED: &str = "Synced";
    pub const SYNC_FAILED: &str = "SyncFailed";
}

/// Condition status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A typed, reasoned, timestamped status record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status: True, False, Unknown
    pub status: ConditionStatus,
    /// Last transition time
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<DateTime<Utc>>,
    /// Machine-readable reason
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    /// Build a condition observed at `now`
    pub fn new(
        condition_type: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status,
            last_transition_time: Some(now),
            reason: Some(reason.to_string()),
            message: Some(message.into()),
        }
    }

    /// `Ready=True` with the given reason
    pub fn ready(reason: &str, message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(CONDITION_READY, ConditionStatus::True, reason, message, now)
    }

    /// `Ready=False` with the given reason
    pub fn not_ready(reason: &str, message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(CONDITION_READY, ConditionStatus::False, reason, message, now)
    }
}

/// Set a condition, replacing the existing one of the same type
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.r#type == condition.r#type) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Check whether a condition of the given type is `True`
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    find_condition(conditions, condition_type)
        .map(|c| c.status == ConditionStatus::True)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_set_condition_appends_new_type() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, Condition::ready(reason::SYNCED, "ok", at(10)));
        set_condition(
            &mut conditions,
            Condition::new(
                CONDITION_POWER_OPERATION,
                ConditionStatus::Unknown,
                reason::POWER_SYNCED,
                "",
                at(11),
            ),
        );
        assert_eq!(conditions.len(), 2);
    }

    #[test]
    fn test_same_status_keeps_transition_time() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, Condition::ready(reason::SYNCED, "first", at(10)));
        set_condition(&mut conditions, Condition::ready(reason::SYNCED, "second", at(20)));

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, Some(at(10)));
        assert_eq!(conditions[0].message.as_deref(), Some("second"));
    }

    #[test]
    fn test_status_change_bumps_transition_time() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, Condition::ready(reason::SYNCED, "ok", at(10)));
        set_condition(
            &mut conditions,
            Condition::not_ready(reason::SYNC_FAILED, "backend down", at(30)),
        );

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, ConditionStatus::False);
        assert_eq!(conditions[0].last_transition_time, Some(at(30)));
        assert!(!is_condition_true(&conditions, CONDITION_READY));
    }
}
