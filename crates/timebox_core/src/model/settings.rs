//! Per-user preferences stored on the user document.
//!
//! The settings form itself lives outside the core; the core only warms a
//! cached copy during `preload`. Missing fields fall back to the defaults.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    pub email: bool,
    pub reminders: bool,
    pub weekly_report: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            email: true,
            reminders: true,
            weekly_report: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlannerPreferences {
    /// First hour shown on the schedule, `HH:MM`.
    pub start_time: String,
    /// Last hour shown on the schedule, `HH:MM`.
    pub end_time: String,
    /// Slot size in minutes, kept as text to match the stored shape.
    pub time_interval: String,
    pub dark_mode: bool,
}

impl Default for PlannerPreferences {
    fn default() -> Self {
        Self {
            start_time: "08:00".to_string(),
            end_time: "18:00".to_string(),
            time_interval: "30".to_string(),
            dark_mode: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    pub notifications: NotificationSettings,
    pub preferences: PlannerPreferences,
}
