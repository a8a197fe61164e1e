//! Planning sheet domain model.
//!
//! # Responsibility
//! - Define the one-per-date planning document and its three panels.
//! - Define `SheetPatch`, the partial-merge unit used by every mutation.
//!
//! # Invariants
//! - `id == SheetId::for_date(date)` for sheets created through `Sheet::new`.
//! - `date` is a real calendar date in `YYYY-MM-DD` form and never changes;
//!   `SheetPatch` has no `date` field.
//! - Schedule display order is `start_time` ascending, never insertion order.
//!
//! # See also
//! - model/edits.rs for panel edit helpers.

use crate::model::ids::{ServerTimestamp, SheetId};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

const DATE_FORMAT: &str = "%Y-%m-%d";
const UNTITLED_TITLE: &str = "Untitled Timebox";

static DATE_SHAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date regex"));
static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([01]\d|2[0-3]):[0-5]\d$").expect("valid time regex"));

/// Validation failures for sheet input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetValidationError {
    /// Date is not a real `YYYY-MM-DD` calendar date.
    InvalidDate(String),
    /// Time is not a zero-padded 24-hour `HH:MM` value.
    InvalidTime(String),
    /// A required text field is blank.
    EmptyText(&'static str),
}

impl Display for SheetValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDate(value) => write!(f, "invalid sheet date `{value}`; expected YYYY-MM-DD"),
            Self::InvalidTime(value) => write!(f, "invalid time `{value}`; expected HH:MM"),
            Self::EmptyText(field) => write!(f, "{field} cannot be empty"),
        }
    }
}

impl Error for SheetValidationError {}

/// One entry of the prioritized task list. Insertion order is display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Priority {
    pub id: String,
    pub text: String,
    pub completed: bool,
}

/// Free-form note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub content: String,
}

/// Color tag of a schedule block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockColor {
    #[default]
    Default,
    Primary,
    Secondary,
    Success,
    Warning,
    Danger,
}

impl BlockColor {
    pub const ALL: [BlockColor; 6] = [
        BlockColor::Default,
        BlockColor::Primary,
        BlockColor::Secondary,
        BlockColor::Success,
        BlockColor::Warning,
        BlockColor::Danger,
    ];
}

/// One block of the hourly schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeBlock {
    pub id: String,
    /// Zero-padded 24-hour `HH:MM`.
    pub start_time: String,
    /// Zero-padded 24-hour `HH:MM`.
    pub end_time: String,
    pub activity: String,
    #[serde(default)]
    pub color: BlockColor,
}

/// One planning document per calendar date per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sheet {
    pub id: SheetId,
    pub title: String,
    pub date: String,
    #[serde(default)]
    pub priorities: Vec<Priority>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub schedule: Vec<TimeBlock>,
    pub created_at: ServerTimestamp,
    pub updated_at: ServerTimestamp,
}

impl Sheet {
    /// Builds an empty sheet for `date`.
    ///
    /// A blank or missing `title` falls back to the long form of the date.
    pub fn new(
        date: &str,
        title: Option<&str>,
        now: ServerTimestamp,
    ) -> Result<Self, SheetValidationError> {
        let date = date.trim();
        validate_date(date)?;
        let title = match title.map(str::trim) {
            Some(value) if !value.is_empty() => value.to_string(),
            _ => Self::format_date_title(date),
        };

        Ok(Self {
            id: SheetId::for_date(date),
            title,
            date: date.to_string(),
            priorities: Vec::new(),
            notes: Vec::new(),
            schedule: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Long US-English form of a `YYYY-MM-DD` date, e.g. `Friday, March 1`.
    pub fn format_date_title(date: &str) -> String {
        match NaiveDate::parse_from_str(date.trim(), DATE_FORMAT) {
            Ok(parsed) => parsed.format("%A, %B %-d").to_string(),
            Err(_) => UNTITLED_TITLE.to_string(),
        }
    }

    /// Schedule blocks in display order (`start_time` ascending).
    ///
    /// Lexicographic order is chronological because times are zero-padded.
    pub fn sorted_schedule(&self) -> Vec<&TimeBlock> {
        let mut blocks: Vec<&TimeBlock> = self.schedule.iter().collect();
        blocks.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        blocks
    }

    /// Checks persisted or caller-built state before it is written.
    pub fn validate(&self) -> Result<(), SheetValidationError> {
        validate_date(&self.date)?;
        for block in &self.schedule {
            validate_time(&block.start_time)?;
            validate_time(&block.end_time)?;
        }
        Ok(())
    }
}

/// Partial update merged into a sheet. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priorities: Option<Vec<Priority>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Vec<Note>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Vec<TimeBlock>>,
}

impl SheetPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn priorities(priorities: Vec<Priority>) -> Self {
        Self {
            priorities: Some(priorities),
            ..Self::default()
        }
    }

    pub fn notes(notes: Vec<Note>) -> Self {
        Self {
            notes: Some(notes),
            ..Self::default()
        }
    }

    pub fn schedule(schedule: Vec<TimeBlock>) -> Self {
        Self {
            schedule: Some(schedule),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.priorities.is_none()
            && self.notes.is_none()
            && self.schedule.is_none()
    }

    /// Folds a later patch into this one; fields set in `later` win.
    pub fn merge(&mut self, later: SheetPatch) {
        if later.title.is_some() {
            self.title = later.title;
        }
        if later.priorities.is_some() {
            self.priorities = later.priorities;
        }
        if later.notes.is_some() {
            self.notes = later.notes;
        }
        if later.schedule.is_some() {
            self.schedule = later.schedule;
        }
    }

    /// Applies the patch to `sheet` and stamps `updated_at`.
    pub fn apply_to(&self, sheet: &mut Sheet, now: ServerTimestamp) {
        if let Some(title) = &self.title {
            sheet.title = title.clone();
        }
        if let Some(priorities) = &self.priorities {
            sheet.priorities = priorities.clone();
        }
        if let Some(notes) = &self.notes {
            sheet.notes = notes.clone();
        }
        if let Some(schedule) = &self.schedule {
            sheet.schedule = schedule.clone();
        }
        sheet.updated_at = now;
    }

    pub fn validate(&self) -> Result<(), SheetValidationError> {
        if let Some(schedule) = &self.schedule {
            for block in schedule {
                validate_time(&block.start_time)?;
                validate_time(&block.end_time)?;
            }
        }
        Ok(())
    }
}

/// Accepts only real calendar dates in zero-padded `YYYY-MM-DD` form.
pub fn validate_date(date: &str) -> Result<(), SheetValidationError> {
    if !DATE_SHAPE_RE.is_match(date) || NaiveDate::parse_from_str(date, DATE_FORMAT).is_err() {
        return Err(SheetValidationError::InvalidDate(date.to_string()));
    }
    Ok(())
}

/// Accepts only zero-padded 24-hour `HH:MM` times.
pub fn validate_time(time: &str) -> Result<(), SheetValidationError> {
    if !TIME_RE.is_match(time) {
        return Err(SheetValidationError::InvalidTime(time.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{validate_date, validate_time, Sheet, SheetPatch, SheetValidationError};
    use crate::model::ids::ServerTimestamp;

    #[test]
    fn new_sheet_uses_date_derived_id_and_default_title() {
        let sheet = Sheet::new("2024-03-01", None, ServerTimestamp::from_millis(1)).unwrap();
        assert_eq!(sheet.id.as_str(), "sheet-2024-03-01");
        assert_eq!(sheet.title, "Friday, March 1");
        assert!(sheet.priorities.is_empty());
        assert_eq!(sheet.created_at, sheet.updated_at);
    }

    #[test]
    fn blank_title_falls_back_to_date_title() {
        let sheet = Sheet::new("2024-12-25", Some("  "), ServerTimestamp::from_millis(1)).unwrap();
        assert_eq!(sheet.title, "Wednesday, December 25");
    }

    #[test]
    fn format_date_title_handles_garbage() {
        assert_eq!(Sheet::format_date_title("not-a-date"), "Untitled Timebox");
    }

    #[test]
    fn date_validation_requires_zero_padded_real_dates() {
        assert!(validate_date("2024-02-29").is_ok());
        assert_eq!(
            validate_date("2023-02-29"),
            Err(SheetValidationError::InvalidDate("2023-02-29".to_string()))
        );
        assert!(validate_date("2024-3-1").is_err());
    }

    #[test]
    fn time_validation_requires_hh_mm() {
        assert!(validate_time("00:00").is_ok());
        assert!(validate_time("23:59").is_ok());
        assert!(validate_time("9:00").is_err());
        assert!(validate_time("24:00").is_err());
    }

    #[test]
    fn later_patch_fields_win_on_merge() {
        let mut pending = SheetPatch::title("first");
        pending.merge(SheetPatch::notes(Vec::new()));
        pending.merge(SheetPatch::title("second"));
        assert_eq!(pending.title.as_deref(), Some("second"));
        assert_eq!(pending.notes, Some(Vec::new()));
        assert!(pending.priorities.is_none());
    }
}
