//! Panel edit helpers that turn one UI action into a `SheetPatch`.
//!
//! Each helper reads the current sheet and returns the replacement list for
//! exactly one panel. Helpers addressing an unknown item id return `None` so
//! callers can skip a no-op write.

use crate::model::sheet::{
    validate_time, BlockColor, Note, Priority, Sheet, SheetPatch, SheetValidationError, TimeBlock,
};
use uuid::Uuid;

/// Input for a new schedule block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTimeBlock {
    pub start_time: String,
    pub end_time: String,
    pub activity: String,
    pub color: BlockColor,
}

/// Editable text field of a schedule block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeBlockField {
    StartTime(String),
    EndTime(String),
    Activity(String),
}

fn item_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

impl Sheet {
    /// Appends a priority with trimmed `text`, not completed.
    pub fn add_priority(&self, text: &str) -> Result<SheetPatch, SheetValidationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SheetValidationError::EmptyText("priority text"));
        }
        let mut priorities = self.priorities.clone();
        priorities.push(Priority {
            id: item_id("p"),
            text: text.to_string(),
            completed: false,
        });
        Ok(SheetPatch::priorities(priorities))
    }

    pub fn toggle_priority(&self, priority_id: &str) -> Option<SheetPatch> {
        self.map_priority(priority_id, |priority| {
            priority.completed = !priority.completed;
        })
    }

    pub fn edit_priority_text(&self, priority_id: &str, text: &str) -> Option<SheetPatch> {
        self.map_priority(priority_id, |priority| priority.text = text.to_string())
    }

    pub fn remove_priority(&self, priority_id: &str) -> Option<SheetPatch> {
        let kept = without_id(&self.priorities, priority_id, |p| p.id.as_str())?;
        Some(SheetPatch::priorities(kept))
    }

    /// Appends a note; blank content is rejected.
    pub fn add_note(&self, content: &str) -> Result<SheetPatch, SheetValidationError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SheetValidationError::EmptyText("note content"));
        }
        let mut notes = self.notes.clone();
        notes.push(Note {
            id: item_id("n"),
            content: content.to_string(),
        });
        Ok(SheetPatch::notes(notes))
    }

    pub fn edit_note(&self, note_id: &str, content: &str) -> Option<SheetPatch> {
        let mut notes = self.notes.clone();
        let note = notes.iter_mut().find(|note| note.id == note_id)?;
        note.content = content.to_string();
        Some(SheetPatch::notes(notes))
    }

    pub fn remove_note(&self, note_id: &str) -> Option<SheetPatch> {
        let kept = without_id(&self.notes, note_id, |n| n.id.as_str())?;
        Some(SheetPatch::notes(kept))
    }

    /// Appends a schedule block. Start, end and activity are all required.
    pub fn add_time_block(&self, block: NewTimeBlock) -> Result<SheetPatch, SheetValidationError> {
        validate_time(&block.start_time)?;
        validate_time(&block.end_time)?;
        if block.activity.trim().is_empty() {
            return Err(SheetValidationError::EmptyText("activity"));
        }
        let mut schedule = self.schedule.clone();
        schedule.push(TimeBlock {
            id: item_id("tb"),
            start_time: block.start_time,
            end_time: block.end_time,
            activity: block.activity,
            color: block.color,
        });
        Ok(SheetPatch::schedule(schedule))
    }

    /// Updates one text field of a block. Time fields are validated.
    pub fn edit_time_block(
        &self,
        block_id: &str,
        field: TimeBlockField,
    ) -> Result<Option<SheetPatch>, SheetValidationError> {
        match &field {
            TimeBlockField::StartTime(value) | TimeBlockField::EndTime(value) => {
                validate_time(value)?
            }
            TimeBlockField::Activity(_) => {}
        }
        Ok(self.map_block(block_id, move |block| match field {
            TimeBlockField::StartTime(value) => block.start_time = value,
            TimeBlockField::EndTime(value) => block.end_time = value,
            TimeBlockField::Activity(value) => block.activity = value,
        }))
    }

    pub fn set_block_color(&self, block_id: &str, color: BlockColor) -> Option<SheetPatch> {
        self.map_block(block_id, |block| block.color = color)
    }

    pub fn remove_time_block(&self, block_id: &str) -> Option<SheetPatch> {
        let kept = without_id(&self.schedule, block_id, |b| b.id.as_str())?;
        Some(SheetPatch::schedule(kept))
    }

    fn map_priority(
        &self,
        priority_id: &str,
        edit: impl FnOnce(&mut Priority),
    ) -> Option<SheetPatch> {
        let mut priorities = self.priorities.clone();
        edit(priorities.iter_mut().find(|p| p.id == priority_id)?);
        Some(SheetPatch::priorities(priorities))
    }

    fn map_block(&self, block_id: &str, edit: impl FnOnce(&mut TimeBlock)) -> Option<SheetPatch> {
        let mut schedule = self.schedule.clone();
        edit(schedule.iter_mut().find(|b| b.id == block_id)?);
        Some(SheetPatch::schedule(schedule))
    }
}

fn without_id<T: Clone>(items: &[T], id: &str, id_of: impl Fn(&T) -> &str) -> Option<Vec<T>> {
    if !items.iter().any(|item| id_of(item) == id) {
        return None;
    }
    Some(
        items
            .iter()
            .filter(|item| id_of(item) != id)
            .cloned()
            .collect(),
    )
}
