//! Conversions between stored JSON documents and domain values.
//!
//! The document id is not part of the stored body; it is the last path
//! segment and is re-attached on decode.

use crate::model::ids::ServerTimestamp;
use crate::model::settings::UserSettings;
use crate::model::sheet::{Sheet, SheetPatch};
use crate::store::{Document, StoreError, StoreResult, StoredDocument};
use serde_json::Value;

const ID_FIELD: &str = "id";
const UPDATED_AT_FIELD: &str = "updatedAt";
const SETTINGS_FIELD: &str = "settings";

/// Full document body for `set_document`.
pub fn sheet_to_document(sheet: &Sheet) -> StoreResult<Document> {
    let mut document = into_object(serde_json::to_value(sheet)?)?;
    document.remove(ID_FIELD);
    Ok(document)
}

/// Decodes one stored sheet, trusting the path id over any body `id`.
pub fn sheet_from_document(id: &str, mut fields: Document) -> StoreResult<Sheet> {
    fields.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    Ok(serde_json::from_value(Value::Object(fields))?)
}

pub fn sheet_from_stored(document: StoredDocument) -> StoreResult<Sheet> {
    sheet_from_document(&document.id, document.fields)
}

/// Partial field map for `update_document`, always stamping `updatedAt`.
pub fn patch_to_fields(patch: &SheetPatch, updated_at: ServerTimestamp) -> StoreResult<Document> {
    let mut fields = into_object(serde_json::to_value(patch)?)?;
    fields.insert(
        UPDATED_AT_FIELD.to_string(),
        Value::from(updated_at.as_millis()),
    );
    Ok(fields)
}

/// Reads the `settings` field of a user document, merged over defaults.
pub fn settings_from_user_document(document: &Document) -> StoreResult<UserSettings> {
    match document.get(SETTINGS_FIELD) {
        Some(value) => Ok(serde_json::from_value(value.clone())?),
        None => Ok(UserSettings::default()),
    }
}

fn into_object(value: Value) -> StoreResult<Document> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::Unavailable(
            "encoded value is not a JSON object".to_string(),
        )),
    }
}
