//! Domain model for date-scoped planning sheets.
//!
//! # Responsibility
//! - Define the canonical sheet shape shared by cache, store and UI callers.
//! - Keep identity derivation (`sheet-<date>`) in one place.
//!
//! # Invariants
//! - At most one sheet id exists per date per user.
//! - Every mutation is a partial merge expressed as a `SheetPatch`.

pub mod edits;
pub mod ids;
pub mod settings;
pub mod sheet;
