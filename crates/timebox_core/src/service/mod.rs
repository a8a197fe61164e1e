//! Page-facing adapters.
//!
//! # Responsibility
//! - Turn repository calls into `{data, is_loading, error}` state that a
//!   renderer can poll or watch.
//! - Keep renderers decoupled from cache, coalescer and store details.

pub mod view_model;

pub use view_model::{SheetListModel, SheetModel, ViewState};
