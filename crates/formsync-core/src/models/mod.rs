//! Data models for formsync

mod entities;
mod entity;
mod record;
mod rejection;
mod sync_conflict;

pub use entities::{
    Authorization, Checklist, ChecklistItem, MeasurementBulletin, QualityReport, Survey,
};
pub use entity::{Entity, EntitySchema};
pub use record::{LocalId, Record, ServerId, SyncStatus};
pub use rejection::SyncRejection;
pub use sync_conflict::SyncConflict;
