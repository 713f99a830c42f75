//! Types shared between the storage quota monitor, its HTTP API and its clients.

pub mod error;
pub mod event;
pub mod history;
pub mod object;
pub mod render;
pub mod status;

pub use event::{DeltaLogRecord, StorageEvent, StorageEventType};
pub use history::SizeObservation;
pub use object::ObjectSummary;
