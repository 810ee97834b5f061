//! Metadata synchronization engine.
//!
//! Keeps the per-visit CRF and requisition ledgers consistent with the visit
//! schedule, the submitted forms, and an external rule engine.

pub mod engine;
pub mod error;
pub mod handler;
pub mod registry;
pub mod target_handler;
pub mod traits;
pub mod updater;
pub mod wrapper;

pub use engine::MetadataEngine;
pub use error::MetadataError;
pub use handler::MetadataHandler;
pub use registry::{ModelRegistry, Participant, TrackedForm};
pub use target_handler::TargetHandler;
pub use traits::*;
pub use updater::{MetadataUpdater, ReconcileSummary};
pub use wrapper::{visit_metadata, wrap_visit_metadata, MetadataWrapper};
