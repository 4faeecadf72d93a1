//! Projection implementations and the dispatch pipeline feeding them.
//!
//! All projections are:
//! - **Rebuildable**: reconstructed from the event log at any time
//! - **Idempotent**: safe for at-least-once delivery (cursor per aggregate)

pub mod cursor_store;
pub mod profiles;
pub mod registry;

pub use cursor_store::PostgresCursorStore;
pub use profiles::{ProfileProjection, ProfileReadModel, ProfileStore};
pub use registry::{FailedProjection, ProjectionUpdated, Projector, ProjectorRegistry, RebuildError};
