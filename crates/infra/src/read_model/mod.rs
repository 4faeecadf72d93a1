//! Read model storage for projections.

pub mod postgres;
pub mod store;

pub use postgres::PostgresProfileStore;
pub use store::{InMemoryReadModelStore, ReadModelStore};
