//! PostgreSQL persistence for workflow definitions and instances.

pub mod pool;
pub mod store;

pub use pool::{create_pool, health_check, DbPool};
pub use store::PgWorkflowStore;
