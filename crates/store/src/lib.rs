//! Cache and audit-log backends for Strata.

pub mod file_audit;
pub mod in_memory;
pub mod noop;

pub use file_audit::FileAuditLog;
pub use in_memory::{InMemoryAuditLog, InMemoryCache};
pub use noop::{NoopAuditLog, NoopCache};
