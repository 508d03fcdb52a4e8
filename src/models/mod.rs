mod expired_entry;
mod retention_policy;

pub use expired_entry::*;
pub use retention_policy::*;
