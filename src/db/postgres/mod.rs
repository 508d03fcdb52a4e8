mod retention;

pub use retention::PostgresRetentionRepo;
