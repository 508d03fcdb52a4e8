//! Shared retention store test infrastructure
//!
//! The same test logic runs against both SQLite and PostgreSQL stores:
//!
//! - **Unit tests (SQLite)**: Fast, in-memory tests that run with every `cargo test`
//! - **Integration tests (PostgreSQL)**: Slower tests using testcontainers, run with `cargo test -- --ignored`
//!
//! The store schema belongs to the orchestrator, not to this crate, so each
//! test creates the Airflow-shaped tables it needs instead of running migrations.
//!
//! # Running tests
//!
//! ```bash
//! cargo test                       # Run fast SQLite tests only
//! cargo test -- --ignored          # Run PostgreSQL integration tests (requires Docker)
//! cargo test -- --include-ignored  # Run all tests
//! ```
