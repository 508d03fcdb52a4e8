//! metasweep: scheduled, policy-driven retention cleanup for workflow
//! metadata databases.
//!
//! The engine lives in [`retention`]; [`db`] holds the SQLite and PostgreSQL
//! stores it runs against, and [`config`] the TOML configuration that wires
//! the two together.

pub mod config;
pub mod db;
pub mod models;
pub mod observability;
pub mod retention;
