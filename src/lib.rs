//! Health and recovery test harness for a Citus cluster.
//!
//! Connects to the coordinator, provisions schema and seed data from SQL
//! scripts, runs verification queries, inspects cluster health and exercises
//! a disconnect/reconnect cycle. `orchestrator::TestOrchestrator` ties the
//! phases together.

pub mod config;
pub mod connector;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod health;
pub mod orchestrator;
pub mod recovery;
pub mod script;
pub mod session;
