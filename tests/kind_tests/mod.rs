//! Integration tests for hub-migrate
//!
//! These tests require a Kubernetes cluster (kind) acting as the global hub
//! and tell the story of how a fleet operator interacts with migrations.
//!
//! # Test Organization
//!
//! - `crd_operations`: Stories about creating, reading and updating
//!   ManagedClusterMigration resources through the Kubernetes API
//!
//! - `migration_flow`: Stories about how the controller, running in-process
//!   against the kind cluster, moves migrations between phases
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored --nocapture
//! ```

mod crd_operations;
mod helpers;
mod migration_flow;
