//! # Delegate Scheduler Testing Utils
//!
//! Shared testing utilities for the delegate scheduler workspace: test data
//! builders with sensible defaults and test doubles for the external
//! collaborators (transport, resource constraints, workflow interrupts).
//!
//! ## Usage
//!
//! ```toml
//! [dev-dependencies]
//! delegate-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;
