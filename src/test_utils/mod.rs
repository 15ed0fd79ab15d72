//! Test utilities.
//!
//! This module provides:
//! - Test data factories for creating valid fixtures
//! - In-memory Event Store and ledger implementations
//! - Failure-injecting and scripted doubles for error paths
//! - `TestAppStateBuilder` for HTTP-level tests

mod factories;
mod ledger_mocks;
mod webhook_mocks;

pub use app_state_builder::*;
pub use factories::*;
pub use ledger_mocks::*;
pub use webhook_mocks::*;
