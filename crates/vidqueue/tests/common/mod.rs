//! Shared test utilities for vidqueue integration tests.
//!
//! This module provides:
//! - `TestHarness`, a queue wired to an in-memory ledger and a scripted processor
//! - polling helpers that wait for job states with a timeout

pub mod harness;
pub mod processor;

pub use harness::*;
pub use processor::{Script, ScriptedProcessor, SCRIPTED_PROGRESS};
