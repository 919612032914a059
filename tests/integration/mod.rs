//! Integration test suite for cadence.
//!
//! These tests drive the public API end to end: config documents are loaded,
//! built into a DAG and executed with scripted executors that record when
//! every agent started and finished.
//!
//! # Test Categories
//!
//! - `config_loading`: TOML/JSON documents through to a validated DAG
//! - `orchestration`: ordering, concurrency, failure policy, timeouts
//! - `strategies`: progressive and systematic wave execution
//! - `shell`: the shell executor driven by a real config file
//!
//! # CI Compatibility
//!
//! Everything except the `shell` tests is in-process; those need `sh`.

mod fixtures;

mod orchestration;
mod shell;
mod strategies;
