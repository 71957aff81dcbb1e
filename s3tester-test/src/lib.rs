//! Test utilities for s3tester.
//!
//! This crate provides utilities to facilitate testing of the load generator. See the modules
//! for all available utilities.

pub mod server;
pub mod tracing;
