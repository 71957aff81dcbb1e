//! The s3tester load generator.
//!
//! This builds on top of [`s3tester_core`] and drives a configurable number of workers that issue
//! `HEAD` requests for keys from a key file against an object storage endpoint, over pooled
//! connections that are reaped once they have been idle for longer than the configured TTL.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod config;
pub mod http;
pub mod observability;
pub mod runner;
pub mod transport;
