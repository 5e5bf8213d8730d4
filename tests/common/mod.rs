//! Common test utilities and fixtures for the cookiekit-core test suite.
//!
//! Shared secrets, options, and session states used across store, rotation,
//! concurrency, and property-based tests.

#![allow(dead_code)]

pub mod fixtures;
