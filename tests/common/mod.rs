//! Shared test utilities for integration, property and chaos tests.
//!
//! This module provides:
//! - Redis testcontainer setup and stream helpers
//! - Recording mocks for the warehouse, the cache, the delivery source and
//!   the product store

#![allow(dead_code)]

pub mod containers;
pub mod mocks;

pub use containers::*;
pub use mocks::*;
