//! Shared test utilities for tenant-limits.
//!
//! This crate provides:
//! - Proptest generators for tenants, limits and operation sequences
//! - Mock implementations of the upstream collaborators
//! - Test fixtures with isolated configuration and sample entities

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod mocks;

pub use generators::*;
