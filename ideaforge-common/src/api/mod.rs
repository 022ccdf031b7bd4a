//! Shared API types for the workshop coordinator HTTP surface

pub mod types;
