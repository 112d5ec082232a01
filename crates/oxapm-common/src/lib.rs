//! Shared domain types for the oxapm strategy dispatch engine.

pub mod id;
pub mod types;
