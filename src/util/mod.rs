//! Utility types and functions

pub mod logger;
