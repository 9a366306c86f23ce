//! Binary-facing commands and their error type.

pub mod commands;
pub mod error;
