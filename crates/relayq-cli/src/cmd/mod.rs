//! Command implementations.

pub mod send;
pub mod start;
