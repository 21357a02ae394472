//! # Configuration Module
//!
//! Centralizes every engine constant. Constants that depend on each other
//! are co-located in [`constants`] and their relationships documented there,
//! with compile-time assertions where a value is derivable.

pub mod constants;

pub use constants::*;
