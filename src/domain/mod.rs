//! Domain layer - Core types and port definitions
//!
//! This module defines the traits (ports) through which the discovery
//! engine reaches plugins, persistence and the task service.

pub mod ports;

pub use ports::*;
