//! CLI command implementations.
//!
//! This module contains the implementation of each CLI command.

pub mod cache;
pub mod dump;
pub mod locate;
pub mod regions;
pub mod watch;
