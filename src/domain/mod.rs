//! # Domain Layer
//!
//! Commands, error kinds, configuration and the seam traits the other layers meet at.
//! Nothing in here talks to the network, the shell or the terminal.

pub mod config;
pub mod error;
pub mod paths;
pub mod traits;
pub mod types;
