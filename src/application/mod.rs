//! # Application Layer
//!
//! Core logic and orchestration: response interpretation, the query engine with its
//! fix loop, the error resolution loop, the dev server monitor and the metadata builder.

pub mod context;
pub mod engine;
pub mod interpreter;
pub mod metadata_builder;
pub mod monitor;
pub mod parsing;
pub mod relevance;
pub mod resolution;

#[cfg(test)]
pub(crate) mod testing;
