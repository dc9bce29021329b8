//! relcontent Benchmark Suite
//!
//! Criterion benchmarks for the content engine.
//!
//! # Benchmark Categories
//!
//! - **Descriptor**: descriptor building, cold and cached
//! - **Records**: record building, batch sizes and merging

pub mod fixtures;

pub use fixtures::{generate, Dataset, Scale};
