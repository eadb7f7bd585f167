//! Petal Core
//!
//! Shared building blocks for the petal sprite renderer: logging and
//! profiling setup, configuration, math and geometry.

pub mod config;
pub mod geometry;
pub mod logging;
pub mod math;
pub mod profiling;

pub use config::Config;
