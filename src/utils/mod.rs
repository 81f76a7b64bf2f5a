//! Utility functions for tuberesolve

pub mod filename;
pub mod url;

pub use filename::*;
pub use url::*;
