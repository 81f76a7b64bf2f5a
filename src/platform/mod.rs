//! Video platform page, stream map and player script handling

pub mod cipher;
pub mod client;
pub mod extract;
pub mod formats;
pub mod jsinterp;
pub mod query;

pub use cipher::{CipherError, CipherResolver};
pub use client::*;
pub use formats::*;
pub use query::*;
