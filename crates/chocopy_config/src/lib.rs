//! ChocoPy code generator configuration: `chocopy.toml`.

mod config;

pub use config::*;
