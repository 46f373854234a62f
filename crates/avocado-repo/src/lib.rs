pub mod checksums;
pub mod config;
pub mod error;
pub mod fragment;
pub mod fsutil;
pub mod layout;
pub mod logging;
pub mod manifest;
pub mod metadata;
pub mod publish;
pub mod release;
pub mod repo_map;

pub use error::{Error, Result};
