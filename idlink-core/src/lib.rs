pub mod bootstrap;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod oauth2;
pub mod repository;
pub mod service;

#[cfg(any(test, feature = "test-util"))]
pub mod test_helpers;

pub use config::Config;
pub use error::{Error, Result};
